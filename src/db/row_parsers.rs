use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::{PermsError, PermsResult};
use crate::models::resident::{DbResident, DbTown};

pub fn parse_datetime(s: &str) -> PermsResult<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP layout
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(PermsError::directory(format!("invalid datetime: {s}")))
}

fn parse_uuid(column: &str, s: &str) -> PermsResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| PermsError::directory(format!("invalid uuid in {column}: {e}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> PermsResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| PermsError::directory(format!("missing {name}: {e}")))
}

pub fn db_town_from_row(row: &SqliteRow) -> PermsResult<DbTown> {
    let name: String = column(row, "name")?;
    let nation: Option<String> = column(row, "nation")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(DbTown { name, nation, updated_at: parse_datetime(&updated_at_s)? })
}

pub fn db_resident_from_row(row: &SqliteRow) -> PermsResult<DbResident> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let town: Option<String> = column(row, "town")?;
    let nation: Option<String> = column(row, "nation")?;
    let mayor: bool = column(row, "mayor")?;
    let king: bool = column(row, "king")?;
    let session_id_s: Option<String> = column(row, "session_id")?;
    let updated_at_s: String = column(row, "updated_at")?;

    let id = parse_uuid("id", &id_s)?;
    let session_id = match session_id_s {
        Some(s) => Some(parse_uuid("session_id", &s)?),
        None => None,
    };
    let updated_at = parse_datetime(&updated_at_s)?;

    Ok(DbResident { id, name, town, nation, mayor, king, session_id, updated_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let a = parse_datetime("2025-11-19T12:34:56Z").unwrap();
        let b = parse_datetime("2025-11-19 12:34:56").unwrap();
        assert_eq!(a, b);
        assert!(parse_datetime("yesterday").is_err());
    }
}
