use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::row_parsers::{db_resident_from_row, db_town_from_row};
use crate::errors::{PermsError, PermsResult};
use crate::models::resident::{ResidentUpsertRequest, Town};
use crate::perms::{Principal, PrincipalDirectory, RankScope, SessionId};

const RESIDENT_SELECT: &str = "SELECT r.id, r.name, r.town, t.nation, r.mayor, r.king, r.session_id, r.updated_at \
     FROM residents r LEFT JOIN towns t ON t.name = r.town";

fn directory_err(err: sqlx::Error) -> PermsError {
    PermsError::directory(err.to_string())
}

/// Residents, towns and held ranks stored in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, filter: &str, bind: Option<&str>) -> PermsResult<Vec<Principal>> {
        let sql = format!("{RESIDENT_SELECT} {filter} ORDER BY r.id");
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(directory_err)?;

        let mut principals = Vec::with_capacity(rows.len());
        for row in &rows {
            let resident = db_resident_from_row(row)?;
            let (town_ranks, nation_ranks) = self.held_ranks(resident.id).await?;
            principals.push(resident.into_principal(town_ranks, nation_ranks));
        }
        Ok(principals)
    }

    async fn held_ranks(&self, id: Uuid) -> PermsResult<(Vec<String>, Vec<String>)> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT scope, rank FROM resident_ranks WHERE resident_id = ? ORDER BY position")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(directory_err)?;

        let mut town = Vec::new();
        let mut nation = Vec::new();
        for (scope, rank) in rows {
            match scope.parse::<RankScope>()? {
                RankScope::Town => town.push(rank),
                RankScope::Nation => nation.push(rank),
            }
        }
        Ok((town, nation))
    }

    pub async fn town(&self, name: &str) -> PermsResult<Option<Town>> {
        let row = sqlx::query("SELECT name, nation, updated_at FROM towns WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(directory_err)?;
        row.as_ref().map(db_town_from_row).transpose().map(|town| town.map(Town::from))
    }

    /// Create or update a town and the nation it belongs to.
    pub async fn upsert_town(&self, name: &str, nation: Option<&str>) -> PermsResult<Town> {
        sqlx::query(
            "INSERT INTO towns (name, nation, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET nation = excluded.nation, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(nation)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(directory_err)?;

        self.town(name)
            .await?
            .ok_or_else(|| PermsError::directory(format!("town {name} vanished after upsert")))
    }

    /// Replace a resident's membership and held ranks. The live session, if
    /// any, is left alone.
    pub async fn upsert_resident(&self, id: Uuid, request: &ResidentUpsertRequest) -> PermsResult<Principal> {
        let id_s = id.to_string();
        let mut tx = self.pool.begin().await.map_err(directory_err)?;

        sqlx::query(
            "INSERT INTO residents (id, name, town, mayor, king, updated_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, town = excluded.town, mayor = excluded.mayor, \
             king = excluded.king, updated_at = excluded.updated_at",
        )
        .bind(&id_s)
        .bind(&request.name)
        .bind(&request.town)
        .bind(request.mayor)
        .bind(request.king)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(directory_err)?;

        sqlx::query("DELETE FROM resident_ranks WHERE resident_id = ?")
            .bind(&id_s)
            .execute(&mut *tx)
            .await
            .map_err(directory_err)?;

        let held = request
            .town_ranks
            .iter()
            .map(|rank| (RankScope::Town, rank))
            .chain(request.nation_ranks.iter().map(|rank| (RankScope::Nation, rank)));
        for (position, (scope, rank)) in held.enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO resident_ranks (resident_id, scope, rank, position) VALUES (?, ?, ?, ?)",
            )
            .bind(&id_s)
            .bind(scope.as_str())
            .bind(rank)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(directory_err)?;
        }

        tx.commit().await.map_err(directory_err)?;

        self.principal(id)
            .await?
            .ok_or_else(|| PermsError::directory(format!("resident {id} vanished after upsert")))
    }

    /// Set or clear the resident's live session. Returns false for unknown
    /// residents.
    pub async fn set_session(&self, id: Uuid, session: Option<SessionId>) -> PermsResult<bool> {
        let result = sqlx::query("UPDATE residents SET session_id = ?, updated_at = ? WHERE id = ?")
            .bind(session.map(|s| s.to_string()))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(directory_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PrincipalDirectory for SqliteDirectory {
    async fn principal(&self, id: Uuid) -> PermsResult<Option<Principal>> {
        let id_s = id.to_string();
        Ok(self.fetch("WHERE r.id = ?", Some(&id_s)).await?.into_iter().next())
    }

    async fn online_principals(&self) -> PermsResult<Vec<Principal>> {
        self.fetch("WHERE r.session_id IS NOT NULL", None).await
    }

    async fn town_residents(&self, town: &str) -> PermsResult<Vec<Principal>> {
        self.fetch("WHERE r.town = ?", Some(town)).await
    }

    async fn nation_residents(&self, nation: &str) -> PermsResult<Vec<Principal>> {
        self.fetch("WHERE t.nation = ?", Some(nation)).await
    }
}
