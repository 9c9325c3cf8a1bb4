use anyhow::Result;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use town_perms::db::{self, SqliteDirectory};
use town_perms::events::{init_event_bus, log_activity, record_event, verify_chain};
use town_perms::models::policy::PolicyChange;
use town_perms::models::resident::ResidentUpsertRequest;
use town_perms::perms::{PrincipalDirectory, SessionId};

async fn pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = db::connect(&url).await?;
    Ok((dir, pool))
}

fn resident(name: &str, town: Option<&str>) -> ResidentUpsertRequest {
    ResidentUpsertRequest {
        name: name.to_string(),
        town: town.map(str::to_string),
        mayor: false,
        king: false,
        town_ranks: Vec::new(),
        nation_ranks: Vec::new(),
    }
}

#[tokio::test]
async fn residents_round_trip_with_ranks_and_nation() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let directory = SqliteDirectory::new(pool);
    let id = Uuid::new_v4();

    directory.upsert_town("Sparta", Some("Hellas")).await?;
    let mut request = resident("leonidas", Some("sparta"));
    request.king = true;
    request.town_ranks = vec!["sheriff".into(), "helper".into()];
    request.nation_ranks = vec!["general".into()];
    let principal = directory.upsert_resident(id, &request).await?;

    assert_eq!(principal.nation_name(), Some("Hellas"));
    assert!(principal.is_king());
    assert_eq!(principal.town_ranks, ["sheriff", "helper"]);
    assert_eq!(principal.nation_ranks, ["general"]);
    assert!(!principal.is_online());

    // ranks are replaced, not merged
    request.town_ranks = vec!["helper".into()];
    let principal = directory.upsert_resident(id, &request).await?;
    assert_eq!(principal.town_ranks, ["helper"]);
    Ok(())
}

#[tokio::test]
async fn lookups_by_town_nation_and_session() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let directory = SqliteDirectory::new(pool);

    directory.upsert_town("Athens", Some("Hellas")).await?;
    directory.upsert_town("Rome", None).await?;
    let athenian = Uuid::new_v4();
    let roman = Uuid::new_v4();
    let drifter = Uuid::new_v4();
    directory.upsert_resident(athenian, &resident("socrates", Some("Athens"))).await?;
    directory.upsert_resident(roman, &resident("cato", Some("Rome"))).await?;
    directory.upsert_resident(drifter, &resident("diogenes", None)).await?;

    assert_eq!(directory.town_residents("ATHENS").await?.len(), 1);
    assert_eq!(directory.nation_residents("hellas").await?[0].id, athenian);
    assert!(directory.online_principals().await?.is_empty());

    let session = SessionId::new();
    assert!(directory.set_session(roman, Some(session)).await?);
    assert!(!directory.set_session(Uuid::new_v4(), Some(session)).await?);

    let online = directory.online_principals().await?;
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].session, Some(session));

    // session survives a membership update
    directory.upsert_resident(roman, &resident("cato", None)).await?;
    let cato = directory.principal(roman).await?.expect("cato exists");
    assert_eq!(cato.session, Some(session));
    assert!(!cato.has_town());

    assert!(directory.principal(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn audit_trail_is_hash_chained() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let (bus, mut rx) = init_event_bus();

    for (action, node) in [("node_added", "jail.use"), ("node_removed", "jail.use")] {
        let change = PolicyChange::new("towns.ranks.sheriff", Some(node.to_string()), "abc123");
        log_activity(&bus, action, Some("ops"), &change);
    }

    let first = rx.recv().await?;
    assert_eq!(first["name"], "policy.node_added");
    assert_eq!(first["subject"], "towns.ranks.sheriff");
    assert_eq!(first["payload"]["severity"], "important");
    let second = rx.recv().await?;
    assert_eq!(second["payload"]["severity"], "critical");
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    record_event(&pool, &first).await?;
    record_event(&pool, &second).await?;
    record_event(&pool, &json!({ "name": "policy.reloaded", "subject": "townyperms.yml" })).await?;
    assert_eq!(verify_chain(&pool).await?, Ok(3));

    sqlx::query("UPDATE policy_audit SET payload = '{}' WHERE seq = 2")
        .execute(&pool)
        .await?;
    assert_eq!(verify_chain(&pool).await?, Err(2));
    Ok(())
}
