use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: Option<String>,
    pub subject: String,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor: Option<String>, subject: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor,
            subject: subject.into(),
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPayload {
    pub change: Value,
    pub fingerprint: String,
    pub severity: Severity,
}

/// Publish a policy change. Delivery is best effort; a full or closed bus
/// never fails the change itself.
pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, actor: Option<&str>, entity: &T) {
    let payload = AuditPayload {
        change: serde_json::to_value(entity).unwrap_or_default(),
        fingerprint: entity.fingerprint(),
        severity: entity.severity_for_action(action),
    };
    let event = DomainEvent::new(
        format!("{}.{}", T::entity_type(), action),
        actor.map(str::to_string),
        entity.subject(),
        payload,
    );

    match serde_json::to_value(event) {
        Ok(value) => {
            let _ = event_bus.send(value);
        }
        Err(err) => tracing::warn!(error = %err, "could not serialise audit event"),
    }
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = record_event(&pool, &event).await {
                    tracing::error!(error = %err, "failed to save audit event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Append one event to `policy_audit`, chaining its hash to the last row.
pub async fn record_event(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let name = event.get("name").and_then(Value::as_str).unwrap_or("unknown");
    let subject = event.get("subject").and_then(Value::as_str).unwrap_or_default();
    let actor = event.get("actor").and_then(Value::as_str);
    let occurred_at = event
        .get("occurred_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let id = event
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let fingerprint = event
        .pointer("/payload/fingerprint")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let payload = serde_json::to_string(event).unwrap_or_default();

    let mut tx = pool.begin().await?;
    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM policy_audit ORDER BY seq DESC LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        "INSERT INTO policy_audit (id, event_name, subject, actor, occurred_at, payload, fingerprint, prev_hash, hash) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(subject)
    .bind(actor)
    .bind(occurred_at.to_rfc3339())
    .bind(&payload)
    .bind(fingerprint)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Walk the audit trail and recompute every hash. Returns the number of
/// entries, or the sequence number of the first broken link.
pub async fn verify_chain(pool: &SqlitePool) -> Result<Result<usize, i64>, sqlx::Error> {
    let rows = sqlx::query("SELECT seq, payload, prev_hash, hash FROM policy_audit ORDER BY seq")
        .fetch_all(pool)
        .await?;

    let mut last: Option<String> = None;
    for row in &rows {
        let seq: i64 = row.try_get("seq")?;
        let payload: String = row.try_get("payload")?;
        let prev_hash: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        if prev_hash != last || chain_hash(prev_hash.as_deref(), &payload) != hash {
            return Ok(Err(seq));
        }
        last = Some(hash);
    }
    Ok(Ok(rows.len()))
}
