//! Audit Recorder.
//!
//! Every state-changing operation appends a record of who did what to which
//! entity. Emission is fire-and-forget over a broadcast channel; a listener
//! task owns the writes. Entries are never updated or deleted, and each row
//! is chained to its predecessor by a SHA-256 hash so tampering is evident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type AuditBus = broadcast::Sender<AuditEvent>;

/// Well-known action verbs.
pub mod actions {
    pub const LOGIN: &str = "LOGIN";
    pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const DELETE: &str = "DELETE";
    pub const GRANT: &str = "GRANT";
    pub const REVOKE: &str = "REVOKE";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

pub fn init_bus() -> (AuditBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Implemented by models that show up in the audit trail.
pub trait Auditable {
    fn entity_type() -> &'static str;
    fn entity_id(&self) -> Uuid;
}

pub fn record<T: Auditable>(bus: &AuditBus, actor_id: Option<Uuid>, action: &str, entity: &T) {
    record_raw(bus, actor_id, action, T::entity_type(), Some(entity.entity_id()));
}

/// Fire-and-forget append. A full or closed channel must not fail the request
/// the entry accompanies; the loss is logged and the request proceeds.
pub fn record_raw(
    bus: &AuditBus,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
) {
    let event = AuditEvent {
        actor_id,
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        occurred_at: Utc::now(),
    };

    if bus.send(event).is_err() {
        tracing::warn!(action, entity_type, "audit listener unavailable, entry dropped");
    }
}

fn chain_hash(prev: Option<&str>, event: &AuditEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_default();
    let mut hasher = Sha256::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Drains the audit bus into `audit_logs`. Write failures are logged for
/// operational visibility and never escalate.
pub async fn run_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::error!(missed, "audit listener lagged, entries lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let prev_hash: Option<String> =
            match sqlx::query_scalar("SELECT hash FROM audit_logs ORDER BY occurred_at DESC, id DESC LIMIT 1")
                .fetch_optional(&pool)
                .await
            {
                Ok(prev) => prev,
                Err(err) => {
                    tracing::error!(error = %err, "failed to read audit chain head");
                    None
                }
            };

        let hash = chain_hash(prev_hash.as_deref(), &event);
        let id = Uuid::new_v4();

        let result = sqlx::query(
            "INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, occurred_at, prev_hash, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(event.actor_id.map(|u| u.to_string()))
        .bind(&event.action)
        .bind(&event.entity_type)
        .bind(event.entity_id.map(|u| u.to_string()))
        .bind(event.occurred_at)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&pool)
        .await;

        if let Err(err) = result {
            tracing::error!(error = %err, "failed to save audit log entry");
        }
    }
    tracing::info!("audit listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(action: &str) -> AuditEvent {
        AuditEvent {
            actor_id: None,
            action: action.to_string(),
            entity_type: "role".to_string(),
            entity_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn chain_hash_links_to_previous() {
        let e = event(actions::CREATE);
        let head = chain_hash(None, &e);
        assert_eq!(head, chain_hash(None, &e));
        assert_ne!(head, chain_hash(Some(&head), &e));
    }

    #[test]
    fn record_without_listener_does_not_panic() {
        let (bus, rx) = init_bus();
        drop(rx);
        record_raw(&bus, None, actions::CREATE, "role", None);
    }
}
