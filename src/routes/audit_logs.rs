use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::AppResult;
use crate::models::audit::AuditLogEntry;

#[derive(Debug, Deserialize)]
pub struct AuditLogFilter {
    pub user_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub limit: Option<u32>,
}

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

/// Read-only view of the audit trail. There is deliberately no write route;
/// entries come only from the recorder.
#[utoipa::path(
    get,
    path = "/api/audit-logs",
    tag = "Audit",
    params(
        ("user_id" = Option<Uuid>, Query, description = "Filter by acting user"),
        ("entity_type" = Option<String>, Query, description = "Filter by entity type"),
        ("entity_id" = Option<Uuid>, Query, description = "Filter by entity"),
        ("limit" = Option<u32>, Query, description = "Max rows, newest first (default 100, cap 1000)")
    ),
    responses((status = 200, description = "Audit log entries, newest first", body = [AuditLogEntry])),
    security(("bearerAuth" = []))
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Query(filter): Query<AuditLogFilter>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let mut sql = String::from(
        "SELECT id, user_id, action, entity_type, entity_id, occurred_at, prev_hash, hash \
         FROM audit_logs WHERE 1 = 1",
    );
    if filter.user_id.is_some() {
        sql.push_str(" AND user_id = ?");
    }
    if filter.entity_type.is_some() {
        sql.push_str(" AND entity_type = ?");
    }
    if filter.entity_id.is_some() {
        sql.push_str(" AND entity_id = ?");
    }
    sql.push_str(" ORDER BY occurred_at DESC, id DESC LIMIT ?");

    let mut query = sqlx::query(&sql);
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id.to_string());
    }
    if let Some(entity_type) = &filter.entity_type {
        query = query.bind(entity_type.as_str());
    }
    if let Some(entity_id) = filter.entity_id {
        query = query.bind(entity_id.to_string());
    }
    let rows = query.bind(limit).fetch_all(&state.pool).await?;

    let entries = rows
        .iter()
        .map(|row| AuditLogEntry {
            id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
            user_id: row
                .get::<Option<&str>, _>("user_id")
                .and_then(|s| Uuid::parse_str(s).ok()),
            action: row.get("action"),
            entity_type: row.get("entity_type"),
            entity_id: row
                .get::<Option<&str>, _>("entity_id")
                .and_then(|s| Uuid::parse_str(s).ok()),
            occurred_at: row.get("occurred_at"),
            prev_hash: row.get("prev_hash"),
            hash: row.get("hash"),
        })
        .collect();

    Ok(Json(entries))
}
