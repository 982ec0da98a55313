use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, actions};
use crate::authz::{permissions, Authorize, Principal};
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::jwt::AuthUser;
use crate::models::entity::{
    EntityMemberRequest, EntityMemberUpdateRequest, EntityMembership, EntityMembershipView,
};
use crate::utils::utc_now;

const MEMBERS_RESOURCE: &str = "/api/entity-members";

fn membership_from_row(row: &SqliteRow) -> EntityMembership {
    EntityMembership {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        entity_id: Uuid::parse_str(row.get::<&str, _>("entity_id")).unwrap_or_default(),
        user_id: Uuid::parse_str(row.get::<&str, _>("user_id")).unwrap_or_default(),
        entity_role_id: Uuid::parse_str(row.get::<&str, _>("entity_role_id")).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn fetch_membership(state: &AppState, id: Uuid) -> AppResult<EntityMembership> {
    let row = sqlx::query(
        "SELECT id, entity_id, user_id, entity_role_id, created_at, updated_at \
         FROM entity_members WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("membership not found"))?;
    Ok(membership_from_row(&row))
}

/// The `/:id` routes carry no entity id in path, query or body, so the
/// access layer cannot scope them up front. The handler loads the row first
/// and runs the same check against the entity it belongs to.
async fn authorize_on_membership(
    state: &AppState,
    auth: &AuthUser,
    action: &str,
    entity_id: Uuid,
) -> AppResult<Principal> {
    let principal = Principal::load(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("unknown principal"))?;

    let decision = state
        .authz
        .authorize(&principal, action, MEMBERS_RESOURCE, Some(entity_id))
        .await?;
    if !decision.is_allowed() {
        return Err(AppError::forbidden("insufficient permissions"));
    }

    Ok(principal)
}

#[derive(Debug, Deserialize)]
pub struct MembershipFilter {
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/entity-members",
    tag = "Entity members",
    params(
        ("entity_id" = Option<Uuid>, Query, description = "Filter by entity"),
        ("user_id" = Option<Uuid>, Query, description = "Filter by user")
    ),
    responses((status = 200, description = "List of memberships", body = [EntityMembershipView])),
    security(("bearerAuth" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Query(filter): Query<MembershipFilter>,
) -> AppResult<Json<Vec<EntityMembershipView>>> {
    let mut sql = String::from(
        "SELECT em.id, em.entity_id, e.name AS entity_name, em.user_id, u.username, \
                em.entity_role_id, er.name AS entity_role_name, em.created_at \
         FROM entity_members em \
         INNER JOIN entities e ON e.id = em.entity_id \
         INNER JOIN users u ON u.id = em.user_id \
         INNER JOIN entity_roles er ON er.id = em.entity_role_id \
         WHERE 1 = 1",
    );
    if filter.entity_id.is_some() {
        sql.push_str(" AND em.entity_id = ?");
    }
    if filter.user_id.is_some() {
        sql.push_str(" AND em.user_id = ?");
    }
    sql.push_str(" ORDER BY e.name, u.username");

    let mut query = sqlx::query(&sql);
    if let Some(entity_id) = filter.entity_id {
        query = query.bind(entity_id.to_string());
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id.to_string());
    }
    let rows = query.fetch_all(&state.pool).await?;

    let members = rows
        .iter()
        .map(|row| EntityMembershipView {
            id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
            entity_id: Uuid::parse_str(row.get::<&str, _>("entity_id")).unwrap_or_default(),
            entity_name: row.get("entity_name"),
            user_id: Uuid::parse_str(row.get::<&str, _>("user_id")).unwrap_or_default(),
            username: row.get("username"),
            entity_role_id: Uuid::parse_str(row.get::<&str, _>("entity_role_id")).unwrap_or_default(),
            entity_role_name: row.get("entity_role_name"),
            created_at: row.get("created_at"),
        })
        .collect();

    Ok(Json(members))
}

#[utoipa::path(
    post,
    path = "/api/entity-members",
    tag = "Entity members",
    request_body = EntityMemberRequest,
    responses(
        (status = 201, description = "Membership created or role updated", body = EntityMembership),
        (status = 400, description = "Entity role does not belong to the entity's type"),
        (status = 404, description = "Entity, user or entity role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn upsert_member(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityMemberRequest>,
) -> AppResult<(StatusCode, Json<EntityMembership>)> {
    let entity = sqlx::query("SELECT entity_type_id FROM entities WHERE id = ?")
        .bind(payload.entity_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity not found"))?;

    let user_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE id = ?")
        .bind(payload.user_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if user_exists == 0 {
        return Err(AppError::not_found("user not found"));
    }

    let role = sqlx::query("SELECT entity_type_id FROM entity_roles WHERE id = ?")
        .bind(payload.entity_role_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity role not found"))?;

    if entity.get::<&str, _>("entity_type_id") != role.get::<&str, _>("entity_type_id") {
        return Err(AppError::bad_request(
            "entity role does not belong to the entity's type",
        ));
    }

    let now = utc_now();

    // At most one membership per (entity, user); a second grant replaces
    // the role instead of erroring.
    let existing = sqlx::query("SELECT id FROM entity_members WHERE entity_id = ? AND user_id = ?")
        .bind(payload.entity_id.to_string())
        .bind(payload.user_id.to_string())
        .fetch_optional(&state.pool)
        .await?;

    let id = match existing {
        Some(row) => {
            let id = Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default();
            sqlx::query("UPDATE entity_members SET entity_role_id = ?, updated_at = ? WHERE id = ?")
                .bind(payload.entity_role_id.to_string())
                .bind(now)
                .bind(id.to_string())
                .execute(&state.pool)
                .await?;
            id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO entity_members (id, entity_id, user_id, entity_role_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(payload.entity_id.to_string())
            .bind(payload.user_id.to_string())
            .bind(payload.entity_role_id.to_string())
            .bind(now)
            .bind(now)
            .execute(&state.pool)
            .await?;
            id
        }
    };

    let membership = fetch_membership(&state, id).await?;
    audit::record(&state.audit, Some(principal.user_id), actions::GRANT, &membership);

    Ok((StatusCode::CREATED, Json(membership)))
}

#[utoipa::path(
    put,
    path = "/api/entity-members/{id}",
    tag = "Entity members",
    params(("id" = Uuid, Path, description = "Membership ID")),
    request_body = EntityMemberUpdateRequest,
    responses(
        (status = 200, description = "Membership role updated", body = EntityMembership),
        (status = 404, description = "Membership or entity role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<EntityMemberUpdateRequest>,
) -> AppResult<Json<EntityMembership>> {
    let membership = fetch_membership(&state, id).await?;
    let principal =
        authorize_on_membership(&state, &auth, permissions::UPDATE, membership.entity_id).await?;

    let entity = sqlx::query("SELECT entity_type_id FROM entities WHERE id = ?")
        .bind(membership.entity_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity not found"))?;

    let role = sqlx::query("SELECT entity_type_id FROM entity_roles WHERE id = ?")
        .bind(payload.entity_role_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity role not found"))?;

    if entity.get::<&str, _>("entity_type_id") != role.get::<&str, _>("entity_type_id") {
        return Err(AppError::bad_request(
            "entity role does not belong to the entity's type",
        ));
    }

    sqlx::query("UPDATE entity_members SET entity_role_id = ?, updated_at = ? WHERE id = ?")
        .bind(payload.entity_role_id.to_string())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let updated = fetch_membership(&state, id).await?;
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &updated);

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/entity-members/{id}",
    tag = "Entity members",
    params(("id" = Uuid, Path, description = "Membership ID")),
    responses(
        (status = 204, description = "Membership revoked"),
        (status = 404, description = "Membership not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let membership = fetch_membership(&state, id).await?;
    let principal =
        authorize_on_membership(&state, &auth, permissions::DELETE, membership.entity_id).await?;

    sqlx::query("DELETE FROM entity_members WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::REVOKE, &membership);

    Ok(StatusCode::NO_CONTENT)
}
