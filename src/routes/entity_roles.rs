use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, actions};
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::entity::{
    EntityRole, EntityRoleCreateRequest, EntityRoleGrant, EntityRoleGrantRequest,
    EntityRoleUpdateRequest,
};
use crate::utils::utc_now;

fn entity_role_from_row(row: &SqliteRow) -> EntityRole {
    EntityRole {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        entity_type_id: Uuid::parse_str(row.get::<&str, _>("entity_type_id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[derive(Debug, Deserialize)]
pub struct EntityRoleFilter {
    pub entity_type_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/entity-roles",
    tag = "Entity roles",
    params(("entity_type_id" = Option<Uuid>, Query, description = "Filter by entity type")),
    responses((status = 200, description = "List of entity roles", body = [EntityRole])),
    security(("bearerAuth" = []))
)]
pub async fn list_entity_roles(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Query(filter): Query<EntityRoleFilter>,
) -> AppResult<Json<Vec<EntityRole>>> {
    let rows = match filter.entity_type_id {
        Some(type_id) => {
            sqlx::query(
                "SELECT id, entity_type_id, name, description, created_at, updated_at \
                 FROM entity_roles WHERE entity_type_id = ? ORDER BY name",
            )
            .bind(type_id.to_string())
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, entity_type_id, name, description, created_at, updated_at \
                 FROM entity_roles ORDER BY name",
            )
            .fetch_all(&state.pool)
            .await?
        }
    };
    Ok(Json(rows.iter().map(entity_role_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/entity-roles",
    tag = "Entity roles",
    request_body = EntityRoleCreateRequest,
    responses(
        (status = 201, description = "Entity role created", body = EntityRole),
        (status = 404, description = "Entity type not found"),
        (status = 409, description = "Entity role already exists for this type")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_entity_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityRoleCreateRequest>,
) -> AppResult<(StatusCode, Json<EntityRole>)> {
    let type_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_types WHERE id = ?")
        .bind(payload.entity_type_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if type_exists == 0 {
        return Err(AppError::not_found("entity type not found"));
    }

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM entity_roles WHERE entity_type_id = ? AND name = ?",
    )
    .bind(payload.entity_type_id.to_string())
    .bind(&payload.name)
    .fetch_one(&state.pool)
    .await?;
    if taken > 0 {
        return Err(AppError::conflict("entity role already exists for this type"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO entity_roles (id, entity_type_id, name, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.entity_type_id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let entity_role = EntityRole {
        id,
        entity_type_id: payload.entity_type_id,
        name: payload.name,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &entity_role);

    Ok((StatusCode::CREATED, Json(entity_role)))
}

#[utoipa::path(
    put,
    path = "/api/entity-roles/{id}",
    tag = "Entity roles",
    params(("id" = Uuid, Path, description = "Entity role ID")),
    request_body = EntityRoleUpdateRequest,
    responses(
        (status = 200, description = "Entity role updated", body = EntityRole),
        (status = 404, description = "Entity role not found"),
        (status = 409, description = "Entity role already exists for this type")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_entity_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<EntityRoleUpdateRequest>,
) -> AppResult<Json<EntityRole>> {
    let row = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at \
         FROM entity_roles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity role not found"))?;
    let existing = entity_role_from_row(&row);

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let description = payload.description.or(existing.description);

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM entity_roles WHERE entity_type_id = ? AND name = ? AND id != ?",
    )
    .bind(existing.entity_type_id.to_string())
    .bind(&name)
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if taken > 0 {
        return Err(AppError::conflict("entity role already exists for this type"));
    }

    let now = utc_now();
    sqlx::query("UPDATE entity_roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let entity_role = EntityRole {
        id,
        entity_type_id: existing.entity_type_id,
        name,
        description,
        created_at: existing.created_at,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &entity_role);

    Ok(Json(entity_role))
}

#[utoipa::path(
    delete,
    path = "/api/entity-roles/{id}",
    tag = "Entity roles",
    params(("id" = Uuid, Path, description = "Entity role ID")),
    responses(
        (status = 204, description = "Entity role deleted"),
        (status = 404, description = "Entity role not found"),
        (status = 409, description = "Entity role is still held by members")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_entity_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let row = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at \
         FROM entity_roles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity role not found"))?;
    let entity_role = entity_role_from_row(&row);

    let held: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_members WHERE entity_role_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if held > 0 {
        return Err(AppError::conflict("entity role is still held by members"));
    }

    sqlx::query("DELETE FROM entity_roles WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &entity_role);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ENTITY ROLE GRANTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/entity-roles/{id}/permissions",
    tag = "Entity roles",
    params(("id" = Uuid, Path, description = "Entity role ID")),
    responses(
        (status = 200, description = "Grants held by the entity role", body = [EntityRoleGrant]),
        (status = 404, description = "Entity role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_entity_role_grants(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<EntityRoleGrant>>> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_roles WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if exists == 0 {
        return Err(AppError::not_found("entity role not found"));
    }

    let rows = sqlx::query(
        "SELECT entity_role_id, permission_id, resource_id, created_at \
         FROM entity_role_permissions WHERE entity_role_id = ? ORDER BY created_at",
    )
    .bind(id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let grants = rows
        .iter()
        .map(|row| EntityRoleGrant {
            entity_role_id: Uuid::parse_str(row.get::<&str, _>("entity_role_id")).unwrap_or_default(),
            permission_id: Uuid::parse_str(row.get::<&str, _>("permission_id")).unwrap_or_default(),
            resource_id: Uuid::parse_str(row.get::<&str, _>("resource_id")).unwrap_or_default(),
            created_at: row.get("created_at"),
        })
        .collect();

    Ok(Json(grants))
}

#[utoipa::path(
    post,
    path = "/api/entity-role-permissions",
    tag = "Entity roles",
    request_body = EntityRoleGrantRequest,
    responses(
        (status = 201, description = "Grant created", body = EntityRoleGrant),
        (status = 404, description = "Entity role, permission or resource not found"),
        (status = 409, description = "Grant already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_entity_role_grant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityRoleGrantRequest>,
) -> AppResult<(StatusCode, Json<EntityRoleGrant>)> {
    let role_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_roles WHERE id = ?")
        .bind(payload.entity_role_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if role_exists == 0 {
        return Err(AppError::not_found("entity role not found"));
    }

    let permission_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE id = ?")
        .bind(payload.permission_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if permission_exists == 0 {
        return Err(AppError::not_found("permission not found"));
    }

    let resource_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM resources WHERE id = ?")
        .bind(payload.resource_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if resource_exists == 0 {
        return Err(AppError::not_found("resource not found"));
    }

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM entity_role_permissions \
         WHERE entity_role_id = ? AND permission_id = ? AND resource_id = ?",
    )
    .bind(payload.entity_role_id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("grant already exists"));
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO entity_role_permissions (entity_role_id, permission_id, resource_id, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(payload.entity_role_id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?;

    let grant = EntityRoleGrant {
        entity_role_id: payload.entity_role_id,
        permission_id: payload.permission_id,
        resource_id: payload.resource_id,
        created_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::GRANT, &grant);

    Ok((StatusCode::CREATED, Json(grant)))
}

#[utoipa::path(
    delete,
    path = "/api/entity-role-permissions",
    tag = "Entity roles",
    request_body = EntityRoleGrantRequest,
    responses(
        (status = 204, description = "Grant revoked"),
        (status = 404, description = "Grant not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_entity_role_grant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityRoleGrantRequest>,
) -> AppResult<StatusCode> {
    let result = sqlx::query(
        "DELETE FROM entity_role_permissions \
         WHERE entity_role_id = ? AND permission_id = ? AND resource_id = ?",
    )
    .bind(payload.entity_role_id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("grant not found"));
    }

    let grant = EntityRoleGrant {
        entity_role_id: payload.entity_role_id,
        permission_id: payload.permission_id,
        resource_id: payload.resource_id,
        created_at: utc_now(),
    };
    audit::record(&state.audit, Some(principal.user_id), actions::REVOKE, &grant);

    Ok(StatusCode::NO_CONTENT)
}
