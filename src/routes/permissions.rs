use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, actions};
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::rbac::{Permission, PermissionCreateRequest, PermissionUpdateRequest};
use crate::utils::utc_now;

fn permission_from_row(row: &SqliteRow) -> Permission {
    Permission {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[utoipa::path(
    get,
    path = "/api/permissions",
    tag = "Permissions",
    responses((status = 200, description = "List of permissions", body = [Permission])),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<Permission>>> {
    let rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM permissions ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows.iter().map(permission_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/permissions",
    tag = "Permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE name = ?")
        .bind(&payload.name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("permission name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO permissions (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let permission = Permission {
        id,
        name: payload.name,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &permission);

    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    get,
    path = "/api/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission details", body = Permission),
        (status = 404, description = "Permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_permission(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Permission>> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM permissions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("permission not found"))?;
    Ok(Json(permission_from_row(&row)))
}

#[utoipa::path(
    put,
    path = "/api/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found"),
        (status = 409, description = "Permission name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<PermissionUpdateRequest>,
) -> AppResult<Json<Permission>> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM permissions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("permission not found"))?;
    let existing = permission_from_row(&row);

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let description = payload.description.or(existing.description);

    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE name = ? AND id != ?")
            .bind(&name)
            .bind(id.to_string())
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict("permission name already exists"));
    }

    let now = utc_now();
    sqlx::query("UPDATE permissions SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let permission = Permission {
        id,
        name,
        description,
        created_at: existing.created_at,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &permission);

    Ok(Json(permission))
}

#[utoipa::path(
    delete,
    path = "/api/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found"),
        (status = 409, description = "Permission is referenced by grants")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM permissions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("permission not found"))?;
    let permission = permission_from_row(&row);

    let referenced: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(1) FROM role_permissions WHERE permission_id = ?) \
               + (SELECT COUNT(1) FROM entity_role_permissions WHERE permission_id = ?)",
    )
    .bind(id.to_string())
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if referenced > 0 {
        return Err(AppError::conflict("permission is referenced by grants"));
    }

    sqlx::query("DELETE FROM permissions WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &permission);

    Ok(StatusCode::NO_CONTENT)
}
