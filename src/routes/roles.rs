use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, actions};
use crate::authz::{permissions, roles, Principal};
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::rbac::{
    Role, RoleCreateRequest, RoleGrant, RoleGrantRequest, RoleGrantView, RoleUpdateRequest,
};
use crate::utils::utc_now;

fn role_from_row(row: &SqliteRow) -> Role {
    Role {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn fetch_role(state: &AppState, id: Uuid) -> AppResult<Role> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("role not found"))?;
    Ok(role_from_row(&row))
}

#[utoipa::path(
    get,
    path = "/api/roles",
    tag = "Roles",
    responses((status = 200, description = "List of roles", body = [Role])),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<Role>>> {
    let rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows.iter().map(role_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ?")
        .bind(&payload.name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("role name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = fetch_role(&state, id).await?;
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &role);

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/api/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    Ok(Json(fetch_role(&state, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 403, description = "The godmode role cannot be renamed"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<RoleUpdateRequest>,
) -> AppResult<Json<Role>> {
    let existing = fetch_role(&state, id).await?;

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let description = payload.description.or_else(|| existing.description.clone());

    if existing.name == roles::GODMODE && name != existing.name {
        return Err(AppError::forbidden("the godmode role cannot be renamed"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ? AND id != ?")
        .bind(&name)
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("role name already exists"));
    }

    sqlx::query("UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let role = fetch_role(&state, id).await?;
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &role);

    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/api/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 403, description = "The godmode role cannot be deleted"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role is still assigned to users")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let role = fetch_role(&state, id).await?;
    if role.name == roles::GODMODE {
        return Err(AppError::forbidden("the godmode role cannot be deleted"));
    }

    let assigned: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE role_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if assigned > 0 {
        return Err(AppError::conflict("role is still assigned to users"));
    }

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &role);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/roles/{id}/permissions",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Grants held by the role", body = [RoleGrantView]),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_role_grants(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<RoleGrantView>>> {
    let role = fetch_role(&state, id).await?;

    let rows = sqlx::query(
        "SELECT rp.role_id, rp.permission_id, p.name AS permission_name, \
                rp.resource_id, rs.name AS resource_name, rs.path AS resource_path, rp.created_at \
         FROM role_permissions rp \
         INNER JOIN permissions p ON p.id = rp.permission_id \
         INNER JOIN resources rs ON rs.id = rp.resource_id \
         WHERE rp.role_id = ? \
         ORDER BY rs.path, p.name",
    )
    .bind(role.id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let grants = rows
        .iter()
        .map(|row| RoleGrantView {
            role_id: Uuid::parse_str(row.get::<&str, _>("role_id")).unwrap_or_default(),
            permission_id: Uuid::parse_str(row.get::<&str, _>("permission_id")).unwrap_or_default(),
            permission_name: row.get("permission_name"),
            resource_id: Uuid::parse_str(row.get::<&str, _>("resource_id")).unwrap_or_default(),
            resource_name: row.get("resource_name"),
            resource_path: row.get("resource_path"),
            created_at: row.get("created_at"),
        })
        .collect();

    Ok(Json(grants))
}

#[utoipa::path(
    post,
    path = "/api/roles/{id}/permissions",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleGrantRequest,
    responses(
        (status = 201, description = "Grant created", body = RoleGrant),
        (status = 404, description = "Role, permission or resource not found"),
        (status = 409, description = "Grant already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role_grant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<RoleGrantRequest>,
) -> AppResult<(StatusCode, Json<RoleGrant>)> {
    let role = fetch_role(&state, id).await?;

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
        "SELECT COUNT(1) FROM role_permissions WHERE role_id = ? AND permission_id = ? AND resource_id = ?",
    )
    .bind(role.id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("grant already exists"));
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id, resource_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(role.id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?;

    let grant = RoleGrant {
        role_id: role.id,
        permission_id: payload.permission_id,
        resource_id: payload.resource_id,
        created_at: now,
    };

    audit::record(&state.audit, Some(principal.user_id), actions::GRANT, &grant);

    Ok((StatusCode::CREATED, Json(grant)))
}

#[utoipa::path(
    delete,
    path = "/api/roles/{id}/permissions",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleGrantRequest,
    responses(
        (status = 204, description = "Grant revoked"),
        (status = 403, description = "Manage grants cannot be revoked from the godmode role"),
        (status = 404, description = "Role or grant not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role_grant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<RoleGrantRequest>,
) -> AppResult<StatusCode> {
    let role = fetch_role(&state, id).await?;

    // Godmode must stay omnipotent; its manage grants are not revocable.
    if role.name == roles::GODMODE {
        let permission_name: Option<String> =
            sqlx::query_scalar("SELECT name FROM permissions WHERE id = ?")
                .bind(payload.permission_id.to_string())
                .fetch_optional(&state.pool)
                .await?;
        if permission_name.as_deref() == Some(permissions::MANAGE) {
            return Err(AppError::forbidden(
                "manage grants cannot be revoked from the godmode role",
            ));
        }
    }

    let result = sqlx::query(
        "DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ? AND resource_id = ?",
    )
    .bind(role.id.to_string())
    .bind(payload.permission_id.to_string())
    .bind(payload.resource_id.to_string())
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("grant not found"));
    }

    let grant = RoleGrant {
        role_id: role.id,
        permission_id: payload.permission_id,
        resource_id: payload.resource_id,
        created_at: utc_now(),
    };
    audit::record(&state.audit, Some(principal.user_id), actions::REVOKE, &grant);

    Ok(StatusCode::NO_CONTENT)
}
