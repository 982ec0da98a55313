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
use crate::models::rbac::{Resource, ResourceCreateRequest, ResourceUpdateRequest};
use crate::utils::utc_now;

fn resource_from_row(row: &SqliteRow) -> Resource {
    Resource {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        path: row.get("path"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[utoipa::path(
    get,
    path = "/api/resources",
    tag = "Resources",
    responses((status = 200, description = "List of resources", body = [Resource])),
    security(("bearerAuth" = []))
)]
pub async fn list_resources(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<Resource>>> {
    let rows = sqlx::query(
        "SELECT id, name, path, description, created_at, updated_at FROM resources ORDER BY path",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows.iter().map(resource_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/resources",
    tag = "Resources",
    request_body = ResourceCreateRequest,
    responses(
        (status = 201, description = "Resource created", body = Resource),
        (status = 409, description = "Resource name or path already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_resource(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<ResourceCreateRequest>,
) -> AppResult<(StatusCode, Json<Resource>)> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM resources WHERE name = ? OR path = ?")
        .bind(&payload.name)
        .bind(&payload.path)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("resource name or path already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO resources (id, name, path, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.path)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let resource = Resource {
        id,
        name: payload.name,
        path: payload.path,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &resource);

    Ok((StatusCode::CREATED, Json(resource)))
}

#[utoipa::path(
    get,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Resource details", body = Resource),
        (status = 404, description = "Resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_resource(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Resource>> {
    let row = sqlx::query(
        "SELECT id, name, path, description, created_at, updated_at FROM resources WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("resource not found"))?;
    Ok(Json(resource_from_row(&row)))
}

#[utoipa::path(
    put,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource ID")),
    request_body = ResourceUpdateRequest,
    responses(
        (status = 200, description = "Resource updated", body = Resource),
        (status = 404, description = "Resource not found"),
        (status = 409, description = "Resource name or path already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_resource(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<ResourceUpdateRequest>,
) -> AppResult<Json<Resource>> {
    let row = sqlx::query(
        "SELECT id, name, path, description, created_at, updated_at FROM resources WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("resource not found"))?;
    let existing = resource_from_row(&row);

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let path = payload.path.unwrap_or_else(|| existing.path.clone());
    let description = payload.description.or(existing.description);

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM resources WHERE (name = ? OR path = ?) AND id != ?",
    )
    .bind(&name)
    .bind(&path)
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if taken > 0 {
        return Err(AppError::conflict("resource name or path already exists"));
    }

    let now = utc_now();
    sqlx::query(
        "UPDATE resources SET name = ?, path = ?, description = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&path)
    .bind(&description)
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let resource = Resource {
        id,
        name,
        path,
        description,
        created_at: existing.created_at,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &resource);

    Ok(Json(resource))
}

#[utoipa::path(
    delete,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 204, description = "Resource deleted"),
        (status = 404, description = "Resource not found"),
        (status = 409, description = "Resource is referenced by grants")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_resource(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let row = sqlx::query(
        "SELECT id, name, path, description, created_at, updated_at FROM resources WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("resource not found"))?;
    let resource = resource_from_row(&row);

    let referenced: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(1) FROM role_permissions WHERE resource_id = ?) \
               + (SELECT COUNT(1) FROM entity_role_permissions WHERE resource_id = ?)",
    )
    .bind(id.to_string())
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if referenced > 0 {
        return Err(AppError::conflict("resource is referenced by grants"));
    }

    sqlx::query("DELETE FROM resources WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &resource);

    Ok(StatusCode::NO_CONTENT)
}
