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
use crate::models::entity::{
    Entity, EntityCreateRequest, EntityType, EntityTypeCreateRequest, EntityTypeUpdateRequest,
    EntityUpdateRequest,
};
use crate::utils::utc_now;

fn entity_type_from_row(row: &SqliteRow) -> EntityType {
    EntityType {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn entity_from_row(row: &SqliteRow) -> Entity {
    Entity {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        entity_type_id: Uuid::parse_str(row.get::<&str, _>("entity_type_id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// =============================================================================
// ENTITY TYPES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/entity-types",
    tag = "Entities",
    responses((status = 200, description = "List of entity types", body = [EntityType])),
    security(("bearerAuth" = []))
)]
pub async fn list_entity_types(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<EntityType>>> {
    let rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM entity_types ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows.iter().map(entity_type_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/entity-types",
    tag = "Entities",
    request_body = EntityTypeCreateRequest,
    responses(
        (status = 201, description = "Entity type created", body = EntityType),
        (status = 409, description = "Entity type name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_entity_type(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityTypeCreateRequest>,
) -> AppResult<(StatusCode, Json<EntityType>)> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_types WHERE name = ?")
        .bind(&payload.name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("entity type name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO entity_types (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let entity_type = EntityType {
        id,
        name: payload.name,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &entity_type);

    Ok((StatusCode::CREATED, Json(entity_type)))
}

#[utoipa::path(
    put,
    path = "/api/entity-types/{id}",
    tag = "Entities",
    params(("id" = Uuid, Path, description = "Entity type ID")),
    request_body = EntityTypeUpdateRequest,
    responses(
        (status = 200, description = "Entity type updated", body = EntityType),
        (status = 404, description = "Entity type not found"),
        (status = 409, description = "Entity type name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_entity_type(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<EntityTypeUpdateRequest>,
) -> AppResult<Json<EntityType>> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM entity_types WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity type not found"))?;
    let existing = entity_type_from_row(&row);

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let description = payload.description.or(existing.description);

    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM entity_types WHERE name = ? AND id != ?")
            .bind(&name)
            .bind(id.to_string())
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict("entity type name already exists"));
    }

    let now = utc_now();
    sqlx::query("UPDATE entity_types SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let entity_type = EntityType {
        id,
        name,
        description,
        created_at: existing.created_at,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &entity_type);

    Ok(Json(entity_type))
}

#[utoipa::path(
    delete,
    path = "/api/entity-types/{id}",
    tag = "Entities",
    params(("id" = Uuid, Path, description = "Entity type ID")),
    responses(
        (status = 204, description = "Entity type deleted"),
        (status = 404, description = "Entity type not found"),
        (status = 409, description = "Entity type still has entities")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_entity_type(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM entity_types WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity type not found"))?;
    let entity_type = entity_type_from_row(&row);

    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entities WHERE entity_type_id = ?")
        .bind(id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::conflict("entity type still has entities"));
    }

    sqlx::query("DELETE FROM entity_types WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &entity_type);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ENTITIES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/entities",
    tag = "Entities",
    responses((status = 200, description = "List of entities", body = [Entity])),
    security(("bearerAuth" = []))
)]
pub async fn list_entities(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<Entity>>> {
    let rows = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at FROM entities ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows.iter().map(entity_from_row).collect()))
}

#[utoipa::path(
    post,
    path = "/api/entities",
    tag = "Entities",
    request_body = EntityCreateRequest,
    responses(
        (status = 201, description = "Entity created", body = Entity),
        (status = 404, description = "Entity type not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_entity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<EntityCreateRequest>,
) -> AppResult<(StatusCode, Json<Entity>)> {
    let type_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entity_types WHERE id = ?")
        .bind(payload.entity_type_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if type_exists == 0 {
        return Err(AppError::not_found("entity type not found"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO entities (id, entity_type_id, name, description, created_at, updated_at) \
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

    let entity = Entity {
        id,
        entity_type_id: payload.entity_type_id,
        name: payload.name,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &entity);

    Ok((StatusCode::CREATED, Json(entity)))
}

#[utoipa::path(
    get,
    path = "/api/entities/{id}",
    tag = "Entities",
    params(("id" = Uuid, Path, description = "Entity ID")),
    responses(
        (status = 200, description = "Entity details", body = Entity),
        (status = 404, description = "Entity not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_entity(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Entity>> {
    let row = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at FROM entities WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity not found"))?;
    Ok(Json(entity_from_row(&row)))
}

#[utoipa::path(
    put,
    path = "/api/entities/{id}",
    tag = "Entities",
    params(("id" = Uuid, Path, description = "Entity ID")),
    request_body = EntityUpdateRequest,
    responses(
        (status = 200, description = "Entity updated", body = Entity),
        (status = 404, description = "Entity not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_entity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<EntityUpdateRequest>,
) -> AppResult<Json<Entity>> {
    let row = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at FROM entities WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity not found"))?;
    let existing = entity_from_row(&row);

    let name = payload.name.unwrap_or_else(|| existing.name.clone());
    let description = payload.description.or(existing.description);

    let now = utc_now();
    sqlx::query("UPDATE entities SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let entity = Entity {
        id,
        entity_type_id: existing.entity_type_id,
        name,
        description,
        created_at: existing.created_at,
        updated_at: now,
    };
    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &entity);

    Ok(Json(entity))
}

#[utoipa::path(
    delete,
    path = "/api/entities/{id}",
    tag = "Entities",
    params(("id" = Uuid, Path, description = "Entity ID")),
    responses(
        (status = 204, description = "Entity deleted"),
        (status = 404, description = "Entity not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_entity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let row = sqlx::query(
        "SELECT id, entity_type_id, name, description, created_at, updated_at FROM entities WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("entity not found"))?;
    let entity = entity_from_row(&row);

    // Memberships cascade with the entity.
    sqlx::query("DELETE FROM entities WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &entity);

    Ok(StatusCode::NO_CONTENT)
}
