use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{self, actions};
use crate::authz::{roles, Principal};
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::user::{
    User, UserCreateRequest, UserMembership, UserUpdateRequest, UserWithMemberships,
};
use crate::utils::{hash_password, utc_now};

pub(crate) fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        username: row.get("username"),
        email: row.get("email"),
        role_id: Uuid::parse_str(row.get::<&str, _>("role_id")).unwrap_or_default(),
        role_name: row.get("role_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub(crate) async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<User>> {
    let row = sqlx::query(
        "SELECT u.id, u.username, u.email, u.role_id, r.name AS role_name, u.created_at, u.updated_at \
         FROM users u INNER JOIN roles r ON r.id = u.role_id \
         WHERE u.id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| user_from_row(&r)))
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    responses((status = 200, description = "List of users with memberships", body = [UserWithMemberships])),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> AppResult<Json<Vec<UserWithMemberships>>> {
    let user_rows = sqlx::query(
        "SELECT u.id, u.username, u.email, u.role_id, r.name AS role_name, u.created_at, u.updated_at \
         FROM users u INNER JOIN roles r ON r.id = u.role_id \
         ORDER BY u.username",
    )
    .fetch_all(&state.pool)
    .await?;

    let membership_rows = sqlx::query(
        "SELECT em.user_id, em.entity_id, e.name AS entity_name, em.entity_role_id, er.name AS entity_role_name \
         FROM entity_members em \
         INNER JOIN entities e ON e.id = em.entity_id \
         INNER JOIN entity_roles er ON er.id = em.entity_role_id",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut memberships: HashMap<Uuid, Vec<UserMembership>> = HashMap::new();
    for row in &membership_rows {
        let user_id = Uuid::parse_str(row.get::<&str, _>("user_id")).unwrap_or_default();
        memberships.entry(user_id).or_default().push(UserMembership {
            entity_id: Uuid::parse_str(row.get::<&str, _>("entity_id")).unwrap_or_default(),
            entity_name: row.get("entity_name"),
            entity_role_id: Uuid::parse_str(row.get::<&str, _>("entity_role_id")).unwrap_or_default(),
            entity_role_name: row.get("entity_role_name"),
        });
    }

    let users = user_rows
        .iter()
        .map(|row| {
            let user = user_from_row(row);
            UserWithMemberships {
                memberships: memberships.remove(&user.id).unwrap_or_default(),
                id: user.id,
                username: user.username,
                email: user.email,
                role_id: user.role_id,
                role_name: user.role_name,
                created_at: user.created_at,
                updated_at: user.updated_at,
            }
        })
        .collect();

    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/api/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username or email already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE username = ? OR email = ?")
            .bind(&payload.username)
            .bind(&payload.email)
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict("username or email already exists"));
    }

    let role_id = match payload.role_id {
        Some(role_id) => {
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE id = ?")
                .bind(role_id.to_string())
                .fetch_one(&state.pool)
                .await?;
            if exists == 0 {
                return Err(AppError::not_found("role not found"));
            }
            role_id
        }
        None => {
            let row = sqlx::query("SELECT id FROM roles WHERE name = ?")
                .bind(roles::USER)
                .fetch_optional(&state.pool)
                .await?
                .ok_or_else(|| AppError::internal("default role missing, run bootstrap"))?;
            Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default()
        }
    };

    // Optional initial membership: both halves or neither.
    let membership = match (payload.entity_id, payload.entity_role_id) {
        (Some(entity_id), Some(entity_role_id)) => {
            Some(validate_membership_target(&state.pool, entity_id, entity_role_id).await?)
        }
        (None, None) => None,
        _ => {
            return Err(AppError::bad_request(
                "entity_id and entity_role_id must be provided together",
            ));
        }
    };

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    // User and membership land atomically or not at all.
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(role_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some((entity_id, entity_role_id)) = membership {
        sqlx::query(
            "INSERT INTO entity_members (id, entity_id, user_id, entity_role_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entity_id.to_string())
        .bind(user_id.to_string())
        .bind(entity_role_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let user = fetch_user(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::internal("user vanished after insert"))?;

    audit::record(&state.audit, Some(principal.user_id), actions::CREATE, &user);

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let user = fetch_user(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    let existing = fetch_user(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let username = payload.username.unwrap_or(existing.username);
    let email = payload.email.unwrap_or(existing.email);

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM users WHERE (username = ? OR email = ?) AND id != ?",
    )
    .bind(&username)
    .bind(&email)
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if taken > 0 {
        return Err(AppError::conflict("username or email already exists"));
    }

    let role_id = match payload.role_id {
        Some(role_id) => {
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE id = ?")
                .bind(role_id.to_string())
                .fetch_one(&state.pool)
                .await?;
            if exists == 0 {
                return Err(AppError::not_found("role not found"));
            }
            role_id
        }
        None => existing.role_id,
    };

    let now = utc_now();

    if let Some(password) = payload.password.as_deref() {
        let password_hash = hash_password(password)?;
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now)
            .bind(id.to_string())
            .execute(&state.pool)
            .await?;
    }

    sqlx::query("UPDATE users SET username = ?, email = ?, role_id = ?, updated_at = ? WHERE id = ?")
        .bind(&username)
        .bind(&email)
        .bind(role_id.to_string())
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let user = fetch_user(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    audit::record(&state.audit, Some(principal.user_id), actions::UPDATE, &user);

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let user = fetch_user(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    // Memberships go with the user, in one transaction.
    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM entity_members WHERE user_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit::record(&state.audit, Some(principal.user_id), actions::DELETE, &user);

    Ok(StatusCode::NO_CONTENT)
}

/// Validates that the entity exists, the entity role exists, and the role
/// belongs to the entity's type.
async fn validate_membership_target(
    pool: &SqlitePool,
    entity_id: Uuid,
    entity_role_id: Uuid,
) -> AppResult<(Uuid, Uuid)> {
    let entity = sqlx::query("SELECT entity_type_id FROM entities WHERE id = ?")
        .bind(entity_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity not found"))?;

    let role = sqlx::query("SELECT entity_type_id FROM entity_roles WHERE id = ?")
        .bind(entity_role_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("entity role not found"))?;

    let entity_type: &str = entity.get("entity_type_id");
    let role_type: &str = role.get("entity_type_id");
    if entity_type != role_type {
        return Err(AppError::bad_request(
            "entity role does not belong to the entity's type",
        ));
    }

    Ok((entity_id, entity_role_id))
}
