//! One-shot importer for the legacy flat authorization model.
//!
//! The previous generation of this system attached a bare list of permission
//! strings to each role name. That model is not a runtime code path any
//! more; this module translates the flat lists into grant-table rows once,
//! during migration. Recognized string shapes:
//!
//! - `"admin"`            -> manage on every registered resource
//! - `"<action>"`         -> that action on every registered resource
//! - `"<resource>:<action>"` -> that action on the named resource

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::permissions;
use crate::errors::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct FlatRole {
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub roles_created: usize,
    pub grants_created: usize,
    pub grants_skipped: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum FlatGrant<'a> {
    AllResources { action: &'a str },
    One { resource: &'a str, action: &'a str },
}

fn translate(permission: &str) -> FlatGrant<'_> {
    if permission == "admin" {
        return FlatGrant::AllResources {
            action: permissions::MANAGE,
        };
    }
    match permission.split_once(':') {
        Some((resource, action)) => FlatGrant::One { resource, action },
        None => FlatGrant::AllResources { action: permission },
    }
}

pub async fn import_flat_roles(
    pool: &SqlitePool,
    flat_roles: &[FlatRole],
) -> Result<ImportReport, AppError> {
    let mut report = ImportReport::default();
    let now = Utc::now();

    let permission_ids = name_index(pool, "SELECT id, name FROM permissions").await?;
    let resource_ids = name_index(pool, "SELECT id, name FROM resources").await?;

    for flat in flat_roles {
        let role_id = match lookup_role(pool, &flat.role).await? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(id.to_string())
                .bind(&flat.role)
                .bind("imported from legacy flat role")
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
                report.roles_created += 1;
                id
            }
        };

        for permission in &flat.permissions {
            let targets: Vec<(&str, &Uuid)> = match translate(permission) {
                FlatGrant::AllResources { action } => {
                    resource_ids.values().map(|id| (action, id)).collect()
                }
                FlatGrant::One { resource, action } => match resource_ids.get(resource) {
                    Some(id) => vec![(action, id)],
                    None => {
                        tracing::warn!(role = %flat.role, permission, "skipping grant for unknown resource");
                        report.grants_skipped += 1;
                        continue;
                    }
                },
            };

            for (action, resource_id) in targets {
                let Some(permission_id) = permission_ids.get(action) else {
                    tracing::warn!(role = %flat.role, action, "skipping grant for unknown permission");
                    report.grants_skipped += 1;
                    continue;
                };

                let exists: i64 = sqlx::query_scalar(
                    "SELECT COUNT(1) FROM role_permissions WHERE role_id = ? AND permission_id = ? AND resource_id = ?",
                )
                .bind(role_id.to_string())
                .bind(permission_id.to_string())
                .bind(resource_id.to_string())
                .fetch_one(pool)
                .await?;

                if exists > 0 {
                    report.grants_skipped += 1;
                    continue;
                }

                sqlx::query(
                    "INSERT INTO role_permissions (role_id, permission_id, resource_id, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(role_id.to_string())
                .bind(permission_id.to_string())
                .bind(resource_id.to_string())
                .bind(now)
                .execute(pool)
                .await?;
                report.grants_created += 1;
            }
        }
    }

    Ok(report)
}

async fn lookup_role(pool: &SqlitePool, name: &str) -> Result<Option<Uuid>, AppError> {
    let row = sqlx::query("SELECT id FROM roles WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Uuid::parse_str(r.get::<&str, _>("id")).unwrap_or_default()))
}

async fn name_index(pool: &SqlitePool, sql: &str) -> Result<HashMap<String, Uuid>, AppError> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|r| {
            (
                r.get::<String, _>("name"),
                Uuid::parse_str(r.get::<&str, _>("id")).unwrap_or_default(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_becomes_manage_everywhere() {
        assert_eq!(
            translate("admin"),
            FlatGrant::AllResources { action: "manage" }
        );
    }

    #[test]
    fn bare_action_applies_to_all_resources() {
        assert_eq!(
            translate("view"),
            FlatGrant::AllResources { action: "view" }
        );
    }

    #[test]
    fn scoped_permission_splits_on_colon() {
        assert_eq!(
            translate("venues:update"),
            FlatGrant::One {
                resource: "venues",
                action: "update"
            }
        );
    }
}
