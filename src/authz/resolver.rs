use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::permissions;
use super::principal::Principal;
use crate::errors::AppError;

/// Outcome of an authorization check. Storage failures are NOT a decision:
/// they surface as `AppError::Database` so callers cannot conflate "couldn't
/// determine" with "determined no".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Seam for the decision engine, so handlers and middleware depend on the
/// contract rather than the SQL.
#[async_trait]
pub trait Authorize: Send + Sync {
    async fn authorize(
        &self,
        principal: &Principal,
        action: &str,
        resource_path: &str,
        entity_id: Option<Uuid>,
    ) -> Result<Decision, AppError>;
}

/// Grant-table resolver.
///
/// Evaluation order:
/// 1. resolve the resource path; unknown paths grant nothing
/// 2. omnipotent role -> allow, no grant lookups
/// 3. global role grants (with "manage" subsumption) -> allow
/// 4. with an entity context: membership lookup, then entity-role grants
/// 5. deny
///
/// Reads point-in-time state and holds no lock across lookups; a racing
/// grant revocation may let one in-flight action through.
#[derive(Debug, Clone)]
pub struct GrantResolver {
    pool: SqlitePool,
}

impl GrantResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn resource_id_for_path(&self, path: &str) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query("SELECT id FROM resources WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Uuid::parse_str(r.get::<&str, _>("id")).unwrap_or_default()))
    }

    async fn role_grant_names(&self, role_id: Uuid, resource_id: Uuid) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT p.name FROM role_permissions rp \
             INNER JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = ? AND rp.resource_id = ?",
        )
        .bind(role_id.to_string())
        .bind(resource_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    async fn membership_role(&self, entity_id: Uuid, user_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query(
            "SELECT entity_role_id FROM entity_members WHERE entity_id = ? AND user_id = ?",
        )
        .bind(entity_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Uuid::parse_str(r.get::<&str, _>("entity_role_id")).unwrap_or_default()))
    }

    async fn entity_role_grant_names(
        &self,
        entity_role_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT p.name FROM entity_role_permissions erp \
             INNER JOIN permissions p ON p.id = erp.permission_id \
             WHERE erp.entity_role_id = ? AND erp.resource_id = ?",
        )
        .bind(entity_role_id.to_string())
        .bind(resource_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("name")).collect())
    }
}

/// Whether a granted permission name satisfies the requested action.
/// "manage" subsumes every CRUD action on the same resource.
fn grant_allows(granted: &str, action: &str) -> bool {
    granted == action || granted == permissions::MANAGE
}

#[async_trait]
impl Authorize for GrantResolver {
    async fn authorize(
        &self,
        principal: &Principal,
        action: &str,
        resource_path: &str,
        entity_id: Option<Uuid>,
    ) -> Result<Decision, AppError> {
        // 1. Unregistered resource paths grant nothing.
        let resource_id = match self.resource_id_for_path(resource_path).await? {
            Some(id) => id,
            None => {
                tracing::debug!(resource_path, "deny: unregistered resource path");
                return Ok(Decision::Denied);
            }
        };

        // 2. Omnipotent short-circuit, no grant lookups.
        if principal.is_omnipotent() {
            tracing::debug!(user_id = %principal.user_id, action, resource_path, "allow: omnipotent role");
            return Ok(Decision::Allowed);
        }

        // 3. Global role grants.
        let granted = self.role_grant_names(principal.role_id, resource_id).await?;
        if granted.iter().any(|name| grant_allows(name, action)) {
            tracing::debug!(user_id = %principal.user_id, action, resource_path, "allow: role grant");
            return Ok(Decision::Allowed);
        }

        // 4./5. Entity-scoped grants, only within an entity the principal
        // is a member of.
        if let Some(entity_id) = entity_id {
            let entity_role_id = match self.membership_role(entity_id, principal.user_id).await? {
                Some(id) => id,
                None => {
                    tracing::debug!(user_id = %principal.user_id, %entity_id, "deny: no membership");
                    return Ok(Decision::Denied);
                }
            };

            let granted = self.entity_role_grant_names(entity_role_id, resource_id).await?;
            if granted.iter().any(|name| grant_allows(name, action)) {
                tracing::debug!(
                    user_id = %principal.user_id,
                    %entity_id,
                    action,
                    resource_path,
                    "allow: entity-role grant"
                );
                return Ok(Decision::Allowed);
            }
        }

        tracing::debug!(user_id = %principal.user_id, action, resource_path, "deny: no matching grant");
        Ok(Decision::Denied)
    }
}
