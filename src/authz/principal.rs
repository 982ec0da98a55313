use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::AppError;

/// The authenticated principal with its live authorization anchor.
///
/// Always loaded fresh from storage per request; token claims are trusted
/// for identity only, so a role downgrade takes effect on the next request
/// even for tokens issued before it.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub role_id: Uuid,
    pub role_name: String,
}

impl Principal {
    pub fn is_omnipotent(&self) -> bool {
        self.role_name == super::roles::GODMODE
    }

    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Principal>, AppError> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.role_id, r.name AS role_name \
             FROM users u INNER JOIN roles r ON r.id = u.role_id \
             WHERE u.id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| Principal {
            user_id: Uuid::parse_str(r.get::<&str, _>("id")).unwrap_or_default(),
            username: r.get("username"),
            role_id: Uuid::parse_str(r.get::<&str, _>("role_id")).unwrap_or_default(),
            role_name: r.get("role_name"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role_name: &str) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "ada".to_string(),
            role_id: Uuid::new_v4(),
            role_name: role_name.to_string(),
        }
    }

    #[test]
    fn omnipotence_is_by_role_name() {
        assert!(principal("godmode").is_omnipotent());
        assert!(!principal("admin").is_omnipotent());
        assert!(!principal("Godmode").is_omnipotent());
    }
}
