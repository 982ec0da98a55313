use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;

/// Public view of a principal. The password hash never leaves the database
/// layer through this type.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role_id: Uuid,
    pub role_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for User {
    fn entity_type() -> &'static str {
        "user"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

/// User plus their entity memberships, as returned by the admin listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserWithMemberships {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role_id: Uuid,
    pub role_name: String,
    pub memberships: Vec<UserMembership>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserMembership {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub entity_role_id: Uuid,
    pub entity_role_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UserCreateRequest {
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    /// Global role; defaults to the "user" role when omitted.
    pub role_id: Option<Uuid>,
    /// Optional initial membership, created in the same transaction.
    pub entity_id: Option<Uuid>,
    pub entity_role_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UserUpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}
