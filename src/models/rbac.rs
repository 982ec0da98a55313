use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Role {
    fn entity_type() -> &'static str {
        "role"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleCreateRequest {
    #[schema(example = "editor")]
    pub name: String,
    #[schema(example = "Can edit proposals and bookings")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Permission {
    fn entity_type() -> &'static str {
        "permission"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PermissionCreateRequest {
    #[schema(example = "view")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PermissionUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// RESOURCE
// =============================================================================

/// An addressable surface area of the API, identified by a stable path that
/// the access middleware looks grants up against.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Resource {
    fn entity_type() -> &'static str {
        "resource"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceCreateRequest {
    #[schema(example = "venues")]
    pub name: String,
    #[schema(example = "/api/venues")]
    pub path: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceUpdateRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// ROLE GRANT (role x permission x resource)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleGrant {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub resource_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Auditable for RoleGrant {
    fn entity_type() -> &'static str {
        "role_permission"
    }
    fn entity_id(&self) -> Uuid {
        self.role_id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleGrantRequest {
    pub permission_id: Uuid,
    pub resource_id: Uuid,
}

/// A grant joined with its permission and resource names, for listings.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleGrantView {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub permission_name: String,
    pub resource_id: Uuid,
    pub resource_name: String,
    pub resource_path: String,
    pub created_at: DateTime<Utc>,
}
