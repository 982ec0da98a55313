use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;

// =============================================================================
// ENTITY TYPE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EntityType {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for EntityType {
    fn entity_type() -> &'static str {
        "entity_type"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityTypeCreateRequest {
    #[schema(example = "club")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityTypeUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// ENTITY
// =============================================================================

/// A tenant-like instance of an entity type, e.g. one specific club.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Entity {
    pub id: Uuid,
    pub entity_type_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Entity {
    fn entity_type() -> &'static str {
        "entity"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityCreateRequest {
    pub entity_type_id: Uuid,
    #[schema(example = "Chess Club")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// ENTITY ROLE
// =============================================================================

/// A role scoped to one entity type; unique per (entity_type, name).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EntityRole {
    pub id: Uuid,
    pub entity_type_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for EntityRole {
    fn entity_type() -> &'static str {
        "entity_role"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityRoleCreateRequest {
    pub entity_type_id: Uuid,
    #[schema(example = "owner")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityRoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// ENTITY ROLE GRANT (entity_role x permission x resource)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EntityRoleGrant {
    pub entity_role_id: Uuid,
    pub permission_id: Uuid,
    pub resource_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Auditable for EntityRoleGrant {
    fn entity_type() -> &'static str {
        "entity_role_permission"
    }
    fn entity_id(&self) -> Uuid {
        self.entity_role_id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityRoleGrantRequest {
    pub entity_role_id: Uuid,
    pub permission_id: Uuid,
    pub resource_id: Uuid,
}

// =============================================================================
// ENTITY MEMBERSHIP
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EntityMembership {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub user_id: Uuid,
    pub entity_role_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for EntityMembership {
    fn entity_type() -> &'static str {
        "entity_member"
    }
    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityMemberRequest {
    pub entity_id: Uuid,
    pub user_id: Uuid,
    pub entity_role_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityMemberUpdateRequest {
    pub entity_role_id: Uuid,
}

/// Membership joined with display names for the admin listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntityMembershipView {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_name: String,
    pub user_id: Uuid,
    pub username: String,
    pub entity_role_id: Uuid,
    pub entity_role_name: String,
    pub created_at: DateTime<Utc>,
}
