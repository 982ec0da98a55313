use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::users::list_users,
        routes::users::create_user,
        routes::users::get_user,
        routes::users::update_user,
        routes::users::delete_user,
        routes::roles::list_roles,
        routes::roles::create_role,
        routes::roles::get_role,
        routes::roles::update_role,
        routes::roles::delete_role,
        routes::roles::list_role_grants,
        routes::roles::create_role_grant,
        routes::roles::delete_role_grant,
        routes::permissions::list_permissions,
        routes::permissions::create_permission,
        routes::permissions::get_permission,
        routes::permissions::update_permission,
        routes::permissions::delete_permission,
        routes::resources::list_resources,
        routes::resources::create_resource,
        routes::resources::get_resource,
        routes::resources::update_resource,
        routes::resources::delete_resource,
        routes::entities::list_entity_types,
        routes::entities::create_entity_type,
        routes::entities::update_entity_type,
        routes::entities::delete_entity_type,
        routes::entities::list_entities,
        routes::entities::create_entity,
        routes::entities::get_entity,
        routes::entities::update_entity,
        routes::entities::delete_entity,
        routes::entity_roles::list_entity_roles,
        routes::entity_roles::create_entity_role,
        routes::entity_roles::update_entity_role,
        routes::entity_roles::delete_entity_role,
        routes::entity_roles::list_entity_role_grants,
        routes::entity_roles::create_entity_role_grant,
        routes::entity_roles::delete_entity_role_grant,
        routes::entity_members::list_members,
        routes::entity_members::upsert_member,
        routes::entity_members::update_member,
        routes::entity_members::delete_member,
        routes::audit_logs::list_audit_logs,
    ),
    components(
        schemas(
            models::user::User,
            models::user::UserWithMemberships,
            models::user::UserMembership,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::user::LoginRequest,
            models::user::AuthResponse,
            models::rbac::Role,
            models::rbac::RoleCreateRequest,
            models::rbac::RoleUpdateRequest,
            models::rbac::RoleGrant,
            models::rbac::RoleGrantRequest,
            models::rbac::RoleGrantView,
            models::rbac::Permission,
            models::rbac::PermissionCreateRequest,
            models::rbac::PermissionUpdateRequest,
            models::rbac::Resource,
            models::rbac::ResourceCreateRequest,
            models::rbac::ResourceUpdateRequest,
            models::entity::EntityType,
            models::entity::EntityTypeCreateRequest,
            models::entity::EntityTypeUpdateRequest,
            models::entity::Entity,
            models::entity::EntityCreateRequest,
            models::entity::EntityUpdateRequest,
            models::entity::EntityRole,
            models::entity::EntityRoleCreateRequest,
            models::entity::EntityRoleUpdateRequest,
            models::entity::EntityRoleGrant,
            models::entity::EntityRoleGrantRequest,
            models::entity::EntityMembership,
            models::entity::EntityMemberRequest,
            models::entity::EntityMemberUpdateRequest,
            models::entity::EntityMembershipView,
            models::audit::AuditLogEntry,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Users", description = "User administration"),
        (name = "Roles", description = "Global roles and their grants"),
        (name = "Permissions", description = "Permission catalog"),
        (name = "Resources", description = "Resource catalog"),
        (name = "Entities", description = "Entity types and entities"),
        (name = "Entity roles", description = "Entity-scoped roles and their grants"),
        (name = "Entity members", description = "Entity memberships"),
        (name = "Audit", description = "Audit trail"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn swagger_routes() -> Router {
    Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
