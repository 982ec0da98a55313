use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::{middleware, Extension, Router};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{self, AuditBus};
use crate::authz::{enforce, GrantResolver, RouteGuard};
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{
    audit_logs, auth, entities, entity_members, entity_roles, health, permissions, resources,
    roles, users,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub authz: Arc<GrantResolver>,
    pub audit: AuditBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, audit: AuditBus) -> Self {
        Self {
            authz: Arc::new(GrantResolver::new(pool.clone())),
            pool,
            jwt: Arc::new(jwt),
            audit,
        }
    }
}

/// Wraps a router in the access middleware, pinned to one resource path.
/// The [`RouteGuard`] extension must sit outside the enforce layer so the
/// middleware can read it.
fn guarded(router: Router<AppState>, state: &AppState, guard: RouteGuard) -> Router<AppState> {
    router
        .layer(middleware::from_fn_with_state(state.clone(), enforce))
        .layer(Extension(guard))
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (audit_bus, audit_rx) = audit::init_bus();
    tokio::spawn(audit::run_listener(audit_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, audit_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let user_routes = guarded(
        Router::new()
            .route("/", get(users::list_users).post(users::create_user))
            .route(
                "/:id",
                get(users::get_user).put(users::update_user).delete(users::delete_user),
            ),
        &state,
        RouteGuard::resource("/api/users"),
    );

    let role_routes = guarded(
        Router::new()
            .route("/", get(roles::list_roles).post(roles::create_role))
            .route(
                "/:id",
                get(roles::get_role).put(roles::update_role).delete(roles::delete_role),
            )
            .route(
                "/:id/permissions",
                get(roles::list_role_grants)
                    .post(roles::create_role_grant)
                    .delete(roles::delete_role_grant),
            ),
        &state,
        RouteGuard::resource("/api/roles"),
    );

    let permission_routes = guarded(
        Router::new()
            .route("/", get(permissions::list_permissions).post(permissions::create_permission))
            .route(
                "/:id",
                get(permissions::get_permission)
                    .put(permissions::update_permission)
                    .delete(permissions::delete_permission),
            ),
        &state,
        RouteGuard::resource("/api/permissions"),
    );

    let resource_routes = guarded(
        Router::new()
            .route("/", get(resources::list_resources).post(resources::create_resource))
            .route(
                "/:id",
                get(resources::get_resource)
                    .put(resources::update_resource)
                    .delete(resources::delete_resource),
            ),
        &state,
        RouteGuard::resource("/api/resources"),
    );

    let entity_type_routes = guarded(
        Router::new()
            .route("/", get(entities::list_entity_types).post(entities::create_entity_type))
            .route(
                "/:id",
                put(entities::update_entity_type).delete(entities::delete_entity_type),
            ),
        &state,
        RouteGuard::resource("/api/entity-types"),
    );

    let entity_routes = guarded(
        Router::new()
            .route("/", get(entities::list_entities).post(entities::create_entity))
            .route(
                "/:id",
                get(entities::get_entity)
                    .put(entities::update_entity)
                    .delete(entities::delete_entity),
            ),
        &state,
        RouteGuard::resource("/api/entities"),
    );

    let entity_role_routes = guarded(
        Router::new()
            .route("/", get(entity_roles::list_entity_roles).post(entity_roles::create_entity_role))
            .route(
                "/:id",
                put(entity_roles::update_entity_role).delete(entity_roles::delete_entity_role),
            )
            .route("/:id/permissions", get(entity_roles::list_entity_role_grants)),
        &state,
        RouteGuard::resource("/api/entity-roles"),
    );

    // Grant administration on entity roles shares the entity-roles resource.
    let entity_role_grant_routes = guarded(
        Router::new().route(
            "/",
            post(entity_roles::create_entity_role_grant)
                .delete(entity_roles::delete_entity_role_grant),
        ),
        &state,
        RouteGuard::resource("/api/entity-roles"),
    );

    // The collection routes carry an entity scope (query on GET, JSON body on
    // POST); the `/:id` routes authorize inside the handler against the entity
    // the membership row belongs to.
    let member_routes = guarded(
        Router::new().route(
            "/",
            get(entity_members::list_members).post(entity_members::upsert_member),
        ),
        &state,
        RouteGuard::resource("/api/entity-members").with_entity_param("entity_id"),
    )
    .route(
        "/:id",
        put(entity_members::update_member).delete(entity_members::delete_member),
    );

    let audit_log_routes = guarded(
        Router::new().route("/", get(audit_logs::list_audit_logs)),
        &state,
        RouteGuard::resource("/api/audit-logs"),
    );

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/roles", role_routes)
        .nest("/permissions", permission_routes)
        .nest("/resources", resource_routes)
        .nest("/entity-types", entity_type_routes)
        .nest("/entities", entity_routes)
        .nest("/entity-roles", entity_role_routes)
        .nest("/entity-role-permissions", entity_role_grant_routes)
        .nest("/entity-members", member_routes)
        .nest("/audit-logs", audit_log_routes);

    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
