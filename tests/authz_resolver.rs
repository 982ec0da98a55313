use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use clubdesk::authz::{Authorize, Decision, GrantResolver, Principal};
use clubdesk::bootstrap::{self, BootstrapOptions};
use clubdesk::create_app;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    bootstrap::run(
        &pool,
        &BootstrapOptions {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "root-password".to_string(),
        },
    )
    .await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Result<(StatusCode, serde_json::Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    Ok((status, body))
}

async fn login(app: &Router, username: &str, password: &str) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": username, "password": password})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    Ok(body["token"].as_str().context("missing token")?.to_string())
}

/// Finds an id in a listing response by matching one field.
fn find_id(list: &serde_json::Value, field: &str, value: &str) -> Option<String> {
    list.as_array()?
        .iter()
        .find(|item| item[field] == value)
        .and_then(|item| item["id"].as_str())
        .map(String::from)
}

async fn create_user_with_role(
    app: &Router,
    root_token: &str,
    username: &str,
    role_name: &str,
) -> Result<String> {
    let (_, roles) = send(app, "GET", "/api/roles", Some(root_token), None).await?;
    let role_id = find_id(&roles, "name", role_name).context("role missing")?;

    let (status, user) = send(
        app,
        "POST",
        "/api/users",
        Some(root_token),
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123",
            "role_id": role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "user creation failed: {user}");
    Ok(user["id"].as_str().context("missing user id")?.to_string())
}

#[tokio::test]
async fn godmode_bypasses_grant_checks() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let token = login(&app, "root", "root-password").await?;

    // No explicit grant covers POST /api/entity-types for anyone but godmode.
    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-types",
        Some(&token),
        Some(json!({"name": "committee", "description": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn admin_view_grant_does_not_widen_to_writes() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let root_token = login(&app, "root", "root-password").await?;

    create_user_with_role(&app, &root_token, "alice", "admin").await?;
    let token = login(&app, "alice", "password123").await?;

    // The admin role holds "view" on users, nothing more.
    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/users",
        Some(&token),
        Some(json!({
            "username": "mallory",
            "email": "mallory@example.com",
            "password": "password123",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn default_role_has_no_admin_surface_access() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let root_token = login(&app, "root", "root-password").await?;

    create_user_with_role(&app, &root_token, "bob", "user").await?;
    let token = login(&app, "bob", "password123").await?;

    for uri in ["/api/users", "/api/roles", "/api/resources", "/api/audit-logs"] {
        let (status, _) = send(&app, "GET", uri, Some(&token), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN, "expected deny on {uri}");
    }

    Ok(())
}

#[tokio::test]
async fn manage_grant_subsumes_all_crud_actions() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let root_token = login(&app, "root", "root-password").await?;

    // A new role holding only manage on the users resource.
    let (status, role) = send(
        &app,
        "POST",
        "/api/roles",
        Some(&root_token),
        Some(json!({"name": "user-steward", "description": "manages user accounts"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().context("missing role id")?.to_string();

    let (_, permissions) = send(&app, "GET", "/api/permissions", Some(&root_token), None).await?;
    let manage_id = find_id(&permissions, "name", "manage").context("manage permission missing")?;
    let (_, resources) = send(&app, "GET", "/api/resources", Some(&root_token), None).await?;
    let users_resource_id = find_id(&resources, "path", "/api/users").context("users resource missing")?;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/roles/{role_id}/permissions"),
        Some(&root_token),
        Some(json!({"permission_id": manage_id, "resource_id": users_resource_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    create_user_with_role(&app, &root_token, "carol", "user-steward").await?;
    let token = login(&app, "carol", "password123").await?;

    // view
    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // create
    let (status, created) = send(
        &app,
        "POST",
        "/api/users",
        Some(&token),
        Some(json!({
            "username": "dave",
            "email": "dave@example.com",
            "password": "password123",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let dave_id = created["id"].as_str().context("missing id")?.to_string();

    // update
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/users/{dave_id}"),
        Some(&token),
        Some(json!({"email": "dave2@example.com"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // delete
    let (status, _) =
        send(&app, "DELETE", &format!("/api/users/{dave_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // manage on users does not leak onto other resources
    let (status, _) = send(&app, "GET", "/api/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn role_change_applies_to_existing_tokens() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let root_token = login(&app, "root", "root-password").await?;

    let alice_id = create_user_with_role(&app, &root_token, "alice", "admin").await?;
    let token = login(&app, "alice", "password123").await?;

    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // Demote while the token is still live.
    let (_, roles) = send(&app, "GET", "/api/roles", Some(&root_token), None).await?;
    let user_role_id = find_id(&roles, "name", "user").context("user role missing")?;
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/users/{alice_id}"),
        Some(&root_token),
        Some(json!({"role_id": user_role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Same token, next request: the demotion is already in force.
    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn unregistered_paths_deny_every_principal() -> Result<()> {
    let (_app, pool, _dir) = setup().await?;
    let resolver = GrantResolver::new(pool.clone());

    let row = sqlx::query("SELECT id, name FROM roles WHERE name = 'user'")
        .fetch_one(&pool)
        .await?;
    let ordinary = Principal {
        user_id: Uuid::new_v4(),
        username: "mallory".to_string(),
        role_id: Uuid::parse_str(row.get::<&str, _>("id"))?,
        role_name: row.get("name"),
    };

    // A path with no resource row grants nothing, whatever the action.
    for action in ["view", "create", "update", "delete", "manage"] {
        let decision = resolver
            .authorize(&ordinary, action, "/api/does-not-exist", None)
            .await?;
        assert_eq!(decision, Decision::Denied, "action {action} leaked through");
    }

    // Resource resolution comes before the omnipotence short-circuit, so
    // even godmode gets nothing on a path the catalog does not know.
    let row = sqlx::query("SELECT id, name FROM roles WHERE name = 'godmode'")
        .fetch_one(&pool)
        .await?;
    let omnipotent = Principal {
        user_id: Uuid::new_v4(),
        username: "root".to_string(),
        role_id: Uuid::parse_str(row.get::<&str, _>("id"))?,
        role_name: row.get("name"),
    };
    let decision = resolver
        .authorize(&omnipotent, "view", "/api/does-not-exist", None)
        .await?;
    assert_eq!(decision, Decision::Denied);

    // A registered path still allows godmode, so the deny above is the
    // path lookup and not some broader refusal.
    let decision = resolver.authorize(&omnipotent, "view", "/api/users", None).await?;
    assert_eq!(decision, Decision::Allowed);

    Ok(())
}
