use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`

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

fn find_id(list: &serde_json::Value, field: &str, value: &str) -> Option<String> {
    list.as_array()?
        .iter()
        .find(|item| item[field] == value)
        .and_then(|item| item["id"].as_str())
        .map(String::from)
}

/// Bootstrap-seeded club catalog plus a fresh club, a second club, and a
/// regular user, wired together through the admin API.
struct ClubFixture {
    root_token: String,
    chess_id: String,
    go_id: String,
    user_id: String,
    club_admin_role_id: String,
    club_member_role_id: String,
}

async fn club_fixture(app: &Router) -> Result<ClubFixture> {
    let root_token = login(app, "root", "root-password").await?;

    let (_, types) = send(app, "GET", "/api/entity-types", Some(&root_token), None).await?;
    let club_type_id = find_id(&types, "name", "club").context("club type missing")?;

    let mut club_ids = Vec::new();
    for name in ["Chess Club", "Go Club"] {
        let (status, entity) = send(
            app,
            "POST",
            "/api/entities",
            Some(&root_token),
            Some(json!({"entity_type_id": club_type_id, "name": name, "description": null})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        club_ids.push(entity["id"].as_str().context("missing id")?.to_string());
    }

    let (status, user) = send(
        app,
        "POST",
        "/api/users",
        Some(&root_token),
        Some(json!({
            "username": "erin",
            "email": "erin@example.com",
            "password": "password123",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, entity_roles) = send(
        app,
        "GET",
        &format!("/api/entity-roles?entity_type_id={club_type_id}"),
        Some(&root_token),
        None,
    )
    .await?;

    Ok(ClubFixture {
        root_token,
        chess_id: club_ids.remove(0),
        go_id: club_ids.remove(0),
        user_id: user["id"].as_str().context("missing id")?.to_string(),
        club_admin_role_id: find_id(&entity_roles, "name", "admin").context("club admin missing")?,
        club_member_role_id: find_id(&entity_roles, "name", "member")
            .context("club member missing")?,
    })
}

/// Grants the club-admin entity role every CRUD action on the membership
/// resource, so entity-scoped checks have something to find.
async fn grant_membership_admin(app: &Router, fx: &ClubFixture) -> Result<()> {
    let (_, permissions) = send(app, "GET", "/api/permissions", Some(&fx.root_token), None).await?;
    let (_, resources) = send(app, "GET", "/api/resources", Some(&fx.root_token), None).await?;
    let members_resource_id =
        find_id(&resources, "path", "/api/entity-members").context("members resource missing")?;

    for action in ["view", "create", "update", "delete"] {
        let permission_id = find_id(&permissions, "name", action).context("permission missing")?;
        let (status, _) = send(
            app,
            "POST",
            "/api/entity-role-permissions",
            Some(&fx.root_token),
            Some(json!({
                "entity_role_id": fx.club_admin_role_id,
                "permission_id": permission_id,
                "resource_id": members_resource_id,
            })),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }
    Ok(())
}

#[tokio::test]
async fn membership_scopes_access_to_one_entity() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let fx = club_fixture(&app).await?;
    grant_membership_admin(&app, &fx).await?;

    // erin administers the chess club.
    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_admin_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let token = login(&app, "erin", "password123").await?;

    // Scoped to the club erin belongs to: allowed.
    let (status, members) = send(
        &app,
        "GET",
        &format!("/api/entity-members?entity_id={}", fx.chess_id),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().map(Vec::len), Some(1));

    // No entity scope at all: only global grants apply, and erin has none.
    let (status, _) = send(&app, "GET", "/api/entity-members", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Scoped to a club erin is not a member of: denied.
    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/entity-members?entity_id={}", fx.go_id),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn create_reads_entity_scope_from_the_body() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let fx = club_fixture(&app).await?;
    grant_membership_admin(&app, &fx).await?;

    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_admin_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // A second user for erin to enroll.
    let (status, frank) = send(
        &app,
        "POST",
        "/api/users",
        Some(&fx.root_token),
        Some(json!({
            "username": "frank",
            "email": "frank@example.com",
            "password": "password123",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let frank_id = frank["id"].as_str().context("missing id")?;

    let token = login(&app, "erin", "password123").await?;

    // Enrolling into erin's own club: the guard reads entity_id out of the
    // JSON body before the handler runs.
    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": frank_id,
            "entity_role_id": fx.club_member_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // Enrolling into the other club: denied before the handler.
    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&token),
        Some(json!({
            "entity_id": fx.go_id,
            "user_id": frank_id,
            "entity_role_id": fx.club_member_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn second_grant_replaces_the_role() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let fx = club_fixture(&app).await?;

    let (status, first) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_member_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_admin_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // Same row, new role: at most one membership per (entity, user).
    assert_eq!(first["id"], second["id"]);
    let (status, members) = send(
        &app,
        "GET",
        &format!("/api/entity-members?entity_id={}", fx.chess_id),
        Some(&fx.root_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().map(Vec::len), Some(1));
    assert_eq!(members[0]["entity_role_name"], "admin");

    Ok(())
}

#[tokio::test]
async fn role_must_belong_to_the_entity_type() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let fx = club_fixture(&app).await?;

    // A security entity; club roles do not apply to it.
    let (_, types) = send(&app, "GET", "/api/entity-types", Some(&fx.root_token), None).await?;
    let security_type_id = find_id(&types, "name", "security").context("security type missing")?;
    let (status, post) = send(
        &app,
        "POST",
        "/api/entities",
        Some(&fx.root_token),
        Some(json!({"entity_type_id": security_type_id, "name": "North Gate", "description": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = post["id"].as_str().context("missing id")?;

    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": post_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_member_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn update_and_delete_authorize_against_the_owning_entity() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let fx = club_fixture(&app).await?;
    grant_membership_admin(&app, &fx).await?;

    // erin administers chess; gina is a plain member there.
    let (status, _) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": fx.user_id,
            "entity_role_id": fx.club_admin_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, gina) = send(
        &app,
        "POST",
        "/api/users",
        Some(&fx.root_token),
        Some(json!({
            "username": "gina",
            "email": "gina@example.com",
            "password": "password123",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let gina_id = gina["id"].as_str().context("missing id")?;

    let (status, gina_membership) = send(
        &app,
        "POST",
        "/api/entity-members",
        Some(&fx.root_token),
        Some(json!({
            "entity_id": fx.chess_id,
            "user_id": gina_id,
            "entity_role_id": fx.club_member_role_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let membership_id = gina_membership["id"].as_str().context("missing id")?;

    // gina (member, no grants on the membership resource) cannot promote
    // herself.
    let gina_token = login(&app, "gina", "password123").await?;
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/entity-members/{membership_id}"),
        Some(&gina_token),
        Some(json!({"entity_role_id": fx.club_admin_role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // erin can, because the handler authorizes against the chess club.
    let erin_token = login(&app, "erin", "password123").await?;
    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/api/entity-members/{membership_id}"),
        Some(&erin_token),
        Some(json!({"entity_role_id": fx.club_admin_role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["entity_role_id"].as_str(), Some(fx.club_admin_role_id.as_str()));

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/entity-members/{membership_id}"),
        Some(&erin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/entity-members/{membership_id}"),
        Some(&erin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
