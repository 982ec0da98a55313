use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
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

async fn login_root(app: &Router) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "root", "password": "root-password"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(body["token"].as_str().context("missing token")?.to_string())
}

/// The recorder is asynchronous; poll until at least `expected` rows match.
async fn wait_for_entries(pool: &SqlitePool, action: &str, expected: usize) -> Result<Vec<String>> {
    for _ in 0..25 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        let rows = sqlx::query("SELECT entity_type FROM audit_logs WHERE action = ?")
            .bind(action)
            .fetch_all(pool)
            .await?;
        if rows.len() >= expected {
            return Ok(rows.iter().map(|r| r.get("entity_type")).collect());
        }
    }
    anyhow::bail!("timed out waiting for {expected} audit entries with action {action}")
}

#[tokio::test]
async fn login_attempts_are_recorded() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (_, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "root", "password": "wrong-password"})),
    )
    .await?;
    let _ = login_root(&app).await?;

    let failed = wait_for_entries(&pool, "LOGIN_FAILED", 1).await?;
    assert_eq!(failed[0], "auth");
    let succeeded = wait_for_entries(&pool, "LOGIN", 1).await?;
    assert_eq!(succeeded[0], "auth");

    // Unknown usernames leave no trace; there is no user id to attribute.
    let (_, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "ghost", "password": "wrong-password"})),
    )
    .await?;
    tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
    let failed: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM audit_logs WHERE action = 'LOGIN_FAILED'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(failed, 1);

    Ok(())
}

#[tokio::test]
async fn mutations_append_chained_entries() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = login_root(&app).await?;

    let (status, role) = send(
        &app,
        "POST",
        "/api/roles",
        Some(&token),
        Some(json!({"name": "scribe", "description": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().context("missing id")?.to_string();

    let (status, _) =
        send(&app, "DELETE", &format!("/api/roles/{role_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    wait_for_entries(&pool, "CREATE", 1).await?;
    wait_for_entries(&pool, "DELETE", 1).await?;

    // Each entry's prev_hash must equal the previous entry's hash; the first
    // entry has none.
    let rows = sqlx::query(
        "SELECT prev_hash, hash FROM audit_logs ORDER BY occurred_at ASC, id ASC",
    )
    .fetch_all(&pool)
    .await?;
    assert!(rows.len() >= 3, "expected login + create + delete entries");

    let mut prev: Option<String> = None;
    for row in &rows {
        let prev_hash: Option<String> = row.get("prev_hash");
        assert_eq!(prev_hash, prev);
        prev = Some(row.get("hash"));
    }

    Ok(())
}

#[tokio::test]
async fn audit_trail_is_readable_and_filterable() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = login_root(&app).await?;

    let (status, role) = send(
        &app,
        "POST",
        "/api/roles",
        Some(&token),
        Some(json!({"name": "scribe", "description": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().context("missing id")?.to_string();

    wait_for_entries(&pool, "CREATE", 1).await?;

    let (status, entries) = send(&app, "GET", "/api/audit-logs", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(entries.as_array().is_some_and(|list| !list.is_empty()));

    let (status, entries) = send(
        &app,
        "GET",
        &format!("/api/audit-logs?entity_type=role&entity_id={role_id}"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let list = entries.as_array().context("expected array")?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["action"], "CREATE");
    assert_eq!(list[0]["entity_id"], role_id);

    // Read-only surface: no write routes exist under the audit path.
    let (status, _) = send(
        &app,
        "POST",
        "/api/audit-logs",
        Some(&token),
        Some(json!({"action": "FORGED"})),
    )
    .await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    Ok(())
}
