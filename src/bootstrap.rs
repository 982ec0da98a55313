//! Idempotent bootstrap of the authorization catalog and the initial
//! omnipotent account.
//!
//! Every step is pre-checked, so re-running is safe. The godmode account is
//! only created while no principal holds the omnipotent role; once one
//! exists the system administers itself through its own authorize checks.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::authz::{permissions, roles};
use crate::errors::AppError;
use crate::utils::{hash_password, utc_now};

const PERMISSION_CATALOG: &[(&str, &str)] = &[
    (permissions::VIEW, "Permission to view a resource"),
    (permissions::CREATE, "Permission to create a resource"),
    (permissions::UPDATE, "Permission to update a resource"),
    (permissions::DELETE, "Permission to delete a resource"),
    (permissions::MANAGE, "Permission to manage a resource (all operations)"),
];

const RESOURCE_CATALOG: &[(&str, &str, &str)] = &[
    ("users", "/api/users", "User management"),
    ("roles", "/api/roles", "Role management"),
    ("permissions", "/api/permissions", "Permission management"),
    ("resources", "/api/resources", "Resource management"),
    ("entity_types", "/api/entity-types", "Entity type management"),
    ("entities", "/api/entities", "Entity management"),
    ("entity_roles", "/api/entity-roles", "Entity role management"),
    ("entity_members", "/api/entity-members", "Entity membership management"),
    ("audit_logs", "/api/audit-logs", "Audit logs"),
    ("venues", "/api/venues", "Venue management"),
    ("venue_bookings", "/api/venue-bookings", "Venue booking management"),
    ("clubs", "/api/clubs", "Club management"),
    ("proposals", "/api/proposals", "Proposal management"),
    ("reports", "/api/reports", "Report management"),
];

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub rows_created: usize,
    pub godmode_user_created: bool,
}

pub async fn run(pool: &SqlitePool, opts: &BootstrapOptions) -> Result<BootstrapReport, AppError> {
    let mut report = BootstrapReport::default();
    let now = utc_now();

    for (name, description) in PERMISSION_CATALOG {
        ensure_named(pool, "permissions", name, description, now, &mut report).await?;
    }

    for (name, path, description) in RESOURCE_CATALOG {
        ensure_resource(pool, name, path, description, now, &mut report).await?;
    }

    for (name, description) in [
        (roles::USER, "Default role for registered users"),
        (roles::ADMIN, "Administers domain data"),
        (roles::GODMODE, "Omnipotent role, bypasses all grant checks"),
    ] {
        ensure_named(pool, "roles", name, description, now, &mut report).await?;
    }

    seed_role_grants(pool, now, &mut report).await?;
    seed_entity_catalog(pool, now, &mut report).await?;

    // The omnipotent account is created at most once, gated by "does any
    // omnipotent principal already exist".
    let godmode_users: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM users u INNER JOIN roles r ON r.id = u.role_id WHERE r.name = ?",
    )
    .bind(roles::GODMODE)
    .fetch_one(pool)
    .await?;

    if godmode_users == 0 {
        let role_id = id_by_name(pool, "roles", roles::GODMODE).await?;
        let password_hash = hash_password(&opts.password)?;
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&opts.username)
        .bind(&opts.email)
        .bind(password_hash)
        .bind(role_id.to_string())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        report.godmode_user_created = true;
    }

    Ok(report)
}

async fn seed_role_grants(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    let user_grants: &[(&str, &str)] = &[
        (permissions::VIEW, "venues"),
        (permissions::VIEW, "clubs"),
        (permissions::VIEW, "venue_bookings"),
        (permissions::CREATE, "venue_bookings"),
        (permissions::UPDATE, "venue_bookings"),
        (permissions::CREATE, "proposals"),
        (permissions::CREATE, "reports"),
    ];
    let admin_grants: &[(&str, &str)] = &[
        (permissions::MANAGE, "venues"),
        (permissions::MANAGE, "venue_bookings"),
        (permissions::MANAGE, "clubs"),
        (permissions::MANAGE, "proposals"),
        (permissions::MANAGE, "reports"),
        (permissions::MANAGE, "entities"),
        (permissions::VIEW, "users"),
        (permissions::VIEW, "roles"),
        (permissions::VIEW, "permissions"),
        (permissions::VIEW, "audit_logs"),
    ];

    for (role, grants) in [(roles::USER, user_grants), (roles::ADMIN, admin_grants)] {
        let role_id = id_by_name(pool, "roles", role).await?;
        for (permission, resource) in grants {
            let permission_id = id_by_name(pool, "permissions", permission).await?;
            let resource_id = id_by_name(pool, "resources", resource).await?;
            ensure_role_grant(pool, role_id, permission_id, resource_id, now, report).await?;
        }
    }

    // Godmode holds manage on everything; the grant rows are redundant with
    // the resolver's short-circuit but keep the catalog introspectable.
    let godmode_id = id_by_name(pool, "roles", roles::GODMODE).await?;
    let manage_id = id_by_name(pool, "permissions", permissions::MANAGE).await?;
    for (name, _, _) in RESOURCE_CATALOG {
        let resource_id = id_by_name(pool, "resources", name).await?;
        ensure_role_grant(pool, godmode_id, manage_id, resource_id, now, report).await?;
    }

    Ok(())
}

async fn seed_entity_catalog(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    for (name, description) in [
        ("club", "Club entity type"),
        ("security", "Security entity type"),
        ("director", "Director entity type"),
    ] {
        ensure_named(pool, "entity_types", name, description, now, report).await?;
    }

    let club_type_id = id_by_name(pool, "entity_types", "club").await?;
    for (name, description) in [
        ("member", "Regular member of the club"),
        ("admin", "Administrator of the club"),
        ("owner", "Owner of the club"),
    ] {
        ensure_entity_role(pool, club_type_id, name, description, now, report).await?;
    }

    let grants: &[(&str, &str, &str)] = &[
        ("member", permissions::VIEW, "clubs"),
        ("member", permissions::VIEW, "venue_bookings"),
        ("admin", permissions::VIEW, "clubs"),
        ("admin", permissions::CREATE, "clubs"),
        ("admin", permissions::UPDATE, "clubs"),
        ("admin", permissions::VIEW, "venue_bookings"),
        ("admin", permissions::CREATE, "venue_bookings"),
        ("admin", permissions::UPDATE, "venue_bookings"),
        ("owner", permissions::MANAGE, "clubs"),
        ("owner", permissions::MANAGE, "venue_bookings"),
    ];

    for (entity_role, permission, resource) in grants {
        let entity_role_id = entity_role_id(pool, club_type_id, entity_role).await?;
        let permission_id = id_by_name(pool, "permissions", permission).await?;
        let resource_id = id_by_name(pool, "resources", resource).await?;

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM entity_role_permissions WHERE entity_role_id = ? AND permission_id = ? AND resource_id = ?",
        )
        .bind(entity_role_id.to_string())
        .bind(permission_id.to_string())
        .bind(resource_id.to_string())
        .fetch_one(pool)
        .await?;

        if exists == 0 {
            sqlx::query(
                "INSERT INTO entity_role_permissions (entity_role_id, permission_id, resource_id, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(entity_role_id.to_string())
            .bind(permission_id.to_string())
            .bind(resource_id.to_string())
            .bind(now)
            .execute(pool)
            .await?;
            report.rows_created += 1;
        }
    }

    Ok(())
}

/// Insert-if-missing for tables shaped (id, name, description, timestamps).
async fn ensure_named(
    pool: &SqlitePool,
    table: &str,
    name: &str,
    description: &str,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    let select = format!("SELECT id FROM {table} WHERE name = ?");
    let existing = sqlx::query(&select).bind(name).fetch_optional(pool).await?;
    if existing.is_some() {
        return Ok(());
    }

    let insert =
        format!("INSERT INTO {table} (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)");
    sqlx::query(&insert)
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    report.rows_created += 1;
    Ok(())
}

async fn ensure_resource(
    pool: &SqlitePool,
    name: &str,
    path: &str,
    description: &str,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    let existing = sqlx::query("SELECT id FROM resources WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO resources (id, name, path, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(path)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    report.rows_created += 1;
    Ok(())
}

async fn ensure_entity_role(
    pool: &SqlitePool,
    entity_type_id: Uuid,
    name: &str,
    description: &str,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    let existing = sqlx::query("SELECT id FROM entity_roles WHERE entity_type_id = ? AND name = ?")
        .bind(entity_type_id.to_string())
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO entity_roles (id, entity_type_id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entity_type_id.to_string())
    .bind(name)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    report.rows_created += 1;
    Ok(())
}

async fn ensure_role_grant(
    pool: &SqlitePool,
    role_id: Uuid,
    permission_id: Uuid,
    resource_id: Uuid,
    now: DateTime<Utc>,
    report: &mut BootstrapReport,
) -> Result<(), AppError> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM role_permissions WHERE role_id = ? AND permission_id = ? AND resource_id = ?",
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .bind(resource_id.to_string())
    .fetch_one(pool)
    .await?;
    if exists > 0 {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id, resource_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .bind(resource_id.to_string())
    .bind(now)
    .execute(pool)
    .await?;
    report.rows_created += 1;
    Ok(())
}

async fn id_by_name(pool: &SqlitePool, table: &str, name: &str) -> Result<Uuid, AppError> {
    let select = format!("SELECT id FROM {table} WHERE name = ?");
    let row = sqlx::query(&select)
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::internal(format!("bootstrap row missing from {table}: {name}")))?;
    Ok(Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default())
}

async fn entity_role_id(
    pool: &SqlitePool,
    entity_type_id: Uuid,
    name: &str,
) -> Result<Uuid, AppError> {
    let row = sqlx::query("SELECT id FROM entity_roles WHERE entity_type_id = ? AND name = ?")
        .bind(entity_type_id.to_string())
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::internal(format!("bootstrap entity role missing: {name}")))?;
    Ok(Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default())
}
