use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use clubdesk::authz::{import_flat_roles, FlatRole};
use clubdesk::bootstrap::{self, BootstrapOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "clubdesk admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Seed the permission catalog, default roles and the godmode account
    Bootstrap {
        #[arg(long, default_value = "godmode")]
        username: String,
        #[arg(long, default_value = "godmode@localhost")]
        email: String,
        /// Initial password; read from GODMODE_PASSWORD when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Import legacy flat role definitions from a JSON file
    ImportLegacy {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; in containers the binary CWD may differ, so
    // fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::Bootstrap {
            username,
            email,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var("GODMODE_PASSWORD")
                    .context("provide --password or set GODMODE_PASSWORD")?,
            };

            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;

            let report = bootstrap::run(
                &pool,
                &BootstrapOptions {
                    username,
                    email,
                    password,
                },
            )
            .await?;

            println!("Catalog rows created: {}", report.rows_created);
            if report.godmode_user_created {
                println!("Godmode account created");
            } else {
                println!("Godmode account already present, skipped");
            }
        }
        Commands::ImportLegacy { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let flat_roles: Vec<FlatRole> =
                serde_json::from_str(&raw).context("invalid legacy role file")?;

            let pool = get_pool().await?;
            let report = import_flat_roles(&pool, &flat_roles).await?;

            println!(
                "Imported: {} roles created, {} grants created, {} skipped",
                report.roles_created, report.grants_created, report.grants_skipped
            );
        }
    }

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    sqlx::migrate::Migrator::new(dir)
        .await
        .context("failed to load migrations directory")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet.
    let table_exists = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let applied_versions: HashSet<i64> = if table_exists.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter()
            .filter_map(|row| row.try_get::<i64, _>("version").ok())
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let applied = applied_versions.contains(&migration.version);
        let status = if applied { "applied" } else { "pending" };
        println!(
            "{:<8} {:<20} {}",
            status,
            migration.version,
            migration.description.as_ref().trim()
        );
    }

    Ok(())
}
