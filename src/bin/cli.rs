use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use worklane::authz::GlobalRole;
use worklane::utils::hash_password;

#[derive(Parser, Debug)]
#[command(author, version, about = "worklane admin and migration tool", long_about = None)]
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
    /// Create the two protected superuser accounts if they do not exist yet
    SeedAdmins {
        #[arg(long)]
        primary_email: String,
        #[arg(long)]
        primary_password: String,
        #[arg(long)]
        secondary_email: String,
        #[arg(long)]
        secondary_password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
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
        Commands::SeedAdmins {
            primary_email,
            primary_password,
            secondary_email,
            secondary_password,
        } => {
            let pool = get_pool().await?;
            seed_admins(
                &pool,
                &[
                    (primary_email.as_str(), primary_password.as_str()),
                    (secondary_email.as_str(), secondary_password.as_str()),
                ],
            )
            .await?;
        }
    }

    Ok(())
}

/// Exactly two protected accounts exist system-wide; this is the only code
/// path that creates them. Re-running against a seeded database is a no-op.
async fn seed_admins(pool: &SqlitePool, accounts: &[(&str, &str); 2]) -> anyhow::Result<()> {
    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM users WHERE protected = 1 AND deleted_at IS NULL",
    )
    .fetch_one(pool)
    .await?;

    if existing >= 2 {
        println!("Protected accounts already seeded ({existing} found)");
        return Ok(());
    }

    if existing == 1 {
        anyhow::bail!("database holds a single protected account; refusing to guess which seed is missing");
    }

    for (index, (email, password)) in accounts.iter().enumerate() {
        let hash = hash_password(password).map_err(|err| anyhow::anyhow!(err.to_string()))?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, global_role, department, protected, active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, NULL, 1, 1, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(format!("Protected Admin {}", index + 1))
        .bind(email)
        .bind(&hash)
        .bind(GlobalRole::Superuser.as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        println!("Created protected superuser {email}");
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

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table_exists = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let applied_versions: HashSet<i64> = if table_exists.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let applied = applied_versions.contains(&version);
        let status = if applied { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() { desc } else { "unknown" };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
