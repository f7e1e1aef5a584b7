use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use vax_admin::authz::ToggleReconciler;
use vax_admin::db::SqliteAssignmentStore;
use vax_admin::models::rbac::{EffectivePermissionView, PrincipalRef};

#[derive(Parser, Debug)]
#[command(author, version, about = "vax-admin maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new reversible migration pair with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Toggle one permission code for a role or user
    Toggle {
        #[command(flatten)]
        principal: PrincipalArgs,
        /// Permission code, e.g. VACCINE_ALL
        code: String,
    },
    /// Print the permission view of a role or user
    Permissions {
        #[command(flatten)]
        principal: PrincipalArgs,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct PrincipalArgs {
    /// Role ID
    #[arg(long)]
    role: Option<Uuid>,
    /// User ID
    #[arg(long)]
    user: Option<Uuid>,
}

impl PrincipalArgs {
    fn principal(&self) -> Option<PrincipalRef> {
        self.role
            .map(PrincipalRef::role)
            .or_else(|| self.user.map(PrincipalRef::user))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fall back to the crate-local `.env` when the CWD differs.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let (up, down) = make_migration_files(&name)?;
            println!("Created migration: {}", up.display());
            println!("Created migration: {}", down.display());
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
            let applied = applied_versions(&pool).await?;
            let Some(target) = rollback_target(&migrator, &applied) else {
                anyhow::bail!("no migrations were rolled back");
            };
            migrator
                .undo(&pool, target)
                .await
                .context("rollback failed")?;
            println!("Rolled back last migration");
        }
        Commands::Toggle { principal, code } => {
            let pool = get_pool().await?;
            let store = SqliteAssignmentStore::new(pool);
            let catalog = Arc::new(store.load_catalog().await?);
            let reconciler = ToggleReconciler::new(store, catalog);

            let outcome = reconciler.toggle(principal.principal(), &code).await?;
            for op in &outcome.operations {
                println!("{:?} {}", op.op, op.permission_code);
            }
            print_view(&outcome.view);
        }
        Commands::Permissions { principal } => {
            let pool = get_pool().await?;
            let store = SqliteAssignmentStore::new(pool);
            let catalog = Arc::new(store.load_catalog().await?);
            let reconciler = ToggleReconciler::new(store, catalog);

            let principal = principal
                .principal()
                .context("pass --role or --user")?;
            print_view(&reconciler.view(principal).await?);
        }
    }

    Ok(())
}

fn print_view(view: &EffectivePermissionView) {
    println!("{:<24} {:<8} {:<8} {}", "Code", "Granted", "Locked", "Source");
    for entry in &view.permissions {
        let source = entry
            .source
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<8} {:<8} {}",
            entry.code, entry.granted, entry.locked, source
        );
    }
}

fn make_migration_files(name: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let up = Path::new("migrations").join(format!("{}_{}.up.sql", timestamp, sanitized));
    let down = Path::new("migrations").join(format!("{}_{}.down.sql", timestamp, sanitized));

    if up.exists() || down.exists() {
        anyhow::bail!("migration already exists: {}", up.display());
    }

    fs::write(&up, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", up.display()))?;
    fs::write(&down, "-- Revert the migration here\n")
        .with_context(|| format!("failed to create migration at {}", down.display()))?;

    Ok((up, down))
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options: SqliteConnectOptions = database_url
        .parse()
        .context("invalid DATABASE_URL")?;

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options.create_if_missing(true).foreign_keys(true))
        .await
        .context("failed to connect to database")
}

async fn applied_versions(pool: &SqlitePool) -> anyhow::Result<HashSet<i64>> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    if table.is_none() {
        return Ok(HashSet::new());
    }

    let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect())
}

/// Version to undo down to so that only the newest applied migration is reverted.
fn rollback_target(migrator: &sqlx::migrate::Migrator, applied: &HashSet<i64>) -> Option<i64> {
    let mut versions: Vec<i64> = migrator
        .iter()
        .filter(|m| m.migration_type.is_up_migration() && applied.contains(&m.version))
        .map(|m| m.version)
        .collect();
    versions.sort_unstable();

    let _latest = versions.pop()?;
    Some(versions.pop().unwrap_or(0))
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let applied = applied_versions(pool).await?;

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter().filter(|m| m.migration_type.is_up_migration()) {
        let status = if applied.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
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
    // Prefer ./migrations, fall back to the crate-local folder.
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
