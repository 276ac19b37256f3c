/// SQLite connection pool and schema management
///
/// One database holds every table: organisations and users, flows and states,
/// content types and instances, approval systems, plans, memberships, payments
/// and the durable job queue.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Shared database handle
///
/// Cheap to clone; every storage type keeps its own clone of the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database at `url`, creating the file (and its directory) if missing
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        if let Some(parent) = Path::new(options.get_filename()).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e)
                })?;
            }
        }

        tracing::info!("🗄️ Opening database: {}", options.get_filename().display());
        let pool = SqlitePool::connect_with(options).await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Fresh private in-memory database with the schema applied
    ///
    /// The pool is pinned to a single never-expiring connection, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("✅ Database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organisations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        organisation_id TEXT NOT NULL REFERENCES organisations(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        controlled INTEGER NOT NULL DEFAULT 0,
        organisation_id TEXT NOT NULL REFERENCES organisations(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS states (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL REFERENCES flows(id) ON DELETE CASCADE,
        state TEXT NOT NULL,
        state_order INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (flow_id, state_order)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_types (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        prefix TEXT NOT NULL,
        flow_id TEXT NOT NULL REFERENCES flows(id),
        organisation_id TEXT NOT NULL REFERENCES organisations(id) ON DELETE CASCADE,
        -- highest instance sequence ever handed out, survives deletes
        last_sequence INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        id TEXT PRIMARY KEY,
        instance_id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        content_type_id TEXT NOT NULL REFERENCES content_types(id) ON DELETE CASCADE,
        state_id TEXT NOT NULL REFERENCES states(id),
        creator_id TEXT NOT NULL REFERENCES users(id),
        serialized TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (content_type_id, sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS approval_systems (
        id TEXT PRIMARY KEY,
        instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
        pre_state_id TEXT NOT NULL REFERENCES states(id),
        post_state_id TEXT NOT NULL REFERENCES states(id),
        approver_id TEXT NOT NULL REFERENCES users(id),
        approved INTEGER NOT NULL DEFAULT 0,
        approved_log TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS plans (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        monthly_amount INTEGER NOT NULL,
        yearly_amount INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS memberships (
        id TEXT PRIMARY KEY,
        organisation_id TEXT NOT NULL UNIQUE REFERENCES organisations(id) ON DELETE CASCADE,
        plan_id TEXT NOT NULL REFERENCES plans(id),
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL,
        plan_duration INTEGER NOT NULL,
        is_expired INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        transaction_id TEXT NOT NULL UNIQUE,
        amount INTEGER NOT NULL,
        status TEXT NOT NULL,
        action TEXT,
        organisation_id TEXT NOT NULL REFERENCES organisations(id),
        creator_id TEXT NOT NULL REFERENCES users(id),
        membership_id TEXT NOT NULL REFERENCES memberships(id),
        from_plan_id TEXT NOT NULL REFERENCES plans(id),
        to_plan_id TEXT NOT NULL REFERENCES plans(id),
        start_date TEXT,
        end_date TEXT,
        invoice_number TEXT UNIQUE,
        meta TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoice_counters (
        year INTEGER PRIMARY KEY,
        last_sequence INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        organisation_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        run_at TEXT NOT NULL,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_states_flow ON states(flow_id, state_order)",
    "CREATE INDEX IF NOT EXISTS idx_instances_content_type ON instances(content_type_id)",
    "CREATE INDEX IF NOT EXISTS idx_approval_systems_approver ON approval_systems(approver_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, run_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_organisation ON jobs(organisation_id, created_at)",
];
