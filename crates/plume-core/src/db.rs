//! Shared PostgreSQL connection and migrations

use anyhow::{Context, Result};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// One connection shared by the Postgres-backed stores
pub type SharedConnection = Arc<Mutex<PgConnection>>;

pub fn connect(database_url: &str) -> Result<SharedConnection> {
    let conn = PgConnection::establish(database_url).context("Failed to connect to database")?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn run_migrations(database_url: &str) -> Result<()> {
    let mut conn =
        PgConnection::establish(database_url).context("Failed to connect to database")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    info!("Database migrations applied ({} new)", applied.len());
    Ok(())
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, PgConnection>> {
    conn.lock()
        .map_err(|_| anyhow::anyhow!("Failed to acquire database lock"))
}
