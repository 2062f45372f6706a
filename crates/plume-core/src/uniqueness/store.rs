//! Per-project variety memory: append-only canonical lines

use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Text;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::UniquenessOutcome;
use crate::db::{self, SharedConnection};
use crate::schema::variety_memory;

/// Decides the outcome given the project's current memory
pub type Resolver = Box<dyn FnOnce(&[String]) -> UniquenessOutcome + Send>;

#[async_trait]
pub trait VarietyMemory: Send + Sync {
    /// All lines for a project, oldest first
    async fn entries(&self, project_id: &str) -> Result<Vec<String>>;

    /// Read the project's memory, resolve, then append the resolved line.
    ///
    /// Implementations serialize this per project: no two resolutions for
    /// the same project may see the same snapshot.
    async fn append_resolved(&self, project_id: &str, resolve: Resolver)
        -> Result<UniquenessOutcome>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

pub struct PgVarietyMemory {
    conn: SharedConnection,
}

impl PgVarietyMemory {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl VarietyMemory for PgVarietyMemory {
    async fn entries(&self, project_id: &str) -> Result<Vec<String>> {
        let mut conn = db::lock(&self.conn)?;

        variety_memory::table
            .filter(variety_memory::project_id.eq(project_id))
            .order(variety_memory::id.asc())
            .select(variety_memory::canonical_line)
            .load(&mut *conn)
            .context("Failed to load variety memory")
    }

    async fn append_resolved(
        &self,
        project_id: &str,
        resolve: Resolver,
    ) -> Result<UniquenessOutcome> {
        let mut conn = db::lock(&self.conn)?;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            // Released at commit/rollback
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(project_id)
                .execute(conn)
                .context("Failed to lock project memory")?;

            let entries: Vec<String> = variety_memory::table
                .filter(variety_memory::project_id.eq(project_id))
                .order(variety_memory::id.asc())
                .select(variety_memory::canonical_line)
                .load(conn)
                .context("Failed to load variety memory")?;

            let outcome = resolve(&entries);

            diesel::insert_into(variety_memory::table)
                .values((
                    variety_memory::project_id.eq(project_id),
                    variety_memory::canonical_line.eq(&outcome.canonical),
                ))
                .execute(conn)
                .context("Failed to append variety memory")?;

            Ok(outcome)
        })
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryVarietyMemory {
    projects: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryVarietyMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a project's memory
    pub async fn seed(&self, project_id: &str, lines: impl IntoIterator<Item = String>) {
        self.projects
            .lock()
            .await
            .entry(project_id.to_string())
            .or_default()
            .extend(lines);
    }
}

#[async_trait]
impl VarietyMemory for InMemoryVarietyMemory {
    async fn entries(&self, project_id: &str) -> Result<Vec<String>> {
        Ok(self
            .projects
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_resolved(
        &self,
        project_id: &str,
        resolve: Resolver,
    ) -> Result<UniquenessOutcome> {
        let mut projects = self.projects.lock().await;
        let entries = projects.entry(project_id.to_string()).or_default();
        let outcome = resolve(entries.as_slice());
        entries.push(outcome.canonical.clone());
        Ok(outcome)
    }
}
