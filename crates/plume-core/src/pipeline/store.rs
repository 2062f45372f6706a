//! Pipeline run persistence

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PipelineRun, RunStatus};
use crate::db::{self, SharedConnection};
use crate::schema::pipeline_runs;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: &PipelineRun) -> Result<()>;
    async fn update(&self, run: &PipelineRun) -> Result<()>;
    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;
    /// Newest first
    async fn list_for_pipeline(&self, pipeline_id: &str, limit: i64) -> Result<Vec<PipelineRun>>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = pipeline_runs)]
struct RunRow {
    id: Uuid,
    pipeline_id: String,
    status: String,
    current_step: i32,
    total_steps: i32,
    current_agent: Option<String>,
    step_outputs: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = anyhow::Error;

    fn try_from(row: RunRow) -> Result<Self> {
        let step_outputs =
            serde_json::from_value(row.step_outputs).context("Failed to parse step outputs")?;

        Ok(PipelineRun {
            id: row.id,
            pipeline_id: row.pipeline_id,
            status: RunStatus::from_str(&row.status)?,
            current_step: u32::try_from(row.current_step).context("Negative current_step")?,
            total_steps: u32::try_from(row.total_steps).context("Negative total_steps")?,
            current_agent: row.current_agent,
            step_outputs,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Primary key is skipped on update
#[derive(Insertable, AsChangeset)]
#[diesel(table_name = pipeline_runs, treat_none_as_null = true)]
struct RunChanges<'a> {
    id: Uuid,
    pipeline_id: &'a str,
    status: &'a str,
    current_step: i32,
    total_steps: i32,
    current_agent: Option<&'a str>,
    step_outputs: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<&'a str>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> RunChanges<'a> {
    fn from_run(run: &'a PipelineRun) -> Result<Self> {
        Ok(Self {
            id: run.id,
            pipeline_id: &run.pipeline_id,
            status: run.status.as_str(),
            current_step: i32::try_from(run.current_step)?,
            total_steps: i32::try_from(run.total_steps)?,
            current_agent: run.current_agent.as_deref(),
            step_outputs: serde_json::to_value(&run.step_outputs)?,
            result: run.result.clone(),
            error: run.error.as_deref(),
            created_at: run.created_at,
            updated_at: run.updated_at,
        })
    }
}

pub struct PgRunStore {
    conn: SharedConnection,
}

impl PgRunStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, run: &PipelineRun) -> Result<()> {
        let changes = RunChanges::from_run(run)?;
        let mut conn = db::lock(&self.conn)?;

        diesel::insert_into(pipeline_runs::table)
            .values(&changes)
            .execute(&mut *conn)
            .context("Failed to insert pipeline run")?;

        Ok(())
    }

    async fn update(&self, run: &PipelineRun) -> Result<()> {
        let changes = RunChanges::from_run(run)?;
        let mut conn = db::lock(&self.conn)?;

        let updated = diesel::update(pipeline_runs::table.filter(pipeline_runs::id.eq(run.id)))
            .set(&changes)
            .execute(&mut *conn)
            .context("Failed to update pipeline run")?;

        if updated == 0 {
            anyhow::bail!("Pipeline run {} not found", run.id);
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let mut conn = db::lock(&self.conn)?;

        let row: Option<RunRow> = pipeline_runs::table
            .filter(pipeline_runs::id.eq(run_id))
            .select(RunRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("Failed to query pipeline run")?;

        row.map(PipelineRun::try_from).transpose()
    }

    async fn list_for_pipeline(&self, pipeline_id: &str, limit: i64) -> Result<Vec<PipelineRun>> {
        let mut conn = db::lock(&self.conn)?;

        let rows: Vec<RunRow> = pipeline_runs::table
            .filter(pipeline_runs::pipeline_id.eq(pipeline_id))
            .order(pipeline_runs::created_at.desc())
            .limit(limit)
            .select(RunRow::as_select())
            .load(&mut *conn)
            .context("Failed to query pipeline runs")?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Snapshots kept across all runs before the oldest are dropped
pub const HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, PipelineRun>>,
    /// Recent persisted versions in write order, at most `HISTORY_LIMIT`
    history: Mutex<VecDeque<PipelineRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, run: &PipelineRun) {
        let mut history = self.history.lock().await;
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(run.clone());
    }

    /// Snapshots written for a run, oldest first
    pub async fn history(&self, run_id: Uuid) -> Vec<PipelineRun> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|r| r.id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run.id) {
            anyhow::bail!("Pipeline run {} already exists", run.id);
        }
        runs.insert(run.id, run.clone());
        self.record(run).await;
        Ok(())
    }

    async fn update(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.lock().await;
        let slot = runs
            .get_mut(&run.id)
            .ok_or_else(|| anyhow::anyhow!("Pipeline run {} not found", run.id))?;
        *slot = run.clone();
        self.record(run).await;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.lock().await.get(&run_id).cloned())
    }

    async fn list_for_pipeline(&self, pipeline_id: &str, limit: i64) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .lock()
            .await
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_update_get() {
        let store = InMemoryRunStore::new();
        let mut run = PipelineRun::new("weekly", 1);
        store.create(&run).await.unwrap();
        assert!(store.create(&run).await.is_err());

        run.start().unwrap();
        store.update(&run).await.unwrap();

        let loaded = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(store.history(run.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = InMemoryRunStore::new();
        let mut run = PipelineRun::new("weekly", 1);
        store.create(&run).await.unwrap();
        run.start().unwrap();
        for _ in 0..HISTORY_LIMIT + 10 {
            store.update(&run).await.unwrap();
        }

        let history = store.history(run.id).await;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert!(history.iter().all(|r| r.status == RunStatus::Running));
        assert_eq!(store.get(run.id).await.unwrap().unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_update_unknown_run_fails() {
        let store = InMemoryRunStore::new();
        let run = PipelineRun::new("weekly", 1);
        tokio_test::assert_err!(store.update(&run).await);
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_limited() {
        let store = InMemoryRunStore::new();
        for _ in 0..3 {
            store.create(&PipelineRun::new("weekly", 1)).await.unwrap();
        }
        store.create(&PipelineRun::new("daily", 1)).await.unwrap();

        assert_eq!(store.list_for_pipeline("weekly", 10).await.unwrap().len(), 3);
        assert_eq!(store.list_for_pipeline("weekly", 2).await.unwrap().len(), 2);
        assert_eq!(store.list_for_pipeline("daily", 10).await.unwrap().len(), 1);
    }
}
