//! Research briefs from scheduled research queries
//!
//! Every brief a research job produces is kept, warnings included, keyed by
//! the research query that asked for it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agents::ResearchBrief;
use crate::db::{self, SharedConnection};
use crate::schema::research_briefs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBrief {
    pub id: i64,
    pub research_query_id: String,
    pub brief: ResearchBrief,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn save(&self, research_query_id: &str, brief: &ResearchBrief) -> Result<StoredBrief>;

    /// Newest first
    async fn list(&self, research_query_id: &str, limit: i64) -> Result<Vec<StoredBrief>>;

    async fn latest(&self, research_query_id: &str) -> Result<Option<StoredBrief>> {
        Ok(self.list(research_query_id, 1).await?.into_iter().next())
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = research_briefs)]
struct BriefRow {
    id: i64,
    research_query_id: String,
    brief: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<BriefRow> for StoredBrief {
    type Error = anyhow::Error;

    fn try_from(row: BriefRow) -> Result<Self> {
        Ok(StoredBrief {
            id: row.id,
            research_query_id: row.research_query_id,
            brief: serde_json::from_value(row.brief).context("Failed to parse research brief")?,
            created_at: row.created_at,
        })
    }
}

pub struct PgResearchStore {
    conn: SharedConnection,
}

impl PgResearchStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResearchStore for PgResearchStore {
    async fn save(&self, research_query_id: &str, brief: &ResearchBrief) -> Result<StoredBrief> {
        let json = serde_json::to_value(brief)?;
        let mut conn = db::lock(&self.conn)?;

        let row: BriefRow = diesel::insert_into(research_briefs::table)
            .values((
                research_briefs::research_query_id.eq(research_query_id),
                research_briefs::search_query.eq(&brief.query),
                research_briefs::brief.eq(&json),
            ))
            .returning(BriefRow::as_returning())
            .get_result(&mut *conn)
            .context("Failed to insert research brief")?;

        StoredBrief::try_from(row)
    }

    async fn list(&self, research_query_id: &str, limit: i64) -> Result<Vec<StoredBrief>> {
        let mut conn = db::lock(&self.conn)?;

        let rows: Vec<BriefRow> = research_briefs::table
            .filter(research_briefs::research_query_id.eq(research_query_id))
            .order(research_briefs::id.desc())
            .limit(limit)
            .select(BriefRow::as_select())
            .load(&mut *conn)
            .context("Failed to query research briefs")?;

        rows.into_iter().map(StoredBrief::try_from).collect()
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryResearchStore {
    briefs: Mutex<Vec<StoredBrief>>,
}

impl InMemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResearchStore for InMemoryResearchStore {
    async fn save(&self, research_query_id: &str, brief: &ResearchBrief) -> Result<StoredBrief> {
        let mut briefs = self.briefs.lock().await;
        let stored = StoredBrief {
            id: briefs.last().map(|b| b.id + 1).unwrap_or(1),
            research_query_id: research_query_id.to_string(),
            brief: brief.clone(),
            created_at: Utc::now(),
        };
        briefs.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, research_query_id: &str, limit: i64) -> Result<Vec<StoredBrief>> {
        Ok(self
            .briefs
            .lock()
            .await
            .iter()
            .rev()
            .filter(|b| b.research_query_id == research_query_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
