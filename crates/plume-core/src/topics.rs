//! Topics: candidate content waiting to be written
//!
//! A topic is claimed (`pending -> in_progress`) atomically with its
//! selection, so two selector runs can never walk away with the same topic.
//! Downstream publishing marks it `completed`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Array, Int4, Text, Timestamptz, Uuid as DieselUuid, Varchar};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{self, SharedConnection};
use crate::schema::topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Pending,
    InProgress,
    Completed,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Pending => "pending",
            TopicStatus::InProgress => "in_progress",
            TopicStatus::Completed => "completed",
        }
    }
}

impl FromStr for TopicStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TopicStatus::Pending),
            "in_progress" => Ok(TopicStatus::InProgress),
            "completed" => Ok(TopicStatus::Completed),
            _ => Err(anyhow::anyhow!("Invalid topic status: {}", s)),
        }
    }
}

/// Which pending topic wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Highest SEO score, oldest first on ties
    #[default]
    SeoScore,
    /// First in, first out
    Oldest,
}

impl SelectionStrategy {
    fn order_clause(&self) -> &'static str {
        match self {
            SelectionStrategy::SeoScore => "seo_score DESC, created_at ASC, id ASC",
            SelectionStrategy::Oldest => "created_at ASC, id ASC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: Uuid,
    pub project_id: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub seo_score: i32,
    pub status: TopicStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(QueryableByName)]
struct TopicRow {
    #[diesel(sql_type = DieselUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    project_id: String,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Array<Text>)]
    keywords: Vec<String>,
    #[diesel(sql_type = Int4)]
    seo_score: i32,
    #[diesel(sql_type = Varchar)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

impl TryFrom<TopicRow> for Topic {
    type Error = anyhow::Error;

    fn try_from(row: TopicRow) -> Result<Self> {
        Ok(Topic {
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            keywords: row.keywords,
            seo_score: row.seo_score,
            status: TopicStatus::from_str(&row.status)?,
            created_at: row.created_at,
        })
    }
}

/// A topic to ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub seo_score: i32,
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn insert(&self, topic: NewTopic) -> Result<Topic>;

    /// Select the next pending topic under `strategy` and mark it
    /// `in_progress` in the same step
    async fn claim_next(&self, project_id: &str, strategy: SelectionStrategy)
        -> Result<Option<Topic>>;

    async fn mark_completed(&self, topic_id: Uuid) -> Result<bool>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = topics)]
struct NewTopicRow<'a> {
    id: Uuid,
    project_id: &'a str,
    title: &'a str,
    keywords: &'a [String],
    seo_score: i32,
    status: &'a str,
}

pub struct PgTopicStore {
    conn: SharedConnection,
}

impl PgTopicStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TopicStore for PgTopicStore {
    async fn insert(&self, topic: NewTopic) -> Result<Topic> {
        let mut conn = db::lock(&self.conn)?;
        let id = Uuid::new_v4();

        diesel::insert_into(topics::table)
            .values(&NewTopicRow {
                id,
                project_id: &topic.project_id,
                title: &topic.title,
                keywords: &topic.keywords,
                seo_score: topic.seo_score,
                status: TopicStatus::Pending.as_str(),
            })
            .execute(&mut *conn)
            .context("Failed to insert topic")?;

        diesel::sql_query(
            "SELECT id, project_id, title, keywords, seo_score, status, created_at \
             FROM topics WHERE id = $1",
        )
        .bind::<DieselUuid, _>(id)
        .get_result::<TopicRow>(&mut *conn)
        .context("Failed to reload inserted topic")?
        .try_into()
    }

    async fn claim_next(
        &self,
        project_id: &str,
        strategy: SelectionStrategy,
    ) -> Result<Option<Topic>> {
        let mut conn = db::lock(&self.conn)?;

        // SKIP LOCKED keeps concurrent claimers from blocking on (or
        // double-claiming) the same row
        let query = format!(
            "UPDATE topics SET status = 'in_progress', updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM topics \
                 WHERE project_id = $1 AND status = 'pending' \
                 ORDER BY {} LIMIT 1 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, project_id, title, keywords, seo_score, status, created_at",
            strategy.order_clause()
        );

        let row = diesel::sql_query(query)
            .bind::<Text, _>(project_id)
            .get_result::<TopicRow>(&mut *conn)
            .optional()
            .context("Failed to claim topic")?;

        row.map(Topic::try_from).transpose()
    }

    async fn mark_completed(&self, topic_id: Uuid) -> Result<bool> {
        let mut conn = db::lock(&self.conn)?;

        let updated = diesel::update(topics::table.filter(topics::id.eq(topic_id)))
            .set((
                topics::status.eq(TopicStatus::Completed.as_str()),
                topics::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .context("Failed to mark topic completed")?;

        Ok(updated > 0)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryTopicStore {
    topics: Mutex<Vec<Topic>>,
}

impl InMemoryTopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, topic_id: Uuid) -> Option<Topic> {
        self.topics
            .lock()
            .await
            .iter()
            .find(|t| t.id == topic_id)
            .cloned()
    }
}

#[async_trait]
impl TopicStore for InMemoryTopicStore {
    async fn insert(&self, topic: NewTopic) -> Result<Topic> {
        let mut topics = self.topics.lock().await;
        // Strictly increasing timestamps keep "oldest" deterministic
        let created_at = topics
            .last()
            .map(|t| t.created_at + chrono::Duration::microseconds(1))
            .unwrap_or_else(Utc::now)
            .max(Utc::now());

        let topic = Topic {
            id: Uuid::new_v4(),
            project_id: topic.project_id,
            title: topic.title,
            keywords: topic.keywords,
            seo_score: topic.seo_score,
            status: TopicStatus::Pending,
            created_at,
        };
        topics.push(topic.clone());
        Ok(topic)
    }

    async fn claim_next(
        &self,
        project_id: &str,
        strategy: SelectionStrategy,
    ) -> Result<Option<Topic>> {
        let mut topics = self.topics.lock().await;

        let best = topics
            .iter_mut()
            .filter(|t| t.project_id == project_id && t.status == TopicStatus::Pending)
            .min_by(|a, b| match strategy {
                SelectionStrategy::SeoScore => b
                    .seo_score
                    .cmp(&a.seo_score)
                    .then(a.created_at.cmp(&b.created_at)),
                SelectionStrategy::Oldest => a.created_at.cmp(&b.created_at),
            });

        Ok(best.map(|topic| {
            topic.status = TopicStatus::InProgress;
            topic.clone()
        }))
    }

    async fn mark_completed(&self, topic_id: Uuid) -> Result<bool> {
        let mut topics = self.topics.lock().await;
        match topics.iter_mut().find(|t| t.id == topic_id) {
            Some(topic) => {
                topic.status = TopicStatus::Completed;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn new_topic(title: &str, seo_score: i32) -> NewTopic {
        NewTopic {
            project_id: "blog".to_string(),
            title: title.to_string(),
            keywords: vec![],
            seo_score,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TopicStatus::Pending,
            TopicStatus::InProgress,
            TopicStatus::Completed,
        ] {
            assert_eq!(TopicStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(TopicStatus::from_str("archived").is_err());
    }

    #[tokio::test]
    async fn test_seo_strategy_claims_highest_score() {
        let store = InMemoryTopicStore::new();
        store.insert(new_topic("low", 10)).await.unwrap();
        let high = store.insert(new_topic("high", 90)).await.unwrap();
        store.insert(new_topic("mid", 50)).await.unwrap();

        let claimed = store
            .claim_next("blog", SelectionStrategy::SeoScore)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, TopicStatus::InProgress);
    }

    #[tokio::test]
    async fn test_oldest_strategy_is_fifo() {
        let store = InMemoryTopicStore::new();
        let first = store.insert(new_topic("first", 1)).await.unwrap();
        store.insert(new_topic("second", 99)).await.unwrap();

        let claimed = store
            .claim_next("blog", SelectionStrategy::Oldest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn test_claims_are_exclusive_across_strategies() {
        let store = Arc::new(InMemoryTopicStore::new());
        for i in 0..3 {
            store.insert(new_topic(&format!("t{}", i), i)).await.unwrap();
        }

        let a = store.claim_next("blog", SelectionStrategy::SeoScore).await.unwrap().unwrap();
        let b = store.claim_next("blog", SelectionStrategy::Oldest).await.unwrap().unwrap();
        let c = store.claim_next("blog", SelectionStrategy::SeoScore).await.unwrap().unwrap();
        let ids: HashSet<_> = [a.id, b.id, c.id].into_iter().collect();
        assert_eq!(ids.len(), 3);

        assert!(store
            .claim_next("blog", SelectionStrategy::SeoScore)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_collide() {
        let store = Arc::new(InMemoryTopicStore::new());
        for i in 0..8 {
            store.insert(new_topic(&format!("t{}", i), i % 3)).await.unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .claim_next("blog", SelectionStrategy::SeoScore)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            let topic = handle.await.unwrap().unwrap();
            assert!(ids.insert(topic.id));
        }
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn test_other_projects_are_untouched() {
        let store = InMemoryTopicStore::new();
        store.insert(new_topic("blog topic", 5)).await.unwrap();

        assert!(store
            .claim_next("docs", SelectionStrategy::SeoScore)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_completed() {
        let store = InMemoryTopicStore::new();
        let topic = store.insert(new_topic("done soon", 5)).await.unwrap();
        store.claim_next("blog", SelectionStrategy::SeoScore).await.unwrap();

        assert!(store.mark_completed(topic.id).await.unwrap());
        assert_eq!(
            store.get(topic.id).await.unwrap().status,
            TopicStatus::Completed
        );
        assert!(!store.mark_completed(Uuid::new_v4()).await.unwrap());
    }
}
