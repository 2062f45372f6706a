//! Job queue with repeatable (cron) rules
//!
//! Two structures per queue name:
//! - repeat rules, keyed `{jobId}:{cron}`, so re-registering the same job
//!   with the same pattern overwrites instead of duplicating
//! - a FIFO of ready jobs that workers pop
//!
//! A poller calls [`JobQueue::fire_due`] to turn due rules into ready jobs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::scheduler::next_run_after;

pub const PIPELINE_QUEUE: &str = "pipelines";
pub const RESEARCH_QUEUE: &str = "research";

/// How long a fired-marker lives in Redis
const FIRED_MARKER_TTL_SECS: u64 = 24 * 60 * 60;

/// Fire one occurrence of a repeat rule.
///
/// KEYS: repeat hash, ready list, fired marker.
/// ARGV: rule key, rule JSON as read, job JSON, advanced rule JSON (empty to
/// drop the rule), marker TTL.
///
/// Nothing is written unless the rule is still stored exactly as read, so a
/// rule paused or rescheduled since the read stays that way.
const FIRE_RULE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
if not redis.call('SET', KEYS[3], '1', 'NX', 'EX', ARGV[5]) then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[3])
if ARGV[4] == '' then
    redis.call('HDEL', KEYS[1], ARGV[1])
else
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[4])
end
return 1
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: &str, id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            queue: queue.to_string(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatRule {
    pub job_id: String,
    pub queue: String,
    pub cron: String,
    pub timezone: String,
    pub payload: Value,
    pub next_run_at: DateTime<Utc>,
}

impl RepeatRule {
    pub fn key(&self) -> String {
        repeat_key(&self.job_id, &self.cron)
    }

    /// Ready job for the occurrence at `next_run_at`
    fn occurrence(&self) -> Job {
        Job::new(
            &self.queue,
            format!("{}:{}", self.job_id, self.next_run_at.timestamp_millis()),
            self.payload.clone(),
        )
    }

    /// Rule advanced past `now`; `None` when the pattern has no future run
    fn advanced(&self, now: DateTime<Utc>) -> Option<RepeatRule> {
        match next_run_after(&self.cron, &self.timezone, now) {
            Ok(next) => Some(RepeatRule {
                next_run_at: next,
                ..self.clone()
            }),
            Err(e) => {
                warn!(job_id = %self.job_id, "Dropping repeat rule: {:#}", e);
                None
            }
        }
    }
}

pub fn repeat_key(job_id: &str, cron: &str) -> String {
    format!("{}:{}", job_id, cron)
}

/// Job JSON for the rule's due occurrence and the advanced rule's JSON,
/// empty when the rule has no future run
fn fire_arguments(rule: &RepeatRule, now: DateTime<Utc>) -> Result<(String, String)> {
    let job = serde_json::to_string(&rule.occurrence())?;
    let next = match rule.advanced(now) {
        Some(next) => serde_json::to_string(&next)?,
        None => String::new(),
    };
    Ok((job, next))
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert or replace the rule with the same `{jobId}:{cron}` key
    async fn upsert_repeatable(&self, rule: RepeatRule) -> Result<()>;

    /// Remove the exact rule; all three parts are needed to find it
    async fn remove_repeatable(&self, queue: &str, cron: &str, job_id: &str) -> Result<bool>;

    async fn list_repeatable(&self, queue: &str) -> Result<Vec<RepeatRule>>;

    async fn enqueue(&self, job: Job) -> Result<()>;

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>>;

    /// Push one job per due rule and advance each rule. Returns jobs pushed.
    ///
    /// Each rule fires atomically: a rule removed while the poll runs stays
    /// removed, and an occurrence is pushed at most once.
    async fn fire_due(&self, queue: &str, now: DateTime<Utc>) -> Result<usize>;
}

// ============================================================================
// Redis
// ============================================================================

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    prefix: String,
    fire_script: redis::Script,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis job queue");
        Ok(Self {
            conn,
            prefix: "plume".to_string(),
            fire_script: redis::Script::new(FIRE_RULE_SCRIPT),
        })
    }

    fn repeat_hash(&self, queue: &str) -> String {
        format!("{}:{}:repeat", self.prefix, queue)
    }

    fn ready_list(&self, queue: &str) -> String {
        format!("{}:{}:ready", self.prefix, queue)
    }

    fn fired_marker(&self, rule: &RepeatRule) -> String {
        format!(
            "{}:{}:fired:{}:{}",
            self.prefix,
            rule.queue,
            rule.key(),
            rule.next_run_at.timestamp_millis()
        )
    }

    /// Stored rules with the exact JSON each was read as
    async fn load_rules(&self, queue: &str) -> Result<Vec<(String, RepeatRule)>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(self.repeat_hash(queue))
            .await
            .context("Failed to list repeat rules")?;

        let mut rules = raw
            .into_values()
            .map(|json| {
                let rule = serde_json::from_str(&json).context("Corrupt repeat rule")?;
                Ok((json, rule))
            })
            .collect::<Result<Vec<(String, RepeatRule)>>>()?;
        rules.sort_by(|a, b| a.1.key().cmp(&b.1.key()));
        Ok(rules)
    }

    /// Fire `rule` if it is still stored as `raw`. `false` when another
    /// poller got there first or the rule was paused or replaced.
    async fn fire_rule(
        &self,
        queue: &str,
        raw: &str,
        rule: &RepeatRule,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let (job, next) = fire_arguments(rule, now)?;
        let fired: i64 = self
            .fire_script
            .key(self.repeat_hash(queue))
            .key(self.ready_list(queue))
            .key(self.fired_marker(rule))
            .arg(rule.key())
            .arg(raw)
            .arg(job)
            .arg(next)
            .arg(FIRED_MARKER_TTL_SECS)
            .invoke_async(&mut conn)
            .await
            .context("Failed to fire repeat rule")?;
        Ok(fired == 1)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn upsert_repeatable(&self, rule: RepeatRule) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&rule)?;
        let _: () = conn
            .hset(self.repeat_hash(&rule.queue), rule.key(), json)
            .await
            .context("Failed to upsert repeat rule")?;
        Ok(())
    }

    async fn remove_repeatable(&self, queue: &str, cron: &str, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .hdel(self.repeat_hash(queue), repeat_key(job_id, cron))
            .await
            .context("Failed to remove repeat rule")?;
        Ok(removed > 0)
    }

    async fn list_repeatable(&self, queue: &str) -> Result<Vec<RepeatRule>> {
        Ok(self
            .load_rules(queue)
            .await?
            .into_iter()
            .map(|(_, rule)| rule)
            .collect())
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&job)?;
        let _: () = conn
            .rpush(self.ready_list(&job.queue), json)
            .await
            .context("Failed to enqueue job")?;
        debug!(job_id = %job.id, queue = %job.queue, "Job enqueued");
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .lpop(self.ready_list(queue), None::<NonZeroUsize>)
            .await
            .context("Failed to dequeue job")?;

        raw.map(|json| serde_json::from_str(&json).context("Corrupt job payload"))
            .transpose()
    }

    async fn fire_due(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut fired = 0;

        for (raw, rule) in self.load_rules(queue).await? {
            if rule.next_run_at > now {
                continue;
            }
            if !self.fire_rule(queue, &raw, &rule, now).await? {
                debug!(job_id = %rule.job_id, queue, "Repeat rule changed or already fired");
                continue;
            }

            info!(job_id = %rule.job_id, next_run_at = %rule.next_run_at, queue, "Fired scheduled job");
            fired += 1;
        }

        Ok(fired)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryJobQueue {
    rules: Mutex<HashMap<String, BTreeMap<String, RepeatRule>>>,
    ready: Mutex<HashMap<String, VecDeque<Job>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ready_len(&self, queue: &str) -> usize {
        self.ready.lock().await.get(queue).map_or(0, |q| q.len())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn upsert_repeatable(&self, rule: RepeatRule) -> Result<()> {
        self.rules
            .lock()
            .await
            .entry(rule.queue.clone())
            .or_default()
            .insert(rule.key(), rule);
        Ok(())
    }

    async fn remove_repeatable(&self, queue: &str, cron: &str, job_id: &str) -> Result<bool> {
        Ok(self
            .rules
            .lock()
            .await
            .get_mut(queue)
            .and_then(|rules| rules.remove(&repeat_key(job_id, cron)))
            .is_some())
    }

    async fn list_repeatable(&self, queue: &str) -> Result<Vec<RepeatRule>> {
        Ok(self
            .rules
            .lock()
            .await
            .get(queue)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        self.ready
            .lock()
            .await
            .entry(job.queue.clone())
            .or_default()
            .push_back(job);
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        Ok(self
            .ready
            .lock()
            .await
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }

    async fn fire_due(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut all_rules = self.rules.lock().await;
        let Some(rules) = all_rules.get_mut(queue) else {
            return Ok(0);
        };

        let due: Vec<RepeatRule> = rules
            .values()
            .filter(|r| r.next_run_at <= now)
            .cloned()
            .collect();

        for rule in &due {
            self.enqueue(rule.occurrence()).await?;
            match rule.advanced(now) {
                Some(next) => {
                    rules.insert(next.key(), next);
                }
                None => {
                    rules.remove(&rule.key());
                }
            }
        }
        Ok(due.len())
    }
}
