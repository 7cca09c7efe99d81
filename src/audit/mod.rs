//! Run log
//!
//! Every finished agent run is kept in memory for inspection, together with
//! a fingerprint of the SQL it executed so repeated misnaming by the model
//! can be grouped offline.

use crate::models::{AgentRun, UserId};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_RUN_LOG_CAPACITY: usize = 1_000;

struct Inner {
    runs: HashMap<Uuid, AgentRun>,
    // insertion order, oldest first
    order: VecDeque<Uuid>,
}

/// Bounded store of finished runs; the oldest run is evicted first.
#[derive(Clone)]
pub struct RunLog {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
}

impl RunLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RUN_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                runs: HashMap::new(),
                order: VecDeque::new(),
            })),
            capacity: capacity.max(1),
        }
    }

    /// Store a finished run
    pub async fn record(&self, run: AgentRun) -> Result<Uuid> {
        let run_id = run.run_id;
        let mut inner = self.inner.write().await;

        if inner.runs.insert(run_id, run).is_none() {
            inner.order.push_back(run_id);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.runs.remove(&oldest);
            }
        }

        Ok(run_id)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<AgentRun>> {
        let inner = self.inner.read().await;
        Ok(inner.runs.get(&run_id).cloned())
    }

    /// Run ids for a user, oldest first
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;

        let mut items: Vec<_> = inner
            .runs
            .values()
            .filter(|run| run.user_id == user_id)
            .map(|run| (run.run_id, run.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Number of stored runs per SQL fingerprint, most frequent first.
    pub async fn fingerprint_counts(&self) -> Vec<(String, usize)> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for fingerprint in inner.runs.values().filter_map(|r| r.sql_fingerprint.as_deref()) {
            *counts.entry(fingerprint).or_default() += 1;
        }

        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(fingerprint, n)| (fingerprint.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.runs.len()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the SQL with whitespace runs collapsed, so layout changes do
/// not split otherwise identical queries.
pub fn sql_fingerprint(sql: &str) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in sql.split_whitespace().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
