use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use super::model::JobId;

/// Highest value a job can report before its output is committed.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, Copy)]
struct Entry {
    pct: u8,
    finished_at: Option<Instant>,
}

/// In-memory job progress, 0 to 100 per job.
///
/// Values only ever move forward. Entries of finished jobs stay readable
/// for a grace period so the last poll still sees the final value.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<JobId, Entry>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, job_id: JobId) {
        self.entries.write().await.entry(job_id).or_insert(Entry {
            pct: 0,
            finished_at: None,
        });
    }

    /// Record a running value. Smaller values and writes after
    /// `finish` are ignored.
    pub async fn set(&self, job_id: JobId, pct: f64) {
        let pct = clamp_pct(pct).min(MAX_RUNNING_PROGRESS);
        let mut entries = self.entries.write().await;
        let entry = entries.entry(job_id).or_insert(Entry {
            pct: 0,
            finished_at: None,
        });
        if entry.finished_at.is_none() && pct > entry.pct {
            entry.pct = pct;
        }
    }

    pub async fn get(&self, job_id: JobId) -> Option<u8> {
        self.entries.read().await.get(&job_id).map(|e| e.pct)
    }

    pub async fn finish(&self, job_id: JobId, succeeded: bool) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(job_id).or_insert(Entry {
            pct: 0,
            finished_at: None,
        });
        if succeeded {
            entry.pct = 100;
        }
        entry.finished_at.get_or_insert_with(Instant::now);
    }

    /// Drop entries whose job finished more than `grace` ago.
    pub async fn evict_expired(&self, grace: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| match e.finished_at {
            Some(at) => at.elapsed() < grace,
            None => true,
        });
        before - entries.len()
    }
}

fn clamp_pct(pct: f64) -> u8 {
    if pct.is_nan() {
        return 0;
    }
    pct.clamp(0.0, 100.0).floor() as u8
}

/// Handle given to an encoder so it can publish progress for one job.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tracker: Arc<ProgressTracker>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<ProgressTracker>, job_id: JobId) -> Self {
        Self { tracker, job_id }
    }

    pub async fn report(&self, pct: f64) {
        self.tracker.set(self.job_id, pct).await;
    }
}

/// Periodically evict finished entries.
pub fn spawn_sweeper(tracker: Arc<ProgressTracker>, grace: Duration) -> tokio::task::JoinHandle<()> {
    let period = (grace / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = tracker.evict_expired(grace).await;
            if evicted > 0 {
                debug!(evicted, "Evicted finished progress entries");
            }
        }
    })
}
