//! Periodic background cleanup of every enabled namespace

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::CacheRegistry;

pub struct CleanupScheduler;

/// Handle to a running scheduler; stop it before shutdown
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Spawn the cleanup loop. The first pass runs one `interval` after start.
    pub fn start(registry: Arc<CacheRegistry>, interval: Duration) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "cache cleanup scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let summary = registry.cleanup().await;
                        let expired: usize = summary.namespaces.values().map(|r| r.expired_count).sum();
                        let evicted: usize = summary.namespaces.values().map(|r| r.evicted_count).sum();
                        tracing::info!(
                            expired,
                            evicted,
                            failed_namespaces = summary.errors.len(),
                            "scheduled cache cleanup finished"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        // A dropped sender also means shutdown.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("cache cleanup scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

impl SchedulerHandle {
    /// Signal the loop to exit and wait for it. A cleanup pass already in
    /// progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "cache cleanup scheduler task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{CacheEntry, CacheValue, Namespace, ToolRecord};
    use crate::config::CacheConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scheduler_runs_cleanup_and_stops() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = Arc::new(CacheRegistry::new(&config));

        let mut stale = CacheEntry::new(
            "stale",
            CacheValue::Tool(ToolRecord {
                tool: "bash".into(),
                output: "old".into(),
            }),
            1,
        );
        stale.created_at = chrono::Utc::now() - chrono::Duration::seconds(30);
        let disk = registry.namespace(Namespace::Tool).disk();
        disk.store(&stale).unwrap();
        assert_eq!(disk.len().unwrap(), 1);

        let handle = CleanupScheduler::start(Arc::clone(&registry), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(disk.len().unwrap(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = Arc::new(CacheRegistry::new(&config));
        let handle = CleanupScheduler::start(registry, Duration::from_secs(3600));
        assert!(!handle.is_finished());
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("scheduler should stop promptly");
    }
}
