//! Delayed-set promotion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use swarm_core::{JobQueue, Result};

/// Moves due entries from the delayed set onto the ready FIFO.
///
/// Never reads or writes job state. The tick interval bounds the extra
/// latency a retry sees beyond its computed delay.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, tick_interval: Duration) -> Self {
        Self {
            queue,
            tick_interval: tick_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// One promotion step. Returns how many ids moved.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let promoted = self.queue.promote_due(now).await?;
        if !promoted.is_empty() {
            debug!(
                subsystem = "scheduler",
                promoted = promoted.len(),
                "Promoted delayed jobs"
            );
        }
        Ok(promoted.len())
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            subsystem = "scheduler",
            tick_ms = self.tick_interval.as_millis() as u64,
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(subsystem = "scheduler", error = %e, "Promotion failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(subsystem = "scheduler", "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::QueueLocation;
    use swarm_db::MemoryJobQueue;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_tick_promotes_only_due() {
        let queue = MemoryJobQueue::arc();
        let scheduler = Scheduler::new(queue.clone(), Duration::from_secs(1));
        let now = Utc::now();
        let due = Uuid::new_v4();
        let later = Uuid::new_v4();
        queue.schedule(due, now).await.unwrap();
        queue.schedule(later, now + chrono::Duration::seconds(30)).await.unwrap();

        assert_eq!(scheduler.tick(now).await.unwrap(), 1);
        assert_eq!(queue.location(due).await.unwrap(), Some(QueueLocation::Ready));
        assert_eq!(queue.location(later).await.unwrap(), Some(QueueLocation::Delayed));

        assert_eq!(
            scheduler
                .tick(now + chrono::Duration::seconds(31))
                .await
                .unwrap(),
            1
        );
        assert_eq!(queue.location(later).await.unwrap(), Some(QueueLocation::Ready));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let scheduler = Scheduler::new(MemoryJobQueue::arc(), Duration::ZERO);
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_run_promotes_and_stops_on_shutdown() {
        let queue = MemoryJobQueue::arc();
        let id = Uuid::new_v4();
        queue
            .schedule(id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Scheduler::new(queue.clone(), Duration::from_millis(10)).run(rx));

        let mut promoted = false;
        for _ in 0..100 {
            if queue.location(id).await.unwrap() == Some(QueueLocation::Ready) {
                promoted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(promoted, "scheduler never promoted the due job");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }
}
