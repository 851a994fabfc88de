//! In-memory job store and queue.
//!
//! Intended for tests, development, and single-process deployments that can
//! afford to lose state on restart. Both structures of the queue live behind
//! one mutex so moves between them are atomic.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use swarm_core::{
    new_v7, CreateJobRequest, Error, Job, JobQueue, JobStats, JobStatus, JobStore, JobUpdate,
    QueueDepth, QueueLocation, Result,
};

fn poisoned<T>(_: T) -> Error {
    Error::Internal("lock poisoned".to_string())
}

// =============================================================================
// JOB STORE
// =============================================================================

/// In-memory implementation of [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, request: &CreateJobRequest) -> Result<Uuid> {
        let id = new_v7();
        let job = Job::from_request(id, request, Utc::now());
        self.jobs.write().map_err(poisoned)?.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;

        if job.status.is_terminal() || !expected.contains(&job.status) {
            trace!(job_id = %id, current = %job.status, target = %update.status, "CAS rejected");
            return Ok(false);
        }

        job.apply(&update, Utc::now());
        Ok(true)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut recent: Vec<Job> = jobs.values().cloned().collect();
        // UUIDv7 ids break created_at ties in submission order.
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }

    async fn stats(&self) -> Result<JobStats> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status);
        }
        Ok(stats)
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
        });
        let removed = (before - jobs.len()) as u64;
        if removed > 0 {
            debug!(removed, %cutoff, "Pruned terminal jobs");
        }
        Ok(removed)
    }
}

// =============================================================================
// QUEUE
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready,
    Delayed(DateTime<Utc>),
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Uuid>,
    delayed: BTreeSet<(DateTime<Utc>, Uuid)>,
    index: HashMap<Uuid, Slot>,
}

impl QueueState {
    fn take(&mut self, id: Uuid) -> Option<Slot> {
        let slot = self.index.remove(&id)?;
        match slot {
            Slot::Ready => self.ready.retain(|queued| *queued != id),
            Slot::Delayed(at) => {
                self.delayed.remove(&(at, id));
            }
        }
        Some(slot)
    }

    /// Returns false when the id was already ready.
    fn push_ready(&mut self, id: Uuid) -> bool {
        if matches!(self.index.get(&id), Some(Slot::Ready)) {
            return false;
        }
        self.take(id);
        self.ready.push_back(id);
        self.index.insert(id, Slot::Ready);
        true
    }

    fn pop_ready(&mut self) -> Option<Uuid> {
        let id = self.ready.pop_front()?;
        self.index.remove(&id);
        Some(id)
    }

    fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut due = Vec::new();
        while let Some(&(at, id)) = self.delayed.first() {
            if at > now {
                break;
            }
            self.delayed.pop_first();
            self.index.remove(&id);
            due.push(id);
        }
        due
    }
}

/// In-memory implementation of [`JobQueue`].
///
/// `pop_blocking` parks on a [`Notify`]; every push stores a wake permit, so
/// a push that lands between the emptiness check and the wait is not lost.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn try_pop(&self) -> Result<Option<Uuid>> {
        Ok(self.state.lock().map_err(poisoned)?.pop_ready())
    }

    fn wake(&self, count: usize) {
        for _ in 0..count {
            self.notify.notify_one();
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, id: Uuid) -> Result<()> {
        let added = self.state.lock().map_err(poisoned)?.push_ready(id);
        if added {
            self.wake(1);
        }
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.try_pop()? {
                return Ok(Some(id));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.take(id);
        state.delayed.insert((at, id));
        state.index.insert(id, Slot::Delayed(at));
        Ok(())
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self.state.lock().map_err(poisoned)?.drain_due(now))
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let due = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let due = state.drain_due(now);
            for id in &due {
                state.push_ready(*id);
            }
            due
        };
        if !due.is_empty() {
            debug!(promoted = due.len(), "Promoted due jobs");
            self.wake(due.len());
        }
        Ok(due)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.lock().map_err(poisoned)?.take(id).is_some())
    }

    async fn location(&self, id: Uuid) -> Result<Option<QueueLocation>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.index.get(&id).map(|slot| match slot {
            Slot::Ready => QueueLocation::Ready,
            Slot::Delayed(_) => QueueLocation::Delayed,
        }))
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(QueueDepth {
            ready: state.ready.len() as i64,
            delayed: state.delayed.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::{JobError, Record};

    fn request() -> CreateJobRequest {
        CreateJobRequest::new("climate change", 5)
    }

    // ========== STORE ==========

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryJobStore::new();
        let id = store.create(&request()).await.unwrap();
        let job = store.get(id).await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.query, "climate change");
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let store = MemoryJobStore::new();
        let a = store.create(&request()).await.unwrap();
        let b = store.create(&request()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cas_unknown_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .compare_and_set(Uuid::new_v4(), &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cas_status_mismatch_has_no_effect() {
        let store = MemoryJobStore::new();
        let id = store.create(&request()).await.unwrap();

        let applied = store
            .compare_and_set(id, &[JobStatus::Running], JobUpdate::succeeded(vec![]))
            .await
            .unwrap();
        assert!(!applied);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_second_claim_fails() {
        let store = MemoryJobStore::new();
        let id = store.create(&request()).await.unwrap();

        assert!(store
            .compare_and_set(id, &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
            .unwrap());
        assert!(!store
            .compare_and_set(id, &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
            .unwrap());
        assert_eq!(store.get(id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_terminal_jobs_reject_every_cas() {
        let store = MemoryJobStore::new();
        let id = store.create(&request()).await.unwrap();
        store
            .compare_and_set(id, &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
            .unwrap();
        store
            .compare_and_set(
                id,
                &[JobStatus::Running],
                JobUpdate::succeeded(vec![Record::new("v1", "one")]),
            )
            .await
            .unwrap();

        for expected in JobStatus::ALL {
            let applied = store
                .compare_and_set(id, &[expected], JobUpdate::failed(JobError::internal()))
                .await
                .unwrap();
            assert!(!applied, "terminal job accepted CAS with {:?}", expected);
        }
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = MemoryJobStore::new();
        let first = store.create(&request()).await.unwrap();
        let second = store.create(&request()).await.unwrap();
        let third = store.create(&request()).await.unwrap();

        let recent = store.list_recent(2).await.unwrap();
        let ids: Vec<Uuid> = recent.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![third, second]);
        assert!(!ids.contains(&first));
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let store = MemoryJobStore::new();
        let a = store.create(&request()).await.unwrap();
        store.create(&request()).await.unwrap();
        store
            .compare_and_set(a, &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total(), 2);
    }

    #[tokio::test]
    async fn test_prune_terminal_keeps_active_and_recent() {
        let store = MemoryJobStore::new();
        let done = store.create(&request()).await.unwrap();
        let active = store.create(&request()).await.unwrap();
        store
            .compare_and_set(done, &JobStatus::CLAIMABLE, JobUpdate::failed(JobError::cancelled()))
            .await
            .unwrap();

        // Cutoff in the past keeps everything.
        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.prune_terminal(past).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.prune_terminal(future).await.unwrap(), 1);
        assert!(store.get(done).await.unwrap_err().is_not_found());
        assert_eq!(store.get(active).await.unwrap().status, JobStatus::Pending);
    }

    // ========== QUEUE ==========

    #[tokio::test]
    async fn test_ready_is_fifo() {
        let queue = MemoryJobQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.push(*id).await.unwrap();
        }
        for id in &ids {
            let popped = queue.pop_blocking(Duration::from_millis(10)).await.unwrap();
            assert_eq!(popped, Some(*id));
        }
    }

    #[tokio::test]
    async fn test_duplicate_push_is_ignored() {
        let queue = MemoryJobQueue::new();
        let id = Uuid::new_v4();
        queue.push(id).await.unwrap();
        queue.push(id).await.unwrap();
        assert_eq!(queue.depth().await.unwrap().ready, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_blocking_times_out_when_empty() {
        let queue = MemoryJobQueue::new();
        let started = Instant::now();
        let popped = queue.pop_blocking(Duration::from_secs(5)).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pop_blocking_wakes_on_push() {
        let queue = MemoryJobQueue::arc();
        let id = Uuid::new_v4();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_blocking(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(id).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake before its own timeout")
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(id));
    }

    #[tokio::test]
    async fn test_pop_due_only_returns_due_entries_in_order() {
        let queue = MemoryJobQueue::new();
        let now = Utc::now();
        let early = Uuid::new_v4();
        let later = Uuid::new_v4();
        let future = Uuid::new_v4();
        queue.schedule(later, now - chrono::Duration::seconds(1)).await.unwrap();
        queue.schedule(early, now - chrono::Duration::seconds(5)).await.unwrap();
        queue.schedule(future, now + chrono::Duration::seconds(60)).await.unwrap();

        let due = queue.pop_due(now).await.unwrap();
        assert_eq!(due, vec![early, later]);
        assert_eq!(queue.location(future).await.unwrap(), Some(QueueLocation::Delayed));
        assert!(queue.pop_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pop_due_includes_entry_due_exactly_now() {
        let queue = MemoryJobQueue::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        queue.schedule(id, now).await.unwrap();
        assert_eq!(queue.pop_due(now).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_schedule_and_push_keep_single_location() {
        let queue = MemoryJobQueue::new();
        let id = Uuid::new_v4();

        queue.push(id).await.unwrap();
        queue.schedule(id, Utc::now()).await.unwrap();
        assert_eq!(queue.location(id).await.unwrap(), Some(QueueLocation::Delayed));
        assert_eq!(queue.depth().await.unwrap(), QueueDepth { ready: 0, delayed: 1 });

        queue.push(id).await.unwrap();
        assert_eq!(queue.location(id).await.unwrap(), Some(QueueLocation::Ready));
        assert_eq!(queue.depth().await.unwrap(), QueueDepth { ready: 1, delayed: 0 });
    }

    #[tokio::test]
    async fn test_promote_due_moves_atomically() {
        let queue = MemoryJobQueue::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        queue.schedule(id, now - chrono::Duration::milliseconds(1)).await.unwrap();

        let promoted = queue.promote_due(now).await.unwrap();
        assert_eq!(promoted, vec![id]);
        assert_eq!(queue.location(id).await.unwrap(), Some(QueueLocation::Ready));
        assert_eq!(
            queue.pop_blocking(Duration::from_millis(10)).await.unwrap(),
            Some(id)
        );
    }

    #[tokio::test]
    async fn test_concurrent_pop_due_never_double_delivers() {
        let queue = MemoryJobQueue::arc();
        let now = Utc::now();
        let ids: Vec<Uuid> = (0..200).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.schedule(*id, now - chrono::Duration::seconds(1)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.pop_due(now).await.unwrap() }));
        }
        let mut delivered = Vec::new();
        for handle in handles {
            delivered.extend(handle.await.unwrap());
        }
        delivered.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn test_remove_drops_from_either_structure() {
        let queue = MemoryJobQueue::new();
        let ready = Uuid::new_v4();
        let delayed = Uuid::new_v4();
        queue.push(ready).await.unwrap();
        queue.schedule(delayed, Utc::now()).await.unwrap();

        assert!(queue.remove(ready).await.unwrap());
        assert!(queue.remove(delayed).await.unwrap());
        assert!(!queue.remove(ready).await.unwrap());
        assert_eq!(queue.depth().await.unwrap(), QueueDepth::default());
    }
}
