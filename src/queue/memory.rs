//! # In-memory queue backend.
//!
//! A bounded FIFO guarded by a mutex with [`Notify`]-based wakeups. No
//! persistence; leases live in a side map so `ack`/`nack`/`requeue` behave
//! like the durable backends from the runner's point of view. Intended for
//! tests and single-process ephemeral use.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::error::BackendError;
use crate::job::Job;

use super::QueueBackend;

struct State {
    pending: VecDeque<Job>,
    inflight: HashMap<String, Job>,
}

struct Shared {
    state: Mutex<State>,
    /// Signaled when a job becomes available.
    items: Notify,
    /// Signaled when bounded capacity frees up.
    space: Notify,
    /// 0 = unbounded.
    capacity: usize,
}

/// FIFO queue held entirely in process memory.
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    /// Creates a queue bounded to `capacity` pending jobs (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    inflight: HashMap::new(),
                }),
                items: Notify::new(),
                space: Notify::new(),
                capacity,
            }),
        }
    }

    /// Number of leases currently held. Intended for tests.
    pub fn inflight_len(&self) -> usize {
        self.shared.state.lock().expect("memory queue poisoned").inflight.len()
    }

    fn push_visible(shared: &Shared, job: Job) {
        let mut state = shared.state.lock().expect("memory queue poisoned");
        state.pending.push_back(job);
        drop(state);
        shared.items.notify_one();
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), BackendError> {
        let mut job = job.clone();
        job.mark_enqueued();
        loop {
            // Register interest before checking so a concurrent dequeue's
            // notify is not lost.
            let space = self.shared.space.notified();
            {
                let mut state = self.shared.state.lock().expect("memory queue poisoned");
                if self.shared.capacity == 0 || state.pending.len() < self.shared.capacity {
                    state.pending.push_back(job);
                    drop(state);
                    self.shared.items.notify_one();
                    return Ok(());
                }
            }
            space.await;
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, BackendError> {
        let deadline = Instant::now() + timeout;
        loop {
            let items = self.shared.items.notified();
            {
                let mut state = self.shared.state.lock().expect("memory queue poisoned");
                if let Some(job) = state.pending.pop_front() {
                    state.inflight.insert(job.id.clone(), job.clone());
                    drop(state);
                    self.shared.space.notify_one();
                    return Ok(Some(job));
                }
            }
            if time::timeout_at(deadline, items).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn pop_batch(&self, max: usize) -> Result<Vec<Job>, BackendError> {
        let mut batch = Vec::new();
        let mut state = self.shared.state.lock().expect("memory queue poisoned");
        while batch.len() < max {
            match state.pending.pop_front() {
                Some(job) => {
                    state.inflight.insert(job.id.clone(), job.clone());
                    batch.push(job);
                }
                None => break,
            }
        }
        drop(state);
        for _ in 0..batch.len() {
            self.shared.space.notify_one();
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), BackendError> {
        self.shared
            .state
            .lock()
            .expect("memory queue poisoned")
            .inflight
            .remove(id);
        Ok(())
    }

    async fn nack(&self, id: &str, requeue_delay: Duration) -> Result<(), BackendError> {
        let job = self
            .shared
            .state
            .lock()
            .expect("memory queue poisoned")
            .inflight
            .remove(id);
        if let Some(job) = job {
            self.requeue(&job, requeue_delay).await?;
        }
        Ok(())
    }

    async fn requeue(&self, job: &Job, requeue_delay: Duration) -> Result<(), BackendError> {
        self.shared
            .state
            .lock()
            .expect("memory queue poisoned")
            .inflight
            .remove(&job.id);
        if requeue_delay.is_zero() {
            Self::push_visible(&self.shared, job.clone());
        } else {
            let shared = Arc::clone(&self.shared);
            let job = job.clone();
            tokio::spawn(async move {
                time::sleep(requeue_delay).await;
                Self::push_visible(&shared, job);
            });
        }
        Ok(())
    }

    async fn qsize(&self) -> Result<usize, BackendError> {
        Ok(self.shared.state.lock().expect("memory queue poisoned").pending.len())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock().expect("memory queue poisoned");
        state.pending.clear();
        state.inflight.clear();
        drop(state);
        self.shared.space.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobValue;
    use std::collections::BTreeMap;

    fn job(n: i64) -> Job {
        Job::new("t", vec![JobValue::Int(n)], BTreeMap::new())
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let q = MemoryQueue::new(0);
        for n in 0..5 {
            q.enqueue(&job(n)).await.unwrap();
        }
        for n in 0..5 {
            let got = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
            assert_eq!(got.args[0], JobValue::Int(n));
        }
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let q = MemoryQueue::new(0);
        let got = q.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn pop_batch_claims_up_to_max() {
        let q = MemoryQueue::new(0);
        for n in 0..3 {
            q.enqueue(&job(n)).await.unwrap();
        }
        let batch = q.pop_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(q.qsize().await.unwrap(), 1);
        assert_eq!(q.inflight_len(), 2);
    }

    #[tokio::test]
    async fn nack_makes_the_job_visible_again() {
        let q = MemoryQueue::new(0);
        let j = job(1);
        q.enqueue(&j).await.unwrap();
        let got = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(q.qsize().await.unwrap(), 0);
        q.nack(&got.id, Duration::ZERO).await.unwrap();
        assert_eq!(q.qsize().await.unwrap(), 1);
        assert_eq!(q.inflight_len(), 0);
    }

    #[tokio::test]
    async fn requeue_replaces_the_payload() {
        let q = MemoryQueue::new(0);
        let mut j = job(1).with_retries(2);
        q.enqueue(&j).await.unwrap();
        let got = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        j = got;
        j.consume_retry();
        q.requeue(&j, Duration::ZERO).await.unwrap();
        let back = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(back.retries_left, 1);
    }

    #[tokio::test]
    async fn bounded_enqueue_waits_for_space() {
        let q = Arc::new(MemoryQueue::new(1));
        q.enqueue(&job(1)).await.unwrap();

        let q2 = Arc::clone(&q);
        let pusher = tokio::spawn(async move { q2.enqueue(&job(2)).await });

        time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        let _ = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        pusher.await.unwrap().unwrap();
        assert_eq!(q.qsize().await.unwrap(), 1);
    }
}
