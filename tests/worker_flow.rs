//! End-to-end worker flow: execution, retries, timeouts, hooks, shutdown.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nuvom::{
    JobFilter, JobStatus, JobValue, QueueBackend as _, RegisterMode, ResultBackend as _,
    TaskDefinition, TaskFailure, TaskFn, TaskRegistry, TimeoutPolicy,
};

use common::{add_task, memory_pool, memory_settings, wait_for_terminal};

#[tokio::test]
async fn happy_path_stores_result_and_single_attempt() {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(add_task(0), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), Arc::clone(&registry)).await;

    let job = add_task(0).make_job(vec![JobValue::Int(2), JobValue::Int(3)], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let results = pool.results();
    let record = wait_for_terminal(&results, &id).await;
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.result, Some(JobValue::Int(5)));
    assert_eq!(record.attempts.len(), 1);
    assert_eq!(results.get_result(&id).await.unwrap(), Some(JobValue::Int(5)));
    assert_eq!(results.get_error(&id).await.unwrap(), None);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn flaky_task_retries_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_task = Arc::clone(&calls);
    let flaky = TaskDefinition::builder(
        "flaky",
        TaskFn::arc(move |_args, _kwargs| {
            let calls = Arc::clone(&calls_in_task);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TaskFailure::new("RuntimeError", "first attempt fails"))
                } else {
                    Ok(JobValue::Str("ok".into()))
                }
            }
        }),
    )
    .retries(2)
    .retry_delay_secs(0)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(flaky.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = flaky.make_job(vec![], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let results = pool.results();
    let record = wait_for_terminal(&results, &id).await;
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.result, Some(JobValue::Str("ok".into())));
    assert_eq!(record.attempts.len(), 2);
    assert_eq!(record.attempts[0].outcome, "failed");
    assert!(record.attempts[0].traceback.is_some());
    assert_eq!(record.attempts[1].outcome, "success");

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_end_in_failed() {
    let always_fail = TaskDefinition::builder(
        "always_fail",
        TaskFn::arc(|_args, _kwargs| async move {
            Err::<JobValue, _>(TaskFailure::new("RuntimeError", "x"))
        }),
    )
    .retries(1)
    .retry_delay_secs(0)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(always_fail.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = always_fail.make_job(vec![], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let results = pool.results();
    let record = wait_for_terminal(&results, &id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts.len(), 2);
    assert_eq!(record.retries_left, 0);
    let error = record.error.unwrap();
    assert!(error.contains("RuntimeError"), "summary was {error}");
    assert_eq!(
        results.get_error(&id).await.unwrap().unwrap(),
        "RuntimeError: x"
    );
    assert_eq!(results.get_result(&id).await.unwrap(), None);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn timeout_with_retry_policy_spends_the_budget() {
    let slow = TaskDefinition::builder(
        "slow",
        TaskFn::arc(|_args, _kwargs| async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(JobValue::Null)
        }),
    )
    .retries(1)
    .retry_delay_secs(0)
    .timeout_secs(0.05)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(slow.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = slow
        .make_job(vec![], BTreeMap::new())
        .with_timeout_policy(TimeoutPolicy::Retry);
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let results = pool.results();
    let record = wait_for_terminal(&results, &id).await;
    assert_eq!(record.status, JobStatus::Timeout);
    assert_eq!(record.attempts.len(), 2);
    assert!(record.attempts.iter().all(|a| a.outcome == "timeout"));
    assert_eq!(record.retries_left, 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn timeout_fail_policy_is_terminal_on_first_attempt() {
    let slow = TaskDefinition::builder(
        "slow",
        TaskFn::arc(|_args, _kwargs| async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(JobValue::Null)
        }),
    )
    .retries(3)
    .timeout_secs(0.05)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(slow.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = slow
        .make_job(vec![], BTreeMap::new())
        .with_timeout_policy(TimeoutPolicy::Fail);
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let record = wait_for_terminal(&pool.results(), &id).await;
    assert_eq!(record.status, JobStatus::Timeout);
    assert_eq!(record.attempts.len(), 1);
    // Budget untouched: fail does not spend retries.
    assert_eq!(record.retries_left, 3);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn timeout_ignore_policy_acks_without_retry_or_traceback() {
    let slow = TaskDefinition::builder(
        "slow",
        TaskFn::arc(|_args, _kwargs| async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(JobValue::Null)
        }),
    )
    .retries(2)
    .timeout_secs(0.05)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(slow.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = slow
        .make_job(vec![], BTreeMap::new())
        .with_timeout_policy(TimeoutPolicy::Ignore);
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let record = wait_for_terminal(&pool.results(), &id).await;
    assert_eq!(record.status, JobStatus::Timeout);
    assert_eq!(record.attempts.len(), 1);
    assert!(record.traceback.is_none());
    // Nothing pending: ignore never requeues.
    assert_eq!(pool.queue().qsize().await.unwrap(), 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_task_is_terminal_failed() {
    let registry = Arc::new(TaskRegistry::new());
    let pool = memory_pool(memory_settings(), registry).await;

    let job = nuvom::Job::new("nowhere", vec![], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let record = wait_for_terminal(&pool.results(), &id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts.len(), 1);
    assert_eq!(record.attempts[0].outcome, "unknown_task");
    assert!(record.error.unwrap().contains("UnknownTask"));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn hooks_run_and_hook_errors_do_not_abort() {
    let before = Arc::new(AtomicU32::new(0));
    let after = Arc::new(AtomicU32::new(0));
    let on_error = Arc::new(AtomicU32::new(0));

    let b = Arc::clone(&before);
    let a = Arc::clone(&after);
    let e = Arc::clone(&on_error);

    let hooked = TaskDefinition::builder(
        "hooked",
        TaskFn::arc(|_args, _kwargs| async move { Ok(JobValue::Int(1)) }),
    )
    .before_job(Arc::new(move || {
        b.fetch_add(1, Ordering::SeqCst);
        Err("before hook deliberately fails".into())
    }))
    .after_job(Arc::new(move |result| {
        assert_eq!(result, &JobValue::Int(1));
        a.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
    .on_error(Arc::new(move |_failure| {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(hooked.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = hooked.make_job(vec![], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    let record = wait_for_terminal(&pool.results(), &id).await;
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(on_error.load(Ordering::SeqCst), 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn store_result_false_suppresses_persistence() {
    let quiet = TaskDefinition::builder(
        "quiet",
        TaskFn::arc(|_args, _kwargs| async move { Ok(JobValue::Int(9)) }),
    )
    .store_result(false)
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(quiet.clone(), RegisterMode::Strict)
        .unwrap();
    let pool = memory_pool(memory_settings(), registry).await;

    let job = quiet.make_job(vec![], BTreeMap::new());
    let id = job.id.clone();
    pool.submit(&job).await.unwrap();

    // Wait until the job has been fully processed (queue drained and no
    // in-flight work), then confirm nothing was written.
    for _ in 0..100 {
        let snap = pool.metrics_snapshot();
        if pool.queue().qsize().await.unwrap() == 0 && snap.inflight_jobs == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.results().get_full(&id).await.unwrap().is_none());

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_conserves_every_job() {
    let fast = TaskDefinition::builder(
        "fast",
        TaskFn::arc(|_args, _kwargs| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(JobValue::Null)
        }),
    )
    .build();

    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(fast.clone(), RegisterMode::Strict)
        .unwrap();

    let mut settings = memory_settings();
    settings.max_workers = 4;
    settings.batch_size = 4;
    let pool = memory_pool(settings, registry).await;

    let mut ids = Vec::new();
    for _ in 0..100 {
        let job = fast.make_job(vec![], BTreeMap::new());
        ids.push(job.id.clone());
        pool.submit(&job).await.unwrap();
    }

    // Let part of the batch run, then stop mid-flight.
    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.shutdown().await.unwrap();

    assert_eq!(pool.metrics_snapshot().inflight_jobs, 0);

    let results = pool.results();
    let terminal = results.list_jobs(&JobFilter::all()).await.unwrap().len();
    let pending = pool.queue().qsize().await.unwrap();
    assert_eq!(
        terminal + pending,
        100,
        "every job must be terminal or pending (terminal={terminal} pending={pending})"
    );
    assert!(terminal > 0, "some jobs should have completed before shutdown");
}

/// Result backend that is permanently unavailable.
struct FailingStore;

#[async_trait::async_trait]
impl nuvom::ResultBackend for FailingStore {
    async fn set_result(&self, _record: nuvom::JobRecord) -> Result<(), nuvom::BackendError> {
        Err(nuvom::BackendError::Unavailable {
            reason: "store down".into(),
        })
    }

    async fn set_error(&self, _record: nuvom::JobRecord) -> Result<(), nuvom::BackendError> {
        Err(nuvom::BackendError::Unavailable {
            reason: "store down".into(),
        })
    }

    async fn get_result(&self, _id: &str) -> Result<Option<JobValue>, nuvom::BackendError> {
        Ok(None)
    }

    async fn get_error(&self, _id: &str) -> Result<Option<String>, nuvom::BackendError> {
        Ok(None)
    }

    async fn get_full(&self, _id: &str) -> Result<Option<nuvom::JobRecord>, nuvom::BackendError> {
        Ok(None)
    }

    async fn list_jobs(
        &self,
        _filter: &JobFilter,
    ) -> Result<Vec<nuvom::JobRecord>, nuvom::BackendError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn unpersistable_terminal_record_keeps_the_job_visible() {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register(add_task(0), RegisterMode::Strict)
        .unwrap();

    let queue: nuvom::QueueRef = Arc::new(nuvom::MemoryQueue::new(0));
    let results: nuvom::ResultRef = Arc::new(FailingStore);
    let runner = nuvom::JobRunner::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        results,
        nuvom::Bus::new(16),
        0,
        Duration::from_secs(5),
    );

    let job = add_task(0).make_job(vec![JobValue::Int(1), JobValue::Int(2)], BTreeMap::new());
    queue.enqueue(&job).await.unwrap();
    let claimed = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
    runner.run(claimed).await;

    // The terminal record never landed, so the lease was released, not
    // acked: the job is visible again instead of silently disappearing.
    assert_eq!(queue.qsize().await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let registry = Arc::new(TaskRegistry::new());
    let pool = memory_pool(memory_settings(), registry).await;
    pool.shutdown().await.unwrap();
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_snapshot_reports_worker_count() {
    let registry = Arc::new(TaskRegistry::new());
    let mut settings = memory_settings();
    settings.max_workers = 3;
    let pool = memory_pool(settings, registry).await;

    let snap = pool.metrics_snapshot();
    assert_eq!(snap.worker_count, 3);
    assert_eq!(snap.inflight_jobs, 0);

    pool.shutdown().await.unwrap();
}
