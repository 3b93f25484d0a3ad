//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nuvom::{
    JobRecord, JobValue, PluginDescriptor, ResultBackend as _, ResultRef, Settings,
    TaskDefinition, TaskFailure, TaskFn, TaskRegistry, WorkerPool, WorkerPoolBuilder,
};

/// Settings wired to the in-memory backends, tuned for fast tests.
pub fn memory_settings() -> Settings {
    let mut settings = Settings::default();
    settings.queue_backend = "memory".into();
    settings.result_backend = "memory".into();
    settings.max_workers = 1;
    settings.batch_size = 4;
    settings.job_timeout_secs = 5;
    settings.shutdown_grace_secs = 5;
    settings
}

/// Builds a running pool over the given registry with an empty plugin
/// descriptor (tests never read the well-known descriptor path).
pub async fn memory_pool(settings: Settings, registry: Arc<TaskRegistry>) -> WorkerPool {
    WorkerPoolBuilder::new(settings)
        .registry(registry)
        .descriptor(PluginDescriptor::default())
        .build()
        .await
        .expect("pool builds")
}

/// An `add(x, y)` task definition.
pub fn add_task(retries: u32) -> TaskDefinition {
    TaskDefinition::builder(
        "add",
        TaskFn::arc(|args: Vec<JobValue>, _kwargs: BTreeMap<String, JobValue>| async move {
            let x = args
                .first()
                .and_then(|v| v.as_int())
                .ok_or_else(|| TaskFailure::new("TypeError", "x must be an int"))?;
            let y = args
                .get(1)
                .and_then(|v| v.as_int())
                .ok_or_else(|| TaskFailure::new("TypeError", "y must be an int"))?;
            Ok(JobValue::Int(x + y))
        }),
    )
    .retries(retries)
    .build()
}

/// Polls the result backend until `id` has a terminal record.
pub async fn wait_for_terminal(results: &ResultRef, id: &str) -> JobRecord {
    for _ in 0..100 {
        if let Some(record) = results.get_full(id).await.expect("get_full") {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {id} did not reach a terminal record in time");
}
