//! # In-memory result backend.
//!
//! A `RwLock`-guarded map. No persistence; intended for tests and
//! single-process ephemeral use.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::job::{JobStatus, JobValue};

use super::{order_and_limit, JobFilter, JobRecord, ResultBackend};

/// Terminal-record store held entirely in process memory.
#[derive(Default)]
pub struct MemoryResultBackend {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryResultBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, record: JobRecord) {
        let mut records = self.records.write().expect("result store poisoned");
        // First terminal write wins.
        records.entry(record.id.clone()).or_insert(record);
    }
}

#[async_trait]
impl ResultBackend for MemoryResultBackend {
    async fn set_result(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record);
        Ok(())
    }

    async fn set_error(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record);
        Ok(())
    }

    async fn get_result(&self, id: &str) -> Result<Option<JobValue>, BackendError> {
        let records = self.records.read().expect("result store poisoned");
        Ok(records
            .get(id)
            .filter(|r| r.status == JobStatus::Success)
            .and_then(|r| r.result.clone()))
    }

    async fn get_error(&self, id: &str) -> Result<Option<String>, BackendError> {
        let records = self.records.read().expect("result store poisoned");
        Ok(records
            .get(id)
            .filter(|r| r.status != JobStatus::Success)
            .and_then(|r| r.error.clone()))
    }

    async fn get_full(&self, id: &str) -> Result<Option<JobRecord>, BackendError> {
        let records = self.records.read().expect("result store poisoned");
        Ok(records.get(id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, BackendError> {
        let records = self.records.read().expect("result store poisoned");
        let matching: Vec<JobRecord> = records
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        Ok(order_and_limit(matching, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use std::collections::BTreeMap;

    fn success_record(id: &str, finished_at: i64) -> JobRecord {
        let mut job = Job::new("t", vec![], BTreeMap::new());
        job.id = id.to_owned();
        job.mark_running();
        job.mark_success();
        let mut rec = JobRecord::success(&job, JobValue::Int(1));
        rec.finished_at = Some(finished_at);
        rec
    }

    fn failed_record(id: &str, finished_at: i64) -> JobRecord {
        let mut job = Job::new("t", vec![], BTreeMap::new());
        job.id = id.to_owned();
        job.mark_running();
        job.mark_failed();
        let mut rec = JobRecord::failure(&job, "RuntimeError: x", Some("tb".into()));
        rec.finished_at = Some(finished_at);
        rec
    }

    #[tokio::test]
    async fn result_and_error_are_keyed_by_status() {
        let store = MemoryResultBackend::new();
        store.set_result(success_record("a", 10)).await.unwrap();
        store.set_error(failed_record("b", 11)).await.unwrap();

        assert_eq!(store.get_result("a").await.unwrap(), Some(JobValue::Int(1)));
        assert_eq!(store.get_error("a").await.unwrap(), None);
        assert_eq!(store.get_result("b").await.unwrap(), None);
        assert_eq!(
            store.get_error("b").await.unwrap(),
            Some("RuntimeError: x".to_owned())
        );
    }

    #[tokio::test]
    async fn first_terminal_write_wins() {
        let store = MemoryResultBackend::new();
        store.set_result(success_record("a", 10)).await.unwrap();
        store.set_error(failed_record("a", 99)).await.unwrap();
        let full = store.get_full("a").await.unwrap().unwrap();
        assert_eq!(full.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn list_is_newest_first_with_filter_and_limit() {
        let store = MemoryResultBackend::new();
        store.set_result(success_record("a", 10)).await.unwrap();
        store.set_result(success_record("b", 30)).await.unwrap();
        store.set_error(failed_record("c", 20)).await.unwrap();

        let all = store.list_jobs(&JobFilter::all()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let failed = store
            .list_jobs(&JobFilter::all().with_status(JobStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "c");

        let limited = store
            .list_jobs(&JobFilter::all().with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "b");
    }
}
