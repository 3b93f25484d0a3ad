//! # File-based result backend.
//!
//! One record per job id under the store root: `<root>/<id>.res`, a single
//! bincode-encoded [`JobRecord`]. Writes go through a tmp file and an
//! atomic rename; since records are only written at terminal transitions,
//! an existing file means the record is immutable and later writes are
//! skipped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bincode::config::{self, Configuration};

use crate::error::{BackendError, CodecError};
use crate::fsutil::{fsync_dir, write_atomic};
use crate::job::{JobStatus, JobValue};

use super::{order_and_limit, JobFilter, JobRecord, ResultBackend};

/// Record file extension.
const RES_EXT: &str = "res";

/// Terminal-record store with one file per job.
pub struct FileResultBackend {
    root: PathBuf,
    cfg: Configuration,
}

impl FileResultBackend {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cfg: config::standard(),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{RES_EXT}"))
    }

    fn encode(&self, record: &JobRecord) -> Result<Vec<u8>, BackendError> {
        bincode::serde::encode_to_vec(record, self.cfg).map_err(|e| {
            BackendError::Codec(CodecError::Unencodable {
                reason: e.to_string(),
            })
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<JobRecord, BackendError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, self.cfg).map_err(|e| {
            BackendError::Codec(CodecError::Corrupt {
                reason: e.to_string(),
            })
        })?;
        Ok(record)
    }

    async fn store(&self, record: JobRecord) -> Result<(), BackendError> {
        let path = self.path_for(&record.id);
        // Records are written once, at the terminal transition; an existing
        // file is the earlier winner.
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        let bytes = self.encode(&record)?;
        write_atomic(&path, &bytes).await?;
        fsync_dir(&self.root);
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<JobRecord>, BackendError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match self.decode(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log::error!("corrupt result record {}: {e}", path.display());
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ResultBackend for FileResultBackend {
    async fn set_result(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record).await
    }

    async fn set_error(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record).await
    }

    async fn get_result(&self, id: &str) -> Result<Option<JobValue>, BackendError> {
        Ok(self
            .load(&self.path_for(id))
            .await?
            .filter(|r| r.status == JobStatus::Success)
            .and_then(|r| r.result))
    }

    async fn get_error(&self, id: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .load(&self.path_for(id))
            .await?
            .filter(|r| r.status != JobStatus::Success)
            .and_then(|r| r.error))
    }

    async fn get_full(&self, id: &str) -> Result<Option<JobRecord>, BackendError> {
        self.load(&self.path_for(id)).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, BackendError> {
        let mut matching = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RES_EXT) {
                continue;
            }
            if let Some(record) = self.load(&path).await? {
                if filter.status.map_or(true, |s| record.status == s) {
                    matching.push(record);
                }
            }
        }
        Ok(order_and_limit(matching, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use std::collections::BTreeMap;

    fn terminal_job(id: &str) -> Job {
        let mut job = Job::new("t", vec![], BTreeMap::new());
        job.id = id.to_owned();
        job.mark_running();
        job
    }

    #[tokio::test]
    async fn success_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultBackend::open(dir.path()).unwrap();

        let mut job = terminal_job("j1");
        job.mark_success();
        store
            .set_result(JobRecord::success(&job, JobValue::Str("ok".into())))
            .await
            .unwrap();

        assert_eq!(
            store.get_result("j1").await.unwrap(),
            Some(JobValue::Str("ok".into()))
        );
        assert_eq!(store.get_error("j1").await.unwrap(), None);
        let full = store.get_full("j1").await.unwrap().unwrap();
        assert_eq!(full.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn existing_record_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultBackend::open(dir.path()).unwrap();

        let mut job = terminal_job("j1");
        job.mark_failed();
        store
            .set_error(JobRecord::failure(&job, "RuntimeError: x", Some("tb".into())))
            .await
            .unwrap();
        store
            .set_result(JobRecord::success(&job, JobValue::Int(1)))
            .await
            .unwrap();

        let full = store.get_full("j1").await.unwrap().unwrap();
        assert_eq!(full.status, JobStatus::Failed);
        assert_eq!(full.error.as_deref(), Some("RuntimeError: x"));
        assert_eq!(full.traceback.as_deref(), Some("tb"));
    }

    #[tokio::test]
    async fn missing_and_corrupt_records_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultBackend::open(dir.path()).unwrap();
        assert!(store.get_full("nope").await.unwrap().is_none());

        std::fs::write(dir.path().join("bad.res"), b"not a record").unwrap();
        assert!(store.get_full("bad").await.unwrap().is_none());
        // A corrupt record must not break listing.
        assert!(store.list_jobs(&JobFilter::all()).await.unwrap().is_empty());
    }
}
