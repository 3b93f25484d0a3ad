//! # File-backed queue: one atomic file per pending job.
//!
//! Layout under the queue root:
//! ```text
//! <root>/pending/<visible_ns>-<id>.rec            jobs waiting for dequeue
//! <root>/inflight/<claimed_ns>-<visible_ns>-<id>.rec   leased jobs
//! <root>/<name>.rec.corrupt                       quarantined records
//! ```
//!
//! The pending filename's 20-digit zero-padded nanosecond prefix makes
//! lexicographic order equal arrival order *and* encodes visibility: fresh
//! enqueues use the enqueue timestamp, delayed requeues use `now + delay`,
//! and dequeue skips names still in the future. Every mutation is an atomic
//! rename (claim, ack, nack, quarantine), with the directory fsynced on
//! platforms that support it.
//!
//! ## Rules
//! - A dequeue claims the smallest visible pending name by renaming it into
//!   `inflight/`; rename failure means another worker won the race.
//! - Records that fail to decode are renamed to `*.corrupt` at the root and
//!   reported through `log`; the queue keeps going.
//! - A lease whose `claimed_ns` is older than the visibility timeout is
//!   returned to pending with its original name (`retries_left` untouched)
//!   by [`reclaim_expired`](super::QueueBackend::reclaim_expired).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::codec::CodecRef;
use crate::error::BackendError;
use crate::fsutil::{fsync_dir, write_atomic};
use crate::job::{now_ns, Job};

use super::QueueBackend;

/// Record file extension.
const REC_EXT: &str = ".rec";
/// Polling interval while a blocking dequeue waits for work.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Persistent queue storing each job as a single file.
pub struct FileQueue {
    pending: PathBuf,
    inflight: PathBuf,
    root: PathBuf,
    codec: CodecRef,
    visibility_timeout: Duration,
    /// Serializes claim scans within this process; cross-process safety
    /// comes from rename atomicity.
    scan: Mutex<()>,
    /// Fast path from job id to its inflight filename. Misses fall back to
    /// a directory scan (leases inherited from a previous process).
    index: StdMutex<HashMap<String, String>>,
}

impl FileQueue {
    /// Opens (and creates if needed) a queue rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        codec: CodecRef,
        visibility_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let root = root.into();
        let pending = root.join("pending");
        let inflight = root.join("inflight");
        std::fs::create_dir_all(&pending)?;
        std::fs::create_dir_all(&inflight)?;
        Ok(Self {
            pending,
            inflight,
            root,
            codec,
            visibility_timeout,
            scan: Mutex::new(()),
            index: StdMutex::new(HashMap::new()),
        })
    }

    fn pending_name(visible_ns: i64, id: &str) -> String {
        format!("{visible_ns:020}-{id}{REC_EXT}")
    }

    fn inflight_name(claimed_ns: i64, pending_name: &str) -> String {
        format!("{claimed_ns:020}-{pending_name}")
    }

    /// Splits `<visible_ns>-<id>.rec` into its parts. Prefix widths are
    /// fixed, so ids may contain dashes.
    fn parse_pending(name: &str) -> Option<(i64, &str)> {
        let rest = name.strip_suffix(REC_EXT)?;
        if rest.len() < 22 || rest.as_bytes().get(20) != Some(&b'-') {
            return None;
        }
        let ns: i64 = rest[..20].parse().ok()?;
        Some((ns, &rest[21..]))
    }

    /// Splits `<claimed_ns>-<visible_ns>-<id>.rec`.
    fn parse_inflight(name: &str) -> Option<(i64, i64, &str)> {
        if name.len() < 21 || name.as_bytes().get(20) != Some(&b'-') {
            return None;
        }
        let claimed: i64 = name[..20].parse().ok()?;
        let (visible, id) = Self::parse_pending(&name[21..])?;
        Some((claimed, visible, id))
    }

    /// Sorted pending record names.
    async fn pending_names(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.pending).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(REC_EXT) {
                names.push(name);
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Claims and decodes the oldest visible pending record, if any.
    async fn try_claim_one(&self) -> Result<Option<Job>, BackendError> {
        let _guard = self.scan.lock().await;
        let now = now_ns();

        for name in self.pending_names().await? {
            let Some((visible_ns, id)) = Self::parse_pending(&name) else {
                log::warn!("unparsable record name in pending: {name}");
                continue;
            };
            if visible_ns > now {
                // Names are sorted by visibility; everything after this one
                // is further in the future.
                break;
            }

            let claimed_name = Self::inflight_name(now_ns(), &name);
            let from = self.pending.join(&name);
            let to = self.inflight.join(&claimed_name);
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            fsync_dir(&self.inflight);

            let bytes = tokio::fs::read(&to).await?;
            match self.codec.decode(&bytes) {
                Ok(job) => {
                    self.index
                        .lock()
                        .expect("file queue index poisoned")
                        .insert(id.to_owned(), claimed_name);
                    return Ok(Some(job));
                }
                Err(e) => {
                    self.quarantine(&to, &name, &e.to_string()).await?;
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Moves an undecodable record out of the flow, keeping the bytes for
    /// post-mortem inspection.
    async fn quarantine(&self, path: &Path, name: &str, reason: &str) -> Result<(), BackendError> {
        let target = self.root.join(format!("{name}.corrupt"));
        tokio::fs::rename(path, &target).await?;
        fsync_dir(&self.root);
        log::error!(
            "quarantined corrupt record {name} -> {}: {reason}",
            target.display()
        );
        Ok(())
    }

    /// Finds the inflight filename for `id`, via the index or a scan.
    async fn inflight_file_for(&self, id: &str) -> Result<Option<String>, BackendError> {
        if let Some(name) = self
            .index
            .lock()
            .expect("file queue index poisoned")
            .get(id)
            .cloned()
        {
            return Ok(Some(name));
        }
        let mut dir = tokio::fs::read_dir(&self.inflight).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((_, _, rec_id)) = Self::parse_inflight(&name) {
                if rec_id == id {
                    return Ok(Some(name));
                }
            }
        }
        Ok(None)
    }

    fn forget(&self, id: &str) {
        self.index
            .lock()
            .expect("file queue index poisoned")
            .remove(id);
    }
}

#[async_trait]
impl QueueBackend for FileQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), BackendError> {
        let mut job = job.clone();
        job.mark_enqueued();
        let visible_ns = now_ns();
        let path = self.pending.join(Self::pending_name(visible_ns, &job.id));
        let bytes = self.codec.encode(&job)?;
        write_atomic(&path, &bytes).await?;
        fsync_dir(&self.pending);
        log::debug!("enqueued job {} at {}", job.id, path.display());
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, BackendError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_claim_one().await? {
                return Ok(Some(job));
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn pop_batch(&self, max: usize) -> Result<Vec<Job>, BackendError> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.try_claim_one().await? {
                Some(job) => batch.push(job),
                None => break,
            }
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), BackendError> {
        if let Some(name) = self.inflight_file_for(id).await? {
            tokio::fs::remove_file(self.inflight.join(&name)).await?;
            fsync_dir(&self.inflight);
        }
        self.forget(id);
        Ok(())
    }

    async fn nack(&self, id: &str, requeue_delay: Duration) -> Result<(), BackendError> {
        let Some(name) = self.inflight_file_for(id).await? else {
            self.forget(id);
            return Ok(());
        };
        let Some((_, visible_ns, _)) = Self::parse_inflight(&name) else {
            return Ok(());
        };
        let target_ns = if requeue_delay.is_zero() {
            visible_ns
        } else {
            now_ns() + requeue_delay.as_nanos() as i64
        };
        let target = self.pending.join(Self::pending_name(target_ns, id));
        tokio::fs::rename(self.inflight.join(&name), &target).await?;
        fsync_dir(&self.pending);
        self.forget(id);
        Ok(())
    }

    async fn requeue(&self, job: &Job, requeue_delay: Duration) -> Result<(), BackendError> {
        let inflight = self.inflight_file_for(&job.id).await?;
        let visible_ns = match inflight.as_deref().and_then(Self::parse_inflight) {
            Some((_, visible, _)) if requeue_delay.is_zero() => visible,
            _ if requeue_delay.is_zero() => now_ns(),
            _ => now_ns() + requeue_delay.as_nanos() as i64,
        };

        let target = self.pending.join(Self::pending_name(visible_ns, &job.id));
        let bytes = self.codec.encode(job)?;
        write_atomic(&target, &bytes).await?;
        fsync_dir(&self.pending);

        if let Some(name) = inflight {
            tokio::fs::remove_file(self.inflight.join(name)).await?;
            fsync_dir(&self.inflight);
        }
        self.forget(&job.id);
        Ok(())
    }

    async fn qsize(&self) -> Result<usize, BackendError> {
        Ok(self.pending_names().await?.len())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        for dir in [&self.pending, &self.inflight] {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(REC_EXT) {
                    tokio::fs::remove_file(entry.path()).await?;
                }
            }
        }
        self.index
            .lock()
            .expect("file queue index poisoned")
            .clear();
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, BackendError> {
        let _guard = self.scan.lock().await;
        let now = now_ns();
        let lease_ns = self.visibility_timeout.as_nanos() as i64;
        let mut reclaimed = 0;

        let mut dir = tokio::fs::read_dir(&self.inflight).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((claimed_ns, visible_ns, id)) = Self::parse_inflight(&name) else {
                continue;
            };
            if claimed_ns + lease_ns > now {
                continue;
            }
            let target = self.pending.join(Self::pending_name(visible_ns, id));
            match tokio::fs::rename(entry.path(), &target).await {
                Ok(()) => {
                    self.forget(id);
                    reclaimed += 1;
                    log::warn!("lease expired; returned job {id} to pending");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if reclaimed > 0 {
            fsync_dir(&self.pending);
        }
        Ok(reclaimed)
    }
}
