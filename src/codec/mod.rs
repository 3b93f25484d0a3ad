//! # Job serialization codec.
//!
//! [`JobCodec`] turns a [`Job`] into a compact binary frame and back.
//! Frames are prefixed with a 2-byte magic and a 1-byte format version so
//! that foreign or stale bytes decode to [`CodecError::Corrupt`] instead of
//! garbage jobs.
//!
//! ## Rules
//! - `decode(encode(job)) == job` for every field, exactly.
//! - Equal jobs encode to equal bytes (argument maps are ordered).
//! - Trailing bytes after the body are corrupt, not ignored.
//!
//! The built-in implementation is [`BincodeCodec`], registered under the
//! name `"bincode"`; [`for_name`] resolves the configured codec.

mod bincode;

use std::sync::Arc;

use crate::error::{CodecError, RuntimeError};
use crate::job::Job;

pub use self::bincode::BincodeCodec;

/// Shared handle to a codec implementation.
pub type CodecRef = Arc<dyn JobCodec>;

/// Binary codec for job records.
pub trait JobCodec: Send + Sync + 'static {
    /// Stable codec name used in configuration and diagnostics.
    fn name(&self) -> &'static str;

    /// Encodes a job into a self-contained binary frame.
    fn encode(&self, job: &Job) -> Result<Vec<u8>, CodecError>;

    /// Decodes a frame produced by [`encode`](Self::encode).
    fn decode(&self, bytes: &[u8]) -> Result<Job, CodecError>;
}

/// Resolves a codec by its configured name.
pub fn for_name(name: &str) -> Result<CodecRef, RuntimeError> {
    match name {
        "bincode" => Ok(Arc::new(BincodeCodec::new())),
        _ => Err(RuntimeError::UnknownBackend {
            kind: "codec",
            name: name.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobValue, TimeoutPolicy};
    use std::collections::BTreeMap;

    fn sample_job() -> Job {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("retries".to_owned(), JobValue::Int(2));
        kwargs.insert(
            "nested".to_owned(),
            JobValue::List(vec![JobValue::Bool(true), JobValue::Null]),
        );
        let mut job = Job::new(
            "demo.add",
            vec![JobValue::Int(2), JobValue::Float(3.5), JobValue::Bytes(vec![0, 255])],
            kwargs,
        )
        .with_retries(3)
        .with_retry_delay_secs(7)
        .with_timeout_secs(1.25)
        .with_timeout_policy(TimeoutPolicy::Retry)
        .with_tags(vec!["billing".to_owned()])
        .with_description("adds things");
        job.mark_enqueued();
        job
    }

    #[test]
    fn round_trips_every_field() {
        let codec = BincodeCodec::new();
        let job = sample_job();
        let bytes = codec.encode(&job).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = BincodeCodec::new();
        let job = sample_job();
        assert_eq!(codec.encode(&job).unwrap(), codec.encode(&job).unwrap());
    }

    #[test]
    fn rejects_garbage_and_short_input() {
        let codec = BincodeCodec::new();
        assert!(matches!(
            codec.decode(b"xx"),
            Err(CodecError::Corrupt { .. })
        ));
        assert!(matches!(
            codec.decode(b"totally not a frame"),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_version_mismatch() {
        let codec = BincodeCodec::new();
        let mut bytes = codec.encode(&sample_job()).unwrap();
        bytes[2] = bytes[2].wrapping_add(1);
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let codec = BincodeCodec::new();
        let mut bytes = codec.encode(&sample_job()).unwrap();
        bytes.push(0);
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn resolves_builtin_by_name() {
        assert!(for_name("bincode").is_ok());
        assert!(matches!(
            for_name("msgpack"),
            Err(RuntimeError::UnknownBackend { .. })
        ));
    }
}
