//! Bincode-backed implementation of [`JobCodec`].

use bincode::config::{self, Configuration};

use crate::error::CodecError;
use crate::job::Job;

use super::JobCodec;

/// Frame magic: identifies a nuvom job record.
const MAGIC: [u8; 2] = *b"NV";
/// Current frame format version.
const VERSION: u8 = 1;

/// Compact binary codec using `bincode` with serde interop.
///
/// The frame is `MAGIC (2) | VERSION (1) | bincode body`. The body uses
/// bincode's standard configuration (varint integers, little endian),
/// which round-trips the whole [`Job`] including `JobValue` trees.
pub struct BincodeCodec {
    cfg: Configuration,
}

impl BincodeCodec {
    /// Creates the codec with bincode's standard configuration.
    pub fn new() -> Self {
        Self {
            cfg: config::standard(),
        }
    }
}

impl Default for BincodeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, job: &Job) -> Result<Vec<u8>, CodecError> {
        let body = bincode::serde::encode_to_vec(job, self.cfg).map_err(|e| {
            CodecError::Unencodable {
                reason: e.to_string(),
            }
        })?;
        let mut frame = Vec::with_capacity(3 + body.len());
        frame.extend_from_slice(&MAGIC);
        frame.push(VERSION);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Job, CodecError> {
        if bytes.len() < 3 {
            return Err(CodecError::Corrupt {
                reason: format!("frame too short: {} bytes", bytes.len()),
            });
        }
        if bytes[..2] != MAGIC {
            return Err(CodecError::Corrupt {
                reason: "bad magic".to_owned(),
            });
        }
        if bytes[2] != VERSION {
            return Err(CodecError::Corrupt {
                reason: format!("unsupported frame version {}", bytes[2]),
            });
        }
        let body = &bytes[3..];
        let (job, consumed): (Job, usize) = bincode::serde::decode_from_slice(body, self.cfg)
            .map_err(|e| CodecError::Corrupt {
                reason: e.to_string(),
            })?;
        if consumed != body.len() {
            return Err(CodecError::Corrupt {
                reason: format!("{} trailing bytes", body.len() - consumed),
            });
        }
        Ok(job)
    }
}
