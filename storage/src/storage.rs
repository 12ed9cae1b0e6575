// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use sha2::{Digest, Sha256};
use thiserror;

/// Raw codec for CIDv1. Blocks are stored as opaque byte strings.
pub const RAW_CODEC: u64 = 0x55;

/// Error type for store operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The block addressed by the given CID is not present in the store.
    #[error("Block with cid {0} not found")]
    BlockNotFound(String),

    /// The store did not answer within the configured timeout.
    #[error("Timed out fetching block {0}")]
    Timeout(String),

    /// The given string does not parse as a CID.
    #[error("Invalid cid {0}: {1}")]
    InvalidCid(String, String),

    /// The store returned bytes whose digest does not match the requested CID.
    #[error("Digest mismatch for cid {0}")]
    DigestMismatch(String),

    /// A catch-all for transport and backend failures.
    #[error("Store error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Computes the CIDv1 (raw codec, sha2-256) of a block.
pub fn cid_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let multihash = Code::Sha2_256.wrap(&digest).expect("sha2-256 digest");
    Cid::new_v1(RAW_CODEC, multihash).to_string()
}

/// Trait representing a content-addressed block store.
///
/// Blocks are immutable and addressed by the CID of their bytes. Implementors
/// are cheap to clone and safe to share across tasks.
#[async_trait]
pub trait Storage: Clone + Send + Sync {
    /// Stores the given bytes as a raw block and returns its CID.
    async fn add_raw(&self, bytes: impl Into<Bytes> + Send) -> Result<String>;

    /// Fetches the raw block addressed by `cid`.
    async fn get_raw(&self, cid: &str) -> Result<Bytes, Error>;

    /// Returns whether the store currently holds the block addressed by `cid`.
    async fn has_block(&self, cid: &str) -> Result<bool, Error> {
        match self.get_raw(cid).await {
            Ok(_) => Ok(true),
            Err(Error::BlockNotFound(_)) | Err(Error::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_of_is_deterministic() {
        let a = cid_of(b"hello");
        let b = cid_of(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, cid_of(b"world"));
    }

    #[test]
    fn cid_of_parses_as_cid() {
        let cid = cid_of(b"some block");
        assert!(cid.parse::<Cid>().is_ok());
    }
}
