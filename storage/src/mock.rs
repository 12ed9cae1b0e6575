// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::storage::{cid_of, Error, Storage};

/// In-memory store used in tests. Individual blocks can be marked as failed
/// to simulate loss on the underlying network.
#[derive(Clone)]
pub struct FakeStorage {
    blocks: Arc<Mutex<HashMap<String, Bytes>>>,
    fail_blocks: Arc<Mutex<HashSet<String>>>,
    timeout_blocks: Arc<Mutex<HashSet<String>>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        FakeStorage {
            blocks: Arc::new(Mutex::new(HashMap::new())),
            fail_blocks: Arc::new(Mutex::new(HashSet::new())),
            timeout_blocks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Makes the block addressed by `cid` unavailable. Re-adding the block
    /// clears the failure, so a successful repair re-upload heals the store.
    pub fn fake_failed_block(&self, cid: &str) {
        self.fail_blocks.lock().unwrap().insert(cid.to_string());
    }

    /// Makes fetches of the block addressed by `cid` time out.
    pub fn fake_timeout_block(&self, cid: &str) {
        self.timeout_blocks.lock().unwrap().insert(cid.to_string());
    }

    /// Restores a previously failed block.
    pub fn restore_block(&self, cid: &str) {
        self.fail_blocks.lock().unwrap().remove(cid);
        self.timeout_blocks.lock().unwrap().remove(cid);
    }

    /// Returns the number of stored blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn add_raw(&self, bytes: impl Into<Bytes> + Send) -> Result<String> {
        let bytes = bytes.into();
        let cid = cid_of(&bytes);
        self.blocks.lock().unwrap().insert(cid.clone(), bytes);
        self.restore_block(&cid);
        Ok(cid)
    }

    async fn get_raw(&self, cid: &str) -> Result<Bytes, Error> {
        if self.timeout_blocks.lock().unwrap().contains(cid) {
            return Err(Error::Timeout(cid.to_string()));
        }
        if self.fail_blocks.lock().unwrap().contains(cid) {
            return Err(Error::BlockNotFound(cid.to_string()));
        }
        self.blocks
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::BlockNotFound(cid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_get_round_trip() -> Result<()> {
        let store = FakeStorage::new();
        let cid = store.add_raw(Bytes::from("hello block")).await?;

        let fetched = store.get_raw(&cid).await?;
        assert_eq!(fetched, Bytes::from("hello block"));
        Ok(())
    }

    #[tokio::test]
    async fn get_unknown_block_fails() {
        let store = FakeStorage::new();
        let result = store.get_raw("bafybogus").await;
        assert!(matches!(result, Err(Error::BlockNotFound(_))));
    }

    #[tokio::test]
    async fn failed_block_is_reported_missing() -> Result<()> {
        let store = FakeStorage::new();
        let cid = store.add_raw(Bytes::from("doomed")).await?;

        store.fake_failed_block(&cid);
        assert!(matches!(
            store.get_raw(&cid).await,
            Err(Error::BlockNotFound(_))
        ));
        assert!(!store.has_block(&cid).await?);
        Ok(())
    }

    #[tokio::test]
    async fn timeout_block_is_reported_as_timeout() -> Result<()> {
        let store = FakeStorage::new();
        let cid = store.add_raw(Bytes::from("slow")).await?;

        store.fake_timeout_block(&cid);
        assert!(matches!(store.get_raw(&cid).await, Err(Error::Timeout(_))));
        Ok(())
    }

    #[tokio::test]
    async fn re_adding_failed_block_heals_it() -> Result<()> {
        let store = FakeStorage::new();
        let cid = store.add_raw(Bytes::from("phoenix")).await?;
        store.fake_failed_block(&cid);

        let cid_again = store.add_raw(Bytes::from("phoenix")).await?;
        assert_eq!(cid, cid_again);
        assert_eq!(store.get_raw(&cid).await?, Bytes::from("phoenix"));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_adds_produce_distinct_cids() -> Result<()> {
        let store = FakeStorage::new();
        let (a, b) = tokio::join!(
            store.add_raw(Bytes::from("block a")),
            store.add_raw(Bytes::from("block b"))
        );
        assert_ne!(a?, b?);
        assert_eq!(store.num_blocks(), 2);
        Ok(())
    }
}
