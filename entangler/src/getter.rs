// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use braid_storage::{Error as StorageError, Storage};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::block::BlockId;
use crate::encode::pad_chunk;
use crate::metadata::Metadata;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The block is missing or timed out; neighbor recovery may still work.
    #[error("Block {0} is unavailable")]
    Unavailable(String),

    /// The store answered with something unusable.
    #[error("Malformed block {0}: {1}")]
    Malformed(String, String),
}

/// Source of data and parity block bytes for the lattice, addressed by
/// logical block index rather than CID.
#[async_trait]
pub trait BlockGetter: Send + Sync {
    /// Fetches the data block with the given 1-based index.
    async fn get_data(&self, index: usize) -> Result<Bytes, Error>;

    /// Fetches the parity block with the given 1-based index on a strand.
    async fn get_parity(&self, index: usize, strand: usize) -> Result<Bytes, Error>;
}

/// Fetch counters kept by [`StoreGetter`]. Observable for metrics; they
/// never gate behavior.
#[derive(Debug, Default)]
pub struct Counters {
    pub data_blocks_fetched: AtomicU64,
    pub data_blocks_cached: AtomicU64,
    pub data_blocks_unavailable: AtomicU64,
    pub data_blocks_error: AtomicU64,
    pub parity_blocks_fetched: AtomicU64,
    pub parity_blocks_cached: AtomicU64,
    pub parity_blocks_unavailable: AtomicU64,
    pub parity_blocks_error: AtomicU64,
}

/// Point-in-time copy of the counters, in the shape the repair metrics
/// endpoints exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CounterSnapshot {
    pub parity_available: Vec<Vec<bool>>,
    pub data_blocks_fetched: u64,
    pub data_blocks_cached: u64,
    pub data_blocks_unavailable: u64,
    pub data_blocks_error: u64,
    pub parity_blocks_fetched: u64,
    pub parity_blocks_cached: u64,
    pub parity_blocks_unavailable: u64,
    pub parity_blocks_error: u64,
}

/// [`BlockGetter`] over a content-addressed store, resolving indices through
/// the metadata CID maps. Fetched blocks are padded to the lattice block
/// size and cached for the session.
pub struct StoreGetter<S: Storage> {
    store: S,
    chunk_size: usize,
    index_to_cid: HashMap<usize, String>,
    parity_cids: Vec<Vec<String>>,
    data_filter: Option<HashSet<usize>>,
    counters: Counters,
    parity_available: Mutex<Vec<Vec<bool>>>,
    cache: Mutex<HashMap<BlockId, Bytes>>,
}

impl<S: Storage> StoreGetter<S> {
    pub fn new(store: S, metadata: &Metadata) -> Self {
        let parity_available = metadata
            .parity_cids
            .iter()
            .map(|strand| vec![false; strand.len()])
            .collect();
        Self {
            store,
            chunk_size: metadata.chunk_size as usize,
            index_to_cid: metadata.index_cid_map(),
            parity_cids: metadata.parity_cids.clone(),
            data_filter: None,
            counters: Counters::default(),
            parity_available: Mutex::new(parity_available),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Data block indices (1-based) to report as unavailable even when the
    /// store has them. Used to exercise loss.
    pub fn with_data_filter(mut self, filter: HashSet<usize>) -> Self {
        if !filter.is_empty() {
            self.data_filter = Some(filter);
        }
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let c = &self.counters;
        CounterSnapshot {
            parity_available: self.parity_available.lock().unwrap().clone(),
            data_blocks_fetched: c.data_blocks_fetched.load(Ordering::Relaxed),
            data_blocks_cached: c.data_blocks_cached.load(Ordering::Relaxed),
            data_blocks_unavailable: c.data_blocks_unavailable.load(Ordering::Relaxed),
            data_blocks_error: c.data_blocks_error.load(Ordering::Relaxed),
            parity_blocks_fetched: c.parity_blocks_fetched.load(Ordering::Relaxed),
            parity_blocks_cached: c.parity_blocks_cached.load(Ordering::Relaxed),
            parity_blocks_unavailable: c.parity_blocks_unavailable.load(Ordering::Relaxed),
            parity_blocks_error: c.parity_blocks_error.load(Ordering::Relaxed),
        }
    }

    fn cached(&self, id: BlockId) -> Option<Bytes> {
        self.cache.lock().unwrap().get(&id).cloned()
    }

    async fn fetch_padded(&self, id: BlockId, cid: &str) -> Result<Bytes, FetchFailure> {
        match self.store.get_raw(cid).await {
            Ok(bytes) => {
                if bytes.len() > self.chunk_size {
                    return Err(FetchFailure::Malformed(format!(
                        "block is {} bytes, lattice block size is {}",
                        bytes.len(),
                        self.chunk_size
                    )));
                }
                let padded = pad_chunk(&bytes, self.chunk_size);
                self.cache.lock().unwrap().insert(id, padded.clone());
                Ok(padded)
            }
            Err(StorageError::BlockNotFound(_)) | Err(StorageError::Timeout(_)) => {
                Err(FetchFailure::Unavailable)
            }
            Err(e) => Err(FetchFailure::Malformed(e.to_string())),
        }
    }
}

enum FetchFailure {
    Unavailable,
    Malformed(String),
}

#[async_trait]
impl<S: Storage> BlockGetter for StoreGetter<S> {
    async fn get_data(&self, index: usize) -> Result<Bytes, Error> {
        let c = &self.counters;
        if let Some(filter) = &self.data_filter {
            if filter.contains(&index) {
                c.data_blocks_unavailable.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Unavailable(format!("data block {}", index)));
            }
        }
        let id = BlockId::Data(index);
        if let Some(bytes) = self.cached(id) {
            c.data_blocks_cached.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes);
        }
        let cid = match self.index_to_cid.get(&index) {
            Some(cid) => cid.clone(),
            None => {
                c.data_blocks_error.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Malformed(
                    format!("data block {}", index),
                    "no cid mapping".to_string(),
                ));
            }
        };
        match self.fetch_padded(id, &cid).await {
            Ok(bytes) => {
                c.data_blocks_fetched.fetch_add(1, Ordering::Relaxed);
                Ok(bytes)
            }
            Err(FetchFailure::Unavailable) => {
                c.data_blocks_unavailable.fetch_add(1, Ordering::Relaxed);
                Err(Error::Unavailable(cid))
            }
            Err(FetchFailure::Malformed(reason)) => {
                c.data_blocks_error.fetch_add(1, Ordering::Relaxed);
                Err(Error::Malformed(cid, reason))
            }
        }
    }

    async fn get_parity(&self, index: usize, strand: usize) -> Result<Bytes, Error> {
        let c = &self.counters;
        let id = BlockId::Parity(strand, index);
        if let Some(bytes) = self.cached(id) {
            c.parity_blocks_cached.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes);
        }
        let cid = match self
            .parity_cids
            .get(strand)
            .and_then(|cids| cids.get(index - 1))
        {
            Some(cid) => cid.clone(),
            None => {
                c.parity_blocks_error.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Malformed(
                    format!("parity block {} strand {}", index, strand),
                    "no cid mapping".to_string(),
                ));
            }
        };
        match self.fetch_padded(id, &cid).await {
            Ok(bytes) => {
                c.parity_blocks_fetched.fetch_add(1, Ordering::Relaxed);
                let mut available = self.parity_available.lock().unwrap();
                if let Some(slot) = available
                    .get_mut(strand)
                    .and_then(|strand| strand.get_mut(index - 1))
                {
                    *slot = true;
                }
                Ok(bytes)
            }
            Err(FetchFailure::Unavailable) => {
                c.parity_blocks_unavailable.fetch_add(1, Ordering::Relaxed);
                Err(Error::Unavailable(cid))
            }
            Err(FetchFailure::Malformed(reason)) => {
                c.parity_blocks_error.fetch_add(1, Ordering::Relaxed);
                Err(Error::Malformed(cid, reason))
            }
        }
    }
}
