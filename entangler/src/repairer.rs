// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_storage::{Error as StorageError, Storage};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::dag::{self, DagNode};
use crate::encode::encode_strand;
use crate::getter::{CounterSnapshot, StoreGetter};
use crate::lattice::{self, Lattice};
use crate::metadata::Metadata;
use crate::params;
use crate::walker::{self, Walker, WalkerOptions};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to parse metadata {0}: {1}")]
    Metadata(String, serde_json::Error),

    #[error("Metadata {meta_cid} describes file {described}, not {requested}")]
    WrongFile {
        meta_cid: String,
        described: String,
        requested: String,
    },

    #[error("Strand {0} is out of range")]
    InvalidStrand(usize),

    #[error(
        "Re-encoded parity {index} on strand {strand} hashes to {actual}, expected {expected}"
    )]
    ParityMismatch {
        strand: usize,
        index: usize,
        actual: String,
        expected: String,
    },

    #[error("Failed to parse dag node {0}: {1}")]
    MalformedNode(String, dag::Error),

    #[error("Invalid entanglement parameters: {0}")]
    Params(#[from] params::Error),

    #[error("Lattice error: {0}")]
    Lattice(#[from] lattice::Error),

    #[error("Walker error: {0}")]
    Walker(#[from] walker::Error),

    #[error("Store error: {0}")]
    Store(#[from] StorageError),
}

/// Options for [`Repairer::download`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Re-publish recovered chunks back to the store.
    pub reupload: bool,
    /// Swallow per-child failures and return what could be assembled.
    pub best_effort: bool,
    /// 1-based data block indices to treat as lost (testing aid).
    pub data_filter: Vec<usize>,
}

/// Ties the block store and the lattice together for whole-file downloads
/// and the repair operations the coordinator fans out.
#[derive(Clone)]
pub struct Repairer<S: Storage> {
    store: S,
}

impl<S: Storage> Repairer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetches and parses the metadata document.
    pub async fn metadata(&self, meta_cid: &str) -> Result<Metadata, Error> {
        let bytes = self.store.get_raw(meta_cid).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Metadata(meta_cid.to_string(), e))
    }

    fn lattice_for(
        &self,
        metadata: &Metadata,
        depth: u32,
        data_filter: &[usize],
    ) -> Result<Lattice<StoreGetter<S>>, Error> {
        let params = metadata.params()?;
        let getter = StoreGetter::new(self.store.clone(), metadata)
            .with_data_filter(data_filter.iter().copied().collect::<HashSet<usize>>());
        Ok(Lattice::new(params, getter, depth))
    }

    fn check_file(&self, metadata: &Metadata, meta_cid: &str, file_cid: &str) -> Result<(), Error> {
        if metadata.original_file_cid != file_cid {
            return Err(Error::WrongFile {
                meta_cid: meta_cid.to_string(),
                described: metadata.original_file_cid.clone(),
                requested: file_cid.to_string(),
            });
        }
        Ok(())
    }

    /// Downloads the file, recovering lost blocks through the lattice when a
    /// metadata CID is given and the depth allows it. Returns the payload,
    /// whether anything was repaired, and the getter counters when the
    /// lattice was used.
    pub async fn download(
        &self,
        file_cid: &str,
        meta_cid: Option<&str>,
        depth: u32,
        options: DownloadOptions,
    ) -> Result<(Bytes, bool, Option<CounterSnapshot>), Error> {
        let meta_cid = match meta_cid {
            Some(cid) if depth > 1 => cid,
            _ => {
                let data = self.direct_download(file_cid).await?;
                info!(file = file_cid, "finished downloading file (no recovery)");
                return Ok((data, false, None));
            }
        };

        let metadata = self.metadata(meta_cid).await?;
        self.check_file(&metadata, meta_cid, file_cid)?;
        let lattice = self.lattice_for(&metadata, depth, &options.data_filter)?;
        let walker = Walker::new(
            &lattice,
            &self.store,
            &metadata,
            WalkerOptions {
                reupload: options.reupload,
                fail_on_error: !options.best_effort,
            },
        );
        let (data, repaired) = walker.download().await?;
        if repaired {
            info!(file = file_cid, "finished downloading file (recovered)");
        } else {
            info!(file = file_cid, "finished downloading file (no recovery)");
        }
        Ok((data, repaired, Some(lattice.getter().snapshot())))
    }

    /// Direct DAG walk without the lattice; fails on the first missing block.
    async fn direct_download(&self, root_cid: &str) -> Result<Bytes, Error> {
        let mut data = BytesMut::new();
        let mut stack = vec![root_cid.to_string()];
        while let Some(cid) = stack.pop() {
            let bytes = self.store.get_raw(&cid).await?;
            let doc =
                DagNode::decode(&bytes).map_err(|e| Error::MalformedNode(cid.clone(), e))?;
            if doc.is_leaf() {
                let payload = doc
                    .payload()
                    .map_err(|e| Error::MalformedNode(cid.clone(), e))?;
                data.extend_from_slice(&payload);
            } else {
                for link in doc.links.iter().rev() {
                    stack.push(link.clone());
                }
            }
        }
        Ok(data.freeze())
    }

    /// Repairs the tree's interior nodes and lists the leaves whose direct
    /// fetch fails, together with the fetch counters of the attempt.
    pub async fn retrieve_failed_leaves(
        &self,
        file_cid: &str,
        meta_cid: &str,
        depth: u32,
    ) -> Result<(Vec<usize>, CounterSnapshot), Error> {
        let metadata = self.metadata(meta_cid).await?;
        self.check_file(&metadata, meta_cid, file_cid)?;
        let lattice = self.lattice_for(&metadata, depth, &[])?;
        let walker = Walker::new(
            &lattice,
            &self.store,
            &metadata,
            WalkerOptions {
                reupload: true,
                fail_on_error: true,
            },
        );
        let failed = walker.collect_failed_leaves().await?;
        Ok((failed, lattice.getter().snapshot()))
    }

    /// Recovers the given leaves (0-based lattice indices) and re-publishes
    /// them, reporting per-leaf success bits.
    pub async fn repair_failed_leaves(
        &self,
        file_cid: &str,
        meta_cid: &str,
        depth: u32,
        indices: &[usize],
    ) -> Result<(HashMap<usize, bool>, CounterSnapshot), Error> {
        let metadata = self.metadata(meta_cid).await?;
        self.check_file(&metadata, meta_cid, file_cid)?;
        let lattice = self.lattice_for(&metadata, depth, &[])?;
        let walker = Walker::new(
            &lattice,
            &self.store,
            &metadata,
            WalkerOptions {
                reupload: true,
                fail_on_error: false,
            },
        );
        let results = walker.repair_leaves(indices).await?;
        Ok((results, lattice.getter().snapshot()))
    }

    /// Re-encodes one parity strand from recovered data and re-publishes all
    /// its parity blocks. Since blocks are content-addressed, each re-encoded
    /// parity must hash to the CID recorded at upload time; a mismatch means
    /// the recovered data is wrong. Returns the strand manifest CID.
    pub async fn repair_strand(
        &self,
        file_cid: &str,
        meta_cid: &str,
        strand: usize,
        depth: u32,
    ) -> Result<String, Error> {
        let metadata = self.metadata(meta_cid).await?;
        self.check_file(&metadata, meta_cid, file_cid)?;
        if strand >= metadata.alpha as usize {
            return Err(Error::InvalidStrand(strand));
        }

        let params = metadata.params()?;
        let lattice = self.lattice_for(&metadata, depth, &[])?;
        let blocks: Vec<Bytes> = lattice.get_all_data().await?;

        let strand_type = params.strands()[strand];
        let parity = encode_strand(&params, &blocks, strand_type);
        for (i, chunk) in parity.into_iter().enumerate() {
            lattice.update_parity(i + 1, strand, chunk.clone())?;
            let cid = self
                .store
                .add_raw(chunk)
                .await
                .map_err(StorageError::Other)?;
            let expected = &metadata.parity_cids[strand][i];
            if cid != *expected {
                return Err(Error::ParityMismatch {
                    strand,
                    index: i + 1,
                    actual: cid,
                    expected: expected.clone(),
                });
            }
        }

        let manifest = serde_json::to_vec(&metadata.parity_cids[strand])
            .map_err(|e| StorageError::Other(e.into()))?;
        let manifest_cid = self
            .store
            .add_raw(manifest)
            .await
            .map_err(StorageError::Other)?;
        info!(file = file_cid, strand, "strand re-encoded");
        Ok(manifest_cid)
    }
}
