// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_storage::Storage;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::debug;

use crate::dag::{self, DagNode};
use crate::encode::trim_zero_padding;
use crate::getter::BlockGetter;
use crate::lattice::{self, Lattice};
use crate::metadata::Metadata;
use crate::tree::{self, TreeNode};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to recover chunk with cid {cid}: {source}")]
    ChunkRecovery {
        cid: String,
        #[source]
        source: lattice::Error,
    },

    #[error("Re-uploaded chunk for {expected} came back as {actual}")]
    CidMismatch { expected: String, actual: String },

    #[error("Failed to parse dag node {cid}: {source}")]
    MalformedNode {
        cid: String,
        #[source]
        source: dag::Error,
    },

    #[error("Link count mismatch at {cid}: {expected} children expected but {actual} provided")]
    LinkCountMismatch {
        cid: String,
        expected: usize,
        actual: usize,
    },

    #[error("Metadata tree shape mismatch: {0} blocks expected but skeleton has {1}")]
    ShapeMismatch(usize, usize),

    #[error("Store error: {0}")]
    Store(#[from] braid_storage::Error),

    #[error("Tree error: {0}")]
    Tree(#[from] tree::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct WalkerOptions {
    /// Re-publish recovered chunks to the store, verifying the CID.
    pub reupload: bool,
    /// Fail fast on the first broken node instead of collecting what can be
    /// downloaded.
    pub fail_on_error: bool,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        Self {
            reupload: false,
            fail_on_error: true,
        }
    }
}

/// Traverses a file's Merkle tree through the lattice, recovering blocks as
/// needed and reassembling the file payload.
pub struct Walker<'a, G, S> {
    lattice: &'a Lattice<G>,
    store: &'a S,
    metadata: &'a Metadata,
    options: WalkerOptions,
}

struct WalkOutcome {
    data: BytesMut,
    repaired: bool,
}

impl<'a, G: BlockGetter, S: Storage> Walker<'a, G, S> {
    pub fn new(
        lattice: &'a Lattice<G>,
        store: &'a S,
        metadata: &'a Metadata,
        options: WalkerOptions,
    ) -> Self {
        Self {
            lattice,
            store,
            metadata,
            options,
        }
    }

    fn skeleton(&self) -> Result<TreeNode, Error> {
        let mut root = tree::build_skeleton(self.metadata.leaves, self.metadata.max_children)?;
        let node_count = root.count();
        if node_count != self.metadata.num_blocks {
            return Err(Error::ShapeMismatch(self.metadata.num_blocks, node_count));
        }
        root.cid = Some(self.metadata.original_file_cid.clone());
        Ok(root)
    }

    /// Downloads the whole file, driving recovery for any block the store no
    /// longer serves. Returns the payload and whether anything was repaired.
    pub async fn download(&self) -> Result<(Bytes, bool), Error> {
        let mut root = self.skeleton()?;
        let mut outcome = WalkOutcome {
            data: BytesMut::new(),
            repaired: false,
        };
        self.walk_node(&mut root, &mut outcome).await?;
        Ok((outcome.data.freeze(), outcome.repaired))
    }

    /// Fetches one node's chunk through the lattice and parses it, handling
    /// re-upload of repaired chunks.
    async fn node_chunk(&self, node: &TreeNode) -> Result<(DagNode, bool), Error> {
        let cid = node.cid.clone().unwrap_or_default();
        let (chunk, repaired) = self
            .lattice
            .get_chunk(node.lattice_index + 1)
            .await
            .map_err(|source| Error::ChunkRecovery {
                cid: cid.clone(),
                source,
            })?;

        // blocks are padded to the lattice block size before entanglement
        let chunk = trim_zero_padding(&chunk);

        if repaired && self.options.reupload {
            let uploaded = self.store.add_raw(chunk.clone()).await.map_err(|e| {
                Error::Store(braid_storage::Error::Other(e))
            })?;
            if !cid.is_empty() && uploaded != cid {
                return Err(Error::CidMismatch {
                    expected: cid,
                    actual: uploaded,
                });
            }
        }

        let doc = DagNode::decode(&chunk).map_err(|source| Error::MalformedNode {
            cid: cid.clone(),
            source,
        })?;
        Ok((doc, repaired))
    }

    fn walk_node<'b>(
        &'b self,
        node: &'b mut TreeNode,
        outcome: &'b mut WalkOutcome,
    ) -> BoxFuture<'b, Result<(), Error>> {
        Box::pin(async move {
            let cid = node.cid.clone().unwrap_or_default();
            let (doc, repaired) = self.node_chunk(node).await?;
            outcome.repaired |= repaired;

            if doc.links.len() != node.children.len() {
                return Err(Error::LinkCountMismatch {
                    cid,
                    expected: node.children.len(),
                    actual: doc.links.len(),
                });
            }

            if node.is_leaf() {
                let payload = doc.payload().map_err(|source| Error::MalformedNode {
                    cid,
                    source,
                })?;
                outcome.data.extend_from_slice(&payload);
                return Ok(());
            }

            for (child, link) in node.children.iter_mut().zip(doc.links.iter()) {
                child.cid = Some(link.clone());
                if let Err(e) = self.walk_node(child, outcome).await {
                    if self.options.fail_on_error {
                        return Err(e);
                    }
                    debug!(error = %e, "continuing past broken child");
                }
            }
            Ok(())
        })
    }

    /// Walks the tree repairing interior nodes only, and returns the 0-based
    /// lattice indices of leaves that cannot be fetched directly.
    pub async fn collect_failed_leaves(&self) -> Result<Vec<usize>, Error> {
        let mut root = self.skeleton()?;
        let mut failed = Vec::new();
        self.probe_node(&mut root, &mut failed).await?;
        failed.sort_unstable();
        Ok(failed)
    }

    fn probe_node<'b>(
        &'b self,
        node: &'b mut TreeNode,
        failed: &'b mut Vec<usize>,
    ) -> BoxFuture<'b, Result<(), Error>> {
        Box::pin(async move {
            if node.is_leaf() {
                if let Err(e) = self.lattice.getter().get_data(node.lattice_index + 1).await {
                    debug!(leaf = node.lattice_index, error = %e, "leaf unavailable");
                    failed.push(node.lattice_index);
                }
                return Ok(());
            }

            let cid = node.cid.clone().unwrap_or_default();
            let (doc, _) = self.node_chunk(node).await?;
            if doc.links.len() != node.children.len() {
                return Err(Error::LinkCountMismatch {
                    cid,
                    expected: node.children.len(),
                    actual: doc.links.len(),
                });
            }
            for (child, link) in node.children.iter_mut().zip(doc.links.iter()) {
                child.cid = Some(link.clone());
                self.probe_node(child, failed).await?;
            }
            Ok(())
        })
    }

    /// Recovers exactly the given leaves (0-based lattice indices),
    /// re-publishing each repaired chunk, and reports per-leaf success.
    /// A failing leaf never fails its siblings.
    pub async fn repair_leaves(
        &self,
        indices: &[usize],
    ) -> Result<HashMap<usize, bool>, Error> {
        let index_cids = self.metadata.index_cid_map();
        let mut results = HashMap::with_capacity(indices.len());

        for &leaf in indices {
            let repaired_ok = self.repair_single_leaf(leaf, &index_cids).await;
            results.insert(leaf, repaired_ok);
        }
        Ok(results)
    }

    async fn repair_single_leaf(
        &self,
        leaf: usize,
        index_cids: &HashMap<usize, String>,
    ) -> bool {
        let (chunk, repaired) = match self.lattice.get_chunk(leaf + 1).await {
            Ok(res) => res,
            Err(e) => {
                debug!(leaf, error = %e, "leaf recovery failed");
                return false;
            }
        };
        if !repaired {
            return true;
        }

        let chunk = trim_zero_padding(&chunk);
        if !self.options.reupload {
            return true;
        }
        match self.store.add_raw(chunk).await {
            Ok(cid) => match index_cids.get(&(leaf + 1)) {
                Some(expected) if *expected != cid => {
                    debug!(leaf, %cid, %expected, "re-uploaded leaf cid mismatch");
                    false
                }
                _ => true,
            },
            Err(e) => {
                debug!(leaf, error = %e, "re-upload failed");
                false
            }
        }
    }
}
