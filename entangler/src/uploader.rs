// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_storage::Storage;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::HashMap;

use crate::config::Config;
use crate::dag::DagNode;
use crate::encode::{encode_strand, pad_chunk};
use crate::metadata::Metadata;
use crate::params::{self, Params};
use crate::tree::{self, TreeNode};

/// Size every lattice block is padded to before entanglement. Large enough
/// for a leaf document embedding [`CHUNK_SIZE`] payload bytes or an interior
/// document linking [`MAX_CHILDREN`] children.
pub const BLOCK_SIZE: usize = 4096;
/// File payload bytes per leaf node.
pub const CHUNK_SIZE: usize = 1024;
/// Merkle tree fan-out.
pub const MAX_CHILDREN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Dag node of {0} bytes exceeds the lattice block size {1}")]
    OversizedNode(usize, usize),

    #[error("Invalid entanglement parameters: {0}")]
    Params(#[from] params::Error),

    #[error("Tree error: {0}")]
    Tree(#[from] tree::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub struct UploadResult {
    pub original_file_cid: String,
    pub metadata_cid: String,
    pub metadata: Metadata,
}

/// Splits a file into DAG-node blocks, entangles them along `alpha` strands
/// and stores blocks, parities and the metadata document.
pub struct Uploader<S: Storage> {
    store: S,
    config: Config,
}

impl<S: Storage> Uploader<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    pub async fn upload(&self, bytes: impl Into<Bytes> + Send) -> Result<UploadResult, Error> {
        let bytes = bytes.into();
        let num_bytes = bytes.len() as u64;

        let mut chunks: Vec<Bytes> = bytes
            .chunks(CHUNK_SIZE)
            .map(Bytes::copy_from_slice)
            .collect();
        if chunks.is_empty() {
            chunks.push(Bytes::new());
        }
        let leaves = chunks.len();

        let skeleton = tree::build_skeleton(leaves, MAX_CHILDREN)?;
        let num_blocks = skeleton.count();

        let mut docs: Vec<Option<Bytes>> = vec![None; num_blocks];
        let mut cids: Vec<Option<String>> = vec![None; num_blocks];
        let original_file_cid = self
            .store_node(&skeleton, &chunks, &mut docs, &mut cids)
            .await?;

        let blocks: Vec<Bytes> = docs
            .into_iter()
            .map(|doc| pad_chunk(&doc.unwrap_or_default(), BLOCK_SIZE))
            .collect();

        let params = Params::new(self.config.alpha, self.config.s, self.config.p, num_blocks)?;

        let mut parity_cids = Vec::with_capacity(params.alpha());
        let mut tree_cids = Vec::with_capacity(params.alpha());
        for strand in params.strands().to_vec() {
            let parity = encode_strand(&params, &blocks, strand);
            let mut strand_cids = Vec::with_capacity(parity.len());
            for chunk in parity {
                strand_cids.push(self.store.add_raw(chunk).await?);
            }
            let manifest =
                serde_json::to_vec(&strand_cids).map_err(|e| Error::Store(e.into()))?;
            tree_cids.push(self.store.add_raw(manifest).await?);
            parity_cids.push(strand_cids);
        }

        let data_cid_index_map: HashMap<String, usize> = cids
            .into_iter()
            .enumerate()
            .filter_map(|(idx, cid)| cid.map(|cid| (cid, idx)))
            .collect();

        let metadata = Metadata {
            alpha: self.config.alpha,
            s: self.config.s,
            p: self.config.p,
            original_file_cid: original_file_cid.clone(),
            tree_cids,
            num_blocks,
            max_children: MAX_CHILDREN,
            leaves,
            depth: tree::depth(leaves, MAX_CHILDREN),
            num_bytes,
            chunk_size: BLOCK_SIZE as u64,
            data_cid_index_map,
            parity_cids,
        };

        let metadata_bytes =
            serde_json::to_vec(&metadata).map_err(|e| Error::Store(e.into()))?;
        let metadata_cid = self.store.add_raw(metadata_bytes).await?;

        Ok(UploadResult {
            original_file_cid,
            metadata_cid,
            metadata,
        })
    }

    /// Stores the subtree rooted at `node` bottom-up and returns its CID.
    fn store_node<'a>(
        &'a self,
        node: &'a TreeNode,
        chunks: &'a [Bytes],
        docs: &'a mut Vec<Option<Bytes>>,
        cids: &'a mut Vec<Option<String>>,
    ) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let doc = if node.is_leaf() {
                DagNode::leaf(&chunks[node.lattice_index])
            } else {
                let mut links = Vec::with_capacity(node.children.len());
                for child in &node.children {
                    links.push(self.store_node(child, chunks, docs, cids).await?);
                }
                DagNode::interior(links)
            };

            let encoded = doc.encode();
            if encoded.len() > BLOCK_SIZE {
                return Err(Error::OversizedNode(encoded.len(), BLOCK_SIZE));
            }
            let cid = self.store.add_raw(encoded.clone()).await?;
            docs[node.lattice_index] = Some(encoded);
            cids[node.lattice_index] = Some(cid.clone());
            Ok(cid)
        })
    }
}
