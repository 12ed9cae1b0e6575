// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::params::{self, Params};

/// Metadata document describing one entangled file. Produced at upload time
/// and stored in the block store next to the file; everything the lattice
/// and the recovery walker need to rebuild the file comes from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub alpha: u8,
    pub s: u8,
    pub p: u8,
    /// CID of the root DAG node of the original file.
    #[serde(rename = "originalFileCID")]
    pub original_file_cid: String,
    /// Per-strand CID of the parity manifest block.
    #[serde(rename = "treeCIDs")]
    pub tree_cids: Vec<String>,
    /// Total number of lattice data blocks (leaves plus interior nodes).
    pub num_blocks: usize,
    pub max_children: usize,
    pub leaves: usize,
    pub depth: usize,
    pub num_bytes: u64,
    /// Lattice block size; every block is zero-padded to this length before
    /// entanglement.
    pub chunk_size: u64,
    /// CID of each DAG node mapped to its 0-based lattice index.
    #[serde(rename = "dataCIDIndexMap")]
    pub data_cid_index_map: HashMap<String, usize>,
    /// Parity block CIDs per strand, ordered by block index.
    #[serde(rename = "parityCIDs")]
    pub parity_cids: Vec<Vec<String>>,
}

impl Metadata {
    pub fn params(&self) -> Result<Params, params::Error> {
        Params::new(self.alpha, self.s, self.p, self.num_blocks)
    }

    /// Inverse of `data_cid_index_map`: 1-based block index to CID.
    pub fn index_cid_map(&self) -> HashMap<usize, String> {
        self.data_cid_index_map
            .iter()
            .map(|(cid, idx)| (idx + 1, cid.clone()))
            .collect()
    }
}
