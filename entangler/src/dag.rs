// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Malformed dag node: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Malformed dag payload: {0}")]
    Payload(#[from] hex::FromHexError),
}

/// One node of a file's Merkle DAG as stored in the block store.
///
/// Interior nodes carry the CIDs of their children; leaves embed a slice of
/// the file payload, hex-encoded so the document stays valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DagNode {
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub data: String,
}

impl DagNode {
    pub fn leaf(payload: &[u8]) -> Self {
        Self {
            links: Vec::new(),
            data: hex::encode(payload),
        }
    }

    pub fn interior(links: Vec<String>) -> Self {
        Self {
            links,
            data: String::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.links.is_empty()
    }

    /// The embedded file payload of a leaf node.
    pub fn payload(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(hex::decode(&self.data)?))
    }

    pub fn encode(&self) -> Bytes {
        // serialization of a struct with string fields cannot fail
        Bytes::from(serde_json::to_vec(self).expect("dag node serializes"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trip() {
        let node = DagNode::leaf(&[0, 1, 2, 0xFF]);
        let decoded = DagNode::decode(&node.encode()).unwrap();
        assert!(decoded.is_leaf());
        assert_eq!(decoded.payload().unwrap(), Bytes::from_static(&[0, 1, 2, 0xFF]));
    }

    #[test]
    fn interior_round_trip() {
        let node = DagNode::interior(vec!["bafya".to_string(), "bafyb".to_string()]);
        let decoded = DagNode::decode(&node.encode()).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.links, vec!["bafya", "bafyb"]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(DagNode::decode(b"not json").is_err());
    }
}
