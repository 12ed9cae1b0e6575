// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use std::sync::Mutex;

use crate::encode::xor_chunks;

/// Identifier of a recovery walk. Each walk visits any block at most once.
pub type RequestId = u64;

/// Address of a block inside the lattice arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// Data block with a 1-based index.
    Data(usize),
    /// Parity block on a strand, with a 1-based index.
    Parity(usize, usize),
}

impl BlockId {
    pub fn index(&self) -> usize {
        match self {
            BlockId::Data(i) => *i,
            BlockId::Parity(_, i) => *i,
        }
    }

    pub fn is_parity(&self) -> bool {
        matches!(self, BlockId::Parity(_, _))
    }

    /// Strand of a parity block; data blocks report strand 0.
    pub fn strand(&self) -> usize {
        match self {
            BlockId::Data(_) => 0,
            BlockId::Parity(k, _) => *k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    NoData,
    Pending,
    DataAvailable,
    RepairFailed,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Block has no data available")]
    NoData,

    #[error("Cannot recover from buffers of different lengths: {0} != {1}")]
    LengthMismatch(usize, usize),
}

/// A pair of blocks whose XOR reconstructs the owning block. When the strand
/// wraps onto itself both sides are the same block and recovery is a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverPair {
    pub left: BlockId,
    pub right: BlockId,
}

#[derive(Debug)]
struct BlockState {
    status: BlockStatus,
    data: Option<Bytes>,
    is_repaired: bool,
    last_request: Option<RequestId>,
}

/// One cell of the lattice: either a data block or a parity block, together
/// with its neighbor links and repair state. Topology is fixed at lattice
/// construction; the mutable state sits behind a per-block mutex so recovery
/// tasks can share the lattice.
#[derive(Debug)]
pub struct Block {
    id: BlockId,
    left: Vec<BlockId>,
    right: Vec<BlockId>,
    is_wrap_modified: bool,
    pairs: Vec<RecoverPair>,
    state: Mutex<BlockState>,
}

impl Block {
    pub(crate) fn new(
        id: BlockId,
        left: Vec<BlockId>,
        right: Vec<BlockId>,
        is_wrap_modified: bool,
        pairs: Vec<RecoverPair>,
    ) -> Self {
        Self {
            id,
            left,
            right,
            is_wrap_modified,
            pairs,
            state: Mutex::new(BlockState {
                status: BlockStatus::NoData,
                data: None,
                is_repaired: false,
                last_request: None,
            }),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn index(&self) -> usize {
        self.id.index()
    }

    pub fn is_parity(&self) -> bool {
        self.id.is_parity()
    }

    pub fn strand(&self) -> usize {
        self.id.strand()
    }

    /// Left neighbor links: the preceding parity per strand for data blocks,
    /// the left data block for parity blocks.
    pub fn left_neighbors(&self) -> &[BlockId] {
        &self.left
    }

    /// Right neighbor links, mirroring [`Block::left_neighbors`].
    pub fn right_neighbors(&self) -> &[BlockId] {
        &self.right
    }

    /// Whether this parity's right link was redirected to the chain start
    /// because its strand wraps.
    pub fn is_wrap_modified(&self) -> bool {
        self.is_wrap_modified
    }

    /// The candidate pairs able to reconstruct this block, in strand order.
    pub fn recover_pairs(&self) -> &[RecoverPair] {
        &self.pairs
    }

    pub fn status(&self) -> BlockStatus {
        self.state.lock().unwrap().status
    }

    /// Admits this block into the walk identified by `rid`. Returns false if
    /// the data is already available or the walk visited the block before.
    pub fn start_repair(&self, rid: RequestId) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status == BlockStatus::DataAvailable || state.last_request == Some(rid) {
            return false;
        }
        state.last_request = Some(rid);
        state.status = BlockStatus::Pending;
        true
    }

    /// Closes the repair attempt opened by [`Block::start_repair`].
    pub fn finish_repair(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        if success && state.data.is_some() {
            state.status = BlockStatus::DataAvailable;
        } else if state.status != BlockStatus::DataAvailable {
            state.status = BlockStatus::RepairFailed;
        }
    }

    pub fn set_data(&self, data: Bytes, recovered: bool) {
        let mut state = self.state.lock().unwrap();
        state.data = Some(data);
        state.status = BlockStatus::DataAvailable;
        state.is_repaired = recovered;
    }

    pub fn data(&self) -> Result<Bytes, Error> {
        let state = self.state.lock().unwrap();
        match (&state.status, &state.data) {
            (BlockStatus::DataAvailable, Some(data)) => Ok(data.clone()),
            _ => Err(Error::NoData),
        }
    }

    /// Whether the block's data was produced by recovery rather than a
    /// direct fetch.
    pub fn is_repaired(&self) -> bool {
        self.state.lock().unwrap().is_repaired
    }

    /// Reconstructs the block by XOR-ing the two equal-length buffers.
    pub fn recover(&self, left: &Bytes, right: &Bytes) -> Result<(), Error> {
        if left.len() != right.len() {
            return Err(Error::LengthMismatch(left.len(), right.len()));
        }
        self.set_data(xor_chunks(left, right), true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_block() -> Block {
        Block::new(BlockId::Data(1), vec![], vec![], false, vec![])
    }

    #[test]
    fn start_repair_admits_once_per_request() {
        let block = data_block();
        assert!(block.start_repair(7));
        assert!(!block.start_repair(7), "same walk must not re-enter");
        assert_eq!(block.status(), BlockStatus::Pending);

        block.finish_repair(false);
        assert_eq!(block.status(), BlockStatus::RepairFailed);
        assert!(block.start_repair(8), "a later walk may try again");
    }

    #[test]
    fn start_repair_rejects_available_block() {
        let block = data_block();
        block.set_data(Bytes::from("chunk"), false);
        assert!(!block.start_repair(1));
        assert_eq!(block.status(), BlockStatus::DataAvailable);
    }

    #[test]
    fn finish_repair_without_data_fails_block() {
        let block = data_block();
        block.start_repair(1);
        block.finish_repair(true);
        assert_eq!(block.status(), BlockStatus::RepairFailed);
        assert!(block.data().is_err());
    }

    #[test]
    fn finish_repair_is_idempotent() {
        let block = data_block();
        block.start_repair(1);
        block.set_data(Bytes::from("chunk"), true);
        block.finish_repair(true);
        block.finish_repair(true);
        assert_eq!(block.status(), BlockStatus::DataAvailable);
        assert!(block.is_repaired());
    }

    #[test]
    fn recover_xors_buffers() {
        let block = data_block();
        let target = Bytes::from_static(&[0xAA, 0x0F, 0x00]);
        let mask = Bytes::from_static(&[0x55, 0x55, 0x55]);
        let other = xor_chunks(&target, &mask);

        block.recover(&mask, &other).unwrap();
        assert_eq!(block.data().unwrap(), target);
        assert!(block.is_repaired());
    }

    #[test]
    fn recover_rejects_length_mismatch() {
        let block = data_block();
        let result = block.recover(&Bytes::from_static(&[1, 2]), &Bytes::from_static(&[1]));
        assert!(matches!(result, Err(Error::LengthMismatch(2, 1))));
    }
}
