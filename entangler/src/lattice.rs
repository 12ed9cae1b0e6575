// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::block::{Block, BlockId, BlockStatus, RecoverPair, RequestId};
use crate::getter::BlockGetter;
use crate::params::Params;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to recover block {index} (parity: {is_parity}, strand: {strand})")]
    RecoveryFailed {
        index: usize,
        is_parity: bool,
        strand: usize,
    },

    #[error("Block index {0} is out of range")]
    InvalidIndex(usize),

    #[error("Strand {0} is out of range")]
    InvalidStrand(usize),
}

/// How [`Lattice::get_chunk`] drives recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Depth-first, one pair at a time.
    #[default]
    Sequential,
    /// All pairs of a block race concurrently; the first reconstruction wins
    /// and cancels its siblings.
    Parallel,
}

/// The in-memory entanglement lattice of one file: `N` data blocks plus
/// `alpha * N` parity blocks, wired according to the strand geometry.
///
/// The lattice performs no I/O itself; all block bytes come through the
/// getter. A lattice lives for a single download or repair session.
pub struct Lattice<G> {
    params: Params,
    data_blocks: Vec<Block>,
    parity_blocks: Vec<Vec<Block>>,
    getter: G,
    switch_depth: u32,
    mode: RecoveryMode,
    request_counter: AtomicU64,
}

impl<G: BlockGetter> Lattice<G> {
    /// Builds the lattice structure and wires all neighbor links.
    pub fn new(params: Params, getter: G, switch_depth: u32) -> Self {
        let n = params.num_blocks();
        let alpha = params.alpha();

        // Topology first: per-strand left/right links for every block.
        let mut data_left: Vec<Vec<Option<BlockId>>> = vec![vec![None; alpha]; n];
        let mut data_right: Vec<Vec<Option<BlockId>>> = vec![vec![None; alpha]; n];
        let mut parity_right: Vec<Vec<usize>> = vec![vec![0; n]; alpha];
        let mut wrap_modified: Vec<Vec<bool>> = vec![vec![false; n]; alpha];

        for i in 1..=n {
            for (k, strand) in params.strands().iter().enumerate() {
                let forward = params.forward_neighbor(i, *strand);
                let (right_data, wrapped) = if params.is_valid_index(forward) {
                    (forward, false)
                } else {
                    (params.chain_start(i, *strand), true)
                };
                data_right[i - 1][k] = Some(BlockId::Parity(k, i));
                data_left[right_data - 1][k] = Some(BlockId::Parity(k, i));
                parity_right[k][i - 1] = right_data;
                if wrapped && right_data != i {
                    wrap_modified[k][i - 1] = true;
                }
            }
        }

        let data_blocks: Vec<Block> = (1..=n)
            .map(|i| {
                let left: Vec<BlockId> = data_left[i - 1]
                    .iter()
                    .map(|id| id.expect("lattice wiring covers every strand slot"))
                    .collect();
                let right: Vec<BlockId> = data_right[i - 1]
                    .iter()
                    .map(|id| id.expect("lattice wiring covers every strand slot"))
                    .collect();
                // One pair per strand: the right parity together with the
                // data block on its far side. A self-wrapped strand yields a
                // pair whose sides coincide, which recovery treats as a copy.
                let pairs: Vec<RecoverPair> = (0..alpha)
                    .map(|k| {
                        let parity = BlockId::Parity(k, i);
                        let far = parity_right[k][i - 1];
                        if far == i {
                            RecoverPair {
                                left: parity,
                                right: parity,
                            }
                        } else {
                            RecoverPair {
                                left: parity,
                                right: BlockId::Data(far),
                            }
                        }
                    })
                    .collect();
                Block::new(BlockId::Data(i), left, right, false, pairs)
            })
            .collect();

        let parity_blocks: Vec<Vec<Block>> = (0..alpha)
            .map(|k| {
                (1..=n)
                    .map(|i| {
                        let right_data = parity_right[k][i - 1];
                        let pair = if right_data == i {
                            RecoverPair {
                                left: BlockId::Data(i),
                                right: BlockId::Data(i),
                            }
                        } else {
                            RecoverPair {
                                left: BlockId::Data(i),
                                right: BlockId::Data(right_data),
                            }
                        };
                        Block::new(
                            BlockId::Parity(k, i),
                            vec![BlockId::Data(i)],
                            vec![BlockId::Data(right_data)],
                            wrap_modified[k][i - 1],
                            vec![pair],
                        )
                    })
                    .collect()
            })
            .collect();

        Self {
            params,
            data_blocks,
            parity_blocks,
            getter,
            switch_depth,
            mode: RecoveryMode::Sequential,
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn with_mode(mut self, mode: RecoveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn getter(&self) -> &G {
        &self.getter
    }

    fn block(&self, id: BlockId) -> &Block {
        match id {
            BlockId::Data(i) => &self.data_blocks[i - 1],
            BlockId::Parity(k, i) => &self.parity_blocks[k][i - 1],
        }
    }

    pub fn data_block(&self, index: usize) -> Result<&Block, Error> {
        if !self.params.is_valid_index(index) {
            return Err(Error::InvalidIndex(index));
        }
        Ok(&self.data_blocks[index - 1])
    }

    pub fn parity_block(&self, strand: usize, index: usize) -> Result<&Block, Error> {
        if strand >= self.params.alpha() {
            return Err(Error::InvalidStrand(strand));
        }
        if !self.params.is_valid_index(index) {
            return Err(Error::InvalidIndex(index));
        }
        Ok(&self.parity_blocks[strand][index - 1])
    }

    /// Injects a freshly re-encoded parity chunk.
    pub fn update_parity(&self, index: usize, strand: usize, data: Bytes) -> Result<(), Error> {
        self.parity_block(strand, index)?.set_data(data, true);
        Ok(())
    }

    /// Fetches or recovers the data block at the 1-based `index`, returning
    /// its bytes and whether recovery produced them.
    pub async fn get_chunk(&self, index: usize) -> Result<(Bytes, bool), Error> {
        let block = self.data_block(index)?;
        let rid = self.next_request_id();
        match self.mode {
            RecoveryMode::Sequential => {
                self.recover_block(block.id(), rid, self.switch_depth).await
            }
            RecoveryMode::Parallel => {
                let token = CancellationToken::new();
                self.recover_block_parallel(block.id(), rid, self.switch_depth, &token)
                    .await;
            }
        }
        let data = block.data().map_err(|_| Error::RecoveryFailed {
            index,
            is_parity: false,
            strand: 0,
        })?;
        Ok((data, block.is_repaired()))
    }

    /// Fetches or recovers every data block, in index order.
    pub async fn get_all_data(&self) -> Result<Vec<Bytes>, Error> {
        let mut data = Vec::with_capacity(self.params.num_blocks());
        for index in 1..=self.params.num_blocks() {
            let (chunk, _) = self.get_chunk(index).await?;
            data.push(chunk);
        }
        Ok(data)
    }

    fn next_request_id(&self) -> RequestId {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn download_block(&self, block: &Block) -> bool {
        let fetched = match block.id() {
            BlockId::Data(i) => self.getter.get_data(i).await,
            BlockId::Parity(k, i) => self.getter.get_parity(i, k).await,
        };
        match fetched {
            Ok(data) => {
                block.set_data(data, false);
                true
            }
            Err(e) => {
                debug!(block = ?block.id(), error = %e, "direct download failed");
                false
            }
        }
    }

    /// Depth-bounded sequential recovery. Direct download is attempted at
    /// every depth; descending into neighbor pairs costs one depth level.
    fn recover_block<'a>(
        &'a self,
        id: BlockId,
        rid: RequestId,
        depth: u32,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let block = self.block(id);
            if !block.start_repair(rid) {
                // available, or this walk already visited the block
                return;
            }

            let mut success = self.download_block(block).await;
            if !success && depth > 0 {
                for pair in block.recover_pairs() {
                    self.recover_block(pair.left, rid, depth - 1).await;
                    let left = self.block(pair.left);
                    if left.status() != BlockStatus::DataAvailable {
                        continue;
                    }

                    if pair.left == pair.right {
                        if let Ok(data) = left.data() {
                            block.set_data(data, true);
                            success = true;
                            break;
                        }
                        continue;
                    }

                    self.recover_block(pair.right, rid, depth - 1).await;
                    let right = self.block(pair.right);
                    if right.status() != BlockStatus::DataAvailable {
                        continue;
                    }

                    if let (Ok(left_chunk), Ok(right_chunk)) = (left.data(), right.data()) {
                        if block.recover(&left_chunk, &right_chunk).is_ok() {
                            success = true;
                            break;
                        }
                    }
                }
            }

            if success {
                debug!(block = ?id, "recovered");
            } else {
                debug!(block = ?id, "recovery failed");
            }
            block.finish_repair(success);
        })
    }

    /// Parallel recovery: the pairs of a block race, both sides of a pair
    /// run concurrently, and the first pair to reconstruct the block cancels
    /// the others through the shared token.
    fn recover_block_parallel<'a>(
        &'a self,
        id: BlockId,
        rid: RequestId,
        depth: u32,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if token.is_cancelled() {
                return;
            }
            let block = self.block(id);
            if !block.start_repair(rid) {
                return;
            }

            let mut success = self.download_block(block).await;
            if !success && depth > 0 {
                let child = token.child_token();
                let mut attempts: FuturesUnordered<_> = block
                    .recover_pairs()
                    .iter()
                    .map(|pair| {
                        let pair = *pair;
                        let child = child.clone();
                        async move {
                            if pair.left == pair.right {
                                self.recover_block_parallel(pair.left, rid, depth - 1, &child)
                                    .await;
                            } else {
                                futures::join!(
                                    self.recover_block_parallel(pair.left, rid, depth - 1, &child),
                                    self.recover_block_parallel(pair.right, rid, depth - 1, &child),
                                );
                            }
                            if child.is_cancelled() {
                                return None;
                            }
                            let left = self.block(pair.left);
                            if left.status() != BlockStatus::DataAvailable {
                                return None;
                            }
                            if pair.left == pair.right {
                                return left.data().ok().map(|data| (data, None));
                            }
                            let right = self.block(pair.right);
                            if right.status() != BlockStatus::DataAvailable {
                                return None;
                            }
                            match (left.data(), right.data()) {
                                (Ok(l), Ok(r)) => Some((l, Some(r))),
                                _ => None,
                            }
                        }
                    })
                    .collect();

                while let Some(outcome) = attempts.next().await {
                    let reconstructed = match outcome {
                        Some((copy, None)) => {
                            block.set_data(copy, true);
                            true
                        }
                        Some((left, Some(right))) => block.recover(&left, &right).is_ok(),
                        None => false,
                    };
                    if reconstructed {
                        success = true;
                        child.cancel();
                        break;
                    }
                }
            }

            block.finish_repair(success);
        })
    }
}
