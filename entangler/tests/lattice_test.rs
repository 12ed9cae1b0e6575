// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Result;
use async_trait::async_trait;
use braid_entangler::block::BlockStatus;
use braid_entangler::encode::{encode_strand, xor_chunks};
use braid_entangler::getter::{BlockGetter, Error as GetterError};
use braid_entangler::lattice::{Lattice, RecoveryMode};
use braid_entangler::params::Params;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const BLOCK_LEN: usize = 32;

// deterministic per-index chunk content
fn chunk(index: usize) -> Bytes {
    let mut bytes = BytesMut::with_capacity(BLOCK_LEN);
    let mut val = index as u8;
    for _ in 0..BLOCK_LEN {
        bytes.put_u8(val);
        val = val.wrapping_mul(31).wrapping_add(7);
    }
    bytes.freeze()
}

/// In-memory getter over pre-encoded blocks, with per-block kill switches
/// and fetch counters.
#[derive(Clone)]
struct MemGetter {
    data: Arc<HashMap<usize, Bytes>>,
    parity: Arc<HashMap<(usize, usize), Bytes>>,
    missing_data: Arc<HashSet<usize>>,
    missing_parity: Arc<HashSet<(usize, usize)>>,
    data_fetches: Arc<AtomicU64>,
    parity_fetches: Arc<AtomicU64>,
}

#[async_trait]
impl BlockGetter for MemGetter {
    async fn get_data(&self, index: usize) -> Result<Bytes, GetterError> {
        if self.missing_data.contains(&index) {
            return Err(GetterError::Unavailable(format!("data {}", index)));
        }
        match self.data.get(&index) {
            Some(bytes) => {
                self.data_fetches.fetch_add(1, Ordering::Relaxed);
                Ok(bytes.clone())
            }
            None => Err(GetterError::Unavailable(format!("data {}", index))),
        }
    }

    async fn get_parity(&self, index: usize, strand: usize) -> Result<Bytes, GetterError> {
        if self.missing_parity.contains(&(strand, index)) {
            return Err(GetterError::Unavailable(format!(
                "parity {} strand {}",
                index, strand
            )));
        }
        match self.parity.get(&(strand, index)) {
            Some(bytes) => {
                self.parity_fetches.fetch_add(1, Ordering::Relaxed);
                Ok(bytes.clone())
            }
            None => Err(GetterError::Unavailable(format!(
                "parity {} strand {}",
                index, strand
            ))),
        }
    }
}

struct Fixture {
    params: Params,
    blocks: Vec<Bytes>,
    parity: HashMap<(usize, usize), Bytes>,
}

impl Fixture {
    fn new(s: u8, n: usize) -> Self {
        let params = Params::new(3, s, s, n).unwrap();
        let blocks: Vec<Bytes> = (1..=n).map(chunk).collect();
        let mut parity = HashMap::new();
        for (k, strand) in params.strands().to_vec().into_iter().enumerate() {
            for (i, p) in encode_strand(&params, &blocks, strand).into_iter().enumerate() {
                parity.insert((k, i + 1), p);
            }
        }
        Self {
            params,
            blocks,
            parity,
        }
    }

    fn getter(
        &self,
        missing_data: &[usize],
        missing_parity: &[(usize, usize)],
    ) -> MemGetter {
        let data: HashMap<usize, Bytes> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (i + 1, b.clone()))
            .collect();
        MemGetter {
            data: Arc::new(data),
            parity: Arc::new(self.parity.clone()),
            missing_data: Arc::new(missing_data.iter().copied().collect()),
            missing_parity: Arc::new(missing_parity.iter().copied().collect()),
            data_fetches: Arc::new(AtomicU64::new(0)),
            parity_fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lattice(
        &self,
        missing_data: &[usize],
        missing_parity: &[(usize, usize)],
        depth: u32,
    ) -> Lattice<MemGetter> {
        Lattice::new(
            self.params.clone(),
            self.getter(missing_data, missing_parity),
            depth,
        )
    }
}

#[tokio::test]
async fn all_blocks_present_nothing_is_repaired() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[], &[], 3);

    let data = lattice.get_all_data().await?;
    assert_eq!(data, fixture.blocks);
    for i in 1..=9 {
        assert!(!lattice.data_block(i)?.is_repaired(), "block {}", i);
    }
    Ok(())
}

#[tokio::test]
async fn single_block_loss_recovers_with_one_pair() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[7], &[], 3);

    let (data, repaired) = lattice.get_chunk(7).await?;
    assert_eq!(data, fixture.blocks[6]);
    assert!(repaired);

    // first strand succeeds immediately: one parity and one data fetch
    let getter = lattice.getter();
    assert_eq!(getter.parity_fetches.load(Ordering::Relaxed), 1);
    assert_eq!(getter.data_fetches.load(Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test]
async fn every_single_loss_position_is_recoverable() -> Result<()> {
    for n in [1usize, 2, 4, 5, 9, 11] {
        let fixture = Fixture::new(3, n);
        for lost in 1..=n {
            let lattice = fixture.lattice(&[lost], &[], 3);
            let (data, repaired) = lattice.get_chunk(lost).await?;
            assert_eq!(data, fixture.blocks[lost - 1], "n={} lost={}", n, lost);
            assert!(repaired, "n={} lost={}", n, lost);
        }
    }
    Ok(())
}

#[tokio::test]
async fn wrapped_strand_routes_through_chain_start() -> Result<()> {
    // block 5 sits in the last column; every strand wraps to a column-zero
    // block. Dropping the first strand's parity forces recovery onto the
    // next strand, whose pair partner is the chain-start block.
    let fixture = Fixture::new(3, 5);
    let lattice = fixture.lattice(&[5], &[(0, 5)], 3);

    let (data, repaired) = lattice.get_chunk(5).await?;
    assert_eq!(data, fixture.blocks[4]);
    assert!(repaired);

    // the dropped-strand parity could not be rebuilt: its only pair needs
    // the block we are recovering
    assert_eq!(
        lattice.parity_block(0, 5)?.status(),
        BlockStatus::RepairFailed
    );
    Ok(())
}

#[tokio::test]
async fn self_wrapped_strand_recovers_by_copy() -> Result<()> {
    // a single column wraps every chain onto itself; parity is a plain copy
    let fixture = Fixture::new(3, 3);
    let lattice = fixture.lattice(&[2], &[], 1);

    let (data, repaired) = lattice.get_chunk(2).await?;
    assert_eq!(data, fixture.blocks[1]);
    assert!(repaired);
    Ok(())
}

#[tokio::test]
async fn depth_zero_permits_direct_download_only() -> Result<()> {
    let fixture = Fixture::new(3, 9);

    let lattice = fixture.lattice(&[], &[], 0);
    assert!(lattice.get_chunk(4).await.is_ok());

    let lattice = fixture.lattice(&[4], &[], 0);
    assert!(lattice.get_chunk(4).await.is_err());
    Ok(())
}

#[tokio::test]
async fn depth_one_succeeds_when_a_pair_is_intact() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[4], &[], 1);
    let (data, repaired) = lattice.get_chunk(4).await?;
    assert_eq!(data, fixture.blocks[3]);
    assert!(repaired);
    Ok(())
}

#[tokio::test]
async fn deep_loss_needs_more_depth() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    // block 4 loses all forward data blocks and two of its parities; the
    // surviving pair needs block 8, which itself must be recovered first.
    let missing_data = [4, 7, 8, 9];
    let missing_parity = [(0, 4), (1, 4)];

    let lattice = fixture.lattice(&missing_data, &missing_parity, 1);
    assert!(lattice.get_chunk(4).await.is_err(), "depth 1 must fail");

    let lattice = fixture.lattice(&missing_data, &missing_parity, 3);
    let (data, repaired) = lattice.get_chunk(4).await?;
    assert_eq!(data, fixture.blocks[3]);
    assert!(repaired);
    Ok(())
}

#[tokio::test]
async fn unrecoverable_block_fails_without_hanging() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    // drop the block and all of its parities; each parity's only pair
    // needs the block itself, so the walk terminates on the cycle guard
    let lattice = fixture.lattice(&[5], &[(0, 5), (1, 5), (2, 5)], 10);
    assert!(lattice.get_chunk(5).await.is_err());

    // other blocks are unaffected
    let (data, repaired) = lattice.get_chunk(6).await?;
    assert_eq!(data, fixture.blocks[5]);
    assert!(!repaired);
    Ok(())
}

#[tokio::test]
async fn failed_then_lucky_walks_are_independent() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[5], &[(0, 5), (1, 5), (2, 5)], 10);

    assert!(lattice.get_chunk(5).await.is_err());
    // a second walk re-enters the failed block instead of being stuck on
    // the previous request's visit marker
    assert!(lattice.get_chunk(5).await.is_err());
    Ok(())
}

#[tokio::test]
async fn update_parity_feeds_later_recoveries() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[7], &[(0, 7), (1, 7), (2, 7)], 3);

    // without parities the block is lost; inject a re-encoded parity first
    let strand = fixture.params.strands()[0];
    let partner = {
        let forward = fixture.params.forward_neighbor(7, strand);
        if fixture.params.is_valid_index(forward) {
            forward
        } else {
            fixture.params.chain_start(7, strand)
        }
    };
    let parity = xor_chunks(&fixture.blocks[6], &fixture.blocks[partner - 1]);
    lattice.update_parity(7, 0, parity)?;

    let (data, repaired) = lattice.get_chunk(7).await?;
    assert_eq!(data, fixture.blocks[6]);
    assert!(repaired);
    Ok(())
}

#[tokio::test]
async fn parallel_mode_recovers_single_loss() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture
        .lattice(&[7], &[], 3)
        .with_mode(RecoveryMode::Parallel);

    let (data, repaired) = lattice.get_chunk(7).await?;
    assert_eq!(data, fixture.blocks[6]);
    assert!(repaired);
    Ok(())
}

#[tokio::test]
async fn parallel_mode_handles_deep_loss_and_failure() -> Result<()> {
    let fixture = Fixture::new(3, 9);
    let missing_data = [4, 7, 8, 9];
    let missing_parity = [(0, 4), (1, 4)];

    let lattice = fixture
        .lattice(&missing_data, &missing_parity, 3)
        .with_mode(RecoveryMode::Parallel);
    let (data, repaired) = lattice.get_chunk(4).await?;
    assert_eq!(data, fixture.blocks[3]);
    assert!(repaired);

    let lattice = fixture
        .lattice(&[5], &[(0, 5), (1, 5), (2, 5)], 10)
        .with_mode(RecoveryMode::Parallel);
    assert!(lattice.get_chunk(5).await.is_err());
    Ok(())
}

#[test]
fn lattice_wiring_matches_the_data_model() {
    let fixture = Fixture::new(3, 9);
    let lattice = fixture.lattice(&[], &[], 0);

    for i in 1..=9 {
        let block = lattice.data_block(i).unwrap();
        assert_eq!(block.left_neighbors().len(), 3);
        assert_eq!(block.right_neighbors().len(), 3);
        assert_eq!(block.recover_pairs().len(), 3);
        for (k, id) in block.right_neighbors().iter().enumerate() {
            assert!(id.is_parity());
            assert_eq!(id.strand(), k);
            assert_eq!(id.index(), i);
        }
        for k in 0..3 {
            let parity = lattice.parity_block(k, i).unwrap();
            assert_eq!(parity.left_neighbors().len(), 1);
            assert_eq!(parity.right_neighbors().len(), 1);
            assert_eq!(parity.recover_pairs().len(), 1);
        }
    }

    // wrap flags sit on the parities of last-column blocks
    for i in 7..=9 {
        for k in 0..3 {
            assert!(lattice.parity_block(k, i).unwrap().is_wrap_modified());
        }
    }
    assert!(!lattice.parity_block(0, 1).unwrap().is_wrap_modified());
}
