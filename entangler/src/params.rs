// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::strand::StrandType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid parameter {0}: {1}")]
    InvalidParameter(String, u64),
}

/// Entanglement parameters of one file.
///
/// Data blocks are laid out column-first on a grid of height `s`, one block
/// per cell, filling `N` cells. Block indices are 1-based. Each of the
/// `alpha` strands steps one column to the right per link, moving up, down
/// or straight depending on its [`StrandType`]; rows wrap modulo `s`. A
/// strand whose forward step leaves the `[1, N]` range wraps back to the
/// chain's starting block in column zero.
#[derive(Debug, Clone)]
pub struct Params {
    alpha: u8,
    s: u8,
    p: u8,
    n: usize,
    strands: Vec<StrandType>,
}

impl Params {
    pub fn new(alpha: u8, s: u8, p: u8, n: usize) -> Result<Self, Error> {
        if alpha == 0 || alpha > 3 {
            return Err(Error::InvalidParameter("alpha".to_string(), alpha as u64));
        }
        if s == 0 {
            return Err(Error::InvalidParameter("s".to_string(), s as u64));
        }
        // A helical strand completes a revolution only if its pitch lines up
        // with the column height, so p must be a multiple of s.
        if p != 0 && (p < s || p % s != 0) {
            return Err(Error::InvalidParameter("p".to_string(), p as u64));
        }
        if n == 0 {
            return Err(Error::InvalidParameter("n".to_string(), 0));
        }
        Ok(Self {
            alpha,
            s,
            p,
            n,
            strands: StrandType::list(alpha as usize),
        })
    }

    pub fn alpha(&self) -> usize {
        self.alpha as usize
    }

    pub fn s(&self) -> usize {
        self.s as usize
    }

    pub fn p(&self) -> u8 {
        self.p
    }

    pub fn num_blocks(&self) -> usize {
        self.n
    }

    /// The strand types in strand-index order.
    pub fn strands(&self) -> &[StrandType] {
        &self.strands
    }

    /// Column and row of a 1-based block index.
    fn grid_pos(&self, index: usize) -> (usize, usize) {
        ((index - 1) / self.s(), (index - 1) % self.s())
    }

    /// The index the given strand feeds into one column to the right.
    /// The result may exceed `N`; check with [`Params::is_valid_index`].
    pub fn forward_neighbor(&self, index: usize, strand: StrandType) -> usize {
        let s = self.s() as i64;
        let (x, y) = self.grid_pos(index);
        let row = (y as i64 + s + strand.row_step()) % s;
        (x + 1) * self.s() + row as usize + 1
    }

    /// Forward neighbor indices for all strands, in strand order.
    pub fn forward_neighbors(&self, index: usize) -> Vec<usize> {
        self.strands
            .iter()
            .map(|st| self.forward_neighbor(index, *st))
            .collect()
    }

    /// The lowest block index on the same chain as `index` for the given
    /// strand: the row where the chain crosses column zero.
    pub fn chain_start(&self, index: usize, strand: StrandType) -> usize {
        let s = self.s() as i64;
        let (x, y) = self.grid_pos(index);
        let row = (y as i64 - strand.row_step() * x as i64).rem_euclid(s);
        row as usize + 1
    }

    /// Chain start indices for all strands, in strand order.
    pub fn chain_starts(&self, index: usize) -> Vec<usize> {
        self.strands
            .iter()
            .map(|st| self.chain_start(index, *st))
            .collect()
    }

    pub fn is_valid_index(&self, index: usize) -> bool {
        index >= 1 && index <= self.n
    }
}
