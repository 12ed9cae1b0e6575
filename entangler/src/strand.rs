// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

/// One of the three strand directions a parity chain can take through the
/// lattice. Every strand advances one column per step; the variant selects
/// the row step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrandType {
    Left,
    Horizontal,
    Right,
}

impl StrandType {
    /// Row step applied per column advance: -1, 0 or 1.
    pub fn row_step(self) -> i64 {
        match self {
            StrandType::Left => -1,
            StrandType::Horizontal => 0,
            StrandType::Right => 1,
        }
    }

    /// Turns the strand type into an index usable for vector storage.
    /// The order is: Left, Horizontal, Right.
    pub fn to_index(self) -> usize {
        match self {
            StrandType::Left => 0,
            StrandType::Horizontal => 1,
            StrandType::Right => 2,
        }
    }

    /// Converts a vector index back into a strand type.
    pub fn try_from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(StrandType::Left),
            1 => Some(StrandType::Horizontal),
            2 => Some(StrandType::Right),
            _ => None,
        }
    }

    /// The first `alpha` strand types in index order. `alpha` is clamped to
    /// the three known directions.
    pub fn list(alpha: usize) -> Vec<StrandType> {
        [StrandType::Left, StrandType::Horizontal, StrandType::Right][..alpha.min(3)].to_vec()
    }
}

impl From<StrandType> for &'static str {
    fn from(val: StrandType) -> &'static str {
        match val {
            StrandType::Left => "Left",
            StrandType::Horizontal => "Horizontal",
            StrandType::Right => "Right",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trip() {
        for idx in 0..3 {
            let strand = StrandType::try_from_index(idx).unwrap();
            assert_eq!(strand.to_index(), idx);
        }
        assert_eq!(StrandType::try_from_index(3), None);
    }

    #[test]
    fn list_respects_alpha() {
        assert_eq!(StrandType::list(1), vec![StrandType::Left]);
        assert_eq!(
            StrandType::list(3),
            vec![
                StrandType::Left,
                StrandType::Horizontal,
                StrandType::Right
            ]
        );
        assert_eq!(StrandType::list(7).len(), 3);
    }
}
