// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

/// Configuration for the entanglement layout.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// The number of parity strands entangled with each data block.
    pub alpha: u8,
    /// The number of horizontal strands, i.e. the lattice column height.
    pub s: u8,
    /// The number of helical strands. Must be zero or a multiple of `s`.
    pub p: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alpha: 3,
            s: 5,
            p: 5,
        }
    }
}

impl Config {
    /// Creates a new `Config` with the given strand counts.
    pub fn new(alpha: u8, s: u8, p: u8) -> Self {
        Self { alpha, s, p }
    }
}
