// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;

use crate::params::Params;
use crate::strand::StrandType;

/// XORs two equal-length chunks. Callers align chunk lengths beforehand.
pub fn xor_chunks(chunk1: &[u8], chunk2: &[u8]) -> Bytes {
    let mut chunk = Vec::with_capacity(chunk1.len());
    for i in 0..chunk1.len() {
        chunk.push(chunk1[i] ^ chunk2[i]);
    }
    Bytes::from(chunk)
}

/// Pads a chunk with trailing zeros up to `size`.
pub fn pad_chunk(chunk: &[u8], size: usize) -> Bytes {
    let mut padded = chunk.to_vec();
    padded.resize(size.max(chunk.len()), 0);
    Bytes::from(padded)
}

/// Strips the trailing zero padding introduced by block alignment.
pub fn trim_zero_padding(chunk: &Bytes) -> Bytes {
    let end = chunk
        .iter()
        .rposition(|b| *b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    chunk.slice(0..end)
}

/// Produces the parity chunks of one strand.
///
/// The parity at index `i` entangles the data block `i` with the strand's
/// forward neighbor, or with the chain-start block when the strand wraps.
/// A chain consisting of a single block yields a plain copy.
pub fn encode_strand(params: &Params, blocks: &[Bytes], strand: StrandType) -> Vec<Bytes> {
    let n = params.num_blocks();
    let mut parity = Vec::with_capacity(n);
    for index in 1..=n {
        let forward = params.forward_neighbor(index, strand);
        let partner = if params.is_valid_index(forward) {
            forward
        } else {
            params.chain_start(index, strand)
        };
        if partner == index {
            parity.push(blocks[index - 1].clone());
        } else {
            parity.push(xor_chunks(&blocks[index - 1], &blocks[partner - 1]));
        }
    }
    parity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(fill: u8, len: usize) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn xor_round_trip() {
        let a = Bytes::from_static(&[1, 2, 3, 4]);
        let b = Bytes::from_static(&[9, 9, 9, 9]);
        let x = xor_chunks(&a, &b);
        assert_eq!(xor_chunks(&x, &b), a);
        assert_eq!(xor_chunks(&x, &a), b);
    }

    #[test]
    fn pad_and_trim_are_inverse_for_nonzero_tails() {
        let chunk = Bytes::from_static(&[5, 0, 7]);
        let padded = pad_chunk(&chunk, 8);
        assert_eq!(padded.len(), 8);
        assert_eq!(trim_zero_padding(&padded), chunk);
    }

    #[test]
    fn trim_of_all_zero_chunk_is_empty() {
        assert_eq!(trim_zero_padding(&Bytes::from_static(&[0, 0])).len(), 0);
    }

    #[test]
    fn encode_strand_xors_forward_neighbors() {
        let params = Params::new(3, 2, 2, 4).unwrap();
        let blocks = vec![chunk(1, 4), chunk(2, 4), chunk(4, 4), chunk(8, 4)];
        let parity = encode_strand(&params, &blocks, StrandType::Horizontal);

        // blocks 1 and 2 pair with 3 and 4; 3 and 4 wrap back to 1 and 2
        assert_eq!(parity[0], xor_chunks(&blocks[0], &blocks[2]));
        assert_eq!(parity[1], xor_chunks(&blocks[1], &blocks[3]));
        assert_eq!(parity[2], xor_chunks(&blocks[2], &blocks[0]));
        assert_eq!(parity[3], xor_chunks(&blocks[3], &blocks[1]));
    }

    #[test]
    fn encode_strand_copies_on_self_wrap() {
        // a single column wraps every strand onto itself
        let params = Params::new(3, 4, 4, 4).unwrap();
        let blocks = vec![chunk(1, 2), chunk(2, 2), chunk(3, 2), chunk(4, 2)];
        for strand in params.strands().to_vec() {
            let parity = encode_strand(&params, &blocks, strand);
            match strand {
                StrandType::Horizontal => assert_eq!(parity, blocks),
                // helical chains of a single column have length one as well
                _ => {
                    for (i, p) in parity.iter().enumerate() {
                        assert_eq!(p, &blocks[i], "strand {:?} block {}", strand, i + 1);
                    }
                }
            }
        }
    }
}
