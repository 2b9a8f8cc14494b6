//! Classic 4KB-window LZSS.
//!
//! Control bytes are read LSB first: a set bit is a literal, a clear bit a
//! two-byte back reference into a ring buffer primed with spaces. The
//! reference packs a 12-bit ring position and a 4-bit length (plus
//! [`THRESHOLD`] + 1).

use crate::error::{PakError, Result};

/// Ring buffer size
pub const WINDOW_SIZE: usize = 4096;

/// Longest match a reference can encode
pub const MAX_MATCH: usize = 18;

/// Matches of this length or shorter are emitted as literals
pub const THRESHOLD: usize = 2;

/// Output bytes a single input byte can expand to at most (a two-byte
/// reference yields up to [`MAX_MATCH`])
pub const MAX_EXPANSION: usize = MAX_MATCH / 2;

const MASK: usize = WINDOW_SIZE - 1;
const HASH_SIZE: usize = 1 << 12;
const MAX_CHAIN: usize = 64;

/// Decode until `expected_size` bytes are produced
pub fn decompress(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    if expected_size > data.len().saturating_mul(MAX_EXPANSION) {
        return Err(PakError::DecompressionFailed(format!(
            "LZSS stream of {} bytes cannot produce {} bytes",
            data.len(),
            expected_size
        )));
    }
    let mut ring = [b' '; WINDOW_SIZE];
    let mut r = WINDOW_SIZE - MAX_MATCH;
    let mut output = Vec::with_capacity(expected_size);
    let mut input = data.iter().copied();
    let mut flags: u32 = 0;

    while output.len() < expected_size {
        flags >>= 1;
        if flags & 0x100 == 0 {
            let Some(c) = input.next() else { break };
            flags = u32::from(c) | 0xff00;
        }

        if flags & 1 != 0 {
            let Some(c) = input.next() else { break };
            output.push(c);
            ring[r] = c;
            r = (r + 1) & MASK;
        } else {
            let (Some(lo), Some(hi)) = (input.next(), input.next()) else {
                break;
            };
            let position = usize::from(lo) | (usize::from(hi & 0xf0) << 4);
            let length = usize::from(hi & 0x0f) + THRESHOLD + 1;
            for k in 0..length {
                if output.len() == expected_size {
                    break;
                }
                let c = ring[(position + k) & MASK];
                output.push(c);
                ring[r] = c;
                r = (r + 1) & MASK;
            }
        }
    }

    if output.len() != expected_size {
        return Err(PakError::DecompressionFailed(format!(
            "LZSS stream ended after {} of {} bytes",
            output.len(),
            expected_size
        )));
    }
    Ok(output)
}

/// Greedy encoder using hash chains over the already-emitted input.
///
/// Only real input is referenced, never the space-primed preamble, so any
/// conforming decoder reproduces the input exactly.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() / 2 + 16);
    let mut head = vec![usize::MAX; HASH_SIZE];
    let mut prev = vec![usize::MAX; data.len()];

    let mut group = Vec::with_capacity(16);
    let mut control: u8 = 0;
    let mut items = 0;
    let mut pos = 0;

    while pos < data.len() {
        let (best_len, best_src) = longest_match(data, pos, &head, &prev);

        if best_len > THRESHOLD {
            let ring_pos = (WINDOW_SIZE - MAX_MATCH + best_src) & MASK;
            group.push((ring_pos & 0xff) as u8);
            group.push((((ring_pos >> 8) & 0x0f) << 4) as u8 | (best_len - THRESHOLD - 1) as u8);
            for p in pos..pos + best_len {
                insert_hash(data, p, &mut head, &mut prev);
            }
            pos += best_len;
        } else {
            control |= 1 << items;
            group.push(data[pos]);
            insert_hash(data, pos, &mut head, &mut prev);
            pos += 1;
        }

        items += 1;
        if items == 8 {
            output.push(control);
            output.append(&mut group);
            control = 0;
            items = 0;
        }
    }

    if items > 0 {
        output.push(control);
        output.append(&mut group);
    }
    output
}

fn hash3(data: &[u8], pos: usize) -> Option<usize> {
    if pos + 3 > data.len() {
        return None;
    }
    let h = (usize::from(data[pos]) << 8) ^ (usize::from(data[pos + 1]) << 4) ^ usize::from(data[pos + 2]);
    Some(h & (HASH_SIZE - 1))
}

fn insert_hash(data: &[u8], pos: usize, head: &mut [usize], prev: &mut [usize]) {
    if let Some(h) = hash3(data, pos) {
        prev[pos] = head[h];
        head[h] = pos;
    }
}

fn longest_match(data: &[u8], pos: usize, head: &[usize], prev: &[usize]) -> (usize, usize) {
    let Some(h) = hash3(data, pos) else {
        return (0, 0);
    };
    let limit = MAX_MATCH.min(data.len() - pos);
    let mut candidate = head[h];
    let mut best = (0, 0);
    let mut steps = 0;

    while candidate != usize::MAX && steps < MAX_CHAIN {
        let distance = pos - candidate;
        if distance >= WINDOW_SIZE - MAX_MATCH {
            break;
        }
        let mut len = 0;
        while len < limit && data[candidate + len] == data[pos + len] {
            len += 1;
        }
        if len > best.0 {
            best = (len, candidate);
            if len == limit {
                break;
            }
        }
        candidate = prev[candidate];
        steps += 1;
    }
    best
}
