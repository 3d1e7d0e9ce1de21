//! Bit-level plumbing: the pending-bit buffer, fixed-width integer packing
//! and the variable-length quantity encoding used for counts and lengths.
//!
//! All multi-bit integers are MSB-first.  A VLQ with chunk width `c` emits
//! `c`-bit chunks, least-significant chunk first; the top bit of each chunk
//! flags the final chunk and the remaining `c - 1` bits carry payload.

use std::collections::VecDeque;

/// FIFO of pending payload bits.
#[derive(Debug, Clone, Default)]
pub struct BitBuf {
    bits: VecDeque<bool>,
}

impl BitBuf {
    pub fn new() -> BitBuf {
        BitBuf::default()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push_back(bit);
    }

    pub fn extend(&mut self, bits: &[bool]) {
        self.bits.extend(bits.iter().copied());
    }

    /// Removes and returns the oldest `n` bits.  Callers check `len` first.
    pub fn take(&mut self, n: usize) -> Vec<bool> {
        debug_assert!(n <= self.bits.len());
        self.bits.drain(..n).collect()
    }

    /// Zero-pads up to a multiple of `n`, for the final flush of a carrier.
    pub fn pad_to(&mut self, n: usize) {
        while self.bits.len() % n != 0 {
            self.bits.push_back(false);
        }
    }
}

/// The low `width` bits of `v`, most significant first.
pub fn int_to_bits(v: u64, width: usize) -> Vec<bool> {
    debug_assert!(width <= 64);
    (0..width).rev().map(|i| v >> i & 1 == 1).collect()
}

/// Folds MSB-first bits back into an integer.
pub fn bits_to_int(bits: &[bool]) -> u64 {
    debug_assert!(bits.len() <= 64);
    bits.iter().fold(0, |acc, &b| acc << 1 | b as u64)
}

pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    let mut out = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for i in (0..8).rev() {
            out.push(b >> i & 1 == 1);
        }
    }
    out
}

/// Packs bits back into bytes; the tail is zero-padded if the length is not
/// a multiple of eight.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|c| c.iter().fold(0u8, |acc, &b| acc << 1 | b as u8) << (8 - c.len()))
        .collect()
}

/// VLQ-encodes `v` using `chunk`-bit chunks.
pub fn vlq_encode(v: u64, chunk: usize) -> Vec<bool> {
    debug_assert!((2..=63).contains(&chunk));
    let payload = chunk - 1;
    let mask = (1u64 << payload) - 1;
    let mut n = v;
    let mut out = Vec::new();
    loop {
        let k = n & mask;
        n >>= payload;
        let last = n == 0;
        out.extend(int_to_bits(k | (last as u64) << payload, chunk));
        if last {
            break;
        }
    }
    out
}

/// Decodes a full VLQ from a bit slice, returning the value and the number
/// of bits consumed.  The streaming reader decodes chunk by chunk instead.
pub fn vlq_decode(bits: &[bool], chunk: usize) -> Option<(u64, usize)> {
    let payload = chunk - 1;
    let mut v = 0u64;
    let mut shift = 0;
    let mut used = 0;
    for c in bits.chunks(chunk) {
        if c.len() < chunk {
            return None;
        }
        used += chunk;
        let raw = bits_to_int(c);
        v |= (raw & ((1 << payload) - 1)) << shift;
        shift += payload;
        if raw >> payload == 1 {
            return Some((v, used));
        }
    }
    None
}
