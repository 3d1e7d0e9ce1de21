//! Seeded placement: the deterministic coordinate generator, seed-phrase
//! folding and the stateful bit shuffle.
//!
//! Writers and readers must draw the same sequence from a generator seeded
//! with the same 32-bit value, so the generator state is part of every saved
//! carrier snapshot.

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Alphabet for folding a seed phrase into a 32-bit seed.  Characters
/// outside the alphabet contribute zero.
const SEED_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ";

/// Deterministic generator wrapping a ChaCha8 stream, cloneable so carrier
/// snapshots can capture its exact position.
#[derive(Debug, Clone)]
pub struct SeededRng {
    inner: ChaCha8Rng,
    seed: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> SeededRng {
        let mut key = [0u8; 32];
        key[..4].copy_from_slice(&seed.to_le_bytes());
        SeededRng { inner: ChaCha8Rng::from_seed(key), seed }
    }

    pub fn from_phrase(phrase: &str) -> SeededRng {
        SeededRng::new(seed_from_phrase(phrase))
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Next value in `0..bound`.
    pub fn gen(&mut self, bound: u32) -> u32 {
        debug_assert!(bound > 0);
        self.inner.next_u32() % bound
    }
}

/// Folds a phrase into a u32 by base-63 accumulation with wrapping
/// arithmetic.
pub fn seed_from_phrase(phrase: &str) -> u32 {
    phrase.chars().fold(0u32, |acc, c| {
        let v = SEED_ALPHABET.find(c).unwrap_or(0) as u32;
        acc.wrapping_mul(SEED_ALPHABET.len() as u32).wrapping_add(v)
    })
}

/// Draws the swap-target vector for one run of `len` bits, consuming `len`
/// values from the generator.
fn shuffle_order(rng: &mut SeededRng, len: usize) -> Vec<usize> {
    (0..len).map(|_| rng.gen(len as u32) as usize).collect()
}

/// In-place forward shuffle of one bit run.
pub fn shuffle_bits(rng: &mut SeededRng, bits: &mut [bool]) {
    if bits.is_empty() {
        return;
    }
    let order = shuffle_order(rng, bits.len());
    for (i, &j) in order.iter().enumerate() {
        bits.swap(i, j);
    }
}

/// Exact inverse of [`shuffle_bits`] for a generator at the same position.
pub fn unshuffle_bits(rng: &mut SeededRng, bits: &mut [bool]) {
    if bits.is_empty() {
        return;
    }
    let order = shuffle_order(rng, bits.len());
    for (i, &j) in order.iter().enumerate().rev() {
        bits.swap(i, j);
    }
}

/// Rectangular placement region with its own payload-pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    /// Payload-bearing pixels consumed inside this rect.
    pub used: u32,
}

impl Rect {
    pub fn new(x: u16, y: u16, w: u16, h: u16) -> Rect {
        Rect { x, y, w, h, used: 0 }
    }

    pub fn max(&self) -> u32 {
        self.w as u32 * self.h as u32
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}
