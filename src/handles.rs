//! Extraction handles: cheap snapshots of carrier and pipeline state taken
//! while scanning a container, replayed later to pull the payload out.
//!
//! A handle pins everything a replay needs: which carrier, the cursor, the
//! buffered surplus bits, the generator states and the transform settings
//! that were active when the section body started.

use crate::bits::BitBuf;
use crate::crypto::Encryption;
use crate::mode::{Mode, ModeMask};
use crate::placement::{Rect, SeededRng};
use crate::section::HonorMask;
use crate::transform::Compression;
use crate::usedmap::UsedMap;

/// Full replay snapshot of one read position.
#[derive(Debug, Clone)]
pub struct SavedState {
    /// Arena index of the carrier the section body lives in.
    pub carrier: usize,
    pub cursor: (u16, u16),
    pub pending: BitBuf,
    pub used: UsedMap,
    pub rect: Option<Rect>,
    /// Effective generator at snapshot time, local or global.
    pub rand: Option<SeededRng>,
    pub shuffle: Option<SeededRng>,
    pub mode: Mode,
    pub mask: ModeMask,
    pub alpha_thresh: u8,
    pub compress: Option<Compression>,
    pub encrypt: Option<Encryption>,
}

/// A FILE section found during load.
#[derive(Debug, Clone)]
pub struct StegFile {
    pub name: String,
    /// Stored byte length, after any compression and encryption.
    pub size: u64,
    pub(crate) state: SavedState,
}

/// One PARTIALFILEPIECE occurrence.
#[derive(Debug, Clone)]
pub struct PiecePart {
    pub size: u64,
    pub(crate) state: SavedState,
}

/// A PARTIALFILE whose final piece has been seen.
#[derive(Debug, Clone)]
pub struct StegPartialFile {
    pub name: String,
    pub index: u32,
    /// Total stored byte length across all pieces.
    pub size: u64,
    pub(crate) pieces: Vec<PiecePart>,
    /// Pipeline settings captured at the PARTIALFILE declaration; pieces
    /// are concatenated before the pipeline is undone.
    pub(crate) compress: Option<Compression>,
    pub(crate) encrypt: Option<Encryption>,
}

impl StegPartialFile {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

/// A TEXT section found during load.
#[derive(Debug, Clone)]
pub struct StegText {
    /// Stored byte length.
    pub size: u64,
    pub honor: HonorMask,
    pub(crate) state: SavedState,
}

/// Everything a load pass discovered, in wire order.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub files: Vec<StegFile>,
    pub partials: Vec<StegPartialFile>,
    pub texts: Vec<StegText>,
}
