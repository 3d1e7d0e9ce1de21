//! The closed section vocabulary: wire ids, builder-facing section specs
//! and the small shared value types they carry.
//!
//! A section id is 9 bits on the wire; bit 8 marks a clear section, the low
//! 8 bits select the kind.  Readers reject ids outside this table.

use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::crypto::{CipherId, KdfId, KdfParams};
use crate::mode::{Mode, ModeMask};
use crate::raster::ImageRef;
use crate::transform::Compression;

pub const SEC_FILE: u16 = 1;
pub const SEC_RAND: u16 = 2;
pub const SEC_IMAGETABLE: u16 = 3;
pub const SEC_RECT: u16 = 4;
pub const SEC_CURSOR: u16 = 5;
pub const SEC_COMPRESSION: u16 = 6;
pub const SEC_ENCRYPTION: u16 = 7;
pub const SEC_PARTIALFILE: u16 = 8;
pub const SEC_PARTIALFILEPIECE: u16 = 9;
pub const SEC_MODE: u16 = 10;
pub const SEC_ALPHA: u16 = 11;
pub const SEC_TEXT: u16 = 12;
pub const SEC_MODEMASK: u16 = 13;
pub const SEC_SHUFFLE: u16 = 14;

/// Bit 8 of the 9-bit id field.
pub const SEC_CLEAR_BIT: u16 = 1 << 8;

pub const CURSOR_PUSH: u8 = 1;
pub const CURSOR_POP: u8 = 2;
pub const CURSOR_MOVE: u8 = 3;
pub const CURSOR_MOVE_IMAGE: u8 = 4;

/// Which pipeline stages a TEXT section honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HonorMask(u8);

pub const HONOR_COMPRESSION: u8 = 1;
pub const HONOR_ENCRYPTION: u8 = 2;

impl HonorMask {
    pub fn new(compression: bool, encryption: bool) -> HonorMask {
        HonorMask(
            (compression as u8 * HONOR_COMPRESSION) | (encryption as u8 * HONOR_ENCRYPTION),
        )
    }

    pub fn from_wire(v: u8) -> HonorMask {
        HonorMask(v & (HONOR_COMPRESSION | HONOR_ENCRYPTION))
    }

    pub fn wire(self) -> u8 {
        self.0
    }

    pub fn compression(self) -> bool {
        self.0 & HONOR_COMPRESSION != 0
    }

    pub fn encryption(self) -> bool {
        self.0 & HONOR_ENCRYPTION != 0
    }
}

/// Where file payload comes from on the write side.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl FileSource {
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            FileSource::Path(p) => std::fs::read(p),
            FileSource::Bytes(b) => Ok(b.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCmd {
    Push,
    Pop,
    /// Absolute move on a table image; coordinates are rect-relative when a
    /// rect is active on the target.
    Move { index: usize, x: u16, y: u16 },
    /// Switch to a table image at its reset position.
    MoveImage { index: usize },
}

/// Encryption section request.  The password is taken from here when
/// present, otherwise from the injected provider.
#[derive(Clone)]
pub struct EncryptionSpec {
    pub cipher: CipherId,
    pub kdf: KdfId,
    /// Non-default KDF parameters; sets the advanced flag on the wire.
    pub params: Option<KdfParams>,
    pub password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for EncryptionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSpec")
            .field("cipher", &self.cipher)
            .field("kdf", &self.kdf)
            .field("params", &self.params)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One image-table slot: where to read the carrier and where its modified
/// copy goes.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub input: ImageRef,
    pub output: ImageRef,
}

/// Kinds a clear section can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearKind {
    Rand,
    Shuffle,
    Rect,
    Compression,
    Encryption,
    Mode,
    ModeMask,
    Alpha,
    ImageTable,
}

impl ClearKind {
    pub fn id(self) -> u16 {
        match self {
            ClearKind::Rand => SEC_RAND,
            ClearKind::Shuffle => SEC_SHUFFLE,
            ClearKind::Rect => SEC_RECT,
            ClearKind::Compression => SEC_COMPRESSION,
            ClearKind::Encryption => SEC_ENCRYPTION,
            ClearKind::Mode => SEC_MODE,
            ClearKind::ModeMask => SEC_MODEMASK,
            ClearKind::Alpha => SEC_ALPHA,
            ClearKind::ImageTable => SEC_IMAGETABLE,
        }
    }
}

/// A section request queued on the builder, packed in order on save.
#[derive(Debug, Clone)]
pub enum SectionSpec {
    File {
        source: FileSource,
        /// Name stored on the wire; defaults to the source basename.
        name: String,
        /// Skip the compression stage for already-compressed payloads.
        precompressed: bool,
    },
    PartialFile {
        source: FileSource,
        name: String,
        index: u32,
        precompressed: bool,
    },
    /// Writes up to `size` remaining bytes of the partial file `index`; a
    /// size of zero means the rest of the file.
    PartialFilePiece { index: u32, size: u64 },
    Text {
        text: Vec<u8>,
        honor: HonorMask,
    },
    Rand { phrase: String },
    Shuffle { phrase: String },
    Rect { x: u16, y: u16, w: u16, h: u16 },
    Cursor(CursorCmd),
    Compression(Compression),
    Encryption(EncryptionSpec),
    Mode(Mode),
    ModeMask(ModeMask),
    /// Alpha threshold level code, 0–7.
    Alpha { level: u8 },
    ImageTable(Vec<TableSpec>),
    Clear(ClearKind),
}

impl SectionSpec {
    /// The 9-bit id written ahead of this section's payload.
    pub fn wire_id(&self) -> u16 {
        match self {
            SectionSpec::File { .. } => SEC_FILE,
            SectionSpec::PartialFile { .. } => SEC_PARTIALFILE,
            SectionSpec::PartialFilePiece { .. } => SEC_PARTIALFILEPIECE,
            SectionSpec::Text { .. } => SEC_TEXT,
            SectionSpec::Rand { .. } => SEC_RAND,
            SectionSpec::Shuffle { .. } => SEC_SHUFFLE,
            SectionSpec::Rect { .. } => SEC_RECT,
            SectionSpec::Cursor(_) => SEC_CURSOR,
            SectionSpec::Compression(_) => SEC_COMPRESSION,
            SectionSpec::Encryption(_) => SEC_ENCRYPTION,
            SectionSpec::Mode(_) => SEC_MODE,
            SectionSpec::ModeMask(_) => SEC_MODEMASK,
            SectionSpec::Alpha { .. } => SEC_ALPHA,
            SectionSpec::ImageTable(_) => SEC_IMAGETABLE,
            SectionSpec::Clear(kind) => kind.id() | SEC_CLEAR_BIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honor_mask_bits() {
        let h = HonorMask::new(true, false);
        assert!(h.compression());
        assert!(!h.encryption());
        assert_eq!(h.wire(), 1);
        assert_eq!(HonorMask::from_wire(3), HonorMask::new(true, true));
        // stray high bits are dropped
        assert_eq!(HonorMask::from_wire(0b1110).wire(), 0b10);
    }

    #[test]
    fn clear_ids_carry_the_flag() {
        let s = SectionSpec::Clear(ClearKind::Encryption);
        assert_eq!(s.wire_id(), SEC_ENCRYPTION | SEC_CLEAR_BIT);
        assert_eq!(s.wire_id() & 0xff, SEC_ENCRYPTION);
    }

    #[test]
    fn spec_wire_ids() {
        let text = SectionSpec::Text { text: b"hi".to_vec(), honor: HonorMask::default() };
        assert_eq!(text.wire_id(), SEC_TEXT);
        let rand = SectionSpec::Rand { phrase: "x".into() };
        assert_eq!(rand.wire_id(), SEC_RAND);
    }
}
