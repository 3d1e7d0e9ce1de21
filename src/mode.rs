//! Pixel bit-depth modes, channel masks and the alpha threshold table.
//!
//! A [`Mode`] is a 6-bit wire value holding two 3-bit submodes: the one used
//! for opaque pixels and the one used for transparent pixels.  Which of the
//! two applies to a given pixel is decided by comparing its alpha channel to
//! the active threshold.  A submode selects how many low-order bits of each
//! participating channel carry payload.

use thiserror::Error;

/// Alpha threshold values addressable by the 3-bit wire code, index = code.
pub const ALPHA_LEVELS: [u8; 8] = [255, 220, 184, 148, 112, 76, 40, 0];

/// Per-channel payload depth selected by one 3-bit submode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submode {
    /// Pixels under this submode carry no payload and are skipped.
    Disabled,
    /// 1–5 low-order bits per participating RGB channel.
    Depth(u8),
    /// Full 8 bits per participating RGB channel (the "24bpp" mode).
    Full24,
    /// Full 8 bits per participating RGB channel plus the alpha channel.
    Full32,
}

impl Submode {
    pub fn from_wire(v: u8) -> Submode {
        match v & 7 {
            0 => Submode::Disabled,
            d @ 1..=5 => Submode::Depth(d),
            6 => Submode::Full24,
            _ => Submode::Full32,
        }
    }

    pub fn wire(self) -> u8 {
        match self {
            Submode::Disabled => 0,
            Submode::Depth(d) => d,
            Submode::Full24 => 6,
            Submode::Full32 => 7,
        }
    }

    /// Payload bits one pixel yields under this submode with `active`
    /// participating RGB channels.
    pub fn payload_bits(self, active: u8) -> u8 {
        match self {
            Submode::Disabled => 0,
            Submode::Depth(d) => d * active,
            Submode::Full24 => 8 * active,
            Submode::Full32 => 8 * active + 8,
        }
    }
}

/// The 6-bit mode field: opaque submode in the low 3 bits, transparent
/// submode in the high 3 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u8);

impl Mode {
    pub fn new(opaque: Submode, transparent: Submode) -> Mode {
        Mode(opaque.wire() | (transparent.wire() << 3))
    }

    pub fn from_wire(v: u8) -> Mode {
        Mode(v & 0x3f)
    }

    pub fn wire(self) -> u8 {
        self.0
    }

    pub fn opaque(self) -> Submode {
        Submode::from_wire(self.0 & 7)
    }

    pub fn transparent(self) -> Submode {
        Submode::from_wire((self.0 >> 3) & 7)
    }

    /// 32bpp writes through all four channels, so a mode naming it in either
    /// submode is promoted to 32bpp on both sides.
    pub fn fixed(self) -> Mode {
        if self.opaque() == Submode::Full32 || self.transparent() == Submode::Full32 {
            Mode::new(Submode::Full32, Submode::Full32)
        } else {
            self
        }
    }

    /// Whether a pixel with `alpha` counts as transparent under `threshold`.
    pub fn is_transparent(alpha: u8, threshold: u8) -> bool {
        alpha < threshold || (alpha == 0 && threshold == 0)
    }

    /// The submode governing a pixel with the given alpha value.
    pub fn submode_for(self, alpha: u8, threshold: u8) -> Submode {
        if Mode::is_transparent(alpha, threshold) {
            self.transparent()
        } else {
            self.opaque()
        }
    }
}

impl Default for Mode {
    /// 1 bit per channel for both submodes; the header bootstrap mode.
    fn default() -> Mode {
        Mode::new(Submode::Depth(1), Submode::Depth(1))
    }
}

/// 3-bit RGB participation set.  Bit 2 = R, bit 1 = G, bit 0 = B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeMask(u8);

pub const MASK_R: u8 = 0b100;
pub const MASK_G: u8 = 0b010;
pub const MASK_B: u8 = 0b001;

impl ModeMask {
    pub fn from_wire(v: u8) -> ModeMask {
        ModeMask(v & 7)
    }

    pub fn wire(self) -> u8 {
        self.0
    }

    /// Whether RGB channel `c` (0 = R, 1 = G, 2 = B) participates.
    pub fn has(self, c: usize) -> bool {
        debug_assert!(c < 3);
        self.0 & (1 << (2 - c)) != 0
    }

    pub fn active_count(self) -> u8 {
        self.0.count_ones() as u8
    }

    /// Rejects an empty mask unless the governing submode is 32bpp, where
    /// the mask is ignored and alpha always participates.
    pub fn validate(self, mode: Mode) -> Result<(), ModeError> {
        if self.0 == 0 && mode.fixed().opaque() != Submode::Full32 {
            return Err(ModeError::ZeroMask);
        }
        Ok(())
    }
}

impl Default for ModeMask {
    fn default() -> ModeMask {
        ModeMask(MASK_R | MASK_G | MASK_B)
    }
}

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("cannot use mode mask 000 unless 32bpp mode is active")]
    ZeroMask,
    #[error("alpha level {0} out of range (0-7)")]
    AlphaLevel(u8),
}

/// Maps a 3-bit alpha level code to its threshold value.
pub fn alpha_from_code(code: u8) -> Result<u8, ModeError> {
    ALPHA_LEVELS
        .get(code as usize)
        .copied()
        .ok_or(ModeError::AlphaLevel(code))
}

/// Maps a threshold value back to its wire code; unknown values quantize to
/// the nearest level at or above, matching the writer-side normalization.
pub fn alpha_to_code(threshold: u8) -> u8 {
    ALPHA_LEVELS
        .iter()
        .position(|&v| v == threshold)
        .unwrap_or(0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submode_wire_roundtrip() {
        for v in 0..8 {
            assert_eq!(Submode::from_wire(v).wire(), v);
        }
    }

    #[test]
    fn mode_fix_promotes_32bpp() {
        let m = Mode::new(Submode::Depth(3), Submode::Full32).fixed();
        assert_eq!(m.opaque(), Submode::Full32);
        assert_eq!(m.transparent(), Submode::Full32);

        let m = Mode::new(Submode::Depth(3), Submode::Full24).fixed();
        assert_eq!(m.opaque(), Submode::Depth(3));
    }

    #[test]
    fn payload_bits_per_submode() {
        assert_eq!(Submode::Depth(3).payload_bits(3), 9);
        assert_eq!(Submode::Depth(3).payload_bits(2), 6);
        assert_eq!(Submode::Full24.payload_bits(3), 24);
        assert_eq!(Submode::Full32.payload_bits(3), 32);
        assert_eq!(Submode::Full32.payload_bits(1), 16);
        assert_eq!(Submode::Disabled.payload_bits(3), 0);
    }

    #[test]
    fn transparency_cutoff() {
        assert!(Mode::is_transparent(100, 255));
        assert!(!Mode::is_transparent(255, 255));
        // threshold 0 still treats fully transparent pixels as transparent
        assert!(Mode::is_transparent(0, 0));
        assert!(!Mode::is_transparent(1, 0));
    }

    #[test]
    fn zero_mask_needs_32bpp() {
        let mask = ModeMask::from_wire(0);
        assert!(mask.validate(Mode::new(Submode::Depth(1), Submode::Depth(1))).is_err());
        assert!(mask.validate(Mode::new(Submode::Full32, Submode::Full32)).is_ok());
    }

    #[test]
    fn mask_channels() {
        let m = ModeMask::from_wire(MASK_R | MASK_B);
        assert!(m.has(0));
        assert!(!m.has(1));
        assert!(m.has(2));
        assert_eq!(m.active_count(), 2);
    }

    #[test]
    fn alpha_codes() {
        for code in 0..8u8 {
            assert_eq!(alpha_to_code(alpha_from_code(code).unwrap()), code);
        }
        assert!(alpha_from_code(8).is_err());
    }
}
