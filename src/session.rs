//! Mutable protocol state shared by writer and reader: base placement
//! settings, active overrides and the payload pipeline configuration.
//!
//! Sections mutate this as they are packed or parsed; extraction handles
//! snapshot the relevant slices of it.

use crate::crypto::Encryption;
use crate::mode::{Mode, ModeMask};
use crate::placement::SeededRng;
use crate::transform::Compression;

/// Item on the cursor stack: the table index of the carrier that was active
/// plus its cursor position.
#[derive(Debug, Clone, Copy)]
pub struct CursorFrame {
    pub table_index: Option<usize>,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Body mode and mask established by the header.
    pub base_mode: Mode,
    pub base_mask: ModeMask,
    pub base_alpha: u8,
    /// MODE / MODEMASK section overrides; cleared sections drop back to the
    /// base values.
    pub mode_override: Option<Mode>,
    pub mask_override: Option<ModeMask>,
    pub compress: Option<Compression>,
    pub encrypt: Option<Encryption>,
    /// Out-of-band global coordinate generator; RAND sections seed per
    /// carrier instead.
    pub global_rand: Option<SeededRng>,
    /// Bit-run shuffle generator, global or activated by a SHUFFLE section.
    pub shuffle: Option<SeededRng>,
    pub cursor_stack: Vec<CursorFrame>,
    /// Out-of-band salt for 1.4+ key derivation; a random salt is drawn
    /// when absent.
    pub salt: Option<[u8; 32]>,
}

impl Session {
    pub fn effective_mode(&self) -> Mode {
        self.mode_override.unwrap_or(self.base_mode)
    }

    pub fn effective_mask(&self) -> ModeMask {
        self.mask_override.unwrap_or(self.base_mask)
    }

    /// Drops key material once a save or load pass has no further use for
    /// it.  Handles keep their own copies until extraction.
    pub fn scrub(&mut self) {
        self.encrypt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Submode;

    #[test]
    fn overrides_fall_back_to_base() {
        let mut s = Session {
            base_mode: Mode::new(Submode::Depth(3), Submode::Depth(3)),
            ..Session::default()
        };
        assert_eq!(s.effective_mode(), s.base_mode);
        let over = Mode::new(Submode::Full24, Submode::Disabled);
        s.mode_override = Some(over);
        assert_eq!(s.effective_mode(), over);
        s.mode_override = None;
        assert_eq!(s.effective_mode(), s.base_mode);
    }
}
