//! Per-version wire layout tables.
//!
//! All six minor versions share the section vocabulary; what changed over
//! time is field widths (fixed vs variable-length) and a few capabilities.
//! Every width lives in one table per version so nothing else in the
//! protocol branches on the version number.

use thiserror::Error;

pub const VERSION_MAJOR: u8 = 1;
pub const LATEST_MINOR: u8 = 5;

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("unsupported container version {0}.{1}")]
    Unsupported(u8, u8),
}

/// How one field is carried: a fixed bit width or a VLQ with the given
/// chunk width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Fixed(u8),
    Vlq(u8),
}

#[derive(Debug, Clone, Copy)]
pub struct VersionLayout {
    pub minor: u8,
    /// Count of sections following the header.
    pub section_count: Width,
    /// FILE / PARTIALFILE byte lengths.
    pub file_len: Width,
    /// Partial-file and piece indexes.
    pub piece_index: Width,
    /// TEXT byte length.
    pub text_len: Width,
    /// IMAGETABLE entry count.
    pub table_count: Width,
    /// Image index operand of CURSOR moves.
    pub image_index: Width,
    /// TEXT honor field width.
    pub honor_bits: u8,
    /// Header carries a mode mask next to the alpha level from 1.1 on.
    pub header_has_mask: bool,
    pub has_modemask_section: bool,
    pub has_shuffle_section: bool,
    /// 1.4+: KDF negotiated on the wire instead of implied by the version.
    pub explicit_kdf: bool,
    /// 1.0 derives keys by MD5 folding, 1.1–1.3 by fixed-salt PBKDF2.
    pub md5_keys: bool,
    /// 1.5+: table entries carry explicit frame and map fields.
    pub table_entry_flags: bool,
    /// 1.5+ rejects used-map files without the STGIM magic.
    pub strict_map_magic: bool,
}

static LAYOUTS: [VersionLayout; 6] = [
    VersionLayout {
        minor: 0,
        section_count: Width::Fixed(9),
        file_len: Width::Fixed(24),
        piece_index: Width::Fixed(8),
        text_len: Width::Fixed(16),
        table_count: Width::Fixed(8),
        image_index: Width::Fixed(8),
        honor_bits: 4,
        header_has_mask: false,
        has_modemask_section: false,
        has_shuffle_section: false,
        explicit_kdf: false,
        md5_keys: true,
        table_entry_flags: false,
        strict_map_magic: false,
    },
    VersionLayout {
        minor: 1,
        section_count: Width::Fixed(9),
        file_len: Width::Fixed(24),
        piece_index: Width::Fixed(8),
        text_len: Width::Fixed(16),
        table_count: Width::Fixed(16),
        image_index: Width::Fixed(16),
        honor_bits: 4,
        header_has_mask: true,
        has_modemask_section: true,
        has_shuffle_section: false,
        explicit_kdf: false,
        md5_keys: false,
        table_entry_flags: false,
        strict_map_magic: false,
    },
    VersionLayout {
        minor: 2,
        section_count: Width::Vlq(4),
        file_len: Width::Vlq(8),
        piece_index: Width::Vlq(4),
        text_len: Width::Vlq(8),
        table_count: Width::Vlq(4),
        image_index: Width::Vlq(4),
        honor_bits: 4,
        header_has_mask: true,
        has_modemask_section: true,
        has_shuffle_section: false,
        explicit_kdf: false,
        md5_keys: false,
        table_entry_flags: false,
        strict_map_magic: false,
    },
    VersionLayout {
        minor: 3,
        section_count: Width::Vlq(4),
        file_len: Width::Vlq(8),
        piece_index: Width::Vlq(4),
        text_len: Width::Vlq(8),
        table_count: Width::Vlq(4),
        image_index: Width::Vlq(4),
        honor_bits: 2,
        header_has_mask: true,
        has_modemask_section: true,
        has_shuffle_section: false,
        explicit_kdf: false,
        md5_keys: false,
        table_entry_flags: false,
        strict_map_magic: false,
    },
    VersionLayout {
        minor: 4,
        section_count: Width::Vlq(4),
        file_len: Width::Vlq(8),
        piece_index: Width::Vlq(4),
        text_len: Width::Vlq(8),
        table_count: Width::Vlq(4),
        image_index: Width::Vlq(4),
        honor_bits: 2,
        header_has_mask: true,
        has_modemask_section: true,
        has_shuffle_section: true,
        explicit_kdf: true,
        md5_keys: false,
        table_entry_flags: false,
        strict_map_magic: false,
    },
    VersionLayout {
        minor: 5,
        section_count: Width::Vlq(4),
        file_len: Width::Vlq(8),
        piece_index: Width::Vlq(4),
        text_len: Width::Vlq(8),
        table_count: Width::Vlq(4),
        image_index: Width::Vlq(4),
        honor_bits: 2,
        header_has_mask: true,
        has_modemask_section: true,
        has_shuffle_section: true,
        explicit_kdf: true,
        md5_keys: false,
        table_entry_flags: true,
        strict_map_magic: true,
    },
];

pub fn layout(major: u8, minor: u8) -> Result<&'static VersionLayout, VersionError> {
    if major != VERSION_MAJOR {
        return Err(VersionError::Unsupported(major, minor));
    }
    LAYOUTS
        .get(minor as usize)
        .ok_or(VersionError::Unsupported(major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_minor() {
        for minor in 0..=LATEST_MINOR {
            assert_eq!(layout(1, minor).unwrap().minor, minor);
        }
    }

    #[test]
    fn out_of_range_versions_rejected() {
        assert!(layout(2, 0).is_err());
        assert!(layout(0, 0).is_err());
        assert!(layout(1, 6).is_err());
    }

    #[test]
    fn capability_progression() {
        assert!(!layout(1, 0).unwrap().header_has_mask);
        assert!(layout(1, 1).unwrap().header_has_mask);
        assert_eq!(layout(1, 1).unwrap().section_count, Width::Fixed(9));
        assert_eq!(layout(1, 0).unwrap().image_index, Width::Fixed(8));
        assert_eq!(layout(1, 1).unwrap().image_index, Width::Fixed(16));
        assert_eq!(layout(1, 2).unwrap().section_count, Width::Vlq(4));
        assert_eq!(layout(1, 2).unwrap().honor_bits, 4);
        assert_eq!(layout(1, 3).unwrap().honor_bits, 2);
        assert!(!layout(1, 3).unwrap().explicit_kdf);
        assert!(layout(1, 4).unwrap().has_shuffle_section);
        assert!(layout(1, 5).unwrap().strict_map_magic);
        assert!(layout(1, 0).unwrap().md5_keys);
        assert!(!layout(1, 1).unwrap().md5_keys);
    }
}
