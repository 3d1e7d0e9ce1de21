//! Consumed-coordinate tracking and the `STGIM` used-map sidecar format.
//!
//! The map distinguishes coordinates that were merely visited (skipped
//! zero-capacity pixels included) from pixels that actually carry payload;
//! capacity accounting only counts the latter.

use std::collections::HashSet;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const MAP_MAGIC: &[u8; 5] = b"STGIM";

#[derive(Error, Debug)]
pub enum UsedMapError {
    #[error("used-map file is not an STGIM blob")]
    BadMagic,
    #[error("used-map file is truncated")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Set of consumed coordinates plus the payload-pixel count.
#[derive(Debug, Clone, Default)]
pub struct UsedMap {
    marked: HashSet<(u16, u16)>,
    payload: u64,
}

impl UsedMap {
    pub fn new() -> UsedMap {
        UsedMap::default()
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        self.marked.contains(&(x, y))
    }

    /// Marks a coordinate as consumed without counting it as payload.
    pub fn mark(&mut self, x: u16, y: u16) {
        self.marked.insert((x, y));
    }

    /// Marks a payload-bearing pixel.
    pub fn mark_payload(&mut self, x: u16, y: u16) {
        if self.marked.insert((x, y)) {
            self.payload += 1;
        }
    }

    /// Total consumed coordinates, skipped pixels included.
    pub fn marked_len(&self) -> usize {
        self.marked.len()
    }

    /// Payload-bearing pixels only.
    pub fn payload_count(&self) -> u64 {
        self.payload
    }

    /// Serializes to the `STGIM` sidecar layout: magic then little-endian
    /// (x, y) pairs.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), UsedMapError> {
        w.write_all(MAP_MAGIC)?;
        for &(x, y) in &self.marked {
            w.write_u16::<LittleEndian>(x)?;
            w.write_u16::<LittleEndian>(y)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.marked.len() * 4);
        self.write_to(&mut out).expect("vec write");
        out
    }

    /// Parses an `STGIM` blob.  Loaded pixels count as visited but not as
    /// payload.  `strict` rejects a missing magic; the lenient mode treats
    /// the whole file as coordinate pairs, matching pre-1.5 readers.
    pub fn read_from<R: Read>(r: &mut R, strict: bool) -> Result<UsedMap, UsedMapError> {
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        UsedMap::from_bytes(&data, strict)
    }

    pub fn from_bytes(data: &[u8], strict: bool) -> Result<UsedMap, UsedMapError> {
        let body = if data.starts_with(MAP_MAGIC) {
            &data[MAP_MAGIC.len()..]
        } else if strict {
            return Err(UsedMapError::BadMagic);
        } else {
            data
        };
        if body.len() % 4 != 0 {
            return Err(UsedMapError::Truncated);
        }
        let mut map = UsedMap::new();
        let mut cursor = body;
        while !cursor.is_empty() {
            let x = cursor.read_u16::<LittleEndian>()?;
            let y = cursor.read_u16::<LittleEndian>()?;
            map.mark(x, y);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_counted_once() {
        let mut m = UsedMap::new();
        m.mark_payload(1, 2);
        m.mark_payload(1, 2);
        m.mark(3, 4);
        assert_eq!(m.payload_count(), 1);
        assert_eq!(m.marked_len(), 2);
        assert!(m.contains(1, 2));
        assert!(!m.contains(0, 0));
    }

    #[test]
    fn stgim_roundtrip() {
        let mut m = UsedMap::new();
        m.mark(0, 0);
        m.mark(65535, 1);
        m.mark_payload(7, 9);
        let bytes = m.to_bytes();
        assert!(bytes.starts_with(MAP_MAGIC));

        let back = UsedMap::from_bytes(&bytes, true).unwrap();
        assert_eq!(back.marked_len(), 3);
        assert!(back.contains(65535, 1));
        // loaded coordinates never count as payload
        assert_eq!(back.payload_count(), 0);
    }

    #[test]
    fn strict_magic() {
        let raw = [1u8, 0, 2, 0];
        assert!(matches!(
            UsedMap::from_bytes(&raw, true),
            Err(UsedMapError::BadMagic)
        ));
        let lenient = UsedMap::from_bytes(&raw, false).unwrap();
        assert!(lenient.contains(1, 2));
    }

    #[test]
    fn truncated_rejected() {
        let mut bytes = MAP_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0, 2]);
        assert!(matches!(
            UsedMap::from_bytes(&bytes, true),
            Err(UsedMapError::Truncated)
        ));
    }
}
