//! Payload compression stage: gzip and brotli, applied in memory before
//! encryption on the way in and after decryption on the way out.

use std::io::{Read, Write};

use brotli::enc::backward_references::BrotliEncoderMode;
use brotli::enc::BrotliEncoderParams;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

pub const COMP_NONE: u8 = 0;
pub const COMP_GZIP: u8 = 1;
pub const COMP_BROTLI: u8 = 2;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("unknown compression type {0}")]
    UnknownType(u8),
    #[error("gzip level {0} out of range (0-9)")]
    GzipLevel(u8),
    #[error("brotli level {0} out of range (0-11)")]
    BrotliLevel(u8),
    #[error("decompression failed: {0}")]
    Corrupt(std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Active compression configuration, carried in the session and snapshotted
/// into extraction handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Level 0 selects the library default.
    Gzip { level: u8 },
    /// `text` turns on the encoder's text-mode heuristics.
    Brotli { level: u8, text: bool },
}

impl Compression {
    pub fn type_id(&self) -> u8 {
        match self {
            Compression::Gzip { .. } => COMP_GZIP,
            Compression::Brotli { .. } => COMP_BROTLI,
        }
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        match *self {
            Compression::Gzip { level } if level > 9 => Err(TransformError::GzipLevel(level)),
            Compression::Brotli { level, .. } if level > 11 => {
                Err(TransformError::BrotliLevel(level))
            }
            _ => Ok(()),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        match *self {
            Compression::Gzip { level } => {
                let lvl = if level == 0 {
                    flate2::Compression::default()
                } else {
                    flate2::Compression::new(level as u32)
                };
                let mut enc = GzEncoder::new(Vec::new(), lvl);
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
            Compression::Brotli { level, text } => {
                let params = BrotliEncoderParams {
                    quality: level as i32,
                    mode: if text {
                        BrotliEncoderMode::BROTLI_MODE_TEXT
                    } else {
                        BrotliEncoderMode::BROTLI_MODE_GENERIC
                    },
                    ..Default::default()
                };
                let mut out = Vec::new();
                brotli::enc::BrotliCompress(&mut &data[..], &mut out, &params)?;
                Ok(out)
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut out = Vec::new();
        match self {
            Compression::Gzip { .. } => {
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(TransformError::Corrupt)?;
            }
            Compression::Brotli { .. } => {
                brotli::Decompressor::new(data, 4096)
                    .read_to_end(&mut out)
                    .map_err(TransformError::Corrupt)?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, \
        the quick brown fox jumps over the lazy dog";

    #[test]
    fn gzip_roundtrip() {
        let c = Compression::Gzip { level: 9 };
        let packed = c.compress(SAMPLE).unwrap();
        assert_ne!(packed, SAMPLE);
        assert_eq!(c.decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn gzip_default_level() {
        let c = Compression::Gzip { level: 0 };
        let packed = c.compress(SAMPLE).unwrap();
        assert_eq!(c.decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn brotli_roundtrip() {
        for text in [false, true] {
            let c = Compression::Brotli { level: 11, text };
            let packed = c.compress(SAMPLE).unwrap();
            assert!(packed.len() < SAMPLE.len());
            assert_eq!(c.decompress(&packed).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn levels_validated() {
        assert!(Compression::Gzip { level: 10 }.validate().is_err());
        assert!(Compression::Gzip { level: 9 }.validate().is_ok());
        assert!(Compression::Brotli { level: 12, text: false }.validate().is_err());
        assert!(Compression::Brotli { level: 11, text: true }.validate().is_ok());
    }

    #[test]
    fn corrupt_stream_rejected() {
        let c = Compression::Gzip { level: 6 };
        assert!(matches!(
            c.decompress(b"definitely not gzip"),
            Err(TransformError::Corrupt(_))
        ));
    }
}
