//! The `STGLO` load-options blob: a small sidecar bundling the out-of-band
//! settings (header mode, seeds, cursor, salt) a reader needs, optionally
//! encrypted so the bundle itself is not a giveaway.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{self, CipherId, CryptoError, Encryption, KdfId};
use crate::mode::{Mode, ModeMask};

pub const OPTS_MAGIC: &[u8; 5] = b"STGLO";

#[derive(Error, Debug)]
pub enum LoadOptsError {
    #[error("not an STGLO blob")]
    BadMagic,
    #[error("truncated STGLO blob")]
    Truncated,
    #[error("STGLO blob is encrypted and no password was given")]
    PasswordRequired,
    #[error("malformed STGLO body: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The serializable option bundle.  All fields are optional; absent ones
/// keep their defaults on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_mask: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<(u16, u16)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl LoadOpts {
    pub fn head_mode_parsed(&self) -> Option<Mode> {
        self.head_mode.map(Mode::from_wire)
    }

    pub fn head_mask_parsed(&self) -> Option<ModeMask> {
        self.head_mask.map(ModeMask::from_wire)
    }
}

fn blob_cipher(password: &str, iv: [u8; 16]) -> Result<Encryption, CryptoError> {
    let key = crypto::derive_key(
        KdfId::Pbkdf2,
        &KdfId::Pbkdf2.default_params(),
        password,
        crypto::UTIL_SALT,
    )?;
    Ok(Encryption { cipher: CipherId::Aes256, key, iv })
}

/// Serializes an options bundle, encrypting the JSON body when a password
/// is given.
pub fn pack(opts: &LoadOpts, password: Option<&str>) -> Result<Vec<u8>, LoadOptsError> {
    let body = serde_json::to_vec(opts)?;
    let mut out = OPTS_MAGIC.to_vec();
    match password {
        None => {
            out.push(0);
            out.extend(body);
        }
        Some(pw) => {
            let iv = crypto::generate_iv();
            out.push(1);
            out.extend_from_slice(&iv);
            out.extend(blob_cipher(pw, iv)?.encrypt(&body)?);
        }
    }
    Ok(out)
}

pub fn unpack(blob: &[u8], password: Option<&str>) -> Result<LoadOpts, LoadOptsError> {
    let rest = blob.strip_prefix(&OPTS_MAGIC[..]).ok_or(LoadOptsError::BadMagic)?;
    let (&flag, body) = rest.split_first().ok_or(LoadOptsError::Truncated)?;
    let json: Zeroizing<Vec<u8>> = match flag {
        0 => Zeroizing::new(body.to_vec()),
        _ => {
            let pw = password.ok_or(LoadOptsError::PasswordRequired)?;
            if body.len() < 16 {
                return Err(LoadOptsError::Truncated);
            }
            let mut iv = [0u8; 16];
            iv.copy_from_slice(&body[..16]);
            Zeroizing::new(blob_cipher(pw, iv)?.decrypt(&body[16..])?)
        }
    };
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LoadOpts {
        LoadOpts {
            head_mode: Some(0b001_001),
            rand: Some("orchard".into()),
            cursor: Some((12, 34)),
            ..LoadOpts::default()
        }
    }

    #[test]
    fn plain_roundtrip() {
        let blob = pack(&sample(), None).unwrap();
        assert!(blob.starts_with(OPTS_MAGIC));
        assert_eq!(unpack(&blob, None).unwrap(), sample());
    }

    #[test]
    fn encrypted_roundtrip() {
        let blob = pack(&sample(), Some("hunter2")).unwrap();
        assert_eq!(unpack(&blob, Some("hunter2")).unwrap(), sample());
        assert!(matches!(unpack(&blob, None), Err(LoadOptsError::PasswordRequired)));
        assert!(unpack(&blob, Some("wrong")).is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(unpack(b"STGIM\x00{}", None), Err(LoadOptsError::BadMagic)));
    }
}
