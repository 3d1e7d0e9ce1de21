//! Payload encryption stage: CBC block ciphers plus ChaCha20, with the
//! per-version key derivation schemes.
//!
//! Pre-1.4 containers fix the KDF per version (MD5 folding for 1.0,
//! PBKDF2-HMAC-SHA1 over the protocol salt for 1.1 through 1.3); 1.4 and
//! later negotiate the KDF, its parameters and a real salt on the wire.

use argon2::{Algorithm, Argon2, Params as Argon2Params, Version};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use md5::{Digest, Md5};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

pub const CRYPT_NONE: u8 = 0;
pub const CRYPT_AES256: u8 = 1;
pub const CRYPT_CAMELLIA256: u8 = 2;
pub const CRYPT_ARIA256: u8 = 3;
pub const CRYPT_CHACHA20: u8 = 4;
pub const CRYPT_BLOWFISH: u8 = 5;

pub const KDF_PBKDF2: u8 = 1;
pub const KDF_ARGON2I: u8 = 2;
pub const KDF_ARGON2D: u8 = 3;
pub const KDF_ARGON2ID: u8 = 4;
pub const KDF_SCRYPT: u8 = 5;

/// Fixed salt for the implicit 1.1–1.3 PBKDF2 scheme.  The ASCII hex text
/// itself is the salt input, not the decoded bytes.
pub const PROTOCOL_SALT: &[u8] =
    b"8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92";

/// Salt for the load-options blob, which has no room to carry one.
pub const UTIL_SALT: &[u8] =
    b"4b227777d4dd1fc61c6f884f48641d02b4d121d3fd328cb08b5531fcacdabf8a";

const PBKDF2_SHA1_ITERS: u32 = 100_000;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("unknown cipher type {0}")]
    UnknownCipher(u8),
    #[error("unknown key derivation function {0}")]
    UnknownKdf(u8),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("decryption failed: wrong password or corrupt payload")]
    DecryptFailed,
    #[error("no password available for encrypted section")]
    NoPassword,
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Camellia256CbcEnc = cbc::Encryptor<camellia::Camellia256>;
type Camellia256CbcDec = cbc::Decryptor<camellia::Camellia256>;
type Aria256CbcEnc = cbc::Encryptor<aria::Aria256>;
type Aria256CbcDec = cbc::Decryptor<aria::Aria256>;
type BlowfishCbcEnc = cbc::Encryptor<blowfish::Blowfish>;
type BlowfishCbcDec = cbc::Decryptor<blowfish::Blowfish>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherId {
    Aes256,
    Camellia256,
    Aria256,
    ChaCha20,
    Blowfish,
}

impl CipherId {
    pub fn from_wire(v: u8) -> Result<CipherId, CryptoError> {
        match v {
            CRYPT_AES256 => Ok(CipherId::Aes256),
            CRYPT_CAMELLIA256 => Ok(CipherId::Camellia256),
            CRYPT_ARIA256 => Ok(CipherId::Aria256),
            CRYPT_CHACHA20 => Ok(CipherId::ChaCha20),
            CRYPT_BLOWFISH => Ok(CipherId::Blowfish),
            other => Err(CryptoError::UnknownCipher(other)),
        }
    }

    pub fn wire(self) -> u8 {
        match self {
            CipherId::Aes256 => CRYPT_AES256,
            CipherId::Camellia256 => CRYPT_CAMELLIA256,
            CipherId::Aria256 => CRYPT_ARIA256,
            CipherId::ChaCha20 => CRYPT_CHACHA20,
            CipherId::Blowfish => CRYPT_BLOWFISH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfId {
    Pbkdf2,
    Argon2i,
    Argon2d,
    Argon2id,
    Scrypt,
}

impl KdfId {
    pub fn from_wire(v: u8) -> Result<KdfId, CryptoError> {
        match v {
            KDF_PBKDF2 => Ok(KdfId::Pbkdf2),
            KDF_ARGON2I => Ok(KdfId::Argon2i),
            KDF_ARGON2D => Ok(KdfId::Argon2d),
            KDF_ARGON2ID => Ok(KdfId::Argon2id),
            KDF_SCRYPT => Ok(KdfId::Scrypt),
            other => Err(CryptoError::UnknownKdf(other)),
        }
    }

    pub fn wire(self) -> u8 {
        match self {
            KdfId::Pbkdf2 => KDF_PBKDF2,
            KdfId::Argon2i => KDF_ARGON2I,
            KdfId::Argon2d => KDF_ARGON2D,
            KdfId::Argon2id => KDF_ARGON2ID,
            KdfId::Scrypt => KDF_SCRYPT,
        }
    }

    pub fn default_params(self) -> KdfParams {
        match self {
            KdfId::Pbkdf2 => KdfParams::Pbkdf2 { iterations: PBKDF2_SHA1_ITERS },
            KdfId::Argon2i | KdfId::Argon2d | KdfId::Argon2id => {
                KdfParams::Argon2 { mem_kib: 64 * 1024, time_cost: 3, lanes: 1 }
            }
            KdfId::Scrypt => KdfParams::Scrypt { log_n: 15, r: 8, p: 1 },
        }
    }
}

/// Tunable KDF parameters, carried on the wire when the advanced flag is
/// set on a 1.4+ encryption section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfParams {
    Pbkdf2 { iterations: u32 },
    Argon2 { mem_kib: u32, time_cost: u32, lanes: u32 },
    Scrypt { log_n: u8, r: u32, p: u32 },
}

impl KdfParams {
    /// Wire order of the parameter values, each sent as one VLQ.
    pub fn values(&self) -> Vec<u64> {
        match *self {
            KdfParams::Pbkdf2 { iterations } => vec![iterations as u64],
            KdfParams::Argon2 { mem_kib, time_cost, lanes } => {
                vec![mem_kib as u64, time_cost as u64, lanes as u64]
            }
            KdfParams::Scrypt { log_n, r, p } => vec![log_n as u64, r as u64, p as u64],
        }
    }

    pub fn from_values(kdf: KdfId, v: &[u64]) -> KdfParams {
        match kdf {
            KdfId::Pbkdf2 => KdfParams::Pbkdf2 { iterations: v[0] as u32 },
            KdfId::Argon2i | KdfId::Argon2d | KdfId::Argon2id => KdfParams::Argon2 {
                mem_kib: v[0] as u32,
                time_cost: v[1] as u32,
                lanes: v[2] as u32,
            },
            KdfId::Scrypt => KdfParams::Scrypt { log_n: v[0] as u8, r: v[1] as u32, p: v[2] as u32 },
        }
    }

    pub fn value_count(kdf: KdfId) -> usize {
        match kdf {
            KdfId::Pbkdf2 => 1,
            _ => 3,
        }
    }
}

/// A fully derived cipher state: everything needed to run the payload
/// transform in either direction.
#[derive(Clone)]
pub struct Encryption {
    pub cipher: CipherId,
    pub key: Zeroizing<[u8; 32]>,
    pub iv: [u8; 16],
}

impl std::fmt::Debug for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryption")
            .field("cipher", &self.cipher)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The 1.0 scheme: the hex MD5 digest of the password, as ASCII, is the
/// key.
pub fn derive_key_md5(password: &str) -> Zeroizing<[u8; 32]> {
    let digest = Md5::digest(password.as_bytes());
    let hex = hex::encode(digest);
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(hex.as_bytes());
    key
}

/// The implicit 1.1–1.3 scheme.
pub fn derive_key_legacy(password: &str) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha1>(password.as_bytes(), PROTOCOL_SALT, PBKDF2_SHA1_ITERS, &mut *key);
    key
}

pub fn derive_key(
    kdf: KdfId,
    params: &KdfParams,
    password: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; 32]);
    match (kdf, params) {
        (KdfId::Pbkdf2, KdfParams::Pbkdf2 { iterations }) => {
            pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, *iterations, &mut *key);
        }
        (
            KdfId::Argon2i | KdfId::Argon2d | KdfId::Argon2id,
            KdfParams::Argon2 { mem_kib, time_cost, lanes },
        ) => {
            let algo = match kdf {
                KdfId::Argon2i => Algorithm::Argon2i,
                KdfId::Argon2d => Algorithm::Argon2d,
                _ => Algorithm::Argon2id,
            };
            let params = Argon2Params::new(*mem_kib, *time_cost, *lanes, Some(32))
                .map_err(|e| CryptoError::Kdf(e.to_string()))?;
            Argon2::new(algo, Version::V0x13, params)
                .hash_password_into(password.as_bytes(), salt, &mut *key)
                .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        }
        (KdfId::Scrypt, KdfParams::Scrypt { log_n, r, p }) => {
            let params = scrypt::Params::new(*log_n, *r, *p, 32)
                .map_err(|e| CryptoError::Kdf(e.to_string()))?;
            scrypt::scrypt(password.as_bytes(), salt, &params, &mut *key)
                .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        }
        _ => return Err(CryptoError::Kdf("kdf parameter shape mismatch".into())),
    }
    Ok(key)
}

pub fn salt_from_phrase(phrase: &str) -> [u8; 32] {
    Sha256::digest(phrase.as_bytes()).into()
}

pub fn random_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

impl Encryption {
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = &*self.key;
        Ok(match self.cipher {
            CipherId::Aes256 => Aes256CbcEnc::new(key.into(), (&self.iv).into())
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            CipherId::Camellia256 => Camellia256CbcEnc::new(key.into(), (&self.iv).into())
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            CipherId::Aria256 => Aria256CbcEnc::new(key.into(), (&self.iv).into())
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            CipherId::Blowfish => {
                BlowfishCbcEnc::new_from_slices(key, &self.iv[..8])
                    .map_err(|_| CryptoError::DecryptFailed)?
                    .encrypt_padded_vec_mut::<Pkcs7>(data)
            }
            CipherId::ChaCha20 => {
                let mut out = data.to_vec();
                let mut cipher = chacha20::ChaCha20::new(
                    key.into(),
                    chacha20::Nonce::from_slice(&self.iv[..12]),
                );
                cipher.apply_keystream(&mut out);
                out
            }
        })
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.cipher {
            CipherId::Aes256 => Aes256CbcDec::new((&*self.key).into(), (&self.iv).into())
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(|_| CryptoError::DecryptFailed),
            CipherId::Camellia256 => {
                Camellia256CbcDec::new((&*self.key).into(), (&self.iv).into())
                    .decrypt_padded_vec_mut::<Pkcs7>(data)
                    .map_err(|_| CryptoError::DecryptFailed)
            }
            CipherId::Aria256 => Aria256CbcDec::new((&*self.key).into(), (&self.iv).into())
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(|_| CryptoError::DecryptFailed),
            CipherId::Blowfish => BlowfishCbcDec::new_from_slices(&*self.key, &self.iv[..8])
                .map_err(|_| CryptoError::DecryptFailed)?
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(|_| CryptoError::DecryptFailed),
            CipherId::ChaCha20 => self.encrypt(data),
        }
    }
}

/// Source of passwords for encryption sections, injected by the caller.
pub trait PasswordProvider {
    fn password(&mut self, context: &str) -> Result<Zeroizing<String>, CryptoError>;
}

/// Hands out a fixed list of passwords in order, then fails.
#[derive(Default)]
pub struct StaticPasswords {
    queue: std::collections::VecDeque<Zeroizing<String>>,
}

impl StaticPasswords {
    pub fn new<I, S>(passwords: I) -> StaticPasswords
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticPasswords {
            queue: passwords
                .into_iter()
                .map(|p| Zeroizing::new(p.into()))
                .collect(),
        }
    }
}

impl PasswordProvider for StaticPasswords {
    fn password(&mut self, _context: &str) -> Result<Zeroizing<String>, CryptoError> {
        self.queue.pop_front().ok_or(CryptoError::NoPassword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(cipher: CipherId) -> Encryption {
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&[7u8; 32]);
        Encryption { cipher, key, iv: [9u8; 16] }
    }

    #[test]
    fn cbc_roundtrip_all_ciphers() {
        let data = b"attack at dawn, bring snacks".to_vec();
        for cipher in [
            CipherId::Aes256,
            CipherId::Camellia256,
            CipherId::Aria256,
            CipherId::Blowfish,
            CipherId::ChaCha20,
        ] {
            let e = enc(cipher);
            let ct = e.encrypt(&data).unwrap();
            assert_ne!(ct, data);
            assert_eq!(e.decrypt(&ct).unwrap(), data, "{:?}", cipher);
        }
    }

    #[test]
    fn wrong_key_fails_padding() {
        let e = enc(CipherId::Aes256);
        let ct = e.encrypt(b"secret").unwrap();
        let mut other = enc(CipherId::Aes256);
        other.key.copy_from_slice(&[8u8; 32]);
        assert!(matches!(other.decrypt(&ct), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn md5_key_is_hex_ascii() {
        let key = derive_key_md5("password");
        assert!(key.iter().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(&key[..], derive_key_md5("password").as_slice());
        assert_ne!(&key[..], derive_key_md5("Password").as_slice());
    }

    #[test]
    fn explicit_kdfs_derive() {
        let salt = salt_from_phrase("pepper");
        for kdf in [KdfId::Pbkdf2, KdfId::Argon2id, KdfId::Scrypt] {
            let params = kdf.default_params();
            let a = derive_key(kdf, &params, "pw", &salt).unwrap();
            let b = derive_key(kdf, &params, "pw", &salt).unwrap();
            assert_eq!(&a[..], &b[..]);
            let c = derive_key(kdf, &params, "pw2", &salt).unwrap();
            assert_ne!(&a[..], &c[..]);
        }
    }

    #[test]
    fn kdf_params_wire_roundtrip() {
        for kdf in [KdfId::Pbkdf2, KdfId::Argon2d, KdfId::Scrypt] {
            let p = kdf.default_params();
            let vals = p.values();
            assert_eq!(vals.len(), KdfParams::value_count(kdf));
            assert_eq!(KdfParams::from_values(kdf, &vals), p);
        }
    }

    #[test]
    fn unknown_ids_rejected() {
        assert!(CipherId::from_wire(9).is_err());
        assert!(KdfId::from_wire(0).is_err());
        for v in 1..=5 {
            assert_eq!(CipherId::from_wire(v).unwrap().wire(), v);
            assert_eq!(KdfId::from_wire(v).unwrap().wire(), v);
        }
    }

    #[test]
    fn static_passwords_in_order() {
        let mut p = StaticPasswords::new(["a", "b"]);
        assert_eq!(&*p.password("x").unwrap(), "a");
        assert_eq!(&*p.password("x").unwrap(), "b");
        assert!(p.password("x").is_err());
    }
}
