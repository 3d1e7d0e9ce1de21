//! Fluent front door for assembling save and load passes, plus the textual
//! option parsers shared with the CLI.

use std::path::PathBuf;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{CipherId, KdfId, KdfParams, PasswordProvider};
use crate::handles::Loaded;
use crate::loadopts::LoadOpts;
use crate::mode::{Mode, ModeMask, Submode};
use crate::protocol::{LoadRequest, Protocol, ProtocolError, SaveOutput, SaveRequest};
use crate::raster::{CarrierProvider, ImageRef};
use crate::section::{
    ClearKind, CursorCmd, EncryptionSpec, FileSource, HonorMask, SectionSpec, TableSpec,
};
use crate::transform::Compression;
use crate::wire;

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("no input image configured")]
    MissingInput,
    #[error("no output image configured")]
    MissingOutput,
    #[error("cannot parse mode \"{0}\"; expected forms like 9/24")]
    BadMode(String),
    #[error("cannot parse mode mask \"{0}\"; expected a subset of rgb")]
    BadMask(String),
    #[error("cannot parse compression \"{0}\"; expected gzip[:level] or brotli[:level[:text]]")]
    BadCompression(String),
    #[error("unknown cipher \"{0}\"")]
    BadCipher(String),
    #[error("unknown key derivation function \"{0}\"")]
    BadKdf(String),
    #[error("cannot parse version \"{0}\"; expected major.minor")]
    BadVersion(String),
    #[error("cannot parse rect \"{0}\"; expected x,y,w,h")]
    BadRect(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Parses a `opaque/transparent` bits-per-pixel mode string.  Each side is
/// the total payload bits at full mask: 0, 3, 6, 9, 12, 15, 24 or 32.
pub fn parse_mode(s: &str) -> Result<Mode, BuilderError> {
    let (o, t) = s.split_once('/').unwrap_or((s, s));
    Ok(Mode::new(parse_submode(o, s)?, parse_submode(t, s)?))
}

fn parse_submode(part: &str, whole: &str) -> Result<Submode, BuilderError> {
    match part.trim() {
        "0" => Ok(Submode::Disabled),
        "3" => Ok(Submode::Depth(1)),
        "6" => Ok(Submode::Depth(2)),
        "9" => Ok(Submode::Depth(3)),
        "12" => Ok(Submode::Depth(4)),
        "15" => Ok(Submode::Depth(5)),
        "24" => Ok(Submode::Full24),
        "32" => Ok(Submode::Full32),
        _ => Err(BuilderError::BadMode(whole.to_string())),
    }
}

/// Parses a channel subset like `rgb`, `rb` or `g`.
pub fn parse_mask(s: &str) -> Result<ModeMask, BuilderError> {
    let mut v = 0u8;
    for c in s.trim().chars() {
        v |= match c.to_ascii_lowercase() {
            'r' => crate::mode::MASK_R,
            'g' => crate::mode::MASK_G,
            'b' => crate::mode::MASK_B,
            _ => return Err(BuilderError::BadMask(s.to_string())),
        };
    }
    Ok(ModeMask::from_wire(v))
}

/// Parses `gzip[:level]` or `brotli[:level[:text]]`.
pub fn parse_compression(s: &str) -> Result<Compression, BuilderError> {
    let mut parts = s.split(':');
    let kind = parts.next().unwrap_or_default();
    let level = parts
        .next()
        .map(|l| l.parse::<u8>().map_err(|_| BuilderError::BadCompression(s.into())))
        .transpose()?;
    match kind {
        "gzip" => Ok(Compression::Gzip { level: level.unwrap_or(0) }),
        "brotli" => Ok(Compression::Brotli {
            level: level.unwrap_or(11),
            text: parts.next() == Some("text"),
        }),
        _ => Err(BuilderError::BadCompression(s.to_string())),
    }
}

pub fn parse_cipher(s: &str) -> Result<CipherId, BuilderError> {
    match s.to_ascii_lowercase().as_str() {
        "aes256" | "aes" => Ok(CipherId::Aes256),
        "camellia256" | "camellia" => Ok(CipherId::Camellia256),
        "aria256" | "aria" => Ok(CipherId::Aria256),
        "chacha20" => Ok(CipherId::ChaCha20),
        "blowfish" => Ok(CipherId::Blowfish),
        _ => Err(BuilderError::BadCipher(s.to_string())),
    }
}

pub fn parse_kdf(s: &str) -> Result<KdfId, BuilderError> {
    match s.to_ascii_lowercase().as_str() {
        "pbkdf2" => Ok(KdfId::Pbkdf2),
        "argon2i" => Ok(KdfId::Argon2i),
        "argon2d" => Ok(KdfId::Argon2d),
        "argon2id" => Ok(KdfId::Argon2id),
        "scrypt" => Ok(KdfId::Scrypt),
        _ => Err(BuilderError::BadKdf(s.to_string())),
    }
}

pub fn parse_version(s: &str) -> Result<(u8, u8), BuilderError> {
    let err = || BuilderError::BadVersion(s.to_string());
    let (major, minor) = s.split_once('.').ok_or_else(err)?;
    Ok((major.parse().map_err(|_| err())?, minor.parse().map_err(|_| err())?))
}

pub fn parse_rect(s: &str) -> Result<(u16, u16, u16, u16), BuilderError> {
    let parts: Vec<u16> = s
        .split(',')
        .map(|p| p.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| BuilderError::BadRect(s.to_string()))?;
    match parts[..] {
        [x, y, w, h] => Ok((x, y, w, h)),
        _ => Err(BuilderError::BadRect(s.to_string())),
    }
}

/// Accumulates a save or load configuration and runs the protocol passes.
#[derive(Debug, Clone)]
pub struct StegBuilder {
    version: (u8, u8),
    input: Option<ImageRef>,
    output: Option<ImageRef>,
    head_mode: Mode,
    head_mask: ModeMask,
    mode: Mode,
    mask: ModeMask,
    alpha_level: u8,
    rand: Option<String>,
    shuffle: Option<String>,
    cursor: Option<(u16, u16)>,
    salt: Option<[u8; 32]>,
    sections: Vec<SectionSpec>,
    dry_run: bool,
}

impl Default for StegBuilder {
    fn default() -> StegBuilder {
        StegBuilder::new()
    }
}

impl StegBuilder {
    pub fn new() -> StegBuilder {
        StegBuilder {
            version: (wire::VERSION_MAJOR, wire::LATEST_MINOR),
            input: None,
            output: None,
            head_mode: Mode::default(),
            head_mask: ModeMask::default(),
            mode: Mode::default(),
            mask: ModeMask::default(),
            alpha_level: 0,
            rand: None,
            shuffle: None,
            cursor: None,
            salt: None,
            sections: Vec::new(),
            dry_run: false,
        }
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.version = (major, minor);
        self
    }

    pub fn input(mut self, image: ImageRef) -> Self {
        self.input = Some(image);
        self
    }

    pub fn output(mut self, image: ImageRef) -> Self {
        self.output = Some(image);
        self
    }

    pub fn head_mode(mut self, mode: Mode) -> Self {
        self.head_mode = mode;
        self
    }

    pub fn head_mask(mut self, mask: ModeMask) -> Self {
        self.head_mask = mask;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mask(mut self, mask: ModeMask) -> Self {
        self.mask = mask;
        self
    }

    /// Alpha threshold level code, 0-7.
    pub fn alpha(mut self, level: u8) -> Self {
        self.alpha_level = level;
        self
    }

    pub fn global_rand(mut self, phrase: impl Into<String>) -> Self {
        self.rand = Some(phrase.into());
        self
    }

    pub fn global_shuffle(mut self, phrase: impl Into<String>) -> Self {
        self.shuffle = Some(phrase.into());
        self
    }

    pub fn cursor(mut self, x: u16, y: u16) -> Self {
        self.cursor = Some((x, y));
        self
    }

    pub fn salt_phrase(mut self, phrase: &str) -> Self {
        self.salt = Some(crate::crypto::salt_from_phrase(phrase));
        self
    }

    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    /// Merges a decoded STGLO bundle over the current settings.
    pub fn apply_load_opts(mut self, opts: &LoadOpts) -> Self {
        if let Some(m) = opts.head_mode_parsed() {
            self.head_mode = m;
        }
        if let Some(m) = opts.head_mask_parsed() {
            self.head_mask = m;
        }
        if let Some(r) = &opts.rand {
            self.rand = Some(r.clone());
        }
        if let Some(sh) = &opts.shuffle {
            self.shuffle = Some(sh.clone());
        }
        if let Some(c) = opts.cursor {
            self.cursor = Some(c);
        }
        if let Some(salt) = &opts.salt {
            self.salt = Some(crate::crypto::salt_from_phrase(salt));
        }
        self
    }

    pub fn section(mut self, spec: SectionSpec) -> Self {
        self.sections.push(spec);
        self
    }

    pub fn add_file_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.section(SectionSpec::File {
            source: FileSource::Path(path),
            name,
            precompressed: false,
        })
    }

    pub fn add_file_bytes(self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.section(SectionSpec::File {
            source: FileSource::Bytes(data),
            name: name.into(),
            precompressed: false,
        })
    }

    pub fn add_partial_file(
        self,
        name: impl Into<String>,
        data: Vec<u8>,
        index: u32,
    ) -> Self {
        self.section(SectionSpec::PartialFile {
            source: FileSource::Bytes(data),
            name: name.into(),
            index,
            precompressed: false,
        })
    }

    pub fn add_piece(self, index: u32, size: u64) -> Self {
        self.section(SectionSpec::PartialFilePiece { index, size })
    }

    pub fn add_text(self, text: impl Into<String>, honor: HonorMask) -> Self {
        self.section(SectionSpec::Text { text: text.into().into_bytes(), honor })
    }

    pub fn set_rand(self, phrase: impl Into<String>) -> Self {
        self.section(SectionSpec::Rand { phrase: phrase.into() })
    }

    pub fn set_shuffle(self, phrase: impl Into<String>) -> Self {
        self.section(SectionSpec::Shuffle { phrase: phrase.into() })
    }

    pub fn set_rect(self, x: u16, y: u16, w: u16, h: u16) -> Self {
        self.section(SectionSpec::Rect { x, y, w, h })
    }

    pub fn cursor_push(self) -> Self {
        self.section(SectionSpec::Cursor(CursorCmd::Push))
    }

    pub fn cursor_pop(self) -> Self {
        self.section(SectionSpec::Cursor(CursorCmd::Pop))
    }

    pub fn cursor_move(self, index: usize, x: u16, y: u16) -> Self {
        self.section(SectionSpec::Cursor(CursorCmd::Move { index, x, y }))
    }

    pub fn cursor_move_image(self, index: usize) -> Self {
        self.section(SectionSpec::Cursor(CursorCmd::MoveImage { index }))
    }

    pub fn set_compression(self, comp: Compression) -> Self {
        self.section(SectionSpec::Compression(comp))
    }

    pub fn set_encryption(self, cipher: CipherId, kdf: KdfId) -> Self {
        self.section(SectionSpec::Encryption(EncryptionSpec {
            cipher,
            kdf,
            params: None,
            password: None,
        }))
    }

    pub fn set_encryption_with(
        self,
        cipher: CipherId,
        kdf: KdfId,
        params: Option<KdfParams>,
        password: Option<&str>,
    ) -> Self {
        self.section(SectionSpec::Encryption(EncryptionSpec {
            cipher,
            kdf,
            params,
            password: password.map(|p| Zeroizing::new(p.to_string())),
        }))
    }

    pub fn set_mode_section(self, mode: Mode) -> Self {
        self.section(SectionSpec::Mode(mode))
    }

    pub fn set_mask_section(self, mask: ModeMask) -> Self {
        self.section(SectionSpec::ModeMask(mask))
    }

    pub fn set_alpha(self, level: u8) -> Self {
        self.section(SectionSpec::Alpha { level })
    }

    pub fn set_image_table(self, specs: Vec<TableSpec>) -> Self {
        self.section(SectionSpec::ImageTable(specs))
    }

    pub fn clear(self, kind: ClearKind) -> Self {
        self.section(SectionSpec::Clear(kind))
    }

    pub fn build_save(&self) -> Result<SaveRequest, BuilderError> {
        let input = self.input.clone().ok_or(BuilderError::MissingInput)?;
        let output = self.output.clone().ok_or(BuilderError::MissingOutput)?;
        Ok(SaveRequest {
            version: self.version,
            input,
            output,
            head_mode: self.head_mode,
            head_mask: self.head_mask,
            mode: self.mode,
            mask: self.mask,
            alpha_level: self.alpha_level,
            rand: self.rand.clone(),
            shuffle: self.shuffle.clone(),
            cursor: self.cursor,
            salt: self.salt,
            sections: self.sections.clone(),
            dry_run: self.dry_run,
        })
    }

    pub fn build_load(&self) -> Result<LoadRequest, BuilderError> {
        let input = self.input.clone().ok_or(BuilderError::MissingInput)?;
        Ok(LoadRequest {
            input,
            head_mode: self.head_mode,
            head_mask: self.head_mask,
            rand: self.rand.clone(),
            shuffle: self.shuffle.clone(),
            cursor: self.cursor,
        })
    }

    pub fn save(
        &self,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<SaveOutput, BuilderError> {
        Ok(Protocol::save(self.build_save()?, provider, passwords)?)
    }

    pub fn load(
        &self,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<(Protocol, Loaded), BuilderError> {
        Ok(Protocol::load(self.build_load()?, provider, passwords)?)
    }
}
