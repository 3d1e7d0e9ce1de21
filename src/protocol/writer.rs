//! The save pass: header, section packing and final carrier flushing.

use std::collections::HashMap;

use tracing::{debug, info};

use super::{Protocol, ProtocolError, TableEntry};
use crate::carrier::Carrier;
use crate::crypto::{
    self, derive_key, derive_key_legacy, derive_key_md5, Encryption, PasswordProvider,
};
use crate::mode::{alpha_from_code, Mode, ModeError, ModeMask};
use crate::placement::{Rect, SeededRng};
use crate::raster::{CarrierProvider, ImageRef, PixelBuf};
use crate::section::{ClearKind, CursorCmd, EncryptionSpec, SectionSpec};
use crate::usedmap::UsedMap;
use crate::wire::{self, Width};

/// Everything one save pass needs, assembled by the builder.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub version: (u8, u8),
    pub input: ImageRef,
    pub output: ImageRef,
    pub head_mode: Mode,
    pub head_mask: ModeMask,
    pub mode: Mode,
    pub mask: ModeMask,
    /// Alpha threshold level code, 0-7.
    pub alpha_level: u8,
    pub rand: Option<String>,
    pub shuffle: Option<String>,
    pub cursor: Option<(u16, u16)>,
    pub salt: Option<[u8; 32]>,
    pub sections: Vec<SectionSpec>,
    pub dry_run: bool,
}

impl SaveRequest {
    pub fn new(input: ImageRef, output: ImageRef) -> SaveRequest {
        SaveRequest {
            version: (wire::VERSION_MAJOR, wire::LATEST_MINOR),
            input,
            output,
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
}

/// One finished carrier and where it should go.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub output: ImageRef,
    pub pixels: PixelBuf,
}

#[derive(Debug, Clone)]
pub struct CarrierStats {
    pub label: String,
    pub payload_pixels: u64,
    pub visited_pixels: u64,
    pub total_pixels: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOutput {
    pub images: Vec<SavedImage>,
    /// Used-map sidecars keyed by their configured file name.
    pub maps: Vec<(String, Vec<u8>)>,
    pub stats: Vec<CarrierStats>,
}

struct PartialWrite {
    data: Vec<u8>,
    written: usize,
    pieces: u32,
}

impl Protocol {
    /// Runs a full save pass and returns the finished carriers.
    pub fn save(
        req: SaveRequest,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<SaveOutput, ProtocolError> {
        let layout = wire::layout(req.version.0, req.version.1)?;

        let head_mode = req.head_mode.fixed();
        let body_mode = req.mode.fixed();
        req.head_mask.validate(head_mode)?;
        req.mask.validate(body_mode)?;
        let base_alpha = alpha_from_code(req.alpha_level)?;
        validate_sections(layout, &req.sections, body_mode, req.mask)?;

        let pixels = provider.load(&req.input)?;
        let master_name = req.output.basename();
        let mut master = Carrier::new(master_name.clone(), pixels, true);
        if let Some(map_name) = &req.input.map {
            let raw = provider.load_map(map_name)?;
            master.apply_map(UsedMap::from_bytes(&raw, layout.strict_map_magic)?);
        }
        master.set_mode(head_mode);
        master.set_mask(req.head_mask);

        let mut p = Protocol::new(layout, req.version, master, master_name, true);
        p.session.base_mode = body_mode;
        p.session.base_mask = req.mask;
        p.session.base_alpha = base_alpha;
        p.session.salt = req.salt;
        if let Some(phrase) = &req.rand {
            p.session.global_rand = Some(SeededRng::from_phrase(phrase));
            let (c, s) = p.parts();
            c.reset_cursor(s, false)?;
        }
        if let Some(phrase) = &req.shuffle {
            p.session.shuffle = Some(SeededRng::from_phrase(phrase));
        }
        if let Some((x, y)) = req.cursor {
            p.carriers[0].set_cursor(x, y);
        }
        p.outputs.push(super::OutputSlot { arena: 0, output: req.output.clone() });

        info!(version = %format!("{}.{}", req.version.0, req.version.1),
              sections = req.sections.len(), "packing container");
        p.write_header(body_mode, req.mask, req.alpha_level, req.head_mask)?;
        p.write_field(layout.section_count, req.sections.len() as u64)?;

        let mut partials: HashMap<u32, PartialWrite> = HashMap::new();
        for (i, spec) in req.sections.iter().enumerate() {
            debug!(index = i, id = spec.wire_id(), "packing section");
            let (c, s) = p.parts();
            c.write_int(s, spec.wire_id() as u64, 9)?;
            p.pack_section(spec, provider, passwords, &mut partials)?;
        }

        for i in 0..p.carriers.len() {
            let s = &mut p.session;
            p.carriers[i].flush(s)?;
        }
        p.session.scrub();

        let mut out = SaveOutput::default();
        for c in &p.carriers {
            out.stats.push(CarrierStats {
                label: c.label().to_string(),
                payload_pixels: c.used.payload_count(),
                visited_pixels: c.used.marked_len() as u64,
                total_pixels: c.pixels().pixel_count(),
            });
        }
        if !req.dry_run {
            for slot in &p.outputs {
                let carrier = &p.carriers[slot.arena];
                if let Some(map_name) = &slot.output.map {
                    out.maps.push((map_name.clone(), carrier.used.to_bytes()));
                }
                out.images.push(SavedImage {
                    output: slot.output.clone(),
                    pixels: carrier.pixels().clone(),
                });
            }
        }
        Ok(out)
    }

    fn write_header(
        &mut self,
        body_mode: Mode,
        body_mask: ModeMask,
        alpha_level: u8,
        head_mask: ModeMask,
    ) -> Result<(), ProtocolError> {
        let (major, minor) = self.version;
        let (c, s) = self.parts();
        c.write_int(s, major as u64, 6)?;
        c.write_int(s, minor as u64, 6)?;
        c.write_int(s, body_mode.wire() as u64, 6)?;
        c.set_mode(body_mode);

        let settings = if self.layout.header_has_mask {
            (alpha_level as u64) << 11 | (body_mask.wire() as u64) << 8
        } else {
            (alpha_level as u64) << 11
        };
        let (c, s) = self.parts();
        c.write_int(s, settings, 14)?;
        if head_mask.wire() != body_mask.wire() {
            let (c, s) = self.parts();
            c.flush(s)?;
        }
        self.carriers[self.active].set_mask(body_mask);
        if alpha_level != 0 {
            let alpha = self.session.base_alpha;
            let (c, s) = self.parts();
            c.flush(s)?;
            c.alpha_thresh = alpha;
        }
        Ok(())
    }

    fn pack_section(
        &mut self,
        spec: &SectionSpec,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
        partials: &mut HashMap<u32, PartialWrite>,
    ) -> Result<(), ProtocolError> {
        match spec {
            SectionSpec::File { source, name, precompressed } => {
                let data = self.transform_payload(source.read()?, *precompressed)?;
                self.write_field(self.layout.file_len, data.len() as u64)?;
                let (c, s) = self.parts();
                c.write_string(s, name)?;
                let (c, s) = self.parts();
                c.write_bytes(s, &data)?;
            }
            SectionSpec::PartialFile { source, name, index, precompressed } => {
                let data = self.transform_payload(source.read()?, *precompressed)?;
                self.write_field(self.layout.file_len, data.len() as u64)?;
                let (c, s) = self.parts();
                c.write_string(s, name)?;
                self.write_field(self.layout.piece_index, *index as u64)?;
                partials.insert(*index, PartialWrite { data, written: 0, pieces: 0 });
            }
            SectionSpec::PartialFilePiece { index, size } => {
                let pw = partials
                    .get_mut(index)
                    .ok_or(ProtocolError::UnknownPartialIndex(*index))?;
                let remaining = pw.data.len() - pw.written;
                let take = if *size == 0 {
                    remaining
                } else {
                    remaining.min(*size as usize)
                };
                let last = take == remaining;
                let chunk = pw.data[pw.written..pw.written + take].to_vec();
                pw.written += take;
                let piece = pw.pieces;
                pw.pieces += 1;
                self.write_field(self.layout.piece_index, *index as u64)?;
                self.write_field(self.layout.piece_index, piece as u64)?;
                let (c, s) = self.parts();
                c.write_int(s, last as u64, 1)?;
                self.write_field(self.layout.file_len, take as u64)?;
                let (c, s) = self.parts();
                c.write_bytes(s, &chunk)?;
            }
            SectionSpec::Text { text, honor } => {
                let honor_bits = self.layout.honor_bits as usize;
                let (c, s) = self.parts();
                c.write_int(s, honor.wire() as u64, honor_bits)?;
                let mut data = text.clone();
                if honor.compression() {
                    if let Some(comp) = self.session.compress {
                        data = comp.compress(&data)?;
                    }
                }
                if honor.encryption() {
                    if let Some(enc) = &self.session.encrypt {
                        data = enc.encrypt(&data)?;
                    }
                }
                self.write_field(self.layout.text_len, data.len() as u64)?;
                let (c, s) = self.parts();
                c.write_bytes(s, &data)?;
            }
            SectionSpec::Rand { phrase } => {
                let rng = SeededRng::from_phrase(phrase);
                let (c, s) = self.parts();
                c.write_int(s, rng.seed() as u64, 32)?;
                c.flush(s)?;
                c.local_rand = Some(rng);
            }
            SectionSpec::Shuffle { phrase } => {
                let rng = SeededRng::from_phrase(phrase);
                let (c, s) = self.parts();
                c.write_int(s, rng.seed() as u64, 32)?;
                c.flush(s)?;
                self.session.shuffle = Some(rng);
            }
            SectionSpec::Rect { x, y, w, h } => {
                let (c, s) = self.parts();
                let (pw, ph) = (c.pixels().width, c.pixels().height);
                if *w == 0
                    || *h == 0
                    || *x as u32 + *w as u32 > pw
                    || *y as u32 + *h as u32 > ph
                {
                    return Err(ProtocolError::RectOutOfBounds { x: *x, y: *y, w: *w, h: *h });
                }
                for v in [x, y, w, h] {
                    c.write_int(s, *v as u64, 16)?;
                }
                c.flush(s)?;
                c.rect = Some(Rect::new(*x, *y, *w, *h));
                c.reset_cursor(s, true)?;
            }
            SectionSpec::Cursor(cmd) => self.pack_cursor(*cmd, provider)?,
            SectionSpec::Compression(comp) => {
                let (c, s) = self.parts();
                c.write_int(s, comp.type_id() as u64, 4)?;
                match *comp {
                    crate::transform::Compression::Gzip { level } => {
                        c.write_int(s, level as u64, 4)?;
                    }
                    crate::transform::Compression::Brotli { level, text } => {
                        c.write_int(s, level as u64, 4)?;
                        c.write_int(s, text as u64, 1)?;
                    }
                }
                self.session.compress = Some(*comp);
            }
            SectionSpec::Encryption(spec) => self.pack_encryption(spec, passwords)?,
            SectionSpec::Mode(mode) => {
                let mode = mode.fixed();
                let (c, s) = self.parts();
                c.write_int(s, mode.wire() as u64, 6)?;
                c.flush(s)?;
                c.set_mode(mode);
                self.session.mode_override = Some(mode);
            }
            SectionSpec::ModeMask(mask) => {
                let (c, s) = self.parts();
                c.write_int(s, mask.wire() as u64, 3)?;
                c.flush(s)?;
                c.set_mask(*mask);
                self.session.mask_override = Some(*mask);
            }
            SectionSpec::Alpha { level } => {
                let thresh = alpha_from_code(*level)?;
                let (c, s) = self.parts();
                c.write_int(s, *level as u64, 3)?;
                c.flush(s)?;
                c.alpha_thresh = thresh;
            }
            SectionSpec::ImageTable(specs) => {
                let entry_flags = self.layout.table_entry_flags;
                self.write_field(self.layout.table_count, specs.len() as u64)?;
                let mut entries = Vec::with_capacity(specs.len());
                for ts in specs {
                    let name = if entry_flags {
                        ts.output.basename()
                    } else {
                        ts.output.wire_name()
                    };
                    let (c, s) = self.parts();
                    c.write_string(s, &name)?;
                    if entry_flags {
                        c.write_int(s, ts.input.frame.is_some() as u64, 1)?;
                        if let Some(frame) = ts.input.frame {
                            c.write_vlq(s, frame as u64, 4)?;
                        }
                        c.write_int(s, ts.input.map.is_some() as u64, 1)?;
                        if let Some(map) = &ts.input.map {
                            c.write_string(s, map)?;
                        }
                    }
                    let carrier = if name == self.master_name { Some(0) } else { None };
                    entries.push(TableEntry {
                        name,
                        input: ts.input.clone(),
                        load_map: ts.input.map.clone(),
                        output: Some(ts.output.clone()),
                        carrier,
                    });
                }
                self.table = Some(entries);
            }
            SectionSpec::Clear(kind) => self.pack_clear(*kind)?,
        }
        Ok(())
    }

    fn transform_payload(
        &self,
        mut data: Vec<u8>,
        precompressed: bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        if !precompressed {
            if let Some(comp) = self.session.compress {
                data = comp.compress(&data)?;
            }
        }
        if let Some(enc) = &self.session.encrypt {
            data = enc.encrypt(&data)?;
        }
        Ok(data)
    }

    fn pack_cursor(
        &mut self,
        cmd: CursorCmd,
        provider: &mut dyn CarrierProvider,
    ) -> Result<(), ProtocolError> {
        // absolute moves degrade to image switches under seeded placement,
        // whether the seed is session-wide or local to the active carrier
        let seeded = self.session.global_rand.is_some()
            || self.carriers[self.active].local_rand.is_some();
        let cmd = match cmd {
            CursorCmd::Move { index, .. } if seeded => CursorCmd::MoveImage { index },
            other => other,
        };
        match cmd {
            CursorCmd::Push => {
                let (c, s) = self.parts();
                c.write_int(s, crate::section::CURSOR_PUSH as u64, 3)?;
                let frame = crate::session::CursorFrame {
                    table_index: self.active_table,
                    x: self.carriers[self.active].cursor.0,
                    y: self.carriers[self.active].cursor.1,
                };
                self.session.cursor_stack.push(frame);
            }
            CursorCmd::Pop => {
                let (c, s) = self.parts();
                c.write_int(s, crate::section::CURSOR_POP as u64, 3)?;
                c.flush(s)?;
                let frame = self
                    .session
                    .cursor_stack
                    .pop()
                    .ok_or(ProtocolError::CursorStackEmpty)?;
                if let Some(ti) = frame.table_index {
                    self.switch_image(ti, provider)?;
                }
                self.carriers[self.active].set_cursor(frame.x, frame.y);
            }
            CursorCmd::Move { index, x, y } => {
                let (c, s) = self.parts();
                c.write_int(s, crate::section::CURSOR_MOVE as u64, 3)?;
                self.write_field(self.layout.image_index, index as u64)?;
                let (c, s) = self.parts();
                c.write_int(s, x as u64, 16)?;
                c.write_int(s, y as u64, 16)?;
                c.flush(s)?;
                self.switch_image(index, provider)?;
                self.move_within(x, y)?;
            }
            CursorCmd::MoveImage { index } => {
                let (c, s) = self.parts();
                c.write_int(s, crate::section::CURSOR_MOVE_IMAGE as u64, 3)?;
                self.write_field(self.layout.image_index, index as u64)?;
                let (c, s) = self.parts();
                c.flush(s)?;
                self.switch_image(index, provider)?;
                let (c, s) = self.parts();
                c.reset_cursor(s, false)?;
            }
        }
        Ok(())
    }

    /// Applies a MOVE operand on the freshly switched carrier; coordinates
    /// are rect-relative when the target has an active rect.
    pub(crate) fn move_within(&mut self, x: u16, y: u16) -> Result<(), ProtocolError> {
        let c = &mut self.carriers[self.active];
        let (ax, ay) = match c.rect {
            Some(r) => {
                if x >= r.w || y >= r.h {
                    return Err(ProtocolError::CursorOutsideRect);
                }
                (r.x + x, r.y + y)
            }
            None => (x, y),
        };
        c.set_cursor(ax, ay);
        Ok(())
    }

    fn pack_encryption(
        &mut self,
        spec: &EncryptionSpec,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<(), ProtocolError> {
        let password = match &spec.password {
            Some(p) => p.clone(),
            None => passwords.password("encryption password")?,
        };
        let iv = crypto::generate_iv();
        let key = if self.layout.explicit_kdf {
            let params = spec.params.unwrap_or_else(|| spec.kdf.default_params());
            let salt = self.session.salt.unwrap_or_else(crypto::random_salt);
            let advanced = spec.params.is_some();
            let (c, s) = self.parts();
            c.write_int(s, spec.kdf.wire() as u64, 4)?;
            c.write_int(s, advanced as u64, 1)?;
            if advanced {
                for v in params.values() {
                    let (c, s) = self.parts();
                    c.write_vlq(s, v, 8)?;
                }
            }
            let (c, s) = self.parts();
            c.write_bytes(s, &salt)?;
            derive_key(spec.kdf, &params, &password, &salt)?
        } else if self.layout.md5_keys {
            derive_key_md5(&password)
        } else {
            derive_key_legacy(&password)
        };
        let (c, s) = self.parts();
        c.write_int(s, spec.cipher.wire() as u64, 4)?;
        c.write_bytes(s, &iv)?;
        self.session.encrypt = Some(Encryption { cipher: spec.cipher, key, iv });
        Ok(())
    }

    fn pack_clear(&mut self, kind: ClearKind) -> Result<(), ProtocolError> {
        match kind {
            ClearKind::Rand => {
                let (c, s) = self.parts();
                c.flush(s)?;
                c.local_rand = None;
            }
            ClearKind::Shuffle => {
                let (c, s) = self.parts();
                c.flush(s)?;
                self.session.shuffle = None;
            }
            ClearKind::Rect => {
                let (c, s) = self.parts();
                c.flush(s)?;
                c.rect = None;
            }
            ClearKind::Compression => self.session.compress = None,
            ClearKind::Encryption => self.session.encrypt = None,
            ClearKind::Mode => {
                self.session.mode_override = None;
                let base = self.session.base_mode;
                let (c, s) = self.parts();
                c.flush(s)?;
                c.set_mode(base);
            }
            ClearKind::ModeMask => {
                self.session.mask_override = None;
                let base = self.session.base_mask;
                let (c, s) = self.parts();
                c.flush(s)?;
                c.set_mask(base);
            }
            ClearKind::Alpha => {
                let base = self.session.base_alpha;
                let (c, s) = self.parts();
                c.flush(s)?;
                c.alpha_thresh = base;
            }
            ClearKind::ImageTable => self.drop_table()?,
        }
        Ok(())
    }
}

/// Rejects bad section configurations before any bits are written.
fn validate_sections(
    layout: &wire::VersionLayout,
    sections: &[SectionSpec],
    base_mode: Mode,
    base_mask: ModeMask,
) -> Result<(), ProtocolError> {
    let mut mode = base_mode;
    let mut mask = base_mask;
    for spec in sections {
        match spec {
            SectionSpec::Mode(m) => {
                let m = m.fixed();
                mask.validate(m)?;
                mode = m;
            }
            SectionSpec::ModeMask(k) => {
                if !layout.has_modemask_section {
                    return Err(ProtocolError::SectionUnsupported { kind: "MODEMASK", min: 1 });
                }
                k.validate(mode)?;
                mask = *k;
            }
            SectionSpec::Shuffle { .. } => {
                if !layout.has_shuffle_section {
                    return Err(ProtocolError::SectionUnsupported { kind: "SHUFFLE", min: 4 });
                }
            }
            SectionSpec::Clear(ClearKind::Shuffle) => {
                if !layout.has_shuffle_section {
                    return Err(ProtocolError::SectionUnsupported { kind: "SHUFFLE", min: 4 });
                }
            }
            SectionSpec::Clear(ClearKind::ModeMask) => {
                if !layout.has_modemask_section {
                    return Err(ProtocolError::SectionUnsupported { kind: "MODEMASK", min: 1 });
                }
                mask = base_mask;
            }
            SectionSpec::Clear(ClearKind::Mode) => mode = base_mode,
            SectionSpec::Compression(comp) => comp.validate()?,
            SectionSpec::Alpha { level } => {
                if *level > 7 {
                    return Err(ModeError::AlphaLevel(*level).into());
                }
            }
            _ => {}
        }
    }
    Ok(())
}
