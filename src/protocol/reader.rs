//! The load pass: header parse, section scan with state snapshots, and the
//! deferred payload extraction that replays them.

use std::collections::HashMap;

use tracing::{debug, info};

use super::{Protocol, ProtocolError, TableEntry};
use crate::carrier::Carrier;
use crate::crypto::{
    self, derive_key, derive_key_legacy, derive_key_md5, CipherId, Encryption, KdfId, KdfParams,
    PasswordProvider,
};
use crate::handles::{Loaded, PiecePart, StegFile, StegPartialFile, StegText};
use crate::mode::{alpha_from_code, Mode, ModeMask};
use crate::placement::{Rect, SeededRng};
use crate::raster::{CarrierProvider, ImageRef};
use crate::section::{self, HonorMask};
use crate::transform::{Compression, TransformError};
use crate::usedmap::UsedMap;
use crate::wire;

/// Out-of-band knowledge a load pass needs: the master image plus whatever
/// seeds and header overrides the container was written with.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub input: ImageRef,
    pub head_mode: Mode,
    pub head_mask: ModeMask,
    pub rand: Option<String>,
    pub shuffle: Option<String>,
    pub cursor: Option<(u16, u16)>,
}

impl LoadRequest {
    pub fn new(input: ImageRef) -> LoadRequest {
        LoadRequest {
            input,
            head_mode: Mode::default(),
            head_mask: ModeMask::default(),
            rand: None,
            shuffle: None,
            cursor: None,
        }
    }
}

/// Tracks a PARTIALFILE while its pieces trickle in.
struct PartialRead {
    name: String,
    size: u64,
    compress: Option<Compression>,
    encrypt: Option<Encryption>,
    /// Pieces keyed by their wire ordinal; wire arrival order is not
    /// guaranteed to match.
    pieces: Vec<(u32, PiecePart)>,
    received: u64,
}

impl Protocol {
    /// Scans a container, returning the protocol (holding carrier state for
    /// extraction) and the discovered payload handles.
    pub fn load(
        req: LoadRequest,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<(Protocol, Loaded), ProtocolError> {
        let head_mode = req.head_mode.fixed();
        req.head_mask.validate(head_mode)?;

        let pixels = provider.load(&req.input)?;
        let master_name = req.input.basename();
        let mut master = Carrier::new(master_name.clone(), pixels, false);
        master.set_mode(head_mode);
        master.set_mask(req.head_mask);

        // version is read below; the layout only matters for map strictness
        // once sections reference sidecars, so start at the latest
        let mut p = Protocol::new(
            wire::layout(wire::VERSION_MAJOR, wire::LATEST_MINOR)?,
            (wire::VERSION_MAJOR, wire::LATEST_MINOR),
            master,
            master_name,
            false,
        );
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
        if let Some(map_name) = &req.input.map {
            let raw = provider.load_map(map_name)?;
            // strictness is a version property we don't know yet; lenient
            p.carriers[0].apply_map(UsedMap::from_bytes(&raw, false)?);
        }

        p.read_header(req.head_mask)?;
        info!(version = %format!("{}.{}", p.version.0, p.version.1), "scanning container");

        let count = p.read_field(p.layout.section_count)?;
        let mut loaded = Loaded::default();
        let mut partials: HashMap<u32, PartialRead> = HashMap::new();
        for index in 0..count as usize {
            let (c, s) = p.parts();
            let id = c.read_int(s, 9)? as u16;
            debug!(index, id, "section");
            p.read_section(id, index, provider, passwords, &mut loaded, &mut partials)?;
        }
        p.session.scrub();
        Ok((p, loaded))
    }

    fn read_header(&mut self, head_mask: ModeMask) -> Result<(), ProtocolError> {
        let (c, s) = self.parts();
        let major = c.read_int(s, 6)? as u8;
        let minor = c.read_int(s, 6)? as u8;
        let layout = wire::layout(major, minor)?;
        self.layout = layout;
        self.version = (major, minor);

        let (c, s) = self.parts();
        let body_mode = Mode::from_wire(c.read_int(s, 6)? as u8).fixed();
        c.set_mode(body_mode);
        let settings = c.read_int(s, 14)?;
        let alpha_level = (settings >> 11) as u8;
        let (body_mask, reserved) = if layout.header_has_mask {
            (ModeMask::from_wire((settings >> 8) as u8), settings & 0xff)
        } else {
            (ModeMask::default(), settings & 0x7ff)
        };
        if reserved != 0 {
            return Err(ProtocolError::ReservedBits);
        }
        body_mask.validate(body_mode)?;
        let base_alpha = alpha_from_code(alpha_level)?;

        self.session.base_mode = body_mode;
        self.session.base_mask = body_mask;
        self.session.base_alpha = base_alpha;
        let c = &mut self.carriers[self.active];
        if head_mask.wire() != body_mask.wire() {
            c.clear();
        }
        c.set_mask(body_mask);
        if alpha_level != 0 {
            c.clear();
            c.alpha_thresh = base_alpha;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_section(
        &mut self,
        id: u16,
        index: usize,
        provider: &mut dyn CarrierProvider,
        passwords: &mut dyn PasswordProvider,
        loaded: &mut Loaded,
        partials: &mut HashMap<u32, PartialRead>,
    ) -> Result<(), ProtocolError> {
        let clear = id & section::SEC_CLEAR_BIT != 0;
        let kind = id & 0xff;
        if clear {
            return self.read_clear(kind, index);
        }
        match kind {
            section::SEC_FILE => {
                let size = self.read_field(self.layout.file_len)?;
                let (c, s) = self.parts();
                let name = c.read_string(s)?;
                let state = self.save_state();
                self.skip_payload(size)?;
                loaded.files.push(StegFile { name, size, state });
            }
            section::SEC_PARTIALFILE => {
                let size = self.read_field(self.layout.file_len)?;
                let (c, s) = self.parts();
                let name = c.read_string(s)?;
                let pf_index = self.read_field(self.layout.piece_index)? as u32;
                partials.insert(
                    pf_index,
                    PartialRead {
                        name,
                        size,
                        compress: self.session.compress,
                        encrypt: self.session.encrypt.clone(),
                        pieces: Vec::new(),
                        received: 0,
                    },
                );
            }
            section::SEC_PARTIALFILEPIECE => {
                let pf_index = self.read_field(self.layout.piece_index)? as u32;
                let piece = self.read_field(self.layout.piece_index)? as u32;
                let (c, s) = self.parts();
                let last = c.read_int(s, 1)? != 0;
                let size = self.read_field(self.layout.file_len)?;
                let state = self.save_state();
                self.skip_payload(size)?;
                let pf = partials
                    .get_mut(&pf_index)
                    .ok_or(ProtocolError::UnknownPartialIndex(pf_index))?;
                pf.pieces.push((piece, PiecePart { size, state }));
                pf.received += size;
                if last {
                    let mut pf = partials.remove(&pf_index).expect("just seen");
                    pf.pieces.sort_by_key(|(ord, _)| *ord);
                    loaded.partials.push(StegPartialFile {
                        name: pf.name,
                        index: pf_index,
                        size: pf.received,
                        pieces: pf.pieces.into_iter().map(|(_, p)| p).collect(),
                        compress: pf.compress,
                        encrypt: pf.encrypt,
                    });
                }
            }
            section::SEC_TEXT => {
                let honor_bits = self.layout.honor_bits as usize;
                let (c, s) = self.parts();
                let honor = HonorMask::from_wire(c.read_int(s, honor_bits)? as u8);
                let size = self.read_field(self.layout.text_len)?;
                let state = self.save_state();
                self.skip_payload(size)?;
                loaded.texts.push(StegText { size, honor, state });
            }
            section::SEC_RAND => {
                let (c, s) = self.parts();
                let seed = c.read_int(s, 32)? as u32;
                c.clear();
                c.local_rand = Some(SeededRng::new(seed));
            }
            section::SEC_SHUFFLE => {
                if !self.layout.has_shuffle_section {
                    return Err(ProtocolError::UnknownSection { id, index });
                }
                let (c, s) = self.parts();
                let seed = c.read_int(s, 32)? as u32;
                c.clear();
                self.session.shuffle = Some(SeededRng::new(seed));
            }
            section::SEC_RECT => {
                let (c, s) = self.parts();
                let x = c.read_int(s, 16)? as u16;
                let y = c.read_int(s, 16)? as u16;
                let w = c.read_int(s, 16)? as u16;
                let h = c.read_int(s, 16)? as u16;
                let (pw, ph) = (c.pixels().width, c.pixels().height);
                if w == 0 || h == 0 || x as u32 + w as u32 > pw || y as u32 + h as u32 > ph {
                    return Err(ProtocolError::RectOutOfBounds { x, y, w, h });
                }
                c.clear();
                c.rect = Some(Rect::new(x, y, w, h));
                c.reset_cursor(s, true)?;
            }
            section::SEC_CURSOR => self.read_cursor(provider)?,
            section::SEC_COMPRESSION => {
                let (c, s) = self.parts();
                let ty = c.read_int(s, 4)? as u8;
                let comp = match ty {
                    crate::transform::COMP_NONE => {
                        self.session.compress = None;
                        return Ok(());
                    }
                    crate::transform::COMP_GZIP => {
                        Compression::Gzip { level: c.read_int(s, 4)? as u8 }
                    }
                    crate::transform::COMP_BROTLI => Compression::Brotli {
                        level: c.read_int(s, 4)? as u8,
                        text: c.read_int(s, 1)? != 0,
                    },
                    other => return Err(TransformError::UnknownType(other).into()),
                };
                comp.validate()?;
                self.session.compress = Some(comp);
            }
            section::SEC_ENCRYPTION => self.read_encryption(passwords)?,
            section::SEC_MODE => {
                let (c, s) = self.parts();
                let mode = Mode::from_wire(c.read_int(s, 6)? as u8).fixed();
                c.mask().validate(mode)?;
                c.clear();
                c.set_mode(mode);
                self.session.mode_override = Some(mode);
            }
            section::SEC_MODEMASK => {
                if !self.layout.has_modemask_section {
                    return Err(ProtocolError::UnknownSection { id, index });
                }
                let (c, s) = self.parts();
                let mask = ModeMask::from_wire(c.read_int(s, 3)? as u8);
                mask.validate(c.mode())?;
                c.clear();
                c.set_mask(mask);
                self.session.mask_override = Some(mask);
            }
            section::SEC_ALPHA => {
                let (c, s) = self.parts();
                let level = c.read_int(s, 3)? as u8;
                let thresh = alpha_from_code(level)?;
                c.clear();
                c.alpha_thresh = thresh;
            }
            section::SEC_IMAGETABLE => {
                let count = self.read_field(self.layout.table_count)? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let (c, s) = self.parts();
                    let name = c.read_string(s)?;
                    let mut input = ImageRef::parse(&name);
                    let mut load_map = None;
                    if self.layout.table_entry_flags {
                        let (c, s) = self.parts();
                        if c.read_int(s, 1)? != 0 {
                            let frame = c.read_vlq(s, 4)? as u32;
                            input = input.with_frame(frame);
                        }
                        if c.read_int(s, 1)? != 0 {
                            let map = c.read_string(s)?;
                            input = input.with_map(map.clone());
                            load_map = Some(map);
                        }
                    }
                    let carrier = if name == self.master_name { Some(0) } else { None };
                    entries.push(TableEntry { name, input, load_map, output: None, carrier });
                }
                self.table = Some(entries);
            }
            _ => return Err(ProtocolError::UnknownSection { id, index }),
        }
        Ok(())
    }

    fn read_clear(&mut self, kind: u16, index: usize) -> Result<(), ProtocolError> {
        match kind {
            section::SEC_RAND => {
                let c = &mut self.carriers[self.active];
                c.clear();
                c.local_rand = None;
            }
            section::SEC_SHUFFLE => {
                if !self.layout.has_shuffle_section {
                    return Err(ProtocolError::UnknownSection {
                        id: kind | section::SEC_CLEAR_BIT,
                        index,
                    });
                }
                self.carriers[self.active].clear();
                self.session.shuffle = None;
            }
            section::SEC_RECT => {
                let c = &mut self.carriers[self.active];
                c.clear();
                c.rect = None;
            }
            section::SEC_COMPRESSION => self.session.compress = None,
            section::SEC_ENCRYPTION => self.session.encrypt = None,
            section::SEC_MODE => {
                self.session.mode_override = None;
                let base = self.session.base_mode;
                let c = &mut self.carriers[self.active];
                c.clear();
                c.set_mode(base);
            }
            section::SEC_MODEMASK => {
                if !self.layout.has_modemask_section {
                    return Err(ProtocolError::UnknownSection {
                        id: kind | section::SEC_CLEAR_BIT,
                        index,
                    });
                }
                self.session.mask_override = None;
                let base = self.session.base_mask;
                let c = &mut self.carriers[self.active];
                c.clear();
                c.set_mask(base);
            }
            section::SEC_ALPHA => {
                let base = self.session.base_alpha;
                let c = &mut self.carriers[self.active];
                c.clear();
                c.alpha_thresh = base;
            }
            section::SEC_IMAGETABLE => self.drop_table()?,
            _ => {
                return Err(ProtocolError::UnknownSection {
                    id: kind | section::SEC_CLEAR_BIT,
                    index,
                })
            }
        }
        Ok(())
    }

    fn read_cursor(&mut self, provider: &mut dyn CarrierProvider) -> Result<(), ProtocolError> {
        let (c, s) = self.parts();
        let cmd = c.read_int(s, 3)? as u8;
        match cmd {
            section::CURSOR_PUSH => {
                let frame = crate::session::CursorFrame {
                    table_index: self.active_table,
                    x: self.carriers[self.active].cursor.0,
                    y: self.carriers[self.active].cursor.1,
                };
                self.session.cursor_stack.push(frame);
            }
            section::CURSOR_POP => {
                self.carriers[self.active].clear();
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
            section::CURSOR_MOVE => {
                let image = self.read_field(self.layout.image_index)? as usize;
                let (c, s) = self.parts();
                let x = c.read_int(s, 16)? as u16;
                let y = c.read_int(s, 16)? as u16;
                c.clear();
                self.switch_image(image, provider)?;
                self.move_within(x, y)?;
            }
            section::CURSOR_MOVE_IMAGE => {
                let image = self.read_field(self.layout.image_index)? as usize;
                self.carriers[self.active].clear();
                self.switch_image(image, provider)?;
                let (c, s) = self.parts();
                c.reset_cursor(s, false)?;
            }
            other => return Err(ProtocolError::UnknownCursorCmd(other)),
        }
        Ok(())
    }

    fn read_encryption(
        &mut self,
        passwords: &mut dyn PasswordProvider,
    ) -> Result<(), ProtocolError> {
        let key = if self.layout.explicit_kdf {
            let (c, s) = self.parts();
            let kdf = KdfId::from_wire(c.read_int(s, 4)? as u8)?;
            let advanced = c.read_int(s, 1)? != 0;
            let params = if advanced {
                let mut values = Vec::new();
                for _ in 0..KdfParams::value_count(kdf) {
                    let (c, s) = self.parts();
                    values.push(c.read_vlq(s, 8)?);
                }
                KdfParams::from_values(kdf, &values)
            } else {
                kdf.default_params()
            };
            let (c, s) = self.parts();
            let salt = c.read_bytes(s, 32)?;
            let password = passwords.password("container password")?;
            Some(derive_key(kdf, &params, &password, &salt)?)
        } else {
            None
        };
        let (c, s) = self.parts();
        let code = c.read_int(s, 4)? as u8;
        // type NONE carries no IV and drops the active pipeline
        if code == crypto::CRYPT_NONE {
            self.session.encrypt = None;
            return Ok(());
        }
        let cipher = CipherId::from_wire(code)?;
        let iv_bytes = c.read_bytes(s, 16)?;
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&iv_bytes);
        let key = match key {
            Some(k) => k,
            None => {
                let password = passwords.password("container password")?;
                if self.layout.md5_keys {
                    derive_key_md5(&password)
                } else {
                    derive_key_legacy(&password)
                }
            }
        };
        self.session.encrypt = Some(Encryption { cipher, key, iv });
        Ok(())
    }

    /// Consumes a payload body as one run, mirroring the writer's single
    /// bulk write so shuffle generators stay aligned.
    fn skip_payload(&mut self, size: u64) -> Result<(), ProtocolError> {
        let (c, s) = self.parts();
        c.read_bytes(s, size as usize)?;
        Ok(())
    }

    /// Replays a FILE handle and undoes its pipeline.
    pub fn extract_file(&mut self, file: &StegFile) -> Result<Vec<u8>, ProtocolError> {
        self.load_state(&file.state);
        let (c, s) = self.parts();
        let data = c.read_bytes(s, file.size as usize)?;
        undo_pipeline(data, &file.state.encrypt, &file.state.compress)
    }

    /// Replays every piece of a partial file in wire order, then undoes the
    /// pipeline over the joined bytes.
    pub fn extract_partial(&mut self, file: &StegPartialFile) -> Result<Vec<u8>, ProtocolError> {
        let mut data = Vec::with_capacity(file.size as usize);
        for piece in &file.pieces {
            self.load_state(&piece.state);
            let (c, s) = self.parts();
            data.extend(c.read_bytes(s, piece.size as usize)?);
        }
        undo_pipeline(data, &file.encrypt, &file.compress)
    }

    /// Replays a TEXT handle; the honor mask decides which pipeline stages
    /// to undo.
    pub fn extract_text(&mut self, text: &StegText) -> Result<String, ProtocolError> {
        self.load_state(&text.state);
        let (c, s) = self.parts();
        let mut data = c.read_bytes(s, text.size as usize)?;
        if text.honor.encryption() {
            if let Some(enc) = &text.state.encrypt {
                data = enc.decrypt(&data)?;
            }
        }
        if text.honor.compression() {
            if let Some(comp) = &text.state.compress {
                data = comp.decompress(&data)?;
            }
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

fn undo_pipeline(
    mut data: Vec<u8>,
    encrypt: &Option<Encryption>,
    compress: &Option<Compression>,
) -> Result<Vec<u8>, ProtocolError> {
    if let Some(enc) = encrypt {
        data = enc.decrypt(&data)?;
    }
    if let Some(comp) = compress {
        data = comp.decompress(&data)?;
    }
    Ok(data)
}
