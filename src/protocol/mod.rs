//! Container protocol: the carrier arena, image-table switching and the
//! state snapshots shared by the writer and reader passes.
//!
//! Index 0 of the arena is always the master carrier, the image the header
//! and section ids live in.  Secondary carriers come and go through
//! IMAGETABLE sections and are loaded lazily on first switch.

mod reader;
mod writer;

pub use reader::LoadRequest;
pub use writer::{CarrierStats, SaveOutput, SaveRequest, SavedImage};

use std::collections::HashMap;

use thiserror::Error;

use crate::carrier::{Carrier, CarrierError};
use crate::crypto::CryptoError;
use crate::handles::SavedState;
use crate::mode::ModeError;
use crate::raster::{CarrierProvider, ImageRef, RasterError};
use crate::session::Session;
use crate::transform::TransformError;
use crate::usedmap::{UsedMap, UsedMapError};
use crate::wire::{VersionError, VersionLayout, Width};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("reserved header bits set; probably not a stegim container")]
    ReservedBits,
    #[error("unknown section id {id} at section {index}")]
    UnknownSection { id: u16, index: usize },
    #[error("{kind} sections require container version 1.{min} or newer")]
    SectionUnsupported { kind: &'static str, min: u8 },
    #[error("unknown cursor command {0}")]
    UnknownCursorCmd(u8),
    #[error("cursor stack is empty on pop")]
    CursorStackEmpty,
    #[error("cursor move lands outside the active rect")]
    CursorOutsideRect,
    #[error("no image table is active")]
    NoImageTable,
    #[error("image table index {0} out of range")]
    BadImageIndex(usize),
    #[error("unknown partial file index {0}")]
    UnknownPartialIndex(u32),
    #[error("rect {x},{y} {w}x{h} does not fit the carrier")]
    RectOutOfBounds { x: u16, y: u16, w: u16, h: u16 },
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    UsedMap(#[from] UsedMapError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One image-table slot as the protocol tracks it.
#[derive(Debug, Clone)]
pub(crate) struct TableEntry {
    /// Wire name, also the dedupe key across table rebuilds.
    pub name: String,
    /// Where the carrier pixels come from.
    pub input: ImageRef,
    /// Used map preloaded before any bits touch the carrier.
    pub load_map: Option<String>,
    /// Writer side only: where the modified copy and its map go.
    pub output: Option<ImageRef>,
    /// Arena index once loaded.
    pub carrier: Option<usize>,
}

/// Writer-side registry of carriers that must be emitted at the end.
#[derive(Debug, Clone)]
pub(crate) struct OutputSlot {
    pub arena: usize,
    pub output: ImageRef,
}

pub struct Protocol {
    pub(crate) layout: &'static VersionLayout,
    pub(crate) version: (u8, u8),
    pub(crate) carriers: Vec<Carrier>,
    pub(crate) session: Session,
    pub(crate) active: usize,
    pub(crate) active_table: Option<usize>,
    pub(crate) table: Option<Vec<TableEntry>>,
    /// Name -> arena index for every carrier ever loaded, so a rebuilt
    /// table reuses the same pixels.
    pub(crate) loaded: HashMap<String, usize>,
    pub(crate) outputs: Vec<OutputSlot>,
    pub(crate) master_name: String,
    pub(crate) writing: bool,
}

impl Protocol {
    pub(crate) fn new(
        layout: &'static VersionLayout,
        version: (u8, u8),
        master: Carrier,
        master_name: String,
        writing: bool,
    ) -> Protocol {
        let mut loaded = HashMap::new();
        loaded.insert(master_name.clone(), 0);
        Protocol {
            layout,
            version,
            carriers: vec![master],
            session: Session::default(),
            active: 0,
            active_table: None,
            table: None,
            loaded,
            outputs: Vec::new(),
            master_name,
            writing,
        }
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub(crate) fn parts(&mut self) -> (&mut Carrier, &mut Session) {
        (&mut self.carriers[self.active], &mut self.session)
    }

    pub(crate) fn write_field(&mut self, width: Width, v: u64) -> Result<(), ProtocolError> {
        let (c, s) = self.parts();
        match width {
            Width::Fixed(n) => c.write_int(s, v, n as usize)?,
            Width::Vlq(n) => c.write_vlq(s, v, n as usize)?,
        }
        Ok(())
    }

    pub(crate) fn read_field(&mut self, width: Width) -> Result<u64, ProtocolError> {
        let (c, s) = self.parts();
        Ok(match width {
            Width::Fixed(n) => c.read_int(s, n as usize)?,
            Width::Vlq(n) => c.read_vlq(s, n as usize)?,
        })
    }

    /// Flush on the write side, boundary-discard on the read side.  Every
    /// placement-affecting section does this so both passes hit the next
    /// pixel in lockstep.
    pub(crate) fn boundary(&mut self) -> Result<(), ProtocolError> {
        let writing = self.writing;
        let (c, s) = self.parts();
        if writing {
            c.flush(s)?;
        } else {
            c.clear();
        }
        Ok(())
    }

    /// Switches the active carrier to table slot `index`, loading it on
    /// first use.  Re-selecting the active slot is a no-op.
    pub(crate) fn switch_image(
        &mut self,
        index: usize,
        provider: &mut dyn CarrierProvider,
    ) -> Result<(), ProtocolError> {
        let entry = self
            .table
            .as_ref()
            .ok_or(ProtocolError::NoImageTable)?
            .get(index)
            .ok_or(ProtocolError::BadImageIndex(index))?
            .clone();

        let arena = match entry.carrier.or_else(|| self.loaded.get(&entry.name).copied()) {
            Some(a) => a,
            None => {
                let pixels = provider.load(&entry.input)?;
                let mut carrier = Carrier::new(entry.name.clone(), pixels, self.writing);
                if let Some(map_name) = &entry.load_map {
                    let raw = provider.load_map(map_name)?;
                    carrier.apply_map(UsedMap::from_bytes(&raw, self.layout.strict_map_magic)?);
                }
                self.carriers.push(carrier);
                let a = self.carriers.len() - 1;
                self.loaded.insert(entry.name.clone(), a);
                if self.writing {
                    if let Some(output) = &entry.output {
                        self.outputs.push(OutputSlot { arena: a, output: output.clone() });
                    }
                }
                a
            }
        };
        self.table.as_mut().unwrap()[index].carrier = Some(arena);

        if arena != self.active {
            self.boundary()?;
            self.active = arena;
        }
        self.active_table = Some(index);

        // entering carrier adopts the session-wide placement settings
        let mode = self.session.effective_mode();
        let mask = self.session.effective_mask();
        let alpha = self.session.base_alpha;
        let c = &mut self.carriers[arena];
        c.set_mode(mode);
        c.set_mask(mask);
        c.alpha_thresh = alpha;
        Ok(())
    }

    /// Drops the image table, parking the active cursor back on the
    /// master.  Loaded carriers stay in the arena for output.
    pub(crate) fn drop_table(&mut self) -> Result<(), ProtocolError> {
        self.boundary()?;
        self.active = 0;
        self.active_table = None;
        self.table = None;
        Ok(())
    }

    /// Snapshot of the active carrier and pipeline, taken the moment a
    /// payload body starts.
    pub(crate) fn save_state(&self) -> SavedState {
        let c = &self.carriers[self.active];
        SavedState {
            carrier: self.active,
            cursor: c.cursor,
            pending: c.pending().clone(),
            used: c.used.clone(),
            rect: c.rect,
            rand: c.local_rand.clone().or_else(|| self.session.global_rand.clone()),
            shuffle: self.session.shuffle.clone(),
            mode: c.mode(),
            mask: c.mask(),
            alpha_thresh: c.alpha_thresh,
            compress: self.session.compress,
            encrypt: self.session.encrypt.clone(),
        }
    }

    /// Rewinds the protocol onto a snapshot for payload replay.
    pub(crate) fn load_state(&mut self, st: &SavedState) {
        self.active = st.carrier;
        self.active_table = None;
        let c = &mut self.carriers[st.carrier];
        c.cursor = st.cursor;
        c.set_pending(st.pending.clone());
        c.used = st.used.clone();
        c.rect = st.rect;
        c.local_rand = st.rand.clone();
        c.set_mode(st.mode);
        c.set_mask(st.mask);
        c.alpha_thresh = st.alpha_thresh;
        self.session.global_rand = None;
        self.session.shuffle = st.shuffle.clone();
        self.session.compress = st.compress;
        self.session.encrypt = st.encrypt.clone();
    }
}
