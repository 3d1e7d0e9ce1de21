//! A carrier: one decoded image plus everything needed to pump payload bits
//! through its pixels.
//!
//! Bits destined for pixels sit in a pending FIFO and are spliced only when
//! a full pixel's worth is available.  Mode, mask and cursor changes issued
//! while bits are pending are queued as deferred ops so they land at the
//! exact bit boundary the reader will see, never mid-pixel.

use std::collections::VecDeque;

use thiserror::Error;

use crate::bits::{bits_to_int, bytes_to_bits, int_to_bits, vlq_encode, BitBuf};
use crate::mode::{Mode, ModeMask, Submode};
use crate::placement::{shuffle_bits, unshuffle_bits, Rect};
use crate::raster::PixelBuf;
use crate::session::Session;
use crate::usedmap::UsedMap;

#[derive(Error, Debug)]
pub enum CarrierError {
    #[error("image \"{0}\" has run out of space")]
    EndOfImage(String),
    #[error("image \"{0}\" has run out of space inside the active rect")]
    EndOfRect(String),
}

/// Deferred state change, applied when the pending bits written before it
/// have all reached pixels.
#[derive(Debug, Clone)]
enum WriteOp {
    Bits(Vec<bool>),
    SetMode(Mode),
    SetMask(ModeMask),
    SetCursor(u16, u16),
}

#[derive(Debug, Clone)]
pub struct Carrier {
    label: String,
    pixels: PixelBuf,
    pub cursor: (u16, u16),
    mode: Mode,
    mask: ModeMask,
    pub alpha_thresh: u8,
    pub used: UsedMap,
    pub rect: Option<Rect>,
    /// Carrier-local generator set by a RAND section; trumps the session's
    /// global one.
    pub local_rand: Option<crate::placement::SeededRng>,
    pending: BitBuf,
    queue: VecDeque<WriteOp>,
    writing: bool,
}

impl Carrier {
    pub fn new(label: impl Into<String>, pixels: PixelBuf, writing: bool) -> Carrier {
        Carrier {
            label: label.into(),
            pixels,
            cursor: (0, 0),
            mode: Mode::default(),
            mask: ModeMask::default(),
            alpha_thresh: crate::mode::ALPHA_LEVELS[0],
            used: UsedMap::new(),
            rect: None,
            local_rand: None,
            pending: BitBuf::new(),
            queue: VecDeque::new(),
            writing,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pixels(&self) -> &PixelBuf {
        &self.pixels
    }

    pub fn into_pixels(self) -> PixelBuf {
        self.pixels
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn mask(&self) -> ModeMask {
        self.mask
    }

    pub fn pending(&self) -> &BitBuf {
        &self.pending
    }

    pub fn set_pending(&mut self, pending: BitBuf) {
        self.pending = pending;
    }

    pub fn apply_map(&mut self, map: UsedMap) {
        self.used = map;
    }

    /// Region coordinates as (x, y, w, h), the active rect or the full
    /// image.
    fn region(&self) -> (u16, u16, u16, u16) {
        match self.rect {
            Some(r) => (r.x, r.y, r.w, r.h),
            None => (0, 0, self.pixels.width as u16, self.pixels.height as u16),
        }
    }

    fn exhausted(&self) -> CarrierError {
        if self.rect.is_some() {
            CarrierError::EndOfRect(self.label.clone())
        } else {
            CarrierError::EndOfImage(self.label.clone())
        }
    }

    /// Mode and mask changes issued mid-stream defer until every pending
    /// bit written before them has landed.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.writing && !(self.pending.is_empty() && self.queue.is_empty()) {
            self.queue.push_back(WriteOp::SetMode(mode));
        } else {
            self.mode = mode;
        }
    }

    pub fn set_mask(&mut self, mask: ModeMask) {
        if self.writing && !(self.pending.is_empty() && self.queue.is_empty()) {
            self.queue.push_back(WriteOp::SetMask(mask));
        } else {
            self.mask = mask;
        }
    }

    pub fn set_cursor(&mut self, x: u16, y: u16) {
        if self.writing && !(self.pending.is_empty() && self.queue.is_empty()) {
            self.queue.push_back(WriteOp::SetCursor(x, y));
        } else {
            self.cursor = (x, y);
        }
    }

    /// Moves the cursor to the region's starting position: a fresh draw
    /// when a generator is active, the region origin on a full reset.
    pub fn reset_cursor(&mut self, sess: &mut Session, full: bool) -> Result<(), CarrierError> {
        let (rx, ry, rw, rh) = self.region();
        let err = self.exhausted();
        let Carrier { used, local_rand, rect, pixels, .. } = self;
        if let Some(rng) = local_rand.as_mut().or(sess.global_rand.as_mut()) {
            // a nearly full region would stall the draw loop
            if let Some(r) = rect {
                if r.used as u64 * 100 >= r.max() as u64 * 95 {
                    return Err(err);
                }
            } else if used.marked_len() as u64 >= pixels.pixel_count() {
                return Err(err);
            }
            loop {
                let x = rx + rng.gen(rw as u32) as u16;
                let y = ry + rng.gen(rh as u32) as u16;
                if !used.contains(x, y) {
                    self.cursor = (x, y);
                    return Ok(());
                }
            }
        }
        if full {
            self.cursor = (rx, ry);
        }
        Ok(())
    }

    /// Advances past the (just consumed) cursor pixel to the next unused
    /// coordinate: sequential row-major inside the region, or a generator
    /// draw when one is active.
    fn advance(&mut self, sess: &mut Session) -> Result<(), CarrierError> {
        let (rx, ry, rw, rh) = self.region();
        let err = self.exhausted();
        let Carrier { used, local_rand, rect, pixels, cursor, .. } = self;
        let (mut x, mut y) = *cursor;
        if let Some(rng) = local_rand.as_mut().or(sess.global_rand.as_mut()) {
            // a nearly full region would stall the draw loop
            if let Some(r) = rect {
                if r.used as u64 * 100 >= r.max() as u64 * 95 {
                    return Err(err);
                }
            } else if used.marked_len() as u64 >= pixels.pixel_count() {
                return Err(err);
            }
            loop {
                x = rx + rng.gen(rw as u32) as u16;
                y = ry + rng.gen(rh as u32) as u16;
                if !used.contains(x, y) {
                    break;
                }
            }
        } else {
            loop {
                if !used.contains(x, y) {
                    break;
                }
                x += 1;
                if x >= rx + rw {
                    x = rx;
                    y += 1;
                    if y >= ry + rh {
                        return Err(err);
                    }
                }
            }
        }
        self.cursor = (x, y);
        Ok(())
    }

    /// Payload bits the pixel at (x, y) yields under the current mode,
    /// mask and alpha threshold.  Zero means the pixel is burned without
    /// carrying payload.
    fn capacity_at(&self, x: u16, y: u16) -> usize {
        let alpha = self.pixels.get(x, y)[3];
        self.mode
            .submode_for(alpha, self.alpha_thresh)
            .payload_bits(self.mask.active_count()) as usize
    }

    /// Participating RGB channel indexes in wire order.
    fn active_channels(&self) -> Vec<usize> {
        (0..3).filter(|&c| self.mask.has(c)).collect()
    }

    fn splice_pixel(&mut self, x: u16, y: u16, chunk: &[bool]) {
        let mut px = self.pixels.get(x, y);
        let sub = self.mode.submode_for(px[3], self.alpha_thresh);
        let channels = self.active_channels();
        match sub {
            Submode::Disabled => unreachable!("spliced into a disabled pixel"),
            Submode::Depth(d) => {
                let d = d as usize;
                for (o, &c) in channels.iter().enumerate() {
                    let v = bits_to_int(&chunk[o * d..(o + 1) * d]) as u8;
                    let keep = !(((1u16 << d) - 1) as u8);
                    px[c] = px[c] & keep | v;
                }
            }
            Submode::Full24 => {
                for (o, &c) in channels.iter().enumerate() {
                    px[c] = bits_to_int(&chunk[o * 8..(o + 1) * 8]) as u8;
                }
            }
            Submode::Full32 => {
                for (o, &c) in channels.iter().enumerate() {
                    px[c] = bits_to_int(&chunk[o * 8..(o + 1) * 8]) as u8;
                }
                let o = channels.len();
                px[3] = bits_to_int(&chunk[o * 8..(o + 1) * 8]) as u8;
            }
        }
        self.pixels.set(x, y, px);
    }

    fn extract_pixel(&self, x: u16, y: u16) -> Vec<bool> {
        let px = self.pixels.get(x, y);
        let sub = self.mode.submode_for(px[3], self.alpha_thresh);
        let channels = self.active_channels();
        let mut out = Vec::new();
        match sub {
            Submode::Disabled => {}
            Submode::Depth(d) => {
                for &c in &channels {
                    out.extend(int_to_bits(px[c] as u64, d as usize));
                }
            }
            Submode::Full24 => {
                for &c in &channels {
                    out.extend(int_to_bits(px[c] as u64, 8));
                }
            }
            Submode::Full32 => {
                for &c in &channels {
                    out.extend(int_to_bits(px[c] as u64, 8));
                }
                out.extend(int_to_bits(px[3] as u64, 8));
            }
        }
        out
    }

    fn check_room(&self) -> Result<(), CarrierError> {
        if let Some(r) = &self.rect {
            if r.used >= r.max() {
                return Err(CarrierError::EndOfRect(self.label.clone()));
            }
        } else if self.used.payload_count() >= self.pixels.pixel_count() {
            return Err(CarrierError::EndOfImage(self.label.clone()));
        }
        Ok(())
    }

    /// Drains pending bits into pixels.  `force` zero-pads a trailing
    /// partial pixel, the final-flush behavior.
    fn pump(&mut self, sess: &mut Session, force: bool) -> Result<(), CarrierError> {
        loop {
            let (x, y) = self.cursor;
            if self.used.contains(x, y) {
                self.advance(sess)?;
                continue;
            }
            let n = self.capacity_at(x, y);
            if n == 0 {
                if self.pending.is_empty() && self.queue.is_empty() {
                    break;
                }
                self.used.mark(x, y);
                self.advance(sess)?;
                continue;
            }
            if self.pending.len() >= n {
                self.check_room()?;
                let chunk = self.pending.take(n);
                self.splice_pixel(x, y, &chunk);
                self.used.mark_payload(x, y);
                if let Some(r) = self.rect.as_mut() {
                    r.used += 1;
                }
                self.advance(sess)?;
                continue;
            }
            if let Some(op) = self.queue.pop_front() {
                match op {
                    WriteOp::Bits(b) => self.pending.extend(&b),
                    WriteOp::SetMode(m) => self.mode = m,
                    WriteOp::SetMask(m) => self.mask = m,
                    WriteOp::SetCursor(cx, cy) => self.cursor = (cx, cy),
                }
                continue;
            }
            if force && !self.pending.is_empty() {
                self.pending.pad_to(n);
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Appends one logical bit run.  The shuffle, when active, permutes
    /// exactly this run, so reader calls must mirror writer run lengths.
    pub fn write_bits(&mut self, sess: &mut Session, mut bits: Vec<bool>) -> Result<(), CarrierError> {
        debug_assert!(self.writing);
        if let Some(sh) = sess.shuffle.as_mut() {
            shuffle_bits(sh, &mut bits);
        }
        if self.queue.is_empty() {
            self.pending.extend(&bits);
        } else if let Some(WriteOp::Bits(tail)) = self.queue.back_mut() {
            tail.extend(bits);
        } else {
            self.queue.push_back(WriteOp::Bits(bits));
        }
        self.pump(sess, false)
    }

    pub fn write_int(&mut self, sess: &mut Session, v: u64, width: usize) -> Result<(), CarrierError> {
        self.write_bits(sess, int_to_bits(v, width))
    }

    /// Each VLQ chunk is its own run, since the reader cannot know the
    /// total length up front.
    pub fn write_vlq(&mut self, sess: &mut Session, v: u64, chunk: usize) -> Result<(), CarrierError> {
        let bits = vlq_encode(v, chunk);
        for c in bits.chunks(chunk) {
            self.write_bits(sess, c.to_vec())?;
        }
        Ok(())
    }

    /// NUL-terminated string, one run per byte to mirror the reader's
    /// byte-at-a-time scan.
    pub fn write_string(&mut self, sess: &mut Session, s: &str) -> Result<(), CarrierError> {
        for &b in s.as_bytes() {
            self.write_bits(sess, int_to_bits(b as u64, 8))?;
        }
        self.write_bits(sess, int_to_bits(0, 8))
    }

    /// Bulk payload: a single run covering all bytes.
    pub fn write_bytes(&mut self, sess: &mut Session, data: &[u8]) -> Result<(), CarrierError> {
        self.write_bits(sess, bytes_to_bits(data))
    }

    /// Forces everything pending into pixels, padding the tail pixel.
    pub fn flush(&mut self, sess: &mut Session) -> Result<(), CarrierError> {
        if self.pending.is_empty() && self.queue.is_empty() {
            return Ok(());
        }
        self.pump(sess, true)
    }

    /// Read-side counterpart of flush: drops buffered bits so the next
    /// read starts at a pixel boundary.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn read_bits(&mut self, sess: &mut Session, n: usize) -> Result<Vec<bool>, CarrierError> {
        debug_assert!(!self.writing);
        while self.pending.len() < n {
            let (x, y) = self.cursor;
            if self.used.contains(x, y) {
                self.advance(sess)?;
                continue;
            }
            if self.capacity_at(x, y) > 0 {
                let bits = self.extract_pixel(x, y);
                self.pending.extend(&bits);
                self.used.mark_payload(x, y);
                if let Some(r) = self.rect.as_mut() {
                    r.used += 1;
                }
            } else {
                self.used.mark(x, y);
            }
            self.advance(sess)?;
        }
        let mut out = self.pending.take(n);
        if let Some(sh) = sess.shuffle.as_mut() {
            unshuffle_bits(sh, &mut out);
        }
        Ok(out)
    }

    pub fn read_int(&mut self, sess: &mut Session, width: usize) -> Result<u64, CarrierError> {
        Ok(bits_to_int(&self.read_bits(sess, width)?))
    }

    pub fn read_vlq(&mut self, sess: &mut Session, chunk: usize) -> Result<u64, CarrierError> {
        let payload = chunk - 1;
        let mut v = 0u64;
        let mut shift = 0;
        loop {
            let raw = self.read_int(sess, chunk)?;
            v |= (raw & ((1 << payload) - 1)) << shift;
            if raw >> payload == 1 {
                return Ok(v);
            }
            shift += payload;
        }
    }

    pub fn read_string(&mut self, sess: &mut Session) -> Result<String, CarrierError> {
        let mut bytes = Vec::new();
        loop {
            let b = self.read_int(sess, 8)? as u8;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_bytes(&mut self, sess: &mut Session, n: usize) -> Result<Vec<u8>, CarrierError> {
        Ok(crate::bits::bits_to_bytes(&self.read_bits(sess, n * 8)?))
    }
}
