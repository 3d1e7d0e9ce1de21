//! RGBA pixel buffers, image references and the lossless raster codec
//! boundary.
//!
//! Carriers operate on decoded [`PixelBuf`]s; everything that touches an
//! actual image format lives here.  Only lossless formats are usable as
//! carriers, so the PNG path is the default codec.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("pixel buffer size mismatch: {w}x{h} needs {expected} bytes, got {got}")]
    SizeMismatch { w: u32, h: u32, expected: usize, got: usize },
    #[error("image \"{0}\" exceeds the 65535x65535 coordinate space")]
    TooLarge(String),
    #[error("animation frames are not supported by the PNG carrier codec")]
    FrameUnsupported,
    #[error("no carrier registered under \"{0}\"")]
    UnknownCarrier(String),
    #[error("no used map registered under \"{0}\"")]
    UnknownMap(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decoded RGBA8 raster, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuf {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl PixelBuf {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<PixelBuf, RasterError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(RasterError::SizeMismatch { w: width, h: height, expected, got: data.len() });
        }
        Ok(PixelBuf { width, height, data })
    }

    /// A uniformly filled buffer, handy for tests and capacity probes.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> PixelBuf {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            data.extend_from_slice(&rgba);
        }
        PixelBuf { width, height, data }
    }

    fn offset(&self, x: u16, y: u16) -> usize {
        debug_assert!((x as u32) < self.width && (y as u32) < self.height);
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn get(&self, x: u16, y: u16) -> [u8; 4] {
        let o = self.offset(x, y);
        [self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]
    }

    pub fn set(&mut self, x: u16, y: u16, px: [u8; 4]) {
        let o = self.offset(x, y);
        self.data[o..o + 4].copy_from_slice(&px);
    }

    pub fn set_channel(&mut self, x: u16, y: u16, c: usize, v: u8) {
        let o = self.offset(x, y);
        self.data[o + c] = v;
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }
}

/// Parses and names one image slot: a path, an optional animation frame and
/// an optional used-map sidecar.
///
/// The textual form is `path`, `frame|N|path` or either followed by
/// `+map:path` handled by the builder; the wire name of a table entry is
/// derived from the basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: String,
    pub frame: Option<u32>,
    pub map: Option<String>,
}

impl ImageRef {
    pub fn new(path: impl Into<String>) -> ImageRef {
        ImageRef { path: path.into(), frame: None, map: None }
    }

    pub fn with_frame(mut self, frame: u32) -> ImageRef {
        self.frame = Some(frame);
        self
    }

    pub fn with_map(mut self, map: impl Into<String>) -> ImageRef {
        self.map = Some(map.into());
        self
    }

    pub fn parse(s: &str) -> ImageRef {
        if let Some(rest) = s.strip_prefix("frame|") {
            if let Some((n, path)) = rest.split_once('|') {
                if let Ok(frame) = n.parse() {
                    return ImageRef::new(path).with_frame(frame);
                }
            }
        }
        ImageRef::new(s)
    }

    pub fn basename(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }

    /// Name written into an image-table entry.  Frame references keep the
    /// `frame|N|` prefix so pre-1.5 readers can reparse them.
    pub fn wire_name(&self) -> String {
        match self.frame {
            Some(n) => format!("frame|{}|{}", n, self.basename()),
            None => self.basename(),
        }
    }
}

pub fn png_decode(bytes: &[u8]) -> Result<PixelBuf, RasterError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8();
    let (w, h) = img.dimensions();
    if w > u16::MAX as u32 || h > u16::MAX as u32 {
        return Err(RasterError::TooLarge(format!("{}x{}", w, h)));
    }
    PixelBuf::new(w, h, img.into_raw())
}

pub fn png_encode(pix: &PixelBuf) -> Result<Vec<u8>, RasterError> {
    let img = RgbaImage::from_raw(pix.width, pix.height, pix.data.clone())
        .expect("pixel buffer length checked at construction");
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn png_load(path: &Path) -> Result<PixelBuf, RasterError> {
    png_decode(&fs::read(path)?)
}

pub fn png_save(path: &Path, pix: &PixelBuf) -> Result<(), RasterError> {
    fs::write(path, png_encode(pix)?)?;
    Ok(())
}

/// Source of carrier pixels and used-map sidecars, injected so the protocol
/// never touches the filesystem directly.
pub trait CarrierProvider {
    fn load(&mut self, image: &ImageRef) -> Result<PixelBuf, RasterError>;
    fn load_map(&mut self, name: &str) -> Result<Vec<u8>, RasterError>;
}

/// Loads PNG carriers relative to a base directory.
pub struct FsProvider {
    base: PathBuf,
}

impl FsProvider {
    pub fn new(base: impl Into<PathBuf>) -> FsProvider {
        FsProvider { base: base.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let p = Path::new(name);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }
}

impl CarrierProvider for FsProvider {
    fn load(&mut self, image: &ImageRef) -> Result<PixelBuf, RasterError> {
        if image.frame.is_some() {
            return Err(RasterError::FrameUnsupported);
        }
        png_load(&self.resolve(&image.path))
    }

    fn load_map(&mut self, name: &str) -> Result<Vec<u8>, RasterError> {
        Ok(fs::read(self.resolve(name))?)
    }
}

/// In-memory provider keyed by name, used by tests and round-trip scenarios
/// that never touch disk.
#[derive(Default)]
pub struct MemoryProvider {
    images: HashMap<String, PixelBuf>,
    maps: HashMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> MemoryProvider {
        MemoryProvider::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, pix: PixelBuf) -> &mut Self {
        self.images.insert(name.into(), pix);
        self
    }

    pub fn insert_map(&mut self, name: impl Into<String>, map: Vec<u8>) -> &mut Self {
        self.maps.insert(name.into(), map);
        self
    }
}

impl CarrierProvider for MemoryProvider {
    fn load(&mut self, image: &ImageRef) -> Result<PixelBuf, RasterError> {
        if image.frame.is_some() {
            return Err(RasterError::FrameUnsupported);
        }
        self.images
            .get(&image.path)
            .cloned()
            .ok_or_else(|| RasterError::UnknownCarrier(image.path.clone()))
    }

    fn load_map(&mut self, name: &str) -> Result<Vec<u8>, RasterError> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| RasterError::UnknownMap(name.to_string()))
    }
}
