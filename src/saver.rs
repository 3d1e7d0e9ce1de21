//! Output fan-out: encodes finished carriers to PNG and writes them (and
//! their used-map sidecars) to disk, in parallel when the `parallel`
//! feature is on.

use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::info;

use crate::protocol::SaveOutput;
use crate::raster::{png_encode, RasterError};

/// Writes every image and map of a finished save pass under `base`.
/// Absolute output paths are honored as-is.
pub fn write_all(out: &SaveOutput, base: &Path) -> Result<(), RasterError> {
    #[cfg(feature = "parallel")]
    let results: Result<Vec<()>, RasterError> = out
        .images
        .par_iter()
        .map(|img| write_one(base, &img.output.path, &png_encode(&img.pixels)?))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let results: Result<Vec<()>, RasterError> = out
        .images
        .iter()
        .map(|img| write_one(base, &img.output.path, &png_encode(&img.pixels)?))
        .collect();
    results?;

    for (name, bytes) in &out.maps {
        write_one(base, name, bytes)?;
    }
    Ok(())
}

fn write_one(base: &Path, name: &str, bytes: &[u8]) -> Result<(), RasterError> {
    let path = resolve(base, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote output");
    Ok(())
}

fn resolve(base: &Path, name: &str) -> PathBuf {
    let p = Path::new(name);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SavedImage;
    use crate::raster::{ImageRef, PixelBuf};

    #[test]
    fn writes_images_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let out = SaveOutput {
            images: vec![SavedImage {
                output: ImageRef::new("sub/out.png"),
                pixels: PixelBuf::filled(2, 2, [1, 2, 3, 255]),
            }],
            maps: vec![("out.map".into(), b"STGIM".to_vec())],
            stats: Vec::new(),
        };
        write_all(&out, dir.path()).unwrap();
        assert!(dir.path().join("sub/out.png").exists());
        assert_eq!(std::fs::read(dir.path().join("out.map")).unwrap(), b"STGIM");
    }
}
