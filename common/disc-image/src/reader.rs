//! Loading disc images from files on disk

mod cuebin;
mod iso;

use crate::{Disc, DiscError, DiscResult};
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub use cuebin::load_cue;
pub use iso::load_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ImageFormat {
    CueBin,
    Iso,
}

impl ImageFormat {
    /// Determine the image format from the file extension, if it is a supported extension.
    #[must_use]
    pub fn from_file_path(path: &Path) -> Option<Self> {
        let extension = path.extension().and_then(OsStr::to_str)?;
        match extension.to_ascii_lowercase().as_str() {
            "cue" => Some(Self::CueBin),
            "iso" | "bin" | "img" => Some(Self::Iso),
            _ => None,
        }
    }
}

/// Open a disc image, choosing a loader by file extension.
///
/// # Errors
///
/// Returns an error if the extension is not recognized, if any file cannot be opened, or if the
/// image is malformed.
pub fn open<P: AsRef<Path>>(path: P) -> DiscResult<Disc> {
    let path = path.as_ref();
    let format = ImageFormat::from_file_path(path)
        .ok_or_else(|| DiscError::UnsupportedImageFormat(path.display().to_string()))?;
    open_as(path, format)
}

/// Open a disc image with an explicitly chosen loader.
///
/// # Errors
///
/// Returns an error if any file cannot be opened or if the image is malformed.
pub fn open_as<P: AsRef<Path>>(path: P, format: ImageFormat) -> DiscResult<Disc> {
    let path = path.as_ref();
    log::info!("Loading {format:?} image from '{}'", path.display());

    match format {
        ImageFormat::CueBin => load_cue(path, open_buffered),
        ImageFormat::Iso => {
            let file = open_buffered(path).map_err(|source| DiscError::DataFileOpen {
                path: path.display().to_string(),
                source,
            })?;
            let mut disc = load_iso(file)?;
            disc.set_filenames(vec![path.to_path_buf()]);
            Ok(disc)
        }
    }
}

fn open_buffered(path: &Path) -> std::io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}
