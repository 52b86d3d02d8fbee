//! Layered model of an optical disc image (disc, sessions, tracks, fragments) and a sector codec
//! that reconstructs raw CD sectors and subchannel data from whatever the backing files store

pub mod cdtext;
pub mod cdtime;
pub mod disc;
pub mod ecc;
pub mod fragment;
pub mod reader;
pub mod sector;
pub mod session;
pub mod subchannel;
pub mod track;

pub use disc::{Disc, DpmData, DpmSample, MediumType, SessionMut, TrackMut};
pub use fragment::{AudioFragment, BinaryFragment, Fragment, FragmentKind};
pub use sector::{Sector, SectorFields, SectorType, SubchannelSelection};
pub use session::{Session, SessionTrackMut, SessionType};
pub use track::{Track, TrackFlags};

use std::fmt::{Display, Formatter};
use std::io;
use thiserror::Error;

// Sync: 12 bytes, header: 4 bytes, everything after is mode-dependent
// Audio: 588 stereo frames of signed 16-bit PCM
pub const BYTES_PER_SECTOR: usize = 2352;

/// Offset between LBA 0 and MSF 00:02:00
pub const MSF_OFFSET: i32 = 150;

/// Which key a failed lookup was performed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Number(i32),
    Address(i32),
    Track(i32),
}

impl Display for Lookup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(number) => write!(f, "number {number}"),
            Self::Address(address) => write!(f, "address {address}"),
            Self::Track(track) => write!(f, "containing track {track}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscError {
    #[error("No session with {0}")]
    SessionNotFound(Lookup),
    #[error("No track with {0}")]
    TrackNotFound(Lookup),
    #[error("No index {0} in track")]
    IndexNotFound(i32),
    #[error("Index {index} is out of range for a list of {len} entries")]
    IndexOutOfRange { index: i32, len: usize },
    #[error("Session {0} already exists")]
    SessionAlreadyExists(i32),
    #[error("Track {0} already exists")]
    TrackAlreadyExists(i32),
    #[error("An index already starts at track-relative address {0}")]
    IndexAlreadyExists(i32),
    #[error("Operation is not supported for {0} media")]
    InvalidMedium(MediumType),
    #[error("{0} is not set")]
    DataNotSet(&'static str),
    #[error("{0} is encoded in subchannel data and cannot be changed")]
    DataFixed(&'static str),
    #[error("Unsupported stored sector size for {sector_type} sector: {size} bytes")]
    UnsupportedSectorSize { sector_type: SectorType, size: usize },
    #[error("Address {0} is not covered by the layout")]
    AddressOutOfRange(i32),
    #[error("Invalid MCN '{0}'; expected 13 decimal digits")]
    InvalidMcn(String),
    #[error("Invalid ISRC '{0}'; expected 5 alphanumeric characters followed by 7 digits")]
    InvalidIsrc(String),
    #[error("Unsupported audio file: {0}")]
    UnsupportedAudioFormat(String),
    #[error("I/O error reading from disc image: {0}")]
    Io(#[source] io::Error),
    #[error("Unable to determine parent directory of CUE file '{0}'")]
    CueParentDir(String),
    #[error("Error parsing CUE file: {0}")]
    CueParse(String),
    #[error("Invalid/unsupported FILE line in CUE file: {0}")]
    CueInvalidFileLine(String),
    #[error("Invalid/unsupported TRACK line in CUE file: {0}")]
    CueInvalidTrackLine(String),
    #[error("Invalid/unsupported INDEX line in CUE file: {0}")]
    CueInvalidIndexLine(String),
    #[error("Invalid/unsupported PREGAP/POSTGAP line in CUE file: {0}")]
    CueInvalidGapLine(String),
    #[error("Error opening CUE file '{path}': {source}")]
    CueOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Error opening image data file '{path}': {source}")]
    DataFileOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Unrecognized disc image file extension: '{0}'")]
    UnsupportedImageFormat(String),
}

/// Coarse classification of [`DiscError`], e.g. for mapping onto SCSI sense codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    OutOfRange,
    AlreadyExists,
    InvalidMedium,
    DataNotSet,
    DataFixed,
    UnsupportedSectorSize,
    AddressOutOfRange,
    InvalidArgument,
    InvalidImage,
    Io,
}

impl DiscError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) | Self::TrackNotFound(_) | Self::IndexNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::IndexOutOfRange { .. } => ErrorKind::OutOfRange,
            Self::SessionAlreadyExists(_)
            | Self::TrackAlreadyExists(_)
            | Self::IndexAlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidMedium(_) => ErrorKind::InvalidMedium,
            Self::DataNotSet(_) => ErrorKind::DataNotSet,
            Self::DataFixed(_) => ErrorKind::DataFixed,
            Self::UnsupportedSectorSize { .. } => ErrorKind::UnsupportedSectorSize,
            Self::AddressOutOfRange(_) => ErrorKind::AddressOutOfRange,
            Self::InvalidMcn(_) | Self::InvalidIsrc(_) => ErrorKind::InvalidArgument,
            Self::UnsupportedAudioFormat(_)
            | Self::CueParentDir(_)
            | Self::CueParse(_)
            | Self::CueInvalidFileLine(_)
            | Self::CueInvalidTrackLine(_)
            | Self::CueInvalidIndexLine(_)
            | Self::CueInvalidGapLine(_)
            | Self::UnsupportedImageFormat(_) => ErrorKind::InvalidImage,
            Self::Io(_) | Self::CueOpen { .. } | Self::DataFileOpen { .. } => ErrorKind::Io,
        }
    }
}

pub type DiscResult<T> = Result<T, DiscError>;

/// Resolve a possibly-negative insertion index against a list of `len` entries.
///
/// Negative values count back from one past the end, so -1 appends. Out-of-range values are
/// clamped.
pub(crate) fn insertion_index(index: i32, len: usize) -> usize {
    let len_i = len as i64;
    let index = i64::from(index);
    let resolved = if index < 0 { index + len_i + 1 } else { index };
    resolved.clamp(0, len_i) as usize
}

/// Resolve a possibly-negative lookup index against a list of `len` entries; -1 is the last entry.
pub(crate) fn lookup_index(index: i32, len: usize) -> DiscResult<usize> {
    let len_i = len as i64;
    let resolved = if index < 0 { i64::from(index) + len_i } else { i64::from(index) };
    if (0..len_i).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(DiscError::IndexOutOfRange { index, len })
    }
}
