//! Code for loading single-track images with no descriptor file: cooked 2048-byte ISO images
//! and raw 2352-byte BIN images

use crate::fragment::{DataStream, MainDataFormat};
use crate::sector::SYNC_PATTERN;
use crate::{
    BYTES_PER_SECTOR, BinaryFragment, Disc, DiscError, DiscResult, Fragment, MSF_OFFSET,
    MediumType, SectorType, SessionType, Track,
};
use std::io::{Read, Seek, SeekFrom};

const COOKED_SECTOR_SIZE: usize = 2048;

// 90 minutes; anything larger is treated as a DVD image
const MAX_CD_SECTORS: i32 = 90 * 60 * 75;

/// Load a single-track image from `stream`.
///
/// Images whose first sector begins with the CD sync pattern and whose length is a multiple of
/// 2352 bytes are treated as raw sectors, with the mode taken from the first sector's header.
/// Anything else is read as 2048-byte Mode 1 sectors.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or contains no complete sectors.
pub fn load_iso<S: DataStream + 'static>(mut stream: S) -> DiscResult<Disc> {
    let len = stream.seek(SeekFrom::End(0)).map_err(DiscError::Io)?;

    let mut header = [0; 16];
    let raw = len % BYTES_PER_SECTOR as u64 == 0 && len >= header.len() as u64 && {
        stream.seek(SeekFrom::Start(0)).map_err(DiscError::Io)?;
        stream.read_exact(&mut header).map_err(DiscError::Io)?;
        header[..SYNC_PATTERN.len()] == SYNC_PATTERN
    };

    let (sector_type, sector_size) = if raw {
        let sector_type = match header[15] {
            0 => SectorType::Mode0,
            1 => SectorType::Mode1,
            _ => SectorType::Mode2Mixed,
        };
        (sector_type, BYTES_PER_SECTOR)
    } else {
        (SectorType::Mode1, COOKED_SECTOR_SIZE)
    };

    let mut binary = BinaryFragment::new(stream, sector_size, MainDataFormat::Data);
    let length = binary.sectors_in_stream()?;
    if length == 0 {
        return Err(DiscError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "image contains no complete sectors",
        )));
    }

    log::debug!("Loading {length} {sector_type} sectors of {sector_size} bytes each");

    let mut track = Track::new(sector_type);
    let mut disc = Disc::new();
    if length > MAX_CD_SECTORS && !raw {
        disc.set_medium_type(MediumType::Dvd);
        disc.set_start_sector(0);
        track.add_fragment(-1, Fragment::binary(length, binary));
    } else {
        disc.set_start_sector(-MSF_OFFSET);
        track.add_fragment(-1, Fragment::null(MSF_OFFSET));
        track.add_fragment(-1, Fragment::binary(length, binary));
        track.set_track_start(MSF_OFFSET);
    }
    disc.add_track_by_index(-1, track);

    if sector_type == SectorType::Mode2Mixed {
        disc.session_mut_by_index(0)?.set_session_type(SessionType::CdRomXa);
    }

    Ok(disc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cooked_image() {
        let mut image = vec![0; 20 * COOKED_SECTOR_SIZE];
        image[5 * COOKED_SECTOR_SIZE] = 0xAB;
        let mut disc = load_iso(Cursor::new(image)).unwrap();

        assert_eq!(disc.medium_type(), MediumType::Cd);
        assert_eq!(disc.start_sector(), -150);
        assert_eq!(disc.length(), 170);

        let track = disc.get_track_by_number(1).unwrap();
        assert_eq!(track.sector_type(), SectorType::Mode1);
        assert_eq!(track.track_start(), 150);

        let mut sector = disc.get_sector(5).unwrap();
        assert_eq!(sector.data()[0], 0xAB);
        assert_eq!(sector.header(), &[0x00, 0x02, 0x05, 0x01]);
        assert!(sector.verify_lec());
    }

    #[test]
    fn raw_image_mode_from_header() {
        let mut image = vec![0; 4 * BYTES_PER_SECTOR];
        for sector in image.chunks_exact_mut(BYTES_PER_SECTOR) {
            sector[..12].copy_from_slice(&SYNC_PATTERN);
            sector[15] = 2;
            // Form 2 subheader
            sector[18] = 0x20;
            sector[22] = 0x20;
        }
        let mut disc = load_iso(Cursor::new(image)).unwrap();

        assert_eq!(disc.get_track_by_number(1).unwrap().sector_type(), SectorType::Mode2Mixed);
        assert_eq!(disc.sessions()[0].session_type(), SessionType::CdRomXa);
        assert_eq!(disc.get_sector(0).unwrap().sector_type(), SectorType::Mode2Form2);
    }

    #[test]
    fn sync_pattern_requires_whole_raw_sectors() {
        let mut image = vec![0; 3 * COOKED_SECTOR_SIZE];
        image[..12].copy_from_slice(&SYNC_PATTERN);
        let disc = load_iso(Cursor::new(image)).unwrap();
        assert_eq!(disc.get_track_by_number(1).unwrap().length(), 150 + 3);
    }

    #[test]
    fn empty_image() {
        assert!(load_iso(Cursor::new(vec![0; 100])).is_err());
    }
}
