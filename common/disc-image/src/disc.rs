//! The disc: the root of the layout tree and the entry point for sector reads
//!
//! Every structural change recomputes the layout: sessions and tracks are renumbered and
//! repositioned from the disc's anchors, and the subchannel-locked MCN is re-derived.


use crate::sector::{MainChannelSelection, Sector, SubchannelSelection};
use crate::session::Session;
use crate::track::Track;
use crate::{DiscError, DiscResult, Lookup, insertion_index, lookup_index, subchannel};
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

// Lead-out plus the following lead-in between sessions
const FIRST_SESSION_LEADOUT: i32 = 11250;
const LATER_SESSION_LEADOUT: i32 = 6750;

pub const DVD_STRUCTURE_SIZE: usize = 2048;
pub const DVD_STRUCTURE_PHYSICAL: u16 = 0x0000;
pub const DVD_STRUCTURE_COPYRIGHT: u16 = 0x0001;
pub const DVD_STRUCTURE_MANUFACTURING: u16 = 0x0004;

// Physical sector number of the first DVD data sector
const DVD_DATA_START_PSN: u32 = 0x030000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MediumType {
    #[default]
    Cd,
    Dvd,
    Bd,
    HdDvd,
}

impl MediumType {
    fn has_disc_structures(self) -> bool {
        matches!(self, Self::Dvd | Self::Bd)
    }
}

impl Display for MediumType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cd => write!(f, "CD"),
            Self::Dvd => write!(f, "DVD"),
            Self::Bd => write!(f, "BD"),
            Self::HdDvd => write!(f, "HD DVD"),
        }
    }
}

/// Data position measurement: rotation angle samples used by some copy protection checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpmData {
    pub start: i32,
    pub resolution: u32,
    /// Cumulative angle at the end of each block, in 1/256 rotations
    pub entries: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpmSample {
    /// Rotations since the start of the DPM data
    pub angle: f64,
    /// Degrees per sector
    pub density: f64,
}

#[derive(Debug)]
pub struct Disc {
    sessions: Vec<Session>,
    medium_type: MediumType,
    mcn: Option<String>,
    mcn_locked: bool,
    start_sector: i32,
    first_session_number: i32,
    first_track_number: i32,
    length: i32,
    disc_structures: HashMap<(u8, u16), Vec<u8>>,
    dpm: Option<DpmData>,
    filenames: Vec<PathBuf>,
}

impl Default for Disc {
    fn default() -> Self {
        Self::new()
    }
}

impl Disc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: vec![],
            medium_type: MediumType::default(),
            mcn: None,
            mcn_locked: false,
            start_sector: 0,
            first_session_number: 1,
            first_track_number: 1,
            length: 0,
            disc_structures: HashMap::new(),
            dpm: None,
            filenames: vec![],
        }
    }

    #[must_use]
    pub fn medium_type(&self) -> MediumType {
        self.medium_type
    }

    pub fn set_medium_type(&mut self, medium_type: MediumType) {
        self.medium_type = medium_type;
    }

    #[must_use]
    pub fn start_sector(&self) -> i32 {
        self.start_sector
    }

    /// Address of the first sector of the first session; -150 for CDs whose first pregap is
    /// part of the layout.
    pub fn set_start_sector(&mut self, start_sector: i32) {
        self.start_sector = start_sector;
        self.commit();
    }

    #[must_use]
    pub fn first_session_number(&self) -> i32 {
        self.first_session_number
    }

    pub fn set_first_session_number(&mut self, number: i32) {
        self.first_session_number = number;
        self.commit();
    }

    #[must_use]
    pub fn first_track_number(&self) -> i32 {
        self.first_track_number
    }

    pub fn set_first_track_number(&mut self, number: i32) {
        self.first_track_number = number;
        self.commit();
    }

    /// Total length in sectors, lead-outs included.
    #[must_use]
    pub fn length(&self) -> i32 {
        self.length
    }

    #[must_use]
    pub fn layout_contains_address(&self, address: i32) -> bool {
        (self.start_sector..self.start_sector + self.length).contains(&address)
    }

    #[must_use]
    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    pub fn set_filenames(&mut self, filenames: Vec<PathBuf>) {
        self.filenames = filenames;
    }

    #[must_use]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    #[must_use]
    pub fn number_of_tracks(&self) -> usize {
        self.sessions.iter().map(|session| session.tracks().len()).sum()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.sessions.iter().flat_map(Session::tracks)
    }

    /// Insert a session; negative indices count back from the end, so -1 appends.
    pub fn add_session_by_index(&mut self, index: i32, session: Session) {
        let index = insertion_index(index, self.sessions.len());
        self.sessions.insert(index, session);
        self.commit();
    }

    /// Add a session with the given number. Numbers past the last session append and numbers
    /// before the first session insert at the front.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::SessionAlreadyExists`] if a session with the number exists.
    pub fn add_session_by_number(&mut self, number: i32, session: Session) -> DiscResult<()> {
        if self.session_position_by_number(number).is_ok() {
            return Err(DiscError::SessionAlreadyExists(number));
        }

        let index = if number < self.first_session_number { 0 } else { self.sessions.len() };
        self.sessions.insert(index, session);
        self.commit();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if there is no session at the given index.
    pub fn remove_session_by_index(&mut self, index: i32) -> DiscResult<Session> {
        let index = lookup_index(index, self.sessions.len())?;
        let mut session = self.sessions.remove(index);
        session.detach();
        self.commit();
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if there is no session with the given number.
    pub fn remove_session_by_number(&mut self, number: i32) -> DiscResult<Session> {
        let index = self.session_position_by_number(number)?;
        let mut session = self.sessions.remove(index);
        session.detach();
        self.commit();
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if there is no session at the given index.
    pub fn get_session_by_index(&self, index: i32) -> DiscResult<&Session> {
        let index = lookup_index(index, self.sessions.len())?;
        Ok(&self.sessions[index])
    }

    /// # Errors
    ///
    /// Returns an error if there is no session with the given number.
    pub fn get_session_by_number(&self, number: i32) -> DiscResult<&Session> {
        let index = self.session_position_by_number(number)?;
        Ok(&self.sessions[index])
    }

    /// Session whose layout, lead-out included, contains the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if no session contains the address.
    pub fn get_session_by_address(&self, address: i32) -> DiscResult<&Session> {
        self.sessions
            .iter()
            .find(|session| session.contains_address(address))
            .ok_or(DiscError::SessionNotFound(Lookup::Address(address)))
    }

    /// Session containing the track with the given number.
    ///
    /// # Errors
    ///
    /// Returns an error if no session contains the track.
    pub fn get_session_by_track(&self, track_number: i32) -> DiscResult<&Session> {
        self.sessions
            .iter()
            .find(|session| session.contains_track(track_number))
            .ok_or(DiscError::SessionNotFound(Lookup::Track(track_number)))
    }

    /// Editable handle to a session; the disc layout is recomputed when it is dropped, and the
    /// session is removed if the edit left it without tracks.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session at the given index.
    pub fn session_mut_by_index(&mut self, index: i32) -> DiscResult<SessionMut<'_>> {
        let index = lookup_index(index, self.sessions.len())?;
        Ok(SessionMut::new(self, index))
    }

    /// # Errors
    ///
    /// Returns an error if there is no session with the given number.
    pub fn session_mut_by_number(&mut self, number: i32) -> DiscResult<SessionMut<'_>> {
        let index = self.session_position_by_number(number)?;
        Ok(SessionMut::new(self, index))
    }

    fn session_position_by_number(&self, number: i32) -> DiscResult<usize> {
        self.sessions
            .iter()
            .position(|session| session.number() == number)
            .ok_or(DiscError::SessionNotFound(Lookup::Number(number)))
    }

    /// Insert a track at a disc-wide position; negative indices count back from the end, so
    /// -1 appends to the last session. A session is created if the disc has none.
    pub fn add_track_by_index(&mut self, index: i32, track: Track) {
        if self.sessions.is_empty() {
            self.sessions.push(Session::new());
        }

        let mut position = insertion_index(index, self.number_of_tracks());
        let last = self.sessions.len() - 1;
        for (i, session) in self.sessions.iter_mut().enumerate() {
            let len = session.tracks().len();
            if position <= len || i == last {
                session.add_track_by_index(position as i32, track);
                break;
            }
            position -= len;
        }

        self.commit();
    }

    /// Add a track with the given number. Numbers past the last track append to the last
    /// session and numbers before the first track insert at the front of the first session.
    /// A session is created if the disc has none.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::TrackAlreadyExists`] if a track with the number exists.
    pub fn add_track_by_number(&mut self, number: i32, track: Track) -> DiscResult<()> {
        if self.sessions.is_empty() {
            self.sessions.push(Session::new());
            self.commit();
        }

        if self.sessions.iter().any(|session| session.contains_track(number)) {
            return Err(DiscError::TrackAlreadyExists(number));
        }

        let session = if number < self.first_track_number {
            &mut self.sessions[0]
        } else {
            // The last session whose numbering starts at or before the new track; always the
            // last session once numbering is contiguous
            let index = self
                .sessions
                .iter()
                .rposition(|session| session.first_track_number() <= number)
                .unwrap_or(0);
            &mut self.sessions[index]
        };
        session.add_track_by_number(number, track)?;

        self.commit();
        Ok(())
    }

    /// Remove a track by disc-wide index. Its session is removed if it becomes empty.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no track at the given index.
    pub fn remove_track_by_index(&mut self, index: i32) -> DiscResult<Track> {
        let (session_index, track_index) = self.track_position_by_index(index)?;
        Ok(self.remove_track_at(session_index, track_index))
    }

    /// Remove a track by number. Its session is removed if it becomes empty.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn remove_track_by_number(&mut self, number: i32) -> DiscResult<Track> {
        let (session_index, track_index) = self.track_position_by_number(number)?;
        Ok(self.remove_track_at(session_index, track_index))
    }

    fn remove_track_at(&mut self, session_index: usize, track_index: usize) -> Track {
        let session = &mut self.sessions[session_index];
        let track = session.take_track(track_index);
        if session.tracks().is_empty() {
            self.sessions.remove(session_index);
        }

        self.commit();
        track
    }

    /// # Errors
    ///
    /// Returns an error if there is no track at the given disc-wide index.
    pub fn get_track_by_index(&self, index: i32) -> DiscResult<&Track> {
        let (session_index, track_index) = self.track_position_by_index(index)?;
        Ok(&self.sessions[session_index].tracks()[track_index])
    }

    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn get_track_by_number(&self, number: i32) -> DiscResult<&Track> {
        let (session_index, track_index) = self.track_position_by_number(number)?;
        Ok(&self.sessions[session_index].tracks()[track_index])
    }

    /// Track containing the given absolute address.
    ///
    /// # Errors
    ///
    /// Returns an error if no track contains the address, including lead-out addresses.
    pub fn get_track_by_address(&self, address: i32) -> DiscResult<&Track> {
        let (session_index, track_index) = self.track_position_by_address(address)?;
        Ok(&self.sessions[session_index].tracks()[track_index])
    }

    /// Editable handle to a track; the disc layout is recomputed when it is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no track at the given disc-wide index.
    pub fn track_mut_by_index(&mut self, index: i32) -> DiscResult<TrackMut<'_>> {
        let (session_index, track_index) = self.track_position_by_index(index)?;
        Ok(TrackMut { disc: self, session_index, track_index })
    }

    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn track_mut_by_number(&mut self, number: i32) -> DiscResult<TrackMut<'_>> {
        let (session_index, track_index) = self.track_position_by_number(number)?;
        Ok(TrackMut { disc: self, session_index, track_index })
    }

    fn track_position_by_index(&self, index: i32) -> DiscResult<(usize, usize)> {
        let mut position = lookup_index(index, self.number_of_tracks())?;
        for (session_index, session) in self.sessions.iter().enumerate() {
            let len = session.tracks().len();
            if position < len {
                return Ok((session_index, position));
            }
            position -= len;
        }

        Err(DiscError::IndexOutOfRange { index, len: self.number_of_tracks() })
    }

    fn track_position_by_number(&self, number: i32) -> DiscResult<(usize, usize)> {
        for (session_index, session) in self.sessions.iter().enumerate() {
            if session.contains_track(number) {
                return Ok((session_index, session.track_position_by_number(number)?));
            }
        }

        Err(DiscError::TrackNotFound(Lookup::Number(number)))
    }

    fn track_position_by_address(&self, address: i32) -> DiscResult<(usize, usize)> {
        for (session_index, session) in self.sessions.iter().enumerate() {
            if session.contains_address(address) {
                return Ok((session_index, session.track_position_by_address(address)?));
            }
        }

        Err(DiscError::TrackNotFound(Lookup::Address(address)))
    }

    /// # Errors
    ///
    /// Returns [`DiscError::DataNotSet`] if the disc has no MCN.
    pub fn mcn(&self) -> DiscResult<&str> {
        self.mcn.as_deref().ok_or(DiscError::DataNotSet("MCN"))
    }

    /// Whether the MCN comes from stored subchannel data and is therefore read-only.
    #[must_use]
    pub fn mcn_locked(&self) -> bool {
        self.mcn_locked
    }

    /// # Errors
    ///
    /// Returns [`DiscError::DataFixed`] if the MCN is encoded in stored subchannel data, or
    /// [`DiscError::InvalidMcn`] if the string is not 13 digits.
    pub fn set_mcn(&mut self, mcn: Option<&str>) -> DiscResult<()> {
        if self.mcn_locked {
            return Err(DiscError::DataFixed("MCN"));
        }

        if let Some(mcn) = mcn {
            if !subchannel::is_valid_mcn(mcn) {
                return Err(DiscError::InvalidMcn(mcn.into()));
            }
        }

        self.mcn = mcn.map(String::from);
        Ok(())
    }

    /// Store a disc structure as returned by READ DISC STRUCTURE.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::InvalidMedium`] unless the medium is DVD or BD.
    pub fn set_disc_structure(
        &mut self,
        layer: u8,
        structure: u16,
        data: Vec<u8>,
    ) -> DiscResult<()> {
        if !self.medium_type.has_disc_structures() {
            return Err(DiscError::InvalidMedium(self.medium_type));
        }

        self.disc_structures.insert((layer, structure), data);
        Ok(())
    }

    /// Disc structure for the given layer and format code. On DVD media, the physical format,
    /// copyright and manufacturing structures are generated if none was set.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::InvalidMedium`] unless the medium is DVD or BD, and
    /// [`DiscError::DataNotSet`] if the structure was not set and cannot be generated.
    pub fn get_disc_structure(&self, layer: u8, structure: u16) -> DiscResult<Vec<u8>> {
        if !self.medium_type.has_disc_structures() {
            return Err(DiscError::InvalidMedium(self.medium_type));
        }

        if let Some(data) = self.disc_structures.get(&(layer, structure)) {
            return Ok(data.clone());
        }

        match (self.medium_type, structure) {
            (MediumType::Dvd, DVD_STRUCTURE_PHYSICAL) => Ok(self.dvd_physical_format()),
            (MediumType::Dvd, DVD_STRUCTURE_COPYRIGHT) => Ok(vec![0; 4]),
            (MediumType::Dvd, DVD_STRUCTURE_MANUFACTURING) => Ok(vec![0; DVD_STRUCTURE_SIZE]),
            _ => Err(DiscError::DataNotSet("disc structure")),
        }
    }

    fn dvd_physical_format(&self) -> Vec<u8> {
        let mut data = vec![0; DVD_STRUCTURE_SIZE];
        // DVD-ROM, part version 1
        data[0] = 0x01;
        // 120 mm, 10.08 Mbps maximum rate
        data[1] = 0x02;
        // Single layer, parallel track path, embossed
        data[2] = 0x01;
        data[3] = 0x00;

        let end = DVD_DATA_START_PSN + (self.length.max(1) as u32) - 1;
        BigEndian::write_u32(&mut data[4..8], DVD_DATA_START_PSN);
        BigEndian::write_u32(&mut data[8..12], end);
        data
    }

    #[must_use]
    pub fn dpm_data(&self) -> Option<&DpmData> {
        self.dpm.as_ref()
    }

    pub fn set_dpm_data(&mut self, start: i32, resolution: u32, entries: Vec<u32>) {
        self.dpm = Some(DpmData { start, resolution, entries });
    }

    /// Interpolated rotation angle and density at the given address.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::DataNotSet`] if the disc has no DPM data and
    /// [`DiscError::AddressOutOfRange`] if the address is not covered by it.
    pub fn get_dpm_data_for_sector(&self, address: i32) -> DiscResult<DpmSample> {
        let dpm = self.dpm.as_ref().ok_or(DiscError::DataNotSet("DPM data"))?;

        let relative = i64::from(address) - i64::from(dpm.start);
        let resolution = i64::from(dpm.resolution);
        if relative < 0 || resolution == 0 || relative >= resolution * dpm.entries.len() as i64 {
            return Err(DiscError::AddressOutOfRange(address));
        }

        let block = (relative / resolution) as usize;
        let block_start = if block == 0 { 0.0 } else { f64::from(dpm.entries[block - 1]) };
        let block_end = f64::from(dpm.entries[block]);

        let rate = (block_end - block_start) / 256.0 / resolution as f64;
        let offset = (relative - block as i64 * resolution) as f64;

        Ok(DpmSample { angle: block_start / 256.0 + offset * rate, density: rate * 360.0 })
    }

    /// Read the sector at the given absolute address.
    ///
    /// # Errors
    ///
    /// Returns an error if no track contains the address or the backing data cannot be read.
    pub fn get_sector(&mut self, address: i32) -> DiscResult<Sector> {
        let (session_index, track_index) = self.track_position_by_address(address)?;
        let mcn = if self.mcn_locked { None } else { self.mcn.clone() };

        let track = &mut self.sessions[session_index].tracks_mut()[track_index];
        let relative_address = address - track.start_sector();
        track.sector_at(relative_address, mcn)
    }

    /// Read the sector at the given address and extract the selected fields, as for an MMC
    /// READ CD command.
    ///
    /// # Errors
    ///
    /// See [`Self::get_sector`].
    pub fn read_sector(
        &mut self,
        address: i32,
        main: MainChannelSelection,
        sub: SubchannelSelection,
    ) -> DiscResult<Vec<u8>> {
        let mut sector = self.get_sector(address)?;
        Ok(sector.extract(main, sub))
    }

    /// Recompute the layout top-down from the disc anchors, then refresh the MCN lock.
    fn commit(&mut self) {
        let session_count = self.sessions.len();
        let mut start_sector = self.start_sector;
        let mut track_number = self.first_track_number;

        for (i, session) in self.sessions.iter_mut().enumerate() {
            let leadout = if i + 1 == session_count {
                0
            } else if i == 0 {
                FIRST_SESSION_LEADOUT
            } else {
                LATER_SESSION_LEADOUT
            };
            session.set_layout(
                self.first_session_number + i as i32,
                track_number,
                start_sector,
                leadout,
            );

            start_sector += session.length();
            track_number += session.tracks().len() as i32;
        }

        self.length = start_sector - self.start_sector;

        log::debug!(
            "Disc layout: {} sessions, {} tracks, {} sectors starting at {}",
            self.sessions.len(),
            self.number_of_tracks(),
            self.length,
            self.start_sector
        );

        self.update_mcn_lock();
    }

    fn update_mcn_lock(&mut self) {
        let was_locked = self.mcn_locked;
        self.mcn_locked =
            self.sessions.iter().flat_map(Session::tracks).any(Track::has_subchannel);
        if !self.mcn_locked {
            if was_locked {
                self.mcn = None;
            }
            return;
        }

        let Some(track) = self
            .sessions
            .iter_mut()
            .flat_map(|session| session.tracks_mut().iter_mut())
            .find(|track| track.has_subchannel())
        else {
            return;
        };

        self.mcn = match track.scan_stored_q(subchannel::Q_MODE_MCN) {
            Ok(q) => q.and_then(|q| subchannel::decode_mcn(&q)),
            Err(err) => {
                log::warn!("Unable to read MCN from subchannel: {err}");
                None
            }
        };
    }
}

/// Mutable access to one session of a [`Disc`]. Dropping the handle recomputes the disc layout
/// and removes the session if the edit removed all of its tracks.
#[derive(Debug)]
pub struct SessionMut<'a> {
    disc: &'a mut Disc,
    index: usize,
    had_tracks: bool,
}

impl<'a> SessionMut<'a> {
    fn new(disc: &'a mut Disc, index: usize) -> Self {
        let had_tracks = !disc.sessions[index].tracks().is_empty();
        Self { disc, index, had_tracks }
    }
}

impl Deref for SessionMut<'_> {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.disc.sessions[self.index]
    }
}

impl DerefMut for SessionMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.disc.sessions[self.index]
    }
}

impl Drop for SessionMut<'_> {
    fn drop(&mut self) {
        if self.had_tracks && self.disc.sessions[self.index].tracks().is_empty() {
            self.disc.sessions.remove(self.index);
        }
        self.disc.commit();
    }
}

/// Mutable access to one track of a [`Disc`]. Dropping the handle recomputes the disc layout.
#[derive(Debug)]
pub struct TrackMut<'a> {
    disc: &'a mut Disc,
    session_index: usize,
    track_index: usize,
}

impl Deref for TrackMut<'_> {
    type Target = Track;

    fn deref(&self) -> &Self::Target {
        &self.disc.sessions[self.session_index].tracks()[self.track_index]
    }
}

impl DerefMut for TrackMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.disc.sessions[self.session_index].tracks_mut()[self.track_index]
    }
}

impl Drop for TrackMut<'_> {
    fn drop(&mut self) {
        self.disc.commit();
    }
}
