//! A session: an ordered run of tracks followed by a lead-out

use crate::cdtext::{self, CdTextSource, Language};
use crate::track::Track;
use crate::{DiscError, DiscResult, Lookup, insertion_index, lookup_index};
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SessionType {
    CdDa,
    #[default]
    CdRom,
    CdRomXa,
    CdI,
}

impl SessionType {
    /// Disc type byte reported in the A0 point of a full TOC.
    #[must_use]
    pub fn to_toc_byte(self) -> u8 {
        match self {
            Self::CdDa | Self::CdRom => 0x00,
            Self::CdI => 0x10,
            Self::CdRomXa => 0x20,
        }
    }
}

impl Display for SessionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CdDa => write!(f, "CD-DA"),
            Self::CdRom => write!(f, "CD-ROM"),
            Self::CdRomXa => write!(f, "CD-ROM XA"),
            Self::CdI => write!(f, "CD-I"),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    number: i32,
    first_track_number: i32,
    start_sector: i32,
    length: i32,
    leadout_length: i32,
    explicit_leadout: Option<i32>,
    automatic_leadout: i32,
    session_type: SessionType,
    tracks: Vec<Track>,
    languages: Vec<Language>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            number: 1,
            first_track_number: 1,
            start_sector: 0,
            length: 0,
            leadout_length: 0,
            explicit_leadout: None,
            automatic_leadout: 0,
            session_type: SessionType::default(),
            tracks: vec![],
            languages: vec![],
        }
    }

    #[must_use]
    pub fn number(&self) -> i32 {
        self.number
    }

    #[must_use]
    pub fn first_track_number(&self) -> i32 {
        self.first_track_number
    }

    /// Number of the last track; one less than the first track number if the session is empty.
    #[must_use]
    pub fn last_track_number(&self) -> i32 {
        self.first_track_number + self.tracks.len() as i32 - 1
    }

    #[must_use]
    pub fn start_sector(&self) -> i32 {
        self.start_sector
    }

    /// Length in sectors, lead-out included.
    #[must_use]
    pub fn length(&self) -> i32 {
        self.length
    }

    #[must_use]
    pub fn leadout_length(&self) -> i32 {
        self.leadout_length
    }

    /// Override the lead-out length derived from the session's position on the disc. `None`
    /// restores the derived length, which is 0 for a session outside of a disc.
    pub fn set_leadout_length(&mut self, length: Option<i32>) {
        self.explicit_leadout = length.map(|length| length.max(0));
        self.leadout_length = self.explicit_leadout.unwrap_or(self.automatic_leadout);
        self.commit();
    }

    /// Absolute address of the first lead-out sector.
    #[must_use]
    pub fn leadout_start(&self) -> i32 {
        self.start_sector + self.length - self.leadout_length
    }

    #[must_use]
    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn set_session_type(&mut self, session_type: SessionType) {
        self.session_type = session_type;
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    #[must_use]
    pub fn contains_address(&self, address: i32) -> bool {
        (self.start_sector..self.start_sector + self.length).contains(&address)
    }

    #[must_use]
    pub fn contains_track(&self, number: i32) -> bool {
        (self.first_track_number..=self.last_track_number()).contains(&number)
    }

    /// Insert a track; negative indices count back from the end, so -1 appends.
    pub fn add_track_by_index(&mut self, index: i32, track: Track) {
        let index = insertion_index(index, self.tracks.len());
        self.tracks.insert(index, track);
        self.commit();
    }

    /// Add a track with the given number. Numbers past the last track append and numbers
    /// before the first track insert at the front; the track is renumbered to fit.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::TrackAlreadyExists`] if a track with the number exists.
    pub fn add_track_by_number(&mut self, number: i32, track: Track) -> DiscResult<()> {
        let index = self.track_insertion_index(number)?;
        self.tracks.insert(index, track);
        self.commit();
        Ok(())
    }

    pub(crate) fn track_insertion_index(&self, number: i32) -> DiscResult<usize> {
        if self.contains_track(number) {
            return Err(DiscError::TrackAlreadyExists(number));
        }

        Ok(if number < self.first_track_number { 0 } else { self.tracks.len() })
    }

    /// # Errors
    ///
    /// Returns an error if there is no track at the given index.
    pub fn remove_track_by_index(&mut self, index: i32) -> DiscResult<Track> {
        let index = lookup_index(index, self.tracks.len())?;
        Ok(self.take_track(index))
    }

    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn remove_track_by_number(&mut self, number: i32) -> DiscResult<Track> {
        let index = self.track_position_by_number(number)?;
        Ok(self.take_track(index))
    }

    pub(crate) fn take_track(&mut self, index: usize) -> Track {
        let track = self.tracks.remove(index);
        self.commit();
        track
    }

    /// # Errors
    ///
    /// Returns an error if there is no track at the given index.
    pub fn get_track_by_index(&self, index: i32) -> DiscResult<&Track> {
        let index = lookup_index(index, self.tracks.len())?;
        Ok(&self.tracks[index])
    }

    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn get_track_by_number(&self, number: i32) -> DiscResult<&Track> {
        let index = self.track_position_by_number(number)?;
        Ok(&self.tracks[index])
    }

    /// Track containing the given absolute address.
    ///
    /// # Errors
    ///
    /// Returns an error if no track contains the address, including addresses in the lead-out.
    pub fn get_track_by_address(&self, address: i32) -> DiscResult<&Track> {
        let index = self.track_position_by_address(address)?;
        Ok(&self.tracks[index])
    }

    /// Editable handle to a track; the session layout is recomputed when it is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no track at the given index.
    pub fn track_mut_by_index(&mut self, index: i32) -> DiscResult<SessionTrackMut<'_>> {
        let index = lookup_index(index, self.tracks.len())?;
        Ok(SessionTrackMut { session: self, index })
    }

    /// # Errors
    ///
    /// Returns an error if there is no track with the given number.
    pub fn track_mut_by_number(&mut self, number: i32) -> DiscResult<SessionTrackMut<'_>> {
        let index = self.track_position_by_number(number)?;
        Ok(SessionTrackMut { session: self, index })
    }

    pub(crate) fn track_position_by_number(&self, number: i32) -> DiscResult<usize> {
        if !self.contains_track(number) {
            return Err(DiscError::TrackNotFound(Lookup::Number(number)));
        }
        Ok((number - self.first_track_number) as usize)
    }

    pub(crate) fn track_position_by_address(&self, address: i32) -> DiscResult<usize> {
        self.tracks
            .iter()
            .position(|track| track.contains_address(address))
            .ok_or(DiscError::TrackNotFound(Lookup::Address(address)))
    }

    #[must_use]
    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    #[must_use]
    pub fn language(&self, code: u8) -> Option<&Language> {
        self.languages.iter().find(|language| language.code() == code)
    }

    /// Add a CD-TEXT language block, replacing any existing block with the same code.
    pub fn set_language(&mut self, language: Language) {
        cdtext::replace_language(&mut self.languages, language);
    }

    pub fn remove_language(&mut self, code: u8) -> Option<Language> {
        let position = self.languages.iter().position(|language| language.code() == code)?;
        Some(self.languages.remove(position))
    }

    /// Raw CD-TEXT packs for this session and its tracks, size information included.
    #[must_use]
    pub fn encode_cdtext(&self) -> Vec<u8> {
        let source = CdTextSource {
            first_track_number: self.first_track_number.clamp(1, 99) as u8,
            session: &self.languages,
            tracks: self.tracks.iter().map(Track::languages).collect(),
        };
        cdtext::encode(&source)
    }

    /// Parse raw CD-TEXT packs into languages of this session and its tracks. Packs for tracks
    /// outside the session are ignored.
    pub fn decode_cdtext(&mut self, bytes: &[u8]) {
        for (track_number, languages) in cdtext::decode(bytes) {
            if track_number == 0 {
                for language in languages {
                    self.set_language(language);
                }
                continue;
            }

            match self.track_position_by_number(i32::from(track_number)) {
                Ok(index) => {
                    for language in languages {
                        self.tracks[index].set_language(language);
                    }
                }
                Err(_) => {
                    log::warn!(
                        "Ignoring CD-TEXT for track {track_number}, not in session {}",
                        self.number
                    );
                }
            }
        }
    }

    /// Assign this session's position on the disc and lay out its tracks from it.
    pub(crate) fn set_layout(
        &mut self,
        number: i32,
        first_track_number: i32,
        start_sector: i32,
        automatic_leadout: i32,
    ) {
        self.number = number;
        self.first_track_number = first_track_number;
        self.start_sector = start_sector;
        self.automatic_leadout = automatic_leadout;
        self.leadout_length = self.explicit_leadout.unwrap_or(automatic_leadout);
        self.commit();
    }

    /// Forget the lead-out derived from a disc after the session is removed from it.
    pub(crate) fn detach(&mut self) {
        self.automatic_leadout = 0;
        self.leadout_length = self.explicit_leadout.unwrap_or(0);
        self.commit();
    }

    pub(crate) fn commit(&mut self) {
        let mut start_sector = self.start_sector;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.set_layout(self.first_track_number + i as i32, start_sector);
            start_sector += track.length();
        }

        self.length = start_sector - self.start_sector + self.leadout_length;
    }
}

/// Mutable access to one track of a [`Session`]. Dropping the handle recomputes the session
/// layout.
#[derive(Debug)]
pub struct SessionTrackMut<'a> {
    session: &'a mut Session,
    index: usize,
}

impl Deref for SessionTrackMut<'_> {
    type Target = Track;

    fn deref(&self) -> &Self::Target {
        &self.session.tracks[self.index]
    }
}

impl DerefMut for SessionTrackMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session.tracks[self.index]
    }
}

impl Drop for SessionTrackMut<'_> {
    fn drop(&mut self) {
        self.session.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdtext::PackType;
    use crate::fragment::Fragment;
    use crate::sector::SectorType;

    fn track(length: i32) -> Track {
        let mut track = Track::new(SectorType::Audio);
        track.add_fragment(-1, Fragment::null(length));
        track
    }

    #[test]
    fn tracks_are_numbered_and_placed() {
        let mut session = Session::new();
        session.add_track_by_number(1, track(100)).unwrap();
        session.add_track_by_number(2, track(200)).unwrap();
        session.add_track_by_index(0, track(50));

        assert_eq!(session.length(), 350);
        let starts: Vec<_> =
            session.tracks().iter().map(|t| (t.number(), t.start_sector())).collect();
        assert_eq!(starts, vec![(1, 0), (2, 50), (3, 150)]);
        assert_eq!(session.get_track_by_address(150).unwrap().number(), 3);
        assert!(matches!(
            session.get_track_by_address(350),
            Err(DiscError::TrackNotFound(Lookup::Address(350)))
        ));
    }

    #[test]
    fn add_track_by_number_clamps() {
        let mut session = Session::new();
        session.add_track_by_number(5, track(10)).unwrap();
        assert_eq!(session.get_track_by_index(0).unwrap().number(), 1);

        session.add_track_by_number(99, track(20)).unwrap();
        assert_eq!(session.get_track_by_number(2).unwrap().length(), 20);

        session.add_track_by_number(-3, track(30)).unwrap();
        assert_eq!(session.get_track_by_number(1).unwrap().length(), 30);

        assert!(matches!(
            session.add_track_by_number(2, track(40)),
            Err(DiscError::TrackAlreadyExists(2))
        ));
        assert_eq!(session.tracks().len(), 3);
    }

    #[test]
    fn leadout_is_included_in_length() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(100));
        session.set_leadout_length(Some(6750));
        assert_eq!(session.length(), 6850);
        assert_eq!(session.leadout_start(), 100);

        // Explicit lead-out survives relayout
        session.set_layout(2, 5, 1000, 11250);
        assert_eq!(session.leadout_length(), 6750);
        assert_eq!(session.get_track_by_index(0).unwrap().number(), 5);
        assert_eq!(session.get_track_by_index(0).unwrap().start_sector(), 1000);
    }

    #[test]
    fn clearing_leadout_outside_disc() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(100));
        session.set_leadout_length(Some(6750));
        assert_eq!(session.length(), 6850);

        session.set_leadout_length(None);
        assert_eq!(session.leadout_length(), 0);
        assert_eq!(session.length(), 100);
        assert_eq!(session.leadout_start(), 100);
    }

    #[test]
    fn clearing_leadout_restores_derived_length() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(100));
        session.set_layout(1, 1, 0, 11250);
        session.set_leadout_length(Some(6750));
        assert_eq!(session.leadout_length(), 6750);

        session.set_leadout_length(None);
        assert_eq!(session.leadout_length(), 11250);
        assert_eq!(session.length(), 11350);

        session.detach();
        assert_eq!(session.leadout_length(), 0);
        assert_eq!(session.length(), 100);
    }

    #[test]
    fn track_handle_recommits() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(100));
        session.add_track_by_index(-1, track(100));

        {
            let mut first = session.track_mut_by_number(1).unwrap();
            first.add_fragment(-1, Fragment::null(50));
        }

        assert_eq!(session.length(), 250);
        assert_eq!(session.get_track_by_number(2).unwrap().start_sector(), 150);
    }

    #[test]
    fn remove_tracks() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(10));
        session.add_track_by_index(-1, track(20));
        session.add_track_by_index(-1, track(30));

        let removed = session.remove_track_by_number(2).unwrap();
        assert_eq!(removed.length(), 20);
        assert_eq!(session.get_track_by_number(2).unwrap().length(), 30);
        assert_eq!(session.length(), 40);

        session.remove_track_by_index(-1).unwrap();
        assert!(session.remove_track_by_number(2).is_err());
        assert_eq!(session.last_track_number(), 1);
    }

    #[test]
    fn cdtext_round_trip() {
        let mut session = Session::new();
        session.add_track_by_index(-1, track(10));
        session.add_track_by_index(-1, track(10));

        let mut album = Language::new(0x09);
        album.set_text(PackType::Title, "Album");
        session.set_language(album);

        let mut song = Language::new(0x09);
        song.set_text(PackType::Title, "Song");
        session.track_mut_by_number(2).unwrap().set_language(song);

        let packs = session.encode_cdtext();

        let mut decoded = Session::new();
        decoded.add_track_by_index(-1, track(10));
        decoded.add_track_by_index(-1, track(10));
        decoded.decode_cdtext(&packs);

        let title = |language: Option<&Language>| language.and_then(|l| l.text(PackType::Title));
        assert_eq!(title(decoded.language(0x09)).as_deref(), Some("Album"));
        assert!(decoded.get_track_by_number(1).unwrap().languages().is_empty());
        assert_eq!(
            title(decoded.get_track_by_number(2).unwrap().language(0x09)).as_deref(),
            Some("Song")
        );
    }
}
