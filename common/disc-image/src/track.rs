//! A track: an ordered run of fragments sharing one sector type, plus index points and
//! per-track metadata

use crate::cdtext::Language;
use crate::fragment::Fragment;
use crate::sector::{
    MainChannelSelection, Sector, SectorType, SubchannelContext, SubchannelSelection,
};
use crate::subchannel::{self, CHANNEL_SIZE};
use crate::{DiscError, DiscResult, insertion_index, lookup_index};

/// Sectors scanned for an ISRC or MCN block when they are encoded in stored subchannel data.
pub(crate) const Q_SCAN_SECTORS: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackFlags {
    pub four_channel: bool,
    pub copy_permitted: bool,
    pub pre_emphasis: bool,
}

#[derive(Debug)]
pub struct Track {
    number: i32,
    start_sector: i32,
    length: i32,
    sector_type: SectorType,
    track_start: i32,
    // Index 2 and up, relative to index 1 and sorted
    indices: Vec<i32>,
    fragments: Vec<Fragment>,
    isrc: Option<String>,
    isrc_locked: bool,
    flags: TrackFlags,
    languages: Vec<Language>,
}

impl Track {
    #[must_use]
    pub fn new(sector_type: SectorType) -> Self {
        Self {
            number: 1,
            start_sector: 0,
            length: 0,
            sector_type,
            track_start: 0,
            indices: vec![],
            fragments: vec![],
            isrc: None,
            isrc_locked: false,
            flags: TrackFlags::default(),
            languages: vec![],
        }
    }

    #[must_use]
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Absolute address of the first sector, including any pregap.
    #[must_use]
    pub fn start_sector(&self) -> i32 {
        self.start_sector
    }

    #[must_use]
    pub fn length(&self) -> i32 {
        self.length
    }

    #[must_use]
    pub fn sector_type(&self) -> SectorType {
        self.sector_type
    }

    pub fn set_sector_type(&mut self, sector_type: SectorType) {
        self.sector_type = sector_type;
    }

    /// Track-relative address of index 1; everything before it is pregap.
    #[must_use]
    pub fn track_start(&self) -> i32 {
        self.track_start
    }

    /// Set the pregap length. Clamped to the current track length.
    pub fn set_track_start(&mut self, track_start: i32) {
        self.track_start = track_start.clamp(0, self.length);
    }

    #[must_use]
    pub fn contains_address(&self, address: i32) -> bool {
        (self.start_sector..self.start_sector + self.length).contains(&address)
    }

    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Insert a fragment; negative indices count back from the end, so -1 appends.
    pub fn add_fragment(&mut self, index: i32, fragment: Fragment) {
        let index = insertion_index(index, self.fragments.len());
        self.fragments.insert(index, fragment);
        self.commit();
    }

    /// # Errors
    ///
    /// Returns an error if there is no fragment at the given index.
    pub fn remove_fragment_by_index(&mut self, index: i32) -> DiscResult<Fragment> {
        let index = lookup_index(index, self.fragments.len())?;
        let fragment = self.fragments.remove(index);
        self.commit();
        Ok(fragment)
    }

    /// # Errors
    ///
    /// Returns an error if there is no fragment at the given index.
    pub fn get_fragment_by_index(&self, index: i32) -> DiscResult<&Fragment> {
        let index = lookup_index(index, self.fragments.len())?;
        Ok(&self.fragments[index])
    }

    /// Fragment containing the given track-relative address.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::AddressOutOfRange`] if no fragment contains the address.
    pub fn get_fragment_by_address(&self, address: i32) -> DiscResult<&Fragment> {
        let index = self.fragment_position(address)?;
        Ok(&self.fragments[index])
    }

    /// Change the length of a fragment, e.g. after the loader has determined how many sectors
    /// its backing file holds.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no fragment at the given index.
    pub fn resize_fragment(&mut self, index: i32, length: i32) -> DiscResult<()> {
        let index = lookup_index(index, self.fragments.len())?;
        self.fragments[index].set_length(length);
        self.commit();
        Ok(())
    }

    fn fragment_position(&self, address: i32) -> DiscResult<usize> {
        // Fragments are contiguous and sorted, so the last one starting at or before the
        // address is the only candidate
        let position = self.fragments.partition_point(|fragment| fragment.address() <= address);
        position
            .checked_sub(1)
            .filter(|&i| self.fragments[i].contains_address(address))
            .ok_or(DiscError::AddressOutOfRange(address))
    }

    /// Start addresses of index 2 and up, relative to index 1.
    #[must_use]
    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    /// Add an index point at the given address relative to index 1. Indices are renumbered in
    /// address order.
    ///
    /// # Errors
    ///
    /// Returns an error if an index already starts at the address (index 1 starts at 0), or if
    /// the address is negative.
    pub fn add_index(&mut self, address: i32) -> DiscResult<()> {
        if address < 0 {
            return Err(DiscError::AddressOutOfRange(address));
        }

        match self.indices.binary_search(&address) {
            Ok(_) => Err(DiscError::IndexAlreadyExists(address)),
            Err(_) if address == 0 => Err(DiscError::IndexAlreadyExists(address)),
            Err(position) => {
                self.indices.insert(position, address);
                Ok(())
            }
        }
    }

    /// Remove index 2 or higher.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::IndexNotFound`] for indices 0 and 1 and for numbers past the last
    /// index.
    pub fn remove_index_by_number(&mut self, number: i32) -> DiscResult<()> {
        let position = self.extra_index_position(number)?;
        self.indices.remove(position);
        Ok(())
    }

    /// Track-relative address where the given index starts.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::IndexNotFound`] if the track has no such index; index 0 only exists
    /// when the track has a pregap.
    pub fn get_index_by_number(&self, number: i32) -> DiscResult<i32> {
        match number {
            0 if self.track_start > 0 => Ok(0),
            1 => Ok(self.track_start),
            _ => {
                let position = self.extra_index_position(number)?;
                Ok(self.track_start + self.indices[position])
            }
        }
    }

    /// Number of the index containing the given track-relative address.
    ///
    /// # Errors
    ///
    /// Returns [`DiscError::AddressOutOfRange`] if the address is outside the track.
    pub fn get_index_by_address(&self, address: i32) -> DiscResult<i32> {
        if !(0..self.length).contains(&address) {
            return Err(DiscError::AddressOutOfRange(address));
        }

        if address < self.track_start {
            return Ok(0);
        }

        let from_index_1 = address - self.track_start;
        let extra = self.indices.partition_point(|&start| start <= from_index_1);
        Ok(1 + extra as i32)
    }

    fn extra_index_position(&self, number: i32) -> DiscResult<usize> {
        usize::try_from(number - 2)
            .ok()
            .filter(|&position| position < self.indices.len())
            .ok_or(DiscError::IndexNotFound(number))
    }

    #[must_use]
    pub fn isrc(&self) -> Option<&str> {
        self.isrc.as_deref()
    }

    /// Whether the ISRC comes from stored subchannel data and is therefore read-only.
    #[must_use]
    pub fn isrc_locked(&self) -> bool {
        self.isrc_locked
    }

    /// # Errors
    ///
    /// Returns [`DiscError::DataFixed`] if the ISRC is encoded in stored subchannel data, or
    /// [`DiscError::InvalidIsrc`] if the string is not a valid 12-character ISRC.
    pub fn set_isrc(&mut self, isrc: Option<&str>) -> DiscResult<()> {
        if self.isrc_locked {
            return Err(DiscError::DataFixed("ISRC"));
        }

        if let Some(isrc) = isrc {
            if !subchannel::is_valid_isrc(isrc) {
                return Err(DiscError::InvalidIsrc(isrc.into()));
            }
        }

        self.isrc = isrc.map(String::from);
        Ok(())
    }

    #[must_use]
    pub fn flags(&self) -> TrackFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TrackFlags) {
        self.flags = flags;
    }

    /// 4-bit control field as reported in the TOC and Q subchannel.
    #[must_use]
    pub fn ctl(&self) -> u8 {
        let mut ctl = 0;
        if self.flags.four_channel {
            ctl |= 0x08;
        }
        if !self.sector_type.is_audio() {
            ctl |= 0x04;
        }
        if self.flags.copy_permitted {
            ctl |= 0x02;
        }
        if self.flags.pre_emphasis {
            ctl |= 0x01;
        }
        ctl
    }

    /// Q subchannel mode of the position blocks; always 1.
    #[must_use]
    pub fn adr(&self) -> u8 {
        subchannel::Q_MODE_POSITION
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
        crate::cdtext::replace_language(&mut self.languages, language);
    }

    pub fn remove_language(&mut self, code: u8) -> Option<Language> {
        let position = self.languages.iter().position(|language| language.code() == code)?;
        Some(self.languages.remove(position))
    }

    /// Read the sector at the given track-relative address. MCN blocks are never generated
    /// through this method; go through [`crate::Disc::get_sector`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is outside the track or the backing data cannot be read.
    pub fn get_sector(&mut self, address: i32) -> DiscResult<Sector> {
        self.sector_at(address, None)
    }

    /// Read the sector at the given track-relative address and extract the selected fields.
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

    pub(crate) fn sector_at(&mut self, address: i32, mcn: Option<String>) -> DiscResult<Sector> {
        let position = self.fragment_position(address)?;
        let context = SubchannelContext {
            track_number: self.number,
            ctl: self.ctl(),
            track_start: self.track_start,
            indices: self.indices.clone(),
            mcn,
            isrc: self.isrc.clone(),
        };

        Sector::read(
            &mut self.fragments[position],
            self.sector_type,
            self.start_sector + address,
            address,
            context,
        )
    }

    pub(crate) fn has_subchannel(&self) -> bool {
        self.fragments.iter().any(Fragment::has_subchannel)
    }

    /// Search the first [`Q_SCAN_SECTORS`] sectors of stored subchannel for a Q block of the
    /// given mode with a valid CRC.
    pub(crate) fn scan_stored_q(&mut self, mode: u8) -> DiscResult<Option<[u8; CHANNEL_SIZE]>> {
        let mut remaining = Q_SCAN_SECTORS;
        for fragment in self.fragments.iter_mut().filter(|fragment| fragment.has_subchannel()) {
            for address in 0..fragment.length().min(remaining) {
                let Some(pw) = fragment.read_subchannel_data(address)? else { break };
                let q = subchannel::deinterleave_channel(&pw, subchannel::Q_CHANNEL);
                if subchannel::q_mode(&q) == mode && subchannel::q_crc_valid(&q) {
                    return Ok(Some(q));
                }
            }

            remaining -= fragment.length().min(remaining);
            if remaining == 0 {
                break;
            }
        }

        Ok(None)
    }

    pub(crate) fn set_layout(&mut self, number: i32, start_sector: i32) {
        self.number = number;
        self.start_sector = start_sector;
    }

    fn commit(&mut self) {
        let mut address = 0;
        for fragment in &mut self.fragments {
            fragment.set_address(address);
            address += fragment.length();
        }
        self.length = address;
        self.track_start = self.track_start.min(self.length);

        let was_locked = self.isrc_locked;
        self.isrc_locked = self.has_subchannel();
        if was_locked && !self.isrc_locked {
            self.isrc = None;
        }
        if self.isrc_locked {
            self.isrc = match self.scan_stored_q(subchannel::Q_MODE_ISRC) {
                Ok(q) => q.and_then(|q| subchannel::decode_isrc(&q)),
                Err(err) => {
                    log::warn!("Unable to read ISRC from track {} subchannel: {err}", self.number);
                    None
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{BinaryFragment, MainDataFormat, SubchannelFormat};
    use crate::sector::SectorFields;
    use std::io::Cursor;

    fn track_with_fragments(lengths: &[i32]) -> Track {
        let mut track = Track::new(SectorType::Mode1);
        for &length in lengths {
            track.add_fragment(-1, Fragment::null(length));
        }
        track
    }

    #[test]
    fn fragments_are_contiguous() {
        let mut track = track_with_fragments(&[150, 1000, 50]);
        assert_eq!(track.length(), 1200);
        assert_eq!(track.get_fragment_by_index(1).unwrap().address(), 150);
        assert_eq!(track.get_fragment_by_index(-1).unwrap().address(), 1150);

        track.add_fragment(0, Fragment::null(10));
        assert_eq!(track.length(), 1210);
        assert_eq!(track.get_fragment_by_index(1).unwrap().address(), 10);

        let removed = track.remove_fragment_by_index(0).unwrap();
        assert_eq!(removed.length(), 10);
        assert_eq!(track.get_fragment_by_index(0).unwrap().address(), 0);

        track.resize_fragment(1, 500).unwrap();
        assert_eq!(track.length(), 700);
        assert_eq!(track.get_fragment_by_index(2).unwrap().address(), 650);
    }

    #[test]
    fn fragment_by_address() {
        let track = track_with_fragments(&[150, 1000]);
        assert_eq!(track.get_fragment_by_address(0).unwrap().length(), 150);
        assert_eq!(track.get_fragment_by_address(149).unwrap().length(), 150);
        assert_eq!(track.get_fragment_by_address(150).unwrap().length(), 1000);
        assert!(matches!(
            track.get_fragment_by_address(1150),
            Err(DiscError::AddressOutOfRange(1150))
        ));
        assert!(track.get_fragment_by_address(-1).is_err());
    }

    #[test]
    fn track_start_is_clamped() {
        let mut track = track_with_fragments(&[100]);
        track.set_track_start(150);
        assert_eq!(track.track_start(), 100);

        track.set_track_start(20);
        track.remove_fragment_by_index(0).unwrap();
        assert_eq!(track.track_start(), 0);
    }

    #[test]
    fn index_points() {
        let mut track = track_with_fragments(&[150, 1000]);
        track.set_track_start(150);
        track.add_index(300).unwrap();
        track.add_index(100).unwrap();

        assert_eq!(track.indices(), [100, 300]);
        assert_eq!(track.get_index_by_number(0).unwrap(), 0);
        assert_eq!(track.get_index_by_number(1).unwrap(), 150);
        assert_eq!(track.get_index_by_number(2).unwrap(), 250);
        assert_eq!(track.get_index_by_number(3).unwrap(), 450);
        assert!(matches!(track.get_index_by_number(4), Err(DiscError::IndexNotFound(4))));

        assert_eq!(track.get_index_by_address(149).unwrap(), 0);
        assert_eq!(track.get_index_by_address(150).unwrap(), 1);
        assert_eq!(track.get_index_by_address(250).unwrap(), 2);
        assert_eq!(track.get_index_by_address(1149).unwrap(), 3);
        assert!(track.get_index_by_address(1150).is_err());

        assert!(matches!(track.add_index(100), Err(DiscError::IndexAlreadyExists(100))));
        assert!(matches!(track.add_index(0), Err(DiscError::IndexAlreadyExists(0))));

        track.remove_index_by_number(2).unwrap();
        assert_eq!(track.indices(), [300]);
        assert!(track.remove_index_by_number(1).is_err());
    }

    #[test]
    fn index_0_requires_pregap() {
        let track = track_with_fragments(&[100]);
        assert!(matches!(track.get_index_by_number(0), Err(DiscError::IndexNotFound(0))));
        assert_eq!(track.get_index_by_number(1).unwrap(), 0);
    }

    #[test]
    fn ctl_from_flags() {
        let mut track = Track::new(SectorType::Audio);
        assert_eq!(track.ctl(), 0x00);

        track.set_flags(TrackFlags {
            four_channel: true,
            copy_permitted: true,
            pre_emphasis: true,
        });
        assert_eq!(track.ctl(), 0x0B);

        let data = Track::new(SectorType::Mode2Mixed);
        assert_eq!(data.ctl(), 0x04);
        assert_eq!(data.adr(), 1);
    }

    #[test]
    fn set_isrc_validates() {
        let mut track = Track::new(SectorType::Audio);
        track.set_isrc(Some("USABC9912345")).unwrap();
        assert_eq!(track.isrc(), Some("USABC9912345"));

        assert!(matches!(track.set_isrc(Some("US-ABC")), Err(DiscError::InvalidIsrc(_))));
        assert_eq!(track.isrc(), Some("USABC9912345"));

        track.set_isrc(None).unwrap();
        assert_eq!(track.isrc(), None);
    }

    fn isrc_subchannel_fragment(isrc: &str, isrc_address: i32) -> Fragment {
        let isrc_q = subchannel::encode_isrc(isrc, 0x00, 4).unwrap();
        let position_q = {
            let mut q = [0; CHANNEL_SIZE];
            q[0] = 0x01;
            subchannel::write_q_crc(&mut q);
            q
        };

        let mut subchannel = Vec::new();
        for address in 0..10 {
            let q = if address == isrc_address { isrc_q } else { position_q };
            subchannel.extend_from_slice(&subchannel::interleave_pq(false, &q));
        }

        let binary = BinaryFragment::new(
            Cursor::new(vec![0; 10 * 2352]),
            2352,
            MainDataFormat::Audio,
        )
        .with_external_subchannel(Cursor::new(subchannel), 0, SubchannelFormat::Pw96Interleaved);
        Fragment::binary(10, binary)
    }

    #[test]
    fn isrc_is_read_from_stored_subchannel() {
        let mut track = Track::new(SectorType::Audio);
        track.add_fragment(-1, isrc_subchannel_fragment("JPXYZ0512345", 4));

        assert!(track.isrc_locked());
        assert_eq!(track.isrc(), Some("JPXYZ0512345"));
        assert!(matches!(track.set_isrc(None), Err(DiscError::DataFixed(_))));

        let sector = track.get_sector(4).unwrap();
        assert!(sector.stored_data().contains(SectorFields::SUBCHANNEL));
        assert_eq!(
            sector.subchannel_q(),
            subchannel::encode_isrc("JPXYZ0512345", 0x00, 4).unwrap()
        );
    }

    #[test]
    fn isrc_cleared_when_subchannel_removed() {
        let mut track = Track::new(SectorType::Audio);
        track.add_fragment(-1, isrc_subchannel_fragment("JPXYZ0512345", 4));
        assert!(track.isrc_locked());

        track.remove_fragment_by_index(0).unwrap();
        track.add_fragment(-1, Fragment::null(100));

        assert!(!track.isrc_locked());
        assert_eq!(track.isrc(), None);

        // Generated Q at the ISRC position falls back to position data
        let q = track.get_sector(50).unwrap().subchannel_q();
        assert_eq!(subchannel::q_mode(&q), subchannel::Q_MODE_POSITION);

        track.set_isrc(Some("USABC9912345")).unwrap();
        let q = track.get_sector(50).unwrap().subchannel_q();
        assert_eq!(subchannel::q_mode(&q), subchannel::Q_MODE_ISRC);
    }

    #[test]
    fn manual_isrc_kept_across_null_edits() {
        let mut track = track_with_fragments(&[10]);
        track.set_isrc(Some("USABC9912345")).unwrap();
        track.add_fragment(-1, Fragment::null(5));
        track.remove_fragment_by_index(0).unwrap();
        assert_eq!(track.isrc(), Some("USABC9912345"));
    }

    #[test]
    fn read_sector_uses_track_position() {
        let mut track = track_with_fragments(&[10]);
        track.set_layout(3, 1000);

        let header = track
            .read_sector(5, SectorFields::HEADER, SubchannelSelection::None)
            .unwrap();
        // 1005 + 150 = 1155 = 00:15:30
        assert_eq!(header, [0x00, 0x15, 0x30, 0x01]);

        let q = track.get_sector(5).unwrap().subchannel_q();
        assert_eq!(q[1], 0x03);
    }
}
