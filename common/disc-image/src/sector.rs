//! Sector codec: assembles a full 2352-byte sector and its subchannel from whatever a fragment
//! stores, generating the missing structural fields on demand


use crate::cdtime::{CdTime, to_bcd};
use crate::fragment::Fragment;
use crate::subchannel::{self, CHANNEL_SIZE, SUBCHANNEL_SIZE};
use crate::{BYTES_PER_SECTOR, DiscError, DiscResult, ecc};
use std::cell::OnceCell;
use std::fmt::{Display, Formatter};
use std::ops::{BitOr, BitOrAssign, Range};

pub const SYNC_PATTERN: [u8; 12] =
    [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

const SYNC_RANGE: Range<usize> = 0..12;
const HEADER_RANGE: Range<usize> = 12..16;
const SUBHEADER_RANGE: Range<usize> = 16..24;

// Submode byte, stored twice in the subheader
const SUBMODE_OFFSETS: [usize; 2] = [18, 22];
const SUBMODE_FORM_2: u8 = 0x20;
const SUBMODE_DATA: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SectorType {
    Audio,
    Mode0,
    #[default]
    Mode1,
    /// Formless Mode 2: 2336 bytes of user data after the header
    Mode2,
    Mode2Form1,
    Mode2Form2,
    /// Mode 2 track whose sectors individually select Form 1 or Form 2 via the subheader
    Mode2Mixed,
}

impl Display for SectorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Audio => "Audio",
            Self::Mode0 => "Mode 0",
            Self::Mode1 => "Mode 1",
            Self::Mode2 => "Mode 2",
            Self::Mode2Form1 => "Mode 2 Form 1",
            Self::Mode2Form2 => "Mode 2 Form 2",
            Self::Mode2Mixed => "Mode 2 Mixed",
        };
        f.write_str(s)
    }
}

impl SectorType {
    #[must_use]
    pub fn is_audio(self) -> bool {
        self == Self::Audio
    }

    /// User data bytes per sector. Mixed tracks report the formless Mode 2 size since the form is
    /// only known per sector.
    #[must_use]
    pub fn user_data_size(self) -> usize {
        match self {
            Self::Audio => 2352,
            Self::Mode0 | Self::Mode2 | Self::Mode2Mixed => 2336,
            Self::Mode1 | Self::Mode2Form1 => 2048,
            Self::Mode2Form2 => 2324,
        }
    }

    fn mode_byte(self) -> u8 {
        match self {
            Self::Audio | Self::Mode0 => 0,
            Self::Mode1 => 1,
            Self::Mode2 | Self::Mode2Form1 | Self::Mode2Form2 | Self::Mode2Mixed => 2,
        }
    }

    fn has_subheader(self) -> bool {
        matches!(self, Self::Mode2Form1 | Self::Mode2Form2 | Self::Mode2Mixed)
    }

    fn data_range(self) -> Range<usize> {
        match self {
            Self::Audio => 0..2352,
            Self::Mode0 | Self::Mode2 => 16..2352,
            Self::Mode1 => 16..2064,
            Self::Mode2Form1 | Self::Mode2Mixed => 24..2072,
            Self::Mode2Form2 => 24..2348,
        }
    }

    fn edc_ecc_range(self) -> Option<Range<usize>> {
        match self {
            Self::Audio | Self::Mode0 | Self::Mode2 => None,
            Self::Mode1 => Some(2064..2352),
            Self::Mode2Form1 | Self::Mode2Mixed => Some(2072..2352),
            Self::Mode2Form2 => Some(2348..2352),
        }
    }

    /// Main channel fields that exist in this sector type, in on-disc order.
    fn field_ranges(self) -> impl Iterator<Item = (SectorFields, Range<usize>)> {
        let audio = self.is_audio();
        [
            (!audio).then_some((SectorFields::SYNC, SYNC_RANGE)),
            (!audio).then_some((SectorFields::HEADER, HEADER_RANGE)),
            self.has_subheader().then_some((SectorFields::SUBHEADER, SUBHEADER_RANGE)),
            Some((SectorFields::DATA, self.data_range())),
            self.edc_ecc_range().map(|range| (SectorFields::EDC_ECC, range)),
        ]
        .into_iter()
        .flatten()
    }

    fn main_fields(self) -> SectorFields {
        self.field_ranges().fold(SectorFields::NONE, |fields, (field, _)| fields | field)
    }

    /// Byte offset into the 2352-byte sector and the fields provided when an image stores `size`
    /// bytes per sector for this sector type. Returns `None` for unsupported sizes.
    #[must_use]
    pub fn stored_layout(self, size: usize) -> Option<(usize, SectorFields)> {
        const S: SectorFields = SectorFields::SYNC;
        const H: SectorFields = SectorFields::HEADER;
        const SH: SectorFields = SectorFields::SUBHEADER;
        const D: SectorFields = SectorFields::DATA;
        const E: SectorFields = SectorFields::EDC_ECC;

        let layout = match (self, size) {
            (_, 0) => (0, SectorFields::NONE),
            (Self::Audio, 2352) => (0, D),
            (Self::Mode0 | Self::Mode2, 2336) => (16, D),
            (Self::Mode0 | Self::Mode2, 2352) => (0, S.union(H).union(D)),
            (Self::Mode2, 2340) => (12, H.union(D)),
            (Self::Mode1, 2048) => (16, D),
            (Self::Mode1, 2052) => (12, H.union(D)),
            (Self::Mode1, 2064) => (0, S.union(H).union(D)),
            (Self::Mode1, 2336) => (16, D.union(E)),
            (Self::Mode1, 2340) => (12, H.union(D).union(E)),
            (Self::Mode1, 2352) => (0, S.union(H).union(D).union(E)),
            (Self::Mode2Form1, 2048) => (24, D),
            (Self::Mode2Form1, 2056) => (16, SH.union(D)),
            (Self::Mode2Form1, 2060) => (12, H.union(SH).union(D)),
            (Self::Mode2Form1, 2072) => (0, S.union(H).union(SH).union(D)),
            (Self::Mode2Form1, 2328) | (Self::Mode2Form2, 2328) => (24, D.union(E)),
            (Self::Mode2Form2, 2324) => (24, D),
            (Self::Mode2Form2, 2332) => (16, SH.union(D)),
            (Self::Mode2Form1 | Self::Mode2Form2 | Self::Mode2Mixed, 2336) => {
                (16, SH.union(D).union(E))
            }
            (Self::Mode2Form1 | Self::Mode2Form2 | Self::Mode2Mixed, 2340) => {
                (12, H.union(SH).union(D).union(E))
            }
            (Self::Mode2Form1 | Self::Mode2Form2 | Self::Mode2Mixed, 2352) => {
                (0, SectorFields::MAIN_CHANNEL)
            }
            _ => return None,
        };

        Some(layout)
    }
}

/// Bitmask over the structural fields of a sector. Used both to track which fields of a
/// [`Sector`] are valid and to select fields for [`Sector::extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SectorFields(u8);

impl SectorFields {
    pub const NONE: Self = Self(0);
    pub const SYNC: Self = Self(1 << 0);
    pub const HEADER: Self = Self(1 << 1);
    pub const SUBHEADER: Self = Self(1 << 2);
    pub const DATA: Self = Self(1 << 3);
    pub const EDC_ECC: Self = Self(1 << 4);
    pub const SUBCHANNEL: Self = Self(1 << 5);

    pub const MAIN_CHANNEL: Self = Self(0x1F);
    pub const USER_DATA: Self = Self::DATA;

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Whether every field in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Decode the main channel selection byte (byte 9) of an MMC READ CD command.
    #[must_use]
    pub fn from_read_cd_byte(byte: u8) -> Self {
        let mut fields = Self::NONE;
        if byte & 0x80 != 0 {
            fields |= Self::SYNC;
        }
        match (byte >> 5) & 0x03 {
            0x01 => fields |= Self::HEADER,
            0x02 => fields |= Self::SUBHEADER,
            0x03 => fields |= Self::HEADER | Self::SUBHEADER,
            _ => {}
        }
        if byte & 0x10 != 0 {
            fields |= Self::DATA;
        }
        if byte & 0x08 != 0 {
            fields |= Self::EDC_ECC;
        }
        fields
    }
}

impl BitOr for SectorFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for SectorFields {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Selected main channel fields, as in the MMC READ CD command.
pub type MainChannelSelection = SectorFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SubchannelSelection {
    #[default]
    None,
    /// 16 bytes: deinterleaved Q, 3 reserved bytes, P flag in bit 7 of the last byte
    Pq,
    /// 96 bytes of interleaved P-W
    Pw,
    /// 96 bytes of deinterleaved P-W, 12 bytes per channel
    Raw,
}

impl SubchannelSelection {
    /// Decode the subchannel selection byte (byte 10) of an MMC READ CD command.
    #[must_use]
    pub fn from_read_cd_byte(byte: u8) -> Option<Self> {
        match byte & 0x07 {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Pw),
            0x02 => Some(Self::Pq),
            0x04 => Some(Self::Raw),
            _ => None,
        }
    }

    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Pq => subchannel::PQ16_SIZE,
            Self::Pw | Self::Raw => SUBCHANNEL_SIZE,
        }
    }
}

/// Track and disc state needed to synthesize Q subchannel data for a sector.
#[derive(Debug, Clone, Default)]
pub(crate) struct SubchannelContext {
    pub(crate) track_number: i32,
    pub(crate) ctl: u8,
    pub(crate) track_start: i32,
    /// Start addresses of indices 2 and up, relative to index 1
    pub(crate) indices: Vec<i32>,
    /// Only set if the MCN is not already encoded in stored subchannel data
    pub(crate) mcn: Option<String>,
    pub(crate) isrc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sector {
    sector_type: SectorType,
    address: i32,
    relative_address: i32,
    valid: SectorFields,
    stored: SectorFields,
    buffer: [u8; BYTES_PER_SECTOR],
    subchannel: OnceCell<[u8; SUBCHANNEL_SIZE]>,
    context: SubchannelContext,
}

impl Sector {
    fn empty(
        sector_type: SectorType,
        address: i32,
        relative_address: i32,
        context: SubchannelContext,
    ) -> Self {
        Self {
            sector_type,
            address,
            relative_address,
            valid: SectorFields::NONE,
            stored: SectorFields::NONE,
            buffer: [0; BYTES_PER_SECTOR],
            subchannel: OnceCell::new(),
            context,
        }
    }

    /// Read whatever `fragment` stores for the sector at `relative_address` (track-relative).
    /// `address` is the sector's absolute address on the disc.
    pub(crate) fn read(
        fragment: &mut Fragment,
        sector_type: SectorType,
        address: i32,
        relative_address: i32,
        context: SubchannelContext,
    ) -> DiscResult<Self> {
        let size = fragment.main_data_size();
        let (offset, fields) = sector_type
            .stored_layout(size)
            .ok_or(DiscError::UnsupportedSectorSize { sector_type, size })?;

        let mut sector = Self::empty(sector_type, address, relative_address, context);
        let fragment_address = relative_address - fragment.address();

        if size != 0 {
            fragment.read_main_data(fragment_address, &mut sector.buffer[offset..offset + size])?;
        }
        sector.valid = fields;
        sector.stored = fields;

        if sector_type == SectorType::Mode2Mixed {
            let form_2 = fields.contains(SectorFields::SUBHEADER)
                && sector.buffer[SUBMODE_OFFSETS[0]] & SUBMODE_FORM_2 != 0;
            sector.sector_type =
                if form_2 { SectorType::Mode2Form2 } else { SectorType::Mode2Form1 };
        }

        if let Some(subchannel) = fragment.read_subchannel_data(fragment_address)? {
            sector.subchannel = OnceCell::from(subchannel);
            sector.valid |= SectorFields::SUBCHANNEL;
            sector.stored |= SectorFields::SUBCHANNEL;
        }

        Ok(sector)
    }

    /// Sector type after resolving Mode 2 Mixed to Form 1 or Form 2.
    #[must_use]
    pub fn sector_type(&self) -> SectorType {
        self.sector_type
    }

    /// Absolute address on the disc.
    #[must_use]
    pub fn address(&self) -> i32 {
        self.address
    }

    #[must_use]
    pub fn relative_address(&self) -> i32 {
        self.relative_address
    }

    /// Fields that are currently valid, whether read from the image or generated.
    #[must_use]
    pub fn valid_data(&self) -> SectorFields {
        let subchannel = if self.subchannel.get().is_some() {
            SectorFields::SUBCHANNEL
        } else {
            SectorFields::NONE
        };
        self.valid | subchannel
    }

    /// Fields that were provided by the image.
    #[must_use]
    pub fn stored_data(&self) -> SectorFields {
        self.stored
    }

    fn ensure(&mut self, fields: SectorFields) {
        let missing =
            fields.intersection(self.sector_type.main_fields()).difference(self.valid);
        if missing.is_empty() {
            return;
        }

        if missing.contains(SectorFields::SYNC) {
            self.buffer[SYNC_RANGE].copy_from_slice(&SYNC_PATTERN);
        }

        if missing.contains(SectorFields::HEADER) {
            self.buffer[12..15].copy_from_slice(&CdTime::from_lba(self.address).to_bcd());
            self.buffer[15] = self.sector_type.mode_byte();
        }

        if missing.contains(SectorFields::SUBHEADER) {
            let submode = match self.sector_type {
                SectorType::Mode2Form2 => SUBMODE_FORM_2,
                _ => SUBMODE_DATA,
            };
            self.buffer[SUBHEADER_RANGE].fill(0);
            // Submode goes in subheader bytes 2 and 6 (ECMA-130), not byte 5
            for offset in SUBMODE_OFFSETS {
                self.buffer[offset] = submode;
            }
        }

        if missing.contains(SectorFields::DATA) {
            self.buffer[self.sector_type.data_range()].fill(0);
        }

        self.valid |= missing.difference(SectorFields::EDC_ECC);

        if missing.contains(SectorFields::EDC_ECC) {
            // EDC covers everything before it, so generate the other fields first
            self.ensure(SectorFields::MAIN_CHANNEL.difference(SectorFields::EDC_ECC));
            match self.sector_type {
                SectorType::Mode1 => ecc::write_mode1_edc_ecc(&mut self.buffer),
                SectorType::Mode2Form1 | SectorType::Mode2Mixed => {
                    ecc::write_mode2_form1_edc_ecc(&mut self.buffer);
                }
                SectorType::Mode2Form2 => ecc::write_mode2_form2_edc(&mut self.buffer),
                SectorType::Audio | SectorType::Mode0 | SectorType::Mode2 => {}
            }
            self.valid |= SectorFields::EDC_ECC;
        }
    }

    fn field(&mut self, field: SectorFields) -> &[u8] {
        let range = self
            .sector_type
            .field_ranges()
            .find_map(|(f, range)| (f == field).then_some(range))
            .unwrap_or(0..0);
        self.ensure(field);
        &self.buffer[range]
    }

    /// Sync pattern; empty for audio sectors.
    pub fn sync(&mut self) -> &[u8] {
        self.field(SectorFields::SYNC)
    }

    /// BCD MSF address and mode byte; empty for audio sectors.
    pub fn header(&mut self) -> &[u8] {
        self.field(SectorFields::HEADER)
    }

    /// 8-byte subheader for Mode 2 Form 1/2 sectors; empty otherwise.
    pub fn subheader(&mut self) -> &[u8] {
        self.field(SectorFields::SUBHEADER)
    }

    pub fn data(&mut self) -> &[u8] {
        self.field(SectorFields::DATA)
    }

    /// EDC and (where present) ECC bytes; empty for sector types without error correction.
    pub fn edc_ecc(&mut self) -> &[u8] {
        self.field(SectorFields::EDC_ECC)
    }

    /// The complete 2352-byte sector.
    pub fn raw(&mut self) -> &[u8; BYTES_PER_SECTOR] {
        self.ensure(SectorFields::MAIN_CHANNEL);
        &self.buffer
    }

    /// Interleaved P-W subchannel data, read from the image or generated.
    pub fn subchannel(&self) -> &[u8; SUBCHANNEL_SIZE] {
        self.subchannel.get_or_init(|| self.generate_subchannel())
    }

    #[must_use]
    pub fn subchannel_q(&self) -> [u8; CHANNEL_SIZE] {
        subchannel::deinterleave_channel(self.subchannel(), subchannel::Q_CHANNEL)
    }

    /// Concatenate the selected main channel fields in on-disc order followed by the selected
    /// subchannel data. Fields that do not exist for the sector type contribute nothing.
    pub fn extract(&mut self, main: MainChannelSelection, sub: SubchannelSelection) -> Vec<u8> {
        let mut out = Vec::with_capacity(BYTES_PER_SECTOR + sub.size());

        self.ensure(main);
        for (field, range) in self.sector_type.field_ranges() {
            if main.contains(field) {
                out.extend_from_slice(&self.buffer[range]);
            }
        }

        match sub {
            SubchannelSelection::None => {}
            SubchannelSelection::Pq => {
                out.extend_from_slice(&subchannel::pw96_to_pq16(self.subchannel()));
            }
            SubchannelSelection::Pw => out.extend_from_slice(self.subchannel()),
            SubchannelSelection::Raw => {
                out.extend_from_slice(&subchannel::deinterleave(self.subchannel()));
            }
        }

        out
    }

    /// Check the stored EDC against the stored (or, where not stored, generated) sector
    /// contents. Returns `true` if the image did not provide EDC data.
    pub fn verify_lec(&mut self) -> bool {
        if !self.stored.contains(SectorFields::EDC_ECC) {
            return true;
        }

        self.ensure(SectorFields::MAIN_CHANNEL.difference(SectorFields::EDC_ECC));
        match self.sector_type {
            SectorType::Mode1 => ecc::mode1_edc_valid(&self.buffer),
            SectorType::Mode2Form1 | SectorType::Mode2Mixed => {
                ecc::mode2_form1_edc_valid(&self.buffer)
            }
            SectorType::Mode2Form2 => ecc::mode2_form2_edc_valid(&self.buffer),
            SectorType::Audio | SectorType::Mode0 | SectorType::Mode2 => true,
        }
    }

    /// Check the Q CRC of stored subchannel data. Returns `true` if the image did not provide
    /// subchannel data.
    #[must_use]
    pub fn verify_subchannel_crc(&self) -> bool {
        !self.stored.contains(SectorFields::SUBCHANNEL)
            || subchannel::q_crc_valid(&self.subchannel_q())
    }

    fn in_pregap(&self) -> bool {
        self.relative_address < self.context.track_start
    }

    fn generate_subchannel(&self) -> [u8; SUBCHANNEL_SIZE] {
        let context = &self.context;
        let aframe = CdTime::from_lba(self.address).frames;

        let q = match self.address.rem_euclid(100) {
            25 => context
                .mcn
                .as_deref()
                .and_then(|mcn| subchannel::encode_mcn(mcn, context.ctl, aframe)),
            50 if self.sector_type.is_audio() => context
                .isrc
                .as_deref()
                .and_then(|isrc| subchannel::encode_isrc(isrc, context.ctl, aframe)),
            _ => None,
        };
        let q = q.unwrap_or_else(|| self.position_q());

        subchannel::interleave_pq(self.in_pregap(), &q)
    }

    fn position_q(&self) -> [u8; CHANNEL_SIZE] {
        let context = &self.context;
        let from_index_1 = self.relative_address - context.track_start;

        let index = if self.in_pregap() {
            0
        } else {
            1 + context.indices.iter().filter(|&&start| start <= from_index_1).count()
        };

        // Counts down to index 1 in the pregap
        let relative_time = CdTime::from_sector_number(
            from_index_1.unsigned_abs() % CdTime::MAX_SECTORS,
        );

        let mut q = [0; CHANNEL_SIZE];
        q[0] = (context.ctl << 4) | subchannel::Q_MODE_POSITION;
        q[1] = to_bcd(context.track_number.clamp(0, 99) as u8);
        q[2] = to_bcd(index.min(99) as u8);
        q[3..6].copy_from_slice(&relative_time.to_bcd());
        q[7..10].copy_from_slice(&CdTime::from_lba(self.address).to_bcd());
        subchannel::write_q_crc(&mut q);

        q
    }
}
