//! CD-TEXT: per-language text blocks and their encoding as raw 18-byte packs, the format
//! returned by READ TOC/PMA/ATIP format 5

use crc::Crc;
use std::collections::BTreeMap;
use std::iter;

pub const PACK_SIZE: usize = 18;
const PAYLOAD_SIZE: usize = 12;
const MAX_BLOCKS: usize = 8;
const SIZE_INFO_PACKS: usize = 3;

const PACK_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_GSM);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PackType {
    Title,
    Performer,
    Songwriter,
    Composer,
    Arranger,
    Message,
    DiscId,
    Genre,
    TocInfo,
    TocInfo2,
    ClosedInfo,
    UpcIsrc,
}

impl PackType {
    pub const ALL: [Self; 12] = [
        Self::Title,
        Self::Performer,
        Self::Songwriter,
        Self::Composer,
        Self::Arranger,
        Self::Message,
        Self::DiscId,
        Self::Genre,
        Self::TocInfo,
        Self::TocInfo2,
        Self::ClosedInfo,
        Self::UpcIsrc,
    ];

    const SIZE_INFO: u8 = 0x8F;

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Title => 0x80,
            Self::Performer => 0x81,
            Self::Songwriter => 0x82,
            Self::Composer => 0x83,
            Self::Arranger => 0x84,
            Self::Message => 0x85,
            Self::DiscId => 0x86,
            Self::Genre => 0x87,
            Self::TocInfo => 0x88,
            Self::TocInfo2 => 0x89,
            Self::ClosedInfo => 0x8D,
            Self::UpcIsrc => 0x8E,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|pack_type| pack_type.to_byte() == byte)
    }

    /// Text packs carry one NUL-terminated string per track; the rest carry a single binary
    /// payload for the whole session.
    #[must_use]
    pub fn is_text(self) -> bool {
        !matches!(self, Self::Genre | Self::TocInfo | Self::TocInfo2)
    }
}

/// One CD-TEXT language block for a session or track. Text is stored as ISO 8859-1 bytes
/// without terminators. Binary pack data is stored padded to whole packs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Language {
    code: u8,
    data: BTreeMap<PackType, Vec<u8>>,
}

impl Language {
    #[must_use]
    pub fn new(code: u8) -> Self {
        Self { code, data: BTreeMap::new() }
    }

    #[must_use]
    pub fn code(&self) -> u8 {
        self.code
    }

    #[must_use]
    pub fn data(&self, pack_type: PackType) -> Option<&[u8]> {
        self.data.get(&pack_type).map(Vec::as_slice)
    }

    pub fn set_data(&mut self, pack_type: PackType, data: Vec<u8>) {
        if data.is_empty() {
            self.data.remove(&pack_type);
        } else {
            self.data.insert(pack_type, data);
        }
    }

    #[must_use]
    pub fn text(&self, pack_type: PackType) -> Option<String> {
        self.data(pack_type).map(|bytes| bytes.iter().copied().map(char::from).collect())
    }

    /// Characters outside ISO 8859-1 are replaced with '?'.
    pub fn set_text(&mut self, pack_type: PackType, text: &str) {
        let bytes = text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect();
        self.set_data(pack_type, bytes);
    }

    pub fn pack_types(&self) -> impl Iterator<Item = PackType> + '_ {
        self.data.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) fn replace_language(languages: &mut Vec<Language>, language: Language) {
    match languages.iter_mut().find(|existing| existing.code == language.code) {
        Some(existing) => *existing = language,
        None => languages.push(language),
    }
}

fn write_pack(
    out: &mut Vec<u8>,
    pack_type: u8,
    track: u8,
    sequence: u8,
    block: usize,
    char_position: usize,
    payload: &[u8],
) {
    let mut pack = [0; PACK_SIZE];
    pack[0] = pack_type;
    pack[1] = track;
    pack[2] = sequence;
    pack[3] = ((block as u8) << 4) | (char_position.min(15) as u8);
    pack[4..4 + payload.len()].copy_from_slice(payload);

    let crc = PACK_CRC.checksum(&pack[..16]);
    pack[16..].copy_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&pack);
}

/// Languages of a session and its tracks, as encoded into one block per language.
pub(crate) struct CdTextSource<'a> {
    pub first_track_number: u8,
    pub session: &'a [Language],
    pub tracks: Vec<&'a [Language]>,
}

impl CdTextSource<'_> {
    fn entities(&self) -> impl Iterator<Item = &[Language]> {
        iter::once(self.session).chain(self.tracks.iter().copied())
    }

    fn block_codes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = Vec::new();
        for language in self.entities().flatten().filter(|language| !language.is_empty()) {
            if !codes.contains(&language.code) {
                codes.push(language.code);
            }
        }

        if codes.len() > MAX_BLOCKS {
            log::warn!(
                "CD-TEXT supports at most {MAX_BLOCKS} languages; dropping {} of them",
                codes.len() - MAX_BLOCKS
            );
            codes.truncate(MAX_BLOCKS);
        }

        codes
    }

    // Entity 0 is the session, entity N is the Nth track
    fn entity_data(&self, code: u8, pack_type: PackType) -> Vec<Option<&[u8]>> {
        self.entities()
            .map(|languages| {
                languages
                    .iter()
                    .find(|language| language.code == code)
                    .and_then(|language| language.data(pack_type))
            })
            .collect()
    }

    fn entity_track_number(&self, entity: usize) -> u8 {
        if entity == 0 { 0 } else { self.first_track_number + (entity - 1) as u8 }
    }

    fn last_track_number(&self) -> u8 {
        self.entity_track_number(self.tracks.len().max(1))
    }
}

/// Encode the CD-TEXT of a session and its tracks into raw packs, size information packs
/// included. Returns an empty buffer if no language carries any data.
pub(crate) fn encode(source: &CdTextSource<'_>) -> Vec<u8> {
    let codes = source.block_codes();
    let mut out = Vec::new();

    let mut blocks = Vec::new();
    for &code in &codes {
        let mut packs = Vec::new();
        let mut counts = [0_u8; 16];

        for pack_type in PackType::ALL {
            let entities = source.entity_data(code, pack_type);
            if entities.iter().all(Option::is_none) {
                continue;
            }

            let before = packs.len();
            if pack_type.is_text() {
                encode_text(source, &entities, pack_type, &mut packs);
            } else if let Some(data) = entities[0] {
                for (i, payload) in data.chunks(PAYLOAD_SIZE).enumerate() {
                    let track = if pack_type == PackType::Genre { 0 } else { i as u8 };
                    packs.push((pack_type.to_byte(), track, 0, payload.to_vec()));
                }
            }
            counts[usize::from(pack_type.to_byte() - 0x80)] = (packs.len() - before) as u8;
        }

        counts[usize::from(PackType::SIZE_INFO - 0x80)] = SIZE_INFO_PACKS as u8;
        blocks.push((packs, counts));
    }

    if blocks.is_empty() {
        return out;
    }

    let last_sequence: Vec<u8> = blocks
        .iter()
        .map(|(packs, _)| (packs.len() + SIZE_INFO_PACKS - 1) as u8)
        .collect();

    for (block, (packs, counts)) in blocks.iter().enumerate() {
        let mut sequence = 0_u8;
        for (pack_type, track, char_position, payload) in packs {
            write_pack(&mut out, *pack_type, *track, sequence, block, *char_position, payload);
            sequence = sequence.wrapping_add(1);
        }

        let mut size_info = [0_u8; PAYLOAD_SIZE * SIZE_INFO_PACKS];
        size_info[1] = source.first_track_number;
        size_info[2] = source.last_track_number();
        size_info[4..20].copy_from_slice(counts);
        size_info[20..20 + last_sequence.len()].copy_from_slice(&last_sequence);
        size_info[28..28 + codes.len()].copy_from_slice(&codes);

        for (i, payload) in size_info.chunks_exact(PAYLOAD_SIZE).enumerate() {
            write_pack(&mut out, PackType::SIZE_INFO, i as u8, sequence, block, 0, payload);
            sequence = sequence.wrapping_add(1);
        }
    }

    out
}

type PendingPack = (u8, u8, usize, Vec<u8>);

fn encode_text(
    source: &CdTextSource<'_>,
    entities: &[Option<&[u8]>],
    pack_type: PackType,
    packs: &mut Vec<PendingPack>,
) {
    // Track number and offset within its string of every byte in the stream
    let mut stream = Vec::new();
    let mut owners = Vec::new();
    for (entity, data) in entities.iter().enumerate() {
        let data = data.unwrap_or(&[]);
        let track = source.entity_track_number(entity);
        for (offset, &byte) in data.iter().chain(&[0]).enumerate() {
            stream.push(byte);
            owners.push((track, offset));
        }
    }

    for (chunk_index, payload) in stream.chunks(PAYLOAD_SIZE).enumerate() {
        let (track, char_position) = owners[chunk_index * PAYLOAD_SIZE];
        let mut padded = payload.to_vec();
        padded.resize(PAYLOAD_SIZE, 0);
        packs.push((pack_type.to_byte(), track, char_position, padded));
    }
}

/// Languages decoded from raw packs, keyed by track number; 0 is the session.
pub(crate) type DecodedCdText = BTreeMap<u8, Vec<Language>>;

/// Decode raw CD-TEXT packs. Packs with a bad CRC are skipped.
pub(crate) fn decode(bytes: &[u8]) -> DecodedCdText {
    let mut streams: BTreeMap<(usize, u8), Vec<(u8, [u8; PAYLOAD_SIZE])>> = BTreeMap::new();
    let mut size_info: BTreeMap<usize, Vec<u8>> = BTreeMap::new();

    for (i, pack) in bytes.chunks_exact(PACK_SIZE).enumerate() {
        let crc = u16::from_be_bytes([pack[16], pack[17]]);
        if PACK_CRC.checksum(&pack[..16]) != crc {
            log::warn!("Skipping CD-TEXT pack {i} with bad CRC");
            continue;
        }

        let block = usize::from((pack[3] >> 4) & 0x07);
        let mut payload = [0; PAYLOAD_SIZE];
        payload.copy_from_slice(&pack[4..16]);

        if pack[0] == PackType::SIZE_INFO {
            size_info.entry(block).or_default().extend_from_slice(&payload);
        } else {
            streams.entry((block, pack[0])).or_default().push((pack[1], payload));
        }
    }

    let info = size_info.values().find(|info| info.len() >= PAYLOAD_SIZE * SIZE_INFO_PACKS);
    let first_track = info.map_or(1, |info| info[1].max(1));
    let last_track = info.map(|info| info[2]);
    let code_for_block = |block: usize| info.map_or(0, |info| info[28 + block]);

    let mut decoded = DecodedCdText::new();
    let mut set = |track: u8, block: usize, pack_type: PackType, data: Vec<u8>| {
        let code = code_for_block(block);
        let languages = decoded.entry(track).or_default();
        if !languages.iter().any(|language| language.code == code) {
            languages.push(Language::new(code));
        }
        if let Some(language) = languages.iter_mut().find(|language| language.code == code) {
            language.set_data(pack_type, data);
        }
    };

    for ((block, type_byte), packs) in streams {
        let Some(pack_type) = PackType::from_byte(type_byte) else {
            log::warn!("Ignoring CD-TEXT packs of unknown type {type_byte:02X}");
            continue;
        };
        let stream: Vec<u8> =
            packs.iter().flat_map(|(_, payload)| payload.iter().copied()).collect();

        if !pack_type.is_text() {
            set(0, block, pack_type, stream);
            continue;
        }

        let mut track = packs[0].0;
        let mut previous: Vec<u8> = Vec::new();
        let mut segments = stream.split(|&b| b == 0).peekable();
        while let Some(segment) = segments.next() {
            // The final segment is unterminated padding
            if segments.peek().is_none() {
                break;
            }
            if last_track.is_some_and(|last| track > last) {
                break;
            }

            // A lone tab repeats the previous entry
            let data = if segment == b"\t" { previous.clone() } else { segment.to_vec() };
            if !data.is_empty() {
                set(track, block, pack_type, data.clone());
            }
            previous = data;

            track = if track == 0 { first_track } else { track.saturating_add(1) };
        }
    }

    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language(code: u8, title: &str, performer: Option<&str>) -> Language {
        let mut language = Language::new(code);
        language.set_text(PackType::Title, title);
        if let Some(performer) = performer {
            language.set_text(PackType::Performer, performer);
        }
        language
    }

    #[test]
    fn encode_then_decode() {
        let session = [language(0x09, "An Album With A Long Title", Some("Someone"))];
        let track_1 = [language(0x09, "First", None)];
        let track_2 = [language(0x09, "Second Track", Some("Someone Else"))];

        let source = CdTextSource {
            first_track_number: 1,
            session: &session,
            tracks: vec![&track_1, &track_2],
        };
        let packs = encode(&source);
        assert_eq!(packs.len() % PACK_SIZE, 0);

        let decoded = decode(&packs);
        assert_eq!(decoded[&0], session.to_vec());
        assert_eq!(decoded[&1], track_1.to_vec());
        assert_eq!(decoded[&2], track_2.to_vec());
    }

    #[test]
    fn pack_structure() {
        let session = [language(0x09, "ABC", None)];
        let track = [language(0x09, "DEF", None)];
        let source =
            CdTextSource { first_track_number: 1, session: &session, tracks: vec![&track] };
        let packs = encode(&source);

        // One title pack plus three size information packs
        assert_eq!(packs.len(), 4 * PACK_SIZE);
        assert_eq!(packs[..4], [0x80, 0x00, 0x00, 0x00]);
        assert_eq!(packs[4..12], *b"ABC\0DEF\0");
        assert_eq!(packs[18], 0x8F);
        assert_eq!(packs[18 + 2], 1);

        // Size info: first/last track, title pack count, size info pack count, last sequence
        // number, language code
        let size_info: Vec<u8> =
            packs[PACK_SIZE..].chunks_exact(PACK_SIZE).flat_map(|p| p[4..16].to_vec()).collect();
        assert_eq!(size_info[1..3], [1, 1]);
        assert_eq!(size_info[4], 1);
        assert_eq!(size_info[4 + 15], 3);
        assert_eq!(size_info[20], 3);
        assert_eq!(size_info[28], 0x09);

        let crc = PACK_CRC.checksum(&packs[..16]);
        assert_eq!(packs[16..18], crc.to_be_bytes());
    }

    #[test]
    fn character_position_spans_packs() {
        let session = [language(0x09, "0123456789ABCDEF", None)];
        let track = [language(0x09, "xyz", None)];
        let source =
            CdTextSource { first_track_number: 1, session: &session, tracks: vec![&track] };
        let packs = encode(&source);

        // Second pack starts 12 characters into the session title
        assert_eq!(packs[PACK_SIZE + 1], 0);
        assert_eq!(packs[PACK_SIZE + 3] & 0x0F, 12);
    }

    #[test]
    fn bad_crc_packs_are_skipped() {
        let session = [language(0x09, "Title", None)];
        let track = [language(0x09, "Track", None)];
        let source =
            CdTextSource { first_track_number: 1, session: &session, tracks: vec![&track] };
        let mut packs = encode(&source);
        packs[5] ^= 0xFF;

        let decoded = decode(&packs);
        assert!(!decoded.contains_key(&0));
        assert_eq!(decoded[&1][0].text(PackType::Title).as_deref(), Some("Track"));
    }

    #[test]
    fn tab_repeats_previous_entry() {
        let session = [language(0x09, "Same", None)];
        let track_1 = [language(0x09, "\t", None)];
        let source =
            CdTextSource { first_track_number: 1, session: &session, tracks: vec![&track_1] };
        let decoded = decode(&encode(&source));
        assert_eq!(decoded[&1][0].text(PackType::Title).as_deref(), Some("Same"));
    }

    #[test]
    fn latin_1_text() {
        let mut language = Language::new(0x08);
        language.set_text(PackType::Message, "Café ✓");
        assert_eq!(language.data(PackType::Message), Some(&b"Caf\xE9 ?"[..]));
        assert_eq!(language.text(PackType::Message).as_deref(), Some("Café ?"));
    }

    #[test]
    fn no_data_encodes_nothing() {
        let session = [Language::new(0x09)];
        let source = CdTextSource { first_track_number: 1, session: &session, tracks: vec![] };
        assert!(encode(&source).is_empty());
    }
}
