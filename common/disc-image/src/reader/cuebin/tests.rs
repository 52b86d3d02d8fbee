use super::*;
use crate::BYTES_PER_SECTOR;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use test_log::test;

fn track(number: u8, mode: &str, track_start: CdTime) -> ParsedTrack {
    ParsedTrack {
        number,
        mode: mode.parse().unwrap(),
        session: 1,
        pregap_len: None,
        postgap_len: None,
        pause_start: None,
        track_start,
        extra_indices: vec![],
        isrc: None,
        flags: TrackFlags::default(),
        cdtext: None,
    }
}

const STANDARD_SPACE: &str = "
FILE \"Standard Space.bin\" BINARY
  TRACK 01 MODE1/2352
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    PREGAP 00:02:00
    INDEX 01 13:10:11
  TRACK 03 AUDIO
    INDEX 00 13:14:25
    INDEX 01 13:16:25
";

#[test]
fn single_file_standard_space() {
    let cue = CueParser::new().parse(STANDARD_SPACE).unwrap();
    assert_eq!(
        cue,
        ParsedCue {
            catalog: None,
            cdtext: None,
            files: vec![ParsedFile {
                file_name: "Standard Space.bin".into(),
                file_type: FileType::Binary,
                tracks: vec![
                    track(1, "MODE1/2352", CdTime::new(0, 0, 0)),
                    ParsedTrack {
                        pregap_len: Some(CdTime::new(0, 2, 0)),
                        ..track(2, "AUDIO", CdTime::new(13, 10, 11))
                    },
                    ParsedTrack {
                        pause_start: Some(CdTime::new(13, 14, 25)),
                        ..track(3, "AUDIO", CdTime::new(13, 16, 25))
                    },
                ]
            }]
        }
    );
}

const MULTI_FILE: &str = "
FILE \"Track 01.bin\" BINARY
  TRACK 01 MODE2/2352
    INDEX 01 00:00:00
FILE \"Track 02.bin\" MOTOROLA
  TRACK 02 AUDIO
    INDEX 00 00:00:00
    INDEX 01 00:00:02
FILE \"Track 03.wav\" WAVE
  TRACK 03 AUDIO
    INDEX 01 00:00:00
    POSTGAP 00:02:00
";

#[test]
fn multiple_file_types() {
    let cue = CueParser::new().parse(MULTI_FILE).unwrap();
    let files: Vec<_> =
        cue.files.iter().map(|file| (file.file_name.as_str(), file.file_type)).collect();
    assert_eq!(
        files,
        vec![
            ("Track 01.bin", FileType::Binary),
            ("Track 02.bin", FileType::Motorola),
            ("Track 03.wav", FileType::Wave),
        ]
    );

    assert_eq!(
        cue.files[0].tracks[0].mode,
        TrackMode { sector_type: SectorType::Mode2Mixed, sector_size: 2352, cdi: false }
    );
    assert_eq!(cue.files[1].tracks[0].pause_start, Some(CdTime::ZERO));
    assert_eq!(cue.files[2].tracks[0].postgap_len, Some(CdTime::new(0, 2, 0)));
}

const METADATA: &str = "
CATALOG 0123456789012
PERFORMER \"Some Band\"
TITLE \"Some Album\"
FILE game.bin BINARY
  TRACK 01 AUDIO
    TITLE \"First Song\"
    SONGWRITER Somebody Else
    FLAGS DCP PRE
    ISRC USABC9912345
    INDEX 01 00:00:00
    INDEX 02 00:10:00
    INDEX 03 00:20:00
";

#[test]
fn metadata_lines() {
    let cue = CueParser::new().parse(METADATA).unwrap();
    assert_eq!(cue.catalog.as_deref(), Some("0123456789012"));

    let disc_cdtext = cue.cdtext.as_ref().unwrap();
    assert_eq!(disc_cdtext.code(), CDTEXT_LANGUAGE);
    assert_eq!(disc_cdtext.text(PackType::Title).as_deref(), Some("Some Album"));
    assert_eq!(disc_cdtext.text(PackType::Performer).as_deref(), Some("Some Band"));

    assert_eq!(cue.files[0].file_name, "game.bin");
    let track = &cue.files[0].tracks[0];
    assert_eq!(track.isrc.as_deref(), Some("USABC9912345"));
    assert_eq!(
        track.flags,
        TrackFlags { four_channel: false, copy_permitted: true, pre_emphasis: true }
    );
    assert_eq!(track.extra_indices, vec![CdTime::new(0, 10, 0), CdTime::new(0, 20, 0)]);

    let track_cdtext = track.cdtext.as_ref().unwrap();
    assert_eq!(track_cdtext.text(PackType::Title).as_deref(), Some("First Song"));
    assert_eq!(track_cdtext.text(PackType::Songwriter).as_deref(), Some("Somebody Else"));
    assert_eq!(track_cdtext.text(PackType::Performer), None);
}

const TWO_SESSIONS: &str = "
REM SESSION 01
FILE \"audio.bin\" BINARY
  TRACK 01 AUDIO
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    INDEX 01 00:01:00
REM SESSION 02
FILE \"data.bin\" BINARY
  TRACK 03 MODE2/2352
    INDEX 01 00:00:00
";

#[test]
fn session_markers() {
    let cue = CueParser::new().parse(TWO_SESSIONS).unwrap();
    let sessions: Vec<_> = cue
        .files
        .iter()
        .flat_map(|file| &file.tracks)
        .map(|track| (track.number, track.session))
        .collect();
    assert_eq!(sessions, vec![(1, 1), (2, 1), (3, 2)]);
}

#[test]
fn first_track_need_not_be_one() {
    let cue = CueParser::new()
        .parse("FILE \"a.bin\" BINARY\n TRACK 05 AUDIO\n  INDEX 01 00:00:00\n")
        .unwrap();
    assert_eq!(cue.files[0].tracks[0].number, 5);
}

#[test]
fn invalid_sheets() {
    let cases = [
        "",
        "FILE \"a.bin\" BINARY\n",
        "FILE \"a.mp3\" MP3\n TRACK 01 AUDIO\n  INDEX 01 00:00:00\n",
        "TRACK 01 AUDIO\n INDEX 01 00:00:00\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 MODE3/2352\n  INDEX 01 00:00:00\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n  INDEX 01 00:00:00\n \
         TRACK 03 AUDIO\n  INDEX 01 00:01:00\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n  FLAGS XYZ\n  INDEX 01 00:00:00\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n  INDEX 01 00:99:00\n",
        "FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n  PREGAP 2 seconds\n  INDEX 01 00:00:00\n",
        "REM SESSION 02\nREM SESSION 01\n\
         FILE \"a.bin\" BINARY\n TRACK 01 AUDIO\n  INDEX 01 00:00:00\n",
    ];

    for cue in cases {
        assert!(CueParser::new().parse(cue).is_err(), "Expected parse error for:\n{cue}");
    }
}

fn open_in_memory(
    files: HashMap<&'static str, Vec<u8>>,
) -> impl for<'a> Fn(&'a Path) -> io::Result<Cursor<Vec<u8>>> {
    move |path: &Path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| files.get(name))
            .map(|bytes| Cursor::new(bytes.clone()))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

// Every byte of stored sector N is N
fn numbered_sectors(count: usize, sector_size: usize) -> Vec<u8> {
    (0..count).flat_map(|i| std::iter::repeat_n(i as u8, sector_size)).collect()
}

fn wav_bytes(sectors: usize, fill: u8) -> Vec<u8> {
    let data_len = (sectors * BYTES_PER_SECTOR) as u32;

    let mut bytes = Vec::new();
    bytes.write_all(b"RIFF").unwrap();
    bytes.write_u32::<LittleEndian>(36 + data_len).unwrap();
    bytes.write_all(b"WAVEfmt ").unwrap();
    bytes.write_u32::<LittleEndian>(16).unwrap();
    bytes.write_u16::<LittleEndian>(1).unwrap();
    bytes.write_u16::<LittleEndian>(2).unwrap();
    bytes.write_u32::<LittleEndian>(44100).unwrap();
    bytes.write_u32::<LittleEndian>(44100 * 4).unwrap();
    bytes.write_u16::<LittleEndian>(4).unwrap();
    bytes.write_u16::<LittleEndian>(16).unwrap();
    bytes.write_all(b"data").unwrap();
    bytes.write_u32::<LittleEndian>(data_len).unwrap();
    bytes.extend(std::iter::repeat_n(fill, data_len as usize));
    bytes
}

const MIXED_MODE: &str = "
CATALOG 0000000000000
FILE \"game.bin\" BINARY
  TRACK 01 MODE1/2352
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    INDEX 00 00:00:10
    INDEX 01 00:00:12
    INDEX 02 00:00:14
";

#[test]
fn builds_layout_from_single_file() {
    let open_fn = open_in_memory(HashMap::from([("game.bin", numbered_sectors(17, 2352))]));
    let mut disc = load_cue_str(MIXED_MODE, Path::new("/discs"), open_fn).unwrap();

    assert_eq!(disc.start_sector(), -150);
    assert_eq!(disc.length(), 150 + 17);
    assert_eq!(disc.mcn().unwrap(), "0000000000000");
    assert_eq!(disc.filenames(), &[PathBuf::from("/discs/game.bin")]);
    assert_eq!(disc.sessions()[0].session_type(), SessionType::CdRom);

    let track_1 = disc.get_track_by_number(1).unwrap();
    assert_eq!(track_1.start_sector(), -150);
    assert_eq!(track_1.length(), 160);
    assert_eq!(track_1.track_start(), 150);
    assert_eq!(track_1.fragments().len(), 2);

    let track_2 = disc.get_track_by_number(2).unwrap();
    assert_eq!(track_2.start_sector(), 10);
    assert_eq!(track_2.length(), 7);
    assert_eq!(track_2.track_start(), 2);
    assert_eq!(track_2.indices(), &[2]);
    assert_eq!(track_2.get_index_by_number(2).unwrap(), 4);

    let mut sector = disc.get_sector(3).unwrap();
    assert_eq!(sector.sector_type(), SectorType::Mode1);
    assert!(sector.data().iter().all(|&b| b == 3));

    // Pregap sectors are generated
    let mut sector = disc.get_sector(-1).unwrap();
    assert!(sector.data().iter().all(|&b| b == 0));
    assert_eq!(sector.header()[3], 1);

    // The pause stored in the file belongs to track 2
    let mut sector = disc.get_sector(10).unwrap();
    assert_eq!(sector.sector_type(), SectorType::Audio);
    assert!(sector.raw().iter().all(|&b| b == 10));

    let mut sector = disc.get_sector(16).unwrap();
    assert!(sector.raw().iter().all(|&b| b == 16));
    assert!(disc.get_sector(17).is_err());
}

#[test]
fn builds_layout_from_multiple_files() {
    let mut motorola = numbered_sectors(3, 2352);
    motorola[0] = 0x12;
    motorola[1] = 0x34;
    let open_fn = open_in_memory(HashMap::from([
        ("Track 01.bin", numbered_sectors(20, 2352)),
        ("Track 02.bin", motorola),
        ("Track 03.wav", wav_bytes(4, 0x55)),
    ]));
    let mut disc = load_cue_str(MULTI_FILE, Path::new("dir"), open_fn).unwrap();

    assert_eq!(disc.number_of_tracks(), 3);
    assert_eq!(disc.filenames().len(), 3);
    assert_eq!(disc.sessions()[0].session_type(), SessionType::CdRomXa);

    let lengths: Vec<_> =
        disc.tracks().map(|track| (track.start_sector(), track.length())).collect();
    // Track 3 has a 2-second postgap after its audio
    assert_eq!(lengths, vec![(-150, 170), (20, 3), (23, 154)]);
    assert_eq!(disc.get_track_by_number(2).unwrap().track_start(), 2);

    let mut sector = disc.get_sector(20).unwrap();
    assert_eq!(&sector.raw()[..2], &[0x34, 0x12]);

    let mut sector = disc.get_sector(23).unwrap();
    assert!(sector.raw().iter().all(|&b| b == 0x55));

    let mut postgap = disc.get_sector(27).unwrap();
    assert!(postgap.raw().iter().all(|&b| b == 0));
}

#[test]
fn builds_sessions_and_cdtext() {
    let cue = format!("{METADATA_PREFIX}{TWO_SESSIONS}");
    let open_fn = open_in_memory(HashMap::from([
        ("audio.bin", numbered_sectors(150, 2352)),
        ("data.bin", numbered_sectors(10, 2352)),
    ]));
    let disc = load_cue_str(&cue, Path::new("."), open_fn).unwrap();

    assert_eq!(disc.sessions().len(), 2);
    let first = &disc.sessions()[0];
    assert_eq!(first.session_type(), SessionType::CdDa);
    assert_eq!(first.leadout_length(), 11250);
    assert_eq!(
        first.language(CDTEXT_LANGUAGE).and_then(|language| language.text(PackType::Title)),
        Some(String::from("Compilation"))
    );

    let second = &disc.sessions()[1];
    assert_eq!(second.session_type(), SessionType::CdRomXa);
    assert_eq!(second.first_track_number(), 3);
    assert_eq!(second.start_sector(), first.start_sector() + first.length());

    // Each session's first track gets a full pregap
    let track_3 = disc.get_track_by_number(3).unwrap();
    assert_eq!(track_3.track_start(), 150);
    assert_eq!(track_3.length(), 160);
}

const METADATA_PREFIX: &str = "TITLE \"Compilation\"\n";

#[test]
fn isrc_and_flags_are_applied() {
    let open_fn = open_in_memory(HashMap::from([("game.bin", numbered_sectors(25 * 75, 2352))]));
    let disc = load_cue_str(METADATA, Path::new("."), open_fn).unwrap();

    assert_eq!(disc.mcn().unwrap(), "0123456789012");
    let track = disc.get_track_by_number(1).unwrap();
    assert_eq!(track.isrc(), Some("USABC9912345"));
    assert_eq!(track.ctl(), 0x03);
    assert_eq!(track.indices(), &[750, 1500]);
    assert!(track.language(CDTEXT_LANGUAGE).is_some());
}

#[test]
fn missing_file_is_reported() {
    let open_fn = open_in_memory(HashMap::new());
    assert!(matches!(
        load_cue_str(STANDARD_SPACE, Path::new("."), open_fn),
        Err(DiscError::DataFileOpen { .. })
    ));
}

#[test]
fn wave_file_for_data_track_is_rejected() {
    let cue = "FILE \"a.wav\" WAVE\n TRACK 01 MODE1/2352\n  INDEX 01 00:00:00\n";
    let open_fn = open_in_memory(HashMap::from([("a.wav", wav_bytes(1, 0))]));
    assert!(matches!(load_cue_str(cue, Path::new("."), open_fn), Err(DiscError::CueParse(_))));
}

#[test]
fn cdi_session_type() {
    let cue = "FILE \"a.bin\" BINARY\n TRACK 01 CDI/2352\n  INDEX 01 00:00:00\n";
    let open_fn = open_in_memory(HashMap::from([("a.bin", numbered_sectors(5, 2352))]));
    let disc = load_cue_str(cue, Path::new("."), open_fn).unwrap();
    assert_eq!(disc.sessions()[0].session_type(), SessionType::CdI);
    assert_eq!(disc.get_track_by_number(1).unwrap().sector_type(), SectorType::Mode2Mixed);
}
