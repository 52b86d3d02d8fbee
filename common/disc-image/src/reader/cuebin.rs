//! Code for loading disc images in CUE/BIN format, including CUE sheets that reference WAVE audio

#[cfg(test)]
mod tests;

use crate::cdtext::{Language, PackType};
use crate::cdtime::CdTime;
use crate::fragment::{DataStream, MainDataFormat};
use crate::{
    AudioFragment, BinaryFragment, Disc, DiscError, DiscResult, Fragment, MSF_OFFSET, SectorType,
    Session, SessionType, Track, TrackFlags,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::{fs, io, mem};

// English
const CDTEXT_LANGUAGE: u8 = 0x09;

// The first track of every session starts with at least 2 seconds before index 1
const SESSION_PREGAP_LEN: i32 = MSF_OFFSET;

const AUDIO_SAMPLES_PER_SECTOR: u64 = 588;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileType {
    Binary,
    /// Big-endian audio samples
    Motorola,
    Wave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackMode {
    sector_type: SectorType,
    sector_size: usize,
    cdi: bool,
}

impl TrackMode {
    const fn new(sector_type: SectorType, sector_size: usize) -> Self {
        Self { sector_type, sector_size, cdi: false }
    }
}

impl FromStr for TrackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "AUDIO" => Self::new(SectorType::Audio, 2352),
            "MODE1/2048" => Self::new(SectorType::Mode1, 2048),
            "MODE1/2352" => Self::new(SectorType::Mode1, 2352),
            "MODE2/2048" => Self::new(SectorType::Mode2Form1, 2048),
            "MODE2/2324" => Self::new(SectorType::Mode2Form2, 2324),
            "MODE2/2336" => Self::new(SectorType::Mode2Mixed, 2336),
            "MODE2/2352" => Self::new(SectorType::Mode2Mixed, 2352),
            "CDI/2336" => Self { cdi: true, ..Self::new(SectorType::Mode2Mixed, 2336) },
            "CDI/2352" => Self { cdi: true, ..Self::new(SectorType::Mode2Mixed, 2352) },
            _ => return Err(format!("Invalid track mode: {s}")),
        };
        Ok(mode)
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
struct ParsedTrack {
    number: u8,
    mode: TrackMode,
    session: u8,
    pregap_len: Option<CdTime>,
    postgap_len: Option<CdTime>,
    pause_start: Option<CdTime>,
    track_start: CdTime,
    extra_indices: Vec<CdTime>,
    isrc: Option<String>,
    flags: TrackFlags,
    cdtext: Option<Language>,
}

impl ParsedTrack {
    /// Position in the file where this track's data begins, including any pause stored in the
    /// file as index 0.
    fn data_start(&self) -> i32 {
        sectors(self.pause_start.unwrap_or(self.track_start))
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
struct ParsedFile {
    file_name: String,
    file_type: FileType,
    tracks: Vec<ParsedTrack>,
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
struct ParsedCue {
    catalog: Option<String>,
    cdtext: Option<Language>,
    files: Vec<ParsedFile>,
}

#[derive(Debug, Clone)]
struct CueParser {
    files: Vec<ParsedFile>,
    tracks: Vec<ParsedTrack>,
    current_file: Option<(String, FileType)>,
    current_track: Option<(u8, TrackMode, u8)>,
    last_track_number: Option<u8>,
    session: u8,
    catalog: Option<String>,
    disc_cdtext: Option<Language>,
    pregap_len: Option<CdTime>,
    postgap_len: Option<CdTime>,
    pause_start: Option<CdTime>,
    track_start: Option<CdTime>,
    extra_indices: Vec<CdTime>,
    isrc: Option<String>,
    flags: TrackFlags,
    track_cdtext: Option<Language>,
}

impl CueParser {
    fn new() -> Self {
        Self {
            files: vec![],
            tracks: vec![],
            current_file: None,
            current_track: None,
            last_track_number: None,
            session: 1,
            catalog: None,
            disc_cdtext: None,
            pregap_len: None,
            postgap_len: None,
            pause_start: None,
            track_start: None,
            extra_indices: vec![],
            isrc: None,
            flags: TrackFlags::default(),
            track_cdtext: None,
        }
    }

    fn parse(mut self, file: &str) -> DiscResult<ParsedCue> {
        for line in file.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("FILE ") {
                self.parse_file_line(line)?;
            } else if trimmed.starts_with("TRACK ") {
                self.parse_track_line(line)?;
            } else if trimmed.starts_with("INDEX ") {
                self.parse_index_line(line)?;
            } else if trimmed.starts_with("PREGAP ") || trimmed.starts_with("POSTGAP ") {
                self.parse_gap_line(line)?;
            } else if trimmed.starts_with("CATALOG ") {
                self.catalog = Some(trimmed["CATALOG ".len()..].trim().into());
            } else if trimmed.starts_with("ISRC ") {
                self.parse_isrc_line(line)?;
            } else if trimmed.starts_with("FLAGS ") {
                self.parse_flags_line(line)?;
            } else if trimmed.starts_with("REM SESSION ") {
                self.parse_session_line(line)?;
            } else if ["TITLE ", "PERFORMER ", "SONGWRITER "]
                .iter()
                .any(|command| trimmed.starts_with(command))
            {
                self.parse_cdtext_line(line)?;
            }
        }

        self.push_file()?;

        if self.files.is_empty() {
            return Err(DiscError::CueParse("CUE file has no tracks".into()));
        }

        Ok(ParsedCue { catalog: self.catalog, cdtext: self.disc_cdtext, files: self.files })
    }

    #[allow(clippy::items_after_statements)]
    fn parse_file_line(&mut self, line: &str) -> DiscResult<()> {
        self.push_file()?;

        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"FILE (?:"(.*)"|(\S+)) (BINARY|MOTOROLA|WAVE)\s*$"#).unwrap()
        });

        let captures =
            RE.captures(line).ok_or_else(|| DiscError::CueInvalidFileLine(line.into()))?;
        let file_name = captures.get(1).or_else(|| captures.get(2)).unwrap();
        let file_type = match captures.get(3).unwrap().as_str() {
            "MOTOROLA" => FileType::Motorola,
            "WAVE" => FileType::Wave,
            _ => FileType::Binary,
        };
        self.current_file = Some((file_name.as_str().into(), file_type));

        Ok(())
    }

    #[allow(clippy::items_after_statements)]
    fn parse_track_line(&mut self, line: &str) -> DiscResult<()> {
        self.push_track()?;

        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"TRACK ([^ ]*) ([^ ]*)").unwrap());

        let captures =
            RE.captures(line).ok_or_else(|| DiscError::CueInvalidTrackLine(line.into()))?;
        let track_number = captures
            .get(1)
            .unwrap()
            .as_str()
            .parse::<u8>()
            .map_err(|_| DiscError::CueInvalidTrackLine(line.into()))?;
        let mode = captures
            .get(2)
            .unwrap()
            .as_str()
            .trim()
            .parse::<TrackMode>()
            .map_err(|_| DiscError::CueInvalidTrackLine(line.into()))?;

        if self.current_file.is_none() {
            return Err(DiscError::CueParse(format!(
                "Track {track_number} is not preceded by a FILE line"
            )));
        }

        self.current_track = Some((track_number, mode, self.session));

        Ok(())
    }

    fn parse_index_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"INDEX ([^ ]*) ([^ ]*)").unwrap());

        let captures =
            RE.captures(line).ok_or_else(|| DiscError::CueInvalidIndexLine(line.into()))?;
        let index_number = captures
            .get(1)
            .unwrap()
            .as_str()
            .parse::<u8>()
            .map_err(|_| DiscError::CueInvalidIndexLine(line.into()))?;
        let start_time = captures
            .get(2)
            .unwrap()
            .as_str()
            .trim()
            .parse::<CdTime>()
            .map_err(|_| DiscError::CueInvalidIndexLine(line.into()))?;

        match index_number {
            0 => {
                self.pause_start = Some(start_time);
            }
            1 => {
                self.track_start = Some(start_time);
            }
            2..=99 => {
                self.extra_indices.push(start_time);
            }
            _ => {
                return Err(DiscError::CueInvalidIndexLine(line.into()));
            }
        }

        Ok(())
    }

    fn parse_gap_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(PREGAP|POSTGAP) ([^ ]*)").unwrap());

        let captures =
            RE.captures(line).ok_or_else(|| DiscError::CueInvalidGapLine(line.into()))?;
        let gap_len = captures
            .get(2)
            .unwrap()
            .as_str()
            .trim()
            .parse::<CdTime>()
            .map_err(|_| DiscError::CueInvalidGapLine(line.into()))?;

        if captures.get(1).unwrap().as_str() == "PREGAP" {
            self.pregap_len = Some(gap_len);
        } else {
            self.postgap_len = Some(gap_len);
        }

        Ok(())
    }

    fn parse_isrc_line(&mut self, line: &str) -> DiscResult<()> {
        if self.current_track.is_none() {
            return Err(DiscError::CueParse(format!("ISRC outside of a track: {line}")));
        }

        let isrc = line.trim_start()["ISRC ".len()..].trim();
        self.isrc = Some(isrc.into());

        Ok(())
    }

    fn parse_flags_line(&mut self, line: &str) -> DiscResult<()> {
        let mut flags = TrackFlags::default();
        for flag in line.trim_start()["FLAGS ".len()..].split_whitespace() {
            match flag {
                "DCP" => flags.copy_permitted = true,
                "4CH" => flags.four_channel = true,
                "PRE" => flags.pre_emphasis = true,
                // Serial copy management is not representable in the control field
                "SCMS" => {}
                _ => return Err(DiscError::CueParse(format!("Invalid track flag '{flag}'"))),
            }
        }
        self.flags = flags;

        Ok(())
    }

    fn parse_session_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"REM SESSION (\d+)").unwrap());

        let session = RE
            .captures(line)
            .and_then(|captures| captures.get(1).unwrap().as_str().parse::<u8>().ok())
            .ok_or_else(|| DiscError::CueParse(format!("Invalid session line: {line}")))?;
        if session < self.session {
            return Err(DiscError::CueParse(format!(
                "Sessions out of order; session {session} after {}",
                self.session
            )));
        }
        self.session = session;

        Ok(())
    }

    fn parse_cdtext_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"(TITLE|PERFORMER|SONGWRITER) (?:"(.*)"|(\S.*))"#).unwrap()
        });

        let captures =
            RE.captures(line).ok_or_else(|| DiscError::CueParse(format!("Invalid line: {line}")))?;
        let pack_type = match captures.get(1).unwrap().as_str() {
            "PERFORMER" => PackType::Performer,
            "SONGWRITER" => PackType::Songwriter,
            _ => PackType::Title,
        };
        let text = captures.get(2).or_else(|| captures.get(3)).unwrap().as_str().trim_end();

        let language = if self.current_track.is_some() {
            &mut self.track_cdtext
        } else if self.last_track_number.is_none() {
            &mut self.disc_cdtext
        } else {
            log::warn!("Ignoring CD-TEXT line between tracks: {line}");
            return Ok(());
        };
        language.get_or_insert_with(|| Language::new(CDTEXT_LANGUAGE)).set_text(pack_type, text);

        Ok(())
    }

    fn push_file(&mut self) -> DiscResult<()> {
        self.push_track()?;

        let Some((file_name, file_type)) = self.current_file.take() else { return Ok(()) };

        if self.tracks.is_empty() {
            return Err(DiscError::CueParse(format!("No tracks listed for file '{file_name}'")));
        }

        self.files.push(ParsedFile { file_name, file_type, tracks: mem::take(&mut self.tracks) });

        Ok(())
    }

    fn push_track(&mut self) -> DiscResult<()> {
        let Some((track_number, mode, session)) = self.current_track.take() else {
            return Ok(());
        };

        match self.last_track_number {
            None => {
                if !(1..=99).contains(&track_number) {
                    return Err(DiscError::CueParse(format!(
                        "Invalid first track number {track_number}"
                    )));
                }
            }
            Some(last_track_number) => {
                if track_number != last_track_number + 1 {
                    return Err(DiscError::CueParse(format!(
                        "Tracks out of order; track {track_number} after {last_track_number}"
                    )));
                }
            }
        }
        self.last_track_number = Some(track_number);

        let Some(track_start) = self.track_start.take() else {
            return Err(DiscError::CueParse(format!(
                "No start time found for track {track_number}"
            )));
        };

        self.tracks.push(ParsedTrack {
            number: track_number,
            mode,
            session,
            pregap_len: self.pregap_len.take(),
            postgap_len: self.postgap_len.take(),
            pause_start: self.pause_start.take(),
            track_start,
            extra_indices: mem::take(&mut self.extra_indices),
            isrc: self.isrc.take(),
            flags: mem::take(&mut self.flags),
            cdtext: self.track_cdtext.take(),
        });

        Ok(())
    }
}

fn sectors(time: CdTime) -> i32 {
    time.to_sector_number() as i32
}

/// Load a CUE sheet and the data files it references. `open_fn` opens each referenced file.
///
/// # Errors
///
/// Returns an error if the CUE file cannot be read or parsed, if any referenced file cannot be
/// opened, or if the files do not contain the data the CUE sheet describes.
pub fn load_cue<P, F, OpenFn>(cue_path: P, open_fn: OpenFn) -> DiscResult<Disc>
where
    P: AsRef<Path>,
    F: DataStream + 'static,
    OpenFn: for<'a> Fn(&'a Path) -> io::Result<F>,
{
    let cue_path = cue_path.as_ref();

    let cue_file = fs::read_to_string(cue_path)
        .map_err(|source| DiscError::CueOpen { path: cue_path.display().to_string(), source })?;
    let parent_dir = cue_path
        .parent()
        .ok_or_else(|| DiscError::CueParentDir(cue_path.display().to_string()))?;

    let mut disc = load_cue_str(&cue_file, parent_dir, open_fn)?;

    let mut filenames = vec![cue_path.to_path_buf()];
    filenames.extend(disc.filenames().iter().cloned());
    disc.set_filenames(filenames);

    Ok(disc)
}

/// Build a disc from CUE sheet text, resolving file names relative to `parent_dir`.
///
/// # Errors
///
/// See [`load_cue`].
pub fn load_cue_str<F, OpenFn>(
    cue: &str,
    parent_dir: &Path,
    open_fn: OpenFn,
) -> DiscResult<Disc>
where
    F: DataStream + 'static,
    OpenFn: for<'a> Fn(&'a Path) -> io::Result<F>,
{
    let parsed = CueParser::new().parse(cue)?;

    log::trace!("Parsed CUE sheet:\n{parsed:#?}");

    to_disc(&parsed, parent_dir, &open_fn)
}

/// Position within a data file just past the last track read from it.
#[derive(Debug, Clone, Copy, Default)]
struct FilePosition {
    sector: i32,
    byte_offset: u64,
}

fn to_disc<F, OpenFn>(
    parsed: &ParsedCue,
    parent_dir: &Path,
    open_fn: &OpenFn,
) -> DiscResult<Disc>
where
    F: DataStream + 'static,
    OpenFn: for<'a> Fn(&'a Path) -> io::Result<F>,
{
    let mut disc = Disc::new();
    disc.set_start_sector(-MSF_OFFSET);
    disc.set_first_track_number(i32::from(parsed.files[0].tracks[0].number));
    disc.set_mcn(parsed.catalog.as_deref())?;

    let mut filenames: Vec<PathBuf> = Vec::with_capacity(parsed.files.len());
    let mut current_session = 1;
    let mut first_in_session = true;

    for file in &parsed.files {
        let path = parent_dir.join(&file.file_name);
        if !filenames.contains(&path) {
            filenames.push(path.clone());
        }

        let mut position = FilePosition::default();
        for (i, parsed_track) in file.tracks.iter().enumerate() {
            if parsed_track.session != current_session {
                disc.add_session_by_number(i32::from(parsed_track.session), Session::new())?;
                current_session = parsed_track.session;
                first_in_session = true;
            }

            let next_data_start = file.tracks.get(i + 1).map(ParsedTrack::data_start);
            let track = to_track(
                parsed_track,
                &path,
                file.file_type,
                next_data_start,
                &mut position,
                first_in_session,
                open_fn,
            )?;
            disc.add_track_by_number(i32::from(parsed_track.number), track)?;
            first_in_session = false;
        }
    }

    for i in 0..disc.sessions().len() {
        let mut session = disc.session_mut_by_index(i as i32)?;
        let session_type = session_type(parsed, session.tracks());
        session.set_session_type(session_type);
    }

    if let Some(cdtext) = &parsed.cdtext {
        disc.session_mut_by_index(0)?.set_language(cdtext.clone());
    }

    disc.set_filenames(filenames);

    Ok(disc)
}

fn to_track<F, OpenFn>(
    parsed: &ParsedTrack,
    path: &Path,
    file_type: FileType,
    next_data_start: Option<i32>,
    position: &mut FilePosition,
    first_in_session: bool,
    open_fn: &OpenFn,
) -> DiscResult<Track>
where
    F: DataStream + 'static,
    OpenFn: for<'a> Fn(&'a Path) -> io::Result<F>,
{
    let TrackMode { sector_type, sector_size, .. } = parsed.mode;
    let data_start = parsed.data_start();

    let pause_len = sectors(parsed.track_start) - data_start;
    if pause_len < 0 {
        return Err(DiscError::CueParse(format!(
            "Index 0 is after index 1 in track {}",
            parsed.number
        )));
    }

    let mut pregap_len = parsed.pregap_len.map_or(0, sectors);
    if first_in_session {
        pregap_len = pregap_len.max(SESSION_PREGAP_LEN - pause_len);
    }

    let data_len = match next_data_start {
        Some(next_data_start) if next_data_start <= data_start => {
            return Err(DiscError::CueParse(format!(
                "Tracks out of order in file; track {} starts at or after the next track",
                parsed.number
            )));
        }
        Some(next_data_start) => Some(next_data_start - data_start),
        None => None,
    };

    let open = |path: &Path| {
        open_fn(path).map_err(|source| DiscError::DataFileOpen {
            path: path.display().to_string(),
            source,
        })
    };

    let data = match file_type {
        FileType::Binary | FileType::Motorola => {
            let main_format = match (sector_type.is_audio(), file_type) {
                (true, FileType::Motorola) => MainDataFormat::AudioSwap,
                (true, _) => MainDataFormat::Audio,
                (false, _) => MainDataFormat::Data,
            };

            position.byte_offset += (data_start - position.sector) as u64 * sector_size as u64;
            let mut binary = BinaryFragment::new(open(path)?, sector_size, main_format)
                .with_offset(position.byte_offset);
            let data_len = match data_len {
                Some(data_len) => data_len,
                None => binary.sectors_in_stream()?,
            };

            position.byte_offset += data_len as u64 * sector_size as u64;
            position.sector = data_start + data_len;

            Fragment::binary(data_len, binary)
        }
        FileType::Wave => {
            if !sector_type.is_audio() {
                return Err(DiscError::CueParse(format!(
                    "WAVE file '{}' used for data track {}",
                    path.display(),
                    parsed.number
                )));
            }

            let audio = AudioFragment::new(open(path)?)?
                .with_sample_offset(data_start as u64 * AUDIO_SAMPLES_PER_SECTOR);
            let data_len = data_len.unwrap_or_else(|| audio.sectors_in_stream());

            Fragment::audio(data_len, audio)
        }
    };

    if data.length() <= pause_len {
        return Err(DiscError::CueParse(format!(
            "File '{}' has no data for track {}",
            path.display(),
            parsed.number
        )));
    }

    let mut track = Track::new(sector_type);
    if pregap_len > 0 {
        track.add_fragment(-1, Fragment::null(pregap_len));
    }
    track.add_fragment(-1, data);
    if let Some(postgap_len) = parsed.postgap_len {
        track.add_fragment(-1, Fragment::null(sectors(postgap_len)));
    }
    track.set_track_start(pregap_len + pause_len);

    for &index_start in &parsed.extra_indices {
        track.add_index(sectors(index_start) - sectors(parsed.track_start))?;
    }

    track.set_isrc(parsed.isrc.as_deref())?;
    track.set_flags(parsed.flags);
    if let Some(cdtext) = &parsed.cdtext {
        track.set_language(cdtext.clone());
    }

    Ok(track)
}

fn session_type(parsed: &ParsedCue, tracks: &[Track]) -> SessionType {
    let cdi = parsed
        .files
        .iter()
        .flat_map(|file| &file.tracks)
        .filter(|track| tracks.iter().any(|t| i32::from(track.number) == t.number()))
        .any(|track| track.mode.cdi);

    if cdi {
        SessionType::CdI
    } else if tracks.iter().all(|track| track.sector_type().is_audio()) {
        SessionType::CdDa
    } else if tracks.iter().any(|track| {
        matches!(
            track.sector_type(),
            SectorType::Mode2Form1 | SectorType::Mode2Form2 | SectorType::Mode2Mixed
        )
    }) {
        SessionType::CdRomXa
    } else {
        SessionType::CdRom
    }
}
