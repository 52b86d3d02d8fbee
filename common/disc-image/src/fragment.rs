//! Fragments: contiguous runs of sectors within a track, backed by a binary stream, a PCM audio
//! stream, or nothing at all

use crate::subchannel::{self, PQ16_SIZE, SUBCHANNEL_SIZE};
use crate::{BYTES_PER_SECTOR, DiscError, DiscResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::Debug;
use std::io::{self, Read, Seek, SeekFrom};

/// Any seekable byte source a fragment can read from: a file, an in-memory buffer, or a
/// decompression layer.
pub trait DataStream: Read + Seek + Debug {}

impl<T: Read + Seek + Debug> DataStream for T {}

#[derive(Debug)]
struct FragmentStream {
    stream: Box<dyn DataStream>,
    position: u64,
}

impl FragmentStream {
    fn new<S: DataStream + 'static>(stream: S) -> Self {
        // Position is unknown until the first seek
        Self { stream: Box::new(stream), position: u64::MAX }
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        // Only seek if the stream is not already at the desired position
        if self.position != position {
            self.stream.seek(SeekFrom::Start(position))?;
            self.position = position;
        }
        Ok(())
    }

    fn read_exact_at(&mut self, position: u64, out: &mut [u8]) -> io::Result<()> {
        self.seek_to(position)?;
        let result = self.stream.read_exact(out);
        self.position = if result.is_ok() { position + out.len() as u64 } else { u64::MAX };
        result
    }

    fn len(&mut self) -> io::Result<u64> {
        let len = self.stream.seek(SeekFrom::End(0))?;
        self.position = len;
        Ok(len)
    }
}

fn relative_position(address: i32) -> DiscResult<u64> {
    u64::try_from(address).map_err(|_| DiscError::AddressOutOfRange(address))
}

/// Byte layout of the main channel data in a binary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MainDataFormat {
    #[default]
    Data,
    /// 16-bit little-endian PCM
    Audio,
    /// 16-bit big-endian PCM, swapped on read
    AudioSwap,
}

/// Byte layout of stored subchannel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelFormat {
    /// 96 bytes, P-W interleaved as read from disc
    Pw96Interleaved,
    /// 96 bytes, eight deinterleaved 12-byte channels
    Pw96Linear,
    /// 16 bytes, deinterleaved Q plus P flag
    Pq16,
}

impl SubchannelFormat {
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::Pw96Interleaved | Self::Pw96Linear => SUBCHANNEL_SIZE,
            Self::Pq16 => PQ16_SIZE,
        }
    }

    fn to_pw96(self, bytes: &[u8]) -> [u8; SUBCHANNEL_SIZE] {
        match self {
            Self::Pw96Interleaved => {
                let mut out = [0; SUBCHANNEL_SIZE];
                out.copy_from_slice(bytes);
                out
            }
            Self::Pw96Linear => {
                let mut linear = [0; SUBCHANNEL_SIZE];
                linear.copy_from_slice(bytes);
                subchannel::interleave(&linear)
            }
            Self::Pq16 => {
                let mut pq16 = [0; PQ16_SIZE];
                pq16.copy_from_slice(bytes);
                subchannel::pq16_to_pw96(&pq16)
            }
        }
    }
}

#[derive(Debug)]
enum SubchannelSource {
    /// Stored after each sector's main data in the main stream
    Internal,
    External { stream: FragmentStream, offset: u64 },
}

#[derive(Debug)]
struct SubchannelData {
    source: SubchannelSource,
    format: SubchannelFormat,
}

#[derive(Debug)]
pub struct BinaryFragment {
    main: FragmentStream,
    main_size: usize,
    main_offset: u64,
    main_format: MainDataFormat,
    subchannel: Option<SubchannelData>,
}

impl BinaryFragment {
    /// `main_size` is the number of main channel bytes stored per sector, e.g. 2048 for a cooked
    /// Mode 1 image or 2352 for a raw image.
    pub fn new<S: DataStream + 'static>(
        stream: S,
        main_size: usize,
        main_format: MainDataFormat,
    ) -> Self {
        Self {
            main: FragmentStream::new(stream),
            main_size,
            main_offset: 0,
            main_format,
            subchannel: None,
        }
    }

    /// Byte offset of the fragment's first sector within the stream.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.main_offset = offset;
        self
    }

    #[must_use]
    pub fn with_internal_subchannel(mut self, format: SubchannelFormat) -> Self {
        self.subchannel = Some(SubchannelData { source: SubchannelSource::Internal, format });
        self
    }

    #[must_use]
    pub fn with_external_subchannel<S: DataStream + 'static>(
        mut self,
        stream: S,
        offset: u64,
        format: SubchannelFormat,
    ) -> Self {
        self.subchannel = Some(SubchannelData {
            source: SubchannelSource::External { stream: FragmentStream::new(stream), offset },
            format,
        });
        self
    }

    #[must_use]
    pub fn main_size(&self) -> usize {
        self.main_size
    }

    #[must_use]
    pub fn main_format(&self) -> MainDataFormat {
        self.main_format
    }

    #[must_use]
    pub fn subchannel_format(&self) -> Option<SubchannelFormat> {
        self.subchannel.as_ref().map(|subchannel| subchannel.format)
    }

    fn internal_subchannel_size(&self) -> usize {
        match &self.subchannel {
            Some(SubchannelData { source: SubchannelSource::Internal, format }) => format.size(),
            _ => 0,
        }
    }

    fn stride(&self) -> u64 {
        (self.main_size + self.internal_subchannel_size()) as u64
    }

    /// Number of whole sectors between the fragment's offset and the end of the main stream.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from seeking the stream.
    pub fn sectors_in_stream(&mut self) -> DiscResult<i32> {
        let len = self.main.len().map_err(DiscError::Io)?;
        let stride = self.stride();
        if stride == 0 {
            return Ok(0);
        }
        Ok((len.saturating_sub(self.main_offset) / stride) as i32)
    }

    fn read_main(&mut self, address: i32, out: &mut [u8]) -> DiscResult<()> {
        let position = self.main_offset + relative_position(address)? * self.stride();
        self.main.read_exact_at(position, &mut out[..self.main_size]).map_err(DiscError::Io)?;

        if self.main_format == MainDataFormat::AudioSwap {
            for sample in out[..self.main_size].chunks_exact_mut(2) {
                sample.swap(0, 1);
            }
        }

        Ok(())
    }

    fn read_subchannel(&mut self, address: i32) -> DiscResult<Option<[u8; SUBCHANNEL_SIZE]>> {
        let relative = relative_position(address)?;
        let stride = self.stride();
        let main_offset = self.main_offset;
        let main_size = self.main_size as u64;

        let Some(SubchannelData { source, format }) = &mut self.subchannel else {
            return Ok(None);
        };

        let mut buffer = [0; SUBCHANNEL_SIZE];
        let buffer = &mut buffer[..format.size()];
        match source {
            SubchannelSource::Internal => {
                let position = main_offset + relative * stride + main_size;
                self.main.read_exact_at(position, buffer).map_err(DiscError::Io)?;
            }
            SubchannelSource::External { stream, offset } => {
                let position = *offset + relative * format.size() as u64;
                stream.read_exact_at(position, buffer).map_err(DiscError::Io)?;
            }
        }

        Ok(Some(format.to_pw96(buffer)))
    }
}

/// 16-bit stereo 44.1 kHz PCM from a RIFF/WAVE stream, 588 sample frames per sector.
#[derive(Debug)]
pub struct AudioFragment {
    stream: FragmentStream,
    data_offset: u64,
    data_len: u64,
    byte_offset: u64,
}

const BYTES_PER_SAMPLE_FRAME: u64 = 4;

impl AudioFragment {
    /// Parse the RIFF/WAVE headers of `stream` and position the fragment at the start of the
    /// sample data.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is not a 16-bit stereo 44.1 kHz PCM WAVE file, or on I/O
    /// failure.
    pub fn new<S: DataStream + 'static>(mut stream: S) -> DiscResult<Self> {
        let (data_offset, data_len) = parse_wav_header(&mut stream)?;
        Ok(Self { stream: FragmentStream::new(stream), data_offset, data_len, byte_offset: 0 })
    }

    /// Skip `samples` stereo sample frames at the start of the audio data.
    #[must_use]
    pub fn with_sample_offset(mut self, samples: u64) -> Self {
        self.byte_offset = samples * BYTES_PER_SAMPLE_FRAME;
        self
    }

    /// Number of sectors of audio after the sample offset, rounding a trailing partial sector up.
    #[must_use]
    pub fn sectors_in_stream(&self) -> i32 {
        self.data_len.saturating_sub(self.byte_offset).div_ceil(BYTES_PER_SECTOR as u64) as i32
    }

    fn read_main(&mut self, address: i32, out: &mut [u8]) -> DiscResult<()> {
        let out = &mut out[..BYTES_PER_SECTOR];
        let relative = self.byte_offset + relative_position(address)? * BYTES_PER_SECTOR as u64;

        // Reads past the end of the audio data are silence
        let available =
            self.data_len.saturating_sub(relative).min(BYTES_PER_SECTOR as u64) as usize;
        out[available..].fill(0);
        if available != 0 {
            self.stream
                .read_exact_at(self.data_offset + relative, &mut out[..available])
                .map_err(DiscError::Io)?;
        }

        Ok(())
    }
}

fn parse_wav_header<R: Read + Seek>(stream: &mut R) -> DiscResult<(u64, u64)> {
    fn unsupported(message: &str) -> DiscError {
        DiscError::UnsupportedAudioFormat(message.into())
    }

    let mut tag = [0; 4];
    stream.seek(SeekFrom::Start(0)).map_err(DiscError::Io)?;
    stream.read_exact(&mut tag).map_err(DiscError::Io)?;
    if &tag != b"RIFF" {
        return Err(unsupported("missing RIFF header"));
    }
    let _riff_len = stream.read_u32::<LittleEndian>().map_err(DiscError::Io)?;
    stream.read_exact(&mut tag).map_err(DiscError::Io)?;
    if &tag != b"WAVE" {
        return Err(unsupported("RIFF file is not WAVE"));
    }

    let mut found_format = false;
    loop {
        stream.read_exact(&mut tag).map_err(DiscError::Io)?;
        let chunk_len = stream.read_u32::<LittleEndian>().map_err(DiscError::Io)?;

        match &tag {
            b"fmt " => {
                if chunk_len < 16 {
                    return Err(unsupported("truncated fmt chunk"));
                }

                let format_tag = stream.read_u16::<LittleEndian>().map_err(DiscError::Io)?;
                let channels = stream.read_u16::<LittleEndian>().map_err(DiscError::Io)?;
                let sample_rate = stream.read_u32::<LittleEndian>().map_err(DiscError::Io)?;
                let _byte_rate = stream.read_u32::<LittleEndian>().map_err(DiscError::Io)?;
                let _block_align = stream.read_u16::<LittleEndian>().map_err(DiscError::Io)?;
                let bits_per_sample = stream.read_u16::<LittleEndian>().map_err(DiscError::Io)?;

                if format_tag != 1 || channels != 2 || sample_rate != 44100 || bits_per_sample != 16
                {
                    return Err(DiscError::UnsupportedAudioFormat(format!(
                        "expected 16-bit stereo 44100 Hz PCM, got format={format_tag} \
                         channels={channels} rate={sample_rate} bits={bits_per_sample}"
                    )));
                }
                found_format = true;

                skip_chunk(stream, u64::from(chunk_len) - 16)?;
            }
            b"data" => {
                if !found_format {
                    return Err(unsupported("data chunk before fmt chunk"));
                }

                let data_offset = stream.stream_position().map_err(DiscError::Io)?;
                log::trace!("WAVE data chunk at {data_offset}, {chunk_len} bytes");
                return Ok((data_offset, chunk_len.into()));
            }
            _ => skip_chunk(stream, chunk_len.into())?,
        }
    }
}

fn skip_chunk<R: Seek>(stream: &mut R, len: u64) -> DiscResult<()> {
    // Chunks are padded to an even length
    let padded = len + (len & 1);
    stream.seek(SeekFrom::Current(padded as i64)).map_err(DiscError::Io)?;
    Ok(())
}

#[derive(Debug)]
pub enum FragmentKind {
    /// No backing data; pregaps, postgaps and other generated sectors
    Null,
    Binary(BinaryFragment),
    Audio(AudioFragment),
}

#[derive(Debug)]
pub struct Fragment {
    address: i32,
    length: i32,
    kind: FragmentKind,
}

impl Fragment {
    #[must_use]
    pub fn new(length: i32, kind: FragmentKind) -> Self {
        Self { address: 0, length: length.max(0), kind }
    }

    #[must_use]
    pub fn null(length: i32) -> Self {
        Self::new(length, FragmentKind::Null)
    }

    #[must_use]
    pub fn binary(length: i32, binary: BinaryFragment) -> Self {
        Self::new(length, FragmentKind::Binary(binary))
    }

    #[must_use]
    pub fn audio(length: i32, audio: AudioFragment) -> Self {
        Self::new(length, FragmentKind::Audio(audio))
    }

    /// Track-relative address of the first sector.
    #[must_use]
    pub fn address(&self) -> i32 {
        self.address
    }

    #[must_use]
    pub fn length(&self) -> i32 {
        self.length
    }

    #[must_use]
    pub fn kind(&self) -> &FragmentKind {
        &self.kind
    }

    #[must_use]
    pub fn contains_address(&self, address: i32) -> bool {
        (self.address..self.address + self.length).contains(&address)
    }

    pub(crate) fn set_address(&mut self, address: i32) {
        self.address = address;
    }

    pub(crate) fn set_length(&mut self, length: i32) {
        self.length = length.max(0);
    }

    /// Number of main channel bytes stored per sector; 0 if nothing is stored.
    #[must_use]
    pub fn main_data_size(&self) -> usize {
        match &self.kind {
            FragmentKind::Null => 0,
            FragmentKind::Binary(binary) => binary.main_size,
            FragmentKind::Audio(_) => BYTES_PER_SECTOR,
        }
    }

    #[must_use]
    pub fn has_subchannel(&self) -> bool {
        matches!(&self.kind, FragmentKind::Binary(binary) if binary.subchannel.is_some())
    }

    /// Read the stored main channel bytes of the sector at the given fragment-relative address
    /// into the start of `out`. Does nothing for null fragments.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the backing stream.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`Self::main_data_size`].
    pub fn read_main_data(&mut self, address: i32, out: &mut [u8]) -> DiscResult<()> {
        match &mut self.kind {
            FragmentKind::Null => Ok(()),
            FragmentKind::Binary(binary) => binary.read_main(address, out),
            FragmentKind::Audio(audio) => audio.read_main(address, out),
        }
    }

    /// Read stored subchannel data at the given fragment-relative address, converted to
    /// interleaved PW96. Returns `None` if the fragment stores no subchannel.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the backing stream.
    pub fn read_subchannel_data(
        &mut self,
        address: i32,
    ) -> DiscResult<Option<[u8; SUBCHANNEL_SIZE]>> {
        match &mut self.kind {
            FragmentKind::Binary(binary) => binary.read_subchannel(address),
            FragmentKind::Null | FragmentKind::Audio(_) => Ok(None),
        }
    }
}
