// AVI INDEX BUILDER - RIFF/AVI parser for single-frame playback
//
// Parses the container once at open time into two random-access tables:
// video frames and audio chunks, each an ordered list of {offset, size}.
// Encoders disagree on what the idx1 offsets are measured from, so the
// convention is detected by probing the first video entry against an
// ordered list of named strategies. When nothing verifies, the movie
// data is walked chunk by chunk instead.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// RIFF/AVI Constants
// ============================================================================

const RIFF: u32 = 0x46464952;  // "RIFF" little-endian
const AVI_: u32 = 0x20495641;  // "AVI " little-endian
const LIST: u32 = 0x5453494C;  // "LIST" little-endian
const HDRL: u32 = 0x6C726468;  // "hdrl" - header list
const AVIH: u32 = 0x68697661;  // "avih" - main AVI header
const STRL: u32 = 0x6C727473;  // "strl" - stream list
const STRH: u32 = 0x68727473;  // "strh" - stream header
const STRF: u32 = 0x66727473;  // "strf" - stream format
const MOVI: u32 = 0x69766F6D;  // "movi" - movie data
const IDX1: u32 = 0x31786469;  // "idx1" - index

// Stream types
const VIDS: u32 = 0x73646976;  // "vids" - video stream
const AUDS: u32 = 0x73647561;  // "auds" - audio stream

// WAVEFORMATEX format tags
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_ADPCM: u16 = 0x0002;
pub const WAVE_FORMAT_MPEGLAYER3: u16 = 0x0055;

const DEFAULT_FPS: u32 = 30;
const MAX_EXTRA_DATA: u32 = 64 * 1024;
const BITMAPINFOHEADER_SIZE: u32 = 40;

const MJPEG_FAMILY: [&[u8; 4]; 5] = [b"MJPG", b"JPEG", b"AVRN", b"DMB1", b"MJLS"];
const MPEG4_FAMILY: [&[u8; 4]; 9] = [
    b"XVID", b"DIVX", b"DX50", b"FMP4", b"MP4V", b"MP4S", b"M4S2", b"3IV2", b"BLZ0",
];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Not a RIFF file")]
    NotRiff,
    #[error("Not an AVI file")]
    NotAvi,
    #[error("No movie data list found")]
    NoMovieData,
    #[error("No video frames found in index or movie data")]
    NoVideoFrames,
    #[error("Read error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Index Tables
// ============================================================================

/// Location of one chunk payload in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub offset: u32,
    pub size: u32,
}

impl ChunkRef {
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkKind {
    Video,
    Audio,
}

impl ChunkKind {
    /// Classify a chunk by its two-character subtype code ("dc" or "wb").
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match [tag[2].to_ascii_lowercase(), tag[3].to_ascii_lowercase()] {
            [b'd', b'c'] => Some(ChunkKind::Video),
            [b'w', b'b'] => Some(ChunkKind::Audio),
            _ => None,
        }
    }
}

/// True for tags shaped like `00dc` or `01wb`.
pub fn is_stream_chunk_tag(tag: [u8; 4]) -> bool {
    tag[0].is_ascii_digit() && tag[1].is_ascii_digit() && ChunkKind::from_tag(tag).is_some()
}

/// How the index tables were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexSource {
    IndexChunk { strategy: &'static str },
    LinearScan,
}

impl IndexSource {
    pub fn describe(&self) -> String {
        match self {
            IndexSource::IndexChunk { strategy } => format!("idx1 ({})", strategy),
            IndexSource::LinearScan => "linear scan".to_string(),
        }
    }
}

/// Random-access tables in presentation order. Built once per open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerIndex {
    pub video_frames: Vec<ChunkRef>,
    pub audio_chunks: Vec<ChunkRef>,
    pub source: IndexSource,
}

impl ContainerIndex {
    fn new(source: IndexSource) -> Self {
        Self {
            video_frames: Vec::new(),
            audio_chunks: Vec::new(),
            source,
        }
    }

    fn push(&mut self, kind: ChunkKind, chunk: ChunkRef) {
        match kind {
            ChunkKind::Video => self.video_frames.push(chunk),
            ChunkKind::Audio => self.audio_chunks.push(chunk),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.video_frames.len()
    }

    pub fn audio_bytes(&self) -> u64 {
        self.audio_chunks.iter().map(|c| c.size as u64).sum()
    }
}

// ============================================================================
// Offset Strategies
// ============================================================================

/// What an idx1 offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetBase {
    /// First byte after the `movi` list type.
    MovieData,
    /// Start of the file.
    Absolute,
    /// The `movi` list type itself (four bytes before the movie data).
    MovieDataTag,
}

/// One idx1 offset convention. Tried in order until one verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetStrategy {
    pub name: &'static str,
    pub base: OffsetBase,
    /// Bytes between the indexed position and the payload.
    pub header_skip: u32,
}

pub const OFFSET_STRATEGIES: [OffsetStrategy; 6] = [
    OffsetStrategy { name: "movi-relative", base: OffsetBase::MovieData, header_skip: 8 },
    OffsetStrategy { name: "absolute", base: OffsetBase::Absolute, header_skip: 8 },
    OffsetStrategy { name: "movi-tag-relative", base: OffsetBase::MovieDataTag, header_skip: 8 },
    OffsetStrategy { name: "movi-relative-payload", base: OffsetBase::MovieData, header_skip: 0 },
    OffsetStrategy { name: "absolute-payload", base: OffsetBase::Absolute, header_skip: 0 },
    OffsetStrategy { name: "movi-tag-relative-payload", base: OffsetBase::MovieDataTag, header_skip: 0 },
];

impl OffsetStrategy {
    /// Absolute file position of the chunk payload for an idx1 offset.
    pub fn data_offset(&self, movi_start: u64, entry_offset: u32) -> Option<u64> {
        let base = match self.base {
            OffsetBase::MovieData => movi_start,
            OffsetBase::Absolute => 0,
            OffsetBase::MovieDataTag => movi_start.checked_sub(4)?,
        };
        Some(base + entry_offset as u64 + self.header_skip as u64)
    }

    /// Absolute file position of the 8-byte chunk header in front of the payload.
    pub fn header_offset(&self, movi_start: u64, entry_offset: u32) -> Option<u64> {
        self.data_offset(movi_start, entry_offset)?.checked_sub(8)
    }

    /// Probe the file to see whether this convention lands on real chunk data.
    pub fn verify<R: Read + Seek>(
        &self,
        reader: &mut R,
        movi_start: u64,
        entry_offset: u32,
        codec: VideoCodec,
    ) -> bool {
        if codec == VideoCodec::Mjpeg {
            let soi = self
                .data_offset(movi_start, entry_offset)
                .and_then(|pos| probe::<R, 2>(reader, pos));
            if soi == Some([0xFF, 0xD8]) {
                return true;
            }
        }

        self.header_offset(movi_start, entry_offset)
            .and_then(|pos| probe::<R, 4>(reader, pos))
            .is_some_and(is_stream_chunk_tag)
    }
}

// ============================================================================
// Stream Descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoCodec {
    /// Motion JPEG and OEM variants. Also the fallback for unknown tags.
    Mjpeg,
    /// MPEG-4 Part 2 (XviD, DivX and friends).
    Mpeg4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoDescriptor {
    pub codec_tag: String,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub declared_fps: u32,
    /// Display ticks per source frame on a fixed 30 Hz output.
    pub repeat_count: u32,
    #[serde(skip)]
    pub extra_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioFormat {
    Pcm,
    Adpcm,
    Mp3,
}

/// Audio stream parameters. A file with no usable audio has no descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioDescriptor {
    pub format: AudioFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub samples_per_block: u32,
}

impl AudioDescriptor {
    /// Channel count of the decoded PCM held in the ring.
    pub fn ring_channels(&self) -> usize {
        match self.format {
            AudioFormat::Mp3 => 2,
            AudioFormat::Pcm | AudioFormat::Adpcm => self.channels as usize,
        }
    }

    /// Bit depth of the decoded PCM held in the ring.
    pub fn ring_bits(&self) -> usize {
        match self.format {
            AudioFormat::Pcm => self.bits_per_sample as usize,
            AudioFormat::Adpcm | AudioFormat::Mp3 => 16,
        }
    }

    /// Bytes per sample frame (all channels) in the ring.
    pub fn ring_frame_bytes(&self) -> usize {
        self.ring_channels() * self.ring_bits() / 8
    }

    /// Size of an MS-ADPCM block header for this channel count.
    pub fn adpcm_header_len(&self) -> usize {
        7 * self.channels as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDescriptor {
    pub video: VideoDescriptor,
    pub audio: Option<AudioDescriptor>,
}

/// Frame repeat factor so sub-30fps material keeps time on a 30 Hz display.
pub fn repeat_count_for(fps: u32) -> u32 {
    if fps >= 25 {
        1
    } else if fps >= 12 {
        2
    } else {
        3
    }
}

/// Map a FourCC onto a decode path. Unknown tags go down the MJPEG path.
pub fn classify_codec(fourcc: [u8; 4]) -> VideoCodec {
    let upper = fourcc.map(|b| b.to_ascii_uppercase());
    if MPEG4_FAMILY.iter().any(|tag| **tag == upper) {
        VideoCodec::Mpeg4
    } else {
        if !MJPEG_FAMILY.iter().any(|tag| **tag == upper) {
            tracing::debug!("Unknown video FourCC {:?}, trying MJPEG", fourcc_to_string(fourcc));
        }
        VideoCodec::Mjpeg
    }
}

// ============================================================================
// Raw Header Records
// ============================================================================

#[derive(Debug, Clone, Default)]
struct VideoHeader {
    handler: [u8; 4],
    compression: [u8; 4],
    width: u32,
    height: u32,
    extra_data: Vec<u8>,
}

impl VideoHeader {
    /// strh handler wins unless it is blank.
    fn fourcc(&self) -> [u8; 4] {
        if self.handler[0] == 0 || self.handler[0] == b' ' {
            self.compression
        } else {
            self.handler
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WaveFormat {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    samples_per_block: Option<u16>,
}

impl WaveFormat {
    fn describe(&self) -> Result<AudioDescriptor, String> {
        if self.channels == 0 || self.sample_rate == 0 {
            return Err("zero channels or sample rate".to_string());
        }
        if self.channels > 2 {
            return Err(format!("{} channels", self.channels));
        }

        let mut desc = AudioDescriptor {
            format: AudioFormat::Pcm,
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            block_align: self.block_align,
            samples_per_block: 0,
        };

        match self.format_tag {
            WAVE_FORMAT_PCM => {
                if self.bits_per_sample != 8 && self.bits_per_sample != 16 {
                    return Err(format!("{}-bit PCM", self.bits_per_sample));
                }
            }
            WAVE_FORMAT_ADPCM => {
                desc.format = AudioFormat::Adpcm;
                let header = desc.adpcm_header_len();
                let block_align = self.block_align as usize;
                if block_align <= header {
                    return Err(format!("ADPCM block align {}", block_align));
                }
                desc.samples_per_block = match self.samples_per_block {
                    Some(spb) if spb > 0 => spb as u32,
                    _ => (2 + (block_align - header) * 2 / self.channels as usize) as u32,
                };
            }
            WAVE_FORMAT_MPEGLAYER3 => desc.format = AudioFormat::Mp3,
            other => return Err(format!("format tag 0x{:04X}", other)),
        }

        Ok(desc)
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    tag: [u8; 4],
    offset: u32,
    size: u32,
}

impl IndexEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            tag: [raw[0], raw[1], raw[2], raw[3]],
            // flags at 4..8 are not used for playback
            offset: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            size: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MovieData {
    /// First byte after the `movi` list type.
    start: u64,
    end: u64,
    /// Where chunks following the movie list begin.
    list_end: u64,
}

// ============================================================================
// Index Builder
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexMode {
    /// Use idx1 when a strategy verifies, scan otherwise.
    #[default]
    Auto,
    /// Ignore idx1 and walk the movie data.
    ScanOnly,
}

#[derive(Debug, Clone)]
pub struct OpenedContainer {
    pub index: ContainerIndex,
    pub streams: StreamDescriptor,
}

/// Parse headers and build the index tables.
pub fn build_index<R: Read + Seek>(
    reader: &mut R,
    mode: IndexMode,
) -> Result<OpenedContainer, ContainerError> {
    IndexBuilder::new(reader)?.build(mode)
}

struct IndexBuilder<'a, R: Read + Seek> {
    reader: &'a mut R,
    file_len: u64,
    us_per_frame: Option<u32>,
    video: Option<VideoHeader>,
    audio: Option<WaveFormat>,
}

impl<'a, R: Read + Seek> IndexBuilder<'a, R> {
    fn new(reader: &'a mut R) -> Result<Self, ContainerError> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            file_len,
            us_per_frame: None,
            video: None,
            audio: None,
        })
    }

    fn build(mut self, mode: IndexMode) -> Result<OpenedContainer, ContainerError> {
        let movi = self.parse_top_level()?;
        let video = self.video_descriptor();
        let audio = self.audio_descriptor();

        let from_idx1 = match mode {
            IndexMode::Auto => match self.read_index_chunk(&movi, video.codec) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!("idx1 unreadable ({}), scanning movie data", e);
                    None
                }
            },
            IndexMode::ScanOnly => None,
        };

        let index = match from_idx1 {
            Some(index) if !index.video_frames.is_empty() => index,
            _ => self.scan_movie_data(&movi),
        };

        if index.video_frames.is_empty() {
            return Err(ContainerError::NoVideoFrames);
        }

        tracing::info!(
            "AVI indexed via {}: {} frames, {} audio chunks, {} {}x{} @ {} fps",
            index.source.describe(),
            index.video_frames.len(),
            index.audio_chunks.len(),
            video.codec_tag,
            video.width,
            video.height,
            video.declared_fps
        );

        Ok(OpenedContainer {
            index,
            streams: StreamDescriptor { video, audio },
        })
    }

    fn parse_top_level(&mut self) -> Result<MovieData, ContainerError> {
        self.reader.seek(SeekFrom::Start(0))?;
        if read_u32_le(self.reader).map_err(|_| ContainerError::NotRiff)? != RIFF {
            return Err(ContainerError::NotRiff);
        }
        let _riff_size = read_u32_le(self.reader).map_err(|_| ContainerError::NotRiff)?;
        if read_u32_le(self.reader).map_err(|_| ContainerError::NotAvi)? != AVI_ {
            return Err(ContainerError::NotAvi);
        }

        let mut pos = 12u64;
        while pos + 8 <= self.file_len {
            let (fourcc, size) = self.chunk_header_at(pos)?;
            let body = pos + 8;

            if fourcc == LIST && size >= 4 {
                match read_u32_le(self.reader)? {
                    HDRL => {
                        let end = (body + size as u64).min(self.file_len);
                        self.parse_hdrl(body + 4, end)?;
                    }
                    MOVI => {
                        let end = (body + size as u64).min(self.file_len);
                        return Ok(MovieData {
                            start: body + 4,
                            end,
                            list_end: body + padded(size),
                        });
                    }
                    _ => {}
                }
            }

            pos = body + padded(size);
        }

        Err(ContainerError::NoMovieData)
    }

    fn parse_hdrl(&mut self, start: u64, end: u64) -> Result<(), ContainerError> {
        let mut pos = start;
        while pos + 8 <= end {
            let (fourcc, size) = self.chunk_header_at(pos)?;
            let body = pos + 8;

            match fourcc {
                AVIH if size >= 4 => {
                    self.us_per_frame = Some(read_u32_le(self.reader)?);
                }
                LIST if size >= 4 => {
                    if read_u32_le(self.reader)? == STRL {
                        self.parse_strl(body + 4, (body + size as u64).min(end))?;
                    }
                }
                _ => {}
            }

            pos = body + padded(size);
        }
        Ok(())
    }

    fn parse_strl(&mut self, start: u64, end: u64) -> Result<(), ContainerError> {
        // Only the first stream of each kind is played.
        let mut claimed: Option<u32> = None;

        let mut pos = start;
        while pos + 8 <= end {
            let (fourcc, size) = self.chunk_header_at(pos)?;
            let body = pos + 8;

            match fourcc {
                STRH if size >= 8 => {
                    let fcc_type = read_u32_le(self.reader)?;
                    let handler = read_fourcc(self.reader)?;
                    if fcc_type == VIDS && self.video.is_none() {
                        self.video = Some(VideoHeader {
                            handler,
                            ..VideoHeader::default()
                        });
                        claimed = Some(VIDS);
                    } else if fcc_type == AUDS && self.audio.is_none() {
                        self.audio = Some(WaveFormat::default());
                        claimed = Some(AUDS);
                    }
                }
                STRF => match claimed {
                    Some(VIDS) => self.read_bitmap_info(size)?,
                    Some(AUDS) => self.read_wave_format(size)?,
                    _ => {}
                },
                _ => {}
            }

            pos = body + padded(size);
        }
        Ok(())
    }

    fn read_bitmap_info(&mut self, size: u32) -> Result<(), ContainerError> {
        let mut buf = vec![0u8; size.min(BITMAPINFOHEADER_SIZE) as usize];
        self.reader.read_exact(&mut buf)?;

        let mut extra_data = Vec::new();
        if size > BITMAPINFOHEADER_SIZE {
            let extra = size - BITMAPINFOHEADER_SIZE;
            if extra <= MAX_EXTRA_DATA {
                extra_data = vec![0u8; extra as usize];
                self.reader.read_exact(&mut extra_data)?;
            } else {
                tracing::warn!("Ignoring {} bytes of codec extra data", extra);
            }
        }

        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        if buf.len() >= 20 {
            video.width = le_i32(&buf[4..8]).unsigned_abs();
            video.height = le_i32(&buf[8..12]).unsigned_abs();
            video.compression = [buf[16], buf[17], buf[18], buf[19]];
        }
        video.extra_data = extra_data;
        Ok(())
    }

    fn read_wave_format(&mut self, size: u32) -> Result<(), ContainerError> {
        let mut buf = vec![0u8; size.min(20) as usize];
        self.reader.read_exact(&mut buf)?;

        let Some(wave) = self.audio.as_mut() else {
            return Ok(());
        };
        if buf.len() < 16 {
            return Ok(());
        }
        wave.format_tag = le_u16(&buf[0..2]);
        wave.channels = le_u16(&buf[2..4]);
        wave.sample_rate = le_u32(&buf[4..8]);
        wave.block_align = le_u16(&buf[12..14]);
        wave.bits_per_sample = le_u16(&buf[14..16]);
        if buf.len() >= 20 {
            wave.samples_per_block = Some(le_u16(&buf[18..20]));
        }
        Ok(())
    }

    fn video_descriptor(&self) -> VideoDescriptor {
        let header = self.video.clone().unwrap_or_default();
        let fourcc = header.fourcc();

        let declared_fps = match self.us_per_frame {
            Some(us) if us > 0 => ((1_000_000 + us / 2) / us).max(1),
            _ => DEFAULT_FPS,
        };

        VideoDescriptor {
            codec_tag: fourcc_to_string(fourcc),
            codec: classify_codec(fourcc),
            width: header.width,
            height: header.height,
            declared_fps,
            repeat_count: repeat_count_for(declared_fps),
            extra_data: header.extra_data,
        }
    }

    fn audio_descriptor(&self) -> Option<AudioDescriptor> {
        let wave = self.audio?;
        match wave.describe() {
            Ok(desc) => Some(desc),
            Err(reason) => {
                tracing::warn!("Audio disabled: {}", reason);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // idx1
    // ------------------------------------------------------------------------

    fn read_index_chunk(
        &mut self,
        movi: &MovieData,
        codec: VideoCodec,
    ) -> io::Result<Option<ContainerIndex>> {
        let Some((start, size)) = self.find_idx1(movi)? else {
            tracing::debug!("No idx1 chunk after movie data");
            return Ok(None);
        };

        let count = (size / 16) as usize;
        if count == 0 {
            return Ok(None);
        }
        if start + (count * 16) as u64 > self.file_len {
            tracing::warn!("idx1 claims {} entries but the file is truncated", count);
            return Ok(None);
        }

        let mut raw = vec![0u8; count * 16];
        self.reader.seek(SeekFrom::Start(start))?;
        self.reader.read_exact(&mut raw)?;
        let entries: Vec<IndexEntry> = raw.chunks_exact(16).map(IndexEntry::parse).collect();

        let Some(first_video) = entries
            .iter()
            .find(|e| ChunkKind::from_tag(e.tag) == Some(ChunkKind::Video))
        else {
            tracing::warn!("idx1 lists no video chunks");
            return Ok(None);
        };

        let Some(strategy) = OFFSET_STRATEGIES
            .iter()
            .find(|s| s.verify(self.reader, movi.start, first_video.offset, codec))
        else {
            tracing::warn!("No idx1 offset convention verified (first video offset {})", first_video.offset);
            return Ok(None);
        };
        tracing::debug!("idx1 offsets verified as {}", strategy.name);

        let mut index = ContainerIndex::new(IndexSource::IndexChunk {
            strategy: strategy.name,
        });
        for entry in &entries {
            let Some(kind) = ChunkKind::from_tag(entry.tag) else {
                continue;
            };
            let Some(offset) = strategy
                .data_offset(movi.start, entry.offset)
                .and_then(|pos| u32::try_from(pos).ok())
            else {
                continue;
            };
            index.push(kind, ChunkRef { offset, size: entry.size });
        }

        Ok(Some(index))
    }

    fn find_idx1(&mut self, movi: &MovieData) -> io::Result<Option<(u64, u32)>> {
        let mut pos = movi.list_end;
        while pos + 8 <= self.file_len {
            let (fourcc, size) = self.chunk_header_at(pos)?;
            if fourcc == IDX1 {
                return Ok(Some((pos + 8, size)));
            }
            pos += 8 + padded(size);
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Linear scan
    // ------------------------------------------------------------------------

    fn scan_movie_data(&mut self, movi: &MovieData) -> ContainerIndex {
        let mut index = ContainerIndex::new(IndexSource::LinearScan);

        let mut pos = movi.start;
        while pos + 8 <= movi.end {
            let (fourcc, size) = match self.chunk_header_at(pos) {
                Ok(header) => header,
                Err(e) => {
                    tracing::debug!("Scan stopped at {}: {}", pos, e);
                    break;
                }
            };

            if fourcc == LIST {
                // Descend into `rec ` groupings.
                pos += 12;
                continue;
            }

            let data = pos + 8;
            if data + size as u64 > self.file_len {
                tracing::warn!("Chunk at {} runs past end of file, stopping scan", pos);
                break;
            }

            if let Some(kind) = ChunkKind::from_tag(fourcc.to_le_bytes()) {
                if let Ok(offset) = u32::try_from(data) {
                    index.push(kind, ChunkRef { offset, size });
                }
            }

            pos = data + padded(size);
        }

        index
    }

    fn chunk_header_at(&mut self, pos: u64) -> io::Result<(u32, u32)> {
        self.reader.seek(SeekFrom::Start(pos))?;
        let fourcc = read_u32_le(self.reader)?;
        let size = read_u32_le(self.reader)?;
        Ok((fourcc, size))
    }
}

// ============================================================================
// Index Cross-Check
// ============================================================================

/// Differences between an idx1-derived index and a fresh scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDiscrepancy {
    pub indexed_frames: usize,
    pub scanned_frames: usize,
    pub indexed_audio_chunks: usize,
    pub scanned_audio_chunks: usize,
    pub indexed_audio_bytes: u64,
    pub scanned_audio_bytes: u64,
}

/// Compare `index` with a scan of the same file.
///
/// The scan is treated as ground truth for reporting only. Callers decide
/// what to do with a mismatch.
pub fn cross_check<R: Read + Seek>(
    reader: &mut R,
    index: &ContainerIndex,
) -> Result<Option<IndexDiscrepancy>, ContainerError> {
    let scanned = build_index(reader, IndexMode::ScanOnly)?.index;

    let same_sizes = |a: &[ChunkRef], b: &[ChunkRef]| {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.size == y.size)
    };
    if same_sizes(&index.video_frames, &scanned.video_frames)
        && same_sizes(&index.audio_chunks, &scanned.audio_chunks)
    {
        return Ok(None);
    }

    Ok(Some(IndexDiscrepancy {
        indexed_frames: index.video_frames.len(),
        scanned_frames: scanned.video_frames.len(),
        indexed_audio_chunks: index.audio_chunks.len(),
        scanned_audio_chunks: scanned.audio_chunks.len(),
        indexed_audio_bytes: index.audio_bytes(),
        scanned_audio_bytes: scanned.audio_bytes(),
    }))
}

// ============================================================================
// Probe
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub video: VideoDescriptor,
    pub audio: Option<AudioDescriptor>,
    pub total_frames: usize,
    pub audio_chunks: usize,
    pub audio_bytes: u64,
    pub duration_secs: f64,
    pub index_source: IndexSource,
}

pub fn avi_probe(path: impl AsRef<Path>) -> Result<ProbeReport, ContainerError> {
    let mut reader = BufReader::new(File::open(path)?);
    let opened = build_index(&mut reader, IndexMode::Auto)?;
    let video = opened.streams.video;
    let total_frames = opened.index.total_frames();

    Ok(ProbeReport {
        duration_secs: total_frames as f64 / video.declared_fps as f64,
        video,
        audio: opened.streams.audio,
        total_frames,
        audio_chunks: opened.index.audio_chunks.len(),
        audio_bytes: opened.index.audio_bytes(),
        index_source: opened.index.source,
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

fn padded(size: u32) -> u64 {
    size as u64 + (size & 1) as u64
}

fn probe<R: Read + Seek, const N: usize>(reader: &mut R, pos: u64) -> Option<[u8; N]> {
    reader.seek(SeekFrom::Start(pos)).ok()?;
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).ok()?;
    Some(buf)
}

fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_fourcc<R: Read>(reader: &mut R) -> io::Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub fn fourcc_to_string(fourcc: [u8; 4]) -> String {
    fourcc
        .iter()
        .filter(|&&b| b.is_ascii_graphic() || b == b' ')
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}
