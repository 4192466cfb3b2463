//! Audio Decode Adapters
//!
//! Turn raw AVI audio chunks into PCM ready for the ring. One variant per
//! source format, each holding only the state it needs. Every refill call
//! is bounded so a slow stream never stalls the frame loop.

use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;

use crate::adpcm::AdpcmDecoder;
use crate::avi_demux::{AudioDescriptor, AudioFormat, ChunkRef};
use crate::engine::{EngineFactory, Mp3Engine, Mp3Status, Mp3StreamInfo};
use crate::ring::AudioRing;

/// Largest single read for PCM pass-through.
pub const PCM_READ_SIZE: usize = 4096;

const ADPCM_MAX_ITERATIONS: usize = 500;
const ADPCM_MAX_SHORT_SKIPS: usize = 100;

pub const MP3_STAGING_SIZE: usize = 8192;
const MP3_LOW_WATER: usize = 2048;
const MP3_MAX_ERRORS: usize = 100;
/// One MPEG-1 frame of stereo 16-bit output.
pub const MP3_MAX_FRAME_BYTES: usize = 1152 * 2 * 2;

#[derive(Debug, Error)]
pub enum AudioDecodeError {
    #[error("ADPCM block of {len} bytes is shorter than its {needed}-byte header")]
    ShortBlock { len: usize, needed: usize },
    #[error("MP3 decode failed: {0}")]
    Mp3(String),
    #[error("Audio read failed: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Chunk Cursor
// ============================================================================

/// Read position in the audio chunk table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCursor {
    pub chunk: usize,
    /// Byte offset inside `chunk`.
    pub offset: u32,
}

impl ChunkCursor {
    pub fn new(chunk: usize, offset: u32) -> Self {
        Self { chunk, offset }
    }

    /// Step over exhausted and empty chunks. False once past the last one.
    fn settle(&mut self, chunks: &[ChunkRef]) -> bool {
        while let Some(c) = chunks.get(self.chunk) {
            if self.offset < c.size {
                return true;
            }
            self.chunk += 1;
            self.offset = 0;
        }
        false
    }

    fn remaining(&self, chunks: &[ChunkRef]) -> usize {
        chunks
            .get(self.chunk)
            .map_or(0, |c| c.size.saturating_sub(self.offset) as usize)
    }

    fn advance(&mut self, n: usize) {
        self.offset += n as u32;
    }

    fn skip_chunk(&mut self) {
        self.chunk += 1;
        self.offset = 0;
    }

    pub fn is_finished(&self, chunks: &[ChunkRef]) -> bool {
        let mut probe = *self;
        !probe.settle(chunks)
    }

    /// Fill `buf` from the current position. The cursor is not moved.
    fn read<R: Read + Seek>(&self, reader: &mut R, chunks: &[ChunkRef], buf: &mut [u8]) -> io::Result<()> {
        let chunk = chunks
            .get(self.chunk)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "past last audio chunk"))?;
        reader.seek(SeekFrom::Start(chunk.offset as u64 + self.offset as u64))?;
        reader.read_exact(buf)
    }
}

/// Counters reported through the statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub units_decoded: u64,
    pub decode_errors: u64,
}

/// Where refills read from: the file and its audio chunk table.
pub struct AudioSource<'a, R> {
    pub reader: &'a mut R,
    pub chunks: &'a [ChunkRef],
}

// ============================================================================
// Adapters
// ============================================================================

pub enum AudioAdapter {
    Pcm(PcmAdapter),
    Adpcm(AdpcmAdapter),
    Mp3(Mp3Adapter),
}

impl AudioAdapter {
    pub fn for_stream(desc: &AudioDescriptor, engines: &dyn EngineFactory) -> Self {
        match desc.format {
            AudioFormat::Pcm => AudioAdapter::Pcm(PcmAdapter::new()),
            AudioFormat::Adpcm => AudioAdapter::Adpcm(AdpcmAdapter::new(desc)),
            AudioFormat::Mp3 => AudioAdapter::Mp3(Mp3Adapter::new(engines)),
        }
    }

    /// Decode into `ring` until it is full, the stream ends, or `budget`
    /// bytes were produced. Returns the bytes produced.
    pub fn refill<R: Read + Seek>(
        &mut self,
        source: &mut AudioSource<'_, R>,
        cursor: &mut ChunkCursor,
        ring: &mut AudioRing,
        budget: usize,
        stats: &mut AudioStats,
    ) -> usize {
        match self {
            AudioAdapter::Pcm(a) => a.refill(source, cursor, ring, budget, stats),
            AudioAdapter::Adpcm(a) => a.refill(source, cursor, ring, budget, stats),
            AudioAdapter::Mp3(a) => a.refill(source, cursor, ring, budget, stats),
        }
    }

    /// Drop decoder state that cannot survive a position jump.
    pub fn reset(&mut self, engines: &dyn EngineFactory) {
        if let AudioAdapter::Mp3(a) = self {
            a.reset(engines);
        }
    }

    /// Rate and channels reported by the MP3 engine, once known.
    pub fn detected(&self) -> Option<Mp3StreamInfo> {
        match self {
            AudioAdapter::Mp3(a) => a.detected,
            _ => None,
        }
    }

    pub fn is_mp3(&self) -> bool {
        matches!(self, AudioAdapter::Mp3(_))
    }
}

// ----------------------------------------------------------------------------
// PCM
// ----------------------------------------------------------------------------

pub struct PcmAdapter {
    scratch: Vec<u8>,
}

impl PcmAdapter {
    fn new() -> Self {
        Self {
            scratch: vec![0; PCM_READ_SIZE],
        }
    }

    fn refill<R: Read + Seek>(
        &mut self,
        source: &mut AudioSource<'_, R>,
        cursor: &mut ChunkCursor,
        ring: &mut AudioRing,
        budget: usize,
        stats: &mut AudioStats,
    ) -> usize {
        let mut produced = 0;
        while produced < budget && cursor.settle(source.chunks) {
            let n = cursor
                .remaining(source.chunks)
                .min(ring.free())
                .min(PCM_READ_SIZE)
                .min(budget - produced);
            if n == 0 {
                break;
            }

            let buf = &mut self.scratch[..n];
            if let Err(e) = cursor.read(source.reader, source.chunks, buf) {
                tracing::debug!("PCM read stalled at chunk {}: {}", cursor.chunk, e);
                break;
            }
            ring.push(buf);
            cursor.advance(n);
            produced += n;
            stats.units_decoded += 1;
        }
        produced
    }
}

// ----------------------------------------------------------------------------
// MS-ADPCM
// ----------------------------------------------------------------------------

pub struct AdpcmAdapter {
    decoder: AdpcmDecoder,
    block_align: usize,
    block: Vec<u8>,
    pcm: Vec<i16>,
    bytes: Vec<u8>,
}

impl AdpcmAdapter {
    fn new(desc: &AudioDescriptor) -> Self {
        Self {
            decoder: AdpcmDecoder::new(desc.channels),
            block_align: (desc.block_align as usize).max(1),
            block: Vec::new(),
            pcm: Vec::new(),
            bytes: Vec::new(),
        }
    }

    /// Decoded size of a block of `len` bytes.
    fn decoded_bytes(&self, len: usize) -> usize {
        let ch = self.decoder.channels();
        let frames = 2 + (len - self.decoder.header_len()) * 2 / ch;
        frames * ch * 2
    }

    fn refill<R: Read + Seek>(
        &mut self,
        source: &mut AudioSource<'_, R>,
        cursor: &mut ChunkCursor,
        ring: &mut AudioRing,
        budget: usize,
        stats: &mut AudioStats,
    ) -> usize {
        let mut produced = 0;
        let mut short_skips = 0;

        for _ in 0..ADPCM_MAX_ITERATIONS {
            if produced >= budget || !cursor.settle(source.chunks) {
                break;
            }

            // Blocks never straddle chunks; the chunk tail is a short block.
            let len = self.block_align.min(cursor.remaining(source.chunks));
            if len < self.decoder.header_len() {
                stats.decode_errors += 1;
                short_skips += 1;
                tracing::debug!("Skipping {}-byte ADPCM tail in chunk {}", len, cursor.chunk);
                cursor.skip_chunk();
                if short_skips >= ADPCM_MAX_SHORT_SKIPS {
                    break;
                }
                continue;
            }
            if ring.free() < self.decoded_bytes(len) {
                break;
            }

            self.block.resize(len, 0);
            if let Err(e) = cursor.read(source.reader, source.chunks, &mut self.block) {
                tracing::debug!("ADPCM read stalled at chunk {}: {}", cursor.chunk, e);
                break;
            }

            self.pcm.clear();
            if let Err(e) = self.decoder.decode_block(&self.block, &mut self.pcm) {
                stats.decode_errors += 1;
                tracing::debug!("ADPCM block skipped: {}", e);
                cursor.advance(len);
                continue;
            }

            self.bytes.clear();
            self.bytes.extend(self.pcm.iter().flat_map(|s| s.to_le_bytes()));
            ring.push(&self.bytes);
            cursor.advance(len);
            produced += self.bytes.len();
            stats.units_decoded += 1;
        }
        produced
    }
}

// ----------------------------------------------------------------------------
// MP3
// ----------------------------------------------------------------------------

pub struct Mp3Adapter {
    engine: Option<Box<dyn Mp3Engine>>,
    staging: Vec<u8>,
    pcm: Vec<i16>,
    bytes: Vec<u8>,
    detected: Option<Mp3StreamInfo>,
}

impl Mp3Adapter {
    fn new(engines: &dyn EngineFactory) -> Self {
        Self {
            engine: Self::create_engine(engines),
            staging: Vec::with_capacity(MP3_STAGING_SIZE),
            pcm: Vec::new(),
            bytes: Vec::new(),
            detected: None,
        }
    }

    fn create_engine(engines: &dyn EngineFactory) -> Option<Box<dyn Mp3Engine>> {
        match engines.mp3() {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::warn!("MP3 audio disabled: {}", e);
                None
            }
        }
    }

    /// Throw away the engine and staged bytes. The detected format is kept,
    /// it belongs to the stream rather than the engine instance.
    fn reset(&mut self, engines: &dyn EngineFactory) {
        self.staging.clear();
        self.engine = Self::create_engine(engines);
    }

    fn refill<R: Read + Seek>(
        &mut self,
        source: &mut AudioSource<'_, R>,
        cursor: &mut ChunkCursor,
        ring: &mut AudioRing,
        budget: usize,
        stats: &mut AudioStats,
    ) -> usize {
        let Some(engine) = self.engine.as_mut() else {
            return 0;
        };

        let mut produced = 0;
        let mut errors = 0;
        while produced < budget && ring.free() >= MP3_MAX_FRAME_BYTES {
            if self.staging.len() < MP3_LOW_WATER {
                top_up(&mut self.staging, source, cursor);
            }
            if self.staging.is_empty() {
                break;
            }

            let result = engine.decode(&self.staging, &mut self.pcm);
            match result.status {
                Mp3Status::Ok => {
                    errors = 0;
                    consume(&mut self.staging, result.consumed);
                    if let Some(info) = engine.stream_info() {
                        if self.detected != Some(info) {
                            tracing::info!("MP3 stream: {} Hz, {} ch", info.sample_rate, info.channels);
                        }
                        self.detected = Some(info);
                    }

                    let mono = self.detected.map_or(false, |i| i.channels == 1);
                    self.bytes.clear();
                    for s in &self.pcm {
                        self.bytes.extend_from_slice(&s.to_le_bytes());
                        if mono {
                            self.bytes.extend_from_slice(&s.to_le_bytes());
                        }
                    }
                    ring.push(&self.bytes);
                    produced += self.bytes.len();
                    stats.units_decoded += 1;
                }
                Mp3Status::NeedMoreInput => {
                    consume(&mut self.staging, result.consumed);
                    if top_up(&mut self.staging, source, cursor) == 0 {
                        break;
                    }
                }
                Mp3Status::RecoverableError => {
                    consume(&mut self.staging, result.consumed.max(1));
                    stats.decode_errors += 1;
                    errors += 1;
                    if errors >= MP3_MAX_ERRORS {
                        tracing::debug!("MP3 refill gave up after {} errors", errors);
                        break;
                    }
                }
                Mp3Status::Fatal => {
                    stats.decode_errors += 1;
                    tracing::debug!(
                        "{}",
                        AudioDecodeError::Mp3(format!("fatal status at chunk {}", cursor.chunk))
                    );
                    break;
                }
            }
        }
        produced
    }
}

/// Append chunk bytes until the staging buffer is full or the stream ends.
fn top_up<R: Read + Seek>(staging: &mut Vec<u8>, source: &mut AudioSource<'_, R>, cursor: &mut ChunkCursor) -> usize {
    let mut added = 0;
    while staging.len() < MP3_STAGING_SIZE && cursor.settle(source.chunks) {
        let n = cursor
            .remaining(source.chunks)
            .min(MP3_STAGING_SIZE - staging.len());
        let start = staging.len();
        staging.resize(start + n, 0);
        if let Err(e) = cursor.read(source.reader, source.chunks, &mut staging[start..]) {
            tracing::debug!("MP3 read stalled at chunk {}: {}", cursor.chunk, e);
            staging.truncate(start);
            break;
        }
        cursor.advance(n);
        added += n;
    }
    added
}

fn consume(staging: &mut Vec<u8>, n: usize) {
    let n = n.min(staging.len());
    staging.drain(..n);
}
