//! # Codec Engines
//!
//! Bitstream decompression is delegated to black-box engines behind these
//! traits. The session asks an [`EngineFactory`] for fresh instances when a
//! file is opened, when the first MPEG-4 frame arrives, and whenever MP3
//! state has to be thrown away after a seek.
//!
//! Default engines:
//! - JPEG: `image` crate baseline decoder
//! - MP3: symphonia (with the `mp3` feature)
//! - MPEG-4 Part 2: none, the host must supply one

use thiserror::Error;

use crate::pixel_convert::YuvPicture;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No engine available for {0}")]
    Unavailable(String),
    #[error("Decode failed: {0}")]
    Failed(String),
}

// ============================================================================
// JPEG
// ============================================================================

/// Receives decoded pixels from a JPEG engine.
pub trait JpegSink {
    /// Called once with the picture size before any pixel.
    fn begin(&mut self, width: usize, height: usize);
    /// One RGB565 pixel at picture coordinates.
    fn put(&mut self, x: usize, y: usize, pixel: u16);
}

pub trait JpegEngine: Send {
    /// Decode a complete JPEG (SOI through EOI) into `sink`.
    fn decode(&mut self, jpeg: &[u8], sink: &mut dyn JpegSink) -> Result<(), EngineError>;
}

// ============================================================================
// MPEG-4 Part 2
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureKind {
    /// Header units only, nothing to show yet.
    HeaderOnly,
    /// Video object layer header announcing the coded size.
    Vol { width: usize, height: usize },
    /// A displayable picture was written to the output planes.
    Picture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mpeg4Decode {
    pub consumed: usize,
    pub kind: PictureKind,
}

pub trait Mpeg4Engine: Send {
    /// Feed bitstream bytes. With `output == None` the call only primes
    /// internal state (codec extra data) and must not produce pixels.
    fn decode(
        &mut self,
        bitstream: &[u8],
        output: Option<&mut YuvPicture>,
    ) -> Result<Mpeg4Decode, EngineError>;
}

// ============================================================================
// MP3
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mp3Status {
    Ok,
    NeedMoreInput,
    RecoverableError,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Decode {
    pub status: Mp3Status,
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

pub trait Mp3Engine: Send {
    /// Decode at most one frame from the front of `input`, replacing the
    /// contents of `pcm` with interleaved samples.
    fn decode(&mut self, input: &[u8], pcm: &mut Vec<i16>) -> Mp3Decode;

    /// Rate and channel count, known after the first successful decode.
    fn stream_info(&self) -> Option<Mp3StreamInfo>;
}

// ============================================================================
// Factory
// ============================================================================

pub trait EngineFactory: Send + Sync {
    fn jpeg(&self) -> Box<dyn JpegEngine>;

    /// `width`/`height` are the declared stream size (or a default).
    fn mpeg4(&self, width: usize, height: usize) -> Result<Box<dyn Mpeg4Engine>, EngineError>;

    fn mp3(&self) -> Result<Box<dyn Mp3Engine>, EngineError>;
}

/// Engines backed by crates in the dependency tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEngines;

impl EngineFactory for DefaultEngines {
    fn jpeg(&self) -> Box<dyn JpegEngine> {
        Box::new(crate::jpeg::ImageJpegEngine::new())
    }

    fn mpeg4(&self, _width: usize, _height: usize) -> Result<Box<dyn Mpeg4Engine>, EngineError> {
        Err(EngineError::Unavailable("MPEG-4 Part 2".to_string()))
    }

    #[cfg(feature = "mp3")]
    fn mp3(&self) -> Result<Box<dyn Mp3Engine>, EngineError> {
        Ok(Box::new(crate::mp3::SymphoniaMp3Engine::new()?))
    }

    #[cfg(not(feature = "mp3"))]
    fn mp3(&self) -> Result<Box<dyn Mp3Engine>, EngineError> {
        Err(EngineError::Unavailable("MP3 (built without the mp3 feature)".to_string()))
    }
}
