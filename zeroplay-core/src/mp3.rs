// MP3 - frame header parsing and the default MP3 engine
//
// AVI stores MP3 as one frame per audio chunk, without a container that
// symphonia's format readers would understand. The engine therefore finds
// frame sync itself, cuts exactly one frame out of the staging bytes and
// hands it to symphonia's MPEG audio decoder as a raw packet.

#[cfg(feature = "mp3")]
use symphonia::core::audio::SampleBuffer;
#[cfg(feature = "mp3")]
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
#[cfg(feature = "mp3")]
use symphonia::core::errors::Error as SymphoniaError;
#[cfg(feature = "mp3")]
use symphonia::core::formats::Packet;

#[cfg(feature = "mp3")]
use crate::engine::{EngineError, Mp3Decode, Mp3Engine, Mp3Status, Mp3StreamInfo};

// ============================================================================
// Frame Header
// ============================================================================

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Parsed 4-byte MPEG audio Layer III header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub padding: bool,
}

impl FrameHeader {
    /// `None` unless the bytes are a Layer III header with a fixed bitrate.
    pub fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < 4 || b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (b[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        if (b[1] >> 1) & 0x03 != 0b01 {
            return None;
        }

        let bitrate_index = (b[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let rate_index = ((b[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }

        let (bitrate_kbps, base_rates) = match version {
            MpegVersion::Mpeg1 => (BITRATES_V1_L3[bitrate_index], [44_100, 48_000, 32_000]),
            MpegVersion::Mpeg2 => (BITRATES_V2_L3[bitrate_index], [22_050, 24_000, 16_000]),
            MpegVersion::Mpeg25 => (BITRATES_V2_L3[bitrate_index], [11_025, 12_000, 8_000]),
        };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate: base_rates[rate_index],
            channels: if b[3] >> 6 == 0b11 { 1 } else { 2 },
            padding: (b[2] >> 1) & 0x01 == 1,
        })
    }

    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }

    /// Frame length in bytes including the header.
    pub fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        (coefficient * self.bitrate_kbps * 1000 / self.sample_rate) as usize + self.padding as usize
    }
}

/// Samples per frame assumed when seeking by sample rate alone.
pub fn samples_per_frame_for_rate(sample_rate: u32) -> u32 {
    if sample_rate >= 32_000 {
        1152
    } else {
        576
    }
}

/// First offset holding a plausible frame header.
pub fn find_sync(data: &[u8]) -> Option<(usize, FrameHeader)> {
    (0..data.len().saturating_sub(3)).find_map(|i| FrameHeader::parse(&data[i..]).map(|h| (i, h)))
}

// ============================================================================
// Symphonia Engine
// ============================================================================

#[cfg(feature = "mp3")]
pub struct SymphoniaMp3Engine {
    decoder: Box<dyn Decoder>,
    sample_buf: Option<SampleBuffer<i16>>,
    buf_frames: usize,
    buf_layout: (u32, usize),
    info: Option<Mp3StreamInfo>,
    ts: u64,
}

#[cfg(feature = "mp3")]
impl SymphoniaMp3Engine {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            decoder: Self::make_decoder()?,
            sample_buf: None,
            buf_frames: 0,
            buf_layout: (0, 0),
            info: None,
            ts: 0,
        })
    }

    fn make_decoder() -> Result<Box<dyn Decoder>, EngineError> {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| EngineError::Failed(format!("Failed to create MP3 decoder: {}", e)))
    }

    fn status(status: Mp3Status, consumed: usize) -> Mp3Decode {
        Mp3Decode { status, consumed }
    }
}

#[cfg(feature = "mp3")]
impl Mp3Engine for SymphoniaMp3Engine {
    fn decode(&mut self, input: &[u8], pcm: &mut Vec<i16>) -> Mp3Decode {
        pcm.clear();

        let header = match find_sync(input) {
            Some((0, header)) => header,
            Some((skip, _)) => return Self::status(Mp3Status::RecoverableError, skip),
            None => {
                // Keep a possible partial header at the tail.
                let junk = input.len().saturating_sub(3);
                return if junk == 0 {
                    Self::status(Mp3Status::NeedMoreInput, 0)
                } else {
                    Self::status(Mp3Status::RecoverableError, junk)
                };
            }
        };

        let frame_len = header.frame_len();
        if input.len() < frame_len {
            return Self::status(Mp3Status::NeedMoreInput, 0);
        }

        let samples = header.samples_per_frame() as u64;
        let packet = Packet::new_from_slice(0, self.ts, samples, &input[..frame_len]);
        self.ts += samples;

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.capacity();
                let layout = (spec.rate, spec.channels.count());

                if self.sample_buf.is_none() || frames > self.buf_frames || layout != self.buf_layout {
                    self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
                    self.buf_frames = frames;
                    self.buf_layout = layout;
                }

                if let Some(buf) = self.sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    pcm.extend_from_slice(buf.samples());
                }
                self.info = Some(Mp3StreamInfo {
                    sample_rate: layout.0,
                    channels: layout.1 as u16,
                });
                Self::status(Mp3Status::Ok, frame_len)
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("MP3 frame rejected: {}", e);
                Self::status(Mp3Status::RecoverableError, frame_len)
            }
            Err(SymphoniaError::IoError(e)) => {
                // Usually an empty bit reservoir right after a reset.
                tracing::debug!("MP3 frame short of main data: {}", e);
                Self::status(Mp3Status::RecoverableError, frame_len)
            }
            Err(SymphoniaError::ResetRequired) => match Self::make_decoder() {
                Ok(decoder) => {
                    self.decoder = decoder;
                    Self::status(Mp3Status::RecoverableError, frame_len)
                }
                Err(_) => Self::status(Mp3Status::Fatal, 0),
            },
            Err(e) => {
                tracing::warn!("MP3 decoder failed: {}", e);
                Self::status(Mp3Status::Fatal, 0)
            }
        }
    }

    fn stream_info(&self) -> Option<Mp3StreamInfo> {
        self.info
    }
}
