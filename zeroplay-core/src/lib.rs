//! # ZeroPlay Core
//!
//! Single-frame AVI playback for small devices: MJPEG and MPEG-4 video on a
//! fixed 320x240 RGB565 display, with PCM, MS-ADPCM or MP3 audio kept in
//! step with the frame on screen.

// ============================================================================
// Container
// ============================================================================
pub mod avi_demux;

// ============================================================================
// Video
// ============================================================================
pub mod framebuffer;
pub mod pixel_convert;
pub mod engine;
pub mod jpeg;
pub mod decode;

// ============================================================================
// Audio
// ============================================================================
pub mod mp3;
pub mod adpcm;
pub mod audio;
pub mod ring;
pub mod sync;

// ============================================================================
// Playback
// ============================================================================
pub mod config;
pub mod session;
pub mod player;

#[cfg(test)]
mod testing;

pub use avi_demux::{avi_probe, ContainerError, ContainerIndex, ProbeReport, StreamDescriptor};
pub use config::{ConfigError, SessionConfig};
pub use decode::{FrameDecodeError, Look};
pub use engine::{DefaultEngines, EngineFactory};
pub use framebuffer::{Framebuffer, DISPLAY_HEIGHT, DISPLAY_WIDTH};
pub use pixel_convert::{ColorMode, VideoRange};
pub use player::Player;
pub use session::{FileSession, InputSnapshot, PlaybackSession, PlaybackStats, TickOutput};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
