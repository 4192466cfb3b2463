//! Host-facing player. Owns at most one session and survives failed opens.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::avi_demux::{ContainerError, StreamDescriptor};
use crate::config::SessionConfig;
use crate::decode::Look;
use crate::engine::{DefaultEngines, EngineFactory};
use crate::framebuffer::Framebuffer;
use crate::pixel_convert::{ColorMode, VideoRange};
use crate::session::{FileSession, InputSnapshot, PlaybackStats, TickOutput};

pub struct Player {
    session: Option<FileSession>,
    path: Option<PathBuf>,
    engines: Arc<dyn EngineFactory>,
    config: SessionConfig,
    look: Look,
    idle: Framebuffer,
}

impl Player {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_engines(config, Arc::new(DefaultEngines))
    }

    pub fn with_engines(config: SessionConfig, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            session: None,
            path: None,
            engines,
            look: config.look(),
            config,
            idle: Framebuffer::display(),
        }
    }

    /// Open `path`. When this fails the previous file keeps playing.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), ContainerError> {
        let path = path.as_ref();
        let mut config = self.config.clone();
        config.color_mode = self.look.color_mode.index() as u8;
        config.video_range = self.look.range.index() as u8;

        match FileSession::open(path, &config, self.engines.clone()) {
            Ok(session) => {
                self.session = Some(session);
                self.path = Some(path.to_path_buf());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Could not open {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        self.session = None;
        self.path = None;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// One display tick. Without a file the screen stays black and silent.
    pub fn tick(&mut self, input: &InputSnapshot) -> TickOutput<'_> {
        match self.session.as_mut() {
            Some(session) => session.tick(input),
            None => TickOutput {
                framebuffer: &self.idle,
                audio: &[],
            },
        }
    }

    /// The picture currently on screen.
    pub fn framebuffer(&self) -> &Framebuffer {
        self.session.as_ref().map_or(&self.idle, |s| s.framebuffer())
    }

    pub fn seek(&mut self, frame: i64) {
        if let Some(session) = self.session.as_mut() {
            session.seek(frame);
        }
    }

    pub fn restart(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.restart();
        }
    }

    pub fn streams(&self) -> Option<&StreamDescriptor> {
        self.session.as_ref().map(|s| s.streams())
    }

    pub fn current_frame(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.current_frame())
    }

    pub fn total_frames(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.total_frames())
    }

    pub fn color_mode(&self) -> ColorMode {
        self.look.color_mode
    }

    pub fn video_range(&self) -> VideoRange {
        self.look.range
    }

    /// Kept across files, applied to the open one immediately.
    pub fn set_color_mode(&mut self, mode: ColorMode) {
        self.look.color_mode = mode;
        if let Some(session) = self.session.as_mut() {
            session.set_color_mode(mode);
        }
    }

    pub fn set_video_range(&mut self, range: VideoRange) {
        self.look.range = range;
        if let Some(session) = self.session.as_mut() {
            session.set_video_range(range);
        }
    }

    pub fn stats(&self) -> Option<PlaybackStats> {
        self.session.as_ref().map(|s| s.stats())
    }
}
