//! # Frame Decode Dispatcher
//!
//! Fetches one compressed frame through the index and routes it down the
//! MJPEG or MPEG-4 path. Pixels are drawn into a back buffer that is only
//! swapped with the visible framebuffer once the whole frame succeeded, so
//! a failed decode never shows a partial picture.

use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;

use crate::avi_demux::{ChunkRef, VideoCodec, VideoDescriptor};
use crate::engine::{EngineError, EngineFactory, JpegEngine, JpegSink, Mpeg4Engine, PictureKind};
use crate::framebuffer::{Framebuffer, Placement, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::pixel_convert::{yuv420_to_rgb565, ColorMode, VideoRange, YuvPicture};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Frame {index} out of range ({total} frames)")]
    OutOfRange { index: usize, total: usize },
    #[error("Frame {0} is empty")]
    EmptyFrame(usize),
    #[error("Frame of {size} bytes exceeds the {max}-byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("JPEG start-of-image marker missing")]
    MissingSoi,
    #[error("Decoder produced no picture")]
    NoPicture,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Frame read failed: {0}")]
    Io(#[from] io::Error),
}

/// Presentation settings applied on the way into the framebuffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Look {
    pub color_mode: ColorMode,
    pub range: VideoRange,
}

// ============================================================================
// Decode Paths
// ============================================================================

enum VideoPath {
    Mjpeg(Box<dyn JpegEngine>),
    Mpeg4(Mpeg4Workspace),
}

/// MPEG-4 engine plus its planes. Created on first use.
///
/// The engine writes into `scratch`; `picture` only ever holds a complete
/// decoded picture.
struct Mpeg4Workspace {
    engine: Option<Box<dyn Mpeg4Engine>>,
    picture: YuvPicture,
    scratch: YuvPicture,
    /// Size of the pictures the engine currently produces.
    coded: (usize, usize),
    declared: (usize, usize),
    primed: bool,
    has_picture: bool,
    warned: bool,
}

impl Mpeg4Workspace {
    fn new(video: &VideoDescriptor) -> Self {
        let declared = if video.width == 0 || video.height == 0 {
            (DISPLAY_WIDTH, DISPLAY_HEIGHT)
        } else {
            (video.width as usize, video.height as usize)
        };
        Self {
            engine: None,
            picture: YuvPicture::new(0, 0),
            scratch: YuvPicture::new(0, 0),
            coded: declared,
            declared,
            primed: false,
            has_picture: false,
            warned: false,
        }
    }

    fn reset(&mut self) {
        self.engine = None;
        self.primed = false;
        self.has_picture = false;
    }

    fn decode(
        &mut self,
        frame: &[u8],
        extra_data: &[u8],
        engines: &dyn EngineFactory,
        max_loops: usize,
    ) -> Result<(), FrameDecodeError> {
        if self.engine.is_none() {
            let (width, height) = self.declared;
            match engines.mpeg4(width, height) {
                Ok(engine) => {
                    tracing::debug!("MPEG-4 engine created for {}x{}", width, height);
                    self.engine = Some(engine);
                    self.coded = (width, height);
                    self.primed = false;
                }
                Err(e) => {
                    if !self.warned {
                        tracing::warn!("MPEG-4 video cannot be shown: {}", e);
                        self.warned = true;
                    }
                    return Err(e.into());
                }
            }
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err(FrameDecodeError::NoPicture);
        };

        if !self.primed {
            self.primed = true;
            if !extra_data.is_empty() {
                if let Err(e) = engine.decode(extra_data, None) {
                    tracing::debug!("MPEG-4 extra data rejected: {}", e);
                }
            }
        }

        let mut pos = 0;
        for _ in 0..max_loops {
            if (self.scratch.width, self.scratch.height) != self.coded {
                self.scratch = YuvPicture::new(self.coded.0, self.coded.1);
            }
            let result = engine.decode(&frame[pos..], Some(&mut self.scratch))?;
            match result.kind {
                PictureKind::Picture => {
                    std::mem::swap(&mut self.picture, &mut self.scratch);
                    self.has_picture = true;
                    return Ok(());
                }
                PictureKind::Vol { width, height } => {
                    if (width, height) != self.coded {
                        tracing::debug!("MPEG-4 picture size now {}x{}", width, height);
                        self.coded = (width, height);
                    }
                }
                PictureKind::HeaderOnly => {}
            }

            pos += result.consumed.min(frame.len() - pos);
            if result.consumed == 0 || frame.len() - pos <= 4 {
                break;
            }
        }
        Err(FrameDecodeError::NoPicture)
    }
}

/// Routes JPEG pixels through the color mode into the back buffer.
struct PlacedSink<'a> {
    back: &'a mut Framebuffer,
    front: &'a Framebuffer,
    committed: Option<Placement>,
    color_mode: ColorMode,
    placement: Option<Placement>,
}

impl JpegSink for PlacedSink<'_> {
    fn begin(&mut self, width: usize, height: usize) {
        let placement = Placement::fit(width, height, self.front.width(), self.front.height());
        prepare_back(self.back, self.front, self.committed, &placement);
        self.placement = Some(placement);
    }

    fn put(&mut self, x: usize, y: usize, pixel: u16) {
        if let Some(p) = &self.placement {
            p.put(self.back, x, y, self.color_mode.apply_565(pixel, x, y));
        }
    }
}

/// Start the back buffer from the visible frame, or from black when the
/// source size changed.
fn prepare_back(back: &mut Framebuffer, front: &Framebuffer, committed: Option<Placement>, next: &Placement) {
    let same_source = committed.map_or(false, |p| {
        (p.source_width, p.source_height) == (next.source_width, next.source_height)
    });
    if same_source {
        back.copy_from(front);
    } else if (back.width(), back.height()) == (front.width(), front.height()) {
        back.clear();
    } else {
        *back = Framebuffer::new(front.width(), front.height());
    }
}

/// Cut the frame after its last EOI marker, or append one.
pub fn terminate_jpeg(frame: &mut Vec<u8>) {
    match frame.windows(2).rposition(|w| w == JPEG_EOI) {
        Some(pos) => frame.truncate(pos + 2),
        None => frame.extend_from_slice(&JPEG_EOI),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct FrameDispatcher {
    path: VideoPath,
    extra_data: Vec<u8>,
    back: Framebuffer,
    placement: Option<Placement>,
    frame: Vec<u8>,
    max_frame_bytes: usize,
    max_header_loops: usize,
    last_shown: Option<usize>,
}

impl FrameDispatcher {
    pub fn new(
        video: &VideoDescriptor,
        engines: &dyn EngineFactory,
        max_frame_bytes: usize,
        max_header_loops: usize,
    ) -> Self {
        let path = match video.codec {
            VideoCodec::Mjpeg => VideoPath::Mjpeg(engines.jpeg()),
            VideoCodec::Mpeg4 => VideoPath::Mpeg4(Mpeg4Workspace::new(video)),
        };
        Self {
            path,
            extra_data: video.extra_data.clone(),
            back: Framebuffer::display(),
            placement: None,
            frame: Vec::new(),
            max_frame_bytes,
            max_header_loops: max_header_loops.max(1),
            last_shown: None,
        }
    }

    pub fn codec(&self) -> VideoCodec {
        match self.path {
            VideoPath::Mjpeg(_) => VideoCodec::Mjpeg,
            VideoPath::Mpeg4(_) => VideoCodec::Mpeg4,
        }
    }

    /// Where the current picture sits on the display.
    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub fn last_shown(&self) -> Option<usize> {
        self.last_shown
    }

    /// Forget codec state so the next frame starts as if freshly opened.
    pub fn reset(&mut self) {
        if let VideoPath::Mpeg4(ws) = &mut self.path {
            ws.reset();
        }
    }

    fn fetch<R: Read + Seek>(&mut self, reader: &mut R, frames: &[ChunkRef], index: usize) -> Result<(), FrameDecodeError> {
        let chunk = frames.get(index).copied().ok_or(FrameDecodeError::OutOfRange {
            index,
            total: frames.len(),
        })?;
        let size = chunk.size as usize;
        if size == 0 {
            return Err(FrameDecodeError::EmptyFrame(index));
        }
        if size > self.max_frame_bytes {
            return Err(FrameDecodeError::TooLarge {
                size,
                max: self.max_frame_bytes,
            });
        }

        self.frame.resize(size, 0);
        reader.seek(SeekFrom::Start(chunk.offset as u64))?;
        reader.read_exact(&mut self.frame)?;
        Ok(())
    }

    fn present(&mut self, front: &mut Framebuffer, placement: Placement) {
        std::mem::swap(&mut self.back, front);
        self.placement = Some(placement);
    }

    /// Decode `index` into `front`. On error `front` is left untouched.
    pub fn decode_frame<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        frames: &[ChunkRef],
        index: usize,
        look: Look,
        engines: &dyn EngineFactory,
        front: &mut Framebuffer,
    ) -> Result<(), FrameDecodeError> {
        self.fetch(reader, frames, index)?;

        let placement = match &mut self.path {
            VideoPath::Mjpeg(engine) => {
                if !self.frame.starts_with(&JPEG_SOI) {
                    return Err(FrameDecodeError::MissingSoi);
                }
                terminate_jpeg(&mut self.frame);

                let mut sink = PlacedSink {
                    back: &mut self.back,
                    front,
                    committed: self.placement,
                    color_mode: look.color_mode,
                    placement: None,
                };
                engine.decode(&self.frame, &mut sink)?;
                sink.placement.ok_or(FrameDecodeError::NoPicture)?
            }
            VideoPath::Mpeg4(ws) => {
                ws.decode(&self.frame, &self.extra_data, engines, self.max_header_loops)?;
                let placement = Placement::fit(ws.picture.width, ws.picture.height, front.width(), front.height());
                prepare_back(&mut self.back, front, self.placement, &placement);
                yuv420_to_rgb565(&ws.picture, look.range, look.color_mode, &placement, &mut self.back);
                placement
            }
        };

        self.present(front, placement);
        self.last_shown = Some(index);
        Ok(())
    }

    /// Show the last picture again under a new look. MJPEG re-decodes the
    /// frame; MPEG-4 reconverts the retained planes. Returns false when
    /// nothing has been shown yet.
    pub fn redraw<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        frames: &[ChunkRef],
        look: Look,
        engines: &dyn EngineFactory,
        front: &mut Framebuffer,
    ) -> Result<bool, FrameDecodeError> {
        if let VideoPath::Mpeg4(ws) = &self.path {
            if !ws.has_picture {
                return Ok(false);
            }
            let placement = Placement::fit(ws.picture.width, ws.picture.height, front.width(), front.height());
            prepare_back(&mut self.back, front, self.placement, &placement);
            yuv420_to_rgb565(&ws.picture, look.range, look.color_mode, &placement, &mut self.back);
            self.present(front, placement);
            return Ok(true);
        }

        match self.last_shown {
            Some(index) => self.decode_frame(reader, frames, index, look, engines, front).map(|_| true),
            None => Ok(false),
        }
    }
}
