//! # Playback Session
//!
//! One opened file: the index, stream descriptors, clock, framebuffer, ring
//! and codec state, driven one tick at a time by the host. Only `open` can
//! fail; everything after that absorbs errors and keeps the last good
//! picture on screen.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::avi_demux::{
    build_index, cross_check, ContainerError, ContainerIndex, IndexDiscrepancy, IndexMode, IndexSource,
    StreamDescriptor, VideoCodec,
};
use crate::config::SessionConfig;
use crate::decode::{FrameDispatcher, Look};
use crate::engine::EngineFactory;
use crate::framebuffer::Framebuffer;
use crate::pixel_convert::{ColorMode, VideoRange};
use crate::sync::{AudioSync, PlaybackClock};

const SKIP_SECONDS: i64 = 15;
const JUMP_SECONDS: i64 = 60;

/// Host button state for one tick. Actions fire on the press edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pub play_pause: bool,
    pub skip_back: bool,
    pub skip_forward: bool,
    pub jump_back: bool,
    pub jump_forward: bool,
}

impl InputSnapshot {
    /// Buttons down now that were up in `previous`.
    pub fn pressed_since(&self, previous: &InputSnapshot) -> InputSnapshot {
        InputSnapshot {
            play_pause: self.play_pause && !previous.play_pause,
            skip_back: self.skip_back && !previous.skip_back,
            skip_forward: self.skip_forward && !previous.skip_forward,
            jump_back: self.jump_back && !previous.jump_back,
            jump_forward: self.jump_forward && !previous.jump_forward,
        }
    }
}

/// What the host shows and plays after a tick.
#[derive(Debug)]
pub struct TickOutput<'a> {
    pub framebuffer: &'a Framebuffer,
    /// Interleaved stereo i16.
    pub audio: &'a [i16],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStats {
    pub current_frame: usize,
    pub total_frames: usize,
    pub paused: bool,
    pub ticks: u64,
    pub frames_decoded: u64,
    pub frame_decode_failures: u64,
    pub audio_units_decoded: u64,
    pub audio_decode_errors: u64,
    pub ring_fill_bytes: usize,
    pub samples_delivered: u64,
    pub effective_sample_rate: Option<u32>,
    pub detected_mp3_rate: Option<u32>,
    pub detected_mp3_channels: Option<u16>,
    pub index_source: String,
    pub index_discrepancy: Option<IndexDiscrepancy>,
    pub last_frame_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: u64,
    frames_decoded: u64,
    frame_failures: u64,
    last_frame_error: Option<String>,
}

pub struct PlaybackSession<R: Read + Seek = BufReader<File>> {
    reader: R,
    index: ContainerIndex,
    streams: StreamDescriptor,
    clock: PlaybackClock,
    dispatcher: FrameDispatcher,
    audio: Option<AudioSync>,
    framebuffer: Framebuffer,
    engines: Arc<dyn EngineFactory>,
    look: Look,
    paused: bool,
    previous_input: InputSnapshot,
    audio_out: Vec<i16>,
    discrepancy: Option<IndexDiscrepancy>,
    counters: Counters,
}

/// A session reading straight from a file on disk.
pub type FileSession = PlaybackSession<BufReader<File>>;

impl FileSession {
    pub fn open(
        path: impl AsRef<Path>,
        config: &SessionConfig,
        engines: Arc<dyn EngineFactory>,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref();
        tracing::info!("Opening {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader, config, engines)
    }
}

impl<R: Read + Seek> PlaybackSession<R> {
    pub fn from_reader(
        mut reader: R,
        config: &SessionConfig,
        engines: Arc<dyn EngineFactory>,
    ) -> Result<Self, ContainerError> {
        let opened = build_index(&mut reader, IndexMode::Auto)?;
        let video = &opened.streams.video;
        tracing::info!(
            "AVI: {} {}x{} @ {} fps, {} frames, index from {}",
            video.codec_tag,
            video.width,
            video.height,
            video.declared_fps,
            opened.index.total_frames(),
            opened.index.source.describe()
        );

        let mut discrepancy = None;
        if config.verify_index && matches!(opened.index.source, IndexSource::IndexChunk { .. }) {
            match cross_check(&mut reader, &opened.index) {
                Ok(Some(d)) => {
                    tracing::warn!(
                        "idx1 disagrees with movie data: {} vs {} frames, {} vs {} audio bytes",
                        d.indexed_frames,
                        d.scanned_frames,
                        d.indexed_audio_bytes,
                        d.scanned_audio_bytes
                    );
                    discrepancy = Some(d);
                }
                Ok(None) => tracing::debug!("idx1 matches movie data"),
                Err(e) => tracing::warn!("Index cross-check failed: {}", e),
            }
        }

        let dispatcher = FrameDispatcher::new(
            video,
            engines.as_ref(),
            config.max_frame_bytes,
            config.max_header_loops,
        );
        let audio = opened
            .streams
            .audio
            .map(|desc| AudioSync::new(desc, engines.as_ref(), config.sync_settings()));

        let mut session = Self {
            reader,
            index: opened.index,
            streams: opened.streams,
            clock: PlaybackClock::default(),
            dispatcher,
            audio,
            framebuffer: Framebuffer::display(),
            engines,
            look: config.look(),
            paused: false,
            previous_input: InputSnapshot::default(),
            audio_out: Vec::new(),
            discrepancy,
            counters: Counters::default(),
        };
        session.rewind_audio();

        // MPEG-4 waits for the first tick so the engine is only built when
        // playback actually starts.
        if session.dispatcher.codec() == VideoCodec::Mjpeg {
            session.show_frame(0);
        }
        Ok(session)
    }

    pub fn streams(&self) -> &StreamDescriptor {
        &self.streams
    }

    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    pub fn current_frame(&self) -> usize {
        self.clock.current_frame
    }

    pub fn total_frames(&self) -> usize {
        self.index.total_frames()
    }

    pub fn audio_samples_delivered(&self) -> u64 {
        self.clock.samples_delivered
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn look(&self) -> Look {
        self.look
    }

    fn fps(&self) -> u32 {
        self.streams.video.declared_fps.max(1)
    }

    /// Advance playback by one display tick.
    pub fn tick(&mut self, input: &InputSnapshot) -> TickOutput<'_> {
        self.counters.ticks += 1;
        self.audio_out.clear();

        let pressed = input.pressed_since(&self.previous_input);
        self.previous_input = *input;
        self.handle_input(&pressed);

        if !self.paused {
            if self.clock.repeat_counter == 0 {
                self.show_frame(self.clock.current_frame);
            }
            self.clock.repeat_counter += 1;
            if self.clock.repeat_counter >= self.streams.video.repeat_count {
                self.clock.repeat_counter = 0;
                self.clock.current_frame += 1;
            }

            if self.clock.current_frame >= self.total_frames() {
                tracing::debug!("End of stream, looping");
                self.restart();
            }

            let fps = self.fps();
            if let Some(audio) = self.audio.as_mut() {
                audio.deliver(
                    &mut self.reader,
                    &self.index.audio_chunks,
                    &mut self.clock,
                    fps,
                    &mut self.audio_out,
                );
            }
        }

        TickOutput {
            framebuffer: &self.framebuffer,
            audio: &self.audio_out,
        }
    }

    fn handle_input(&mut self, pressed: &InputSnapshot) {
        if pressed.play_pause {
            self.paused = !self.paused;
            tracing::info!("{}", if self.paused { "Paused" } else { "Resumed" });
        }
        if self.paused {
            return;
        }

        let fps = self.fps() as i64;
        let delta = if pressed.skip_back {
            -SKIP_SECONDS * fps
        } else if pressed.skip_forward {
            SKIP_SECONDS * fps
        } else if pressed.jump_back {
            -JUMP_SECONDS * fps
        } else if pressed.jump_forward {
            JUMP_SECONDS * fps
        } else {
            return;
        };
        self.seek(self.clock.current_frame as i64 + delta);
    }

    /// Jump to `target`, clamped to the stream, and show that frame.
    pub fn seek(&mut self, target: i64) {
        let last = self.total_frames().saturating_sub(1) as i64;
        let frame = target.clamp(0, last) as usize;
        tracing::debug!("Seek to frame {} (requested {})", frame, target);

        self.clock.current_frame = frame;
        self.clock.repeat_counter = 0;

        let fps = self.fps();
        if let Some(audio) = self.audio.as_mut() {
            audio.seek(
                &mut self.reader,
                &self.index.audio_chunks,
                &mut self.clock,
                frame,
                fps,
                self.engines.as_ref(),
            );
        }
        self.show_frame(frame);
    }

    /// Back to the state right after open, as at end of stream.
    pub fn restart(&mut self) {
        self.clock.reset();
        self.dispatcher.reset();
        self.rewind_audio();
    }

    fn rewind_audio(&mut self) {
        let fps = self.fps();
        if let Some(audio) = self.audio.as_mut() {
            audio.seek(
                &mut self.reader,
                &self.index.audio_chunks,
                &mut self.clock,
                0,
                fps,
                self.engines.as_ref(),
            );
        }
    }

    fn show_frame(&mut self, index: usize) {
        let result = self.dispatcher.decode_frame(
            &mut self.reader,
            &self.index.video_frames,
            index,
            self.look,
            self.engines.as_ref(),
            &mut self.framebuffer,
        );
        match result {
            Ok(()) => self.counters.frames_decoded += 1,
            Err(e) => {
                tracing::debug!("Frame {} skipped: {}", index, e);
                self.counters.frame_failures += 1;
                self.counters.last_frame_error = Some(e.to_string());
            }
        }
    }

    fn redraw(&mut self) {
        let result = self.dispatcher.redraw(
            &mut self.reader,
            &self.index.video_frames,
            self.look,
            self.engines.as_ref(),
            &mut self.framebuffer,
        );
        if let Err(e) = result {
            tracing::debug!("Redraw failed: {}", e);
            self.counters.frame_failures += 1;
            self.counters.last_frame_error = Some(e.to_string());
        }
    }

    pub fn set_color_mode(&mut self, mode: ColorMode) {
        if self.look.color_mode != mode {
            tracing::info!("Color mode: {}", mode.name());
            self.look.color_mode = mode;
            self.redraw();
        }
    }

    pub fn set_video_range(&mut self, range: VideoRange) {
        if self.look.range != range {
            self.look.range = range;
            self.redraw();
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        let audio_stats = self.audio.as_ref().map(|a| a.stats()).unwrap_or_default();
        let detected = self.audio.as_ref().and_then(|a| a.detected());

        PlaybackStats {
            current_frame: self.clock.current_frame,
            total_frames: self.total_frames(),
            paused: self.paused,
            ticks: self.counters.ticks,
            frames_decoded: self.counters.frames_decoded,
            frame_decode_failures: self.counters.frame_failures,
            audio_units_decoded: audio_stats.units_decoded,
            audio_decode_errors: audio_stats.decode_errors,
            ring_fill_bytes: self.audio.as_ref().map_or(0, |a| a.ring_fill()),
            samples_delivered: self.clock.samples_delivered,
            effective_sample_rate: self.audio.as_ref().map(|a| a.effective_rate()),
            detected_mp3_rate: detected.map(|i| i.sample_rate),
            detected_mp3_channels: detected.map(|i| i.channels),
            index_source: self.index.source.describe(),
            index_discrepancy: self.discrepancy.clone(),
            last_frame_error: self.counters.last_frame_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        DefaultEngines, EngineError, JpegEngine, Mp3Decode, Mp3Engine, Mp3Status, Mp3StreamInfo, Mpeg4Engine,
    };
    use crate::testing::{gradient_jpeg, AviBuilder, IndexLayout, WaveSpec};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session(data: Vec<u8>) -> PlaybackSession<Cursor<Vec<u8>>> {
        PlaybackSession::from_reader(Cursor::new(data), &SessionConfig::default(), Arc::new(DefaultEngines))
            .expect("open")
    }

    fn pcm_movie(layout: IndexLayout) -> Vec<u8> {
        AviBuilder::mjpeg(300)
            .with_audio(WaveSpec::pcm(44_100, 2, 16))
            .with_index(layout)
            .build()
    }

    #[test]
    fn test_pcm_movie_seek_scenario() {
        let mut s = session(pcm_movie(IndexLayout::MovieRelative));
        assert_eq!(s.total_frames(), 300);
        assert!(matches!(s.index().source, IndexSource::IndexChunk { .. }));

        s.seek(150);
        assert_eq!(s.current_frame(), 150);
        let target = 150 * 44_100 / 30;
        let chunk_samples = 44_100 / 30;
        assert!(s.audio_samples_delivered().abs_diff(target) <= chunk_samples);
    }

    #[test]
    fn test_damaged_index_falls_back_to_scan() {
        let s = session(pcm_movie(IndexLayout::WrongTag));
        assert_eq!(s.total_frames(), 300);
        assert_eq!(s.index().source, IndexSource::LinearScan);
    }

    #[test]
    fn test_seek_clamps() {
        let mut s = session(AviBuilder::mjpeg(10).build());
        for (target, expected) in [(-5, 0), (0, 0), (4, 4), (9, 9), (10, 9), (i64::MAX, 9), (i64::MIN, 0)] {
            s.seek(target);
            assert_eq!(s.current_frame(), expected, "seek({})", target);
        }
    }

    #[test]
    fn test_tick_repeats_low_rate_frames_and_loops() {
        // 15 fps is shown twice per tick
        let mut s = session(AviBuilder::mjpeg(3).with_frame_duration(66_666).build());
        assert_eq!(s.streams().video.repeat_count, 2);

        let idle = InputSnapshot::default();
        let mut frames = Vec::new();
        for _ in 0..7 {
            frames.push(s.current_frame());
            s.tick(&idle);
        }
        assert_eq!(frames, vec![0, 0, 1, 1, 2, 2, 0]);
        assert_eq!(s.stats().frame_decode_failures, 0);
    }

    #[test]
    fn test_tick_delivers_audio_and_loop_resets() {
        let mut s = session(
            AviBuilder::mjpeg(4)
                .with_audio(WaveSpec::pcm(8000, 1, 8))
                .build(),
        );
        let idle = InputSnapshot::default();

        let out = s.tick(&idle);
        // frame 1 owed plus 800 samples of lead, but only 4 * 266 exist
        assert_eq!(out.audio.len(), 4 * 266 * 2);
        assert_eq!(out.framebuffer.width(), 320);

        // the fourth tick runs off the end and starts over, owing the lead only
        for _ in 0..3 {
            s.tick(&idle);
        }
        assert_eq!(s.current_frame(), 0);
        assert_eq!(s.audio_samples_delivered(), 800);
    }

    #[test]
    fn test_input_edges() {
        let mut s = session(AviBuilder::mjpeg(3000).build());
        let press = |f: fn(&mut InputSnapshot)| {
            let mut i = InputSnapshot::default();
            f(&mut i);
            i
        };

        s.tick(&press(|i| i.skip_forward = true));
        // skip to 450, shown, then advanced
        assert_eq!(s.current_frame(), 451);
        // held button does not repeat
        s.tick(&press(|i| i.skip_forward = true));
        assert_eq!(s.current_frame(), 452);

        s.tick(&press(|i| i.jump_forward = true));
        assert_eq!(s.current_frame(), 452 + 1800 + 1);
        s.tick(&InputSnapshot::default());
        // 2254 - 1800, then advanced
        s.tick(&press(|i| i.jump_back = true));
        assert_eq!(s.current_frame(), 455);

        s.tick(&press(|i| i.play_pause = true));
        assert!(s.is_paused());
        let paused_at = s.current_frame();
        let out = s.tick(&press(|i| {
            i.play_pause = true;
            i.skip_back = true;
        }));
        assert!(out.audio.is_empty());
        assert_eq!(s.current_frame(), paused_at);
        s.tick(&InputSnapshot::default());
        s.tick(&press(|i| i.play_pause = true));
        assert!(!s.is_paused());
    }

    #[test]
    fn test_same_frame_decodes_identically() {
        let data = AviBuilder::mjpeg(2)
            .with_frames(vec![gradient_jpeg(48, 32); 2])
            .with_size(48, 32)
            .build();
        let mut s = session(data);
        s.set_color_mode(ColorMode::Dither2);

        s.seek(1);
        let first = s.framebuffer().clone();
        s.seek(1);
        assert_eq!(s.framebuffer(), &first);
    }

    #[test]
    fn test_color_mode_redraws_current_frame() {
        let data = AviBuilder::mjpeg(1).with_frames(vec![gradient_jpeg(32, 32)]).build();
        let mut s = session(data);
        let plain = s.framebuffer().clone();

        s.set_color_mode(ColorMode::Night);
        assert_ne!(s.framebuffer(), &plain);
        s.set_color_mode(ColorMode::Unchanged);
        assert_eq!(s.framebuffer(), &plain);
        assert_eq!(s.look().color_mode, ColorMode::Unchanged);
    }

    #[test]
    fn test_verify_index_reports_without_replacing() {
        let config = SessionConfig {
            verify_index: true,
            ..SessionConfig::default()
        };
        let data = AviBuilder::mjpeg(5).with_audio(WaveSpec::pcm(8000, 1, 8)).build();
        let s = PlaybackSession::from_reader(Cursor::new(data), &config, Arc::new(DefaultEngines)).expect("open");
        assert_eq!(s.stats().index_discrepancy, None);
        assert!(s.stats().index_source.starts_with("idx1"));
    }

    #[test]
    fn test_not_an_avi() {
        let err = PlaybackSession::from_reader(
            Cursor::new(b"RIFF\x04\x00\x00\x00WAVE".to_vec()),
            &SessionConfig::default(),
            Arc::new(DefaultEngines),
        );
        assert!(matches!(err, Err(ContainerError::NotAvi)));
    }

    // ------------------------------------------------------------------------
    // MP3 engine reset
    // ------------------------------------------------------------------------

    /// Decodes 50 frames, then fails forever. Every status is logged with
    /// the id of the engine that produced it.
    struct WearingMp3 {
        id: usize,
        decodes: usize,
        log: Arc<Mutex<Vec<(usize, Mp3Status)>>>,
    }

    impl Mp3Engine for WearingMp3 {
        fn decode(&mut self, input: &[u8], pcm: &mut Vec<i16>) -> Mp3Decode {
            pcm.clear();
            self.decodes += 1;
            let result = if self.decodes > 50 {
                Mp3Decode { status: Mp3Status::RecoverableError, consumed: 1 }
            } else {
                pcm.resize(1152 * 2, 0);
                Mp3Decode { status: Mp3Status::Ok, consumed: input.len().min(200) }
            };
            if let Ok(mut log) = self.log.lock() {
                log.push((self.id, result.status));
            }
            result
        }

        fn stream_info(&self) -> Option<Mp3StreamInfo> {
            (self.decodes > 0).then_some(Mp3StreamInfo { sample_rate: 44_100, channels: 2 })
        }
    }

    #[derive(Default)]
    struct WearingEngines {
        created: AtomicUsize,
        log: Arc<Mutex<Vec<(usize, Mp3Status)>>>,
    }

    impl EngineFactory for WearingEngines {
        fn jpeg(&self) -> Box<dyn JpegEngine> {
            DefaultEngines.jpeg()
        }
        fn mpeg4(&self, _: usize, _: usize) -> Result<Box<dyn Mpeg4Engine>, EngineError> {
            Err(EngineError::Unavailable("MPEG-4".into()))
        }
        fn mp3(&self) -> Result<Box<dyn Mp3Engine>, EngineError> {
            let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(WearingMp3 { id, decodes: 0, log: self.log.clone() }))
        }
    }

    #[test]
    fn test_seek_replaces_worn_mp3_engine() {
        let engines = Arc::new(WearingEngines::default());
        let data = AviBuilder::mpeg4(1100)
            .with_audio(WaveSpec::mp3(44_100, 2))
            .build();
        let mut s = PlaybackSession::from_reader(Cursor::new(data), &SessionConfig::default(), engines.clone())
            .expect("open");
        let first_engine = engines.created.load(Ordering::SeqCst);

        let idle = InputSnapshot::default();
        while s.current_frame() <= 1000 {
            s.tick(&idle);
        }
        let last = engines.log.lock().expect("log").last().copied();
        assert_eq!(last, Some((first_engine, Mp3Status::RecoverableError)));

        s.seek(0);
        assert_eq!(s.audio_samples_delivered(), 0);
        let fresh = engines.created.load(Ordering::SeqCst);
        assert!(fresh > first_engine);

        s.tick(&idle);
        let log = engines.log.lock().expect("log");
        let first_from_fresh = log.iter().find(|(id, _)| *id == fresh).map(|(_, status)| *status);
        assert_eq!(first_from_fresh, Some(Mp3Status::Ok));
    }
}
