//! Audio/Video Synchronization
//!
//! Video is the master clock. Each tick the displayed frame index says how
//! many audio samples should have reached the sink by now; the difference
//! from what was actually delivered is drained from the ring.

use std::io::{Read, Seek};

use crate::avi_demux::{AudioDescriptor, AudioFormat, ChunkRef};
use crate::audio::{AudioAdapter, AudioSource, AudioStats, ChunkCursor};
use crate::engine::{EngineFactory, Mp3StreamInfo};
use crate::mp3::samples_per_frame_for_rate;
use crate::ring::AudioRing;

/// Mutable playback position. Zeroed on open, seek and loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackClock {
    pub current_frame: usize,
    pub repeat_counter: u32,
    pub audio_cursor: ChunkCursor,
    /// Sample frames handed to the sink since the last seek or loop,
    /// counted from the start of the stream.
    pub samples_delivered: u64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub ring_capacity: usize,
    pub max_audio_batch: usize,
    pub refill_budget: usize,
    pub lead_divisor: u32,
}

/// Samples owed to the sink once `frame` is on screen.
pub fn expected_samples(frame: u64, rate: u32, fps: u32, lead_divisor: u32) -> u64 {
    frame * rate as u64 / fps.max(1) as u64 + (rate / lead_divisor.max(1)) as u64
}

/// Map a sample position onto the audio chunk table.
///
/// Returns the read cursor and the sample count it corresponds to. PCM
/// lands on the exact frame, ADPCM on the enclosing block and MP3 on the
/// enclosing chunk. Positions past the end leave the cursor finished.
pub fn locate_audio(desc: &AudioDescriptor, chunks: &[ChunkRef], target: u64, rate: u32) -> (ChunkCursor, u64) {
    match desc.format {
        AudioFormat::Pcm => {
            let frame_bytes = desc.ring_frame_bytes().max(1) as u64;
            let mut remaining = target * frame_bytes;
            for (i, c) in chunks.iter().enumerate() {
                if remaining < c.size as u64 {
                    let offset = remaining - remaining % frame_bytes;
                    return (ChunkCursor::new(i, offset as u32), target);
                }
                remaining -= c.size as u64;
            }
            (ChunkCursor::new(chunks.len(), 0), target)
        }
        AudioFormat::Adpcm => {
            let block_align = desc.block_align.max(1) as u64;
            let mut blocks = target / desc.samples_per_block.max(1) as u64;
            for (i, c) in chunks.iter().enumerate() {
                let in_chunk = (c.size as u64 + block_align - 1) / block_align;
                if blocks < in_chunk {
                    return (ChunkCursor::new(i, (blocks * block_align) as u32), target);
                }
                blocks -= in_chunk;
            }
            (ChunkCursor::new(chunks.len(), 0), target)
        }
        AudioFormat::Mp3 => {
            let spf = samples_per_frame_for_rate(rate) as u64;
            let last = chunks.len().saturating_sub(1) as u64;
            let frame = (target / spf).min(last);
            (ChunkCursor::new(frame as usize, 0), frame * spf)
        }
    }
}

/// Expand ring bytes into interleaved stereo i16.
pub fn widen_to_stereo(bytes: &[u8], channels: usize, bits: usize, out: &mut Vec<i16>) {
    let sample = |b: &[u8]| -> i16 {
        if bits == 8 {
            ((b[0] as i16) - 128) << 8
        } else {
            i16::from_le_bytes([b[0], b[1]])
        }
    };
    let width = bits / 8;
    for frame in bytes.chunks_exact(width * channels) {
        let left = sample(&frame[..width]);
        let right = if channels >= 2 { sample(&frame[width..2 * width]) } else { left };
        out.push(left);
        out.push(right);
    }
}

/// The audio half of a session: adapter, ring and the owed-sample logic.
pub struct AudioSync {
    desc: AudioDescriptor,
    adapter: AudioAdapter,
    ring: AudioRing,
    settings: SyncSettings,
    stats: AudioStats,
    scratch: Vec<u8>,
}

impl AudioSync {
    pub fn new(desc: AudioDescriptor, engines: &dyn EngineFactory, settings: SyncSettings) -> Self {
        Self {
            adapter: AudioAdapter::for_stream(&desc, engines),
            ring: AudioRing::new(settings.ring_capacity),
            desc,
            settings,
            stats: AudioStats::default(),
            scratch: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &AudioDescriptor {
        &self.desc
    }

    /// Detected MP3 rate when known, else the header rate.
    pub fn effective_rate(&self) -> u32 {
        self.adapter
            .detected()
            .map(|i| i.sample_rate)
            .filter(|&r| r > 0)
            .unwrap_or(self.desc.sample_rate)
    }

    pub fn detected(&self) -> Option<Mp3StreamInfo> {
        self.adapter.detected()
    }

    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    pub fn ring_fill(&self) -> usize {
        self.ring.len()
    }

    fn refill<R: Read + Seek>(&mut self, reader: &mut R, chunks: &[ChunkRef], clock: &mut PlaybackClock) {
        let mut source = AudioSource { reader, chunks };
        self.adapter.refill(
            &mut source,
            &mut clock.audio_cursor,
            &mut self.ring,
            self.settings.refill_budget,
            &mut self.stats,
        );
    }

    /// Hand the samples owed for `clock.current_frame` to `out` as stereo
    /// i16. Returns the number of sample frames delivered.
    pub fn deliver<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        chunks: &[ChunkRef],
        clock: &mut PlaybackClock,
        fps: u32,
        out: &mut Vec<i16>,
    ) -> usize {
        if self.ring.wants_refill() {
            self.refill(reader, chunks, clock);
        }

        let rate = self.effective_rate();
        let expected = expected_samples(clock.current_frame as u64, rate, fps, self.settings.lead_divisor);
        if expected <= clock.samples_delivered {
            return 0;
        }

        let frame_bytes = self.desc.ring_frame_bytes().max(1);
        let to_send = (expected - clock.samples_delivered)
            .min(self.settings.max_audio_batch as u64)
            .min((self.ring.len() / frame_bytes) as u64) as usize;
        if to_send == 0 {
            return 0;
        }

        self.scratch.resize(to_send * frame_bytes, 0);
        let read = self.ring.pop(&mut self.scratch);
        widen_to_stereo(
            &self.scratch[..read],
            self.desc.ring_channels(),
            self.desc.ring_bits(),
            out,
        );
        clock.samples_delivered += to_send as u64;
        to_send
    }

    /// Reposition audio for `frame`. MP3 decoding restarts from a fresh
    /// engine and its refill waits for the next delivery.
    pub fn seek<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        chunks: &[ChunkRef],
        clock: &mut PlaybackClock,
        frame: usize,
        fps: u32,
        engines: &dyn EngineFactory,
    ) {
        let rate = self.effective_rate();
        let target = frame as u64 * rate as u64 / fps.max(1) as u64;
        let (cursor, delivered) = locate_audio(&self.desc, chunks, target, rate);
        tracing::debug!(
            "Audio seek: frame {} -> sample {} at chunk {}+{}",
            frame,
            delivered,
            cursor.chunk,
            cursor.offset
        );

        self.ring.clear();
        self.adapter.reset(engines);
        clock.audio_cursor = cursor;
        clock.samples_delivered = delivered;

        if !self.adapter.is_mp3() {
            self.refill(reader, chunks, clock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DefaultEngines;
    use std::io::Cursor;

    fn pcm(rate: u32, channels: u16, bits: u16) -> AudioDescriptor {
        AudioDescriptor {
            format: AudioFormat::Pcm,
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            block_align: channels * bits / 8,
            samples_per_block: 0,
        }
    }

    fn even_chunks(count: usize, size: u32) -> Vec<ChunkRef> {
        (0..count)
            .map(|i| ChunkRef { offset: i as u32 * size, size })
            .collect()
    }

    fn settings(ring_capacity: usize) -> SyncSettings {
        SyncSettings {
            ring_capacity,
            max_audio_batch: 4096,
            refill_budget: 16_384,
            lead_divisor: 10,
        }
    }

    #[test]
    fn test_expected_samples() {
        assert_eq!(expected_samples(0, 44_100, 30, 10), 4410);
        assert_eq!(expected_samples(30, 44_100, 30, 10), 44_100 + 4410);
        assert_eq!(expected_samples(7, 22_050, 15, 10), 7 * 1470 + 2205);
    }

    #[test]
    fn test_locate_pcm() {
        let desc = pcm(44_100, 2, 16);
        let chunks = even_chunks(10, 5880); // 1470 frames each
        let (cursor, delivered) = locate_audio(&desc, &chunks, 1470 * 3 + 10, 44_100);
        assert_eq!(cursor, ChunkCursor::new(3, 40));
        assert_eq!(delivered, 1470 * 3 + 10);

        let (end, _) = locate_audio(&desc, &chunks, 1470 * 10, 44_100);
        assert_eq!(end.chunk, 10);
    }

    #[test]
    fn test_locate_adpcm_snaps_to_blocks() {
        let desc = AudioDescriptor {
            format: AudioFormat::Adpcm,
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 4,
            block_align: 256,
            samples_per_block: 500,
        };
        // three blocks per chunk, the last one short
        let chunks = even_chunks(4, 700);
        let (cursor, _) = locate_audio(&desc, &chunks, 500 * 4 + 123, 22_050);
        assert_eq!(cursor, ChunkCursor::new(1, 256));
    }

    #[test]
    fn test_locate_mp3_frames() {
        let desc = AudioDescriptor {
            format: AudioFormat::Mp3,
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 0,
            block_align: 1,
            samples_per_block: 0,
        };
        let chunks = even_chunks(100, 417);
        assert_eq!(
            locate_audio(&desc, &chunks, 1152 * 5 + 7, 44_100),
            (ChunkCursor::new(5, 0), 1152 * 5)
        );
        assert_eq!(
            locate_audio(&desc, &chunks, 576 * 5 + 7, 22_050),
            (ChunkCursor::new(5, 0), 576 * 5)
        );
        // clamped to the last chunk
        assert_eq!(locate_audio(&desc, &chunks, 1152 * 500, 44_100).0.chunk, 99);
    }

    #[test]
    fn test_widen() {
        let mut out = Vec::new();
        widen_to_stereo(&[0x80, 0xFF, 0x00], 1, 8, &mut out);
        assert_eq!(out, vec![0, 0, 127 << 8, 127 << 8, -128 << 8, -128 << 8]);

        out.clear();
        widen_to_stereo(&[0x01, 0x00, 0xFF, 0xFF], 2, 16, &mut out);
        assert_eq!(out, vec![1, -1]);
    }

    #[test]
    fn test_delivery_tracks_video_frames() {
        let desc = pcm(44_100, 2, 16);
        let chunks = even_chunks(60, 5880);
        let mut reader = Cursor::new(vec![0u8; 60 * 5880]);
        let mut sync = AudioSync::new(desc, &DefaultEngines, settings(176_400));
        let mut clock = PlaybackClock::default();
        let mut out = Vec::new();

        // frame 0 owes only the lead
        let sent = sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out);
        assert_eq!(sent, 4096);
        assert_eq!(out.len(), 4096 * 2);
        let sent = sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out);
        assert_eq!(sent, 4410 - 4096);
        assert_eq!(sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out), 0);

        clock.current_frame = 1;
        assert_eq!(sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out), 1470);
        assert_eq!(clock.samples_delivered, 4410 + 1470);
    }

    #[test]
    fn test_delivery_limited_by_ring_contents() {
        let desc = pcm(44_100, 2, 16);
        let chunks = even_chunks(1, 400); // only 100 frames of audio exist
        let mut reader = Cursor::new(vec![0u8; 400]);
        let mut sync = AudioSync::new(desc, &DefaultEngines, settings(176_400));
        let mut clock = PlaybackClock::default();
        let mut out = Vec::new();

        assert_eq!(sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out), 100);
        assert_eq!(sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out), 0);
        assert_eq!(sync.ring_fill(), 0);
    }

    #[test]
    fn test_seek_resets_ring_and_counter() {
        let desc = pcm(44_100, 2, 16);
        let chunks = even_chunks(300, 5880);
        let mut reader = Cursor::new(vec![0u8; 300 * 5880]);
        let mut sync = AudioSync::new(desc, &DefaultEngines, settings(176_400));
        let mut clock = PlaybackClock::default();
        let mut out = Vec::new();
        sync.deliver(&mut reader, &chunks, &mut clock, 30, &mut out);

        sync.seek(&mut reader, &chunks, &mut clock, 150, 30, &DefaultEngines);
        assert_eq!(clock.samples_delivered, 220_500);
        assert_eq!(clock.audio_cursor, ChunkCursor::new(150, 0));
        // refilled straight away for PCM
        assert_eq!(sync.ring_fill(), 16_384);
    }
}
