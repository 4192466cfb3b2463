//! In-memory AVI fixtures for unit tests.

use std::io::Cursor;

use crate::avi_demux::{WAVE_FORMAT_ADPCM, WAVE_FORMAT_MPEGLAYER3, WAVE_FORMAT_PCM};

/// WAVEFORMATEX fields written into the audio `strf`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaveSpec {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits: u16,
    pub block_align: u16,
    pub samples_per_block: u16,
}

impl WaveSpec {
    pub fn pcm(sample_rate: u32, channels: u16, bits: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            sample_rate,
            bits,
            block_align: channels * bits / 8,
            samples_per_block: 0,
        }
    }

    pub fn adpcm(sample_rate: u32, channels: u16, block_align: u16) -> Self {
        let header = 7 * channels;
        Self {
            format_tag: WAVE_FORMAT_ADPCM,
            channels,
            sample_rate,
            bits: 4,
            block_align,
            samples_per_block: 2 + (block_align - header) * 2 / channels,
        }
    }

    pub fn mp3(sample_rate: u32, channels: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_MPEGLAYER3,
            channels,
            sample_rate,
            bits: 0,
            block_align: 1,
            samples_per_block: 0,
        }
    }

    /// One chunk's worth of payload for a frame at `fps`.
    fn default_chunk(&self, fps: u32, seq: usize) -> Vec<u8> {
        match self.format_tag {
            WAVE_FORMAT_PCM => {
                let frame_bytes = (self.channels * self.bits / 8) as usize;
                let samples = (self.sample_rate / fps.max(1)) as usize;
                (0..samples * frame_bytes).map(|i| (i + seq) as u8).collect()
            }
            WAVE_FORMAT_ADPCM => adpcm_block(self.channels, self.block_align as usize),
            _ => vec![0x5A; 200],
        }
    }
}

/// A well-formed MS-ADPCM block: coefficient 0, delta 16, zero seeds,
/// alternating nibbles.
pub(crate) fn adpcm_block(channels: u16, block_align: usize) -> Vec<u8> {
    let mut block = Vec::with_capacity(block_align);
    let ch = channels as usize;
    block.extend(std::iter::repeat(0u8).take(ch)); // predictor indices
    for _ in 0..ch {
        block.extend_from_slice(&16i16.to_le_bytes());
    }
    for _ in 0..ch * 2 {
        block.extend_from_slice(&0i16.to_le_bytes());
    }
    while block.len() < block_align {
        block.push(0x1F);
    }
    block
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexLayout {
    /// No idx1 at all.
    None,
    /// Offsets of the chunk header, relative to the first byte after `movi`.
    MovieRelative,
    /// Offsets of the chunk header from the start of the file.
    Absolute,
    /// Offsets of the chunk header relative to the `movi` fourcc.
    MovieTagRelative,
    /// Offsets of the payload relative to the first byte after `movi`.
    MovieRelativePayload,
    /// Offsets of the payload from the start of the file.
    AbsolutePayload,
    /// Offsets of the payload relative to the `movi` fourcc.
    MovieTagRelativePayload,
    /// Valid entries under a damaged chunk tag.
    WrongTag,
    /// Entries that point nowhere useful.
    Garbage,
}

pub(crate) struct AviBuilder {
    fourcc: [u8; 4],
    width: u32,
    height: u32,
    us_per_frame: u32,
    extra_data: Vec<u8>,
    frames: Vec<Vec<u8>>,
    audio: Option<WaveSpec>,
    audio_chunks: Option<Vec<Vec<u8>>>,
    layout: IndexLayout,
    rec_lists: bool,
}

impl AviBuilder {
    fn new(fourcc: [u8; 4], frames: Vec<Vec<u8>>) -> Self {
        Self {
            fourcc,
            width: 16,
            height: 16,
            us_per_frame: 33_333,
            extra_data: Vec::new(),
            frames,
            audio: None,
            audio_chunks: None,
            layout: IndexLayout::MovieRelative,
            rec_lists: false,
        }
    }

    /// `count` identical 16x16 JPEG frames.
    pub fn mjpeg(count: usize) -> Self {
        let jpeg = test_jpeg(16, 16, [200, 40, 40]);
        Self::new(*b"MJPG", vec![jpeg; count])
    }

    /// `count` opaque MPEG-4 payloads, each starting with a VOP start code.
    pub fn mpeg4(count: usize) -> Self {
        let frames = (0..count)
            .map(|i| vec![0x00, 0x00, 0x01, 0xB6, i as u8, 0x10, 0x20, 0x30, 0x40, 0x50])
            .collect();
        Self::new(*b"XVID", frames)
    }

    pub fn with_fourcc(mut self, fourcc: [u8; 4]) -> Self {
        self.fourcc = fourcc;
        self
    }

    pub fn with_frames(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_duration(mut self, us_per_frame: u32) -> Self {
        self.us_per_frame = us_per_frame;
        self
    }

    pub fn with_extra_data(mut self, extra: Vec<u8>) -> Self {
        self.extra_data = extra;
        self
    }

    pub fn with_audio(mut self, wave: WaveSpec) -> Self {
        self.audio = Some(wave);
        self
    }

    pub fn with_audio_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.audio_chunks = Some(chunks);
        self
    }

    pub fn with_index(mut self, layout: IndexLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_rec_lists(mut self) -> Self {
        self.rec_lists = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let fps = (1_000_000 / self.us_per_frame.max(1)).max(1);
        let audio_chunks: Vec<Vec<u8>> = match (&self.audio, &self.audio_chunks) {
            (_, Some(chunks)) => chunks.clone(),
            (Some(wave), None) => (0..self.frames.len())
                .map(|i| wave.default_chunk(fps, i))
                .collect(),
            (None, None) => Vec::new(),
        };

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"AVI ");

        let hdrl = self.header_list();
        write_list(&mut out, b"hdrl", &hdrl);

        // movie data
        let movi_list = out.len();
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"movi");
        let movi_start = out.len();

        let mut entries: Vec<([u8; 4], usize, usize)> = Vec::new();
        let pairs = self.frames.len().max(audio_chunks.len());
        for i in 0..pairs {
            let rec_start = out.len();
            if self.rec_lists {
                out.extend_from_slice(b"LIST");
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(b"rec ");
            }
            if let Some(frame) = self.frames.get(i) {
                entries.push((*b"00dc", out.len(), frame.len()));
                write_chunk(&mut out, b"00dc", frame);
            }
            if let Some(chunk) = audio_chunks.get(i) {
                entries.push((*b"01wb", out.len(), chunk.len()));
                write_chunk(&mut out, b"01wb", chunk);
            }
            if self.rec_lists {
                let size = (out.len() - rec_start - 8) as u32;
                out[rec_start + 4..rec_start + 8].copy_from_slice(&size.to_le_bytes());
            }
        }
        let movi_size = (out.len() - movi_list - 8) as u32;
        out[movi_list + 4..movi_list + 8].copy_from_slice(&movi_size.to_le_bytes());

        if self.layout != IndexLayout::None {
            let mut idx = Vec::with_capacity(entries.len() * 16);
            for (tag, header_pos, size) in &entries {
                let offset = match self.layout {
                    IndexLayout::MovieRelative | IndexLayout::WrongTag => header_pos - movi_start,
                    IndexLayout::Absolute => *header_pos,
                    IndexLayout::MovieTagRelative => header_pos - movi_start + 4,
                    IndexLayout::MovieRelativePayload => header_pos + 8 - movi_start,
                    IndexLayout::AbsolutePayload => header_pos + 8,
                    IndexLayout::MovieTagRelativePayload => header_pos + 8 - movi_start + 4,
                    IndexLayout::Garbage => 0x7FFF_0000,
                    IndexLayout::None => 0,
                };
                idx.extend_from_slice(tag);
                idx.extend_from_slice(&0x10u32.to_le_bytes());
                idx.extend_from_slice(&(offset as u32).to_le_bytes());
                idx.extend_from_slice(&(*size as u32).to_le_bytes());
            }
            let tag = if self.layout == IndexLayout::WrongTag { b"idxX" } else { b"idx1" };
            write_chunk(&mut out, tag, &idx);
        }

        let riff_size = (out.len() - 8) as u32;
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        out
    }

    fn header_list(&self) -> Vec<u8> {
        let mut hdrl = Vec::new();

        let mut avih = vec![0u8; 56];
        avih[0..4].copy_from_slice(&self.us_per_frame.to_le_bytes());
        avih[16..20].copy_from_slice(&(self.frames.len() as u32).to_le_bytes());
        let streams: u32 = if self.audio.is_some() { 2 } else { 1 };
        avih[24..28].copy_from_slice(&streams.to_le_bytes());
        avih[32..36].copy_from_slice(&self.width.to_le_bytes());
        avih[36..40].copy_from_slice(&self.height.to_le_bytes());
        write_chunk(&mut hdrl, b"avih", &avih);

        let mut strl = Vec::new();
        let mut strh = vec![0u8; 56];
        strh[0..4].copy_from_slice(b"vids");
        strh[4..8].copy_from_slice(&self.fourcc);
        write_chunk(&mut strl, b"strh", &strh);
        let mut strf = vec![0u8; 40];
        strf[0..4].copy_from_slice(&40u32.to_le_bytes());
        strf[4..8].copy_from_slice(&self.width.to_le_bytes());
        strf[8..12].copy_from_slice(&self.height.to_le_bytes());
        strf[12..14].copy_from_slice(&1u16.to_le_bytes());
        strf[14..16].copy_from_slice(&24u16.to_le_bytes());
        strf[16..20].copy_from_slice(&self.fourcc);
        strf.extend_from_slice(&self.extra_data);
        write_chunk(&mut strl, b"strf", &strf);
        write_list(&mut hdrl, b"strl", &strl);

        if let Some(wave) = &self.audio {
            let mut strl = Vec::new();
            let mut strh = vec![0u8; 56];
            strh[0..4].copy_from_slice(b"auds");
            write_chunk(&mut strl, b"strh", &strh);
            let mut strf = Vec::with_capacity(20);
            strf.extend_from_slice(&wave.format_tag.to_le_bytes());
            strf.extend_from_slice(&wave.channels.to_le_bytes());
            strf.extend_from_slice(&wave.sample_rate.to_le_bytes());
            let avg = wave.sample_rate * wave.block_align as u32;
            strf.extend_from_slice(&avg.to_le_bytes());
            strf.extend_from_slice(&wave.block_align.to_le_bytes());
            strf.extend_from_slice(&wave.bits.to_le_bytes());
            strf.extend_from_slice(&2u16.to_le_bytes());
            strf.extend_from_slice(&wave.samples_per_block.to_le_bytes());
            write_chunk(&mut strl, b"strf", &strf);
            write_list(&mut hdrl, b"strl", &strl);
        }

        hdrl
    }
}

fn write_chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

fn write_list(out: &mut Vec<u8>, list_type: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(list_type);
    out.extend_from_slice(body);
}

/// Baseline JPEG filled with one color.
pub(crate) fn test_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode_jpeg(image::RgbImage::from_pixel(width, height, image::Rgb(rgb)))
}

/// Baseline JPEG with a diagonal gradient.
pub(crate) fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_jpeg(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    }))
}

fn encode_jpeg(img: image::RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("encode test jpeg");
    out.into_inner()
}
