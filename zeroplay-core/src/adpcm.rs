//! Microsoft ADPCM block decoder.
//!
//! Each block starts with a per-channel header (predictor index, step size,
//! two seed samples) followed by 4-bit codes. Stereo blocks alternate
//! channels one nibble at a time, high nibble first.

use crate::audio::AudioDecodeError;

/// Step size adaptation, indexed by the unsigned nibble.
pub const ADAPTATION_TABLE: [i32; 16] = [
    230, 230, 230, 230, 307, 409, 512, 614, 768, 614, 512, 409, 307, 230, 230, 230,
];

pub const COEF1: [i32; 7] = [256, 512, 0, 192, 240, 460, 392];
pub const COEF2: [i32; 7] = [0, -256, 0, 64, 0, -208, -232];

const MIN_DELTA: i32 = 16;
/// Keeps `delta * 768` inside i32 on runs of extreme codes.
const MAX_DELTA: i32 = i32::MAX / 768;

/// Header bytes for one channel.
pub const CHANNEL_HEADER_LEN: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChannelState {
    coef_index: usize,
    delta: i32,
    sample1: i32,
    sample2: i32,
}

impl ChannelState {
    fn decode_nibble(&mut self, nibble: u8) -> i16 {
        let predicted =
            (self.sample1 * COEF1[self.coef_index] + self.sample2 * COEF2[self.coef_index]) >> 8;
        let signed = if nibble >= 8 { nibble as i32 - 16 } else { nibble as i32 };
        let sample = (predicted + signed * self.delta).clamp(i16::MIN as i32, i16::MAX as i32);

        self.sample2 = self.sample1;
        self.sample1 = sample;
        self.delta = ((self.delta * ADAPTATION_TABLE[nibble as usize]) >> 8).clamp(MIN_DELTA, MAX_DELTA);

        sample as i16
    }
}

/// Per-stream decoder. State is reseeded by every block header, so the
/// decoder can be reused across seeks without a reset.
#[derive(Debug, Clone)]
pub struct AdpcmDecoder {
    channels: usize,
    state: [ChannelState; 2],
}

impl AdpcmDecoder {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: (channels as usize).clamp(1, 2),
            state: [ChannelState::default(); 2],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn header_len(&self) -> usize {
        CHANNEL_HEADER_LEN * self.channels
    }

    /// Decode one block, appending interleaved samples to `out`.
    ///
    /// Returns the number of sample frames produced.
    pub fn decode_block(&mut self, block: &[u8], out: &mut Vec<i16>) -> Result<usize, AudioDecodeError> {
        let ch = self.channels;
        let header = self.header_len();
        if block.len() < header {
            return Err(AudioDecodeError::ShortBlock {
                len: block.len(),
                needed: header,
            });
        }

        // Header fields are grouped by field, not by channel.
        let word = |i: usize| i16::from_le_bytes([block[i], block[i + 1]]) as i32;
        for c in 0..ch {
            let coef_index = block[c] as usize;
            self.state[c] = ChannelState {
                coef_index: if coef_index < COEF1.len() { coef_index } else { 0 },
                delta: word(ch + 2 * c),
                sample1: word(3 * ch + 2 * c),
                sample2: word(5 * ch + 2 * c),
            };
        }

        let start = out.len();
        for c in 0..ch {
            out.push(self.state[c].sample2 as i16);
        }
        for c in 0..ch {
            out.push(self.state[c].sample1 as i16);
        }

        for &byte in &block[header..] {
            if ch == 2 {
                out.push(self.state[0].decode_nibble(byte >> 4));
                out.push(self.state[1].decode_nibble(byte & 0x0F));
            } else {
                out.push(self.state[0].decode_nibble(byte >> 4));
                out.push(self.state[0].decode_nibble(byte & 0x0F));
            }
        }

        Ok((out.len() - start) / ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_block(coef: u8, delta: i16, s1: i16, s2: i16, codes: &[u8]) -> Vec<u8> {
        let mut block = vec![coef];
        block.extend_from_slice(&delta.to_le_bytes());
        block.extend_from_slice(&s1.to_le_bytes());
        block.extend_from_slice(&s2.to_le_bytes());
        block.extend_from_slice(codes);
        block
    }

    #[test]
    fn test_mono_reference_sequence() {
        // nibbles: 1 2 7 F 8 8 3 0
        let block = mono_block(0, 16, 100, 50, &[0x12, 0x7F, 0x88, 0x30]);
        let mut decoder = AdpcmDecoder::new(1);
        let mut out = Vec::new();

        let frames = decoder.decode_block(&block, &mut out).expect("decode");

        assert_eq!(frames, 10);
        assert_eq!(out, vec![50, 100, 116, 148, 260, 222, -50, -866, 52, 52]);
    }

    #[test]
    fn test_second_order_predictor() {
        // coef index 1: predicted = 2 * s1 - s2
        let block = mono_block(1, 16, 20, 10, &[0x00, 0x10]);
        let mut out = Vec::new();
        AdpcmDecoder::new(1).decode_block(&block, &mut out).expect("decode");
        // 2*20-10 = 30, 2*30-20 = 40, (2*40-30)+16 = 66, 2*66-40 = 92
        assert_eq!(out, vec![10, 20, 30, 40, 66, 92]);
    }

    #[test]
    fn test_stereo_interleaving() {
        let mut block = vec![0u8, 0u8];
        for v in [16i16, 20, 10, -10, 5, -5] {
            block.extend_from_slice(&v.to_le_bytes());
        }
        block.push(0x1F);

        let mut out = Vec::new();
        let frames = AdpcmDecoder::new(2).decode_block(&block, &mut out).expect("decode");

        assert_eq!(frames, 3);
        // seeds (s2 then s1, L/R), then high nibble left, low nibble right
        assert_eq!(out, vec![5, -5, 10, -10, 26, -30]);
    }

    #[test]
    fn test_clamps_to_sixteen_bits() {
        let block = mono_block(0, 16, 32760, 0, &[0x7F]);
        let mut out = Vec::new();
        AdpcmDecoder::new(1).decode_block(&block, &mut out).expect("decode");
        assert_eq!(out[2], i16::MAX);
    }

    #[test]
    fn test_bad_coefficient_index_uses_zero() {
        let good = mono_block(0, 16, 100, 50, &[0x12]);
        let bad = mono_block(9, 16, 100, 50, &[0x12]);
        let (mut a, mut b) = (Vec::new(), Vec::new());
        AdpcmDecoder::new(1).decode_block(&good, &mut a).expect("decode");
        AdpcmDecoder::new(1).decode_block(&bad, &mut b).expect("decode");
        assert_eq!(a, b);
    }

    #[test]
    fn test_long_run_of_extreme_codes() {
        let block = mono_block(0, 16, 0, 0, &[0x88; 32]);
        let mut decoder = AdpcmDecoder::new(1);
        let mut out = Vec::new();

        let frames = decoder.decode_block(&block, &mut out).expect("decode");

        assert_eq!(frames, 66);
        assert!(decoder.state[0].delta <= MAX_DELTA);
        // -128, -512, -1664, -5120, -15488, then pinned at the floor
        assert_eq!(&out[2..7], &[-128, -512, -1664, -5120, -15488]);
        assert!(out[7..].iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn test_short_block() {
        let mut out = Vec::new();
        let err = AdpcmDecoder::new(2).decode_block(&[0u8; 10], &mut out).unwrap_err();
        assert!(matches!(err, AudioDecodeError::ShortBlock { len: 10, needed: 14 }));
        assert!(out.is_empty());
    }
}
