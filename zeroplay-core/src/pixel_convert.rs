// PIXEL CONVERT - color modes and YUV to RGB565 conversion
//
// The display is RGB565. MJPEG pictures arrive already packed as RGB565 and
// go through per-channel 5/6-bit lookup tables. MPEG-4 pictures arrive as
// planar YUV 4:2:0 and are converted with fixed-point contribution tables,
// with the color mode applied on 8-bit channels before packing.
//
// All tables are built once on first use.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::framebuffer::{Framebuffer, Placement};

// ============================================================================
// Color Modes
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    Unchanged,
    Lift16,
    Lift32,
    Gamma12,
    Gamma15,
    Gamma18,
    Dithered,
    Dither2,
    Warm,
    WarmPlus,
    Night,
    NightPlus,
    NightDither,
    NightDither2,
    Legacy,
}

impl ColorMode {
    pub const ALL: [ColorMode; 15] = [
        ColorMode::Unchanged,
        ColorMode::Lift16,
        ColorMode::Lift32,
        ColorMode::Gamma12,
        ColorMode::Gamma15,
        ColorMode::Gamma18,
        ColorMode::Dithered,
        ColorMode::Dither2,
        ColorMode::Warm,
        ColorMode::WarmPlus,
        ColorMode::Night,
        ColorMode::NightPlus,
        ColorMode::NightDither,
        ColorMode::NightDither2,
        ColorMode::Legacy,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorMode::Unchanged => "Unchanged",
            ColorMode::Lift16 => "Lift 16",
            ColorMode::Lift32 => "Lift 32",
            ColorMode::Gamma12 => "Gamma 1.2",
            ColorMode::Gamma15 => "Gamma 1.5",
            ColorMode::Gamma18 => "Gamma 1.8",
            ColorMode::Dithered => "Dithered",
            ColorMode::Dither2 => "Dither 2",
            ColorMode::Warm => "Warm",
            ColorMode::WarmPlus => "Warm+",
            ColorMode::Night => "Night",
            ColorMode::NightPlus => "Night+",
            ColorMode::NightDither => "Night dithered",
            ColorMode::NightDither2 => "Night dithered 2",
            ColorMode::Legacy => "Legacy",
        }
    }

    /// Next mode, wrapping.
    pub fn cycle(self, forward: bool) -> Self {
        let n = Self::ALL.len();
        let i = if forward { (self.index() + 1) % n } else { (self.index() + n - 1) % n };
        Self::ALL[i]
    }

    /// `Some(skip_black)` for the ordered-dither modes.
    fn dither(self) -> Option<bool> {
        match self {
            ColorMode::Dithered | ColorMode::NightDither => Some(true),
            ColorMode::Dither2 | ColorMode::NightDither2 => Some(false),
            _ => None,
        }
    }

    fn gamma_exponent(self) -> Option<f32> {
        match self {
            ColorMode::Gamma12 => Some(0.833),
            ColorMode::Gamma15 => Some(0.667),
            ColorMode::Gamma18 => Some(0.556),
            _ => None,
        }
    }

    /// Transform one RGB565 pixel at source position (x, y).
    pub fn apply_565(self, pixel: u16, x: usize, y: usize) -> u16 {
        if matches!(self, ColorMode::Unchanged | ColorMode::Legacy) {
            return pixel;
        }

        let tables = &*CHANNEL_TABLES;
        let m = self.index();
        let mut r = tables.r5[m][((pixel >> 11) & 0x1F) as usize] as i32;
        let mut g = tables.g6[m][((pixel >> 5) & 0x3F) as usize] as i32;
        let mut b = tables.b5[m][(pixel & 0x1F) as usize] as i32;

        if let Some(skip_black) = self.dither() {
            if !(skip_black && r == 0 && g == 0 && b == 0) {
                let d = BAYER_4X4[y & 3][x & 3] as i32;
                r = (r + (d >> 2)).clamp(0, 31);
                g = (g + (d >> 1)).clamp(0, 63);
                b = (b + (d >> 2)).clamp(0, 31);
            }
        }

        ((r << 11) | (g << 5) | b) as u16
    }

    /// Transform 8-bit channels at source position (x, y) and pack to RGB565.
    pub fn apply_rgb(self, r: i32, g: i32, b: i32, x: usize, y: usize) -> u16 {
        let (mut r, mut g, mut b) = (r.clamp(0, 255), g.clamp(0, 255), b.clamp(0, 255));

        match self {
            ColorMode::Unchanged | ColorMode::Legacy => {}
            ColorMode::Lift16 => {
                r = 16 + r * 239 / 255;
                g = 16 + g * 239 / 255;
                b = 16 + b * 239 / 255;
            }
            ColorMode::Lift32 => {
                r = 32 + r * 223 / 255;
                g = 32 + g * 223 / 255;
                b = 32 + b * 223 / 255;
            }
            ColorMode::Gamma12 | ColorMode::Gamma15 | ColorMode::Gamma18 => {
                let lut = &CHANNEL_TABLES.gamma8[self.index() - ColorMode::Gamma12.index()];
                r = lut[r as usize] as i32;
                g = lut[g as usize] as i32;
                b = lut[b as usize] as i32;
            }
            ColorMode::Warm => (r, g, b) = tint(r, g, b, [115, 80, 60]),
            ColorMode::WarmPlus => (r, g, b) = tint(r, g, b, [130, 60, 35]),
            ColorMode::Night => (r, g, b) = tint(r, g, b, [73, 50, 38]),
            ColorMode::NightPlus => (r, g, b) = tint(r, g, b, [31, 19, 16]),
            ColorMode::Dithered | ColorMode::Dither2 | ColorMode::NightDither | ColorMode::NightDither2 => {
                if matches!(self, ColorMode::NightDither | ColorMode::NightDither2) {
                    (r, g, b) = tint(r, g, b, [31, 19, 16]);
                }
                let skip_black = self.dither() == Some(true);
                if !(skip_black && r == 0 && g == 0 && b == 0) {
                    let d = BAYER_4X4[y & 3][x & 3] as i32;
                    r = (r + d).clamp(0, 255);
                    g = (g + d).clamp(0, 255);
                    b = (b + d).clamp(0, 255);
                }
            }
        }

        pack_rgb565(r, g, b)
    }
}

fn tint(r: i32, g: i32, b: i32, percent: [i32; 3]) -> (i32, i32, i32) {
    (
        (r * percent[0] / 100).min(255),
        (g * percent[1] / 100).min(255),
        (b * percent[2] / 100).min(255),
    )
}

#[inline]
pub fn pack_rgb565(r: i32, g: i32, b: i32) -> u16 {
    (((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3)) as u16
}

/// Ordered dither offsets, -8..=7.
const BAYER_4X4: [[i8; 4]; 4] = [
    [-8, 0, -6, 2],
    [4, -4, 6, -2],
    [-5, 3, -7, 1],
    [7, -1, 5, -3],
];

// ============================================================================
// Lookup Tables
// ============================================================================

struct ChannelTables {
    r5: [[u8; 32]; 15],
    g6: [[u8; 64]; 15],
    b5: [[u8; 32]; 15],
    /// 8-bit curves for the three gamma modes.
    gamma8: [[u8; 256]; 3],
}

static CHANNEL_TABLES: Lazy<ChannelTables> = Lazy::new(ChannelTables::build);

impl ChannelTables {
    fn build() -> Self {
        let mut t = ChannelTables {
            r5: [[0; 32]; 15],
            g6: [[0; 64]; 15],
            b5: [[0; 32]; 15],
            gamma8: [[0; 256]; 3],
        };

        for mode in ColorMode::ALL {
            let m = mode.index();
            for i in 0..32 {
                let (r, b) = Self::five_bit(mode, i as i32);
                t.r5[m][i] = r as u8;
                t.b5[m][i] = b as u8;
            }
            for i in 0..64 {
                t.g6[m][i] = Self::six_bit(mode, i as i32) as u8;
            }
        }

        for (slot, mode) in [ColorMode::Gamma12, ColorMode::Gamma15, ColorMode::Gamma18]
            .into_iter()
            .enumerate()
        {
            for i in 0..256 {
                t.gamma8[slot][i] = curve(i as i32, 255, mode.gamma_exponent().unwrap_or(1.0)) as u8;
            }
        }

        t
    }

    /// (red, blue) for a 5-bit input.
    fn five_bit(mode: ColorMode, i: i32) -> (i32, i32) {
        match mode {
            ColorMode::Lift16 => (4 + i * 27 / 31, 4 + i * 27 / 31),
            ColorMode::Lift32 => (8 + i * 23 / 31, 8 + i * 23 / 31),
            ColorMode::Gamma12 | ColorMode::Gamma15 | ColorMode::Gamma18 => {
                let v = curve(i, 31, mode.gamma_exponent().unwrap_or(1.0));
                (v, v)
            }
            ColorMode::Warm => ((i * 115 / 100).min(31), i * 60 / 100),
            ColorMode::WarmPlus => ((i * 130 / 100).min(31), i * 35 / 100),
            ColorMode::Night => ((i * 73 / 100).min(31), i * 38 / 100),
            ColorMode::NightPlus | ColorMode::NightDither | ColorMode::NightDither2 => {
                ((i * 31 / 100).min(31), i * 16 / 100)
            }
            ColorMode::Unchanged | ColorMode::Dithered | ColorMode::Dither2 | ColorMode::Legacy => (i, i),
        }
    }

    fn six_bit(mode: ColorMode, i: i32) -> i32 {
        match mode {
            ColorMode::Lift16 => 8 + i * 55 / 63,
            ColorMode::Lift32 => 16 + i * 47 / 63,
            ColorMode::Gamma12 | ColorMode::Gamma15 | ColorMode::Gamma18 => {
                curve(i, 63, mode.gamma_exponent().unwrap_or(1.0))
            }
            ColorMode::Warm => i * 80 / 100,
            ColorMode::WarmPlus => i * 60 / 100,
            ColorMode::Night => i * 50 / 100,
            ColorMode::NightPlus | ColorMode::NightDither | ColorMode::NightDither2 => i * 19 / 100,
            ColorMode::Unchanged | ColorMode::Dithered | ColorMode::Dither2 | ColorMode::Legacy => i,
        }
    }
}

fn curve(i: i32, max: i32, exponent: f32) -> i32 {
    let norm = i as f32 / max as f32;
    (max as f32 * norm.powf(exponent) + 0.5) as i32
}

// ============================================================================
// YUV 4:2:0
// ============================================================================

/// Luma mapping for decoded MPEG-4 pictures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoRange {
    /// Expand 16-235 to full range.
    #[default]
    Tv,
    /// Use luma as-is.
    Pc,
}

impl VideoRange {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(VideoRange::Tv),
            1 => Some(VideoRange::Pc),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

struct YuvTables {
    y: [[i16; 256]; 2],
    rv: [i16; 256],
    gu: [i16; 256],
    gv: [i16; 256],
    bu: [i16; 256],
}

static YUV_TABLES: Lazy<YuvTables> = Lazy::new(|| {
    let mut t = YuvTables {
        y: [[0; 256]; 2],
        rv: [0; 256],
        gu: [0; 256],
        gv: [0; 256],
        bu: [0; 256],
    };
    for i in 0..256 {
        let v = i as i32;
        t.y[VideoRange::Tv.index()][i] = (((v - 16) * 298) >> 8).clamp(0, 255) as i16;
        t.y[VideoRange::Pc.index()][i] = v as i16;

        // BT.601, 10-bit fixed point
        let uv = v - 128;
        t.rv[i] = ((1436 * uv) >> 10) as i16;
        t.gu[i] = ((-352 * uv) >> 10) as i16;
        t.gv[i] = ((-731 * uv) >> 10) as i16;
        t.bu[i] = ((1815 * uv) >> 10) as i16;
    }
    t
});

/// Planar 4:2:0 picture. Chroma planes are half width and half height,
/// rounded up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvPicture {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl YuvPicture {
    pub fn new(width: usize, height: usize) -> Self {
        let chroma = ((width + 1) / 2) * ((height + 1) / 2);
        Self {
            width,
            height,
            y: vec![0; width * height],
            u: vec![128; chroma],
            v: vec![128; chroma],
        }
    }

    pub fn y_stride(&self) -> usize {
        self.width
    }

    pub fn uv_stride(&self) -> usize {
        (self.width + 1) / 2
    }
}

/// Convert a 4:2:0 picture into the framebuffer at `placement`.
pub fn yuv420_to_rgb565(
    picture: &YuvPicture,
    range: VideoRange,
    mode: ColorMode,
    placement: &Placement,
    fb: &mut Framebuffer,
) {
    let t = &*YUV_TABLES;
    let y_table = &t.y[range.index()];
    let (ys, uvs) = (picture.y_stride(), picture.uv_stride());

    for j in 0..picture.height {
        if placement.offset_y + j * placement.scale >= fb.height() {
            break;
        }
        let y_row = &picture.y[j * ys..(j + 1) * ys];
        let uv_row = (j >> 1) * uvs;

        for i in 0..picture.width {
            if placement.offset_x + i * placement.scale >= fb.width() {
                break;
            }
            let luma = y_table[y_row[i] as usize] as i32;
            let u = picture.u[uv_row + (i >> 1)] as usize;
            let v = picture.v[uv_row + (i >> 1)] as usize;

            let r = luma + t.rv[v] as i32;
            let g = luma + t.gu[u] as i32 + t.gv[v] as i32;
            let b = luma + t.bu[u] as i32;

            placement.put(fb, i, j, mode.apply_rgb(r, g, b, i, j));
        }
    }
}
