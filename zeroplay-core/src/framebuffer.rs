//! Fixed-resolution RGB565 display buffer and integer-scale placement.

pub const DISPLAY_WIDTH: usize = 320;
pub const DISPLAY_HEIGHT: usize = 240;

const MAX_SCALE: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: usize,
    height: usize,
    pixels: Vec<u16>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn display() -> Self {
        Self::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major RGB565, `width` pixels per row.
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, pixel: u16) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = pixel;
        }
    }

    pub fn copy_from(&mut self, other: &Framebuffer) {
        if self.width == other.width && self.height == other.height {
            self.pixels.copy_from_slice(&other.pixels);
        } else {
            *self = other.clone();
        }
    }

    /// Expand to packed RGB888 for image export.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 3);
        for &p in &self.pixels {
            let r = ((p >> 11) & 0x1F) as u8;
            let g = ((p >> 5) & 0x3F) as u8;
            let b = (p & 0x1F) as u8;
            out.push((r << 3) | (r >> 2));
            out.push((g << 2) | (g >> 4));
            out.push((b << 3) | (b >> 2));
        }
        out
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Framebuffer({}x{})", self.width, self.height)
    }
}

/// Where a source picture lands on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub source_width: usize,
    pub source_height: usize,
    pub scale: usize,
    pub offset_x: usize,
    pub offset_y: usize,
}

impl Placement {
    /// Largest integer scale (up to 3x) that fits, centered. Oversized
    /// sources are pinned to the top-left and cropped.
    pub fn fit(source_width: usize, source_height: usize, target_width: usize, target_height: usize) -> Self {
        let scale = (1..=MAX_SCALE)
            .rev()
            .find(|&s| source_width * s <= target_width && source_height * s <= target_height)
            .unwrap_or(1);

        Self {
            source_width,
            source_height,
            scale,
            offset_x: target_width.saturating_sub(source_width * scale) / 2,
            offset_y: target_height.saturating_sub(source_height * scale) / 2,
        }
    }

    /// Write one source pixel as a `scale` x `scale` block.
    #[inline]
    pub fn put(&self, fb: &mut Framebuffer, x: usize, y: usize, pixel: u16) {
        let dx = self.offset_x + x * self.scale;
        let dy = self.offset_y + y * self.scale;
        for sy in 0..self.scale {
            for sx in 0..self.scale {
                fb.set(dx + sx, dy + sy, pixel);
            }
        }
    }
}
