//! Baseline JPEG engine on top of the `image` crate.

use image::ImageFormat;

use crate::engine::{EngineError, JpegEngine, JpegSink};
use crate::pixel_convert::pack_rgb565;

#[derive(Debug, Default)]
pub struct ImageJpegEngine;

impl ImageJpegEngine {
    pub fn new() -> Self {
        Self
    }
}

impl JpegEngine for ImageJpegEngine {
    fn decode(&mut self, jpeg: &[u8], sink: &mut dyn JpegSink) -> Result<(), EngineError> {
        let picture = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map_err(|e| EngineError::Failed(format!("JPEG: {}", e)))?
            .into_rgb8();

        let (width, height) = picture.dimensions();
        sink.begin(width as usize, height as usize);
        for (x, y, px) in picture.enumerate_pixels() {
            sink.put(
                x as usize,
                y as usize,
                pack_rgb565(px[0] as i32, px[1] as i32, px[2] as i32),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_jpeg;

    #[derive(Default)]
    struct Collect {
        size: Option<(usize, usize)>,
        pixels: Vec<u16>,
    }

    impl JpegSink for Collect {
        fn begin(&mut self, width: usize, height: usize) {
            self.size = Some((width, height));
        }
        fn put(&mut self, _x: usize, _y: usize, pixel: u16) {
            self.pixels.push(pixel);
        }
    }

    #[test]
    fn test_decodes_into_sink() {
        let jpeg = test_jpeg(24, 8, [255, 255, 255]);
        let mut sink = Collect::default();
        ImageJpegEngine::new().decode(&jpeg, &mut sink).expect("decode");

        assert_eq!(sink.size, Some((24, 8)));
        assert_eq!(sink.pixels.len(), 24 * 8);
        // near-white survives lossy coding
        assert!(sink.pixels.iter().all(|&p| p >> 11 >= 30));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut sink = Collect::default();
        let err = ImageJpegEngine::new().decode(&[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9], &mut sink);
        assert!(err.is_err());
        assert!(sink.pixels.is_empty());
    }
}
