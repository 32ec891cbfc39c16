//! Captured screen frames

use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, ImageFormat, RgbImage};
use std::io::Cursor;

use crate::error::Result;

/// An owned RGB screen capture
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    image: RgbImage,
}

impl CapturedFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Resize to exactly `width` x `height`
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        Self {
            image: image::imageops::resize(&self.image, width, height, FilterType::Triangle),
        }
    }

    /// Encode as PNG bytes
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Encode as base64 PNG, the form vision front ends consume
    pub fn to_base64(&self) -> Result<String> {
        Ok(general_purpose::STANDARD.encode(self.encode_png()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trip_keeps_size() {
        let frame = CapturedFrame::new(RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3])));
        let png = frame.encode_png().unwrap();

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(3, 2), &image::Rgb([1, 2, 3]));
    }

    #[test]
    fn test_resized() {
        let frame = CapturedFrame::new(RgbImage::new(1920, 1080));
        let small = frame.resized(1280, 720);
        assert_eq!((small.width(), small.height()), (1280, 720));
    }

    #[test]
    fn test_to_base64() {
        let frame = CapturedFrame::new(RgbImage::new(1, 1));
        let encoded = frame.to_base64().unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }
}
