//! Screen capture payload decoding with line-ending repair
//!
//! Some transports translate every `\n` in a binary stream into `\r\n`. The
//! decoder detects this on first use and remembers it: once a payload only
//! decodes after stripping `\r`, every later payload is stripped up front.

use flate2::read::GzDecoder;
use image::{ImageFormat, RgbImage};
use std::io::Read;
use tracing::{error, info};

/// Line-ending behaviour detected on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfLine {
    #[default]
    UnknownYet,
    Lf,
    Crlf,
}

/// Payload encodings produced by the capture commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `screencap` raw dump: header then RGBA pixels
    Raw,
    /// Raw dump piped through gzip
    Gzip,
    Png,
    /// JPEG surrounded by text, as `minicap -s` prints it
    MinicapJpeg,
}

/// Per-strategy decoder holding the expected frame size and line-ending mode
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    width: u32,
    height: u32,
    end_of_line: EndOfLine,
}

impl FrameDecoder {
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn end_of_line(&self) -> EndOfLine {
        self.end_of_line
    }

    /// Decode a payload, repairing `\r\n` translation when needed
    pub fn process_data(&mut self, mut buffer: Vec<u8>, encoding: Encoding) -> Option<RgbImage> {
        let mut tried_clean = false;

        if self.end_of_line == EndOfLine::Crlf {
            tried_clean = true;
            if !clean_cr(&mut buffer) {
                info!("end of line is CRLF but no \\r\\n found, switching to LF");
                self.end_of_line = EndOfLine::Lf;
            }
        }

        if let Some(image) = self.decode(&buffer, encoding) {
            if self.end_of_line == EndOfLine::UnknownYet {
                info!("end of line is LF");
                self.end_of_line = EndOfLine::Lf;
            }
            return Some(image);
        }

        if tried_clean {
            error!("decode failed after cleaning, size: {}", buffer.len());
            return None;
        }

        info!("decode failed, retrying with \\r\\n converted to \\n");
        if !clean_cr(&mut buffer) {
            error!("no \\r\\n found, skip retry");
            return None;
        }

        let image = self.decode(&buffer, encoding);
        if image.is_none() {
            error!("decode failed after converting line endings");
            return None;
        }

        if self.end_of_line == EndOfLine::UnknownYet {
            info!("end of line is CRLF");
        } else {
            info!("end of line changed to CRLF");
        }
        self.end_of_line = EndOfLine::Crlf;
        image
    }

    fn decode(&self, buffer: &[u8], encoding: Encoding) -> Option<RgbImage> {
        match encoding {
            Encoding::Raw => self.decode_raw(buffer),
            Encoding::Gzip => self.decode_gzip(buffer),
            Encoding::Png => decode_png(buffer),
            Encoding::MinicapJpeg => decode_jpeg_in_output(buffer),
        }
    }

    /// Decode a raw dump: `u32` LE width and height, then trailing RGBA pixels
    pub fn decode_raw(&self, buffer: &[u8]) -> Option<RgbImage> {
        if buffer.len() < 8 {
            return None;
        }

        let width = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        let height = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
        if width != self.width || height != self.height {
            error!(
                "raw frame size {}x{} doesn't match {}x{}",
                width, height, self.width, self.height
            );
            return None;
        }

        let size = 4usize * width as usize * height as usize;
        if size == 0 || buffer.len() < size {
            return None;
        }

        let pixels = &buffer[buffer.len() - size..];
        // only the alpha of the last pixel is checked
        if pixels[size - 1] != 255 {
            return None;
        }

        let rgb: Vec<u8> = pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        RgbImage::from_raw(width, height, rgb)
    }

    pub fn decode_gzip(&self, buffer: &[u8]) -> Option<RgbImage> {
        let mut raw = Vec::new();
        if let Err(e) = GzDecoder::new(buffer).read_to_end(&mut raw) {
            error!("gunzip failed: {}", e);
            return None;
        }
        self.decode_raw(&raw)
    }
}

pub fn decode_png(buffer: &[u8]) -> Option<RgbImage> {
    image::load_from_memory_with_format(buffer, ImageFormat::Png)
        .map(|image| image.to_rgb8())
        .ok()
}

pub fn decode_jpeg(buffer: &[u8]) -> Option<RgbImage> {
    image::load_from_memory_with_format(buffer, ImageFormat::Jpeg)
        .map(|image| image.to_rgb8())
        .ok()
}

/// Decode the JPEG between the first SOI and the last EOI marker
pub fn decode_jpeg_in_output(buffer: &[u8]) -> Option<RgbImage> {
    let begin = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer.windows(2).rposition(|w| w == [0xFF, 0xD9])? + 2;
    if end <= begin {
        error!("jpeg end marker before start marker");
        return None;
    }
    decode_jpeg(&buffer[begin..end])
}

/// Replace every `\r\n` with `\n` in place; false if none was found
pub fn clean_cr(buffer: &mut Vec<u8>) -> bool {
    let Some(first) = buffer.windows(2).position(|w| w == b"\r\n") else {
        return false;
    };

    let mut write = first;
    for read in first..buffer.len() {
        let byte = buffer[read];
        if byte == b'\r' && buffer.get(read + 1) == Some(&b'\n') {
            continue;
        }
        buffer[write] = byte;
        write += 1;
    }
    buffer.truncate(write);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{crlf, gzip, jpeg_bytes, png_bytes, raw_frame};

    fn decoder(width: u32, height: u32) -> FrameDecoder {
        let mut decoder = FrameDecoder::default();
        decoder.set_size(width, height);
        decoder
    }

    #[test]
    fn test_clean_cr() {
        let mut data = b"a\r\nb\rc\r\n\r".to_vec();
        assert!(clean_cr(&mut data));
        assert_eq!(data, b"a\nb\rc\n\r");

        let mut plain = b"abc\n".to_vec();
        assert!(!clean_cr(&mut plain));
        assert_eq!(plain, b"abc\n");
    }

    #[test]
    fn test_decode_raw() {
        let decoder = decoder(2, 2);
        let image = decoder.decode_raw(&raw_frame(2, 2)).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 0), &image::Rgb([1, 20, 30]));
    }

    #[test]
    fn test_decode_raw_rejects_mismatch() {
        assert!(decoder(3, 2).decode_raw(&raw_frame(2, 2)).is_none());
        assert!(decoder(2, 2).decode_raw(&[0, 1, 2]).is_none());

        let mut translucent = raw_frame(2, 2);
        let last = translucent.len() - 1;
        translucent[last] = 0;
        assert!(decoder(2, 2).decode_raw(&translucent).is_none());
    }

    #[test]
    fn test_decode_gzip() {
        let image = decoder(4, 4).decode_gzip(&gzip(&raw_frame(4, 4))).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
    }

    #[test]
    fn test_decode_jpeg_in_output() {
        let mut output = b"PID: 4242\nINFO: (jni/minicap/minicap.cpp) taking screenshot\n".to_vec();
        output.extend(jpeg_bytes(6, 4));
        output.extend(b"\nINFO: done\n");

        let image = decode_jpeg_in_output(&output).unwrap();
        assert_eq!(image.dimensions(), (6, 4));

        assert!(decode_jpeg_in_output(b"PID: 4242\nno frame\n").is_none());
        assert!(decode_jpeg_in_output(&[0xFF, 0xD9, 0x00, 0xFF, 0xD8]).is_none());
    }

    #[test]
    fn test_minicap_output_crlf_repair() {
        let mut output = b"PID: 4242\n".to_vec();
        output.extend(jpeg_bytes(6, 4));
        let mangled = crlf(&output);

        let mut decoder = decoder(6, 4);
        let image = decoder.process_data(mangled, Encoding::MinicapJpeg);
        assert_eq!(image.map(|i| i.dimensions()), Some((6, 4)));
    }

    #[test]
    fn test_lf_locked_on_first_success() {
        let mut decoder = decoder(8, 8);
        assert!(decoder.process_data(png_bytes(8, 8), Encoding::Png).is_some());
        assert_eq!(decoder.end_of_line(), EndOfLine::Lf);
    }

    #[test]
    fn test_crlf_repair_is_sticky() {
        let mut decoder = decoder(8, 8);
        let png = png_bytes(8, 8);
        let mangled = crlf(&png);
        assert_ne!(png, mangled);

        assert!(decoder.process_data(mangled.clone(), Encoding::Png).is_some());
        assert_eq!(decoder.end_of_line(), EndOfLine::Crlf);

        // stays CRLF and strips before the first decode attempt
        assert!(decoder.process_data(mangled, Encoding::Png).is_some());
        assert_eq!(decoder.end_of_line(), EndOfLine::Crlf);
    }

    #[test]
    fn test_crlf_mode_falls_back_to_lf() {
        let mut decoder = FrameDecoder {
            width: 1,
            height: 1,
            end_of_line: EndOfLine::Crlf,
        };
        let mut payload = raw_frame(1, 1);
        assert!(!payload.windows(2).any(|w| w == b"\r\n"));

        assert!(decoder.process_data(payload.clone(), Encoding::Raw).is_some());
        assert_eq!(decoder.end_of_line(), EndOfLine::Lf);

        payload.truncate(4);
        assert!(decoder.process_data(payload, Encoding::Raw).is_none());
        assert_eq!(decoder.end_of_line(), EndOfLine::Lf);
    }

    #[test]
    fn test_garbage_fails_without_changing_mode() {
        let mut decoder = decoder(8, 8);
        assert!(decoder.process_data(b"garbage".to_vec(), Encoding::Png).is_none());
        assert_eq!(decoder.end_of_line(), EndOfLine::UnknownYet);
    }
}
