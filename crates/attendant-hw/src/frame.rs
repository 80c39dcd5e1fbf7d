//! Frame type and pixel conversions: YUYV/GREY/JPEG to packed RGB.

use image::{ImageFormat, RgbImage};

/// A captured colour frame, packed RGB888 (width * height * 3 bytes).
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence)
    }

    /// Borrow-free copy as an `image` buffer, `None` if the byte count is off.
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Resize by `factor` (e.g. 0.5 for half resolution).
    pub fn scaled(&self, factor: f32) -> Option<Frame> {
        let image = self.to_image()?;
        let w = ((self.width as f32 * factor).round() as u32).max(1);
        let h = ((self.height as f32 * factor).round() as u32).max(1);
        let resized = image::imageops::resize(&image, w, h, image::imageops::FilterType::Triangle);
        let mut frame = Frame::from_image(resized, self.sequence);
        frame.timestamp = self.timestamp;
        Some(frame)
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected || pixels % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Expand 8-bit grayscale to RGB by replicating the channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&p| [p, p, p]).collect())
}

/// Decode a JPEG buffer (MJPG camera frame or HTTP snapshot) to RGB.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map(|img| img.into_rgb8())
        .map_err(|e| FrameError::Decode(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1 image: Y0=16 (black), Y1=235 (white), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // Strong Cr pushes red up and green down.
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red = {}", rgb[0]);
        assert!(rgb[1] < 50, "green = {}", rgb[1]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_decode_jpeg_rejects_garbage() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let img = RgbImage::from_pixel(8, 6, image::Rgb([120, 60, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
        let decoded = decode_jpeg(bytes.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
    }

    #[test]
    fn test_scaled_frame() {
        let frame = Frame::new(vec![10u8; 8 * 4 * 3], 8, 4, 3);
        let half = frame.scaled(0.5).unwrap();
        assert_eq!((half.width, half.height), (4, 2));
        assert_eq!(half.data.len(), 4 * 2 * 3);
        assert_eq!(half.sequence, 3);
    }
}
