//! Packed RGBA8 image.

use crate::{DenoiseError, DenoiseResult};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Row-major RGBA8 image with stride `width * 4`.
///
/// Used both for the caller's source image and for the filtered result.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Image {
    /// Create from tightly packed RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> DenoiseResult<Self> {
        if width == 0 || height == 0 {
            return Err(DenoiseError::InvalidDimensions(width, height));
        }
        let expected = packed_len(width, height);
        if data.len() != expected {
            return Err(DenoiseError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Image filled with a single RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> DenoiseResult<Self> {
        if width == 0 || height == 0 {
            return Err(DenoiseError::InvalidDimensions(width, height));
        }
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(packed_len(width, height))
            .collect();
        Ok(Self { data, width, height })
    }

    /// Caller guarantees `data.len() == width * height * 4`.
    pub(crate) fn from_parts(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), packed_len(width, height));
        Self { data, width, height }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Image dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Packed pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per row (no padding).
    pub fn stride(&self) -> usize {
        (self.width * BYTES_PER_PIXEL) as usize
    }

    /// RGBA value at `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Set the RGBA value at `(x, y)`.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride() + x as usize * BYTES_PER_PIXEL as usize
    }
}

/// Length of a tightly packed RGBA8 buffer.
pub(crate) fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL as usize
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let err = Image::from_rgba8(2, 2, vec![0; 15]).unwrap_err();
        assert_eq!(err, DenoiseError::BufferSizeMismatch { expected: 16, actual: 15 });
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            Image::from_rgba8(0, 4, Vec::new()).unwrap_err(),
            DenoiseError::InvalidDimensions(0, 4)
        );
    }

    #[test]
    fn test_pixel_access() {
        let mut img = Image::filled(3, 2, [1, 2, 3, 4]).unwrap();
        assert_eq!(img.pixel(2, 1), [1, 2, 3, 4]);
        img.put_pixel(2, 1, [9, 8, 7, 6]);
        assert_eq!(img.pixel(2, 1), [9, 8, 7, 6]);
        assert_eq!(img.data()[20..24], [9, 8, 7, 6]);
        assert_eq!(img.stride(), 12);
    }
}
