//! Readback reconciliation: strip device row padding.
//!
//! Texture-to-buffer copies require each row to start on an
//! alignment boundary (256 bytes for wgpu), so a `width * 4` row is padded
//! up to the next multiple. [`RawReadback`] keeps the padded bytes as the
//! device wrote them; [`RawReadback::into_packed`] copies out the first
//! `width * 4` bytes of every row.

use crate::image::{BYTES_PER_PIXEL, Image, packed_len};
use crate::{GpuError, GpuResult};

/// Row alignment required for texture-to-buffer copies.
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// `width * 4` rounded up to a multiple of `alignment`.
pub fn padded_bytes_per_row(width: u32, alignment: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let alignment = alignment.max(1);
    unpadded.div_ceil(alignment) * alignment
}

/// Bytes copied back from an output surface, rows possibly padded.
#[derive(Clone)]
pub struct RawReadback {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

impl RawReadback {
    /// Wrap padded bytes. Fails if the stride cannot hold a row or the
    /// buffer is shorter than `stride * height`.
    pub fn new(bytes: Vec<u8>, width: u32, height: u32, padded_bytes_per_row: u32) -> GpuResult<Self> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions(width, height));
        }
        if padded_bytes_per_row < width * BYTES_PER_PIXEL {
            return Err(GpuError::OperationFailed(format!(
                "row stride {padded_bytes_per_row} is smaller than a {width}-pixel row"
            )));
        }
        let expected = padded_bytes_per_row as usize * height as usize;
        if bytes.len() < expected {
            return Err(GpuError::BufferSizeMismatch { expected, actual: bytes.len() });
        }
        Ok(Self { bytes, width, height, padded_bytes_per_row })
    }

    /// Raw padded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Dimensions of the image the rows belong to.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Device row stride in bytes.
    pub fn padded_bytes_per_row(&self) -> u32 {
        self.padded_bytes_per_row
    }

    /// Tightly packed copy of the rows, padding dropped.
    pub fn into_packed(self) -> Image {
        let row = (self.width * BYTES_PER_PIXEL) as usize;
        let stride = self.padded_bytes_per_row as usize;

        if row == stride {
            let mut bytes = self.bytes;
            bytes.truncate(packed_len(self.width, self.height));
            return Image::from_parts(self.width, self.height, bytes);
        }

        let mut packed = Vec::with_capacity(packed_len(self.width, self.height));
        for chunk in self.bytes.chunks(stride).take(self.height as usize) {
            packed.extend_from_slice(&chunk[..row]);
        }
        Image::from_parts(self.width, self.height, packed)
    }
}

impl std::fmt::Debug for RawReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawReadback")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("padded_bytes_per_row", &self.padded_bytes_per_row)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_stride() {
        assert_eq!(padded_bytes_per_row(100, 256), 512);
        assert_eq!(padded_bytes_per_row(64, 256), 256);
        assert_eq!(padded_bytes_per_row(65, 256), 512);
        assert_eq!(padded_bytes_per_row(1, 256), 256);
        assert_eq!(padded_bytes_per_row(3, 1), 12);
    }

    #[test]
    fn test_strip_padding_rows_stay_sharp() {
        // width 100 -> 400 byte rows in 512 byte strides; pad filled with 0xEE
        let (w, h) = (100u32, 6u32);
        let stride = padded_bytes_per_row(w, COPY_BYTES_PER_ROW_ALIGNMENT);
        let mut bytes = vec![0xEE; (stride * h) as usize];
        for y in 0..h {
            let start = (y * stride) as usize;
            let color = [y as u8 * 40, 255 - y as u8, y as u8, 255];
            for px in bytes[start..start + (w * 4) as usize].chunks_mut(4) {
                px.copy_from_slice(&color);
            }
        }

        let image = RawReadback::new(bytes, w, h, stride).unwrap().into_packed();
        assert_eq!(image.size_bytes(), (w * h * 4) as usize);
        for y in 0..h {
            let color = [y as u8 * 40, 255 - y as u8, y as u8, 255];
            for x in 0..w {
                assert_eq!(image.pixel(x, y), color, "row {y} col {x}");
            }
        }
        assert!(!image.data().contains(&0xEE));
    }

    #[test]
    fn test_unpadded_passthrough() {
        let bytes: Vec<u8> = (0..=255).collect();
        let image = RawReadback::new(bytes.clone(), 64, 1, 256).unwrap().into_packed();
        assert_eq!(image.data(), &bytes[..]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = RawReadback::new(vec![0; 511], 100, 1, 512).unwrap_err();
        assert!(matches!(err, GpuError::BufferSizeMismatch { expected: 512, actual: 511 }));
    }
}
