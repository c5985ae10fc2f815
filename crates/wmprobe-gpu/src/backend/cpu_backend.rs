//! CPU backend using rayon for parallelization.
//!
//! Emulates the device contract on the host: surfaces hold rgba8unorm
//! texels, the kernel samples them as normalized floats, the dispatch runs
//! one task per band of 8x8 tiles, and readback pads rows to the copy
//! alignment exactly like a texture-to-buffer copy would.

use rayon::prelude::*;

use super::gpu_primitives::{GpuPrimitives, ParamsUniform, SurfaceHandle};
use super::tiling::{GpuLimits, TILE_SIZE, Tile, generate_tiles};
use crate::image::{BYTES_PER_PIXEL, Image, packed_len};
use crate::kernel::{clamp_coord, mix};
use crate::readback::{RawReadback, padded_bytes_per_row};
use crate::{GpuError, GpuResult};

/// CPU surface - rgba8 texels stored in RAM, tightly packed.
pub struct CpuSurface {
    texels: Vec<u8>,
    width: u32,
    height: u32,
}

impl CpuSurface {
    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL as usize;
        let t = &self.texels[i..i + 4];
        [unorm(t[0]), unorm(t[1]), unorm(t[2]), unorm(t[3])]
    }
}

impl SurfaceHandle for CpuSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[inline]
fn unorm(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn store_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// CPU primitives implementation.
pub struct CpuPrimitives {
    limits: GpuLimits,
}

impl CpuPrimitives {
    pub fn new() -> Self {
        Self::with_limits(GpuLimits {
            max_texture_dim: u32::MAX,
            ..GpuLimits::default()
        })
    }

    /// Create with explicit limits (e.g. to mirror a real device).
    pub fn with_limits(limits: GpuLimits) -> Self {
        Self { limits }
    }

    /// One kernel invocation at global id `(x, y)`.
    fn invoke(src: &CpuSurface, x: u32, y: u32, params: &ParamsUniform) -> [u8; 4] {
        let (w, h) = (src.width, src.height);
        let origin = src.texel(x, y);
        let r = params.radius as i64;

        let mut sum = [0.0f32; 3];
        let mut count = 0.0f32;
        for dy in -r..=r {
            let sy = clamp_coord(y, dy, h);
            for dx in -r..=r {
                let t = src.texel(clamp_coord(x, dx, w), sy);
                sum[0] += t[0];
                sum[1] += t[1];
                sum[2] += t[2];
                count += 1.0;
            }
        }

        let blend = params.blend;
        [
            store_unorm(mix(origin[0], sum[0] / count, blend)),
            store_unorm(mix(origin[1], sum[1] / count, blend)),
            store_unorm(mix(origin[2], sum[2] / count, blend)),
            store_unorm(origin[3]),
        ]
    }
}

impl Default for CpuPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuPrimitives for CpuPrimitives {
    type Surface = CpuSurface;

    fn upload(&self, image: &Image) -> GpuResult<Self::Surface> {
        let (width, height) = image.dimensions();
        Ok(CpuSurface { texels: image.data().to_vec(), width, height })
    }

    fn allocate(&self, width: u32, height: u32) -> GpuResult<Self::Surface> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions(width, height));
        }
        Ok(CpuSurface { texels: vec![0; packed_len(width, height)], width, height })
    }

    fn exec_denoise(&self, src: &Self::Surface, dst: &mut Self::Surface, params: &ParamsUniform) -> GpuResult<()> {
        if src.dimensions() != dst.dimensions() {
            return Err(GpuError::BufferSizeMismatch {
                expected: src.texels.len(),
                actual: dst.texels.len(),
            });
        }
        let (w, h) = src.dimensions();
        let row_bytes = (w * BYTES_PER_PIXEL) as usize;
        let band_bytes = row_bytes * TILE_SIZE as usize;
        let tiles = generate_tiles(w, h);
        let tiles_per_band = tiles.len() / (h.div_ceil(TILE_SIZE) as usize);

        // Each band is one row of tiles and owns its rows of the output, so
        // writes stay disjoint.
        dst.texels
            .par_chunks_mut(band_bytes)
            .zip(tiles.par_chunks(tiles_per_band))
            .for_each(|(band, band_tiles)| {
                for tile in band_tiles {
                    run_tile(src, tile, band, row_bytes, params);
                }
            });

        Ok(())
    }

    fn read_back(&self, surface: &Self::Surface) -> GpuResult<RawReadback> {
        let (w, h) = surface.dimensions();
        let row = (w * BYTES_PER_PIXEL) as usize;
        let stride = padded_bytes_per_row(w, self.limits.row_alignment);

        let mut bytes = vec![0u8; stride as usize * h as usize];
        for (dst, src) in bytes.chunks_mut(stride as usize).zip(surface.texels.chunks(row)) {
            dst[..row].copy_from_slice(src);
        }

        RawReadback::new(bytes, w, h, stride)
    }

    fn limits(&self) -> &GpuLimits { &self.limits }
    fn name(&self) -> &'static str { "cpu" }
}

fn run_tile(src: &CpuSurface, tile: &Tile, band: &mut [u8], row_bytes: usize, params: &ParamsUniform) {
    let (w, h) = src.dimensions();
    for (gx, gy) in tile.invocations(w, h) {
        let local_y = (gy - tile.y) as usize;
        let i = local_y * row_bytes + gx as usize * BYTES_PER_PIXEL as usize;
        band[i..i + 4].copy_from_slice(&CpuPrimitives::invoke(src, gx, gy, params));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FilterParams;

    #[test]
    fn test_dispatch_writes_every_pixel() {
        let prims = CpuPrimitives::new();
        let img = Image::filled(13, 11, [10, 20, 30, 40]).unwrap();
        let src = prims.upload(&img).unwrap();
        let mut dst = prims.allocate(13, 11).unwrap();
        let params = ParamsUniform::from(&FilterParams::new(2, 1.0).unwrap());

        prims.exec_denoise(&src, &mut dst, &params).unwrap();
        assert_eq!(dst.texels, img.data());
    }

    #[test]
    fn test_readback_is_padded() {
        let prims = CpuPrimitives::new();
        let img = Image::filled(100, 3, [1, 2, 3, 4]).unwrap();
        let surface = prims.upload(&img).unwrap();
        let raw = prims.read_back(&surface).unwrap();

        assert_eq!(raw.padded_bytes_per_row(), 512);
        assert_eq!(raw.bytes().len(), 512 * 3);
        assert_eq!(&raw.bytes()[400..512], &[0u8; 112][..]);
        assert_eq!(raw.into_packed(), img);
    }

    #[test]
    fn test_mismatched_surfaces_rejected() {
        let prims = CpuPrimitives::new();
        let src = prims.allocate(4, 4).unwrap();
        let mut dst = prims.allocate(4, 5).unwrap();
        let params = ParamsUniform::from(&FilterParams::default());
        assert!(prims.exec_denoise(&src, &mut dst, &params).is_err());
    }
}
