//! Box-average denoise kernel and its sequential (host) evaluation.
//!
//! For pixel `(x, y)` and radius `r`:
//!
//! ```text
//! avg   = mean of src[clamp(x+dx, 0, w-1), clamp(y+dy, 0, h-1)]  for dx, dy in [-r, r]
//! out   = mix(src.rgb, avg, blend) = src.rgb * (1 - blend) + avg * blend
//! out.a = src.a
//! ```
//!
//! Out-of-range offsets clamp to the nearest edge pixel, so edge pixels are
//! counted more than once. The compute shader in `shaders::DENOISE`
//! evaluates the same formula on the device.

use crate::image::{Image, packed_len};
use crate::{DenoiseError, DenoiseResult};
#[allow(unused_imports)]
use tracing::{debug, trace};

/// Filter parameters for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    radius: u32,
    blend: f32,
}

impl FilterParams {
    /// Radius used when none is given.
    pub const DEFAULT_RADIUS: u32 = 2;
    /// Blend used when none is given.
    pub const DEFAULT_BLEND: f32 = 0.5;
    /// Largest accepted radius. The window sample count stays below 2^24,
    /// so the shader's f32 counter is exact.
    pub const MAX_RADIUS: u32 = 1024;

    /// Create parameters, validating `radius <= MAX_RADIUS` and that `blend`
    /// is a finite value in `[0, 1]`.
    pub fn new(radius: u32, blend: f32) -> DenoiseResult<Self> {
        if radius > Self::MAX_RADIUS {
            return Err(DenoiseError::InvalidParams(format!(
                "radius must be at most {}, got {radius}",
                Self::MAX_RADIUS
            )));
        }
        if !blend.is_finite() || !(0.0..=1.0).contains(&blend) {
            return Err(DenoiseError::InvalidParams(format!(
                "blend must be within [0, 1], got {blend}"
            )));
        }
        Ok(Self { radius, blend })
    }

    /// Window half-width in pixels.
    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// 0 keeps the original, 1 is fully blurred.
    pub fn blend(&self) -> f32 {
        self.blend
    }
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            radius: Self::DEFAULT_RADIUS,
            blend: Self::DEFAULT_BLEND,
        }
    }
}

/// Side length of the square averaging window.
pub fn window_side(radius: u32) -> u64 {
    2 * radius as u64 + 1
}

/// Clamp `base + offset` into `[0, extent - 1]`.
#[inline]
pub(crate) fn clamp_coord(base: u32, offset: i64, extent: u32) -> u32 {
    (base as i64 + offset).clamp(0, extent as i64 - 1) as u32
}

/// Mean RGB over the clamped window around `(x, y)`, in 0..=255 units.
pub fn box_average(image: &Image, x: u32, y: u32, radius: u32) -> [f32; 3] {
    let (w, h) = image.dimensions();
    let r = radius as i64;
    let mut sum = [0u64; 3];

    for dy in -r..=r {
        let sy = clamp_coord(y, dy, h);
        for dx in -r..=r {
            let sx = clamp_coord(x, dx, w);
            let p = image.pixel(sx, sy);
            sum[0] += p[0] as u64;
            sum[1] += p[1] as u64;
            sum[2] += p[2] as u64;
        }
    }

    let count = window_side(radius).pow(2) as f64;
    [
        (sum[0] as f64 / count) as f32,
        (sum[1] as f64 / count) as f32,
        (sum[2] as f64 / count) as f32,
    ]
}

/// Linear blend, same operand order as WGSL `mix`.
#[inline]
pub(crate) fn mix(original: f32, blurred: f32, blend: f32) -> f32 {
    original * (1.0 - blend) + blurred * blend
}

/// Round to nearest and clamp into a byte.
#[inline]
fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Filtered RGBA value for one pixel. Alpha is copied from the source.
pub fn denoise_pixel(image: &Image, x: u32, y: u32, params: &FilterParams) -> [u8; 4] {
    let src = image.pixel(x, y);
    if params.radius == 0 {
        return src;
    }
    let avg = box_average(image, x, y, params.radius);
    let blend = params.blend;
    [
        quantize(mix(src[0] as f32, avg[0], blend)),
        quantize(mix(src[1] as f32, avg[1], blend)),
        quantize(mix(src[2] as f32, avg[2], blend)),
        src[3],
    ]
}

/// Apply the filter to the whole image on the calling thread, row-major.
///
/// Reads only `image`. The output buffer is reserved up front; an
/// allocation failure is reported as [`DenoiseError::OutOfMemory`].
pub fn denoise_sequential(image: &Image, params: &FilterParams) -> DenoiseResult<Image> {
    denoise_sequential_with_limit(image, params, None)
}

/// [`denoise_sequential`] refusing outputs larger than `limit` bytes.
pub fn denoise_sequential_with_limit(
    image: &Image,
    params: &FilterParams,
    limit: Option<usize>,
) -> DenoiseResult<Image> {
    let (w, h) = image.dimensions();
    trace!(w, h, radius = params.radius, blend = params.blend, ?limit, "denoise_sequential");

    let mut out = reserve_output(packed_len(w, h), limit)?;

    for y in 0..h {
        for x in 0..w {
            out.extend_from_slice(&denoise_pixel(image, x, y, params));
        }
    }

    debug!(w, h, "Sequential denoise complete");
    Ok(Image::from_parts(w, h, out))
}

fn reserve_output(bytes: usize, limit: Option<usize>) -> DenoiseResult<Vec<u8>> {
    if limit.is_some_and(|limit| bytes > limit) {
        return Err(DenoiseError::OutOfMemory { bytes });
    }
    let mut out = Vec::new();
    out.try_reserve_exact(bytes)
        .map_err(|_| DenoiseError::OutOfMemory { bytes })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Image {
        let mut data = Vec::new();
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 20) as u8, (y * 30) as u8, ((x + y) * 7) as u8, 200]);
            }
        }
        Image::from_rgba8(w, h, data).unwrap()
    }

    #[test]
    fn test_params_validation() {
        assert!(FilterParams::new(3, 0.0).is_ok());
        assert!(FilterParams::new(3, 1.0).is_ok());
        assert!(FilterParams::new(3, 1.01).is_err());
        assert!(FilterParams::new(3, -0.1).is_err());
        assert!(FilterParams::new(3, f32::NAN).is_err());
    }

    #[test]
    fn test_radius_limit() {
        assert!(FilterParams::new(FilterParams::MAX_RADIUS, 1.0).is_ok());
        for radius in [FilterParams::MAX_RADIUS + 1, (1 << 31) + 5, u32::MAX] {
            assert!(matches!(
                FilterParams::new(radius, 1.0),
                Err(DenoiseError::InvalidParams(_))
            ));
        }
        let side = window_side(FilterParams::MAX_RADIUS);
        assert!(side * side < 1 << 24);
    }

    #[test]
    fn test_window_side() {
        assert_eq!(window_side(0), 1);
        assert_eq!(window_side(1), 3);
        assert_eq!(window_side(5), 11);
        assert_eq!(window_side(u32::MAX), 2 * u32::MAX as u64 + 1);
    }

    #[test]
    fn test_corner_clamp_weighting() {
        // 3x3, red channel 0..=8 row-major
        let mut data = Vec::new();
        for v in 0..9u8 {
            data.extend_from_slice(&[v * 10, 0, 0, 255]);
        }
        let img = Image::from_rgba8(3, 3, data).unwrap();

        // Clamped window at (0,0): rows {0,0,1} x cols {0,0,1}
        // weights: p00 x4, p10 x2, p01 x2, p11 x1 -> (0*4 + 10*2 + 30*2 + 40) / 9
        let avg = box_average(&img, 0, 0, 1);
        assert!((avg[0] - 120.0 / 9.0).abs() < 1e-4);

        let params = FilterParams::new(1, 1.0).unwrap();
        assert_eq!(denoise_pixel(&img, 0, 0, &params), [13, 0, 0, 255]);
    }

    #[test]
    fn test_radius_zero_is_identity() {
        let img = gradient(7, 5);
        for blend in [0.0, 0.3, 1.0] {
            let params = FilterParams::new(0, blend).unwrap();
            assert_eq!(denoise_sequential(&img, &params).unwrap(), img);
        }
    }

    #[test]
    fn test_blend_zero_is_identity() {
        let img = gradient(6, 6);
        let params = FilterParams::new(4, 0.0).unwrap();
        assert_eq!(denoise_sequential(&img, &params).unwrap(), img);
    }

    #[test]
    fn test_uniform_image_unchanged() {
        let img = Image::filled(9, 4, [40, 80, 120, 77]).unwrap();
        let params = FilterParams::new(3, 1.0).unwrap();
        assert_eq!(denoise_sequential(&img, &params).unwrap(), img);
    }

    #[test]
    fn test_host_limit() {
        let img = gradient(4, 4);
        let params = FilterParams::new(1, 0.5).unwrap();

        assert_eq!(
            denoise_sequential_with_limit(&img, &params, Some(63)).unwrap_err(),
            DenoiseError::OutOfMemory { bytes: 64 }
        );
        assert_eq!(
            denoise_sequential_with_limit(&img, &params, Some(64)).unwrap(),
            denoise_sequential(&img, &params).unwrap()
        );
    }

    #[test]
    fn test_alpha_preserved() {
        let mut img = gradient(5, 5);
        img.put_pixel(2, 2, [255, 255, 255, 3]);
        let params = FilterParams::new(2, 0.7).unwrap();
        let out = denoise_sequential(&img, &params).unwrap();
        for y in 0..5 {
            for x in 0..5 {
                assert_eq!(out.pixel(x, y)[3], img.pixel(x, y)[3]);
            }
        }
    }
}
