//! Device capability boundary shared by the CPU and wgpu backends.

use bytemuck::{Pod, Zeroable};

use super::GpuLimits;
use crate::image::Image;
use crate::kernel::FilterParams;
use crate::readback::RawReadback;
use crate::GpuResult;

/// Handle to an RGBA8 surface in device memory.
pub trait SurfaceHandle: Send + Sync {
    /// Surface dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);
}

/// Kernel parameter block: `radius, pad, blend, pad` (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParamsUniform {
    pub radius: u32,
    pub _pad0: u32,
    pub blend: f32,
    pub _pad1: f32,
}

impl From<&FilterParams> for ParamsUniform {
    fn from(params: &FilterParams) -> Self {
        Self {
            radius: params.radius(),
            _pad0: 0,
            blend: params.blend(),
            _pad1: 0.0,
        }
    }
}

/// Core device operations.
pub trait GpuPrimitives: Send + Sync {
    /// Backend-specific surface type.
    type Surface: SurfaceHandle;

    /// Create a read-only input surface holding the image.
    fn upload(&self, image: &Image) -> GpuResult<Self::Surface>;

    /// Allocate a write-only output surface.
    fn allocate(&self, width: u32, height: u32) -> GpuResult<Self::Surface>;

    /// Run the denoise kernel over every pixel of `src` into `dst`, then
    /// wait for completion.
    fn exec_denoise(&self, src: &Self::Surface, dst: &mut Self::Surface, params: &ParamsUniform) -> GpuResult<()>;

    /// Copy a surface into host memory with rows padded to
    /// `limits().row_alignment`, waiting for the mapping.
    fn read_back(&self, surface: &Self::Surface) -> GpuResult<RawReadback>;

    /// Device limits.
    fn limits(&self) -> &GpuLimits;

    /// Backend name.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<ParamsUniform>(), 16);

        let params = FilterParams::new(7, 0.25).unwrap();
        let uniform = ParamsUniform::from(&params);
        let bytes = bytemuck::bytes_of(&uniform);
        assert_eq!(&bytes[0..4], &7u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(&bytes[8..12], &0.25f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0; 4]);
    }
}
