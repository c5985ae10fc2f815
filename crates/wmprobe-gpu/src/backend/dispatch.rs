//! Compute dispatcher: one parallel attempt, upload to readback.

use super::gpu_primitives::{GpuPrimitives, ParamsUniform};
use super::{DispatchStage, GpuLimits, ProcessingBackend};
use crate::image::Image;
use crate::kernel::FilterParams;
use crate::readback::RawReadback;
use crate::{GpuError, GpuResult};
#[allow(unused_imports)]
use tracing::{debug, trace};

/// Drives a [`GpuPrimitives`] implementation through one run.
pub struct ComputeDispatcher<P: GpuPrimitives> {
    primitives: P,
}

impl<P: GpuPrimitives> ComputeDispatcher<P> {
    pub fn new(primitives: P) -> Self {
        Self { primitives }
    }
}

impl<P: GpuPrimitives> ProcessingBackend for ComputeDispatcher<P> {
    fn name(&self) -> &'static str {
        self.primitives.name()
    }

    fn limits(&self) -> &GpuLimits {
        self.primitives.limits()
    }

    fn execute(
        &self,
        image: &Image,
        params: &FilterParams,
        on_stage: &mut dyn FnMut(DispatchStage),
    ) -> GpuResult<RawReadback> {
        let (w, h) = image.dimensions();
        let limits = self.primitives.limits();
        if !limits.fits(w, h) {
            return Err(GpuError::ImageTooLarge { width: w, height: h, limit: limits.max_texture_dim });
        }

        on_stage(DispatchStage::Uploading);
        let src = self.primitives.upload(image)?;
        let mut dst = self.primitives.allocate(w, h)?;
        let uniform = ParamsUniform::from(params);

        on_stage(DispatchStage::Dispatching);
        debug!(backend = self.primitives.name(), w, h, radius = uniform.radius, blend = uniform.blend, "Dispatching denoise");
        self.primitives.exec_denoise(&src, &mut dst, &uniform)?;
        drop(src);

        on_stage(DispatchStage::ReadingBack);
        let raw = self.primitives.read_back(&dst)?;
        trace!(?raw, "Readback complete");
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuPrimitives;

    #[test]
    fn test_stages_in_order() {
        let dispatcher = ComputeDispatcher::new(CpuPrimitives::new());
        let img = Image::filled(3, 3, [5, 5, 5, 5]).unwrap();
        let mut stages = Vec::new();
        let raw = dispatcher
            .execute(&img, &FilterParams::default(), &mut |s| stages.push(s))
            .unwrap();

        assert_eq!(stages, [DispatchStage::Uploading, DispatchStage::Dispatching, DispatchStage::ReadingBack]);
        assert_eq!(raw.dimensions(), (3, 3));
    }

    #[test]
    fn test_oversize_image_rejected_before_upload() {
        let prims = CpuPrimitives::with_limits(GpuLimits { max_texture_dim: 4, ..GpuLimits::default() });
        let dispatcher = ComputeDispatcher::new(prims);
        let img = Image::filled(5, 2, [1, 1, 1, 1]).unwrap();
        let mut stages = Vec::new();

        let err = dispatcher
            .execute(&img, &FilterParams::default(), &mut |s| stages.push(s))
            .unwrap_err();
        assert!(matches!(err, GpuError::ImageTooLarge { width: 5, height: 2, limit: 4 }));
        assert!(stages.is_empty());
    }
}
