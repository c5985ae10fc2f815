//! Compute backends for the parallel denoise path.
//!
//! Provides a CPU (rayon) device emulation and a wgpu backend with
//! automatic selection.

mod gpu_primitives;
mod tiling;
mod detect;
mod dispatch;
mod cpu_backend;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use gpu_primitives::{GpuPrimitives, ParamsUniform, SurfaceHandle};
pub use tiling::{GpuLimits, TILE_SIZE, Tile, generate_tiles, workgroup_count};
pub use detect::{detect_backends, select_best_backend, describe_backends, BackendInfo};
pub use dispatch::ComputeDispatcher;
pub use cpu_backend::{CpuPrimitives, CpuSurface};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuPrimitives, WgpuSurface};

use std::fmt;
use std::str::FromStr;

use crate::image::Image;
use crate::kernel::FilterParams;
use crate::readback::RawReadback;
use crate::{GpuError, GpuResult};
#[allow(unused_imports)]
use tracing::{debug, warn};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (wgpu > CPU).
    #[default]
    Auto,
    /// Host emulation of the device using rayon.
    Cpu,
    /// wgpu backend (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Order in which `Auto` tries concrete backends.
    pub const PREFERENCE: [Backend; 2] = [Backend::Wgpu, Backend::Cpu];

    /// Describe what this backend would run on, without creating a device.
    ///
    /// `Auto` reports the first concrete backend whose probe succeeds.
    pub fn probe(&self, power: PowerPreference) -> GpuResult<String> {
        match self {
            Self::Auto => Self::PREFERENCE
                .iter()
                .find_map(|b| b.probe(power).ok())
                .ok_or(GpuError::NoAdapter),
            Self::Cpu => Ok(format!("host emulation, {} rayon threads", rayon::current_num_threads())),
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuPrimitives::probe(power, false)
                .map(|info| format!("{} ({:?})", info.name, info.backend)),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => Err(GpuError::BackendNotAvailable("wgpu feature not enabled".into())),
        }
    }

    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        self.probe(PowerPreference::default()).is_ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = GpuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(GpuError::BackendNotAvailable(format!("unknown backend '{other}'"))),
        }
    }
}

/// Adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

/// Stages of one parallel attempt, reported as they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Uploading,
    Dispatching,
    ReadingBack,
}

/// One parallel attempt of the filter.
pub trait ProcessingBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Device limits.
    fn limits(&self) -> &GpuLimits;

    /// Upload `image`, run the kernel, and read the output surface back.
    ///
    /// `on_stage` is called as each stage begins. Any device error ends the
    /// attempt.
    fn execute(
        &self,
        image: &Image,
        params: &FilterParams,
        on_stage: &mut dyn FnMut(DispatchStage),
    ) -> GpuResult<RawReadback>;
}

/// Create a backend instance.
pub fn create_backend(backend: Backend, power: PowerPreference, force_fallback_adapter: bool) -> GpuResult<Box<dyn ProcessingBackend>> {
    match backend {
        Backend::Auto => {
            // Creation doubles as the availability check
            let mut last = GpuError::NoAdapter;
            for candidate in Backend::PREFERENCE {
                match create_backend(candidate, power, force_fallback_adapter) {
                    Ok(b) => {
                        debug!(backend = %candidate, "Auto-selected backend");
                        return Ok(b);
                    }
                    Err(e) => {
                        warn!(backend = %candidate, error = %e, "Backend init failed, trying next");
                        last = e;
                    }
                }
            }
            Err(last)
        }
        Backend::Cpu => Ok(Box::new(ComputeDispatcher::new(CpuPrimitives::new()))),
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                let prims = WgpuPrimitives::new(power, force_fallback_adapter)?;
                debug!(device = prims.device_name(), "Created wgpu backend");
                Ok(Box::new(ComputeDispatcher::new(prims)))
            }
            #[cfg(not(feature = "wgpu"))]
            {
                let _ = (power, force_fallback_adapter);
                Err(GpuError::BackendNotAvailable(
                    "wgpu feature not enabled".to_string()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!(" wgpu ".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn test_create_cpu_backend() {
        let backend = create_backend(Backend::Cpu, PowerPreference::default(), false).unwrap();
        assert_eq!(backend.name(), "cpu");
        assert_eq!(backend.limits().row_alignment, 256);
    }

    #[test]
    fn test_preference_ends_with_cpu() {
        assert!(!Backend::PREFERENCE.contains(&Backend::Auto));
        assert_eq!(Backend::PREFERENCE.last(), Some(&Backend::Cpu));
        assert!(Backend::Cpu.is_available());
        assert!(Backend::Auto.is_available());
    }

    #[test]
    fn test_auto_takes_first_creatable() {
        let power = PowerPreference::default();
        let auto = create_backend(Backend::Auto, power, false).unwrap();
        match create_backend(Backend::Wgpu, power, false) {
            Ok(_) => assert_eq!(auto.name(), "wgpu"),
            Err(_) => assert_eq!(auto.name(), "cpu"),
        }
    }
}
