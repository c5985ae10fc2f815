//! Dual-path denoiser for watermark robustness checks.
//!
//! Applies a windowed box blur, blended with the source pixel, to an RGBA8
//! image. The filter first runs as a compute dispatch on a parallel device
//! and, if that yields nothing usable, is recomputed sequentially on the
//! host so an output image is always produced.
//!
//! # Architecture
//!
//! ```text
//! Denoiser (one run at a time, status reporting)
//!     ├── ProcessingBackend (ComputeDispatcher)
//!     │       └── GpuPrimitives trait
//!     │               ├── CpuPrimitives (rayon, 8x8 tiles)
//!     │               └── WgpuPrimitives (compute shader)
//!     ├── RawReadback::into_packed (strip row padding)
//!     └── fallback::is_degenerate -> kernel::denoise_sequential
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wmprobe_gpu::{Denoiser, DenoiserConfig, FilterParams, Image};
//!
//! let denoiser = Denoiser::init(&DenoiserConfig::default());
//! denoiser.load_image(Image::from_rgba8(width, height, pixels)?);
//! let outcome = denoiser.run(FilterParams::new(2, 0.5)?)?;
//! ```

pub mod backend;
pub mod denoiser;
pub mod fallback;
pub mod image;
pub mod kernel;
pub mod readback;
mod shaders;

pub use backend::{
    Backend, BackendInfo, ComputeDispatcher, CpuPrimitives, DispatchStage, GpuLimits,
    GpuPrimitives, PowerPreference, ProcessingBackend, create_backend, describe_backends,
    detect_backends, select_best_backend,
};
pub use denoiser::{
    Denoiser, DenoiserBuilder, DenoiserConfig, ExecutionPath, FilterOutcome, RunState, RunStatus,
};
pub use fallback::FallbackReason;
pub use image::Image;
pub use kernel::FilterParams;
pub use readback::RawReadback;

use thiserror::Error;

/// Device-layer errors.
///
/// Any of these during a run is treated as a failed parallel attempt and
/// recovered through the sequential path.
#[derive(Error, Debug, Clone)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Image too large: {width}x{height} exceeds GPU limit {limit}")]
    ImageTooLarge { width: u32, height: u32, limit: u32 },

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("GPU operation failed: {0}")]
    OperationFailed(String),
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Errors surfaced by the denoiser to its caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DenoiseError {
    #[error("No image loaded")]
    NoImage,

    #[error("Compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("A denoise run is already in progress")]
    Busy,

    #[error("Invalid filter parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Out of memory allocating {bytes} bytes for the sequential filter")]
    OutOfMemory { bytes: usize },
}

pub type DenoiseResult<T> = Result<T, DenoiseError>;
