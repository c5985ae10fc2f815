//! Run orchestration: parallel attempt, validation, sequential fallback.
//!
//! # Configuration
//!
//! Use [`DenoiserBuilder`] to pick the backend and adapter options:
//!
//! ```ignore
//! use wmprobe_gpu::{Backend, DenoiserBuilder};
//!
//! let denoiser = DenoiserBuilder::new()
//!     .backend(Backend::Wgpu)
//!     .on_status(|status| eprintln!("{status}"))
//!     .build();
//! ```
//!
//! # Run states
//!
//! ```text
//! Idle -> Uploading -> Dispatching -> ReadingBack -> Validating -> Done
//!                                                        \-> FallingBack -> Done
//! ```
//!
//! A device error at any stage jumps straight to `FallingBack`. Missing
//! image or device is rejected before `Uploading`.

use std::env;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, DispatchStage, PowerPreference, ProcessingBackend, create_backend};
use crate::fallback::{FallbackReason, is_degenerate};
use crate::image::Image;
use crate::kernel::{FilterParams, denoise_sequential_with_limit};
use crate::{DenoiseError, DenoiseResult};
#[allow(unused_imports)]
use tracing::{debug, info, trace, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable overriding the backend choice.
pub const BACKEND_ENV: &str = "WMPROBE_BACKEND";

/// Environment variable capping the sequential fallback's output, in bytes.
pub const RAM_MAX_ENV: &str = "WMPROBE_RAM_MAX";

/// Device selection for a [`Denoiser`].
#[derive(Debug, Clone, Default)]
pub struct DenoiserConfig {
    /// Backend to acquire.
    pub backend: Backend,
    /// Adapter power preference (wgpu only).
    pub power_preference: PowerPreference,
    /// Ask wgpu for a software adapter.
    pub force_fallback_adapter: bool,
    /// Largest output the sequential fallback may allocate (bytes).
    pub host_memory_limit: Option<usize>,
}

impl DenoiserConfig {
    /// Defaults, with `WMPROBE_BACKEND` and `WMPROBE_RAM_MAX` applied when
    /// set and valid.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(BACKEND_ENV) {
            match value.parse() {
                Ok(backend) => config.backend = backend,
                Err(e) => warn!(value = %value, error = %e, "Ignoring {}", BACKEND_ENV),
            }
        }
        if let Ok(value) = env::var(RAM_MAX_ENV) {
            match value.trim().parse() {
                Ok(bytes) => config.host_memory_limit = Some(bytes),
                Err(e) => warn!(value = %value, error = %e, "Ignoring {}", RAM_MAX_ENV),
            }
        }
        config
    }
}

/// Builder for [`Denoiser`].
#[derive(Default)]
pub struct DenoiserBuilder {
    config: DenoiserConfig,
    observer: Option<StatusObserver>,
}

impl DenoiserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config.
    pub fn config(mut self, config: DenoiserConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn power_preference(mut self, power: PowerPreference) -> Self {
        self.config.power_preference = power;
        self
    }

    pub fn force_fallback_adapter(mut self, force: bool) -> Self {
        self.config.force_fallback_adapter = force;
        self
    }

    pub fn host_memory_limit(mut self, bytes: usize) -> Self {
        self.config.host_memory_limit = Some(bytes);
        self
    }

    /// Receive every status transition.
    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunStatus) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(f));
        self
    }

    /// Acquire the device and build the denoiser.
    pub fn build(self) -> Denoiser {
        let mut denoiser = Denoiser::init(&self.config);
        if let Some(observer) = self.observer {
            denoiser.attach(observer);
        }
        denoiser
    }
}

// ============================================================================
// Status
// ============================================================================

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Uploading,
    Dispatching,
    ReadingBack,
    Validating,
    FallingBack,
    Done,
}

impl From<DispatchStage> for RunState {
    fn from(stage: DispatchStage) -> Self {
        match stage {
            DispatchStage::Uploading => Self::Uploading,
            DispatchStage::Dispatching => Self::Dispatching,
            DispatchStage::ReadingBack => Self::ReadingBack,
        }
    }
}

/// Which path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Parallel dispatch on the named backend.
    Parallel(&'static str),
    /// Sequential host recomputation.
    Sequential,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel(name) => write!(f, "parallel ({name})"),
            Self::Sequential => f.write_str("sequential fallback"),
        }
    }
}

/// Coarse progress reported to the caller.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// Device acquired, ready for runs.
    Ready(&'static str),
    /// A run entered a new state.
    Entered(RunState),
    /// The parallel result was rejected.
    FallingBack(FallbackReason),
    /// Run finished.
    Finished(ExecutionPath),
    /// Run did not start or did not finish.
    Failed(DenoiseError),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(backend) => write!(f, "Compute device ready ({backend}). Load an image to begin analysis."),
            Self::Entered(RunState::Uploading) => f.write_str("Processing robustness filter..."),
            Self::Entered(state) => write!(f, "{state:?}..."),
            Self::FallingBack(reason) if reason.is_warning() => {
                f.write_str("Parallel output empty; sequential fallback applied for analysis.")
            }
            Self::FallingBack(reason) => write!(f, "Parallel path failed ({reason}); sequential fallback applied."),
            Self::Finished(_) => f.write_str("Done. Review filtered output for watermark persistence."),
            Self::Failed(err) => write!(f, "Processing failed: {err}"),
        }
    }
}

type StatusObserver = Arc<dyn Fn(&RunStatus) + Send + Sync>;

// ============================================================================
// Outcome
// ============================================================================

/// Result of one run.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Filtered image, same dimensions as the source.
    pub image: Image,
    /// Path that produced `image`.
    pub path: ExecutionPath,
    /// Set when the parallel result was rejected.
    pub fallback: Option<FallbackReason>,
}

impl FilterOutcome {
    /// Soft warning for the caller, if any.
    pub fn warning(&self) -> Option<&FallbackReason> {
        self.fallback.as_ref().filter(|r| r.is_warning())
    }
}

// ============================================================================
// Denoiser
// ============================================================================

/// Owns the compute device and runs the filter one request at a time.
pub struct Denoiser {
    backend: Option<Box<dyn ProcessingBackend>>,
    unavailable: Option<String>,
    host_memory_limit: Option<usize>,
    source: Mutex<Option<Arc<Image>>>,
    state: Mutex<RunState>,
    observer: Option<StatusObserver>,
}

impl Denoiser {
    /// Acquire a device per `config`.
    ///
    /// Acquisition failure does not fail construction: the denoiser is
    /// returned without a device and every run reports
    /// [`DenoiseError::DeviceUnavailable`].
    pub fn init(config: &DenoiserConfig) -> Self {
        trace!(?config, "Denoiser::init");
        let mut denoiser = match create_backend(config.backend, config.power_preference, config.force_fallback_adapter) {
            Ok(backend) => {
                info!(backend = backend.name(), "Compute device ready");
                Self::with_backend(backend)
            }
            Err(e) => {
                warn!(backend = %config.backend, error = %e, "Unable to init compute device");
                Self::without_device(e.to_string())
            }
        };
        denoiser.host_memory_limit = config.host_memory_limit;
        denoiser
    }

    /// Use an already constructed device context.
    pub fn with_backend(backend: Box<dyn ProcessingBackend>) -> Self {
        Self {
            backend: Some(backend),
            unavailable: None,
            host_memory_limit: None,
            source: Mutex::new(None),
            state: Mutex::new(RunState::Idle),
            observer: None,
        }
    }

    /// A denoiser whose device could not be acquired.
    pub fn without_device(reason: impl Into<String>) -> Self {
        Self {
            backend: None,
            unavailable: Some(reason.into()),
            host_memory_limit: None,
            source: Mutex::new(None),
            state: Mutex::new(RunState::Idle),
            observer: None,
        }
    }

    /// Install a status observer.
    pub fn set_observer<F>(&mut self, f: F)
    where
        F: Fn(&RunStatus) + Send + Sync + 'static,
    {
        self.attach(Arc::new(f));
    }

    fn attach(&mut self, observer: StatusObserver) {
        self.observer = Some(observer);
        match (self.backend_name(), &self.unavailable) {
            (Some(name), _) => self.report(RunStatus::Ready(name)),
            (None, Some(reason)) => self.report(RunStatus::Failed(DenoiseError::DeviceUnavailable(reason.clone()))),
            (None, None) => {}
        }
    }

    /// Cap the sequential fallback's output allocation; `None` removes the cap.
    pub fn set_host_memory_limit(&mut self, bytes: Option<usize>) {
        self.host_memory_limit = bytes;
    }

    /// Release the device. Later runs fail with `DeviceUnavailable`.
    pub fn release(&mut self) {
        if let Some(backend) = self.backend.take() {
            debug!(backend = backend.name(), "Releasing compute device");
        }
        self.unavailable = Some("device released".into());
    }

    /// Name of the acquired backend.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    /// Set the image used by subsequent runs.
    pub fn load_image(&self, image: Image) {
        debug!(w = image.width(), h = image.height(), "Image loaded");
        *lock(&self.source) = Some(Arc::new(image));
    }

    /// Forget the loaded image.
    pub fn clear_image(&self) {
        *lock(&self.source) = None;
    }

    /// Check if an image is loaded.
    pub fn has_image(&self) -> bool {
        lock(&self.source).is_some()
    }

    /// Filter the loaded image.
    ///
    /// Tries the parallel backend first; a device error or an all-zero
    /// result is recovered by recomputing sequentially from the loaded
    /// image. Only preconditions and sequential out-of-memory are errors.
    pub fn run(&self, params: FilterParams) -> DenoiseResult<FilterOutcome> {
        let (guard, image, backend) = self.begin().map_err(|e| self.reject(e))?;

        info!(
            backend = backend.name(),
            w = image.width(),
            h = image.height(),
            radius = params.radius(),
            blend = params.blend(),
            "Running denoise"
        );

        let attempt = backend.execute(&image, &params, &mut |stage| {
            self.enter(&guard, stage.into());
        });

        let fallback = match attempt {
            Ok(raw) => {
                let packed = raw.into_packed();
                self.enter(&guard, RunState::Validating);
                if is_degenerate(packed.data()) {
                    Err(FallbackReason::ZeroOutput)
                } else {
                    Ok(packed)
                }
            }
            Err(e) => Err(FallbackReason::Device(e)),
        };

        let outcome = match fallback {
            Ok(image) => FilterOutcome {
                image,
                path: ExecutionPath::Parallel(backend.name()),
                fallback: None,
            },
            Err(reason) => {
                warn!(reason = %reason, "Parallel result rejected, falling back to sequential filter");
                self.enter(&guard, RunState::FallingBack);
                self.report(RunStatus::FallingBack(reason.clone()));

                let image = denoise_sequential_with_limit(&image, &params, self.host_memory_limit).map_err(|e| {
                    self.report(RunStatus::Failed(e.clone()));
                    e
                })?;
                FilterOutcome { image, path: ExecutionPath::Sequential, fallback: Some(reason) }
            }
        };

        self.enter(&guard, RunState::Done);
        info!(path = %outcome.path, "Denoise complete");
        self.report(RunStatus::Finished(outcome.path));
        Ok(outcome)
    }

    /// Check preconditions and claim the run slot.
    fn begin(&self) -> DenoiseResult<(RunGuard<'_>, Arc<Image>, &dyn ProcessingBackend)> {
        let mut state = lock(&self.state);
        if *state != RunState::Idle {
            return Err(DenoiseError::Busy);
        }
        let image = lock(&self.source).clone().ok_or(DenoiseError::NoImage)?;
        let backend = self.backend.as_deref().ok_or_else(|| {
            DenoiseError::DeviceUnavailable(self.unavailable.clone().unwrap_or_else(|| "not initialized".into()))
        })?;

        *state = RunState::Uploading;
        Ok((RunGuard { state: &self.state }, image, backend))
    }

    fn enter(&self, guard: &RunGuard<'_>, state: RunState) {
        guard.set(state);
        trace!(?state, "Run state");
        self.report(RunStatus::Entered(state));
    }

    fn reject(&self, err: DenoiseError) -> DenoiseError {
        warn!(error = %err, "Denoise run rejected");
        self.report(RunStatus::Failed(err.clone()));
        err
    }

    fn report(&self, status: RunStatus) {
        if let Some(observer) = &self.observer {
            observer(&status);
        }
    }
}

impl fmt::Debug for Denoiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Denoiser")
            .field("backend", &self.backend_name())
            .field("unavailable", &self.unavailable)
            .field("host_memory_limit", &self.host_memory_limit)
            .field("state", &self.state())
            .field("has_image", &self.has_image())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the run slot; the state returns to `Idle` when dropped.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl RunGuard<'_> {
    fn set(&self, next: RunState) {
        *lock(self.state) = next;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = RunState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DenoiserConfig::default();
        assert_eq!(config.backend, Backend::Auto);
        assert_eq!(config.power_preference, PowerPreference::HighPerformance);
        assert!(!config.force_fallback_adapter);
        assert_eq!(config.host_memory_limit, None);
    }

    #[test]
    fn test_builder_carries_host_limit() {
        let denoiser = DenoiserBuilder::new()
            .backend(Backend::Cpu)
            .host_memory_limit(4096)
            .build();
        assert_eq!(denoiser.host_memory_limit, Some(4096));
        assert_eq!(denoiser.backend_name(), Some("cpu"));
    }

    #[test]
    fn test_run_slot_is_exclusive() {
        let denoiser = Denoiser::with_backend(create_backend(Backend::Cpu, PowerPreference::default(), false).unwrap());
        denoiser.load_image(Image::filled(2, 2, [1, 2, 3, 4]).unwrap());
        {
            let (guard, _, _) = denoiser.begin().unwrap();
            assert_eq!(denoiser.begin().err(), Some(DenoiseError::Busy));
            guard.set(RunState::Validating);
            assert_eq!(denoiser.state(), RunState::Validating);
        }
        assert_eq!(denoiser.state(), RunState::Idle);
    }

    #[test]
    fn test_preconditions_leave_idle() {
        let denoiser = Denoiser::without_device("no adapter");
        assert_eq!(denoiser.begin().err(), Some(DenoiseError::NoImage));
        denoiser.load_image(Image::filled(1, 1, [0, 0, 0, 255]).unwrap());
        assert_eq!(
            denoiser.begin().err(),
            Some(DenoiseError::DeviceUnavailable("no adapter".into()))
        );
        assert_eq!(denoiser.state(), RunState::Idle);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(
            RunStatus::FallingBack(FallbackReason::ZeroOutput).to_string(),
            "Parallel output empty; sequential fallback applied for analysis."
        );
        assert_eq!(
            RunStatus::Finished(ExecutionPath::Sequential).to_string(),
            "Done. Review filtered output for watermark persistence."
        );
        assert_eq!(ExecutionPath::Parallel("cpu").to_string(), "parallel (cpu)");
    }
}
