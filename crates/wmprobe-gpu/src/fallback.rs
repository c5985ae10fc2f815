//! Parallel-result validation.
//!
//! A buffer with every byte zero is taken as "the device produced nothing"
//! (lost context, dropped dispatch). A filtered image that really is
//! transparent black trips the same check and gets recomputed
//! sequentially.

use std::fmt;

use crate::GpuError;

/// True when the buffer carries no output at all.
pub fn is_degenerate(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Why a run left the parallel path.
#[derive(Debug, Clone)]
pub enum FallbackReason {
    /// The device reported an error during upload, dispatch or readback.
    Device(GpuError),
    /// The reconciled buffer was entirely zero.
    ZeroOutput,
}

impl FallbackReason {
    /// Zero output may also mask a legitimately black result, so it is
    /// surfaced to the caller as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ZeroOutput)
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(err) => write!(f, "device error: {err}"),
            Self::ZeroOutput => f.write_str("parallel output was empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_is_degenerate() {
        assert!(is_degenerate(&[0; 64]));
        assert!(is_degenerate(&[]));
    }

    #[test]
    fn test_any_nonzero_byte_is_valid() {
        let mut bytes = vec![0u8; 64];
        bytes[63] = 1;
        assert!(!is_degenerate(&bytes));
    }

    #[test]
    fn test_only_zero_output_warns() {
        assert!(FallbackReason::ZeroOutput.is_warning());
        assert!(!FallbackReason::Device(GpuError::NoAdapter).is_warning());
    }
}
