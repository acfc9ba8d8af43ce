use alloc::boxed::Box;

use dpmi::DpmiError;
use snafu::Snafu;
use snafu_utils::Location;

/// Errors raised by memory objects and the [`Dpmi`](crate::Dpmi) service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MemoryError {
    #[snafu(display("DPMI host call failed: {operation}"))]
    #[snafu(provide(ref, priority, Location => location))]
    Host {
        operation: &'static str,
        #[snafu(source)]
        source: DpmiError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("memory allocation failed"))]
    #[snafu(provide(ref, priority, Location => location))]
    AllocationFailed {
        #[snafu(source(from(MemoryError, Box::new)))]
        source: Box<MemoryError>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("operation is not permitted in interrupt context"))]
    #[snafu(provide(ref, priority, Location => location))]
    InterruptContext {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {address:#x} is not above the data selector base {base:#x}"))]
    #[snafu(provide(ref, priority, Location => location))]
    BelowSelectorBase {
        address: usize,
        base: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("data selector limit {limit:#x} cannot be raised to {required:#x}"))]
    #[snafu(provide(ref, priority, Location => location))]
    SelectorLimit {
        limit: usize,
        required: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{kind} memory cannot be resized"))]
    #[snafu(provide(ref, priority, Location => location))]
    ResizeUnsupported {
        kind: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("requested size {size:#x} is too large"))]
    #[snafu(provide(ref, priority, Location => location))]
    TooLarge {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("address {address:#x} is not aligned to {align} bytes"))]
    #[snafu(provide(ref, priority, Location => location))]
    Misaligned {
        address: usize,
        align: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("memory object has been released"))]
    #[snafu(provide(ref, priority, Location => location))]
    Released {
        #[snafu(implicit)]
        location: Location,
    },
}

impl MemoryError {
    /// Returns the innermost error, looking through allocation failures.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::AllocationFailed { source, .. } => source.root_cause(),
            _ => self,
        }
    }

    /// Returns the host error at the root of the cause chain, if any.
    #[must_use]
    pub fn host_error(&self) -> Option<DpmiError> {
        match self {
            Self::Host { source, .. } => Some(*source),
            Self::AllocationFailed { source, .. } => source.host_error(),
            _ => None,
        }
    }
}
