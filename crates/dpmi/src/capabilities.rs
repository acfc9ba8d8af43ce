//! High-level interface for the DPMI 1.0 capability query.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use dpmi_sys::{DpmiError, capabilities};

bitflags! {
    /// Optional features implemented by a DPMI 1.0 host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u16 {
        /// Page accessed/dirty bits can be queried.
        const PAGED_ACCESSED_DIRTY = 1 << 0;
        /// Exceptions are restartable.
        const EXCEPTIONS_RESTARTABLE = 1 << 1;
        /// Device memory can be mapped into a memory block (`0x0508`).
        const DEVICE_MAPPING = 1 << 2;
        /// Conventional memory can be mapped into a memory block (`0x0509`).
        const CONVENTIONAL_MEMORY_MAPPING = 1 << 3;
        /// Demand zero-fill.
        const DEMAND_ZERO_FILL = 1 << 4;
        /// Client pages can be write-protected.
        const WRITE_PROTECT_CLIENT = 1 << 5;
        /// Host pages can be write-protected.
        const WRITE_PROTECT_HOST = 1 << 6;
    }
}

const VENDOR_LEN: usize = capabilities::BUFFER_SIZE - 2;

/// Capabilities reported by a DPMI 1.0 host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Supported optional features.
    pub flags: CapabilityFlags,
    /// Host version as `(major, minor)`.
    pub host_version: (u8, u8),
    /// Vendor name, without the terminating NUL.
    pub vendor: ArrayVec<u8, VENDOR_LEN>,
}

impl Capabilities {
    /// Creates a capability set with the given flags and no vendor
    /// information.
    #[must_use]
    pub const fn new(flags: CapabilityFlags) -> Self {
        Self {
            flags,
            host_version: (0, 0),
            vendor: ArrayVec::new_const(),
        }
    }

    /// Decodes the flags word and the vendor information buffer.
    #[must_use]
    pub fn from_raw(flags: u16, buffer: &[u8; capabilities::BUFFER_SIZE]) -> Self {
        let name = &buffer[2..];
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let vendor = name[..len].iter().copied().collect();
        Self {
            flags: CapabilityFlags::from_bits_truncate(flags),
            host_version: (buffer[0], buffer[1]),
            vendor,
        }
    }

    /// Returns `true` if device memory can be mapped into memory blocks.
    #[must_use]
    pub fn device_mapping(&self) -> bool {
        self.flags.contains(CapabilityFlags::DEVICE_MAPPING)
    }

    /// Returns `true` if conventional memory can be mapped into memory
    /// blocks.
    #[must_use]
    pub fn conventional_memory_mapping(&self) -> bool {
        self.flags.contains(CapabilityFlags::CONVENTIONAL_MEMORY_MAPPING)
    }
}

/// Queries the host capabilities.
///
/// DPMI 0.9 hosts answer with an "unsupported function" error.
pub fn get() -> Result<Capabilities, DpmiError> {
    let mut buffer = [0; capabilities::BUFFER_SIZE];
    let regs = unsafe { capabilities::get(&raw mut buffer) }.into_result()?;
    Ok(Capabilities::from_raw(dpmi_sys::low_word(regs.eax), &buffer))
}
