//! Safe interface to the DPMI host services used by the memory core.
//!
//! The free functions in the submodules wrap the raw calls of [`dpmi_sys`]
//! and decode their register results. The [`Host`] trait gathers the same
//! operations behind one seam so that code built on top can run against the
//! real `int 0x31` gate ([`Int31`]) or against a simulated host.

#![cfg_attr(not(test), no_std)]

use core::fmt;

pub use dpmi_sys::DpmiError;

pub use self::{
    capabilities::{Capabilities, CapabilityFlags},
    host::{Host, Int31},
};

pub mod capabilities;
pub mod dos;
mod host;
pub mod memory;
pub mod page;
pub mod physical;
pub mod selector;

/// A protected-mode segment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Selector(pub u16);

impl Selector {
    /// Returns the raw selector value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Opaque handle of an extended memory block issued by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MemoryHandle(pub u32);

impl MemoryHandle {
    /// Sentinel meaning "no live allocation".
    pub const NULL: Self = Self(u32::MAX);

    /// Returns `true` if this is the [`NULL`](Self::NULL) sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// An extended memory block as returned by the allocation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Linear address of the first byte of the block.
    pub address: usize,
    /// Handle identifying the block to the host.
    pub handle: MemoryHandle,
}

/// A conventional memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosBlock {
    /// Real-mode segment of the block.
    pub segment: u16,
    /// Protected-mode selector covering the block.
    pub selector: Selector,
}
