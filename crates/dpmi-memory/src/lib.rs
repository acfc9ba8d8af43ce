//! Protected-mode memory core for a DPMI-hosted DOS-extender runtime.
//!
//! This crate allocates, maps, resizes and releases linear memory through a
//! DPMI host, and provides allocators that stay usable from interrupt
//! handlers.
//!
//! # Overview
//!
//! - [`Dpmi`] is the service every other type borrows. It wraps a [`Host`]
//!   and owns the process-wide state: capability latches, the cached page
//!   size and capabilities, and the map of page-locked allocations. The real
//!   instance is [`system()`].
//! - [`Memory`] is an owned range of linear memory. It negotiates between the
//!   DPMI 1.0 and 0.9 allocation functions, and specializes into device
//!   mappings and conventional (DOS) memory through [`MemoryKind`].
//!   [`TypedMemory`] is a typed view over it.
//! - [`LockingAllocator`] hands out page-locked storage from the global
//!   allocator. [`LockedPoolAllocator`] and [`LockedPoolResource`] carve
//!   allocations out of a pre-locked pool and may be used from interrupt
//!   handlers.
//!
//! # Example
//!
//! ```rust,ignore
//! use dpmi_memory::{LockedPoolAllocator, Memory};
//!
//! let dpmi = dpmi_memory::system();
//! let buffer = Memory::allocate(dpmi, 64 * 1024, true)?;
//!
//! let pool = LockedPoolAllocator::new(dpmi, 4096)?;
//! let mut queue = Vec::new_in(pool.clone());
//! queue.try_reserve(16)?;
//! ```

#![feature(allocator_api)]
#![feature(error_generic_member_access)]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use dpmi::{Host, Int31};

pub use self::{
    address::FarPtr16,
    error::MemoryError,
    heap::{AllocatorError, LockedPool, LockedPoolAllocator, LockedPoolResource, LockingAllocator},
    linear::{LinearRange, PageLock},
    memory::{MappingMode, Memory, MemoryKind, TypedMemory},
    service::{Dpmi, Latches, system},
};

pub mod address;
mod error;
pub mod heap;
pub mod interrupt;
mod linear;
pub mod memory;
mod service;
pub mod sync;
#[cfg(test)]
mod testing;
