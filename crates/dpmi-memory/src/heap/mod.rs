//! Allocators for data touched from interrupt handlers.
//!
//! Memory touched from an interrupt handler must be locked: a page fault in
//! the middle of some interrupts cannot be recovered from. Two allocators
//! cover this.
//!
//! - [`LockingAllocator`] takes storage from the global allocator and locks
//!   its pages. It must only be used from normal context, since the global
//!   allocator itself may fault.
//! - [`LockedPoolAllocator`] and [`LockedPoolResource`] carve allocations out
//!   of a [`LockedPool`], a buffer locked once up front. They are the only
//!   allocators that may be used from interrupt handlers.

use core::alloc::Layout;

use snafu::Snafu;
use snafu_utils::Location;

pub use self::{
    locking::LockingAllocator,
    pool::{LockedPool, LockedPoolAllocator, LockedPoolResource},
};
use crate::error::MemoryError;

mod locking;
mod pool;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocatorError {
    #[snafu(display("the global allocator is not available in interrupt context"))]
    #[snafu(provide(ref, priority, Location => location))]
    InterruptContext {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("out of memory allocating {} bytes aligned to {}", layout.size(), layout.align()))]
    #[snafu(provide(ref, priority, Location => location))]
    OutOfMemory {
        layout: Layout,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("pool cannot be resized while allocations are live"))]
    #[snafu(provide(ref, priority, Location => location))]
    PoolInUse {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to lock allocated memory"))]
    #[snafu(provide(ref, priority, Location => location))]
    Lock {
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
}
