//! Synchronization primitives safe against interrupt handlers.

pub use self::spinlock::{IrqMutex, IrqMutexGuard};

mod spinlock;
