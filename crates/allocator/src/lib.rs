//! Host-independent memory allocator building blocks.
//!
//! This crate provides the bookkeeping half of the interrupt-safe pool
//! allocators: a [`FreeList`] that carves allocations out of a caller-owned
//! byte region. Obtaining the region (and pinning it in memory) is left to the
//! user, which keeps the free list testable on any host.
//!
//! # Usage Example
//!
//! ```rust
//! use core::alloc::Layout;
//!
//! use allocator::FreeList;
//!
//! let mut region = vec![0u8; 1024];
//! let mut list = FreeList::new();
//! unsafe {
//!     list.init(region.as_mut_ptr(), region.len());
//! }
//!
//! let layout = Layout::from_size_align(64, 8).unwrap();
//! let ptr = list.allocate(layout).unwrap();
//! assert!(list.is_in_use());
//!
//! unsafe {
//!     assert!(list.deallocate(ptr, layout));
//! }
//! assert!(!list.is_in_use());
//! ```
//!
//! # Thread Safety
//!
//! [`FreeList`] is `Send` but not `Sync`. Callers that share it with
//! interrupt handlers must wrap it in a lock that masks interrupts.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::free_list::FreeList;

pub mod free_list;
