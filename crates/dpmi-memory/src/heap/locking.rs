use alloc::collections::BTreeMap;
use core::{
    alloc::{AllocError, Allocator, Layout},
    fmt,
    ptr::{self, NonNull},
};

use dpmi::{Host, Int31};
use log::{debug, error, trace, warn};
use snafu::{IntoError as _, OptionExt as _, ensure};
use snafu_utils::Report;

use super::{AllocatorError, InterruptContextSnafu, LockSnafu, OutOfMemorySnafu};
use crate::{interrupt, linear::LinearRange, service::Dpmi};

/// An allocator that locks the pages of every allocation.
///
/// Storage comes from the global allocator, so allocation fails in interrupt
/// context. Data structures built with it can be read and written from
/// interrupt handlers, but not grown.
///
/// The locks are recorded in the [`Dpmi`] service; all handles on the same
/// service compare equal.
pub struct LockingAllocator<'d, H = Int31>
where
    H: Host,
{
    dpmi: &'d Dpmi<H>,
}

impl<H> Clone for LockingAllocator<'_, H>
where
    H: Host,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for LockingAllocator<'_, H> where H: Host {}

// SAFETY: clones are bitwise copies of the same `Dpmi` reference and compare
// equal, so memory from one handle may be freed through any clone.
unsafe impl<H> core::alloc::AllocatorClone for LockingAllocator<'_, H> where H: Host {}

impl<H> fmt::Debug for LockingAllocator<'_, H>
where
    H: Host,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockingAllocator")
            .field("dpmi", &ptr::from_ref(self.dpmi))
            .finish()
    }
}

impl<H> PartialEq for LockingAllocator<'_, H>
where
    H: Host,
{
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.dpmi, other.dpmi)
    }
}

impl<H> Eq for LockingAllocator<'_, H> where H: Host {}

impl<'d, H> LockingAllocator<'d, H>
where
    H: Host,
{
    #[must_use]
    pub const fn new(dpmi: &'d Dpmi<H>) -> Self {
        Self { dpmi }
    }

    #[must_use]
    pub fn dpmi(&self) -> &'d Dpmi<H> {
        self.dpmi
    }

    /// Allocates a locked block satisfying `layout`.
    pub fn try_allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        ensure!(!interrupt::in_handler(), InterruptContextSnafu);

        if layout.size() == 0 {
            let dangling = NonNull::new(ptr::without_provenance_mut::<u8>(layout.align()))
                .context(OutOfMemorySnafu { layout })?;
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }

        let ptr = NonNull::new(unsafe { alloc::alloc::alloc(layout) })
            .context(OutOfMemorySnafu { layout })?;
        let locked = LinearRange::from_near(
            self.dpmi,
            self.dpmi.data_selector(),
            ptr.as_ptr().expose_provenance(),
            layout.size(),
        )
        .and_then(|range| range.lock(self.dpmi).map(|()| range));
        let range = match locked {
            Ok(range) => range,
            Err(source) => {
                unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
                return Err(LockSnafu.into_error(source));
            }
        };

        self.dpmi
            .locks()
            .lock()
            .get_or_insert_with(BTreeMap::new)
            .insert(ptr.addr().get(), range);
        trace!(
            "locked allocation of {:#x} bytes at {:#x}",
            layout.size(),
            range.address()
        );
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    /// Unlocks and frees a block returned by
    /// [`try_allocate`](Self::try_allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by an allocator on the same service
    /// with `layout`, and must no longer be referenced.
    pub unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        let range = {
            let mut locks = self.dpmi.locks().lock();
            let range = locks
                .as_mut()
                .and_then(|locks| locks.remove(&ptr.addr().get()));
            if locks.as_ref().is_some_and(BTreeMap::is_empty) {
                *locks = None;
            }
            range
        };

        match range {
            Some(range) => {
                if let Err(err) = range.unlock(self.dpmi) {
                    warn!(
                        "failed to unlock allocation at {:#x}: {}",
                        range.address(),
                        Report::new(err)
                    );
                }
            }
            None => error!("allocation at {:#x} has no page lock", ptr.addr()),
        }
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    /// Returns the largest size that may be requested: nothing in interrupt
    /// context.
    #[must_use]
    pub fn max_size(&self) -> usize {
        if interrupt::in_handler() {
            0
        } else {
            isize::MAX.unsigned_abs()
        }
    }

    /// Returns the number of live locked allocations on the service.
    #[must_use]
    pub fn locked_allocations(&self) -> usize {
        self.dpmi.locks().lock().as_ref().map_or(0, BTreeMap::len)
    }
}

unsafe impl<H> Allocator for LockingAllocator<'_, H>
where
    H: Host,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.try_allocate(layout).map_err(|err| {
            debug!("locking allocation failed: {}", Report::new(err));
            AllocError
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.release(ptr, layout) }
    }
}
