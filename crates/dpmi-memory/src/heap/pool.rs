use alloc::{rc::Rc, vec::Vec};
use core::{
    alloc::{AllocError, Allocator, Layout},
    fmt,
    ops::Deref,
    ptr::{self, NonNull},
};

use allocator::FreeList;
use dpmi::{Host, Int31};
use log::{debug, error};
use snafu::{OptionExt as _, ensure};
use snafu_utils::Report;

use super::{
    AllocatorError, InterruptContextSnafu, LockingAllocator, OutOfMemorySnafu, PoolInUseSnafu,
};
use crate::{interrupt, service::Dpmi, sync::IrqMutex};

struct PoolState<'d, H>
where
    H: Host,
{
    buffer: Vec<u8, LockingAllocator<'d, H>>,
    list: FreeList,
}

impl<H> PoolState<'_, H>
where
    H: Host,
{
    fn reset(&mut self) {
        let len = self.buffer.len();
        unsafe { self.list.init(self.buffer.as_mut_ptr(), len) };
    }
}

/// A locked buffer carved up by a first-fit free list.
///
/// The buffer is allocated and locked once, in normal context. After that
/// allocations are served from the buffer alone, with interrupts disabled,
/// so they may be made from interrupt handlers.
pub struct LockedPool<'d, H = Int31>
where
    H: Host,
{
    locking: LockingAllocator<'d, H>,
    state: IrqMutex<PoolState<'d, H>>,
}

impl<H> fmt::Debug for LockedPool<'_, H>
where
    H: Host,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LockedPool");
        d.field("locking", &self.locking);
        match self.state.try_lock() {
            Some(state) => d
                .field("len", &state.buffer.len())
                .field("nodes", &state.list.node_count())
                .finish(),
            None => d.finish_non_exhaustive(),
        }
    }
}

impl<'d, H> LockedPool<'d, H>
where
    H: Host,
{
    /// Creates a pool able to hand out `size_bytes` bytes, less the overhead
    /// of every allocation after the first.
    pub fn new(dpmi: &'d Dpmi<H>, size_bytes: usize) -> Result<Self, AllocatorError> {
        let locking = LockingAllocator::new(dpmi);
        let mut state = PoolState {
            buffer: locked_buffer(locking, size_bytes)?,
            list: FreeList::new(),
        };
        state.reset();
        debug!("created locked pool of {:#x} bytes", state.buffer.len());
        Ok(Self {
            locking,
            state: IrqMutex::new(state),
        })
    }

    #[must_use]
    pub fn locking_allocator(&self) -> LockingAllocator<'d, H> {
        self.locking
    }

    /// Allocates a block satisfying `layout` from the pool.
    ///
    /// May be called from interrupt handlers.
    pub fn try_allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocatorError> {
        let ptr = self
            .state
            .lock()
            .list
            .allocate(layout)
            .context(OutOfMemorySnafu { layout })?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    /// Returns a block to the pool. Pointers the pool did not hand out are
    /// logged and ignored.
    ///
    /// # Safety
    ///
    /// The block must no longer be referenced.
    pub unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let released = unsafe { self.state.lock().list.deallocate(ptr, layout) };
        if !released {
            error!("{:#x} was not allocated from this pool", ptr.addr());
        }
    }

    /// Returns how many `T` the largest free chunk can hold.
    #[must_use]
    pub fn max_size<T>(&self) -> usize {
        self.state.lock().list.max_elements(Layout::new::<T>())
    }

    /// Returns the largest byte allocation the pool can currently serve.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_size::<u8>()
    }

    /// Replaces the buffer with a fresh one of `size_bytes` bytes.
    ///
    /// Fails with [`AllocatorError::PoolInUse`] while any allocation is
    /// live, leaving the pool unchanged.
    pub fn resize(&self, size_bytes: usize) -> Result<(), AllocatorError> {
        ensure!(!interrupt::in_handler(), InterruptContextSnafu);

        let mut state = self.state.lock();
        ensure!(!state.list.is_in_use(), PoolInUseSnafu);
        let old_len = state.buffer.len();
        state.buffer = locked_buffer(self.locking, size_bytes)?;
        state.reset();
        debug!(
            "resized locked pool from {old_len:#x} to {:#x} bytes",
            state.buffer.len()
        );
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.state.lock().list.contains(ptr)
    }

    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.state.lock().list.is_in_use()
    }
}

fn locked_buffer<H>(
    locking: LockingAllocator<'_, H>,
    size_bytes: usize,
) -> Result<Vec<u8, LockingAllocator<'_, H>>, AllocatorError>
where
    H: Host,
{
    ensure!(!interrupt::in_handler(), InterruptContextSnafu);

    let len = size_bytes.saturating_add(FreeList::HEADER_SIZE);
    let mut buffer = Vec::new_in(locking);
    if buffer.try_reserve_exact(len).is_err() {
        return OutOfMemorySnafu {
            layout: Layout::array::<u8>(len).unwrap_or_else(|_err| Layout::new::<u8>()),
        }
        .fail();
    }
    buffer.resize(len, 0);
    Ok(buffer)
}

fn allocation_failed(err: AllocatorError) -> AllocError {
    debug!("pool allocation failed: {}", Report::new(err));
    AllocError
}

/// A shared handle on a [`LockedPool`].
///
/// Clones share the pool, which lives in locked memory itself and is freed
/// with the last handle. Handles on the same pool compare equal.
pub struct LockedPoolAllocator<'d, H = Int31>
where
    H: Host,
{
    pool: Rc<LockedPool<'d, H>, LockingAllocator<'d, H>>,
}

impl<'d, H> LockedPoolAllocator<'d, H>
where
    H: Host,
{
    pub fn new(dpmi: &'d Dpmi<H>, size_bytes: usize) -> Result<Self, AllocatorError> {
        let pool = LockedPool::new(dpmi, size_bytes)?;
        let locking = pool.locking;
        let pool = Rc::try_new_in(pool, locking).ok().context(OutOfMemorySnafu {
            layout: Layout::new::<LockedPool<'d, H>>(),
        })?;
        Ok(Self { pool })
    }
}

impl<H> Clone for LockedPoolAllocator<'_, H>
where
    H: Host,
{
    fn clone(&self) -> Self {
        Self {
            pool: Rc::clone(&self.pool),
        }
    }
}

impl<H> fmt::Debug for LockedPoolAllocator<'_, H>
where
    H: Host,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockedPoolAllocator")
            .field(&*self.pool)
            .finish()
    }
}

impl<'d, H> Deref for LockedPoolAllocator<'d, H>
where
    H: Host,
{
    type Target = LockedPool<'d, H>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl<H> PartialEq for LockedPoolAllocator<'_, H>
where
    H: Host,
{
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.pool, &other.pool)
    }
}

impl<H> Eq for LockedPoolAllocator<'_, H> where H: Host {}

unsafe impl<H> Allocator for LockedPoolAllocator<'_, H>
where
    H: Host,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.pool.try_allocate(layout).map_err(allocation_failed)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.pool.release(ptr, layout) }
    }
}

/// A [`LockedPool`] owned in place and lent out by reference.
///
/// `&LockedPoolResource` is the allocator. Two references are equal only if
/// they point at the same resource.
#[derive(Debug)]
pub struct LockedPoolResource<'d, H = Int31>
where
    H: Host,
{
    pool: LockedPool<'d, H>,
}

impl<'d, H> LockedPoolResource<'d, H>
where
    H: Host,
{
    pub fn new(dpmi: &'d Dpmi<H>, size_bytes: usize) -> Result<Self, AllocatorError> {
        LockedPool::new(dpmi, size_bytes).map(|pool| Self { pool })
    }
}

impl<'d, H> Deref for LockedPoolResource<'d, H>
where
    H: Host,
{
    type Target = LockedPool<'d, H>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl<H> PartialEq for LockedPoolResource<'_, H>
where
    H: Host,
{
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl<H> Eq for LockedPoolResource<'_, H> where H: Host {}

unsafe impl<H> Allocator for &LockedPoolResource<'_, H>
where
    H: Host,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.pool.try_allocate(layout).map_err(allocation_failed)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.pool.release(ptr, layout) }
    }
}
