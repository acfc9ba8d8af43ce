use core::{fmt, marker::PhantomData, mem, slice};

use dataview::{DataView, Pod};
use dpmi::{Host, Int31};
use snafu::{OptionExt as _, ensure};

use super::Memory;
use crate::{
    address::FarPtr16,
    error::{MemoryError, MisalignedSnafu, TooLargeSnafu},
    service::Dpmi,
};

fn byte_len<T>(len: usize) -> Result<usize, MemoryError> {
    len.checked_mul(mem::size_of::<T>())
        .context(TooLargeSnafu { size: len })
}

/// A [`Memory`] object viewed as an array of `T`.
pub struct TypedMemory<'d, T, H = Int31>
where
    H: Host,
{
    inner: Memory<'d, H>,
    _marker: PhantomData<T>,
}

impl<T, H> fmt::Debug for TypedMemory<'_, T, H>
where
    H: Host,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedMemory")
            .field("len", &self.len())
            .field("inner", &self.inner)
            .finish()
    }
}

impl<'d, T, H> TypedMemory<'d, T, H>
where
    T: Pod,
    H: Host,
{
    /// Wraps `inner`. Bytes past the last whole element are not accessible.
    pub fn from_memory(inner: Memory<'d, H>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Allocates extended memory for `len` elements.
    pub fn allocate(dpmi: &'d Dpmi<H>, len: usize, committed: bool) -> Result<Self, MemoryError> {
        Memory::allocate(dpmi, byte_len::<T>(len)?, committed).map(Self::from_memory)
    }

    /// Maps `len` elements of physical memory at `physical`.
    pub fn map_device(dpmi: &'d Dpmi<H>, len: usize, physical: usize) -> Result<Self, MemoryError> {
        Memory::map_device(dpmi, byte_len::<T>(len)?, physical).map(Self::from_memory)
    }

    /// Maps `len` elements of conventional memory at `ptr`.
    pub fn map_dos(dpmi: &'d Dpmi<H>, len: usize, ptr: FarPtr16) -> Result<Self, MemoryError> {
        Memory::map_dos(dpmi, byte_len::<T>(len)?, ptr).map(Self::from_memory)
    }

    /// Allocates conventional memory for `len` elements.
    pub fn allocate_dos(dpmi: &'d Dpmi<H>, len: usize) -> Result<Self, MemoryError> {
        Memory::allocate_dos(dpmi, byte_len::<T>(len)?).map(Self::from_memory)
    }

    pub fn into_inner(self) -> Memory<'d, H> {
        self.inner
    }

    pub fn as_memory(&self) -> &Memory<'d, H> {
        &self.inner
    }

    /// Resizes the memory to hold `len` elements.
    pub fn resize(&mut self, len: usize, committed: bool) -> Result<(), MemoryError> {
        self.inner.resize(byte_len::<T>(len)?, committed)
    }

    pub fn ptr(&self) -> Result<*mut T, MemoryError> {
        self.inner.ptr()
    }

    fn aligned_ptr(&self) -> Result<*mut T, MemoryError> {
        let ptr = self.ptr()?;
        ensure!(
            ptr.is_aligned(),
            MisalignedSnafu {
                address: self.inner.address(),
                align: mem::align_of::<T>(),
            }
        );
        Ok(ptr)
    }

    /// Returns the elements as a slice.
    ///
    /// Fails if the memory is not aligned for `T`.
    ///
    /// # Safety
    ///
    /// Nothing else, including devices and real-mode code, may write to the
    /// memory while the slice is alive.
    pub unsafe fn as_slice(&self) -> Result<&[T], MemoryError> {
        let ptr = self.aligned_ptr()?;
        Ok(unsafe { slice::from_raw_parts(ptr, self.len()) })
    }

    /// Returns the elements as a mutable slice.
    ///
    /// Fails if the memory is not aligned for `T`.
    ///
    /// # Safety
    ///
    /// Nothing else, including devices and real-mode code, may access the
    /// memory while the slice is alive.
    pub unsafe fn as_mut_slice(&mut self) -> Result<&mut [T], MemoryError> {
        let ptr = self.aligned_ptr()?;
        Ok(unsafe { slice::from_raw_parts_mut(ptr, self.len()) })
    }

    /// Reads element `index`, or returns `None` if it is out of bounds.
    pub fn get(&self, index: usize) -> Result<Option<T>, MemoryError> {
        if index >= self.len() {
            return Ok(None);
        }
        let ptr = self.ptr()?.wrapping_add(index);
        Ok(Some(unsafe { ptr.read_unaligned() }))
    }

    /// Writes element `index`. Returns `false` if it is out of bounds.
    pub fn set(&mut self, index: usize, value: T) -> Result<bool, MemoryError> {
        if index >= self.len() {
            return Ok(false);
        }
        let ptr = self.ptr()?.wrapping_add(index);
        unsafe { ptr.write_unaligned(value) };
        Ok(true)
    }

    /// Returns the memory as a byte view.
    ///
    /// # Safety
    ///
    /// As for [`as_mut_slice`](Self::as_mut_slice).
    pub unsafe fn as_data_view(&mut self) -> Result<&mut DataView, MemoryError> {
        let ptr = self.inner.ptr::<u8>()?;
        let bytes = unsafe { slice::from_raw_parts_mut(ptr, self.inner.size()) };
        Ok(DataView::from_mut(bytes))
    }
}

impl<T, H> TypedMemory<'_, T, H>
where
    H: Host,
{
    /// Returns the number of whole elements that fit in the memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .size()
            .checked_div(mem::size_of::<T>())
            .unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
