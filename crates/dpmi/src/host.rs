use dpmi_sys::DpmiError;

use crate::{
    Capabilities, DosBlock, MemoryBlock, MemoryHandle, Selector, capabilities, dos, memory, page,
    physical, selector,
};

/// The set of DPMI host services the memory core is built on.
///
/// Every method maps onto exactly one host function. Implementations report
/// failures with the host error code unchanged, so that callers can tell an
/// unsupported function apart from a failed request.
pub trait Host {
    /// Returns the selector loaded in `DS`.
    fn data_selector(&self) -> Selector;

    /// Returns the linear base address of `sel` (`0x0006`).
    fn selector_base(&self, sel: Selector) -> Result<usize, DpmiError>;

    /// Sets the linear base address of `sel` (`0x0007`).
    ///
    /// # Safety
    ///
    /// Every pointer derived from `sel` changes its meaning.
    unsafe fn set_selector_base(&self, sel: Selector, base: usize) -> Result<(), DpmiError>;

    /// Returns the limit of `sel`.
    fn selector_limit(&self, sel: Selector) -> Result<usize, DpmiError>;

    /// Sets the limit of `sel` (`0x0008`).
    ///
    /// # Safety
    ///
    /// Shrinking a limit invalidates every pointer beyond it.
    unsafe fn set_selector_limit(&self, sel: Selector, limit: usize) -> Result<(), DpmiError>;

    /// Returns a selector over the real-mode segment `segment` (`0x0002`).
    fn segment_to_selector(&self, segment: u16) -> Result<Selector, DpmiError>;

    /// Returns the page size (`0x0604`).
    fn page_size(&self) -> Result<usize, DpmiError>;

    /// Queries the DPMI 1.0 capabilities (`0x0401`).
    fn capabilities(&self) -> Result<Capabilities, DpmiError>;

    /// Locks the pages covering `address..address + size` (`0x0600`).
    fn lock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError>;

    /// Unlocks the pages covering `address..address + size` (`0x0601`).
    fn unlock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError>;

    /// Allocates committed memory at a host-chosen address (`0x0501`).
    fn allocate_memory_block(&self, size: usize) -> Result<MemoryBlock, DpmiError>;

    /// Frees a memory block (`0x0502`).
    ///
    /// # Safety
    ///
    /// The block must no longer be referenced.
    unsafe fn free_memory_block(&self, handle: MemoryHandle) -> Result<(), DpmiError>;

    /// Resizes a memory block (`0x0503`).
    ///
    /// # Safety
    ///
    /// The block may move; no reference into it may survive the call.
    unsafe fn resize_memory_block(
        &self,
        handle: MemoryHandle,
        size: usize,
    ) -> Result<MemoryBlock, DpmiError>;

    /// Allocates linear memory (`0x0504`).
    fn allocate_linear_memory(
        &self,
        desired_address: usize,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError>;

    /// Resizes a linear memory block (`0x0505`).
    ///
    /// # Safety
    ///
    /// The block may move; no reference into it may survive the call.
    unsafe fn resize_linear_memory(
        &self,
        handle: MemoryHandle,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError>;

    /// Maps device pages into a memory block (`0x0508`).
    ///
    /// # Safety
    ///
    /// `physical` must designate device memory owned by the caller.
    unsafe fn map_device_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        physical: usize,
    ) -> Result<(), DpmiError>;

    /// Maps conventional memory pages into a memory block (`0x0509`).
    ///
    /// # Safety
    ///
    /// The aliased conventional range must be owned by the caller.
    unsafe fn map_conventional_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        linear: usize,
    ) -> Result<(), DpmiError>;

    /// Maps physical memory into the linear address space (`0x0800`).
    ///
    /// # Safety
    ///
    /// `physical` must designate device memory owned by the caller.
    unsafe fn map_physical_address(&self, physical: usize, size: usize)
    -> Result<usize, DpmiError>;

    /// Releases a physical mapping (`0x0801`).
    ///
    /// # Safety
    ///
    /// The mapping must no longer be referenced.
    unsafe fn unmap_physical_address(&self, linear: usize) -> Result<(), DpmiError>;

    /// Allocates conventional memory (`0x0100`).
    fn allocate_dos_memory(&self, paragraphs: u16) -> Result<DosBlock, DpmiError>;

    /// Frees conventional memory (`0x0101`).
    ///
    /// # Safety
    ///
    /// The block must no longer be referenced.
    unsafe fn free_dos_memory(&self, sel: Selector) -> Result<(), DpmiError>;

    /// Resizes conventional memory in place (`0x0102`).
    ///
    /// # Safety
    ///
    /// When shrinking, the released tail must no longer be referenced.
    unsafe fn resize_dos_memory(&self, sel: Selector, paragraphs: u16) -> Result<(), DpmiError>;
}

/// The real host, reached through `int 0x31`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Int31;

impl Host for Int31 {
    fn data_selector(&self) -> Selector {
        selector::data_selector()
    }

    fn selector_base(&self, sel: Selector) -> Result<usize, DpmiError> {
        selector::base(sel)
    }

    unsafe fn set_selector_base(&self, sel: Selector, base: usize) -> Result<(), DpmiError> {
        unsafe { selector::set_base(sel, base) }
    }

    fn selector_limit(&self, sel: Selector) -> Result<usize, DpmiError> {
        selector::limit(sel)
    }

    unsafe fn set_selector_limit(&self, sel: Selector, limit: usize) -> Result<(), DpmiError> {
        unsafe { selector::set_limit(sel, limit) }
    }

    fn segment_to_selector(&self, segment: u16) -> Result<Selector, DpmiError> {
        selector::segment_to_descriptor(segment)
    }

    fn page_size(&self) -> Result<usize, DpmiError> {
        page::size()
    }

    fn capabilities(&self) -> Result<Capabilities, DpmiError> {
        capabilities::get()
    }

    fn lock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError> {
        page::lock(address, size)
    }

    fn unlock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError> {
        page::unlock(address, size)
    }

    fn allocate_memory_block(&self, size: usize) -> Result<MemoryBlock, DpmiError> {
        memory::allocate_block(size)
    }

    unsafe fn free_memory_block(&self, handle: MemoryHandle) -> Result<(), DpmiError> {
        unsafe { memory::free_block(handle) }
    }

    unsafe fn resize_memory_block(
        &self,
        handle: MemoryHandle,
        size: usize,
    ) -> Result<MemoryBlock, DpmiError> {
        unsafe { memory::resize_block(handle, size) }
    }

    fn allocate_linear_memory(
        &self,
        desired_address: usize,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        memory::allocate_linear(desired_address, size, committed)
    }

    unsafe fn resize_linear_memory(
        &self,
        handle: MemoryHandle,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        unsafe { memory::resize_linear(handle, size, committed) }
    }

    unsafe fn map_device_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        physical: usize,
    ) -> Result<(), DpmiError> {
        unsafe { memory::map_device(handle, offset, pages, physical) }
    }

    unsafe fn map_conventional_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        linear: usize,
    ) -> Result<(), DpmiError> {
        unsafe { memory::map_conventional(handle, offset, pages, linear) }
    }

    unsafe fn map_physical_address(
        &self,
        physical: usize,
        size: usize,
    ) -> Result<usize, DpmiError> {
        unsafe { physical::map(physical, size) }
    }

    unsafe fn unmap_physical_address(&self, linear: usize) -> Result<(), DpmiError> {
        unsafe { physical::unmap(linear) }
    }

    fn allocate_dos_memory(&self, paragraphs: u16) -> Result<DosBlock, DpmiError> {
        dos::allocate(paragraphs)
    }

    unsafe fn free_dos_memory(&self, sel: Selector) -> Result<(), DpmiError> {
        unsafe { dos::free(sel) }
    }

    unsafe fn resize_dos_memory(&self, sel: Selector, paragraphs: u16) -> Result<(), DpmiError> {
        unsafe { dos::resize(sel, paragraphs) }
    }
}
