//! A simulated DPMI host for unit tests.
//!
//! Memory blocks are backed by real heap allocations, so memory objects
//! allocated through it can be read and written. Physical mappings and DOS
//! memory only hand out addresses. Every host function call is recorded, and
//! any function can be made to fail with a chosen error code.

use alloc::{
    alloc::{alloc_zeroed, dealloc},
    collections::BTreeMap,
    vec::Vec,
};
use core::{
    alloc::Layout,
    cell::RefCell,
    fmt,
    ptr::{self, NonNull},
};

use dpmi::{
    Capabilities, CapabilityFlags, DosBlock, DpmiError, Host, MemoryBlock, MemoryHandle, Selector,
};
use dpmi_sys::{capabilities, dos, memory, page, physical, selector};

use crate::linear::LinearRange;

pub(crate) const PAGE_SIZE: usize = 4096;

const DATA_SELECTOR: Selector = Selector(0x10);
const FIRST_DOS_SEGMENT: u16 = 0x1000;
const FIRST_PHYSICAL_LINEAR: usize = 0xc000_0000;

struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    misalign: usize,
    size: usize,
    committed: bool,
}

impl Block {
    fn new(size: usize, misalign: usize, committed: bool) -> Result<Self, DpmiError> {
        let layout = Layout::from_size_align(size.max(1) + misalign, PAGE_SIZE)
            .map_err(|_err| DpmiError::INVALID_VALUE)?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(DpmiError::LINEAR_MEMORY_UNAVAILABLE)?;
        Ok(Self {
            ptr,
            layout,
            misalign,
            size,
            committed,
        })
    }

    fn address(&self) -> usize {
        self.data().expose_provenance()
    }

    fn data(&self) -> *mut u8 {
        self.ptr.as_ptr().wrapping_add(self.misalign)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

struct DosEntry {
    segment: u16,
    paragraphs: u16,
}

struct State {
    calls: Vec<u16>,
    responses: BTreeMap<u16, DpmiError>,
    capabilities: Option<CapabilityFlags>,
    ds_base: usize,
    ds_limit: usize,
    ds_limit_frozen: bool,
    limit_history: Vec<usize>,
    next_handle: u32,
    blocks: BTreeMap<u32, Block>,
    block_misalign: usize,
    locked: Vec<LinearRange>,
    next_physical_linear: usize,
    physical_maps: BTreeMap<usize, usize>,
    next_segment: u16,
    next_selector: u16,
    dos_blocks: BTreeMap<u16, DosEntry>,
}

pub(crate) struct SimHost {
    state: RefCell<State>,
}

impl fmt::Debug for SimHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHost").finish_non_exhaustive()
    }
}

impl SimHost {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(State {
                calls: Vec::new(),
                responses: BTreeMap::new(),
                capabilities: Some(
                    CapabilityFlags::DEVICE_MAPPING | CapabilityFlags::CONVENTIONAL_MEMORY_MAPPING,
                ),
                ds_base: 0,
                ds_limit: 0xf_ffff,
                ds_limit_frozen: false,
                limit_history: Vec::new(),
                next_handle: 1,
                blocks: BTreeMap::new(),
                block_misalign: 0,
                locked: Vec::new(),
                next_physical_linear: FIRST_PHYSICAL_LINEAR,
                physical_maps: BTreeMap::new(),
                next_segment: FIRST_DOS_SEGMENT,
                next_selector: 0x100,
                dos_blocks: BTreeMap::new(),
            }),
        }
    }

    /// Makes every later call of `function` fail with `err`.
    pub(crate) fn respond(&self, function: u16, err: DpmiError) {
        self.state.borrow_mut().responses.insert(function, err);
    }

    /// Makes every later call of `function` answer "unsupported function".
    pub(crate) fn unsupported(&self, function: u16) {
        self.respond(function, DpmiError::UNSUPPORTED_FUNCTION);
    }

    /// Makes `function` succeed again.
    pub(crate) fn clear_response(&self, function: u16) {
        self.state.borrow_mut().responses.remove(&function);
    }

    pub(crate) fn set_capabilities(&self, flags: CapabilityFlags) {
        self.state.borrow_mut().capabilities = Some(flags);
    }

    pub(crate) fn set_ds_base(&self, base: usize) {
        self.state.borrow_mut().ds_base = base;
    }

    pub(crate) fn set_ds_limit(&self, limit: usize) {
        self.state.borrow_mut().ds_limit = limit;
    }

    /// Makes the host accept limit changes on `DS` without applying them.
    pub(crate) fn freeze_ds_limit(&self) {
        self.state.borrow_mut().ds_limit_frozen = true;
    }

    pub(crate) fn limit_history(&self) -> Vec<usize> {
        self.state.borrow().limit_history.clone()
    }

    pub(crate) fn calls(&self) -> Vec<u16> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn count(&self, function: u16) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|&&f| f == function)
            .count()
    }

    pub(crate) fn locked_regions(&self) -> Vec<LinearRange> {
        self.state.borrow().locked.clone()
    }

    pub(crate) fn live_blocks(&self) -> usize {
        self.state.borrow().blocks.len()
    }

    /// Returns the size and commit state of the block at `address`.
    pub(crate) fn block_at(&self, address: usize) -> Option<(usize, bool)> {
        self.state
            .borrow()
            .blocks
            .values()
            .find(|block| block.address() == address)
            .map(|block| (block.size, block.committed))
    }

    pub(crate) fn live_physical_maps(&self) -> usize {
        self.state.borrow().physical_maps.len()
    }

    pub(crate) fn live_dos_blocks(&self) -> usize {
        self.state.borrow().dos_blocks.len()
    }

    /// Returns the size in paragraphs of the DOS block behind `sel`.
    pub(crate) fn dos_paragraphs(&self, sel: Selector) -> Option<u16> {
        self.state
            .borrow()
            .dos_blocks
            .get(&sel.0)
            .map(|entry| entry.paragraphs)
    }

    /// Makes later DPMI 1.0 allocations start `bytes` past a page boundary.
    pub(crate) fn misalign_linear_blocks(&self, bytes: usize) {
        self.state.borrow_mut().block_misalign = bytes;
    }

    fn call(&self, function: u16) -> Result<(), DpmiError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(function);
        match state.responses.get(&function) {
            Some(&err) => Err(err),
            None => Ok(()),
        }
    }

    fn insert_block(
        &self,
        size: usize,
        misalign: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        let block = Block::new(size, misalign, committed)?;
        let address = block.address();
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.blocks.insert(handle, block);
        Ok(MemoryBlock {
            address,
            handle: MemoryHandle(handle),
        })
    }

    fn replace_block(
        &self,
        handle: MemoryHandle,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        if !self.state.borrow().blocks.contains_key(&handle.0) {
            return Err(DpmiError::INVALID_HANDLE);
        }
        let block = self.insert_block(size, 0, committed)?;
        let mut state = self.state.borrow_mut();
        if let Some(old) = state.blocks.remove(&handle.0) {
            let len = old.size.min(size);
            let dst = ptr::with_exposed_provenance_mut::<u8>(block.address);
            unsafe { dst.copy_from_nonoverlapping(old.data(), len) };
        }
        Ok(block)
    }

    fn check_mapping(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        target: usize,
    ) -> Result<(), DpmiError> {
        let state = self.state.borrow();
        let block = state
            .blocks
            .get(&handle.0)
            .ok_or(DpmiError::INVALID_HANDLE)?;
        if (block.address() + offset) % PAGE_SIZE != 0 || target % PAGE_SIZE != 0 {
            return Err(DpmiError::INVALID_LINEAR_ADDRESS);
        }
        if offset + pages * PAGE_SIZE > block.size {
            return Err(DpmiError::INVALID_VALUE);
        }
        Ok(())
    }
}

impl Host for SimHost {
    fn data_selector(&self) -> Selector {
        DATA_SELECTOR
    }

    fn selector_base(&self, sel: Selector) -> Result<usize, DpmiError> {
        self.call(selector::GET_SEGMENT_BASE)?;
        let state = self.state.borrow();
        if sel == DATA_SELECTOR {
            return Ok(state.ds_base);
        }
        let entry = state
            .dos_blocks
            .get(&sel.0)
            .ok_or(DpmiError::INVALID_SELECTOR)?;
        Ok(usize::from(entry.segment) << 4)
    }

    unsafe fn set_selector_base(&self, sel: Selector, base: usize) -> Result<(), DpmiError> {
        self.call(selector::SET_SEGMENT_BASE)?;
        if sel != DATA_SELECTOR {
            return Err(DpmiError::INVALID_SELECTOR);
        }
        self.state.borrow_mut().ds_base = base;
        Ok(())
    }

    fn selector_limit(&self, sel: Selector) -> Result<usize, DpmiError> {
        let state = self.state.borrow();
        if sel == DATA_SELECTOR {
            return Ok(state.ds_limit);
        }
        let entry = state
            .dos_blocks
            .get(&sel.0)
            .ok_or(DpmiError::INVALID_SELECTOR)?;
        Ok((usize::from(entry.paragraphs) << 4).saturating_sub(1))
    }

    unsafe fn set_selector_limit(&self, sel: Selector, limit: usize) -> Result<(), DpmiError> {
        self.call(selector::SET_SEGMENT_LIMIT)?;
        if sel != DATA_SELECTOR {
            return Err(DpmiError::INVALID_SELECTOR);
        }
        if limit >= 0x10_0000 && limit % PAGE_SIZE != PAGE_SIZE - 1 {
            return Err(DpmiError::INVALID_VALUE);
        }
        let mut state = self.state.borrow_mut();
        if !state.ds_limit_frozen {
            state.ds_limit = limit;
            state.limit_history.push(limit);
        }
        Ok(())
    }

    fn segment_to_selector(&self, segment: u16) -> Result<Selector, DpmiError> {
        self.call(selector::SEGMENT_TO_DESCRIPTOR)?;
        let mut state = self.state.borrow_mut();
        let sel = state.next_selector;
        state.next_selector += 8;
        state.dos_blocks.insert(
            sel,
            DosEntry {
                segment,
                paragraphs: 0x1000,
            },
        );
        Ok(Selector(sel))
    }

    fn page_size(&self) -> Result<usize, DpmiError> {
        self.call(page::GET_PAGE_SIZE)?;
        Ok(PAGE_SIZE)
    }

    fn capabilities(&self) -> Result<Capabilities, DpmiError> {
        self.call(capabilities::GET_CAPABILITIES)?;
        let flags = self
            .state
            .borrow()
            .capabilities
            .ok_or(DpmiError::UNSUPPORTED_FUNCTION)?;
        Ok(Capabilities::new(flags))
    }

    fn lock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError> {
        self.call(page::LOCK_LINEAR_REGION)?;
        self.state
            .borrow_mut()
            .locked
            .push(LinearRange::new(address, size));
        Ok(())
    }

    fn unlock_linear_region(&self, address: usize, size: usize) -> Result<(), DpmiError> {
        self.call(page::UNLOCK_LINEAR_REGION)?;
        let mut state = self.state.borrow_mut();
        let range = LinearRange::new(address, size);
        let index = state
            .locked
            .iter()
            .position(|locked| *locked == range)
            .ok_or(DpmiError::INVALID_LINEAR_ADDRESS)?;
        state.locked.remove(index);
        Ok(())
    }

    fn allocate_memory_block(&self, size: usize) -> Result<MemoryBlock, DpmiError> {
        self.call(memory::ALLOCATE_MEMORY_BLOCK)?;
        self.insert_block(size, 0, true)
    }

    unsafe fn free_memory_block(&self, handle: MemoryHandle) -> Result<(), DpmiError> {
        self.call(memory::FREE_MEMORY_BLOCK)?;
        self.state
            .borrow_mut()
            .blocks
            .remove(&handle.0)
            .map(drop)
            .ok_or(DpmiError::INVALID_HANDLE)
    }

    unsafe fn resize_memory_block(
        &self,
        handle: MemoryHandle,
        size: usize,
    ) -> Result<MemoryBlock, DpmiError> {
        self.call(memory::RESIZE_MEMORY_BLOCK)?;
        self.replace_block(handle, size, true)
    }

    fn allocate_linear_memory(
        &self,
        desired_address: usize,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        self.call(memory::ALLOCATE_LINEAR_MEMORY)?;
        if desired_address != 0 {
            return Err(DpmiError::LINEAR_MEMORY_UNAVAILABLE);
        }
        let misalign = self.state.borrow().block_misalign;
        self.insert_block(size, misalign, committed)
    }

    unsafe fn resize_linear_memory(
        &self,
        handle: MemoryHandle,
        size: usize,
        committed: bool,
    ) -> Result<MemoryBlock, DpmiError> {
        self.call(memory::RESIZE_LINEAR_MEMORY)?;
        self.replace_block(handle, size, committed)
    }

    unsafe fn map_device_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        physical: usize,
    ) -> Result<(), DpmiError> {
        self.call(memory::MAP_DEVICE_IN_BLOCK)?;
        self.check_mapping(handle, offset, pages, physical)
    }

    unsafe fn map_conventional_in_block(
        &self,
        handle: MemoryHandle,
        offset: usize,
        pages: usize,
        linear: usize,
    ) -> Result<(), DpmiError> {
        self.call(memory::MAP_CONVENTIONAL_IN_BLOCK)?;
        if linear >= 0x10_0000 {
            return Err(DpmiError::INVALID_LINEAR_ADDRESS);
        }
        self.check_mapping(handle, offset, pages, linear)
    }

    unsafe fn map_physical_address(
        &self,
        physical: usize,
        size: usize,
    ) -> Result<usize, DpmiError> {
        self.call(physical::PHYSICAL_ADDRESS_MAPPING)?;
        if size == 0 {
            return Err(DpmiError::INVALID_VALUE);
        }
        let mut state = self.state.borrow_mut();
        let linear = state.next_physical_linear + physical % PAGE_SIZE;
        state.next_physical_linear += (size + physical % PAGE_SIZE).next_multiple_of(PAGE_SIZE);
        state.physical_maps.insert(linear, size);
        Ok(linear)
    }

    unsafe fn unmap_physical_address(&self, linear: usize) -> Result<(), DpmiError> {
        self.call(physical::FREE_PHYSICAL_ADDRESS_MAPPING)?;
        self.state
            .borrow_mut()
            .physical_maps
            .remove(&linear)
            .map(drop)
            .ok_or(DpmiError::INVALID_LINEAR_ADDRESS)
    }

    fn allocate_dos_memory(&self, paragraphs: u16) -> Result<DosBlock, DpmiError> {
        self.call(dos::ALLOCATE_DOS_MEMORY)?;
        let mut state = self.state.borrow_mut();
        let segment = state.next_segment;
        state.next_segment = segment
            .checked_add(paragraphs)
            .filter(|&end| end < 0xa000)
            .ok_or(DpmiError::DOS_INSUFFICIENT_MEMORY)?;
        let sel = state.next_selector;
        state.next_selector += 8;
        state.dos_blocks.insert(
            sel,
            DosEntry {
                segment,
                paragraphs,
            },
        );
        Ok(DosBlock {
            segment,
            selector: Selector(sel),
        })
    }

    unsafe fn free_dos_memory(&self, sel: Selector) -> Result<(), DpmiError> {
        self.call(dos::FREE_DOS_MEMORY)?;
        self.state
            .borrow_mut()
            .dos_blocks
            .remove(&sel.0)
            .map(drop)
            .ok_or(DpmiError::DOS_INVALID_BLOCK)
    }

    unsafe fn resize_dos_memory(&self, sel: Selector, paragraphs: u16) -> Result<(), DpmiError> {
        self.call(dos::RESIZE_DOS_MEMORY)?;
        let mut state = self.state.borrow_mut();
        let entry = state
            .dos_blocks
            .get_mut(&sel.0)
            .ok_or(DpmiError::DOS_INVALID_BLOCK)?;
        entry.paragraphs = paragraphs;
        Ok(())
    }
}
