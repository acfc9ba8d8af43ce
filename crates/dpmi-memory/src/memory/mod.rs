//! Memory objects.
//!
//! A [`Memory`] owns one range of linear memory obtained from the DPMI host.
//! What stands behind the range is described by its [`MemoryKind`]: a plain
//! extended memory block, physical device memory, a window onto conventional
//! memory, or a conventional memory block of its own.
//!
//! Every host allocation first tries the DPMI 1.0 functions and falls back to
//! the DPMI 0.9 ones for good once the host rejects them; see
//! [`Latches`](crate::Latches).

use core::{fmt, mem};

use derive_more::IsVariant;
use dpmi::{DpmiError, Host, Int31, MemoryBlock, MemoryHandle, Selector};
use dpmi_sys::memory::{ALLOCATE_LINEAR_MEMORY, RESIZE_LINEAR_MEMORY};
use log::{trace, warn};
use snafu::{IntoError as _, OptionExt as _, ResultExt as _, ensure};
use snafu_utils::Report;

pub use self::typed::TypedMemory;
use crate::{
    address::{self, FarPtr16},
    error::{
        AllocationFailedSnafu, HostSnafu, InterruptContextSnafu, MemoryError, ReleasedSnafu,
        ResizeUnsupportedSnafu, TooLargeSnafu,
    },
    interrupt,
    linear::{LinearRange, PageLock},
    service::Dpmi,
};

mod device;
mod dos;
mod typed;

/// How a device or conventional memory object reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IsVariant)]
pub enum MappingMode {
    /// The target pages are mapped into a memory block allocated for the
    /// object (DPMI 1.0).
    Block,
    /// The target is addressed directly, without a memory block (DPMI 0.9).
    Direct,
}

/// What stands behind a [`Memory`] object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum MemoryKind {
    /// Extended memory.
    Linear,
    /// Physical device memory.
    Device {
        physical: usize,
        mode: MappingMode,
        /// Distance of `physical` from its page start.
        offset: usize,
    },
    /// A window onto conventional memory at `linear`.
    MappedDos {
        linear: usize,
        mode: MappingMode,
        /// Distance of `linear` from its page start.
        offset: usize,
    },
    /// A conventional memory block owned by the object.
    Dos {
        /// `None` once the block has been freed.
        block: Option<dpmi::DosBlock>,
        mode: MappingMode,
        offset: usize,
    },
}

impl MemoryKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Device { .. } => "device",
            Self::MappedDos { .. } => "mapped DOS",
            Self::Dos { .. } => "DOS",
        }
    }

    #[must_use]
    pub const fn mapping_mode(&self) -> Option<MappingMode> {
        match self {
            Self::Linear => None,
            Self::Device { mode, .. } | Self::MappedDos { mode, .. } | Self::Dos { mode, .. } => {
                Some(*mode)
            }
        }
    }

    const fn offset(&self) -> usize {
        match self {
            Self::Linear => 0,
            Self::Device { offset, .. }
            | Self::MappedDos { offset, .. }
            | Self::Dos { offset, .. } => *offset,
        }
    }

    fn set_mapping(&mut self, new_mode: MappingMode, new_offset: usize) {
        match self {
            Self::Linear => {}
            Self::Device { mode, offset, .. }
            | Self::MappedDos { mode, offset, .. }
            | Self::Dos { mode, offset, .. } => {
                *mode = new_mode;
                *offset = new_offset;
            }
        }
    }
}

/// An owned range of linear memory.
///
/// The memory is released when the object is dropped, or earlier with
/// [`release`](Self::release).
pub struct Memory<'d, H = Int31>
where
    H: Host,
{
    dpmi: &'d Dpmi<H>,
    address: usize,
    size: usize,
    handle: MemoryHandle,
    kind: MemoryKind,
    live: bool,
}

impl<H> fmt::Debug for Memory<'_, H>
where
    H: Host,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &format_args!("{:#x}", self.size))
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("live", &self.live)
            .finish()
    }
}

impl<H> Drop for Memory<'_, H>
where
    H: Host,
{
    fn drop(&mut self) {
        self.release();
    }
}

fn ensure_normal_context() -> Result<(), MemoryError> {
    ensure!(!interrupt::in_handler(), InterruptContextSnafu);
    Ok(())
}

/// Returns `bytes` rounded up to `page_size`, making sure that one more page
/// still fits in `usize`.
fn page_span(bytes: usize, page_size: usize) -> Result<usize, MemoryError> {
    bytes
        .checked_next_multiple_of(page_size)
        .filter(|usable| usable.checked_add(page_size).is_some())
        .context(TooLargeSnafu { size: bytes })
}

impl<'d, H> Memory<'d, H>
where
    H: Host,
{
    fn empty(dpmi: &'d Dpmi<H>, kind: MemoryKind) -> Self {
        Self {
            dpmi,
            address: 0,
            size: 0,
            handle: MemoryHandle::NULL,
            kind,
            live: false,
        }
    }

    /// Allocates `bytes` bytes of extended memory.
    ///
    /// With `committed` unset, a DPMI 1.0 host only reserves the address
    /// range and commits pages on first touch. DPMI 0.9 hosts always commit.
    pub fn allocate(dpmi: &'d Dpmi<H>, bytes: usize, committed: bool) -> Result<Self, MemoryError> {
        Self::allocate_at(dpmi, LinearRange::new(0, bytes), committed)
    }

    /// Allocates extended memory, asking for it to be placed at
    /// `range.address()`.
    ///
    /// Only DPMI 1.0 hosts honor the placement; an address of 0 leaves the
    /// choice to the host.
    pub fn allocate_at(
        dpmi: &'d Dpmi<H>,
        range: LinearRange,
        committed: bool,
    ) -> Result<Self, MemoryError> {
        let mut memory = Self::empty(dpmi, MemoryKind::Linear);
        memory
            .allocate_block(range.address(), range.size(), committed)
            .context(AllocationFailedSnafu)?;
        Ok(memory)
    }

    /// Replaces the memory with a fresh allocation of `bytes` bytes.
    ///
    /// The contents are not preserved. Only extended memory can be
    /// reallocated.
    pub fn reallocate(&mut self, bytes: usize, committed: bool) -> Result<(), MemoryError> {
        ensure!(
            self.kind.is_linear(),
            ResizeUnsupportedSnafu {
                kind: self.kind.name()
            }
        );
        self.release_block();
        self.allocate_block(0, bytes, committed)
            .context(AllocationFailedSnafu)
    }

    fn allocate_block(
        &mut self,
        desired_address: usize,
        size: usize,
        committed: bool,
    ) -> Result<(), MemoryError> {
        if self.allocate_linear(desired_address, size, committed)? {
            return Ok(());
        }
        self.allocate_legacy(size)
    }

    /// Allocates a block with the DPMI 1.0 function.
    ///
    /// Returns `false` if the host does not support it.
    fn allocate_linear(
        &mut self,
        desired_address: usize,
        size: usize,
        committed: bool,
    ) -> Result<bool, MemoryError> {
        let latches = self.dpmi.latches();
        if !latches.new_alloc() {
            return Ok(false);
        }
        if committed {
            ensure_normal_context()?;
        }
        self.release_block();

        match self
            .dpmi
            .host()
            .allocate_linear_memory(desired_address, size, committed)
        {
            Ok(block) => self.adopt(block, size).map(|()| true),
            Err(err) if err.is_unsupported_for(ALLOCATE_LINEAR_MEMORY) => {
                latches.clear_new_alloc();
                Ok(false)
            }
            Err(source) => Err(HostSnafu {
                operation: "allocate linear memory",
            }
            .into_error(source)),
        }
    }

    fn allocate_legacy(&mut self, size: usize) -> Result<(), MemoryError> {
        ensure_normal_context()?;
        self.release_block();

        let block = self
            .dpmi
            .host()
            .allocate_memory_block(size)
            .context(HostSnafu {
                operation: "allocate memory block",
            })?;
        self.adopt(block, size)
    }

    /// Takes ownership of a block returned by the host and makes it reachable
    /// through `DS`. The block is freed again if that fails.
    fn adopt(&mut self, block: MemoryBlock, size: usize) -> Result<(), MemoryError> {
        trace!(
            "memory block {}: {size:#x} bytes at {:#x}",
            block.handle, block.address
        );
        self.address = block.address;
        self.size = size;
        self.handle = block.handle;
        self.live = true;

        if let Err(err) = self.dpmi.reach_from_data_selector(self.linear_range()) {
            self.release_block();
            return Err(err);
        }
        Ok(())
    }

    /// Allocates an uncommitted block for [`map_into_block`](Self::map_into_block):
    /// `usable` bytes of whole pages plus a page for the target's offset
    /// into its first page.
    ///
    /// Returns `false` if the host does not support the DPMI 1.0 function.
    fn allocate_window(&mut self, usable: usize) -> Result<bool, MemoryError> {
        let page_size = self.dpmi.page_size()?;
        let size = usable + page_size;
        if !self.allocate_linear(0, size, false)? {
            return Ok(false);
        }
        if self.address % page_size == 0 {
            return Ok(true);
        }

        // The partial page in front of an unaligned block cannot be mapped.
        let size = size
            .checked_add(page_size)
            .context(TooLargeSnafu { size: usable })?;
        trace!(
            "block at {:#x} is not page aligned, allocating {size:#x} bytes",
            self.address
        );
        self.allocate_linear(0, size, false)
    }

    /// Maps the pages starting at `target` into the freshly allocated block.
    ///
    /// On success the object shrinks to the mapped range, starting at the
    /// byte that corresponds to `target`. Returns `false` if the host does
    /// not support the mapping function; the block is freed in that case.
    fn map_into_block<F>(
        &mut self,
        usable: usize,
        target: usize,
        function: u16,
        operation: &'static str,
        map: F,
    ) -> Result<bool, MemoryError>
    where
        F: FnOnce(&H, MemoryHandle, usize, usize, usize) -> Result<(), DpmiError>,
    {
        let page_size = self.dpmi.page_size()?;
        let first_page = address::round_down_to_page(target, page_size);
        let offset = target - first_page;
        let skip = address::round_up_to_page(self.address, page_size) - self.address;
        let needed = address::round_up_to_page(offset + usable, page_size) / page_size;
        let pages = needed.min((self.size - skip) / page_size);

        match map(self.dpmi.host(), self.handle, skip, pages, first_page) {
            Ok(()) => {
                self.address += skip + offset;
                self.size = usable.min(pages * page_size - offset);
                self.kind.set_mapping(MappingMode::Block, offset);
                trace!(
                    "mapped {pages} pages at {first_page:#x} into block {}",
                    self.handle
                );
                Ok(true)
            }
            Err(err) if err.is_unsupported_for(function) => {
                self.release_block();
                Ok(false)
            }
            Err(source) => Err(HostSnafu { operation }.into_error(source)),
        }
    }

    /// Resizes the memory to `bytes` bytes, preserving its contents.
    ///
    /// The memory may move. Device memory and conventional memory windows
    /// cannot be resized. A released extended memory object is allocated
    /// afresh.
    pub fn resize(&mut self, bytes: usize, committed: bool) -> Result<(), MemoryError> {
        match self.kind {
            MemoryKind::Linear => self
                .resize_block(bytes, committed)
                .context(AllocationFailedSnafu),
            MemoryKind::Dos { .. } => self.resize_dos(bytes).context(AllocationFailedSnafu),
            MemoryKind::Device { .. } | MemoryKind::MappedDos { .. } => ResizeUnsupportedSnafu {
                kind: self.kind.name(),
            }
            .fail(),
        }
    }

    fn resize_block(&mut self, size: usize, committed: bool) -> Result<(), MemoryError> {
        if self.handle.is_null() {
            return self.allocate_block(0, size, committed);
        }

        let latches = self.dpmi.latches();
        if latches.new_alloc() {
            if committed {
                ensure_normal_context()?;
            }
            match unsafe {
                self.dpmi
                    .host()
                    .resize_linear_memory(self.handle, size, committed)
            } {
                Ok(block) => return self.adopt(block, size),
                Err(err) if err.is_unsupported_for(RESIZE_LINEAR_MEMORY) => {
                    latches.clear_new_alloc();
                }
                Err(source) => {
                    return Err(HostSnafu {
                        operation: "resize linear memory",
                    }
                    .into_error(source));
                }
            }
        }

        ensure_normal_context()?;
        let block = unsafe { self.dpmi.host().resize_memory_block(self.handle, size) }.context(
            HostSnafu {
                operation: "resize memory block",
            },
        )?;
        self.adopt(block, size)
    }

    /// Releases the memory.
    ///
    /// Releasing twice is harmless. Host failures are logged, never
    /// returned: teardown always completes.
    pub fn release(&mut self) {
        self.release_mapping();
        self.release_dos_block();
    }

    fn release_mapping(&mut self) {
        match self.kind {
            MemoryKind::Device {
                mode: MappingMode::Direct,
                ..
            } => self.unmap_physical(),
            _ => self.release_block(),
        }
        self.live = false;
    }

    fn release_block(&mut self) {
        let handle = mem::replace(&mut self.handle, MemoryHandle::NULL);
        self.live = false;
        if handle.is_null() {
            return;
        }
        trace!("freeing memory block {handle}");
        if let Err(source) = unsafe { self.dpmi.host().free_memory_block(handle) } {
            let err = HostSnafu {
                operation: "free memory block",
            }
            .into_error(source);
            warn!("failed to free memory block {handle}: {}", Report::new(err));
        }
    }

    #[must_use]
    pub fn dpmi(&self) -> &'d Dpmi<H> {
        self.dpmi
    }

    /// Returns the linear address of the first byte.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the host handle of the memory block, or
    /// [`MemoryHandle::NULL`] if the object owns none.
    #[must_use]
    pub fn handle(&self) -> MemoryHandle {
        self.handle
    }

    /// Returns `true` until the memory is released.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.live
    }

    #[must_use]
    pub fn kind(&self) -> &MemoryKind {
        &self.kind
    }

    /// Returns the distance of the first byte from the start of its page in
    /// the mapped target.
    #[must_use]
    pub fn offset_in_block(&self) -> usize {
        self.kind.offset()
    }

    #[must_use]
    pub fn mapping_mode(&self) -> Option<MappingMode> {
        self.kind.mapping_mode()
    }

    /// Returns `true` if the memory is only reachable through a selector of
    /// its own.
    #[must_use]
    pub fn requires_new_selector(&self) -> bool {
        matches!(
            self.kind,
            MemoryKind::Device {
                mode: MappingMode::Direct,
                ..
            }
        )
    }

    /// Returns the real-mode pointer to conventional memory.
    #[must_use]
    pub fn dos_ptr(&self) -> Option<FarPtr16> {
        match self.kind {
            MemoryKind::MappedDos { linear, .. } => Some(address::linear_to_conventional(linear)),
            MemoryKind::Dos {
                block: Some(block), ..
            } => Some(FarPtr16::new(block.segment, 0)),
            _ => None,
        }
    }

    /// Returns the selector covering an owned conventional memory block.
    #[must_use]
    pub fn dos_selector(&self) -> Option<Selector> {
        match self.kind {
            MemoryKind::Dos {
                block: Some(block), ..
            } => Some(block.selector),
            _ => None,
        }
    }

    #[must_use]
    pub fn linear_range(&self) -> LinearRange {
        LinearRange::new(self.address, self.size)
    }

    /// Returns a pointer to the memory through `DS`.
    pub fn ptr<T>(&self) -> Result<*mut T, MemoryError> {
        self.ptr_in(self.dpmi.data_selector())
    }

    /// Returns a pointer to the memory through `sel`.
    pub fn ptr_in<T>(&self, sel: Selector) -> Result<*mut T, MemoryError> {
        ensure!(self.live, ReleasedSnafu);
        self.linear_range().near_ptr(self.dpmi, sel)
    }

    /// Locks the pages of the memory until the returned token is dropped.
    pub fn lock(&self) -> Result<PageLock<'d, H>, MemoryError> {
        ensure!(self.live, ReleasedSnafu);
        PageLock::new(self.dpmi, self.linear_range())
    }
}
