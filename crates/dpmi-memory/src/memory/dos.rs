use dpmi::{Capabilities, DosBlock, Host};
use dpmi_sys::memory::MAP_CONVENTIONAL_IN_BLOCK;
use log::{trace, warn};
use snafu::{IntoError as _, OptionExt as _, ResultExt as _};
use snafu_utils::Report;

use super::{MappingMode, Memory, MemoryKind, ensure_normal_context, page_span};
use crate::{
    address::{self, FarPtr16},
    error::{AllocationFailedSnafu, HostSnafu, MemoryError, ReleasedSnafu, TooLargeSnafu},
    service::Dpmi,
};

fn paragraphs_for(bytes: usize) -> Result<u16, MemoryError> {
    let max = address::paragraphs_to_bytes(u16::MAX.into());
    (bytes <= max)
        .then(|| address::bytes_to_paragraphs(bytes))
        .and_then(|paragraphs| u16::try_from(paragraphs).ok())
        .context(TooLargeSnafu { size: bytes })
}

impl<'d, H> Memory<'d, H>
where
    H: Host,
{
    /// Maps `bytes` bytes of conventional memory at the real-mode pointer
    /// `ptr`.
    ///
    /// See [`map_dos_linear`](Self::map_dos_linear).
    pub fn map_dos(dpmi: &'d Dpmi<H>, bytes: usize, ptr: FarPtr16) -> Result<Self, MemoryError> {
        Self::map_dos_linear(dpmi, bytes, address::conventional_to_linear(ptr))
    }

    /// Maps `bytes` bytes of conventional memory at the linear address
    /// `linear`.
    ///
    /// DPMI 1.0 hosts that support it map the pages into a block of their
    /// own. Elsewhere the object addresses the conventional memory directly
    /// ([`MappingMode::Direct`]), without a memory block.
    ///
    /// The reported size is `bytes` rounded up to the page size.
    pub fn map_dos_linear(
        dpmi: &'d Dpmi<H>,
        bytes: usize,
        linear: usize,
    ) -> Result<Self, MemoryError> {
        let mut memory = Self::empty(
            dpmi,
            MemoryKind::MappedDos {
                linear,
                mode: MappingMode::Block,
                offset: 0,
            },
        );
        memory
            .map_conventional(bytes, linear)
            .context(AllocationFailedSnafu)?;
        Ok(memory)
    }

    /// Allocates `bytes` bytes of conventional memory, and maps it.
    ///
    /// The reported size is `bytes` rounded up to whole paragraphs.
    pub fn allocate_dos(dpmi: &'d Dpmi<H>, bytes: usize) -> Result<Self, MemoryError> {
        let mut memory = Self::empty(
            dpmi,
            MemoryKind::Dos {
                block: None,
                mode: MappingMode::Block,
                offset: 0,
            },
        );
        memory
            .allocate_dos_block(bytes)
            .context(AllocationFailedSnafu)?;
        Ok(memory)
    }

    fn conventional_mapping_supported(&self) -> bool {
        self.dpmi.latches().new_alloc()
            && self
                .dpmi
                .capabilities()
                .is_some_and(Capabilities::conventional_memory_mapping)
    }

    fn map_conventional(&mut self, bytes: usize, linear: usize) -> Result<(), MemoryError> {
        let page_size = self.dpmi.page_size()?;
        let usable = page_span(bytes, page_size)?;
        let latches = self.dpmi.latches();

        if latches.dos_map() {
            if self.conventional_mapping_supported()
                && self.allocate_window(usable)?
                && self.map_into_block(
                    usable,
                    linear,
                    MAP_CONVENTIONAL_IN_BLOCK,
                    "map conventional memory in block",
                    |host, handle, offset, pages, first_page| unsafe {
                        host.map_conventional_in_block(handle, offset, pages, first_page)
                    },
                )?
            {
                return Ok(());
            }
            latches.clear_dos_map();
        }

        let offset = linear - address::round_down_to_page(linear, page_size);
        self.kind.set_mapping(MappingMode::Direct, offset);
        self.address = linear;
        self.size = usable;
        self.live = true;
        trace!("conventional memory at {linear:#x} addressed directly");
        Ok(())
    }

    fn allocate_dos_block(&mut self, bytes: usize) -> Result<(), MemoryError> {
        ensure_normal_context()?;
        let paragraphs = paragraphs_for(bytes)?;

        let block = self
            .dpmi
            .host()
            .allocate_dos_memory(paragraphs)
            .context(HostSnafu {
                operation: "allocate DOS memory",
            })?;
        trace!(
            "DOS block {:04x}: {paragraphs:#x} paragraphs, selector {}",
            block.segment, block.selector
        );
        if let MemoryKind::Dos { block: slot, .. } = &mut self.kind {
            *slot = Some(block);
        }
        self.map_dos_block(block, bytes)
    }

    fn map_dos_block(&mut self, block: DosBlock, bytes: usize) -> Result<(), MemoryError> {
        let linear = address::conventional_to_linear(FarPtr16::new(block.segment, 0));
        self.map_conventional(bytes, linear)?;
        self.size = self.size.min(address::round_up_to_paragraph(bytes));
        Ok(())
    }

    /// Resizes the conventional memory block in place and maps it again.
    pub(super) fn resize_dos(&mut self, bytes: usize) -> Result<(), MemoryError> {
        ensure_normal_context()?;
        let MemoryKind::Dos {
            block: Some(block), ..
        } = self.kind
        else {
            return ReleasedSnafu.fail();
        };
        let paragraphs = paragraphs_for(bytes)?;

        self.release_mapping();
        unsafe { self.dpmi.host().resize_dos_memory(block.selector, paragraphs) }.context(
            HostSnafu {
                operation: "resize DOS memory",
            },
        )?;
        self.map_dos_block(block, bytes)
    }

    /// Frees the conventional memory block, if the object owns one.
    pub(super) fn release_dos_block(&mut self) {
        let MemoryKind::Dos { block, .. } = &mut self.kind else {
            return;
        };
        let Some(block) = block.take() else {
            return;
        };
        trace!("freeing DOS block {:04x}", block.segment);
        if let Err(source) = unsafe { self.dpmi.host().free_dos_memory(block.selector) } {
            let err = HostSnafu {
                operation: "free DOS memory",
            }
            .into_error(source);
            warn!(
                "failed to free DOS block {:04x}: {}",
                block.segment,
                Report::new(err)
            );
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use dpmi::{CapabilityFlags, DpmiError};
    use dpmi_sys::{
        dos::{ALLOCATE_DOS_MEMORY, FREE_DOS_MEMORY, RESIZE_DOS_MEMORY},
        memory::{ALLOCATE_LINEAR_MEMORY, FREE_MEMORY_BLOCK},
    };

    use super::*;
    use crate::testing::{PAGE_SIZE, SimHost};

    #[test]
    fn test_paragraphs_for() {
        assert_eq!(paragraphs_for(0).unwrap(), 0);
        assert_eq!(paragraphs_for(1).unwrap(), 1);
        assert_eq!(paragraphs_for(16).unwrap(), 1);
        assert_eq!(paragraphs_for(17).unwrap(), 2);
        assert_eq!(paragraphs_for(0xf_fff0).unwrap(), u16::MAX);
        assert!(matches!(
            paragraphs_for(0xf_fff1).unwrap_err(),
            MemoryError::TooLarge { size: 0xf_fff1, .. }
        ));
        assert!(matches!(
            paragraphs_for(usize::MAX),
            Err(MemoryError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_map_dos_block_mode() {
        let dpmi = Dpmi::new(SimHost::new());
        let memory = Memory::map_dos(&dpmi, 100, FarPtr16::new(0xb800, 0x10)).unwrap();
        assert_eq!(memory.mapping_mode(), Some(MappingMode::Block));
        assert!(!memory.requires_new_selector());
        assert_eq!(memory.size(), PAGE_SIZE);
        assert_eq!(memory.offset_in_block(), 0x10);
        assert_eq!(memory.address() % PAGE_SIZE, 0x10);
        assert_eq!(memory.dos_ptr(), Some(FarPtr16::new(0xb801, 0)));
        assert_eq!(memory.dos_selector(), None);
        assert_eq!(dpmi.host().count(MAP_CONVENTIONAL_IN_BLOCK), 1);
    }

    #[test]
    fn test_map_dos_into_unaligned_block() {
        let host = SimHost::new();
        host.misalign_linear_blocks(0x10);
        let dpmi = Dpmi::new(host);
        let memory = Memory::map_dos_linear(&dpmi, 0x1001, 0xb_8010).unwrap();

        assert_eq!(memory.mapping_mode(), Some(MappingMode::Block));
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
        assert_eq!(memory.offset_in_block(), 0x10);
        assert_eq!(memory.address() % PAGE_SIZE, 0x10);
        assert_eq!(dpmi.host().count(ALLOCATE_LINEAR_MEMORY), 2);
        assert_eq!(dpmi.host().count(FREE_MEMORY_BLOCK), 1);
        assert_eq!(dpmi.host().live_blocks(), 1);
    }

    #[test]
    fn test_map_dos_direct_mode() {
        let host = SimHost::new();
        host.unsupported(MAP_CONVENTIONAL_IN_BLOCK);
        let dpmi = Dpmi::new(host);
        let memory = Memory::map_dos_linear(&dpmi, 0x1001, 0xb_8010).unwrap();
        assert!(!dpmi.latches().dos_map());
        assert_eq!(memory.mapping_mode(), Some(MappingMode::Direct));
        assert!(!memory.requires_new_selector());
        assert!(memory.handle().is_null());
        assert_eq!(memory.address(), 0xb_8010);
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
        assert_eq!(memory.offset_in_block(), 0x10);
        assert!(memory.is_valid());
        assert_eq!(dpmi.host().live_blocks(), 0);

        let _second = Memory::map_dos_linear(&dpmi, 16, 0xa_0000).unwrap();
        assert_eq!(dpmi.host().count(MAP_CONVENTIONAL_IN_BLOCK), 1);
    }

    #[test]
    fn test_map_dos_without_capability() {
        let host = SimHost::new();
        host.set_capabilities(CapabilityFlags::DEVICE_MAPPING);
        let dpmi = Dpmi::new(host);
        let memory = Memory::map_dos_linear(&dpmi, 16, 0xa_0000).unwrap();
        assert_eq!(memory.mapping_mode(), Some(MappingMode::Direct));
        assert!(dpmi.latches().device_map());
        assert_eq!(dpmi.host().count(ALLOCATE_LINEAR_MEMORY), 0);
    }

    #[test]
    fn test_mapped_dos_cannot_resize() {
        let dpmi = Dpmi::new(SimHost::new());
        let mut memory = Memory::map_dos_linear(&dpmi, 16, 0xa_0000).unwrap();
        let err = memory.resize(32, false).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::ResizeUnsupported {
                kind: "mapped DOS",
                ..
            }
        ));
    }

    #[test]
    fn test_allocate_dos() {
        let dpmi = Dpmi::new(SimHost::new());
        let memory = Memory::allocate_dos(&dpmi, 100).unwrap();
        assert_eq!(memory.size(), 112);
        assert!(memory.kind().is_dos());
        assert_eq!(memory.mapping_mode(), Some(MappingMode::Block));

        let far = memory.dos_ptr().unwrap();
        assert_eq!(far.offset, 0);
        let sel = memory.dos_selector().unwrap();
        assert_eq!(dpmi.host().dos_paragraphs(sel), Some(7));
        assert_eq!(dpmi.selector_base(sel).unwrap(), usize::from(far.segment) << 4);
        assert_eq!(
            memory.offset_in_block(),
            (usize::from(far.segment) << 4) % PAGE_SIZE
        );
    }

    #[test]
    fn test_dos_size_rounding() {
        let dpmi = Dpmi::new(SimHost::new());
        for (bytes, expected) in [(1, 16), (16, 16), (17, 32), (4096, 4096)] {
            let memory = Memory::allocate_dos(&dpmi, bytes).unwrap();
            assert_eq!(memory.size(), expected, "{bytes} bytes");
        }
    }

    #[test]
    fn test_allocate_dos_direct() {
        let host = SimHost::new();
        host.unsupported(ALLOCATE_LINEAR_MEMORY);
        let dpmi = Dpmi::new(host);
        let memory = Memory::allocate_dos(&dpmi, 40).unwrap();
        let far = memory.dos_ptr().unwrap();
        assert_eq!(memory.mapping_mode(), Some(MappingMode::Direct));
        assert_eq!(memory.address(), usize::from(far.segment) << 4);
        assert_eq!(memory.size(), 48);
        assert!(!dpmi.latches().dos_map());
    }

    #[test]
    fn test_allocate_dos_too_large() {
        let dpmi = Dpmi::new(SimHost::new());
        let err = Memory::allocate_dos(&dpmi, 0x10_0000).unwrap_err();
        assert!(matches!(err.root_cause(), MemoryError::TooLarge { .. }));
        assert_eq!(dpmi.host().count(ALLOCATE_DOS_MEMORY), 0);
    }

    #[test]
    fn test_allocate_dos_needs_normal_context() {
        let dpmi = Dpmi::new(SimHost::new());
        let _handler = crate::interrupt::enter_handler();
        let err = Memory::allocate_dos(&dpmi, 100).unwrap_err();
        assert!(matches!(err.root_cause(), MemoryError::InterruptContext { .. }));
        assert!(dpmi.host().calls().is_empty());
    }

    #[test]
    fn test_allocate_dos_host_failure() {
        let host = SimHost::new();
        host.respond(ALLOCATE_DOS_MEMORY, DpmiError::DOS_INSUFFICIENT_MEMORY);
        let dpmi = Dpmi::new(host);
        let err = Memory::allocate_dos(&dpmi, 100).unwrap_err();
        assert!(matches!(err, MemoryError::AllocationFailed { .. }));
        assert_eq!(err.host_error(), Some(DpmiError::DOS_INSUFFICIENT_MEMORY));
    }

    #[test]
    fn test_mapping_failure_frees_dos_block() {
        let host = SimHost::new();
        host.respond(MAP_CONVENTIONAL_IN_BLOCK, DpmiError::INVALID_LINEAR_ADDRESS);
        let dpmi = Dpmi::new(host);
        let err = Memory::allocate_dos(&dpmi, 100).unwrap_err();
        assert_eq!(err.host_error(), Some(DpmiError::INVALID_LINEAR_ADDRESS));
        assert_eq!(dpmi.host().live_dos_blocks(), 0);
        assert_eq!(dpmi.host().live_blocks(), 0);
    }

    #[test]
    fn test_resize_dos() {
        let dpmi = Dpmi::new(SimHost::new());
        let mut memory = Memory::allocate_dos(&dpmi, 100).unwrap();
        let far = memory.dos_ptr().unwrap();
        let sel = memory.dos_selector().unwrap();

        memory.resize(1000, false).unwrap();
        assert_eq!(memory.size(), 1008);
        assert_eq!(memory.dos_ptr(), Some(far));
        assert_eq!(dpmi.host().dos_paragraphs(sel), Some(63));
        assert!(memory.is_valid());
        // The old mapping is freed before the block is mapped again.
        assert_eq!(dpmi.host().count(FREE_MEMORY_BLOCK), 1);
        assert_eq!(dpmi.host().live_blocks(), 1);
    }

    #[test]
    fn test_resize_dos_failure_is_wrapped() {
        let host = SimHost::new();
        host.respond(RESIZE_DOS_MEMORY, DpmiError::DOS_INSUFFICIENT_MEMORY);
        let dpmi = Dpmi::new(host);
        let mut memory = Memory::allocate_dos(&dpmi, 100).unwrap();
        let err = memory.resize(0x8000, false).unwrap_err();
        assert!(matches!(err, MemoryError::AllocationFailed { .. }));
        assert_eq!(err.host_error(), Some(DpmiError::DOS_INSUFFICIENT_MEMORY));
        assert!(!memory.is_valid());

        drop(memory);
        assert_eq!(dpmi.host().live_dos_blocks(), 0);
        assert_eq!(dpmi.host().live_blocks(), 0);
    }

    #[test]
    fn test_release_dos() {
        let dpmi = Dpmi::new(SimHost::new());
        let mut memory = Memory::allocate_dos(&dpmi, 100).unwrap();
        memory.release();
        assert!(!memory.is_valid());
        assert_eq!(memory.dos_ptr(), None);
        assert_eq!(memory.dos_selector(), None);
        assert!(matches!(
            memory.resize(200, false).unwrap_err().root_cause(),
            MemoryError::Released { .. }
        ));
        memory.release();
        drop(memory);

        let calls = dpmi.host().calls();
        let free_block = calls.iter().position(|&f| f == FREE_MEMORY_BLOCK);
        let free_dos = calls.iter().position(|&f| f == FREE_DOS_MEMORY);
        assert!(free_block < free_dos);
        assert_eq!(dpmi.host().count(FREE_DOS_MEMORY), 1);
        assert_eq!(dpmi.host().live_dos_blocks(), 0);
    }
}
