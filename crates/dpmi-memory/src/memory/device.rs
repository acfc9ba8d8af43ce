use dpmi::{Capabilities, Host};
use dpmi_sys::memory::MAP_DEVICE_IN_BLOCK;
use log::debug;
use snafu::ResultExt as _;

use super::{MappingMode, Memory, MemoryKind, ensure_normal_context, page_span};
use crate::{
    address,
    error::{AllocationFailedSnafu, HostSnafu, MemoryError},
    service::Dpmi,
};

impl<'d, H> Memory<'d, H>
where
    H: Host,
{
    /// Maps `bytes` bytes of physical memory at `physical`.
    ///
    /// DPMI 1.0 hosts that support device mapping map the pages into a block
    /// of their own, which the object addresses through `DS`. Elsewhere the
    /// physical range is mapped directly ([`MappingMode::Direct`]); such
    /// objects need a selector of their own to be accessed safely.
    ///
    /// The reported size is `bytes` rounded up to the page size.
    pub fn map_device(
        dpmi: &'d Dpmi<H>,
        bytes: usize,
        physical: usize,
    ) -> Result<Self, MemoryError> {
        let mut memory = Self::empty(
            dpmi,
            MemoryKind::Device {
                physical,
                mode: MappingMode::Block,
                offset: 0,
            },
        );
        memory
            .map_physical(bytes, physical)
            .context(AllocationFailedSnafu)?;
        Ok(memory)
    }

    fn device_mapping_supported(&self) -> bool {
        self.dpmi.latches().new_alloc()
            && self
                .dpmi
                .capabilities()
                .is_some_and(Capabilities::device_mapping)
    }

    fn map_physical(&mut self, bytes: usize, physical: usize) -> Result<(), MemoryError> {
        let page_size = self.dpmi.page_size()?;
        let usable = page_span(bytes, page_size)?;
        let latches = self.dpmi.latches();

        if latches.device_map() {
            if self.device_mapping_supported()
                && self.allocate_window(usable)?
                && self.map_into_block(
                    usable,
                    physical,
                    MAP_DEVICE_IN_BLOCK,
                    "map device in block",
                    |host, handle, offset, pages, first_page| unsafe {
                        host.map_device_in_block(handle, offset, pages, first_page)
                    },
                )?
            {
                return Ok(());
            }
            latches.clear_device_map();
        }

        self.map_physical_direct(usable, physical)
    }

    fn map_physical_direct(&mut self, usable: usize, physical: usize) -> Result<(), MemoryError> {
        ensure_normal_context()?;

        let page_size = self.dpmi.page_size()?;
        let offset = physical - address::round_down_to_page(physical, page_size);
        self.kind.set_mapping(MappingMode::Direct, offset);

        let linear = unsafe { self.dpmi.host().map_physical_address(physical, usable) }
            .context(HostSnafu {
                operation: "map physical address",
            })?;
        self.address = linear;
        self.size = usable;
        self.live = true;
        debug!("physical {physical:#x} mapped directly at {linear:#x}");

        if let Err(err) = self.dpmi.reach_from_data_selector(self.linear_range()) {
            self.unmap_physical();
            return Err(err);
        }
        Ok(())
    }

    /// Frees a direct physical mapping. Failures are ignored: not every host
    /// implements the unmap function.
    pub(super) fn unmap_physical(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        if let Err(err) = unsafe { self.dpmi.host().unmap_physical_address(self.address) } {
            debug!(
                "ignoring failure to unmap physical mapping at {:#x}: {err}",
                self.address
            );
        }
    }
}
