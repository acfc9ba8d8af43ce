use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicBool, Ordering};

use dpmi::{Capabilities, Host, Int31, Selector};
use log::debug;
use snafu::{ResultExt as _, ensure};
use spin::Once;

use crate::{
    address,
    error::{BelowSelectorBaseSnafu, HostSnafu, MemoryError, SelectorLimitSnafu},
    linear::LinearRange,
    sync::IrqMutex,
};

/// Smallest selector limit that the host expects in page granularity.
const PAGE_GRANULAR_LIMIT: usize = 0x10_0000;

static SYSTEM: Dpmi<Int31> = Dpmi::new(Int31);

/// Returns the service bound to the real DPMI host.
#[must_use]
pub fn system() -> &'static Dpmi<Int31> {
    &SYSTEM
}

/// One-way capability latches.
///
/// Each latch starts set and is cleared the first time the host rejects the
/// corresponding function as unsupported. A cleared latch is never set again.
#[derive(Debug)]
pub struct Latches {
    new_alloc: AtomicBool,
    device_map: AtomicBool,
    dos_map: AtomicBool,
}

impl Latches {
    const fn new() -> Self {
        Self {
            new_alloc: AtomicBool::new(true),
            device_map: AtomicBool::new(true),
            dos_map: AtomicBool::new(true),
        }
    }

    /// Whether the DPMI 1.0 linear memory functions (`0x0504`/`0x0505`) may
    /// be used.
    #[must_use]
    pub fn new_alloc(&self) -> bool {
        self.new_alloc.load(Ordering::Relaxed)
    }

    /// Whether device memory may be mapped into memory blocks (`0x0508`).
    #[must_use]
    pub fn device_map(&self) -> bool {
        self.device_map.load(Ordering::Relaxed)
    }

    /// Whether conventional memory may be mapped into memory blocks
    /// (`0x0509`).
    #[must_use]
    pub fn dos_map(&self) -> bool {
        self.dos_map.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_new_alloc(&self) {
        if self.new_alloc.swap(false, Ordering::Relaxed) {
            debug!("DPMI 1.0 memory functions unsupported, using DPMI 0.9 functions");
        }
    }

    pub(crate) fn clear_device_map(&self) {
        if self.device_map.swap(false, Ordering::Relaxed) {
            debug!("device mapping unsupported, mapping physical addresses directly");
        }
    }

    pub(crate) fn clear_dos_map(&self) {
        if self.dos_map.swap(false, Ordering::Relaxed) {
            debug!("conventional memory mapping unsupported, addressing DOS memory directly");
        }
    }
}

/// The DPMI memory service.
///
/// Owns everything that is shared between memory objects and allocators:
/// the capability [`Latches`], the probed page size and host capabilities,
/// and the map of page-locked allocations.
#[derive(Debug)]
pub struct Dpmi<H = Int31> {
    host: H,
    latches: Latches,
    page_size: Once<usize>,
    capabilities: Once<Option<Capabilities>>,
    locks: IrqMutex<Option<BTreeMap<usize, LinearRange>>>,
}

impl<H> Dpmi<H> {
    #[must_use]
    pub const fn new(host: H) -> Self {
        Self {
            host,
            latches: Latches::new(),
            page_size: Once::new(),
            capabilities: Once::new(),
            locks: IrqMutex::new(None),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn latches(&self) -> &Latches {
        &self.latches
    }

    pub(crate) fn locks(&self) -> &IrqMutex<Option<BTreeMap<usize, LinearRange>>> {
        &self.locks
    }
}

impl<H> Dpmi<H>
where
    H: Host,
{
    /// Returns the host page size, probing the host on first use.
    pub fn page_size(&self) -> Result<usize, MemoryError> {
        self.page_size
            .try_call_once(|| {
                self.host
                    .page_size()
                    .context(HostSnafu { operation: "get page size" })
            })
            .copied()
    }

    pub fn round_up_to_page(&self, bytes: usize) -> Result<usize, MemoryError> {
        Ok(address::round_up_to_page(bytes, self.page_size()?))
    }

    pub fn round_down_to_page(&self, bytes: usize) -> Result<usize, MemoryError> {
        Ok(address::round_down_to_page(bytes, self.page_size()?))
    }

    /// Returns the DPMI 1.0 capabilities, probing the host on first use.
    ///
    /// Returns `None` for DPMI 0.9 hosts.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities
            .call_once(|| match self.host.capabilities() {
                Ok(capabilities) => {
                    debug!(
                        "DPMI host {}.{}, capabilities {:?}",
                        capabilities.host_version.0,
                        capabilities.host_version.1,
                        capabilities.flags
                    );
                    Some(capabilities)
                }
                Err(err) => {
                    debug!("DPMI capabilities unavailable: {err}");
                    None
                }
            })
            .as_ref()
    }

    /// Returns the selector in `DS`.
    pub fn data_selector(&self) -> Selector {
        self.host.data_selector()
    }

    pub fn selector_base(&self, sel: Selector) -> Result<usize, MemoryError> {
        self.host
            .selector_base(sel)
            .context(HostSnafu { operation: "get selector base" })
    }

    pub fn selector_limit(&self, sel: Selector) -> Result<usize, MemoryError> {
        self.host
            .selector_limit(sel)
            .context(HostSnafu { operation: "get selector limit" })
    }

    /// Sets the limit of `sel`.
    ///
    /// Limits of 1 MiB and above can only be expressed in pages, so they are
    /// rounded up to the last byte of a page.
    ///
    /// # Safety
    ///
    /// Shrinking a limit invalidates every pointer beyond it.
    pub unsafe fn set_selector_limit(&self, sel: Selector, limit: usize) -> Result<(), MemoryError> {
        let limit = if limit >= PAGE_GRANULAR_LIMIT {
            let page_size = self.page_size()?;
            limit
                .checked_next_multiple_of(page_size)
                .map_or(usize::MAX, |end| end - 1)
        } else {
            limit
        };
        unsafe { self.host.set_selector_limit(sel, limit) }
            .context(HostSnafu { operation: "set selector limit" })
    }

    /// Converts a linear address to an offset within `sel`.
    pub fn linear_to_near(&self, address: usize, sel: Selector) -> Result<usize, MemoryError> {
        Ok(address.wrapping_sub(self.selector_base(sel)?))
    }

    /// Converts an offset within `sel` to a linear address.
    pub fn near_to_linear(&self, near: usize, sel: Selector) -> Result<usize, MemoryError> {
        Ok(near.wrapping_add(self.selector_base(sel)?))
    }

    /// Makes `range` reachable through the data selector.
    ///
    /// Ranges at or below the selector base cannot be reached and are
    /// rejected. Otherwise the limit is doubled until it covers the range; it
    /// is never lowered.
    pub(crate) fn reach_from_data_selector(&self, range: LinearRange) -> Result<(), MemoryError> {
        let sel = self.data_selector();
        let base = self.selector_base(sel)?;
        ensure!(
            range.address() > base,
            BelowSelectorBaseSnafu {
                address: range.address(),
                base,
            }
        );

        let required = range.end() - base;
        let mut limit = self.selector_limit(sel)?;
        while limit < required {
            let doubled = if limit == 0 { 1 } else { limit.saturating_mul(2) };
            unsafe { self.set_selector_limit(sel, doubled) }?;
            let raised = self.selector_limit(sel)?;
            ensure!(raised > limit, SelectorLimitSnafu { limit, required });
            limit = raised;
        }
        Ok(())
    }
}
