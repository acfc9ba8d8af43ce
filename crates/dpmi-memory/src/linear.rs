use core::ptr;

use dpmi::{Host, Int31, Selector};
use log::warn;
use snafu::ResultExt as _;
use snafu_utils::Report;

use crate::{
    error::{HostSnafu, MemoryError},
    service::Dpmi,
};

/// A span of linear address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinearRange {
    address: usize,
    size: usize,
}

impl LinearRange {
    #[must_use]
    pub const fn new(address: usize, size: usize) -> Self {
        Self { address, size }
    }

    /// Returns the range covering `len` bytes at offset `near` of `sel`.
    pub fn from_near<H>(
        dpmi: &Dpmi<H>,
        sel: Selector,
        near: usize,
        len: usize,
    ) -> Result<Self, MemoryError>
    where
        H: Host,
    {
        Ok(Self::new(dpmi.near_to_linear(near, sel)?, len))
    }

    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the first address past the range.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.address.saturating_add(self.size)
    }

    #[must_use]
    pub const fn contains(&self, address: usize) -> bool {
        self.address <= address && address < self.end()
    }

    /// Returns a pointer to the start of the range through `sel`.
    pub fn near_ptr<T, H>(&self, dpmi: &Dpmi<H>, sel: Selector) -> Result<*mut T, MemoryError>
    where
        H: Host,
    {
        let near = dpmi.linear_to_near(self.address, sel)?;
        Ok(ptr::with_exposed_provenance_mut(near))
    }

    /// Locks the pages covering the range.
    pub fn lock<H>(&self, dpmi: &Dpmi<H>) -> Result<(), MemoryError>
    where
        H: Host,
    {
        dpmi.host()
            .lock_linear_region(self.address, self.size)
            .context(HostSnafu { operation: "lock linear region" })
    }

    /// Unlocks the pages covering the range.
    pub fn unlock<H>(&self, dpmi: &Dpmi<H>) -> Result<(), MemoryError>
    where
        H: Host,
    {
        dpmi.host()
            .unlock_linear_region(self.address, self.size)
            .context(HostSnafu { operation: "unlock linear region" })
    }
}

/// Pages of a [`LinearRange`] locked for the lifetime of this token.
#[derive(Debug)]
#[must_use]
pub struct PageLock<'d, H = Int31>
where
    H: Host,
{
    dpmi: &'d Dpmi<H>,
    range: LinearRange,
}

impl<'d, H> PageLock<'d, H>
where
    H: Host,
{
    pub fn new(dpmi: &'d Dpmi<H>, range: LinearRange) -> Result<Self, MemoryError> {
        range.lock(dpmi)?;
        Ok(Self { dpmi, range })
    }

    #[must_use]
    pub fn range(&self) -> LinearRange {
        self.range
    }
}

impl<H> Drop for PageLock<'_, H>
where
    H: Host,
{
    fn drop(&mut self) {
        if let Err(err) = self.range.unlock(self.dpmi) {
            warn!(
                "failed to unlock {:#x}..{:#x}: {}",
                self.range.address(),
                self.range.end(),
                Report::new(err)
            );
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use dpmi::DpmiError;
    use dpmi_sys::page::{LOCK_LINEAR_REGION, UNLOCK_LINEAR_REGION};

    use super::*;
    use crate::testing::SimHost;

    #[test]
    fn test_range_bounds() {
        let range = LinearRange::new(0x1000, 0x20);
        assert_eq!(range.address(), 0x1000);
        assert_eq!(range.size(), 0x20);
        assert_eq!(range.end(), 0x1020);
        assert!(range.contains(0x1000));
        assert!(range.contains(0x101f));
        assert!(!range.contains(0x1020));
        assert!(!range.contains(0xfff));
        assert!(!LinearRange::new(0x1000, 0).contains(0x1000));
    }

    #[test]
    fn test_from_near() {
        let host = SimHost::new();
        host.set_ds_base(0x10_0000);
        let dpmi = Dpmi::new(host);
        let ds = dpmi.data_selector();
        let range = LinearRange::from_near(&dpmi, ds, 0x40, 8).unwrap();
        assert_eq!(range, LinearRange::new(0x10_0040, 8));
        let ptr = range.near_ptr::<u8, _>(&dpmi, ds).unwrap();
        assert_eq!(ptr.addr(), 0x40);
    }

    #[test]
    fn test_page_lock_unlocks_on_drop() {
        let dpmi = Dpmi::new(SimHost::new());
        let range = LinearRange::new(0x2000, 0x100);
        {
            let lock = PageLock::new(&dpmi, range).unwrap();
            assert_eq!(lock.range(), range);
            assert_eq!(dpmi.host().locked_regions(), [range]);
        }
        assert!(dpmi.host().locked_regions().is_empty());
        assert_eq!(dpmi.host().count(LOCK_LINEAR_REGION), 1);
        assert_eq!(dpmi.host().count(UNLOCK_LINEAR_REGION), 1);
    }

    #[test]
    fn test_page_lock_failure() {
        let host = SimHost::new();
        host.respond(LOCK_LINEAR_REGION, DpmiError::PHYSICAL_MEMORY_UNAVAILABLE);
        let dpmi = Dpmi::new(host);
        let err = PageLock::new(&dpmi, LinearRange::new(0x2000, 0x100)).unwrap_err();
        assert_eq!(err.host_error(), Some(DpmiError::PHYSICAL_MEMORY_UNAVAILABLE));
        assert_eq!(dpmi.host().count(UNLOCK_LINEAR_REGION), 0);
    }

    #[test]
    fn test_unlock_failure_is_swallowed() {
        let host = SimHost::new();
        host.respond(UNLOCK_LINEAR_REGION, DpmiError::INVALID_LINEAR_ADDRESS);
        let dpmi = Dpmi::new(host);
        drop(PageLock::new(&dpmi, LinearRange::new(0x2000, 0x100)).unwrap());
        assert_eq!(dpmi.host().count(UNLOCK_LINEAR_REGION), 1);
    }
}
