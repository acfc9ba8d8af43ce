//! High-level interface for the DPMI page functions.

use dpmi_sys::{DpmiError, page};

/// Locks the pages of the linear region `address..address + size`.
pub fn lock(address: usize, size: usize) -> Result<(), DpmiError> {
    page::lock_linear_region(address, size).into_result()?;
    Ok(())
}

/// Unlocks the pages of the linear region `address..address + size`.
pub fn unlock(address: usize, size: usize) -> Result<(), DpmiError> {
    page::unlock_linear_region(address, size).into_result()?;
    Ok(())
}

/// Returns the page size of the host.
pub fn size() -> Result<usize, DpmiError> {
    let regs = page::get_page_size().into_result()?;
    Ok(dpmi_sys::join(regs.ebx, regs.ecx))
}
