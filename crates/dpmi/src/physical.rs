//! High-level interface for the DPMI physical address mapping functions.

use dpmi_sys::{DpmiError, physical};

/// Maps `size` bytes of physical memory at `address` and returns the linear
/// address of the mapping.
///
/// # Safety
///
/// `address` must designate device memory owned by the caller.
pub unsafe fn map(address: usize, size: usize) -> Result<usize, DpmiError> {
    let regs = unsafe { physical::map(address, size) }.into_result()?;
    Ok(dpmi_sys::join(regs.ebx, regs.ecx))
}

/// Releases the mapping at `linear`.
///
/// # Safety
///
/// The mapping must no longer be referenced.
pub unsafe fn unmap(linear: usize) -> Result<(), DpmiError> {
    let ret = unsafe { physical::unmap(linear) };
    ret.into_result()?;
    Ok(())
}
