//! High-level interface for the DPMI extended memory functions.

use dpmi_sys::{DpmiError, memory};
use platform_cast::CastFrom as _;

use crate::{MemoryBlock, MemoryHandle};

#[expect(clippy::cast_possible_truncation)]
fn to_handle(value: usize) -> MemoryHandle {
    MemoryHandle(value as u32)
}

fn flags(committed: bool) -> usize {
    if committed { memory::FLAG_COMMITTED } else { 0 }
}

/// Allocates `size` bytes of committed memory at an address chosen by the
/// host (DPMI 0.9).
pub fn allocate_block(size: usize) -> Result<MemoryBlock, DpmiError> {
    let regs = memory::allocate_memory_block(size).into_result()?;
    Ok(MemoryBlock {
        address: dpmi_sys::join(regs.ebx, regs.ecx),
        handle: to_handle(dpmi_sys::join(regs.esi, regs.edi)),
    })
}

/// Frees the block identified by `handle`.
///
/// # Safety
///
/// The block must no longer be referenced.
pub unsafe fn free_block(handle: MemoryHandle) -> Result<(), DpmiError> {
    let ret = unsafe { memory::free_memory_block(usize::cast_from(handle.0)) };
    ret.into_result()?;
    Ok(())
}

/// Resizes the block identified by `handle` (DPMI 0.9).
///
/// # Safety
///
/// The block may move; no reference into it may survive the call.
pub unsafe fn resize_block(handle: MemoryHandle, size: usize) -> Result<MemoryBlock, DpmiError> {
    let regs =
        unsafe { memory::resize_memory_block(usize::cast_from(handle.0), size) }.into_result()?;
    Ok(MemoryBlock {
        address: dpmi_sys::join(regs.ebx, regs.ecx),
        handle: to_handle(dpmi_sys::join(regs.esi, regs.edi)),
    })
}

/// Allocates `size` bytes of linear memory, preferably at `desired_address`
/// (DPMI 1.0).
pub fn allocate_linear(
    desired_address: usize,
    size: usize,
    committed: bool,
) -> Result<MemoryBlock, DpmiError> {
    let regs =
        memory::allocate_linear_memory(desired_address, size, flags(committed)).into_result()?;
    Ok(MemoryBlock {
        address: regs.ebx,
        handle: to_handle(regs.esi),
    })
}

/// Resizes the linear block identified by `handle` (DPMI 1.0).
///
/// # Safety
///
/// The block may move; no reference into it may survive the call.
pub unsafe fn resize_linear(
    handle: MemoryHandle,
    size: usize,
    committed: bool,
) -> Result<MemoryBlock, DpmiError> {
    let handle = usize::cast_from(handle.0);
    let regs =
        unsafe { memory::resize_linear_memory(handle, size, flags(committed)) }.into_result()?;
    Ok(MemoryBlock {
        address: regs.ebx,
        handle: to_handle(regs.esi),
    })
}

/// Maps device pages into a block (DPMI 1.0).
///
/// # Safety
///
/// `physical` must designate device memory owned by the caller.
pub unsafe fn map_device(
    handle: MemoryHandle,
    offset: usize,
    pages: usize,
    physical: usize,
) -> Result<(), DpmiError> {
    let handle = usize::cast_from(handle.0);
    let ret = unsafe { memory::map_device_in_block(handle, offset, pages, physical) };
    ret.into_result()?;
    Ok(())
}

/// Maps conventional memory pages into a block (DPMI 1.0).
///
/// # Safety
///
/// The aliased conventional range must be owned by the caller.
pub unsafe fn map_conventional(
    handle: MemoryHandle,
    offset: usize,
    pages: usize,
    linear: usize,
) -> Result<(), DpmiError> {
    let handle = usize::cast_from(handle.0);
    let ret = unsafe { memory::map_conventional_in_block(handle, offset, pages, linear) };
    ret.into_result()?;
    Ok(())
}
