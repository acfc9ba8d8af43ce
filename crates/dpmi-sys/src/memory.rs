//! DPMI extended memory management functions.
//!
//! Two generations coexist: the DPMI 0.9 functions (`0x0501..=0x0503`) pass
//! sizes and handles in register pairs and let the host choose every address,
//! while the DPMI 1.0 functions (`0x0504..=0x0509`) use 32-bit registers,
//! accept a desired address and can reserve memory without committing it.

use crate::{DpmiRet, Registers};

/// Function number of "Allocate Memory Block".
pub const ALLOCATE_MEMORY_BLOCK: u16 = 0x0501;
/// Function number of "Free Memory Block".
pub const FREE_MEMORY_BLOCK: u16 = 0x0502;
/// Function number of "Resize Memory Block".
pub const RESIZE_MEMORY_BLOCK: u16 = 0x0503;
/// Function number of "Allocate Linear Memory Block".
pub const ALLOCATE_LINEAR_MEMORY: u16 = 0x0504;
/// Function number of "Resize Linear Memory Block".
pub const RESIZE_LINEAR_MEMORY: u16 = 0x0505;
/// Function number of "Map Device in Memory Block".
pub const MAP_DEVICE_IN_BLOCK: u16 = 0x0508;
/// Function number of "Map Conventional Memory in Memory Block".
pub const MAP_CONVENTIONAL_IN_BLOCK: u16 = 0x0509;

/// Commit pages on allocation instead of only reserving them.
pub const FLAG_COMMITTED: usize = 1 << 0;

/// Allocates `size` bytes of committed memory.
///
/// Returns the linear address in `BX:CX` and the handle in `SI:DI`.
pub fn allocate_memory_block(size: usize) -> DpmiRet {
    let (hi, lo) = crate::split(size);
    let regs = Registers {
        ebx: hi,
        ecx: lo,
        ..Registers::function(ALLOCATE_MEMORY_BLOCK)
    };
    unsafe { crate::int31(regs) }
}

/// Frees a memory block allocated by any of the allocation functions.
///
/// # Safety
///
/// The caller must ensure that the block is no longer referenced.
pub unsafe fn free_memory_block(handle: usize) -> DpmiRet {
    let (hi, lo) = crate::split(handle);
    let regs = Registers {
        esi: hi,
        edi: lo,
        ..Registers::function(FREE_MEMORY_BLOCK)
    };
    unsafe { crate::int31(regs) }
}

/// Resizes a memory block.
///
/// Returns the new linear address in `BX:CX` and the new handle in `SI:DI`;
/// both may differ from the old ones.
///
/// # Safety
///
/// The block may move. The caller must ensure that no reference into the old
/// block survives the call.
pub unsafe fn resize_memory_block(handle: usize, size: usize) -> DpmiRet {
    let (size_hi, size_lo) = crate::split(size);
    let (handle_hi, handle_lo) = crate::split(handle);
    let regs = Registers {
        ebx: size_hi,
        ecx: size_lo,
        esi: handle_hi,
        edi: handle_lo,
        ..Registers::function(RESIZE_MEMORY_BLOCK)
    };
    unsafe { crate::int31(regs) }
}

/// Allocates `size` bytes of linear memory, preferably at `desired_address`
/// (zero lets the host choose).
///
/// Returns the linear address in `EBX` and the handle in `ESI`.
pub fn allocate_linear_memory(desired_address: usize, size: usize, flags: usize) -> DpmiRet {
    let regs = Registers {
        ebx: desired_address,
        ecx: size,
        edx: flags,
        ..Registers::function(ALLOCATE_LINEAR_MEMORY)
    };
    unsafe { crate::int31(regs) }
}

/// Resizes a linear memory block.
///
/// Returns the new linear address in `EBX` and the new handle in `ESI`.
///
/// # Safety
///
/// The block may move. The caller must ensure that no reference into the old
/// block survives the call.
pub unsafe fn resize_linear_memory(handle: usize, size: usize, flags: usize) -> DpmiRet {
    let regs = Registers {
        ecx: size,
        edx: flags,
        esi: handle,
        ..Registers::function(RESIZE_LINEAR_MEMORY)
    };
    unsafe { crate::int31(regs) }
}

/// Maps `pages` pages of device memory starting at `physical` into the block
/// `handle`, beginning `offset` bytes into the block.
///
/// # Safety
///
/// Device memory reached through the block has side effects. The caller must
/// ensure that `physical` designates memory it owns.
pub unsafe fn map_device_in_block(
    handle: usize,
    offset: usize,
    pages: usize,
    physical: usize,
) -> DpmiRet {
    let regs = Registers {
        ebx: offset,
        ecx: pages,
        edx: physical,
        esi: handle,
        ..Registers::function(MAP_DEVICE_IN_BLOCK)
    };
    unsafe { crate::int31(regs) }
}

/// Maps `pages` pages of conventional memory starting at the linear address
/// `linear` into the block `handle`, beginning `offset` bytes into the block.
///
/// # Safety
///
/// The block aliases conventional memory afterwards. The caller must ensure
/// that the aliased range is owned by it.
pub unsafe fn map_conventional_in_block(
    handle: usize,
    offset: usize,
    pages: usize,
    linear: usize,
) -> DpmiRet {
    let regs = Registers {
        ebx: offset,
        ecx: pages,
        edx: linear,
        esi: handle,
        ..Registers::function(MAP_CONVENTIONAL_IN_BLOCK)
    };
    unsafe { crate::int31(regs) }
}
