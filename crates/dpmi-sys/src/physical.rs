//! DPMI physical address mapping functions.

use crate::{DpmiRet, Registers};

/// Function number of "Physical Address Mapping".
pub const PHYSICAL_ADDRESS_MAPPING: u16 = 0x0800;
/// Function number of "Free Physical Address Mapping".
pub const FREE_PHYSICAL_ADDRESS_MAPPING: u16 = 0x0801;

/// Maps `size` bytes of physical memory at `physical` into the linear address
/// space and returns the linear address in `BX:CX`.
///
/// # Safety
///
/// Device memory reached through the returned address has side effects. The
/// caller must ensure that `physical` designates memory it owns.
pub unsafe fn map(physical: usize, size: usize) -> DpmiRet {
    let (phys_hi, phys_lo) = crate::split(physical);
    let (size_hi, size_lo) = crate::split(size);
    let regs = Registers {
        ebx: phys_hi,
        ecx: phys_lo,
        esi: size_hi,
        edi: size_lo,
        ..Registers::function(PHYSICAL_ADDRESS_MAPPING)
    };
    unsafe { crate::int31(regs) }
}

/// Releases a mapping created by [`map`].
///
/// This is a DPMI 1.0 function; 0.9 hosts do not implement it.
///
/// # Safety
///
/// The caller must ensure that the mapping at `linear` is no longer
/// referenced.
pub unsafe fn unmap(linear: usize) -> DpmiRet {
    let (hi, lo) = crate::split(linear);
    let regs = Registers {
        ebx: hi,
        ecx: lo,
        ..Registers::function(FREE_PHYSICAL_ADDRESS_MAPPING)
    };
    unsafe { crate::int31(regs) }
}
