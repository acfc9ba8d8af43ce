//! DPMI LDT descriptor management functions.
//!
//! This module provides functions to map real-mode segments to selectors and
//! to read and write the base address and limit of a selector.

use crate::{DpmiRet, Registers};

/// Function number of "Segment to Descriptor".
pub const SEGMENT_TO_DESCRIPTOR: u16 = 0x0002;
/// Function number of "Get Segment Base Address".
pub const GET_SEGMENT_BASE: u16 = 0x0006;
/// Function number of "Set Segment Base Address".
pub const SET_SEGMENT_BASE: u16 = 0x0007;
/// Function number of "Set Segment Limit".
pub const SET_SEGMENT_LIMIT: u16 = 0x0008;

/// Maps a real-mode segment onto a descriptor and returns its selector in
/// `AX`.
///
/// The descriptor is shared and can never be freed.
pub fn segment_to_descriptor(segment: usize) -> DpmiRet {
    let regs = Registers {
        ebx: segment,
        ..Registers::function(SEGMENT_TO_DESCRIPTOR)
    };
    unsafe { crate::int31(regs) }
}

/// Returns the linear base address of a selector in `CX:DX`.
pub fn get_segment_base(selector: usize) -> DpmiRet {
    let regs = Registers {
        ebx: selector,
        ..Registers::function(GET_SEGMENT_BASE)
    };
    unsafe { crate::int31(regs) }
}

/// Sets the linear base address of a selector.
///
/// # Safety
///
/// Every pointer derived from `selector` changes its meaning. The caller must
/// ensure no live reference depends on the old base.
pub unsafe fn set_segment_base(selector: usize, base: usize) -> DpmiRet {
    let (hi, lo) = crate::split(base);
    let regs = Registers {
        ebx: selector,
        ecx: hi,
        edx: lo,
        ..Registers::function(SET_SEGMENT_BASE)
    };
    unsafe { crate::int31(regs) }
}

/// Sets the limit of a selector.
///
/// Limits of one megabyte or more must be page granular, that is, the low 12
/// bits must all be set.
///
/// # Safety
///
/// Shrinking a limit invalidates every pointer beyond it. The caller must
/// ensure no live reference depends on the removed range.
pub unsafe fn set_segment_limit(selector: usize, limit: usize) -> DpmiRet {
    let (hi, lo) = crate::split(limit);
    let regs = Registers {
        ebx: selector,
        ecx: hi,
        edx: lo,
        ..Registers::function(SET_SEGMENT_LIMIT)
    };
    unsafe { crate::int31(regs) }
}

/// Returns the selector currently loaded in `DS`.
#[inline]
#[must_use]
pub fn data_selector() -> u16 {
    match () {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        () => {
            let ds: u16;
            unsafe {
                core::arch::asm!(
                    "mov {ds:x}, ds",
                    ds = out(reg) ds,
                    options(nomem, nostack, preserves_flags)
                );
            }
            ds
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        () => unimplemented!(),
    }
}

/// Reads the limit of a selector with the `lsl` instruction.
///
/// Returns `None` if the selector is not valid for the current privilege
/// level.
#[inline]
#[must_use]
#[cfg_attr(
    not(all(target_arch = "x86", target_os = "none")),
    expect(unused_variables)
)]
pub fn load_segment_limit(selector: u16) -> Option<usize> {
    match () {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        () => {
            let limit: usize;
            let valid: u8;
            unsafe {
                core::arch::asm!(
                    "lsl {limit:e}, {selector:e}",
                    "setz {valid}",
                    limit = out(reg) limit,
                    selector = in(reg) u32::from(selector),
                    valid = out(reg_byte) valid,
                    options(nomem, nostack)
                );
            }
            (valid != 0).then_some(limit)
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        () => unimplemented!(),
    }
}
