//! DPMI DOS memory management functions.
//!
//! Conventional memory is allocated in 16-byte paragraphs. Each block is
//! described by its real-mode segment and by a protected-mode selector that
//! the host allocates together with the block.

use crate::{DpmiRet, Registers};

/// Function number of "Allocate DOS Memory Block".
pub const ALLOCATE_DOS_MEMORY: u16 = 0x0100;
/// Function number of "Free DOS Memory Block".
pub const FREE_DOS_MEMORY: u16 = 0x0101;
/// Function number of "Resize DOS Memory Block".
pub const RESIZE_DOS_MEMORY: u16 = 0x0102;

/// Allocates `paragraphs` paragraphs of conventional memory.
///
/// On success `AX` holds the real-mode segment and `DX` the selector of the
/// block. On failure `AX` holds a DOS error code and `BX` the size of the
/// largest available block in paragraphs.
pub fn allocate(paragraphs: usize) -> DpmiRet {
    let regs = Registers {
        ebx: paragraphs,
        ..Registers::function(ALLOCATE_DOS_MEMORY)
    };
    unsafe { crate::int31(regs) }
}

/// Frees a conventional memory block.
///
/// # Safety
///
/// The caller must ensure that the block designated by `selector` is no
/// longer referenced.
pub unsafe fn free(selector: usize) -> DpmiRet {
    let regs = Registers {
        edx: selector,
        ..Registers::function(FREE_DOS_MEMORY)
    };
    unsafe { crate::int31(regs) }
}

/// Resizes a conventional memory block in place.
///
/// # Safety
///
/// When shrinking, the caller must ensure that the released tail of the block
/// is no longer referenced.
pub unsafe fn resize(selector: usize, paragraphs: usize) -> DpmiRet {
    let regs = Registers {
        ebx: paragraphs,
        edx: selector,
        ..Registers::function(RESIZE_DOS_MEMORY)
    };
    unsafe { crate::int31(regs) }
}
