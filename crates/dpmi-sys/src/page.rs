//! DPMI page management functions.
//!
//! Locking pins the pages backing a linear region so that touching it can
//! never fault, which is required for anything reached from an interrupt
//! handler.

use crate::{DpmiRet, Registers};

/// Function number of "Lock Linear Region".
pub const LOCK_LINEAR_REGION: u16 = 0x0600;
/// Function number of "Unlock Linear Region".
pub const UNLOCK_LINEAR_REGION: u16 = 0x0601;
/// Function number of "Get Page Size".
pub const GET_PAGE_SIZE: u16 = 0x0604;

fn region(function: u16, address: usize, size: usize) -> Registers {
    let (addr_hi, addr_lo) = crate::split(address);
    let (size_hi, size_lo) = crate::split(size);
    Registers {
        ebx: addr_hi,
        ecx: addr_lo,
        esi: size_hi,
        edi: size_lo,
        ..Registers::function(function)
    }
}

/// Locks the pages of the linear region `address..address + size`.
pub fn lock_linear_region(address: usize, size: usize) -> DpmiRet {
    unsafe { crate::int31(region(LOCK_LINEAR_REGION, address, size)) }
}

/// Unlocks the pages of the linear region `address..address + size`.
pub fn unlock_linear_region(address: usize, size: usize) -> DpmiRet {
    unsafe { crate::int31(region(UNLOCK_LINEAR_REGION, address, size)) }
}

/// Returns the page size of the host in `BX:CX`.
pub fn get_page_size() -> DpmiRet {
    unsafe { crate::int31(Registers::function(GET_PAGE_SIZE)) }
}
