//! DPMI 1.0 capability query.

use crate::{DpmiRet, Registers};

/// Function number of "Get DPMI Capabilities".
pub const GET_CAPABILITIES: u16 = 0x0401;

/// Size of the vendor information buffer filled by [`get`].
pub const BUFFER_SIZE: usize = 128;

/// Paged accessed/dirty supported.
pub const PAGED_ACCESSED_DIRTY: usize = 1 << 0;
/// Exceptions restartability supported.
pub const EXCEPTIONS_RESTARTABLE: usize = 1 << 1;
/// Device mapping supported.
pub const DEVICE_MAPPING: usize = 1 << 2;
/// Conventional memory mapping supported.
pub const CONVENTIONAL_MEMORY_MAPPING: usize = 1 << 3;
/// Demand zero-fill supported.
pub const DEMAND_ZERO_FILL: usize = 1 << 4;
/// Write-protect client supported.
pub const WRITE_PROTECT_CLIENT: usize = 1 << 5;
/// Write-protect host supported.
pub const WRITE_PROTECT_HOST: usize = 1 << 6;

/// Returns the capability flags in `AX` and fills `buffer` with the host
/// version (bytes 0 and 1) and an ASCIIZ vendor name.
///
/// # Safety
///
/// `buffer` is passed as `ES:EDI` and must be reachable through `DS` (which
/// equals `ES` in the flat model). The caller must ensure it is valid for
/// writes of [`BUFFER_SIZE`] bytes.
pub unsafe fn get(buffer: *mut [u8; BUFFER_SIZE]) -> DpmiRet {
    let regs = Registers {
        edi: buffer.addr(),
        ..Registers::function(GET_CAPABILITIES)
    };
    unsafe { crate::int31(regs) }
}
