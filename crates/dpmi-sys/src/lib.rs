//! This crate provides low-level Rust bindings for the DOS Protected Mode
//! Interface (DPMI) host services reached through `int 0x31`.
//!
//! It is intended to be used as a low-level building block for implementing
//! safe and high-level DPMI APIs in Rust. The library exposes the raw register
//! interface of each host function and the host error codes, allowing
//! higher-level abstractions to be built on top.
//!
//! Values wider than 16 bits are passed either in one 32-bit register or split
//! across a register pair (`hi:lo`) depending on the function, exactly as the
//! DPMI 0.9 and 1.0 specifications define them.

#![no_std]

use core::{error::Error, fmt};

pub mod capabilities;
pub mod dos;
pub mod memory;
pub mod page;
pub mod physical;
pub mod selector;

/// Represents a DPMI host error code.
///
/// Codes `0x8000..` are defined by DPMI 1.0. The DOS memory functions
/// (`0x0100..=0x0102`) report plain DOS error codes instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DpmiError(pub u16);

impl DpmiError {
    /// Memory control blocks destroyed (DOS).
    pub const DOS_MCB_DESTROYED: Self = Self(0x0007);

    /// Insufficient memory (DOS).
    pub const DOS_INSUFFICIENT_MEMORY: Self = Self(0x0008);

    /// Invalid memory block address (DOS).
    pub const DOS_INVALID_BLOCK: Self = Self(0x0009);

    /// Unspecified error.
    pub const UNSPECIFIED: Self = Self(0x8000);

    /// Unsupported function.
    pub const UNSUPPORTED_FUNCTION: Self = Self(0x8001);

    /// Object in wrong state for function.
    pub const INVALID_STATE: Self = Self(0x8002);

    /// System integrity would be endangered.
    pub const SYSTEM_INTEGRITY: Self = Self(0x8003);

    /// Deadlock detected.
    pub const DEADLOCK: Self = Self(0x8004);

    /// Serialization request cancelled.
    pub const REQUEST_CANCELLED: Self = Self(0x8005);

    /// Resource unavailable.
    pub const RESOURCE_UNAVAILABLE: Self = Self(0x8010);

    /// Descriptor unavailable.
    pub const DESCRIPTOR_UNAVAILABLE: Self = Self(0x8011);

    /// Linear memory unavailable.
    pub const LINEAR_MEMORY_UNAVAILABLE: Self = Self(0x8012);

    /// Physical memory unavailable.
    pub const PHYSICAL_MEMORY_UNAVAILABLE: Self = Self(0x8013);

    /// Backing store unavailable.
    pub const BACKING_STORE_UNAVAILABLE: Self = Self(0x8014);

    /// Callback unavailable.
    pub const CALLBACK_UNAVAILABLE: Self = Self(0x8015);

    /// Handle unavailable.
    pub const HANDLE_UNAVAILABLE: Self = Self(0x8016);

    /// Lock count exceeded.
    pub const LOCK_COUNT_EXCEEDED: Self = Self(0x8017);

    /// Resource owned exclusively by another client.
    pub const RESOURCE_OWNED_EXCLUSIVELY: Self = Self(0x8018);

    /// Resource owned shared by another client.
    pub const RESOURCE_OWNED_SHARED: Self = Self(0x8019);

    /// Invalid value.
    pub const INVALID_VALUE: Self = Self(0x8021);

    /// Invalid selector.
    pub const INVALID_SELECTOR: Self = Self(0x8022);

    /// Invalid handle.
    pub const INVALID_HANDLE: Self = Self(0x8023);

    /// Invalid callback.
    pub const INVALID_CALLBACK: Self = Self(0x8024);

    /// Invalid linear address.
    pub const INVALID_LINEAR_ADDRESS: Self = Self(0x8025);

    /// Request not supported by hardware.
    pub const INVALID_REQUEST: Self = Self(0x8026);

    /// Returns the raw error code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Returns `true` if this error means the host does not implement
    /// `function` at all.
    ///
    /// DPMI 0.9 hosts do not know the 1.0 functions and commonly return with
    /// carry set and `AX` untouched, so the function number itself is
    /// treated as an "unsupported function" response too.
    #[must_use]
    pub const fn is_unsupported_for(self, function: u16) -> bool {
        self.0 == Self::UNSUPPORTED_FUNCTION.0 || self.0 == function
    }
}

impl fmt::Display for DpmiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DOS_MCB_DESTROYED => write!(f, "memory control blocks destroyed"),
            Self::DOS_INSUFFICIENT_MEMORY => write!(f, "insufficient memory"),
            Self::DOS_INVALID_BLOCK => write!(f, "invalid memory block address"),
            Self::UNSPECIFIED => write!(f, "unspecified error"),
            Self::UNSUPPORTED_FUNCTION => write!(f, "unsupported function"),
            Self::INVALID_STATE => write!(f, "object in wrong state for function"),
            Self::SYSTEM_INTEGRITY => write!(f, "system integrity would be endangered"),
            Self::DEADLOCK => write!(f, "deadlock detected"),
            Self::REQUEST_CANCELLED => write!(f, "serialization request cancelled"),
            Self::RESOURCE_UNAVAILABLE => write!(f, "resource unavailable"),
            Self::DESCRIPTOR_UNAVAILABLE => write!(f, "descriptor unavailable"),
            Self::LINEAR_MEMORY_UNAVAILABLE => write!(f, "linear memory unavailable"),
            Self::PHYSICAL_MEMORY_UNAVAILABLE => write!(f, "physical memory unavailable"),
            Self::BACKING_STORE_UNAVAILABLE => write!(f, "backing store unavailable"),
            Self::CALLBACK_UNAVAILABLE => write!(f, "callback unavailable"),
            Self::HANDLE_UNAVAILABLE => write!(f, "handle unavailable"),
            Self::LOCK_COUNT_EXCEEDED => write!(f, "lock count exceeded"),
            Self::RESOURCE_OWNED_EXCLUSIVELY => write!(f, "resource owned exclusively"),
            Self::RESOURCE_OWNED_SHARED => write!(f, "resource owned shared"),
            Self::INVALID_VALUE => write!(f, "invalid value"),
            Self::INVALID_SELECTOR => write!(f, "invalid selector"),
            Self::INVALID_HANDLE => write!(f, "invalid handle"),
            Self::INVALID_CALLBACK => write!(f, "invalid callback"),
            Self::INVALID_LINEAR_ADDRESS => write!(f, "invalid linear address"),
            Self::INVALID_REQUEST => write!(f, "request not supported by hardware"),
            Self(code) => write!(f, "unknown error ({code:#06x})"),
        }
    }
}

impl Error for DpmiError {}

/// General purpose registers passed to and returned from `int 0x31`.
///
/// Segment registers are not part of the interface: every function used here
/// either ignores them or expects `ES` to equal `DS`, which holds in the flat
/// protected-mode model.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub eax: usize,
    pub ebx: usize,
    pub ecx: usize,
    pub edx: usize,
    pub esi: usize,
    pub edi: usize,
}

impl Registers {
    /// Creates a register set with `AX` holding the function number.
    #[must_use]
    pub const fn function(function: u16) -> Self {
        Self {
            eax: function as usize,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
        }
    }
}

/// The return value of a DPMI call.
///
/// Contains the carry flag, which the host sets on failure, and all general
/// purpose registers as left by the host.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct DpmiRet {
    /// Carry flag (`true` on failure).
    pub carry: bool,
    /// Registers after the call.
    pub regs: Registers,
}

impl From<DpmiRet> for Result<Registers, DpmiError> {
    fn from(ret: DpmiRet) -> Self {
        if ret.carry {
            Err(DpmiError(low_word(ret.regs.eax)))
        } else {
            Ok(ret.regs)
        }
    }
}

impl DpmiRet {
    /// Converts this `DpmiRet` into a `Result`.
    ///
    /// Returns `Ok(regs)` if the carry flag is clear, otherwise returns the
    /// error code found in `AX`.
    pub fn into_result(self) -> Result<Registers, DpmiError> {
        Result::from(self)
    }
}

/// Splits a 32-bit value into the `(hi, lo)` 16-bit register pair.
#[must_use]
pub const fn split(value: usize) -> (usize, usize) {
    ((value >> 16) & 0xffff, value & 0xffff)
}

/// Joins a `hi:lo` 16-bit register pair back into one value.
#[must_use]
pub const fn join(hi: usize, lo: usize) -> usize {
    ((hi & 0xffff) << 16) | (lo & 0xffff)
}

/// Returns the low 16 bits of a register.
#[must_use]
#[expect(clippy::cast_possible_truncation)]
pub const fn low_word(value: usize) -> u16 {
    (value & 0xffff) as u16
}

/// Register frame handed to the call gate trampoline.
#[repr(C)]
#[cfg_attr(
    not(all(target_arch = "x86", target_os = "none")),
    expect(dead_code)
)]
struct Frame {
    regs: Registers,
    carry: usize,
}

/// Performs a raw `int 0x31` call.
///
/// # Safety
///
/// This function is unsafe because the host may change descriptors, free or
/// remap memory, or read and write memory designated by the register values.
/// The caller must ensure that every address passed in `regs` is valid for the
/// requested function.
#[inline]
#[cfg_attr(
    not(all(target_arch = "x86", target_os = "none")),
    expect(unused_variables)
)]
pub unsafe fn int31(regs: Registers) -> DpmiRet {
    match () {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        () => {
            let mut frame = Frame { regs, carry: 0 };
            // `ebx`, `esi` and `ebp` cannot be named as operands on x86, so
            // the whole register set goes through memory.
            unsafe {
                core::arch::asm!(
                    "push ebp",
                    "push esi",
                    "push ebx",
                    "push edi",
                    "mov eax, [edi + 0]",
                    "mov ebx, [edi + 4]",
                    "mov ecx, [edi + 8]",
                    "mov edx, [edi + 12]",
                    "mov esi, [edi + 16]",
                    "mov edi, [edi + 20]",
                    "int 0x31",
                    "push edi",
                    "mov edi, [esp + 4]",
                    "mov [edi + 0], eax",
                    "mov [edi + 4], ebx",
                    "mov [edi + 8], ecx",
                    "mov [edi + 12], edx",
                    "mov [edi + 16], esi",
                    "pop eax",
                    "mov [edi + 20], eax",
                    "setc al",
                    "movzx eax, al",
                    "mov [edi + 24], eax",
                    "pop edi",
                    "pop ebx",
                    "pop esi",
                    "pop ebp",
                    inout("edi") &raw mut frame => _,
                    out("eax") _,
                    out("ecx") _,
                    out("edx") _,
                );
            }
            DpmiRet {
                carry: frame.carry != 0,
                regs: frame.regs,
            }
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        () => unimplemented!(),
    }
}
