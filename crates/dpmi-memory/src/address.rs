//! Address and granule arithmetic.
//!
//! Conventional memory is addressed in 16-byte paragraphs through real-mode
//! `segment:offset` pairs, extended memory in host pages. The page size is
//! only known at run time, so the page functions here take it as an argument;
//! [`Dpmi`](crate::Dpmi) offers variants that use the probed size.

use core::fmt;

/// Size of a real-mode paragraph in bytes.
pub const PARAGRAPH_SIZE: usize = 16;

const PARAGRAPH_MASK: usize = PARAGRAPH_SIZE - 1;

/// Rounds `bytes` down to a multiple of [`PARAGRAPH_SIZE`].
#[must_use]
pub const fn round_down_to_paragraph(bytes: usize) -> usize {
    bytes & !PARAGRAPH_MASK
}

/// Rounds `bytes` up to a multiple of [`PARAGRAPH_SIZE`].
#[must_use]
pub const fn round_up_to_paragraph(bytes: usize) -> usize {
    let down = round_down_to_paragraph(bytes);
    if down == bytes {
        bytes
    } else {
        down + PARAGRAPH_SIZE
    }
}

/// Returns the number of paragraphs needed to hold `bytes`.
#[must_use]
pub const fn bytes_to_paragraphs(bytes: usize) -> usize {
    round_up_to_paragraph(bytes) / PARAGRAPH_SIZE
}

/// Returns the size in bytes of `paragraphs` paragraphs.
#[must_use]
pub const fn paragraphs_to_bytes(paragraphs: usize) -> usize {
    paragraphs * PARAGRAPH_SIZE
}

/// Rounds `bytes` down to a multiple of `page_size`.
///
/// `page_size` must be a power of two.
#[must_use]
pub const fn round_down_to_page(bytes: usize, page_size: usize) -> usize {
    debug_assert!(page_size.is_power_of_two());
    bytes & !(page_size - 1)
}

/// Rounds `bytes` up to a multiple of `page_size`.
///
/// `page_size` must be a power of two.
#[must_use]
pub const fn round_up_to_page(bytes: usize, page_size: usize) -> usize {
    let down = round_down_to_page(bytes, page_size);
    if down == bytes {
        bytes
    } else {
        down + page_size
    }
}

/// A real-mode `segment:offset` pointer into conventional memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FarPtr16 {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr16 {
    #[must_use]
    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }
}

impl fmt::Display for FarPtr16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment, self.offset)
    }
}

/// Converts a real-mode pointer to a linear address.
#[must_use]
pub const fn conventional_to_linear(ptr: FarPtr16) -> usize {
    ((ptr.segment as usize) << 4) + ptr.offset as usize
}

/// Converts a linear address below 1 MiB to a normalized real-mode pointer
/// (offset below 16).
///
/// Bits of `address` above the 20-bit real-mode range are discarded.
#[must_use]
#[expect(clippy::cast_possible_truncation)]
pub const fn linear_to_conventional(address: usize) -> FarPtr16 {
    FarPtr16 {
        segment: (address >> 4) as u16,
        offset: (address & PARAGRAPH_MASK) as u16,
    }
}
