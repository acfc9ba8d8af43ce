//! High-level interface for the DPMI DOS memory functions.

use dpmi_sys::{DpmiError, dos, low_word};

use crate::{DosBlock, Selector};

/// Allocates `paragraphs` paragraphs of conventional memory.
pub fn allocate(paragraphs: u16) -> Result<DosBlock, DpmiError> {
    let regs = dos::allocate(usize::from(paragraphs)).into_result()?;
    Ok(DosBlock {
        segment: low_word(regs.eax),
        selector: Selector(low_word(regs.edx)),
    })
}

/// Frees the conventional memory block owning `selector`.
///
/// # Safety
///
/// The block must no longer be referenced.
pub unsafe fn free(selector: Selector) -> Result<(), DpmiError> {
    let ret = unsafe { dos::free(usize::from(selector.0)) };
    ret.into_result()?;
    Ok(())
}

/// Resizes the conventional memory block owning `selector` in place.
///
/// # Safety
///
/// When shrinking, the released tail must no longer be referenced.
pub unsafe fn resize(selector: Selector, paragraphs: u16) -> Result<(), DpmiError> {
    let ret = unsafe { dos::resize(usize::from(selector.0), usize::from(paragraphs)) };
    ret.into_result()?;
    Ok(())
}
