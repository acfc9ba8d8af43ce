//! High-level interface for the DPMI descriptor functions.

use dpmi_sys::{DpmiError, low_word, selector};

use crate::Selector;

/// Returns a selector over the real-mode segment `segment`.
pub fn segment_to_descriptor(segment: u16) -> Result<Selector, DpmiError> {
    let regs = selector::segment_to_descriptor(usize::from(segment)).into_result()?;
    Ok(Selector(low_word(regs.eax)))
}

/// Returns the linear base address of `sel`.
pub fn base(sel: Selector) -> Result<usize, DpmiError> {
    let regs = selector::get_segment_base(usize::from(sel.0)).into_result()?;
    Ok(dpmi_sys::join(regs.ecx, regs.edx))
}

/// Sets the linear base address of `sel`.
///
/// # Safety
///
/// Every pointer derived from `sel` changes its meaning.
pub unsafe fn set_base(sel: Selector, base: usize) -> Result<(), DpmiError> {
    let ret = unsafe { selector::set_segment_base(usize::from(sel.0), base) };
    ret.into_result()?;
    Ok(())
}

/// Returns the limit of `sel`.
pub fn limit(sel: Selector) -> Result<usize, DpmiError> {
    selector::load_segment_limit(sel.0).ok_or(DpmiError::INVALID_SELECTOR)
}

/// Sets the limit of `sel`.
///
/// Limits of one megabyte or more are rounded up to page granularity by the
/// caller; the host rejects anything else.
///
/// # Safety
///
/// Shrinking a limit invalidates every pointer beyond it.
pub unsafe fn set_limit(sel: Selector, limit: usize) -> Result<(), DpmiError> {
    let ret = unsafe { selector::set_segment_limit(usize::from(sel.0), limit) };
    ret.into_result()?;
    Ok(())
}

/// Returns the selector currently loaded in `DS`.
#[must_use]
pub fn data_selector() -> Selector {
    Selector(selector::data_selector())
}
