//! Interrupt and trap masking, and interrupt handler context tracking.
//!
//! Every guard restores the state it saved when dropped, so guards nest
//! freely as long as they are dropped in reverse order of creation.

use core::marker::PhantomData;

mod imp;

/// Disables interrupts until the returned guard is dropped.
pub fn disable() -> InterruptGuard {
    InterruptGuard {
        was_enabled: imp::read_and_disable(),
        _not_send: PhantomData,
    }
}

/// Returns `true` if interrupts are enabled on this CPU.
#[must_use]
pub fn is_enabled() -> bool {
    imp::is_enabled()
}

#[derive(Debug)]
#[must_use]
pub struct InterruptGuard {
    was_enabled: bool,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        imp::restore(self.was_enabled);
    }
}

/// Disables single-step trap delivery until the returned guard is dropped.
///
/// Only debug builds touch the trap flag; in release builds the guard does
/// nothing.
pub fn mask_trap() -> TrapGuard {
    TrapGuard {
        #[cfg(debug_assertions)]
        was_set: imp::read_and_clear_trap(),
        _not_send: PhantomData,
    }
}

/// Returns `true` if the single-step trap flag is set.
#[must_use]
pub fn is_trap_set() -> bool {
    imp::is_trap_set()
}

#[derive(Debug)]
#[must_use]
pub struct TrapGuard {
    #[cfg(debug_assertions)]
    was_set: bool,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for TrapGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        imp::restore_trap(self.was_set);
    }
}

/// Enters a section that nothing on this CPU can preempt.
pub fn critical_section() -> CriticalSection {
    let interrupts = disable();
    let trap = mask_trap();
    CriticalSection {
        _trap: trap,
        _interrupts: interrupts,
    }
}

/// Interrupts and trap delivery are masked while this guard lives.
#[derive(Debug)]
#[must_use]
pub struct CriticalSection {
    // Dropped first: the trap flag is restored before interrupts come back.
    _trap: TrapGuard,
    _interrupts: InterruptGuard,
}

/// Marks the current CPU as running an interrupt handler until the returned
/// guard is dropped.
///
/// Interrupt handler entry code calls this before running handler bodies, so
/// that code that must not run from a handler can refuse.
pub fn enter_handler() -> HandlerGuard {
    imp::enter_handler();
    HandlerGuard {
        _not_send: PhantomData,
    }
}

/// Returns `true` if the current CPU is running an interrupt handler.
#[must_use]
pub fn in_handler() -> bool {
    imp::handler_depth() > 0
}

#[derive(Debug)]
#[must_use]
pub struct HandlerGuard {
    _not_send: PhantomData<*mut ()>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        imp::leave_handler();
    }
}
