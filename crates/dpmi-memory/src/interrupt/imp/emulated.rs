//! CPU state kept in memory, for targets without a real x86 flags register.
//!
//! Test builds keep one state per thread so that tests running in parallel
//! do not observe each other.
//!
//! Flag changes are `SeqCst` so that, like `cli` and `sti`, they order the
//! memory accesses around them.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct CpuState {
    interrupts: AtomicBool,
    trap: AtomicBool,
    handler_depth: AtomicUsize,
}

impl CpuState {
    const fn new() -> Self {
        Self {
            interrupts: AtomicBool::new(true),
            trap: AtomicBool::new(false),
            handler_depth: AtomicUsize::new(0),
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(test)] {
        std::thread_local! {
            static STATE: CpuState = const { CpuState::new() };
        }

        fn with_state<R>(f: impl FnOnce(&CpuState) -> R) -> R {
            STATE.with(f)
        }
    } else {
        static STATE: CpuState = CpuState::new();

        fn with_state<R>(f: impl FnOnce(&CpuState) -> R) -> R {
            f(&STATE)
        }
    }
}

pub fn read_and_disable() -> bool {
    with_state(|s| s.interrupts.swap(false, Ordering::SeqCst))
}

pub fn is_enabled() -> bool {
    with_state(|s| s.interrupts.load(Ordering::Relaxed))
}

pub fn restore(enabled: bool) {
    assert!(!is_enabled());
    if enabled {
        with_state(|s| s.interrupts.store(true, Ordering::SeqCst));
    }
}

pub fn read_and_clear_trap() -> bool {
    with_state(|s| s.trap.swap(false, Ordering::SeqCst))
}

pub fn is_trap_set() -> bool {
    with_state(|s| s.trap.load(Ordering::Relaxed))
}

pub fn restore_trap(set: bool) {
    if set {
        with_state(|s| s.trap.store(true, Ordering::SeqCst));
    }
}

pub fn enter_handler() {
    with_state(|s| s.handler_depth.fetch_add(1, Ordering::Relaxed));
}

pub fn leave_handler() {
    let depth = with_state(|s| s.handler_depth.fetch_sub(1, Ordering::Relaxed));
    assert!(depth > 0, "unbalanced interrupt handler exit");
}

pub fn handler_depth() -> usize {
    with_state(|s| s.handler_depth.load(Ordering::Relaxed))
}
