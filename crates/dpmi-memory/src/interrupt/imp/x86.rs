use core::{
    arch::asm,
    sync::atomic::{AtomicUsize, Ordering},
};

const EFLAGS_TF: usize = 1 << 8;
const EFLAGS_IF: usize = 1 << 9;

// The asm blocks are compiler barriers: no memory access may move across
// `cli`, `sti` or `popfd`. None of them may be `nomem`.

static HANDLER_DEPTH: AtomicUsize = AtomicUsize::new(0);

fn read_eflags() -> usize {
    let eflags: usize;
    unsafe {
        asm!("pushfd", "pop {}", out(reg) eflags, options(preserves_flags));
    }
    eflags
}

pub fn read_and_disable() -> bool {
    let eflags: usize;
    unsafe {
        asm!("pushfd", "pop {}", "cli", out(reg) eflags);
    }
    eflags & EFLAGS_IF != 0
}

pub fn is_enabled() -> bool {
    read_eflags() & EFLAGS_IF != 0
}

pub fn restore(enabled: bool) {
    assert!(!is_enabled());
    if enabled {
        unsafe {
            asm!("sti", options(nostack));
        }
    }
}

pub fn read_and_clear_trap() -> bool {
    let eflags: usize;
    unsafe {
        asm!(
            "pushfd",
            "pop {eflags}",
            "mov {tmp}, {eflags}",
            "and {tmp}, {mask}",
            "push {tmp}",
            "popfd",
            eflags = out(reg) eflags,
            tmp = out(reg) _,
            mask = const !EFLAGS_TF,
        );
    }
    eflags & EFLAGS_TF != 0
}

pub fn is_trap_set() -> bool {
    read_eflags() & EFLAGS_TF != 0
}

pub fn restore_trap(set: bool) {
    if set {
        unsafe {
            asm!(
                "pushfd",
                "or dword ptr [esp], {mask}",
                "popfd",
                mask = const EFLAGS_TF,
            );
        }
    }
}

pub fn enter_handler() {
    HANDLER_DEPTH.fetch_add(1, Ordering::Relaxed);
}

pub fn leave_handler() {
    let depth = HANDLER_DEPTH.fetch_sub(1, Ordering::Relaxed);
    assert!(depth > 0, "unbalanced interrupt handler exit");
}

pub fn handler_depth() -> usize {
    HANDLER_DEPTH.load(Ordering::Relaxed)
}
