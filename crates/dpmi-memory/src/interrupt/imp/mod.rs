cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86", target_os = "none", not(test)))] {
        mod x86;
        pub(super) use self::x86::*;
    } else {
        mod emulated;
        pub(super) use self::emulated::*;
    }
}
