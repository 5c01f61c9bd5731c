use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// True once Ctrl-C (or SIGTERM / console close) has been received.
pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::Acquire)
}

/// Install the process-wide interrupt handler. The first interrupt raises the
/// flag; a second one exits immediately.
#[cfg(unix)]
pub fn install() {
    extern "C" fn on_signal(_signal: libc::c_int) {
        if INTERRUPTED.swap(true, Ordering::AcqRel) {
            unsafe { libc::_exit(130) };
        }
    }

    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(windows)]
pub fn install() {
    type BOOL = i32;
    type DWORD = u32;

    extern "system" {
        fn SetConsoleCtrlHandler(
            handler: Option<unsafe extern "system" fn(DWORD) -> BOOL>,
            add: BOOL,
        ) -> BOOL;
    }

    unsafe extern "system" fn on_ctrl(_event: DWORD) -> BOOL {
        if INTERRUPTED.swap(true, Ordering::AcqRel) {
            return 0; // let the default handler terminate the process
        }
        1
    }

    unsafe {
        if SetConsoleCtrlHandler(Some(on_ctrl), 1) == 0 {
            crate::logger::warn("failed to install console control handler");
        }
    }
}
