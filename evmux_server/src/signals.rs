//! SIGINT/SIGTERM handling for the serve loop.
//!
//! Handlers are installed without `SA_RESTART` so a blocking `epoll_wait` is
//! interrupted and the loop gets to look at the flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use libc::{c_int, SIGINT, SIGTERM};

static INIT: Once = Once::new();
static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sig(_sig: c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers (idempotent).
pub fn init_term_signals() -> io::Result<()> {
    let mut res = Ok(());
    INIT.call_once(|| res = install());
    res
}

fn install() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sig as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [SIGINT, SIGTERM] {
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Returns true if termination signal received.
pub fn should_terminate() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}
