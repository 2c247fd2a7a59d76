use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the shutdown flag.
pub fn install_handlers() -> Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores into an atomic, which is async-signal-safe
        let previous = unsafe { libc::signal(sig, handler) };
        if previous == libc::SIG_ERR {
            bail!("Failed to install handler for signal {sig}");
        }
    }
    Ok(())
}

pub fn flag() -> &'static AtomicBool {
    &SHUTDOWN
}
