//! Cooperative cancellation and SIGINT handling.
//!
//! The pipeline checks a [`CancellationToken`] before starting each
//! command and once more after each pass. Commands already running finish
//! under their own timeout: they run in their own process group, so a
//! terminal Ctrl-C reaches only this process.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static SIGINT_RECEIVED: LazyLock<Arc<AtomicBool>> =
    LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Exit code for a run stopped by the user.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Installs a SIGINT handler that trips every token created with
/// [`CancellationToken::sigint`].
///
/// # Errors
///
/// Returns the OS error if the handler cannot be installed.
pub fn install_sigint_handler() -> io::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&SIGINT_RECEIVED))?;
    Ok(())
}

/// Shared stop flag, optionally tied to SIGINT.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    watch_sigint: bool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also reports cancelled once SIGINT was received.
    pub fn sigint() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            watch_sigint: true,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || (self.watch_sigint && SIGINT_RECEIVED.load(Ordering::SeqCst))
    }
}
