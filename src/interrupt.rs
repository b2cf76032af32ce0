//! Ctrl-C handling.
//!
//! While a log follow is active an interrupt only cancels the follow; at any
//! other time it ends the process with a clean exit.
use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};

static FOLLOWING: AtomicBool = AtomicBool::new(false);
static CANCEL: AtomicBool = AtomicBool::new(false);

/// Installs the process-wide interrupt handler.
pub fn install_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        if FOLLOWING.load(Ordering::SeqCst) {
            CANCEL.store(true, Ordering::SeqCst);
            return;
        }

        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout);
        let _ = stdout.flush();
        std::process::exit(0);
    })
}

/// Marks a cancellable follow as active until dropped.
pub struct FollowScope {
    _private: (),
}

impl FollowScope {
    /// Starts a follow scope, resetting any earlier cancellation.
    pub fn begin() -> Self {
        CANCEL.store(false, Ordering::SeqCst);
        FOLLOWING.store(true, Ordering::SeqCst);
        Self { _private: () }
    }

    /// Flag a follow loop polls to learn it was interrupted.
    pub fn cancel_flag(&self) -> &'static AtomicBool {
        &CANCEL
    }
}

impl Drop for FollowScope {
    fn drop(&mut self) {
        FOLLOWING.store(false, Ordering::SeqCst);
        CANCEL.store(false, Ordering::SeqCst);
    }
}
