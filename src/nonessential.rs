//! Usage: Process-wide latch mirrored into `std::env`, exported from exactly one
//! non-handler call site so request handlers never mutate the environment directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

pub struct NonessentialLatch {
    disabled: AtomicBool,
    var_name: OnceLock<String>,
}

impl NonessentialLatch {
    pub fn new(var_name: impl Into<String>) -> Self {
        let latch = Self {
            disabled: AtomicBool::new(false),
            var_name: OnceLock::new(),
        };
        let _ = latch.var_name.set(var_name.into());
        latch
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Flip the latch, if it isn't already flipped. Returns `true` the first time
    /// this call actually changes the state, so the caller can export to `std::env`
    /// exactly once.
    pub fn set_disabled(&self) -> bool {
        self.disabled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Export the current state into `std::env`. Must only be called from the single
    /// non-handler call site (process bootstrap / the call immediately after
    /// `set_disabled` returns `true`) — never from inside a request handler.
    pub fn export_to_env(&self) {
        if let Some(name) = self.var_name.get() {
            std::env::set_var(name, if self.is_disabled() { "1" } else { "0" });
        }
    }
}
