//! Diagnostic logging controls.
//!
//! The host owns subscriber installation (`tracing_subscriber`); this
//! module only exposes the process-wide verbosity toggle for per-frame
//! diagnostics.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Select verbose per-frame diagnostics.
///
/// When enabled, per-frame events are emitted at `debug` so typical
/// persisted log configurations capture them; when disabled they stay
/// at `trace` and cost nothing unless a subscriber asks for them.
pub fn set_verbose_logging(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

/// Whether verbose per-frame diagnostics are enabled.
pub fn verbose_logging() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Emit a per-frame diagnostic at the level selected by the verbosity
/// flag. The message is only rendered if a subscriber wants the level.
pub(crate) fn frame_trace(message: impl FnOnce() -> String) {
    if verbose_logging() {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("{}", message());
        }
    } else if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("{}", message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_round_trips() {
        set_verbose_logging(true);
        assert!(verbose_logging());
        set_verbose_logging(false);
        assert!(!verbose_logging());
    }
}
