//! The AudioContext port: opaque capture/release of whatever default-audio
//! bindings Windows would otherwise lose when a display is deactivated. Out
//! of scope per spec.md §1 beyond this interface.

use std::cell::Cell;

/// `capture` is idempotent and remembers captured state; `release` clears
/// it. The contract is deliberately opaque to the core — callers never
/// inspect what was captured, only whether it was.
pub trait AudioContext {
    /// Returns `true` on success (including the idempotent "already
    /// captured" case).
    fn capture(&self) -> bool;

    fn is_captured(&self) -> bool;

    fn release(&self);
}

/// The default, no-op audio context. Always reports success and never
/// actually captures anything, the way `original_source`'s
/// `noop_audio_context.cpp` backs `SettingsManager` before a real backend
/// is plugged in.
#[derive(Debug, Default)]
pub struct NoopAudioContext {
    captured: Cell<bool>,
}

impl AudioContext for NoopAudioContext {
    fn capture(&self) -> bool {
        self.captured.set(true);
        true
    }

    fn is_captured(&self) -> bool {
        self.captured.get()
    }

    fn release(&self) {
        self.captured.set(false);
    }
}
