//! The Persistence port: a key-value byte-blob store. Out of scope per
//! spec.md §1 beyond this interface — the real backing store (a JSON file
//! on disk) lives in the `display-settings-windows` adapter crate.

/// `store`/`load`/`clear` are whole-blob operations; there is no framing or
/// partial-update contract. No concurrency guarantee beyond single-threaded
/// access from one `SettingsManager`.
pub trait Persistence {
    /// Returns `false` on I/O failure.
    fn store(&self, bytes: &[u8]) -> bool;

    /// `None` means an I/O failure occurred; an empty vec means there is no
    /// data (distinct outcomes).
    fn load(&self) -> Option<Vec<u8>>;

    /// Returns `false` on I/O failure.
    fn clear(&self) -> bool;
}

/// The default, no-op persistence backend. Always reports success and
/// never retains data — used where no host has been wired up yet, the
/// way `original_source`'s `noop_settings_persistence.cpp` backs
/// `SettingsManager` before a real backend is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
    fn store(&self, _bytes: &[u8]) -> bool {
        true
    }

    fn load(&self) -> Option<Vec<u8>> {
        Some(Vec::new())
    }

    fn clear(&self) -> bool {
        true
    }
}
