//! The persisted single-display configuration state: a thin, JSON-backed
//! cache in front of a [`Persistence`] port. Grounded on `original_source`'s
//! `persistent_state.cpp`, generalized to a generic backend. See spec.md
//! §4.6.

use thiserror::Error;
use tracing::warn;

use crate::ports::Persistence;
use crate::types::SingleDisplayConfigState;

#[derive(Debug, Error)]
pub enum PersistentStateError {
    #[error("failed to read persisted state")]
    Io,
    #[error("persisted state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Caches the last-loaded [`SingleDisplayConfigState`] next to the
/// [`Persistence`] backend it was loaded from, so repeated reads (e.g. one
/// per `apply`) don't each touch disk, and so `persist` can skip redundant
/// writes when nothing changed.
pub struct PersistentState<P: Persistence> {
    persistence: P,
    cached: Option<SingleDisplayConfigState>,
}

impl<P: Persistence> PersistentState<P> {
    /// Loads the current state, failing if the backend is unreadable or the
    /// stored bytes don't parse. Use when a caller needs to distinguish "no
    /// state" from "broken state" (e.g. the CLI's `show` command).
    pub fn new_strict(persistence: P) -> Result<Self, PersistentStateError> {
        let cached = Self::load(&persistence, true)?;
        Ok(Self { persistence, cached })
    }

    /// Loads the current state, treating any I/O failure or parse failure
    /// as "no persisted state" rather than propagating an error. Used by
    /// `SettingsManager`, which must be constructible even with a stale or
    /// corrupt persisted blob left over from a previous version.
    pub fn new_lenient(persistence: P) -> Self {
        // `load(.., strict = false)` never returns `Err`.
        let cached = Self::load(&persistence, false).unwrap_or(None);
        Self { persistence, cached }
    }

    fn load(
        persistence: &P,
        strict: bool,
    ) -> Result<Option<SingleDisplayConfigState>, PersistentStateError> {
        let bytes = match persistence.load() {
            Some(bytes) => bytes,
            None => {
                if strict {
                    return Err(PersistentStateError::Io);
                }
                warn!("persistence backend read failed; proceeding with no persisted state");
                return Ok(None);
            }
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                if strict {
                    return Err(PersistentStateError::Corrupt(err));
                }
                warn!(error = %err, "persisted state failed to parse; discarding");
                Ok(None)
            }
        }
    }

    pub fn get(&self) -> Option<&SingleDisplayConfigState> {
        self.cached.as_ref()
    }

    /// Re-reads from the backend, replacing the cache. Used after an
    /// external actor (e.g. another process) may have mutated the backing
    /// file.
    pub fn refresh(&mut self) {
        self.cached = Self::load(&self.persistence, false).unwrap_or(None);
    }

    /// Writes `state`, or clears the backend if `None`. A no-op (other than
    /// updating the cache) when `state` already matches what's cached, so
    /// repeated no-change `apply` calls don't generate disk writes.
    pub fn persist(&mut self, state: Option<SingleDisplayConfigState>) -> bool {
        if state == self.cached {
            return true;
        }
        let ok = match &state {
            Some(state) => match serde_json::to_vec_pretty(state) {
                Ok(bytes) => self.persistence.store(&bytes),
                Err(err) => {
                    warn!(error = %err, "failed to serialize persisted state");
                    false
                }
            },
            None => self.persistence.clear(),
        };
        if ok {
            self.cached = state;
        }
        ok
    }

    pub fn clear(&mut self) -> bool {
        self.persist(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActiveTopology, InitialState, ModifiedState};
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakePersistence {
        data: RefCell<Option<Vec<u8>>>,
    }

    impl Persistence for FakePersistence {
        fn store(&self, bytes: &[u8]) -> bool {
            *self.data.borrow_mut() = Some(bytes.to_vec());
            true
        }
        fn load(&self) -> Option<Vec<u8>> {
            Some(self.data.borrow().clone().unwrap_or_default())
        }
        fn clear(&self) -> bool {
            *self.data.borrow_mut() = None;
            true
        }
    }

    fn sample_state() -> SingleDisplayConfigState {
        SingleDisplayConfigState {
            initial: InitialState {
                topology: ActiveTopology::default(),
                primary_devices: HashSet::new(),
            },
            modified: ModifiedState::default(),
        }
    }

    #[test]
    fn new_lenient_with_no_data_has_no_cached_state() {
        let ps = PersistentState::new_lenient(FakePersistence::default());
        assert!(ps.get().is_none());
    }

    #[test]
    fn persist_then_get_round_trips() {
        let mut ps = PersistentState::new_lenient(FakePersistence::default());
        let state = sample_state();
        assert!(ps.persist(Some(state.clone())));
        assert_eq!(ps.get(), Some(&state));
    }

    #[test]
    fn persist_same_state_is_a_no_op() {
        struct CountingPersistence {
            inner: FakePersistence,
            writes: RefCell<u32>,
        }
        impl Persistence for CountingPersistence {
            fn store(&self, bytes: &[u8]) -> bool {
                *self.writes.borrow_mut() += 1;
                self.inner.store(bytes)
            }
            fn load(&self) -> Option<Vec<u8>> {
                self.inner.load()
            }
            fn clear(&self) -> bool {
                self.inner.clear()
            }
        }
        let backend = CountingPersistence {
            inner: FakePersistence::default(),
            writes: RefCell::new(0),
        };
        let mut ps = PersistentState::new_lenient(backend);
        let state = sample_state();
        ps.persist(Some(state.clone()));
        ps.persist(Some(state));
        assert_eq!(*ps.persistence.writes.borrow(), 1);
    }

    #[test]
    fn strict_construction_fails_on_corrupt_data() {
        let backend = FakePersistence::default();
        backend.store(b"not json");
        let result = PersistentState::new_strict(backend);
        assert!(matches!(result, Err(PersistentStateError::Corrupt(_))));
    }

    #[test]
    fn lenient_construction_discards_corrupt_data() {
        let backend = FakePersistence::default();
        backend.store(b"not json");
        let ps = PersistentState::new_lenient(backend);
        assert!(ps.get().is_none());
    }

    #[test]
    fn clear_removes_cached_state() {
        let mut ps = PersistentState::new_lenient(FakePersistence::default());
        ps.persist(Some(sample_state()));
        assert!(ps.clear());
        assert!(ps.get().is_none());
    }
}
