//! `SettingsManager::revert` and `reset_persistence`. See spec.md §4.8.

use std::rc::Rc;

use tracing::{info, instrument, warn};

use crate::guard::GuardStack;
use crate::planning;
use crate::ports::{AudioContext, DisplayDriver, Persistence};
use crate::types::RevertResult;

use super::SettingsManager;

impl<D: DisplayDriver, P: Persistence, A: AudioContext> SettingsManager<D, P, A> {
    /// Unwinds every tracked modification and restores the pre-modification
    /// initial topology, clearing persistence on success. A no-op (returns
    /// `Ok`) if nothing is currently tracked.
    #[instrument(skip(self))]
    pub fn revert(&mut self) -> RevertResult {
        let mut touched = false;
        let result = self.revert_inner(&mut touched);
        if touched {
            if let Err(err) =
                planning::blank_hdr_states(self.driver.as_ref(), self.workarounds.hdr_blank_delay)
            {
                warn!(error = %err, "HDR blank workaround failed after revert");
            }
        }
        info!(?result, "revert finished");
        result
    }

    fn revert_inner(&mut self, touched: &mut bool) -> RevertResult {
        let Some(state) = self.persistence.get().cloned() else {
            return RevertResult::Ok;
        };

        if !self.driver.is_api_access_available() {
            warn!("display API temporarily unavailable");
            return RevertResult::ApiTemporarilyUnavailable;
        }

        let current_topology = match self.driver.current_topology() {
            Ok(t) if self.driver.is_topology_valid(&t) => t,
            _ => {
                warn!("current topology is invalid or unreadable");
                return RevertResult::TopologyIsInvalid;
            }
        };

        // A revert always ends by writing `initial.topology` to the OS, even
        // when nothing in `modified` needs undoing, so the HDR-blank
        // workaround fires unconditionally here (spec.md §9(iii)).
        *touched = true;

        let mut guards = GuardStack::new();
        {
            let driver = Rc::clone(&self.driver);
            guards.push(move || {
                let fallback_applied = match driver.enumerate() {
                    Ok(enumerated) => {
                        let full = planning::create_full_extended_topology(&enumerated);
                        driver.set_topology(&full).is_ok()
                    }
                    Err(_) => false,
                };
                if !fallback_applied {
                    match driver.current_topology() {
                        Ok(current) if driver.set_topology(&current).is_err() => {
                            warn!("failed to restore any topology during revert rollback");
                        }
                        Err(_) => warn!("failed to read topology during revert rollback"),
                        _ => {}
                    }
                }
            });
        }

        if let Err(result) = self.revert_modified_settings(&state, &current_topology) {
            guards.unwind();
            return result;
        }

        if !self.driver.is_topology_valid(&state.initial.topology) {
            guards.unwind();
            return RevertResult::TopologyIsInvalid;
        }
        if self.driver.set_topology(&state.initial.topology).is_err() {
            guards.unwind();
            return RevertResult::SwitchingTopologyFailed;
        }

        if !self.persistence.clear() {
            guards.unwind();
            return RevertResult::PersistenceSaveFailed;
        }

        if self.audio.is_captured() {
            self.audio.release();
        }
        guards.commit();
        RevertResult::Ok
    }

    /// Tries a normal [`Self::revert`] first; if that fails, forcibly clears
    /// persistence and releases the audio context anyway. Does not imply
    /// recovery of the OS state (spec.md §9(i)) — this is the "give up and
    /// forget" escape hatch for a host that has permanently lost the target
    /// device.
    #[instrument(skip(self))]
    pub fn reset_persistence(&mut self) -> RevertResult {
        let result = self.revert();
        if result != RevertResult::Ok {
            warn!(?result, "revert failed during reset_persistence; forcing persistence clear");
            if !self.persistence.persist(None) {
                warn!("reset_persistence: failed to clear persisted state after revert failure");
            }
            if self.audio.is_captured() {
                self.audio.release();
            }
        }
        result
    }
}
