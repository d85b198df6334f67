//! Orchestrates the DisplayDriver, Persistence and AudioContext ports into
//! the transactional `apply`/`revert` pair. See spec.md §4.7/§4.8.

mod apply;
mod revert;

use std::rc::Rc;

use tracing::warn;

use crate::guard::GuardStack;
use crate::persistent_state::PersistentState;
use crate::ports::{AudioContext, DisplayDriver, Persistence};
use crate::types::{DeviceId, ModifiedState, SingleDisplayConfigState, WinWorkarounds};

/// Owns the persisted state; holds the driver and audio ports behind
/// reference-counted handles so guard closures (which must be `'static` to
/// outlive the stack frame that built them) can capture a cheap clone
/// instead of a borrow.
pub struct SettingsManager<D: DisplayDriver, P: Persistence, A: AudioContext> {
    driver: Rc<D>,
    persistence: PersistentState<P>,
    audio: Rc<A>,
    workarounds: WinWorkarounds,
}

impl<D: DisplayDriver, P: Persistence, A: AudioContext> SettingsManager<D, P, A> {
    pub fn new(driver: Rc<D>, persistence: P, audio: Rc<A>, workarounds: WinWorkarounds) -> Self {
        Self {
            driver,
            persistence: PersistentState::new_lenient(persistence),
            audio,
            workarounds,
        }
    }

    pub fn cached_state(&self) -> Option<&SingleDisplayConfigState> {
        self.persistence.get()
    }

    /// The first id (in topology order) among `topology`'s members that the
    /// driver currently reports as primary, if any.
    fn current_primary_in(&self, topology: &crate::types::ActiveTopology) -> Option<DeviceId> {
        topology
            .groups()
            .iter()
            .flatten()
            .find(|id| self.driver.is_primary(id))
            .cloned()
    }

    /// Shared core of stage 1g (apply switching away from a prior
    /// modification) and the first phase of `revert`: undoes everything
    /// recorded in `state.modified`, leaving only the topology in place
    /// (the caller is responsible for restoring `state.initial.topology`
    /// afterwards, which `apply`'s stage 1g does not need — it's about to
    /// set its own new topology instead).
    fn revert_modified_settings(
        &mut self,
        state: &SingleDisplayConfigState,
        current_topology: &crate::types::ActiveTopology,
    ) -> Result<(), crate::types::RevertResult> {
        use crate::types::RevertResult;

        let modified = &state.modified;
        if !modified.has_modifications() {
            return Ok(());
        }

        let mut guards = GuardStack::new();

        if modified.topology != *current_topology {
            if !self.driver.is_topology_valid(&modified.topology) {
                return Err(RevertResult::TopologyIsInvalid);
            }
            if self.driver.set_topology(&modified.topology).is_err() {
                return Err(RevertResult::SwitchingTopologyFailed);
            }
        }

        if !modified.original_hdr_states.is_empty() {
            let ids: Vec<DeviceId> = modified.original_hdr_states.keys().cloned().collect();
            let pre_revert = self.driver.current_hdr_states(&ids);
            if pre_revert != modified.original_hdr_states {
                if self.driver.set_hdr_states(&modified.original_hdr_states).is_err() {
                    guards.unwind();
                    return Err(RevertResult::RevertingHdrStatesFailed);
                }
                let driver = Rc::clone(&self.driver);
                guards.push(move || {
                    if driver.set_hdr_states(&pre_revert).is_err() {
                        warn!("failed to restore pre-revert HDR states after a later failure");
                    }
                });
            }
        }

        if !modified.original_modes.is_empty() {
            let ids: Vec<DeviceId> = modified.original_modes.keys().cloned().collect();
            let pre_revert = self.driver.current_display_modes(&ids);
            if pre_revert != modified.original_modes {
                if self.driver.set_display_modes(&modified.original_modes).is_err() {
                    guards.unwind();
                    return Err(RevertResult::RevertingDisplayModesFailed);
                }
                let observed = self.driver.current_display_modes(&ids);
                if observed != pre_revert {
                    let driver = Rc::clone(&self.driver);
                    guards.push(move || {
                        if driver.set_display_modes(&pre_revert).is_err() {
                            warn!("failed to restore pre-revert display modes after a later failure");
                        }
                    });
                }
            }
        }

        if let Some(original_primary) = &modified.original_primary_device {
            let pre_revert = self.current_primary_in(&modified.topology);
            if pre_revert.as_ref() != Some(original_primary) {
                if self.driver.set_as_primary(original_primary).is_err() {
                    guards.unwind();
                    return Err(RevertResult::RevertingPrimaryDeviceFailed);
                }
                if let Some(pre_revert) = pre_revert {
                    let driver = Rc::clone(&self.driver);
                    guards.push(move || {
                        if driver.set_as_primary(&pre_revert).is_err() {
                            warn!("failed to restore pre-revert primary device after a later failure");
                        }
                    });
                }
            }
        }

        let new_state = SingleDisplayConfigState {
            initial: state.initial.clone(),
            modified: ModifiedState::topology_only(modified.topology.clone()),
        };
        if !self.persistence.persist(Some(new_state)) {
            guards.unwind();
            return Err(RevertResult::PersistenceSaveFailed);
        }

        guards.commit();
        Ok(())
    }
}
