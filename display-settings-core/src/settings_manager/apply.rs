//! `SettingsManager::apply`. See spec.md §4.7.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, info, instrument, warn};

use crate::guard::GuardStack;
use crate::planning;
use crate::ports::{AudioContext, DisplayDriver, Persistence};
use crate::types::{
    ActiveTopology, ApplyResult, DeviceDisplayModeMap, DeviceId, HdrStateMap, ModifiedState,
    SingleDisplayConfigState, SingleDisplayConfiguration,
};

use super::SettingsManager;

impl<D: DisplayDriver, P: Persistence, A: AudioContext> SettingsManager<D, P, A> {
    /// Places the OS into the requested single-display configuration, or
    /// leaves it exactly as it was. See spec.md §4.7 for the stage-by-stage
    /// contract this follows.
    #[instrument(skip(self, config))]
    pub fn apply(&mut self, config: &SingleDisplayConfiguration) -> ApplyResult {
        let mut touched = false;
        let result = self.apply_inner(config, &mut touched);
        if touched {
            if let Err(err) =
                planning::blank_hdr_states(self.driver.as_ref(), self.workarounds.hdr_blank_delay)
            {
                warn!(error = %err, "HDR blank workaround failed after apply");
            }
        }
        info!(?result, "apply finished");
        result
    }

    fn apply_inner(&mut self, config: &SingleDisplayConfiguration, touched: &mut bool) -> ApplyResult {
        if !self.driver.is_api_access_available() {
            warn!("display API temporarily unavailable");
            return ApplyResult::ApiTemporarilyUnavailable;
        }

        let topology_before = match self.driver.current_topology() {
            Ok(t) if self.driver.is_topology_valid(&t) => t,
            _ => {
                warn!("current topology is invalid or unreadable");
                return ApplyResult::DevicePrepFailed;
            }
        };
        let audio_was_captured_before = self.audio.is_captured();

        let mut guards = GuardStack::new();
        let audio_captured_fresh = Rc::new(Cell::new(false));
        {
            let driver = Rc::clone(&self.driver);
            let audio = Rc::clone(&self.audio);
            let topology_before = topology_before.clone();
            let captured_fresh = Rc::clone(&audio_captured_fresh);
            guards.push(move || {
                if driver.set_topology(&topology_before).is_err() {
                    warn!("failed to restore pre-apply topology while rolling back");
                }
                if captured_fresh.get() {
                    audio.release();
                }
            });
        }

        // --- Stage 1: prepareTopology ---
        let enumerated = match self.driver.enumerate() {
            Ok(e) if !e.is_empty() => e,
            _ => {
                guards.unwind();
                return ApplyResult::DevicePrepFailed;
            }
        };
        if let Some(requested) = &config.device_id {
            if !enumerated.iter().any(|d| &d.device_id == requested) {
                guards.unwind();
                return ApplyResult::DevicePrepFailed;
            }
        }

        let cached = self.persistence.get().cloned();
        let initial = match planning::compute_initial_state(
            cached.as_ref().map(|s| &s.initial),
            &topology_before,
            &enumerated,
        ) {
            Some(i) => i,
            None => {
                guards.unwind();
                return ApplyResult::DevicePrepFailed;
            }
        };
        let initial = match planning::strip_initial_state(&initial, &enumerated) {
            Some(i) => i,
            None => {
                guards.unwind();
                return ApplyResult::DevicePrepFailed;
            }
        };

        let (new_topology, device_to_configure, additional) =
            planning::compute_new_topology_and_metadata(
                config.device_prep(),
                config.device_id.as_ref(),
                &initial,
            );
        let configuring_primary = config.device_id.is_none();

        if !planning::flatten_topology(&new_topology).contains(&device_to_configure) {
            guards.unwind();
            return ApplyResult::DevicePrepFailed;
        }

        if new_topology != topology_before {
            if let Some(cached_state) = &cached {
                if cached_state.modified.has_modifications()
                    && cached_state.modified.topology != new_topology
                {
                    if self
                        .revert_modified_settings(cached_state, &topology_before)
                        .is_err()
                    {
                        guards.unwind();
                        return ApplyResult::DevicePrepFailed;
                    }
                }
            }

            if !self.audio.is_captured() {
                let switching_from_initial = topology_before == initial.topology;
                let current_flat = planning::flatten_topology(&topology_before);
                let new_flat = planning::flatten_topology(&new_topology);
                let contains_all_current = current_flat.is_subset(&new_flat);
                if switching_from_initial && !contains_all_current {
                    if !self.audio.capture() {
                        guards.unwind();
                        return ApplyResult::DevicePrepFailed;
                    }
                    audio_captured_fresh.set(true);
                }
            }

            *touched = true;
            debug!(?new_topology, "setting new topology");
            if self.driver.set_topology(&new_topology).is_err() {
                guards.unwind();
                return ApplyResult::DevicePrepFailed;
            }
        }

        let release_context = new_topology == initial.topology && audio_was_captured_before;
        let mut modified = ModifiedState::topology_only(new_topology.clone());

        // --- Stage 2: preparePrimaryDevice ---
        if let Err(result) = self.prepare_primary_device(
            config,
            &device_to_configure,
            cached.as_ref(),
            &mut modified,
            &mut guards,
        ) {
            guards.unwind();
            return result;
        }

        // --- Stage 3: prepareDisplayModes ---
        let topology_snapshot = modified.topology.clone();
        if let Err(result) = self.prepare_display_modes(
            config,
            configuring_primary,
            &device_to_configure,
            &additional,
            &topology_snapshot,
            cached.as_ref(),
            &mut modified,
            &mut guards,
            touched,
        ) {
            guards.unwind();
            return result;
        }

        // --- Stage 4: prepareHdrStates ---
        if let Err(result) = self.prepare_hdr_states(
            config,
            configuring_primary,
            &device_to_configure,
            &additional,
            &topology_snapshot,
            cached.as_ref(),
            &mut modified,
            &mut guards,
            touched,
        ) {
            guards.unwind();
            return result;
        }

        // --- Stage 5: persist ---
        let new_state = SingleDisplayConfigState {
            initial: initial.clone(),
            modified,
        };
        if !self.persistence.persist(Some(new_state)) {
            guards.unwind();
            return ApplyResult::PersistenceSaveFailed;
        }

        // --- Stage 6: success ---
        if release_context {
            self.audio.release();
        }
        guards.commit();
        ApplyResult::Ok
    }

    fn prepare_primary_device(
        &self,
        config: &SingleDisplayConfiguration,
        device_to_configure: &DeviceId,
        cached: Option<&SingleDisplayConfigState>,
        modified: &mut ModifiedState,
        guards: &mut GuardStack,
    ) -> Result<(), ApplyResult> {
        let cached_original = cached.and_then(|s| s.modified.original_primary_device.clone());
        let ensure_primary = config.device_prep() == crate::types::DevicePrep::EnsurePrimary;
        if !ensure_primary && cached_original.is_none() {
            return Ok(());
        }

        let current = self
            .current_primary_in(&modified.topology)
            .ok_or(ApplyResult::PrimaryDevicePrepFailed)?;

        if ensure_primary {
            if &current != device_to_configure {
                if self.driver.set_as_primary(device_to_configure).is_err() {
                    return Err(ApplyResult::PrimaryDevicePrepFailed);
                }
                let driver = Rc::clone(&self.driver);
                let old_primary = current.clone();
                guards.push(move || {
                    if driver.set_as_primary(&old_primary).is_err() {
                        warn!("failed to restore pre-apply primary device");
                    }
                });
                modified.original_primary_device = Some(cached_original.unwrap_or(current));
            } else {
                modified.original_primary_device = cached_original;
            }
        } else if let Some(cached_original) = cached_original {
            if cached_original != current {
                if self.driver.set_as_primary(&cached_original).is_err() {
                    return Err(ApplyResult::PrimaryDevicePrepFailed);
                }
                let driver = Rc::clone(&self.driver);
                let pre_restore = current;
                guards.push(move || {
                    if driver.set_as_primary(&pre_restore).is_err() {
                        warn!("failed to restore pre-restore primary device");
                    }
                });
            }
            modified.original_primary_device = None;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare_display_modes(
        &self,
        config: &SingleDisplayConfiguration,
        configuring_primary: bool,
        target: &DeviceId,
        additional: &[DeviceId],
        topology: &ActiveTopology,
        cached: Option<&SingleDisplayConfigState>,
        modified: &mut ModifiedState,
        guards: &mut GuardStack,
        touched: &mut bool,
    ) -> Result<(), ApplyResult> {
        let ids: Vec<DeviceId> = planning::flatten_topology(topology).into_iter().collect();
        let want_change = config.resolution.is_some() || config.refresh_rate.is_some();
        let cached_original: DeviceDisplayModeMap = cached
            .map(|s| s.modified.original_modes.clone())
            .unwrap_or_default();

        if want_change {
            let current = self.driver.current_display_modes(&ids);
            let refresh_rate = config.refresh_rate.map(|r| r.to_rational());
            let new_modes = planning::compute_new_display_modes(
                config.resolution,
                refresh_rate,
                configuring_primary,
                target,
                additional,
                &current,
            );
            let pre_change: DeviceDisplayModeMap = new_modes
                .keys()
                .filter_map(|id| current.get(id).map(|m| (id.clone(), *m)))
                .collect();

            if new_modes == pre_change {
                modified.original_modes = cached_original;
                return Ok(());
            }

            *touched = true;
            if self.driver.set_display_modes(&new_modes).is_err() {
                return Err(ApplyResult::DisplayModePrepFailed);
            }
            let observed = self.driver.current_display_modes(&ids);
            let observed: DeviceDisplayModeMap = pre_change
                .keys()
                .filter_map(|id| observed.get(id).map(|m| (id.clone(), *m)))
                .collect();
            if observed != pre_change {
                let driver = Rc::clone(&self.driver);
                let restore = pre_change.clone();
                guards.push(move || {
                    if driver.set_display_modes(&restore).is_err() {
                        warn!("failed to restore pre-apply display modes");
                    }
                });
            }
            modified.original_modes = if cached_original.is_empty() {
                pre_change
            } else {
                cached_original
            };
        } else if !cached_original.is_empty() {
            let current = self.driver.current_display_modes(&ids);
            let relevant_current: DeviceDisplayModeMap = cached_original
                .keys()
                .filter_map(|id| current.get(id).map(|m| (id.clone(), *m)))
                .collect();
            if relevant_current != cached_original {
                *touched = true;
                if self.driver.set_display_modes(&cached_original).is_err() {
                    return Err(ApplyResult::DisplayModePrepFailed);
                }
                let observed = self.driver.current_display_modes(&ids);
                let observed: DeviceDisplayModeMap = relevant_current
                    .keys()
                    .filter_map(|id| observed.get(id).map(|m| (id.clone(), *m)))
                    .collect();
                if observed != relevant_current {
                    let driver = Rc::clone(&self.driver);
                    let restore = relevant_current.clone();
                    guards.push(move || {
                        if driver.set_display_modes(&restore).is_err() {
                            warn!("failed to restore pre-restore display modes");
                        }
                    });
                }
            }
            modified.original_modes = DeviceDisplayModeMap::new();
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare_hdr_states(
        &self,
        config: &SingleDisplayConfiguration,
        configuring_primary: bool,
        target: &DeviceId,
        additional: &[DeviceId],
        topology: &ActiveTopology,
        cached: Option<&SingleDisplayConfigState>,
        modified: &mut ModifiedState,
        guards: &mut GuardStack,
        touched: &mut bool,
    ) -> Result<(), ApplyResult> {
        let ids: Vec<DeviceId> = planning::flatten_topology(topology).into_iter().collect();
        let want_change = config.hdr_state.is_some();
        let cached_original: HdrStateMap = cached
            .map(|s| s.modified.original_hdr_states.clone())
            .unwrap_or_default();

        if want_change {
            let current = self.driver.current_hdr_states(&ids);
            let new_states = planning::compute_new_hdr_states(
                config.hdr_state,
                configuring_primary,
                target,
                additional,
                &current,
            );
            let pre_change: HdrStateMap = new_states
                .keys()
                .filter_map(|id| current.get(id).map(|s| (id.clone(), *s)))
                .collect();

            if new_states == pre_change {
                modified.original_hdr_states = cached_original;
                return Ok(());
            }

            *touched = true;
            if self.driver.set_hdr_states(&new_states).is_err() {
                return Err(ApplyResult::HdrStatePrepFailed);
            }
            let driver = Rc::clone(&self.driver);
            let restore = pre_change.clone();
            guards.push(move || {
                if driver.set_hdr_states(&restore).is_err() {
                    warn!("failed to restore pre-apply HDR states");
                }
            });
            modified.original_hdr_states = if cached_original.is_empty() {
                pre_change
            } else {
                cached_original
            };
        } else if !cached_original.is_empty() {
            let current = self.driver.current_hdr_states(&ids);
            let relevant_current: HdrStateMap = cached_original
                .keys()
                .filter_map(|id| current.get(id).map(|s| (id.clone(), *s)))
                .collect();
            if relevant_current != cached_original {
                *touched = true;
                if self.driver.set_hdr_states(&cached_original).is_err() {
                    return Err(ApplyResult::HdrStatePrepFailed);
                }
                let driver = Rc::clone(&self.driver);
                let restore = relevant_current.clone();
                guards.push(move || {
                    if driver.set_hdr_states(&restore).is_err() {
                        warn!("failed to restore pre-restore HDR states");
                    }
                });
            }
            modified.original_hdr_states = HdrStateMap::new();
        }
        Ok(())
    }
}
