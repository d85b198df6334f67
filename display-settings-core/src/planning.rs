//! Pure planning utilities: the functions that turn a requested
//! configuration plus the currently-observed OS state into the topology,
//! modes and HDR states the engine should apply or restore. See spec.md
//! §4.4.

use std::collections::HashSet;
use std::time::Duration;

use crate::ports::display_driver::{DisplayDriver, DriverError, EnumeratedDevice};
use crate::types::{
    ActiveTopology, DeviceDisplayModeMap, DeviceId, DevicePrep, DisplayMode, HdrState, HdrStateMap,
    InitialState, Rational, Resolution,
};

pub fn flatten_topology(topology: &ActiveTopology) -> HashSet<DeviceId> {
    topology.groups().iter().flatten().cloned().collect()
}

/// One group per enumerated device. Used as a recovery fallback when no
/// other topology can be derived.
pub fn create_full_extended_topology(enumerated: &[EnumeratedDevice]) -> ActiveTopology {
    ActiveTopology::new(
        enumerated
            .iter()
            .map(|d| vec![d.device_id.clone()])
            .collect(),
    )
}

fn is_primary(enumerated: &[EnumeratedDevice], id: &DeviceId) -> bool {
    enumerated
        .iter()
        .find(|d| &d.device_id == id)
        .and_then(|d| d.info.as_ref())
        .map(|info| info.primary)
        .unwrap_or(false)
}

/// The first id in the flattened topology (in topology order: group order,
/// then within-group order) whose `is_primary` is true. Empty string if
/// none.
pub fn get_primary_device(enumerated: &[EnumeratedDevice], topology: &ActiveTopology) -> DeviceId {
    topology
        .groups()
        .iter()
        .flatten()
        .find(|id| is_primary(enumerated, id))
        .cloned()
        .unwrap_or_else(|| DeviceId::new(""))
}

fn all_primary_devices(enumerated: &[EnumeratedDevice]) -> HashSet<DeviceId> {
    enumerated
        .iter()
        .filter(|d| d.info.as_ref().map(|i| i.primary).unwrap_or(false))
        .map(|d| d.device_id.clone())
        .collect()
}

/// If `prev` exists, pass it through unchanged. Otherwise take
/// `topology_before` as the initial topology and all currently-primary
/// devices as `primary_devices`. Fails if no primary device exists.
pub fn compute_initial_state(
    prev: Option<&InitialState>,
    topology_before: &ActiveTopology,
    enumerated: &[EnumeratedDevice],
) -> Option<InitialState> {
    if let Some(prev) = prev {
        return Some(prev.clone());
    }
    let primary_devices = all_primary_devices(enumerated);
    if primary_devices.is_empty() {
        return None;
    }
    Some(InitialState {
        topology: topology_before.clone(),
        primary_devices,
    })
}

/// Removes vanished devices from the topology and primary set. If the
/// primary set goes empty, substitutes currently-enumerated primaries.
/// Fails if the stripped topology ends up empty.
pub fn strip_initial_state(
    initial: &InitialState,
    enumerated: &[EnumeratedDevice],
) -> Option<InitialState> {
    let known: HashSet<&DeviceId> = enumerated.iter().map(|d| &d.device_id).collect();

    let stripped_groups: Vec<Vec<DeviceId>> = initial
        .topology
        .groups()
        .iter()
        .map(|group| {
            group
                .iter()
                .filter(|id| known.contains(id))
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect();
    let stripped_topology = ActiveTopology::new(stripped_groups);
    if stripped_topology.is_empty() {
        return None;
    }

    let mut stripped_primaries: HashSet<DeviceId> = initial
        .primary_devices
        .iter()
        .filter(|id| known.contains(id))
        .cloned()
        .collect();
    if stripped_primaries.is_empty() {
        stripped_primaries = all_primary_devices(enumerated);
    }

    Some(InitialState {
        topology: stripped_topology,
        primary_devices: stripped_primaries,
    })
}

/// spec.md §4.4: `compute_new_topology`.
pub fn compute_new_topology(
    device_prep: DevicePrep,
    configuring_primary: bool,
    target: &DeviceId,
    additional: &[DeviceId],
    initial_topology: &ActiveTopology,
) -> ActiveTopology {
    match device_prep {
        DevicePrep::VerifyOnly => initial_topology.clone(),
        DevicePrep::EnsureOnlyDisplay => {
            if configuring_primary {
                let mut group = vec![target.clone()];
                group.extend(additional.iter().cloned());
                ActiveTopology::new(vec![group])
            } else {
                ActiveTopology::new(vec![vec![target.clone()]])
            }
        }
        DevicePrep::EnsureActive | DevicePrep::EnsurePrimary => {
            if flatten_topology(initial_topology).contains(target) {
                initial_topology.clone()
            } else {
                let mut groups = initial_topology.groups().to_vec();
                groups.push(vec![target.clone()]);
                ActiveTopology::new(groups)
            }
        }
    }
}

/// spec.md §4.4: `compute_new_topology_and_metadata`. Returns
/// `(new_topology, device_to_configure, additional)`; `additional` is
/// sorted by device id for determinism (the underlying primary-device set
/// has no intrinsic order).
pub fn compute_new_topology_and_metadata(
    device_prep: DevicePrep,
    device_id: Option<&DeviceId>,
    initial_state: &InitialState,
) -> (ActiveTopology, DeviceId, Vec<DeviceId>) {
    let configuring_primary = device_id.is_none();
    let device_to_configure = device_id
        .cloned()
        .unwrap_or_else(|| first_in_order(&initial_state.primary_devices, &initial_state.topology));

    let additional_before: Vec<DeviceId> = if configuring_primary {
        let mut rest: Vec<DeviceId> = initial_state
            .primary_devices
            .iter()
            .filter(|d| **d != device_to_configure)
            .cloned()
            .collect();
        rest.sort();
        rest
    } else {
        group_mates(&initial_state.topology, &device_to_configure)
    };

    let new_topology = compute_new_topology(
        device_prep,
        configuring_primary,
        &device_to_configure,
        &additional_before,
        &initial_state.topology,
    );

    let additional_after: Vec<DeviceId> = if configuring_primary {
        let flat_new = flatten_topology(&new_topology);
        let mut rest: Vec<DeviceId> = additional_before
            .into_iter()
            .filter(|d| flat_new.contains(d))
            .collect();
        rest.sort();
        rest
    } else {
        group_mates(&new_topology, &device_to_configure)
    };

    (new_topology, device_to_configure, additional_after)
}

fn group_mates(topology: &ActiveTopology, target: &DeviceId) -> Vec<DeviceId> {
    let mut mates: Vec<DeviceId> = topology
        .group_of(target)
        .map(|group| {
            group
                .iter()
                .filter(|d| *d != target)
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    mates.sort();
    mates
}

/// Deterministic "first" element of `set` as ordered by `topology`'s group
/// order, falling back to sorted order for members not present in the
/// topology.
fn first_in_order(set: &HashSet<DeviceId>, topology: &ActiveTopology) -> DeviceId {
    if let Some(id) = topology
        .groups()
        .iter()
        .flatten()
        .find(|id| set.contains(*id))
    {
        return id.clone();
    }
    let mut sorted: Vec<&DeviceId> = set.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .next()
        .cloned()
        .unwrap_or_else(|| DeviceId::new(""))
}

fn configure_targets(
    configuring_primary: bool,
    target: &DeviceId,
    additional: &[DeviceId],
    field_set: bool,
    field_is_primary_scoped: bool,
) -> HashSet<DeviceId> {
    if !field_set {
        return HashSet::new();
    }
    if !field_is_primary_scoped || configuring_primary {
        let mut set: HashSet<DeviceId> = additional.iter().cloned().collect();
        set.insert(target.clone());
        set
    } else {
        HashSet::from([target.clone()])
    }
}

/// spec.md §4.4: `compute_new_display_modes`. Returns a mode for every
/// device in `originals`, unchanged except for `target ∪ additional`.
/// Resolution changes apply to `target ∪ additional` unconditionally
/// (duplicates must share a resolution); refresh-rate changes apply to
/// `target ∪ additional` only when configuring the primary group,
/// otherwise just `target`.
pub fn compute_new_display_modes(
    resolution: Option<Resolution>,
    refresh_rate: Option<Rational>,
    configuring_primary: bool,
    target: &DeviceId,
    additional: &[DeviceId],
    originals: &DeviceDisplayModeMap,
) -> DeviceDisplayModeMap {
    let resolution_targets =
        configure_targets(configuring_primary, target, additional, resolution.is_some(), false);
    let rate_targets =
        configure_targets(configuring_primary, target, additional, refresh_rate.is_some(), true);

    let mut result = originals.clone();
    let changed_ids: Vec<&DeviceId> = std::iter::once(target).chain(additional.iter()).collect();
    for id in changed_ids {
        let Some(mode) = result.get_mut(id) else {
            continue;
        };
        if let Some(res) = resolution {
            if resolution_targets.contains(id) {
                mode.resolution = res;
            }
        }
        if let Some(rate) = refresh_rate {
            if rate_targets.contains(id) {
                mode.refresh_rate = rate;
            }
        }
    }
    result
}

/// spec.md §4.4: `compute_new_hdr_states`. Returns a state for every device
/// in `originals`, unchanged except for `target ∪ additional`. Devices
/// whose original state is `None` (unsupported) are left untouched.
pub fn compute_new_hdr_states(
    hdr_state: Option<HdrState>,
    configuring_primary: bool,
    target: &DeviceId,
    additional: &[DeviceId],
    originals: &HdrStateMap,
) -> HdrStateMap {
    let targets =
        configure_targets(configuring_primary, target, additional, hdr_state.is_some(), true);

    let mut result = originals.clone();
    let changed_ids: Vec<&DeviceId> = std::iter::once(target).chain(additional.iter()).collect();
    for id in changed_ids {
        let Some(slot) = result.get_mut(id) else {
            continue;
        };
        if let (Some(new_state), true, true) = (hdr_state, targets.contains(id), slot.is_some()) {
            *slot = Some(new_state);
        }
    }
    result
}

/// Workaround for a Windows high-contrast bug after display-settings
/// writes: flip enabled HDR outputs Off, wait, then On. Applied
/// unconditionally whenever a write touched the OS, even on pure revert —
/// see the open questions in spec.md §9(iii).
pub fn blank_hdr_states(
    driver: &dyn DisplayDriver,
    delay: Option<Duration>,
) -> Result<(), DriverError> {
    let Some(delay) = delay else {
        return Ok(());
    };
    let enumerated = driver.enumerate()?;
    let enabled_ids: Vec<DeviceId> = enumerated
        .iter()
        .filter(|d| {
            d.info
                .as_ref()
                .map(|i| i.hdr_state == Some(HdrState::Enabled))
                .unwrap_or(false)
        })
        .map(|d| d.device_id.clone())
        .collect();
    if enabled_ids.is_empty() {
        return Ok(());
    }

    let off: HdrStateMap = enabled_ids
        .iter()
        .cloned()
        .map(|id| (id, Some(HdrState::Disabled)))
        .collect();
    driver.set_hdr_states(&off)?;
    std::thread::sleep(delay);
    let on: HdrStateMap = enabled_ids
        .into_iter()
        .map(|id| (id, Some(HdrState::Enabled)))
        .collect();
    driver.set_hdr_states(&on)?;
    Ok(())
}

/// Equality within 0.9 Hz, necessary because the OS may round-trip
/// rationals like 60 Hz as 59.95 Hz.
pub fn fuzzy_refresh_rate(a: Rational, b: Rational) -> bool {
    if a.den == 0 || b.den == 0 {
        return false;
    }
    (a.as_f64() - b.as_f64()).abs() <= 0.9
}

pub fn fuzzy_mode(a: DisplayMode, b: DisplayMode) -> bool {
    a.resolution == b.resolution && fuzzy_refresh_rate(a.refresh_rate, b.refresh_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_refresh_rate_matches_spec_examples() {
        assert!(fuzzy_refresh_rate(Rational::new(60, 1), Rational::new(60, 1)));
        assert!(fuzzy_refresh_rate(Rational::new(60, 1), Rational::new(5985, 100)));
        assert!(!fuzzy_refresh_rate(Rational::new(60, 1), Rational::new(5900, 100)));
    }

    #[test]
    fn fuzzy_refresh_rate_rejects_zero_denominator() {
        assert!(!fuzzy_refresh_rate(Rational::new(60, 0), Rational::new(60, 1)));
    }

    #[test]
    fn flatten_topology_collects_all_ids() {
        let t = ActiveTopology::new(vec![
            vec![DeviceId::new("D1"), DeviceId::new("D2")],
            vec![DeviceId::new("D3")],
        ]);
        let flat = flatten_topology(&t);
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn compute_new_topology_verify_only_is_identity() {
        let t = ActiveTopology::new(vec![vec![DeviceId::new("D1")]]);
        let out = compute_new_topology(
            DevicePrep::VerifyOnly,
            false,
            &DeviceId::new("D1"),
            &[],
            &t,
        );
        assert_eq!(out, t);
    }

    #[test]
    fn compute_new_topology_ensure_only_display_primary_case() {
        let t = ActiveTopology::new(vec![
            vec![DeviceId::new("D1"), DeviceId::new("D2")],
            vec![DeviceId::new("D3")],
        ]);
        let out = compute_new_topology(
            DevicePrep::EnsureOnlyDisplay,
            true,
            &DeviceId::new("D1"),
            &[DeviceId::new("D2")],
            &t,
        );
        assert_eq!(
            out,
            ActiveTopology::new(vec![vec![DeviceId::new("D1"), DeviceId::new("D2")]])
        );
    }

    #[test]
    fn compute_new_topology_ensure_only_display_non_primary_case() {
        let t = ActiveTopology::new(vec![
            vec![DeviceId::new("D1"), DeviceId::new("D2")],
            vec![DeviceId::new("D3")],
        ]);
        let out = compute_new_topology(
            DevicePrep::EnsureOnlyDisplay,
            false,
            &DeviceId::new("D1"),
            &[DeviceId::new("D2")],
            &t,
        );
        assert_eq!(out, ActiveTopology::new(vec![vec![DeviceId::new("D1")]]));
    }

    #[test]
    fn compute_new_topology_ensure_active_appends_missing_device() {
        let t = ActiveTopology::new(vec![vec![DeviceId::new("D3")]]);
        let out = compute_new_topology(
            DevicePrep::EnsureActive,
            false,
            &DeviceId::new("D1"),
            &[],
            &t,
        );
        assert_eq!(
            out,
            ActiveTopology::new(vec![vec![DeviceId::new("D3")], vec![DeviceId::new("D1")]])
        );
    }

    #[test]
    fn compute_new_display_modes_resolution_applies_to_duplicates() {
        let mut originals = DeviceDisplayModeMap::new();
        originals.insert(
            DeviceId::new("D1"),
            DisplayMode {
                resolution: Resolution { width: 1920, height: 1080 },
                refresh_rate: Rational::new(120, 1),
            },
        );
        originals.insert(
            DeviceId::new("D2"),
            DisplayMode {
                resolution: Resolution { width: 1920, height: 1080 },
                refresh_rate: Rational::new(60, 1),
            },
        );
        originals.insert(
            DeviceId::new("D3"),
            DisplayMode {
                resolution: Resolution { width: 2560, height: 1440 },
                refresh_rate: Rational::new(30, 1),
            },
        );
        let new_modes = compute_new_display_modes(
            Some(Resolution { width: 1920, height: 1080 }),
            None,
            false,
            &DeviceId::new("D1"),
            &[DeviceId::new("D2")],
            &originals,
        );
        assert_eq!(new_modes.len(), 3);
        assert_eq!(
            new_modes[&DeviceId::new("D2")].resolution,
            Resolution { width: 1920, height: 1080 }
        );
        assert_eq!(new_modes[&DeviceId::new("D2")].refresh_rate, Rational::new(60, 1));
        assert_eq!(
            new_modes[&DeviceId::new("D3")],
            originals[&DeviceId::new("D3")]
        );
    }

    #[test]
    fn compute_new_hdr_states_ignores_unsupported_device() {
        let mut originals = HdrStateMap::new();
        originals.insert(DeviceId::new("D1"), Some(HdrState::Disabled));
        originals.insert(DeviceId::new("D2"), Some(HdrState::Disabled));
        originals.insert(DeviceId::new("D3"), None);
        let new_states = compute_new_hdr_states(
            Some(HdrState::Enabled),
            false,
            &DeviceId::new("D1"),
            &[DeviceId::new("D2"), DeviceId::new("D3")],
            &originals,
        );
        assert_eq!(new_states[&DeviceId::new("D1")], Some(HdrState::Enabled));
        assert_eq!(new_states[&DeviceId::new("D2")], Some(HdrState::Disabled));
        assert_eq!(new_states[&DeviceId::new("D3")], None);
    }
}
