//! Wire and domain types for the single-display configuration engine.
//!
//! Field names mirror the canonical JSON shapes from the public interface:
//! `snake_case` throughout, matching what a `serde_json` round-trip through
//! the persisted blob must reproduce bit-for-bit.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque, stable identity for a physical display. See the device-id
/// derivation contract: a hash of EDID bytes and the stable part of the
/// Windows instance id, formatted as a brace-wrapped UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The OS-assigned logical name (`\\.\DISPLAY<n>`). Volatile across reboots;
/// never used as identity, only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayName(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A refresh rate expressed as a rational, as the CCD API reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    #[serde(rename = "numerator")]
    pub num: u32,
    #[serde(rename = "denominator")]
    pub den: u32,
}

impl Rational {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Quantizes a floating point refresh rate the way the host API does:
    /// `Rational(round(x * 10000), 10000)`.
    pub fn from_f64(value: f64) -> Self {
        Self {
            num: (value * 10000.0).round() as u32,
            den: 10000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub resolution: Resolution,
    pub refresh_rate: Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HdrState {
    Disabled,
    Enabled,
}

/// An ordered list of topology groups. A group of size 1 is an extended
/// display; a group of size >= 2 is a duplicate group.
///
/// Equality between two topologies ignores the order of groups and the
/// order of device ids within a group (spec invariant: compare as sets of
/// sets), so `PartialEq` is implemented by hand rather than derived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveTopology(pub Vec<Vec<DeviceId>>);

impl ActiveTopology {
    pub fn new(groups: Vec<Vec<DeviceId>>) -> Self {
        Self(groups)
    }

    pub fn groups(&self) -> &[Vec<DeviceId>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|g| g.is_empty())
    }

    fn as_set_of_sets(&self) -> HashSet<Vec<DeviceId>> {
        self.0
            .iter()
            .map(|group| {
                let mut g = group.clone();
                g.sort();
                g
            })
            .collect()
    }

    /// The group containing `id`, if any.
    pub fn group_of<'a>(&'a self, id: &DeviceId) -> Option<&'a [DeviceId]> {
        self.0
            .iter()
            .find(|group| group.contains(id))
            .map(Vec::as_slice)
    }
}

impl PartialEq for ActiveTopology {
    fn eq(&self, other: &Self) -> bool {
        self.as_set_of_sets() == other.as_set_of_sets()
    }
}
impl Eq for ActiveTopology {}

pub type DeviceDisplayModeMap = HashMap<DeviceId, DisplayMode>;
pub type HdrStateMap = HashMap<DeviceId, Option<HdrState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DevicePrep {
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

/// The refresh rate as supplied in a request: either an exact rational or a
/// floating point value that gets quantized (see [`Rational::from_f64`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefreshRateRequest {
    Rational(Rational),
    F64(f64),
}

impl RefreshRateRequest {
    pub fn to_rational(self) -> Rational {
        match self {
            RefreshRateRequest::Rational(r) => r,
            RefreshRateRequest::F64(v) => Rational::from_f64(v),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SingleDisplayConfiguration {
    pub device_id: Option<DeviceId>,
    pub device_prep: Option<DevicePrep>,
    pub resolution: Option<Resolution>,
    pub refresh_rate: Option<RefreshRateRequest>,
    pub hdr_state: Option<HdrState>,
}

impl SingleDisplayConfiguration {
    pub fn device_prep(&self) -> DevicePrep {
        self.device_prep.unwrap_or(DevicePrep::EnsureActive)
    }
}

/// Frozen pre-modification baseline. Exists as long as any modification is
/// live; preserved verbatim across re-applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub topology: ActiveTopology,
    pub primary_devices: HashSet<DeviceId>,
}

/// The most recently recorded inverse of applied changes. What `revert`
/// undoes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifiedState {
    pub topology: ActiveTopology,
    #[serde(default)]
    pub original_modes: DeviceDisplayModeMap,
    #[serde(default)]
    pub original_hdr_states: HdrStateMap,
    #[serde(default)]
    pub original_primary_device: Option<DeviceId>,
}

impl ModifiedState {
    pub fn has_modifications(&self) -> bool {
        !self.original_modes.is_empty()
            || !self.original_hdr_states.is_empty()
            || self.original_primary_device.is_some()
    }

    /// A modified state reduced to just its topology, as persisted after a
    /// successful revert's mid-point (spec.md §4.8 step 5).
    pub fn topology_only(topology: ActiveTopology) -> Self {
        Self {
            topology,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDisplayConfigState {
    pub initial: InitialState,
    pub modified: ModifiedState,
}

/// Windows-specific quirk workarounds. `hdr_blank_delay`, if set, causes a
/// blank-on-write workaround to run after any OS write (see
/// `planning::blank_hdr_states`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WinWorkarounds {
    #[serde(default, with = "duration_millis_opt")]
    pub hdr_blank_delay: Option<Duration>,
}

mod duration_millis_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        v.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Outcome of [`crate::settings_manager::SettingsManager::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Ok,
    ApiTemporarilyUnavailable,
    DevicePrepFailed,
    PrimaryDevicePrepFailed,
    DisplayModePrepFailed,
    HdrStatePrepFailed,
    PersistenceSaveFailed,
}

/// Outcome of [`crate::settings_manager::SettingsManager::revert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertResult {
    Ok,
    ApiTemporarilyUnavailable,
    TopologyIsInvalid,
    SwitchingTopologyFailed,
    RevertingHdrStatesFailed,
    RevertingDisplayModesFailed,
    RevertingPrimaryDeviceFailed,
    PersistenceSaveFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_equality_ignores_ordering() {
        let a = ActiveTopology::new(vec![
            vec![DeviceId::new("D1"), DeviceId::new("D2")],
            vec![DeviceId::new("D3")],
        ]);
        let b = ActiveTopology::new(vec![
            vec![DeviceId::new("D3")],
            vec![DeviceId::new("D2"), DeviceId::new("D1")],
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn topology_inequality_detects_group_membership_changes() {
        let a = ActiveTopology::new(vec![vec![DeviceId::new("D1"), DeviceId::new("D2")]]);
        let b = ActiveTopology::new(vec![vec![DeviceId::new("D1")], vec![DeviceId::new("D2")]]);
        assert_ne!(a, b);
    }

    #[test]
    fn refresh_rate_quantizes_from_f64() {
        let r = Rational::from_f64(59.94);
        assert_eq!(r, Rational::new(599400, 10000));
    }

    #[test]
    fn modified_state_has_modifications() {
        let mut m = ModifiedState::topology_only(ActiveTopology::default());
        assert!(!m.has_modifications());
        m.original_primary_device = Some(DeviceId::new("D1"));
        assert!(m.has_modifications());
    }
}
