//! The DisplayDriver port: the abstraction over the OS Connection-and-
//! Configuration-Database API. Out of scope for this core per spec.md §1 —
//! only the interface the rest of the engine programs against lives here;
//! the real CCD wrapper lives in the `display-settings-windows` adapter
//! crate.

use crate::types::{
    ActiveTopology, DeviceDisplayModeMap, DeviceId, HdrState, HdrStateMap, Rational, Resolution,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceInfo {
    pub resolution: Resolution,
    pub scale: Rational,
    pub refresh_rate: Rational,
    pub primary: bool,
    pub origin: Point,
    pub hdr_state: Option<HdrState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratedDevice {
    pub device_id: DeviceId,
    pub display_name: String,
    pub friendly_name: String,
    pub edid: Vec<u8>,
    /// `None` iff the device is currently inactive.
    pub info: Option<DeviceInfo>,
}

/// Errors surfaced by the underlying OS API call. Every `DisplayDriver`
/// operation that can fail fails with one of these.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("display API is not currently available: {0}")]
    Unavailable(String),
    #[error("failed to query display configuration: {0}")]
    QueryFailed(String),
    #[error("failed to apply display configuration: {0}")]
    SetFailed(String),
    #[error("observed topology did not match the requested topology after set_topology")]
    TopologyMismatch,
    #[error("observed display mode did not match the requested mode after set_display_modes")]
    ModeMismatch,
    #[error("device not found: {0}")]
    NotFound(DeviceId),
}

/// Queries and mutates OS display topology, modes, primary device and HDR
/// state. All operations are synchronous. Implementations may be shared
/// across guard closures via `Rc`/`Arc`, so every method takes `&self`;
/// implementations needing mutable bookkeeping use interior mutability.
pub trait DisplayDriver {
    /// Probes whether the underlying `SetDisplayConfig`-equivalent call is
    /// currently reachable, by attempting a no-op validating call.
    fn is_api_access_available(&self) -> bool;

    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, DriverError>;

    /// Empty string if the device is inactive or missing.
    fn display_name(&self, device_id: &DeviceId) -> String;

    /// Duplicates are identified by equal source-origin points.
    fn current_topology(&self) -> Result<ActiveTopology, DriverError>;

    fn is_topology_valid(&self, topology: &ActiveTopology) -> bool;

    /// Set-equality, ignoring group/member ordering.
    fn is_topology_same(&self, a: &ActiveTopology, b: &ActiveTopology) -> bool {
        a == b
    }

    fn set_topology(&self, topology: &ActiveTopology) -> Result<(), DriverError>;

    fn current_display_modes(&self, ids: &[DeviceId]) -> DeviceDisplayModeMap;

    fn set_display_modes(&self, modes: &DeviceDisplayModeMap) -> Result<(), DriverError>;

    fn is_primary(&self, device_id: &DeviceId) -> bool;

    fn set_as_primary(&self, device_id: &DeviceId) -> Result<(), DriverError>;

    fn current_hdr_states(&self, ids: &[DeviceId]) -> HdrStateMap;

    fn set_hdr_states(&self, states: &HdrStateMap) -> Result<(), DriverError>;
}
