//! The platform-independent single-display configuration engine: plans and
//! applies changes to one display's topology membership, resolution,
//! refresh rate and HDR state, remembers how to undo them, and reverts on
//! demand. Talks to the OS, to persistent storage and to the audio stack
//! only through the [`ports`] traits — no Windows API calls live here.

pub mod guard;
pub mod persistent_state;
pub mod planning;
pub mod ports;
pub mod settings_manager;
pub mod types;

pub use persistent_state::{PersistentState, PersistentStateError};
pub use ports::{AudioContext, DisplayDriver, DriverError, NoopAudioContext, NoopPersistence, Persistence};
pub use settings_manager::SettingsManager;
pub use types::{
    ActiveTopology, ApplyResult, DeviceDisplayModeMap, DeviceId, DevicePrep, DisplayMode,
    HdrState, HdrStateMap, InitialState, ModifiedState, Rational, RefreshRateRequest, Resolution,
    RevertResult, SingleDisplayConfigState, SingleDisplayConfiguration, WinWorkarounds,
};
