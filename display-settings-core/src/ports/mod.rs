pub mod audio;
pub mod display_driver;
pub mod persistence;

pub use audio::{AudioContext, NoopAudioContext};
pub use display_driver::{DeviceInfo, DisplayDriver, DriverError, EnumeratedDevice};
pub use persistence::{NoopPersistence, Persistence};
