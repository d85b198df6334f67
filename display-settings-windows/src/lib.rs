//! Concrete Win32 adapters for the three ports `display-settings-core`
//! defines: [`ccd::WinDisplayDriver`] (`DisplayDriver`),
//! [`persistence::FilePersistence`] (`Persistence`) and
//! [`audio::WindowsAudioContext`] (`AudioContext`). No policy lives here —
//! this crate only talks to the OS the way spec.md §4.1/§4.2/§4.3 describe.

pub mod audio;
pub mod ccd;
pub mod device_id;
pub mod persistence;
mod win32;
