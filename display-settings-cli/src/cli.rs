//! Subcommands exercising `SettingsManager` end to end. Structured the way
//! `hagias-monitor-service/src/command.rs` structures its `Command` enum +
//! `run` dispatcher, adapted to this engine's synchronous API (no `tokio`
//! needed here — `SettingsManager` never awaits anything, per spec.md §5).

use std::rc::Rc;

use anyhow::{Context as _, Result, bail};
use display_settings_core::{
    DeviceId, DevicePrep, HdrState, Rational, RefreshRateRequest, Resolution, SettingsManager,
    SingleDisplayConfiguration, WinWorkarounds,
};
use display_settings_windows::audio::WindowsAudioContext;
use display_settings_windows::ccd::WinDisplayDriver;
use display_settings_windows::persistence::FilePersistence;
use tracing::info;

use crate::config::HostConfig;

type Manager = SettingsManager<WinDisplayDriver, FilePersistence, WindowsAudioContext>;

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Place the OS into the requested single-display configuration.
    Apply {
        /// Target device id; omitted targets the primary device group.
        #[arg(long)]
        device_id: Option<String>,
        /// How aggressively to re-arrange the topology around the target.
        #[arg(long, value_enum, default_value = "ensure-active")]
        prep: DevicePrepArg,
        /// Requested horizontal resolution; requires `--height`.
        #[arg(long, requires = "height")]
        width: Option<u32>,
        /// Requested vertical resolution; requires `--width`.
        #[arg(long, requires = "width")]
        height: Option<u32>,
        /// Requested refresh rate, either `N/D` (e.g. `60/1`) or a decimal
        /// (e.g. `59.94`).
        #[arg(long)]
        refresh_rate: Option<String>,
        /// Requested HDR state.
        #[arg(long, value_enum)]
        hdr: Option<HdrStateArg>,
    },
    /// Undo every tracked modification and restore the pre-apply state.
    Revert,
    /// Forget any tracked state without guaranteeing OS recovery.
    ResetPersistence,
    /// Print the current topology and the cached persisted state as JSON.
    Show,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum DevicePrepArg {
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

impl From<DevicePrepArg> for DevicePrep {
    fn from(value: DevicePrepArg) -> Self {
        match value {
            DevicePrepArg::VerifyOnly => DevicePrep::VerifyOnly,
            DevicePrepArg::EnsureActive => DevicePrep::EnsureActive,
            DevicePrepArg::EnsurePrimary => DevicePrep::EnsurePrimary,
            DevicePrepArg::EnsureOnlyDisplay => DevicePrep::EnsureOnlyDisplay,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum HdrStateArg {
    Enabled,
    Disabled,
}

impl From<HdrStateArg> for HdrState {
    fn from(value: HdrStateArg) -> Self {
        match value {
            HdrStateArg::Enabled => HdrState::Enabled,
            HdrStateArg::Disabled => HdrState::Disabled,
        }
    }
}

fn parse_refresh_rate(raw: &str) -> Result<RefreshRateRequest> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: u32 = num.trim().parse().context("invalid refresh rate numerator")?;
        let den: u32 = den.trim().parse().context("invalid refresh rate denominator")?;
        return Ok(RefreshRateRequest::Rational(Rational::new(num, den)));
    }
    let value: f64 = raw.parse().context("invalid refresh rate")?;
    Ok(RefreshRateRequest::F64(value))
}

fn build_manager(config: &HostConfig) -> Manager {
    let driver = Rc::new(WinDisplayDriver::new());
    let persistence = FilePersistence::new(config.persistence_path.clone());
    let audio = Rc::new(WindowsAudioContext::new());
    let workarounds = WinWorkarounds {
        hdr_blank_delay: config.hdr_blank_delay(),
    };
    SettingsManager::new(driver, persistence, audio, workarounds)
}

/// Runs `command`, returning the process exit code. Exit codes surface
/// `ApplyResult`/`RevertResult` verbatim per spec.md §6 — `0` for `Ok`,
/// a small fixed non-zero code per other variant.
pub fn run(command: Command, config: &HostConfig) -> Result<i32> {
    match command {
        Command::Apply { device_id, prep, width, height, refresh_rate, hdr } => {
            let resolution = match (width, height) {
                (Some(width), Some(height)) => Some(Resolution { width, height }),
                (None, None) => None,
                _ => bail!("--width and --height must be given together"),
            };
            let refresh_rate = refresh_rate.as_deref().map(parse_refresh_rate).transpose()?;
            let request = SingleDisplayConfiguration {
                device_id: device_id.map(DeviceId::new),
                device_prep: Some(prep.into()),
                resolution,
                refresh_rate,
                hdr_state: hdr.map(Into::into),
            };
            let mut manager = build_manager(config);
            let result = manager.apply(&request);
            info!(?result, "apply command finished");
            println!("{result:?}");
            Ok(apply_exit_code(result))
        }
        Command::Revert => {
            let mut manager = build_manager(config);
            let result = manager.revert();
            info!(?result, "revert command finished");
            println!("{result:?}");
            Ok(revert_exit_code(result))
        }
        Command::ResetPersistence => {
            let mut manager = build_manager(config);
            let result = manager.reset_persistence();
            info!(?result, "reset-persistence command finished");
            println!("{result:?}");
            Ok(revert_exit_code(result))
        }
        Command::Show => {
            let manager = build_manager(config);
            let state = manager.cached_state();
            let json = serde_json::to_string_pretty(&state)
                .context("failed to serialize cached state")?;
            println!("{json}");
            Ok(0)
        }
    }
}

fn apply_exit_code(result: display_settings_core::ApplyResult) -> i32 {
    use display_settings_core::ApplyResult;
    match result {
        ApplyResult::Ok => 0,
        ApplyResult::ApiTemporarilyUnavailable => 10,
        ApplyResult::DevicePrepFailed => 11,
        ApplyResult::PrimaryDevicePrepFailed => 12,
        ApplyResult::DisplayModePrepFailed => 13,
        ApplyResult::HdrStatePrepFailed => 14,
        ApplyResult::PersistenceSaveFailed => 15,
    }
}

fn revert_exit_code(result: display_settings_core::RevertResult) -> i32 {
    use display_settings_core::RevertResult;
    match result {
        RevertResult::Ok => 0,
        RevertResult::ApiTemporarilyUnavailable => 10,
        RevertResult::TopologyIsInvalid => 20,
        RevertResult::SwitchingTopologyFailed => 21,
        RevertResult::RevertingHdrStatesFailed => 22,
        RevertResult::RevertingDisplayModesFailed => 23,
        RevertResult::RevertingPrimaryDeviceFailed => 24,
        RevertResult::PersistenceSaveFailed => 15,
    }
}
