//! `WinDisplayDriver`: the concrete `DisplayDriver` adapter over the Win32
//! CCD API. Grounded on `hagias/src/windows_util.rs` (query/apply plumbing,
//! `LuidWrapper`/`IdAndAdapterId`) and `src/display.rs` (the `set_topology`/
//! `set_display_modes`/`set_as_primary`/`set_hdr_states` retry/verify
//! pattern described in spec.md §4.1).

use std::collections::HashMap;

use tracing::{debug, warn};
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE,
    DISPLAYCONFIG_MODE_INFO_TYPE_TARGET, DISPLAYCONFIG_PATH_ACTIVE, DISPLAYCONFIG_PATH_INFO,
};

use display_settings_core::ports::display_driver::{DeviceInfo, DriverError, EnumeratedDevice, Point};
use display_settings_core::{
    ActiveTopology, DeviceDisplayModeMap, DeviceId, DisplayDriver, DisplayMode, HdrState,
    HdrStateMap, Rational, Resolution,
};

use crate::device_id;
use crate::win32::{self, DisplayQueryType, WindowsDisplayConfig};

/// Stateless: every call re-queries the OS. The CCD API is the single
/// source of truth, so there is nothing to cache between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct WinDisplayDriver;

impl WinDisplayDriver {
    pub fn new() -> Self {
        Self
    }

    fn query(query: DisplayQueryType) -> Result<WindowsDisplayConfig, DriverError> {
        WindowsDisplayConfig::get(query).map_err(|e| DriverError::QueryFailed(e.to_string()))
    }

    /// The stable `DeviceId` for a path's target, derived from its monitor
    /// device path (EDID bytes are unavailable through this API surface —
    /// spec.md §1 excludes EDID parsing, so the fallback branch of the
    /// device-id contract is always the one taken here).
    fn target_device_id(config: &WindowsDisplayConfig, path: &DISPLAYCONFIG_PATH_INFO) -> DeviceId {
        let key = win32::IdAndAdapterId {
            id: path.targetInfo.id,
            adapter_id: path.targetInfo.adapterId.into(),
        };
        match config.target_device_names.get(&key) {
            Some(name) => match win32::get_monitor_device_path(name) {
                Some(path) => device_id::derive(&[], &path.to_string_lossy()),
                None => device_id::derive_from_path_only(&format!(
                    "{:?}/{}",
                    path.targetInfo.adapterId, path.targetInfo.id
                )),
            },
            None => device_id::derive_from_path_only(&format!(
                "{:?}/{}",
                path.targetInfo.adapterId, path.targetInfo.id
            )),
        }
    }

    fn source_mode<'a>(
        config: &'a WindowsDisplayConfig,
        path: &DISPLAYCONFIG_PATH_INFO,
    ) -> Option<&'a DISPLAYCONFIG_MODE_INFO> {
        if !win32::WindowsDisplayConfig::is_active(path) {
            return None;
        }
        let idx = unsafe { path.sourceInfo.Anonymous.modeInfoIdx } as usize;
        config.modes.get(idx).filter(|m| {
            m.infoType == DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE
                && win32::LuidWrapper::from(m.adapterId) == path.sourceInfo.adapterId.into()
        })
    }

    fn device_info(config: &WindowsDisplayConfig, path: &DISPLAYCONFIG_PATH_INFO) -> Option<DeviceInfo> {
        if !win32::WindowsDisplayConfig::is_active(path) {
            return None;
        }
        let source_mode = Self::source_mode(config, path)?;
        let source = unsafe { source_mode.Anonymous.sourceMode };
        let refresh_rate = Rational::new(
            path.targetInfo.refreshRate.Numerator,
            path.targetInfo.refreshRate.Denominator.max(1),
        );
        let key = win32::IdAndAdapterId {
            id: path.targetInfo.id,
            adapter_id: path.targetInfo.adapterId.into(),
        };
        let hdr_state = config
            .target_device_names
            .get(&key)
            .and_then(|_| {
                win32::get_advanced_color_info(path.targetInfo.id, path.targetInfo.adapterId).ok()
            })
            .flatten()
            .map(|enabled| {
                if enabled {
                    HdrState::Enabled
                } else {
                    HdrState::Disabled
                }
            });
        Some(DeviceInfo {
            resolution: Resolution {
                width: source.width,
                height: source.height,
            },
            scale: Rational::new(1, 1),
            refresh_rate,
            primary: source.position.x == 0 && source.position.y == 0,
            origin: Point {
                x: source.position.x,
                y: source.position.y,
            },
            hdr_state,
        })
    }
}

impl DisplayDriver for WinDisplayDriver {
    fn is_api_access_available(&self) -> bool {
        Self::query(DisplayQueryType::Active).is_ok()
    }

    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, DriverError> {
        let config = Self::query(DisplayQueryType::All)?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for path in &config.paths {
            let device_id = Self::target_device_id(&config, path);
            if !seen.insert(device_id.clone()) {
                continue;
            }
            let key = win32::IdAndAdapterId {
                id: path.targetInfo.id,
                adapter_id: path.targetInfo.adapterId.into(),
            };
            let (display_name, friendly_name) = match config.target_device_names.get(&key) {
                Some(name) => (
                    win32::get_monitor_device_path(name)
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    win32::get_monitor_friendly_device_name(name)
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ),
                None => (String::new(), String::new()),
            };
            out.push(EnumeratedDevice {
                device_id,
                display_name,
                friendly_name,
                edid: Vec::new(),
                info: Self::device_info(&config, path),
            });
        }
        Ok(out)
    }

    fn display_name(&self, device_id: &DeviceId) -> String {
        let Ok(config) = Self::query(DisplayQueryType::Active) else {
            return String::new();
        };
        config
            .paths
            .iter()
            .find(|p| &Self::target_device_id(&config, p) == device_id)
            .and_then(|p| {
                let key = win32::IdAndAdapterId {
                    id: p.targetInfo.id,
                    adapter_id: p.targetInfo.adapterId.into(),
                };
                config.target_device_names.get(&key)
            })
            .and_then(win32::get_monitor_device_path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn current_topology(&self) -> Result<ActiveTopology, DriverError> {
        let config = Self::query(DisplayQueryType::Active)?;
        let mut groups: Vec<(u32, windows::Win32::Foundation::LUID, Vec<DeviceId>)> = Vec::new();
        for path in &config.paths {
            if !win32::WindowsDisplayConfig::is_active(path) {
                continue;
            }
            let device_id = Self::target_device_id(&config, path);
            let source_adapter = path.sourceInfo.adapterId;
            match groups
                .iter_mut()
                .find(|(id, adapter, _)| *id == path.sourceInfo.id && adapter.HighPart == source_adapter.HighPart && adapter.LowPart == source_adapter.LowPart)
            {
                Some((_, _, members)) => members.push(device_id),
                None => groups.push((path.sourceInfo.id, source_adapter, vec![device_id])),
            }
        }
        Ok(ActiveTopology::new(groups.into_iter().map(|(_, _, m)| m).collect()))
    }

    fn is_topology_valid(&self, topology: &ActiveTopology) -> bool {
        topology.groups().iter().all(|g| !g.is_empty())
    }

    fn set_topology(&self, topology: &ActiveTopology) -> Result<(), DriverError> {
        let config =
            Self::query(DisplayQueryType::All).map_err(|_| DriverError::SetFailed("failed to query all paths before topology change".into()))?;

        let wanted: HashMap<DeviceId, usize> = topology
            .groups()
            .iter()
            .enumerate()
            .flat_map(|(group_idx, members)| members.iter().map(move |id| (id.clone(), group_idx)))
            .collect();

        let mut paths = config.paths.clone();
        let mut group_source: HashMap<usize, (u32, windows::Win32::Foundation::LUID)> = HashMap::new();
        for path in &mut paths {
            let device_id = Self::target_device_id(&config, path);
            match wanted.get(&device_id) {
                Some(&group_idx) => {
                    path.flags |= DISPLAYCONFIG_PATH_ACTIVE;
                    let (source_id, adapter_id) = *group_source
                        .entry(group_idx)
                        .or_insert((path.sourceInfo.id, path.sourceInfo.adapterId));
                    path.sourceInfo.id = source_id;
                    path.sourceInfo.adapterId = adapter_id;
                }
                None => path.flags &= !DISPLAYCONFIG_PATH_ACTIVE,
            }
        }
        paths.retain(|p| win32::WindowsDisplayConfig::is_active(p) || wanted.is_empty());

        let new_config = WindowsDisplayConfig {
            paths,
            modes: config.modes.clone(),
            source_device_names: config.source_device_names,
            target_device_names: config.target_device_names,
        };
        new_config
            .apply(true)
            .map_err(|e| DriverError::SetFailed(e.to_string()))?;

        let observed = self.current_topology()?;
        if !self.is_topology_same(&observed, topology) {
            warn!(?observed, requested = ?topology, "topology mismatch after set_topology");
            return Err(DriverError::TopologyMismatch);
        }
        debug!(?topology, "topology applied");
        Ok(())
    }

    fn current_display_modes(&self, ids: &[DeviceId]) -> DeviceDisplayModeMap {
        let Ok(config) = Self::query(DisplayQueryType::Active) else {
            return DeviceDisplayModeMap::new();
        };
        let mut out = DeviceDisplayModeMap::new();
        for path in &config.paths {
            let device_id = Self::target_device_id(&config, path);
            if !ids.contains(&device_id) {
                continue;
            }
            if let Some(info) = Self::device_info(&config, path) {
                out.insert(
                    device_id,
                    DisplayMode {
                        resolution: info.resolution,
                        refresh_rate: info.refresh_rate,
                    },
                );
            }
        }
        out
    }

    fn set_display_modes(&self, modes: &DeviceDisplayModeMap) -> Result<(), DriverError> {
        let config = Self::query(DisplayQueryType::Active)
            .map_err(|_| DriverError::SetFailed("failed to query active paths before mode change".into()))?;

        let mut changed: Vec<(DeviceId, DisplayMode)> = Vec::new();
        let mut new_paths = config.paths.clone();
        let mut new_modes = config.modes.clone();

        for path in &mut new_paths {
            let device_id = Self::target_device_id(&config, path);
            let Some(wanted) = modes.get(&device_id) else {
                continue;
            };
            if !win32::WindowsDisplayConfig::is_active(path) {
                continue;
            }
            let idx = unsafe { path.sourceInfo.Anonymous.modeInfoIdx } as usize;
            let Some(mode) = new_modes.get_mut(idx) else {
                continue;
            };
            if mode.infoType != DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE {
                continue;
            }
            let before = Self::device_info(&config, path);
            unsafe {
                mode.Anonymous.sourceMode.width = wanted.resolution.width;
                mode.Anonymous.sourceMode.height = wanted.resolution.height;
            }
            path.targetInfo.refreshRate.Numerator = wanted.refresh_rate.num;
            path.targetInfo.refreshRate.Denominator = wanted.refresh_rate.den;
            if let Some(before) = before {
                changed.push((
                    device_id,
                    DisplayMode {
                        resolution: before.resolution,
                        refresh_rate: before.refresh_rate,
                    },
                ));
            }
        }

        let new_config = WindowsDisplayConfig {
            paths: new_paths,
            modes: new_modes,
            source_device_names: config.source_device_names,
            target_device_names: config.target_device_names,
        };
        if let Err(e) = new_config.apply(false) {
            let rollback: DeviceDisplayModeMap = changed.into_iter().collect();
            if !rollback.is_empty() && self.set_display_modes(&rollback).is_err() {
                warn!("failed to roll back partially-applied display modes");
            }
            return Err(DriverError::SetFailed(e.to_string()));
        }
        Ok(())
    }

    fn is_primary(&self, device_id: &DeviceId) -> bool {
        let Ok(config) = Self::query(DisplayQueryType::Active) else {
            return false;
        };
        config
            .paths
            .iter()
            .find(|p| &Self::target_device_id(&config, p) == device_id)
            .and_then(|p| Self::device_info(&config, p))
            .map(|info| info.primary)
            .unwrap_or(false)
    }

    fn set_as_primary(&self, device_id: &DeviceId) -> Result<(), DriverError> {
        let config = Self::query(DisplayQueryType::Active)
            .map_err(|_| DriverError::SetFailed("failed to query active paths before primary change".into()))?;

        let target_path = config
            .paths
            .iter()
            .find(|p| &Self::target_device_id(&config, p) == device_id)
            .ok_or_else(|| DriverError::NotFound(device_id.clone()))?;
        let offset = Self::source_mode(&config, target_path)
            .map(|m| unsafe { m.Anonymous.sourceMode.position })
            .ok_or_else(|| DriverError::NotFound(device_id.clone()))?;

        let mut new_modes = config.modes.clone();
        for mode in &mut new_modes {
            if mode.infoType == DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE {
                unsafe {
                    mode.Anonymous.sourceMode.position.x -= offset.x;
                    mode.Anonymous.sourceMode.position.y -= offset.y;
                }
            }
        }

        let new_config = WindowsDisplayConfig {
            paths: config.paths.clone(),
            modes: new_modes,
            source_device_names: config.source_device_names,
            target_device_names: config.target_device_names,
        };
        new_config
            .apply(true)
            .map_err(|e| DriverError::SetFailed(e.to_string()))?;

        if !self.is_primary(device_id) {
            return Err(DriverError::SetFailed(
                "device did not become primary after set_as_primary".into(),
            ));
        }
        Ok(())
    }

    fn current_hdr_states(&self, ids: &[DeviceId]) -> HdrStateMap {
        let Ok(config) = Self::query(DisplayQueryType::Active) else {
            return HdrStateMap::new();
        };
        let mut out = HdrStateMap::new();
        for path in &config.paths {
            let device_id = Self::target_device_id(&config, path);
            if !ids.contains(&device_id) {
                continue;
            }
            let hdr_state = Self::device_info(&config, path).and_then(|i| i.hdr_state);
            out.insert(device_id, hdr_state);
        }
        out
    }

    fn set_hdr_states(&self, states: &HdrStateMap) -> Result<(), DriverError> {
        let Ok(config) = Self::query(DisplayQueryType::Active) else {
            return Err(DriverError::SetFailed(
                "failed to query active paths before HDR change".into(),
            ));
        };
        let mut applied: Vec<(u32, windows::Win32::Foundation::LUID, bool)> = Vec::new();
        for path in &config.paths {
            let device_id = Self::target_device_id(&config, path);
            let Some(Some(state)) = states.get(&device_id) else {
                continue;
            };
            let before = win32::get_advanced_color_info(path.targetInfo.id, path.targetInfo.adapterId)
                .ok()
                .flatten();
            let enable = *state == HdrState::Enabled;
            if let Err(e) =
                win32::set_advanced_color_state(path.targetInfo.id, path.targetInfo.adapterId, enable)
            {
                for (id, adapter, prior) in applied {
                    if win32::set_advanced_color_state(id, adapter, prior).is_err() {
                        warn!("failed to roll back partially-applied HDR state");
                    }
                }
                return Err(DriverError::SetFailed(e.to_string()));
            }
            if let Some(before) = before {
                applied.push((path.targetInfo.id, path.targetInfo.adapterId, before));
            }
        }
        Ok(())
    }
}
