//! Thin wrappers around the Win32 CCD (`QueryDisplayConfig`/`SetDisplayConfig`)
//! API. Ported in style from `hagias/src/windows_util.rs`: the buffer-size
//! retry loop, the `LuidWrapper`/`IdAndAdapterId` newtypes, and
//! `windows_error_to_string` via `FormatMessageW` are carried over near-
//! verbatim; the large per-constant enum zoo (`OutputTechnology`, rotation,
//! scaling, pixel format, ...) is dropped because nothing in this adapter
//! needs to print or round-trip those fields.

use std::collections::{HashMap, HashSet, hash_map};
use std::ffi::OsString;
use std::hash::{Hash, Hasher};
use std::os::windows::ffi::OsStringExt;

use anyhow::{Context as _, Result, anyhow, bail};
use tracing::debug;
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_ADAPTER_NAME, DISPLAYCONFIG_DEVICE_INFO_GET_ADAPTER_NAME,
    DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO, DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
    DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME, DISPLAYCONFIG_DEVICE_INFO_HEADER,
    DISPLAYCONFIG_DEVICE_INFO_SET_ADVANCED_COLOR_STATE, DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_ACTIVE, DISPLAYCONFIG_PATH_INFO,
    DISPLAYCONFIG_SET_ADVANCED_COLOR_STATE, DISPLAYCONFIG_SOURCE_DEVICE_NAME,
    DISPLAYCONFIG_TARGET_DEVICE_NAME, DISPLAYCONFIG_TOPOLOGY_ID, DisplayConfigGetDeviceInfo,
    DisplayConfigSetDeviceInfo, GetDisplayConfigBufferSizes, QDC_ALL_PATHS,
    QDC_ONLY_ACTIVE_PATHS, QUERY_DISPLAY_CONFIG_FLAGS, QueryDisplayConfig, SDC_ALLOW_CHANGES,
    SDC_APPLY, SDC_SAVE_TO_DATABASE, SDC_USE_SUPPLIED_DISPLAY_CONFIG, SetDisplayConfig,
};
use windows::Win32::Foundation::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_SUCCESS, HLOCAL, LocalFree, WIN32_ERROR,
};
use windows::Win32::System::Diagnostics::Debug::{
    FORMAT_MESSAGE_ALLOCATE_BUFFER, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    FormatMessageW,
};
use windows::core::PWSTR;

pub fn windows_error_to_string(error: WIN32_ERROR) -> String {
    use winapi::um::winnt::LANG_NEUTRAL;
    use winapi::um::winnt::MAKELANGID;
    use winapi::um::winnt::SUBLANG_DEFAULT;

    let mut error_text: PWSTR = PWSTR(std::ptr::null_mut());
    unsafe {
        let num_chars = FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM
                | FORMAT_MESSAGE_ALLOCATE_BUFFER
                | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            error.0,
            MAKELANGID(LANG_NEUTRAL, SUBLANG_DEFAULT).into(),
            PWSTR((&mut error_text) as *mut PWSTR as *mut _),
            0,
            None,
        );
        if num_chars == 0 {
            return format!("0x{:x}", error.0);
        }
        let string = OsString::from_wide(std::slice::from_raw_parts(error_text.0, num_chars as _));
        LocalFree(Some(HLOCAL(error_text.0 as *mut _)));
        format!("0x{:x} {}", error.0, string.display())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(transparent)]
pub struct LuidWrapper(pub windows::Win32::Foundation::LUID);
impl Hash for LuidWrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.LowPart.hash(state);
        self.0.HighPart.hash(state);
    }
}
impl Eq for LuidWrapper {}
impl From<windows::Win32::Foundation::LUID> for LuidWrapper {
    fn from(luid: windows::Win32::Foundation::LUID) -> Self {
        LuidWrapper(luid)
    }
}
impl From<LuidWrapper> for windows::Win32::Foundation::LUID {
    fn from(luid: LuidWrapper) -> Self {
        luid.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IdAndAdapterId {
    pub id: u32,
    pub adapter_id: LuidWrapper,
}

#[derive(Debug, Clone, Copy)]
pub enum DisplayQueryType {
    All,
    Active,
}

impl DisplayQueryType {
    pub fn to_flags(self) -> QUERY_DISPLAY_CONFIG_FLAGS {
        match self {
            DisplayQueryType::All => QDC_ALL_PATHS,
            DisplayQueryType::Active => QDC_ONLY_ACTIVE_PATHS,
        }
    }
}

pub struct WindowsDisplayConfig {
    pub paths: Vec<DISPLAYCONFIG_PATH_INFO>,
    pub modes: Vec<DISPLAYCONFIG_MODE_INFO>,
    pub source_device_names: HashMap<IdAndAdapterId, DISPLAYCONFIG_SOURCE_DEVICE_NAME>,
    pub target_device_names: HashMap<IdAndAdapterId, DISPLAYCONFIG_TARGET_DEVICE_NAME>,
}

impl WindowsDisplayConfig {
    pub fn get(query: DisplayQueryType) -> Result<WindowsDisplayConfig> {
        let query_flags = query.to_flags();
        let mut paths = Vec::new();
        let mut modes = Vec::new();
        unsafe {
            loop {
                let mut num_paths = 0;
                let mut num_modes = 0;
                let result =
                    GetDisplayConfigBufferSizes(query_flags, &mut num_paths, &mut num_modes);
                if result != ERROR_SUCCESS {
                    bail!(
                        "GetDisplayConfigBufferSizes error: {}",
                        windows_error_to_string(result)
                    );
                }

                if paths.capacity() < num_paths as usize {
                    paths.reserve(num_paths as usize - paths.capacity());
                }
                if modes.capacity() < num_modes as usize {
                    modes.reserve(num_modes as usize - modes.capacity());
                }

                let result = QueryDisplayConfig(
                    query_flags,
                    &mut num_paths,
                    paths.as_mut_ptr(),
                    &mut num_modes,
                    modes.as_mut_ptr(),
                    None::<*mut DISPLAYCONFIG_TOPOLOGY_ID>,
                );
                if result == ERROR_INSUFFICIENT_BUFFER {
                    continue;
                }
                if result != ERROR_SUCCESS {
                    bail!(
                        "QueryDisplayConfig error: {}",
                        windows_error_to_string(result)
                    );
                }

                paths.set_len(num_paths as usize);
                modes.set_len(num_modes as usize);

                return WindowsDisplayConfig::from_paths_and_modes(paths, modes);
            }
        }
    }

    pub fn from_paths_and_modes(
        paths: Vec<DISPLAYCONFIG_PATH_INFO>,
        modes: Vec<DISPLAYCONFIG_MODE_INFO>,
    ) -> Result<Self> {
        let ids_and_adapter_ids: HashSet<IdAndAdapterId> = modes
            .iter()
            .map(|m| IdAndAdapterId {
                id: m.id,
                adapter_id: m.adapterId.into(),
            })
            .chain(paths.iter().flat_map(|path| {
                [
                    IdAndAdapterId {
                        id: path.sourceInfo.id,
                        adapter_id: path.sourceInfo.adapterId.into(),
                    },
                    IdAndAdapterId {
                        id: path.targetInfo.id,
                        adapter_id: path.targetInfo.adapterId.into(),
                    },
                ]
            }))
            .collect();

        let mut source_device_names: HashMap<IdAndAdapterId, DISPLAYCONFIG_SOURCE_DEVICE_NAME> =
            HashMap::new();
        let mut target_device_names: HashMap<IdAndAdapterId, DISPLAYCONFIG_TARGET_DEVICE_NAME> =
            HashMap::new();
        for id_and_adapter_id in ids_and_adapter_ids.iter().copied() {
            if let hash_map::Entry::Vacant(entry) = source_device_names.entry(id_and_adapter_id) {
                if let Ok(name) = get_source_device_name(
                    id_and_adapter_id.id,
                    id_and_adapter_id.adapter_id.into(),
                ) {
                    entry.insert(name);
                }
            }
            if let hash_map::Entry::Vacant(entry) = target_device_names.entry(id_and_adapter_id) {
                if let Ok(name) = get_target_device_name(
                    id_and_adapter_id.id,
                    id_and_adapter_id.adapter_id.into(),
                ) {
                    entry.insert(name);
                }
            }
        }

        Ok(Self {
            paths,
            modes,
            source_device_names,
            target_device_names,
        })
    }

    pub fn apply(&self, save_to_database: bool) -> Result<()> {
        unsafe {
            let mut flags = SDC_APPLY | SDC_USE_SUPPLIED_DISPLAY_CONFIG | SDC_ALLOW_CHANGES;
            if save_to_database {
                flags |= SDC_SAVE_TO_DATABASE;
            }
            let result = SetDisplayConfig(Some(&self.paths), Some(&self.modes), flags);
            if result as i64 != ERROR_SUCCESS.0 as i64 {
                bail!(
                    "SetDisplayConfig error: {}",
                    windows_error_to_string(WIN32_ERROR(result as u32))
                );
            }
        }
        debug!("SetDisplayConfig applied {} path(s)", self.paths.len());
        Ok(())
    }

    pub fn is_active(path: &DISPLAYCONFIG_PATH_INFO) -> bool {
        path.flags & DISPLAYCONFIG_PATH_ACTIVE != 0
    }
}

pub fn wchar_null_terminated_to_os_string(wchar: &[u16]) -> OsString {
    let len = wchar.iter().position(|&c| c == 0).unwrap_or(wchar.len());
    OsString::from_wide(&wchar[..len])
}

pub fn get_monitor_friendly_device_name(
    target_device_name: &DISPLAYCONFIG_TARGET_DEVICE_NAME,
) -> Option<OsString> {
    let name = wchar_null_terminated_to_os_string(&target_device_name.monitorFriendlyDeviceName);
    (!name.is_empty()).then_some(name)
}

pub fn get_monitor_device_path(
    target_device_name: &DISPLAYCONFIG_TARGET_DEVICE_NAME,
) -> Option<OsString> {
    let path = wchar_null_terminated_to_os_string(&target_device_name.monitorDevicePath);
    (!path.is_empty()).then_some(path)
}

pub fn get_adapter_device_path(adapter_id: windows::Win32::Foundation::LUID) -> Result<OsString> {
    let mut device_name = DISPLAYCONFIG_ADAPTER_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_ADAPTER_NAME,
            size: std::mem::size_of::<DISPLAYCONFIG_ADAPTER_NAME>()
                .try_into()
                .context("DISPLAYCONFIG_ADAPTER_NAME size overflowed u32")?,
            adapterId: adapter_id,
            ..Default::default()
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut device_name.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            bail!(
                "DisplayConfigGetDeviceInfo(adapter name) error: {}",
                windows_error_to_string(WIN32_ERROR(result as u32))
            );
        }
    }
    Ok(wchar_null_terminated_to_os_string(
        &device_name.adapterDevicePath,
    ))
}

pub fn get_source_device_name(
    id: u32,
    adapter_id: LuidWrapper,
) -> Result<DISPLAYCONFIG_SOURCE_DEVICE_NAME> {
    let mut device_name = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
            size: std::mem::size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>()
                .try_into()
                .context("DISPLAYCONFIG_SOURCE_DEVICE_NAME size overflowed u32")?,
            adapterId: adapter_id.into(),
            id,
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut device_name.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            bail!(
                "DisplayConfigGetDeviceInfo(source name) error: {}",
                windows_error_to_string(WIN32_ERROR(result as u32))
            );
        }
    }
    Ok(device_name)
}

pub fn get_target_device_name(
    id: u32,
    adapter_id: windows::Win32::Foundation::LUID,
) -> Result<DISPLAYCONFIG_TARGET_DEVICE_NAME> {
    let mut device_name = DISPLAYCONFIG_TARGET_DEVICE_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME,
            size: std::mem::size_of::<DISPLAYCONFIG_TARGET_DEVICE_NAME>()
                .try_into()
                .context("DISPLAYCONFIG_TARGET_DEVICE_NAME size overflowed u32")?,
            adapterId: adapter_id,
            id,
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut device_name.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            bail!(
                "DisplayConfigGetDeviceInfo(target name) error: {}",
                windows_error_to_string(WIN32_ERROR(result as u32))
            );
        }
    }
    Ok(device_name)
}

/// `None` means the device is active but its adapter reports no HDR
/// capability at all (spec.md §4.1's `hdr_state: Option<HdrState>`).
pub fn get_advanced_color_info(
    id: u32,
    adapter_id: windows::Win32::Foundation::LUID,
) -> Result<Option<bool>> {
    let mut info = DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
            size: std::mem::size_of::<DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO>()
                .try_into()
                .context("DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO size overflowed u32")?,
            adapterId: adapter_id,
            id,
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut info.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            bail!(
                "DisplayConfigGetDeviceInfo(advanced color info) error: {}",
                windows_error_to_string(WIN32_ERROR(result as u32))
            );
        }
        let flags = info.Anonymous.value;
        let advanced_color_supported = flags & 0x1 != 0;
        if !advanced_color_supported {
            return Ok(None);
        }
        let advanced_color_enabled = flags & 0x2 != 0;
        Ok(Some(advanced_color_enabled))
    }
}

pub fn set_advanced_color_state(
    id: u32,
    adapter_id: windows::Win32::Foundation::LUID,
    enable: bool,
) -> Result<()> {
    let mut state = DISPLAYCONFIG_SET_ADVANCED_COLOR_STATE {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_SET_ADVANCED_COLOR_STATE,
            size: std::mem::size_of::<DISPLAYCONFIG_SET_ADVANCED_COLOR_STATE>()
                .try_into()
                .context("DISPLAYCONFIG_SET_ADVANCED_COLOR_STATE size overflowed u32")?,
            adapterId: adapter_id,
            id,
        },
        ..Default::default()
    };
    unsafe {
        state.Anonymous.value = if enable { 0x1 } else { 0x0 };
        let result = DisplayConfigSetDeviceInfo(&state.header as *const _);
        if result != ERROR_SUCCESS.0 as i32 {
            return Err(anyhow!(
                "DisplayConfigSetDeviceInfo(advanced color state) error: {}",
                windows_error_to_string(WIN32_ERROR(result as u32))
            ));
        }
    }
    Ok(())
}
