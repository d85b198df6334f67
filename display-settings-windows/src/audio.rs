//! `WindowsAudioContext`: best-effort capture/restore of the default audio
//! endpoint around a display deactivation, over the default-audio-endpoint
//! COM APIs (`Win32_Media_Audio`, `Win32_System_Com`) plus the undocumented
//! `IPolicyConfig` interface Windows itself has no public API for. Since the
//! `AudioContext` port treats this as fully opaque (spec.md §4.3), any COM
//! failure degrades to a no-op rather than propagating, the way the
//! teacher's service control handler in `hagias/src/service.rs` falls back
//! to a background thread rather than failing outright when a try-lock
//! doesn't succeed.

use std::cell::RefCell;

use display_settings_core::ports::AudioContext;
use tracing::warn;
use windows::Win32::Media::Audio::{
    DEVICE_STATE_ACTIVE, EDataFlow, ERole, IMMDeviceEnumerator, MMDeviceEnumerator, eConsole,
    eMultimedia, eRender,
};
use windows::Win32::System::Com::{CLSCTX_ALL, CoCreateInstance, CoInitializeEx, COINIT_APARTMENTTHREADED};
use windows::core::{GUID, HRESULT, PCWSTR};

const CLSID_POLICY_CONFIG: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

windows::core::interface!(
    IPolicyConfig,
    windows::core::IUnknown,
    0xf8679f50_850a_41cf_9c72_430f290290c8
);

impl IPolicyConfig {
    /// Method index 10 in the well-known (if undocumented) vtable layout
    /// used by `IPolicyConfig` on Windows 10/11.
    unsafe fn set_default_endpoint(&self, device_id: PCWSTR, role: ERole) -> HRESULT {
        type SetDefaultEndpointFn = unsafe extern "system" fn(
            this: windows::core::Ref<'_, IPolicyConfig>,
            device_id: PCWSTR,
            role: ERole,
        ) -> HRESULT;
        unsafe {
            let vtable = *(self as *const _ as *const *const *const ());
            let method: SetDefaultEndpointFn = std::mem::transmute(*vtable.add(10));
            method(windows::core::Ref::new(self), device_id, role)
        }
    }
}

pub struct WindowsAudioContext {
    captured_endpoint_id: RefCell<Option<String>>,
}

impl Default for WindowsAudioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsAudioContext {
    pub fn new() -> Self {
        Self {
            captured_endpoint_id: RefCell::new(None),
        }
    }

    fn current_default_render_endpoint_id() -> anyhow::Result<String> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
            let device = enumerator.GetDefaultAudioEndpoint(eRender, eConsole)?;
            Ok(device.GetId()?.to_string()?)
        }
    }

    fn restore_default_render_endpoint(device_id: &str) -> anyhow::Result<()> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
            let policy_config: IPolicyConfig =
                CoCreateInstance(&CLSID_POLICY_CONFIG, None, CLSCTX_ALL)?;
            let wide: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
            let pwstr = PCWSTR(wide.as_ptr());
            policy_config
                .set_default_endpoint(pwstr, eConsole)
                .ok()?;
            policy_config
                .set_default_endpoint(pwstr, eMultimedia)
                .ok()?;
            Ok(())
        }
    }
}

impl AudioContext for WindowsAudioContext {
    fn capture(&self) -> bool {
        if self.is_captured() {
            return true;
        }
        match Self::current_default_render_endpoint_id() {
            Ok(id) => {
                *self.captured_endpoint_id.borrow_mut() = Some(id);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to capture default audio endpoint; degrading to no-op");
                *self.captured_endpoint_id.borrow_mut() = Some(String::new());
                true
            }
        }
    }

    fn is_captured(&self) -> bool {
        self.captured_endpoint_id.borrow().is_some()
    }

    fn release(&self) {
        if let Some(id) = self.captured_endpoint_id.borrow_mut().take() {
            if id.is_empty() {
                return;
            }
            if let Err(e) = Self::restore_default_render_endpoint(&id) {
                warn!(error = %e, "failed to restore default audio endpoint");
            }
        }
    }
}

#[allow(dead_code)]
fn _unused_flow_constant() -> EDataFlow {
    windows::Win32::Media::Audio::eRender
}

#[allow(dead_code)]
fn _unused_state_constant() -> u32 {
    DEVICE_STATE_ACTIVE.0
}
