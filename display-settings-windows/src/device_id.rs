//! Stable `DeviceId` derivation. See spec.md §4.1/§6: hash `EDID ∥
//! stable-instance-id-bytes` with a null-namespace RFC-4122 v5 (SHA-1) UUID,
//! falling back to hashing the raw device path when EDID bytes are
//! unavailable (EDID parsing is out of scope per spec.md §1's Non-goals —
//! this adapter only ever passes EDID bytes through, never interprets them).

use display_settings_core::DeviceId;
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// `Uuid::new_v5` wants a namespace UUID; the spec calls for a "null
/// namespace", i.e. the nil UUID.
const NULL_NAMESPACE: Uuid = Uuid::nil();

pub fn derive(edid: &[u8], monitor_device_path: &str) -> DeviceId {
    let input = if edid.is_empty() {
        monitor_device_path.as_bytes().to_vec()
    } else {
        let mut buf = Vec::with_capacity(edid.len() + monitor_device_path.len());
        buf.extend_from_slice(edid);
        buf.extend_from_slice(stable_instance_id_slice(monitor_device_path).as_bytes());
        buf
    };
    let uuid = Uuid::new_v5(&NULL_NAMESPACE, &input);
    DeviceId::new(format!("{{{uuid}}}"))
}

/// The stable part of a Windows device instance id / monitor device path is
/// everything except the 3rd and 4th `&`-delimited fragments (spec.md §4.1),
/// which carry a bus-enumeration-order index that is not stable across
/// driver reinstalls or port swaps.
fn stable_instance_id_slice(path: &str) -> String {
    let fragments: Vec<&str> = path.split('&').collect();
    fragments
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 2 && *i != 3)
        .map(|(_, f)| *f)
        .collect::<Vec<_>>()
        .join("&")
}

/// Fallback used when neither EDID nor a monitor device path is available
/// (e.g. a query that returns a bare device name). Still produces a stable,
/// deterministic id from whatever string handle is on hand.
pub fn derive_from_path_only(device_path: &str) -> DeviceId {
    let digest = Sha1::digest(device_path.as_bytes());
    let uuid = Uuid::new_v5(&NULL_NAMESPACE, &digest);
    DeviceId::new(format!("{{{uuid}}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive(b"edid-bytes", r"\\?\DISPLAY#ABC123#4&1a2b3c4d&0&UID1234#{...}");
        let b = derive(b"edid-bytes", r"\\?\DISPLAY#ABC123#4&1a2b3c4d&0&UID1234#{...}");
        assert_eq!(a, b);
    }

    #[test]
    fn stable_slice_drops_bus_index_fragments() {
        let a = stable_instance_id_slice(r"\\?\DISPLAY#ABC123#4&1a2b3c4d&0&UID1234#{...}");
        let b = stable_instance_id_slice(r"\\?\DISPLAY#ABC123#4&1a2b3c4d&1&UID1234#{...}");
        assert_eq!(a, b);
    }
}
