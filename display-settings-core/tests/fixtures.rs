//! In-memory fake ports for integration tests, standing in for the real
//! Win32 CCD / file / COM-audio backends the way `gawashburn-knoll`'s
//! `fake_displays.rs` stands in for its real Core Graphics backend.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use display_settings_core::ports::display_driver::{DeviceInfo, DriverError, EnumeratedDevice, Point};
use display_settings_core::ports::{AudioContext, DisplayDriver, Persistence};
use display_settings_core::{
    ActiveTopology, DeviceDisplayModeMap, DeviceId, DisplayMode, HdrState, HdrStateMap, Rational,
    Resolution,
};

pub struct FakeDisplayDriver {
    topology: RefCell<ActiveTopology>,
    modes: RefCell<DeviceDisplayModeMap>,
    hdr: RefCell<HdrStateMap>,
    primary_group: RefCell<HashSet<DeviceId>>,
    known: RefCell<Vec<DeviceId>>,
    topology_writes: Cell<u32>,
    api_available: Cell<bool>,
}

impl FakeDisplayDriver {
    pub fn new() -> Self {
        Self {
            topology: RefCell::new(ActiveTopology::default()),
            modes: RefCell::new(DeviceDisplayModeMap::new()),
            hdr: RefCell::new(HdrStateMap::new()),
            primary_group: RefCell::new(HashSet::new()),
            known: RefCell::new(Vec::new()),
            topology_writes: Cell::new(0),
            api_available: Cell::new(true),
        }
    }

    pub fn add_active_device(
        &self,
        id: DeviceId,
        primary: bool,
        resolution: Resolution,
        refresh_rate: Rational,
    ) {
        self.known.borrow_mut().push(id.clone());
        self.modes.borrow_mut().insert(
            id.clone(),
            DisplayMode {
                resolution,
                refresh_rate,
            },
        );
        if primary {
            self.primary_group.borrow_mut().insert(id);
        }
    }

    pub fn set_topology_for_test(&self, topology: ActiveTopology) {
        *self.topology.borrow_mut() = topology;
    }

    pub fn set_hdr_for_test(&self, id: DeviceId, state: Option<HdrState>) {
        self.hdr.borrow_mut().insert(id, state);
    }

    pub fn set_primary_for_test(&self, id: &DeviceId) {
        let group = {
            let topology = self.topology.borrow();
            topology
                .group_of(id)
                .map(|g| g.to_vec())
                .unwrap_or_else(|| vec![id.clone()])
        };
        let mut primary = self.primary_group.borrow_mut();
        primary.clear();
        primary.extend(group);
    }

    pub fn set_api_available_for_test(&self, available: bool) {
        self.api_available.set(available);
    }

    pub fn topology_write_count(&self) -> u32 {
        self.topology_writes.get()
    }
}

impl DisplayDriver for FakeDisplayDriver {
    fn is_api_access_available(&self) -> bool {
        self.api_available.get()
    }

    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, DriverError> {
        let topology = self.topology.borrow();
        let modes = self.modes.borrow();
        let hdr = self.hdr.borrow();
        let primary = self.primary_group.borrow();
        Ok(self
            .known
            .borrow()
            .iter()
            .map(|id| {
                let active = topology.group_of(id).is_some();
                let info = active.then(|| DeviceInfo {
                    resolution: modes
                        .get(id)
                        .map(|m| m.resolution)
                        .unwrap_or(Resolution { width: 0, height: 0 }),
                    scale: Rational::new(1, 1),
                    refresh_rate: modes.get(id).map(|m| m.refresh_rate).unwrap_or(Rational::new(0, 1)),
                    primary: primary.contains(id),
                    origin: Point { x: 0, y: 0 },
                    hdr_state: hdr.get(id).copied().flatten(),
                });
                EnumeratedDevice {
                    device_id: id.clone(),
                    display_name: format!("\\\\.\\DISPLAY{}", id.as_str()),
                    friendly_name: id.as_str().to_string(),
                    edid: Vec::new(),
                    info,
                }
            })
            .collect())
    }

    fn display_name(&self, device_id: &DeviceId) -> String {
        if self.topology.borrow().group_of(device_id).is_some() {
            format!("\\\\.\\DISPLAY{}", device_id.as_str())
        } else {
            String::new()
        }
    }

    fn current_topology(&self) -> Result<ActiveTopology, DriverError> {
        Ok(self.topology.borrow().clone())
    }

    fn is_topology_valid(&self, topology: &ActiveTopology) -> bool {
        topology.groups().iter().all(|g| !g.is_empty() && g.len() <= 2)
    }

    fn set_topology(&self, topology: &ActiveTopology) -> Result<(), DriverError> {
        self.topology_writes.set(self.topology_writes.get() + 1);
        *self.topology.borrow_mut() = topology.clone();
        let members: HashSet<DeviceId> = topology.groups().iter().flatten().cloned().collect();
        self.primary_group.borrow_mut().retain(|id| members.contains(id));
        Ok(())
    }

    fn current_display_modes(&self, ids: &[DeviceId]) -> DeviceDisplayModeMap {
        let modes = self.modes.borrow();
        ids.iter()
            .filter_map(|id| modes.get(id).map(|m| (id.clone(), *m)))
            .collect()
    }

    fn set_display_modes(&self, modes: &DeviceDisplayModeMap) -> Result<(), DriverError> {
        let mut current = self.modes.borrow_mut();
        for (id, mode) in modes {
            current.insert(id.clone(), *mode);
        }
        Ok(())
    }

    fn is_primary(&self, device_id: &DeviceId) -> bool {
        self.primary_group.borrow().contains(device_id)
    }

    fn set_as_primary(&self, device_id: &DeviceId) -> Result<(), DriverError> {
        self.set_primary_for_test(device_id);
        Ok(())
    }

    fn current_hdr_states(&self, ids: &[DeviceId]) -> HdrStateMap {
        let hdr = self.hdr.borrow();
        ids.iter()
            .map(|id| (id.clone(), hdr.get(id).copied().flatten()))
            .collect()
    }

    fn set_hdr_states(&self, states: &HdrStateMap) -> Result<(), DriverError> {
        let mut hdr = self.hdr.borrow_mut();
        for (id, state) in states {
            if let Some(state) = state {
                hdr.insert(id.clone(), Some(*state));
            }
        }
        Ok(())
    }
}

pub struct FakePersistence {
    data: RefCell<Option<Vec<u8>>>,
    fail: Cell<bool>,
}

impl FakePersistence {
    pub fn new() -> Self {
        Self {
            data: RefCell::new(None),
            fail: Cell::new(false),
        }
    }

    pub fn fail_writes(&self) {
        self.fail.set(true);
    }
}

impl Persistence for FakePersistence {
    fn store(&self, bytes: &[u8]) -> bool {
        if self.fail.get() {
            return false;
        }
        *self.data.borrow_mut() = Some(bytes.to_vec());
        true
    }

    fn load(&self) -> Option<Vec<u8>> {
        Some(self.data.borrow().clone().unwrap_or_default())
    }

    fn clear(&self) -> bool {
        if self.fail.get() {
            return false;
        }
        *self.data.borrow_mut() = None;
        true
    }
}

pub struct FakeAudioContext {
    captured: Cell<bool>,
}

impl FakeAudioContext {
    pub fn new() -> Self {
        Self {
            captured: Cell::new(false),
        }
    }
}

impl AudioContext for FakeAudioContext {
    fn capture(&self) -> bool {
        self.captured.set(true);
        true
    }

    fn is_captured(&self) -> bool {
        self.captured.get()
    }

    fn release(&self) {
        self.captured.set(false);
    }
}
