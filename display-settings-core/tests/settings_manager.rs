//! End-to-end scenarios driving `SettingsManager` against in-memory fake
//! ports, grounded on the real/fake port split used by `gawashburn-knoll`'s
//! `real_displays.rs` / `fake_displays.rs` pair. Each test corresponds to one
//! of the concrete scenarios in spec.md §8.

mod fixtures;

use std::rc::Rc;

use display_settings_core::ports::display_driver::Point;
use display_settings_core::{
    ActiveTopology, ApplyResult, DeviceId, DevicePrep, DisplayMode, HdrState, Rational,
    Resolution, RevertResult, SettingsManager, SingleDisplayConfiguration, WinWorkarounds,
};

use fixtures::{FakeAudioContext, FakeDisplayDriver, FakePersistence};

fn manager(
    driver: Rc<FakeDisplayDriver>,
    persistence: FakePersistence,
    audio: Rc<FakeAudioContext>,
) -> SettingsManager<FakeDisplayDriver, FakePersistence, FakeAudioContext> {
    SettingsManager::new(driver, persistence, audio, WinWorkarounds::default())
}

fn d(id: &str) -> DeviceId {
    DeviceId::new(id)
}

/// spec.md §8 scenario 1: EnsureOnlyDisplay, capture audio.
#[test]
fn ensure_only_display_captures_audio_and_persists_initial() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D3"), true, Resolution { width: 2560, height: 1440 }, Rational::new(30, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![
        vec![d("D1"), d("D2")],
        vec![d("D3")],
    ]));

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    let result = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        device_prep: Some(DevicePrep::EnsureOnlyDisplay),
        ..Default::default()
    });

    assert_eq!(result, ApplyResult::Ok);
    assert!(audio.is_captured());
    assert_eq!(driver.current_topology().unwrap(), ActiveTopology::new(vec![vec![d("D1")]]));

    let state = mgr.cached_state().expect("state persisted");
    assert_eq!(
        state.initial.topology,
        ActiveTopology::new(vec![vec![d("D1"), d("D2")], vec![d("D3")]])
    );
    assert_eq!(
        state.initial.primary_devices,
        [d("D1"), d("D2")].into_iter().collect()
    );
    assert_eq!(state.modified.topology, ActiveTopology::new(vec![vec![d("D1")]]));
}

/// spec.md §8 scenario 2: re-apply with a cache already in place performs no
/// driver writes and the (identical) topology is all that gets persisted.
#[test]
fn reapply_with_matching_cache_is_a_no_op() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D3"), true, Resolution { width: 2560, height: 1440 }, Rational::new(30, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![
        vec![d("D1"), d("D2")],
        vec![d("D3")],
    ]));

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    let first = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        device_prep: Some(DevicePrep::EnsureActive),
        ..Default::default()
    });
    assert_eq!(first, ApplyResult::Ok);

    let writes_before = driver.topology_write_count();
    let second = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        device_prep: Some(DevicePrep::EnsureActive),
        ..Default::default()
    });
    assert_eq!(second, ApplyResult::Ok);
    assert_eq!(driver.topology_write_count(), writes_before, "no extra topology writes on re-apply");
}

/// spec.md §8 scenario 3: resolution change propagates to every member of a
/// duplicate group but leaves the refresh rate and unrelated devices alone.
#[test]
fn resolution_change_applies_to_duplicate_group() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(120, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D3"), true, Resolution { width: 2560, height: 1440 }, Rational::new(30, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![
        vec![d("D1"), d("D2")],
        vec![d("D3")],
    ]));

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    let result = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        resolution: Some(Resolution { width: 1920, height: 1080 }),
        ..Default::default()
    });
    assert_eq!(result, ApplyResult::Ok);

    let modes = driver.current_display_modes(&[d("D1"), d("D2"), d("D3")]);
    assert_eq!(modes[&d("D1")].resolution, Resolution { width: 1920, height: 1080 });
    assert_eq!(modes[&d("D2")].resolution, Resolution { width: 1920, height: 1080 });
    assert_eq!(modes[&d("D2")].refresh_rate, Rational::new(60, 1));
    assert_eq!(modes[&d("D3")].resolution, Resolution { width: 2560, height: 1440 });
}

/// spec.md §8 scenario 4: an HDR change leaves an unsupported (`None`)
/// device untouched and records it verbatim in persistence.
#[test]
fn hdr_change_ignores_unsupported_device() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D3"), true, Resolution { width: 2560, height: 1440 }, Rational::new(30, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![
        vec![d("D1"), d("D2")],
        vec![d("D3")],
    ]));
    driver.set_hdr_for_test(d("D1"), Some(HdrState::Disabled));
    driver.set_hdr_for_test(d("D2"), Some(HdrState::Disabled));
    driver.set_hdr_for_test(d("D3"), None);

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    let result = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        hdr_state: Some(HdrState::Enabled),
        ..Default::default()
    });
    assert_eq!(result, ApplyResult::Ok);

    let states = driver.current_hdr_states(&[d("D1"), d("D2"), d("D3")]);
    assert_eq!(states[&d("D1")], Some(HdrState::Enabled));
    assert_eq!(states[&d("D2")], Some(HdrState::Disabled));
    assert_eq!(states[&d("D3")], None);

    let persisted = mgr.cached_state().unwrap();
    assert_eq!(persisted.modified.original_hdr_states[&d("D3")], None);
}

/// spec.md §8 scenario 5: a revert after all four stages were modified walks
/// HDR, modes, primary, then topology back, and clears persistence.
#[test]
fn revert_undoes_every_stage_in_order() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![vec![d("D1")], vec![d("D2")]]));
    driver.set_hdr_for_test(d("D1"), Some(HdrState::Disabled));
    driver.set_hdr_for_test(d("D2"), Some(HdrState::Disabled));
    driver.set_primary_for_test(&d("D1"));

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    let apply_result = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D2")),
        device_prep: Some(DevicePrep::EnsurePrimary),
        resolution: Some(Resolution { width: 1920, height: 1080 }),
        refresh_rate: Some(display_settings_core::RefreshRateRequest::Rational(Rational::new(120, 1))),
        hdr_state: Some(HdrState::Enabled),
    });
    assert_eq!(apply_result, ApplyResult::Ok);
    assert!(driver.is_primary(&d("D2")));

    let revert_result = mgr.revert();
    assert_eq!(revert_result, RevertResult::Ok);

    assert_eq!(
        driver.current_topology().unwrap(),
        ActiveTopology::new(vec![vec![d("D1")], vec![d("D2")]])
    );
    assert!(driver.is_primary(&d("D1")));
    assert_eq!(
        driver.current_hdr_states(&[d("D1"), d("D2")])[&d("D2")],
        Some(HdrState::Disabled)
    );
    assert!(mgr.cached_state().is_none());
}

/// spec.md §8 scenario 6: a persistence failure after driver writes succeed
/// rolls back every guard and leaves the OS at its pre-apply topology.
#[test]
fn persistence_failure_rolls_back_all_guards() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.set_topology_for_test(ActiveTopology::new(vec![vec![d("D1")], vec![d("D2")]]));

    let audio = Rc::new(FakeAudioContext::new());
    let persistence = FakePersistence::new();
    persistence.fail_writes();
    let mut mgr = manager(Rc::clone(&driver), persistence, Rc::clone(&audio));

    let pre_apply_topology = driver.current_topology().unwrap();

    let result = mgr.apply(&SingleDisplayConfiguration {
        device_id: Some(d("D1")),
        device_prep: Some(DevicePrep::EnsureOnlyDisplay),
        ..Default::default()
    });

    assert_eq!(result, ApplyResult::PersistenceSaveFailed);
    assert_eq!(driver.current_topology().unwrap(), pre_apply_topology);
    assert!(mgr.cached_state().is_none());
}

/// spec.md §8 universal invariant: a full apply+revert cycle restores the
/// exact pre-apply state.
#[test]
fn apply_then_revert_round_trips_to_original_state() {
    let driver = Rc::new(FakeDisplayDriver::new());
    driver.add_active_device(d("D1"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D2"), true, Resolution { width: 1920, height: 1080 }, Rational::new(60, 1));
    driver.add_active_device(d("D3"), true, Resolution { width: 2560, height: 1440 }, Rational::new(30, 1));
    let original_topology = ActiveTopology::new(vec![vec![d("D1"), d("D2")], vec![d("D3")]]);
    driver.set_topology_for_test(original_topology.clone());

    let audio = Rc::new(FakeAudioContext::new());
    let mut mgr = manager(Rc::clone(&driver), FakePersistence::new(), Rc::clone(&audio));

    assert_eq!(
        mgr.apply(&SingleDisplayConfiguration {
            device_id: Some(d("D3")),
            device_prep: Some(DevicePrep::EnsureOnlyDisplay),
            ..Default::default()
        }),
        ApplyResult::Ok
    );
    assert_eq!(mgr.revert(), RevertResult::Ok);
    assert_eq!(driver.current_topology().unwrap(), original_topology);
    assert!(!audio.is_captured());
    assert!(mgr.cached_state().is_none());
}

/// `DisplayMode`/`Point` re-export sanity: used directly in the fixtures
/// module, so a smoke test here keeps the import honest under `cargo test`.
#[test]
fn display_mode_and_point_are_constructible() {
    let _ = DisplayMode {
        resolution: Resolution { width: 1, height: 1 },
        refresh_rate: Rational::new(1, 1),
    };
    let _ = Point { x: 0, y: 0 };
}
