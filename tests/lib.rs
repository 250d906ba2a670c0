//! Shared fixtures for MissionLink integration tests and benchmarks.

use missionlink_core::{
    FailureMode, ItemPayload, Loopback, MissionItemSet, SimVehicle, TransferConfig,
};
use std::time::Duration;

/// Item count used by the failure-mode tables
pub const TABLE_ITEM_COUNT: u16 = 8;

/// Engine configuration with a short timeout and the default retry limit
#[must_use]
pub fn fast_config() -> TransferConfig {
    TransferConfig::default().with_ack_timeout(Duration::from_millis(50))
}

/// Mission with distinct, recognisable payloads
///
/// # Panics
///
/// Panics if `count` is `u16::MAX`.
#[must_use]
pub fn test_mission(count: u16) -> MissionItemSet {
    MissionItemSet::from_payloads((0..count).map(|i| {
        let f = f64::from(i);
        ItemPayload {
            command: 16 + (i % 5),
            frame: (i % 3) as u8,
            params: [f, f + 0.25, f + 0.5, f + 0.75, 47.0 + f / 1000.0, 8.5 - f / 1000.0, 100.0 + f],
            current: i == 0,
            autocontinue: i % 2 == 0,
        }
    }))
    .expect("mission fits in 16-bit indices")
}

/// Loopback whose vehicle injects `mode`
///
/// # Panics
///
/// Panics if [`fast_config`] is rejected.
#[must_use]
pub fn loopback_with(mode: FailureMode, fail_first_time_only: bool, vehicle_items: u16) -> Loopback {
    let mut vehicle = SimVehicle::with_mission(test_mission(vehicle_items));
    vehicle.set_failure_mode(mode, fail_first_time_only);
    Loopback::new(fast_config(), vehicle).expect("valid config")
}

/// Loopback that has already uploaded `items` successfully
///
/// # Panics
///
/// Panics if the setup upload fails.
#[must_use]
pub fn loopback_after_upload(items: &MissionItemSet) -> Loopback {
    let mut loopback = Loopback::new(fast_config(), SimVehicle::new()).expect("valid config");
    loopback
        .engine
        .begin_write(items.clone())
        .expect("engine idle");
    loopback.run();
    assert_eq!(loopback.engine.mission_items(), items, "setup upload failed");
    loopback.engine.observer_mut().take();
    loopback
}
