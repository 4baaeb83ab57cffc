//! End-to-end control scenarios through the engine task
//!
//! Readings go through the same queue the router uses; time is paused so
//! the ten minute shutoff window can be walked through exactly.

use futures::future::join_all;
use gateway_node::control::{
    ActuatorControlEngine, ControlHandle, ControlSnapshot, IlluminationRule, Sensor, ThermalPhase,
    ThermalRule,
};
use gateway_node::testing::RecordingOutput;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

const MINUTE: Duration = Duration::from_secs(60);

struct Rig {
    handle: ControlHandle,
    lights: Arc<RecordingOutput>,
    climate: Arc<RecordingOutput>,
}

fn rig() -> Rig {
    let lights = Arc::new(RecordingOutput::new("lights"));
    let climate = Arc::new(RecordingOutput::new("climate"));
    let engine = ActuatorControlEngine::new(
        IlluminationRule::default(),
        ThermalRule::default(),
        lights.clone(),
        climate.clone(),
    );
    let (handle, _task) = engine.spawn(32);
    Rig {
        handle,
        lights,
        climate,
    }
}

impl Rig {
    /// Submit a reading and wait until the engine has applied it
    async fn reading(&self, sensor: Sensor, value: i32) -> ControlSnapshot {
        assert!(self.handle.submit(sensor, value).await);
        self.snapshot().await
    }

    async fn check(&self) -> ControlSnapshot {
        assert!(self.handle.tick().await);
        self.snapshot().await
    }

    async fn snapshot(&self) -> ControlSnapshot {
        self.handle.snapshot().await.expect("engine running")
    }
}

#[tokio::test(start_paused = true)]
async fn test_cooling_room_switches_off_after_ten_minutes() {
    let rig = rig();

    let s = rig.reading(Sensor::Illumination, 1).await;
    assert!(s.lights_on());

    let s = rig.reading(Sensor::Temperature, 25).await;
    assert!(s.climate_on());

    let s = rig.reading(Sensor::Temperature, 18).await;
    assert_eq!(s.thermal_phase, ThermalPhase::PendingOff);

    advance(9 * MINUTE).await;
    let s = rig.reading(Sensor::Temperature, 18).await;
    assert!(s.climate_on(), "repeated cool reading must not restart or fire the timer");

    advance(MINUTE - Duration::from_secs(1)).await;
    let s = rig.check().await;
    assert!(s.climate_on(), "one second before the deadline the output stays on");

    advance(Duration::from_secs(1)).await;
    let s = rig.check().await;
    assert!(!s.climate_on());
    assert_eq!(s.thermal.pending_off_since, None);
    assert!(s.lights_on(), "illumination is independent of the thermal rule");

    assert_eq!(rig.climate.transitions(), vec![false, true, false]);
    assert_eq!(rig.lights.transitions(), vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_in_band_reading_cancels_pending_shutoff() {
    let rig = rig();

    rig.reading(Sensor::Temperature, 25).await;
    rig.reading(Sensor::Temperature, 18).await;
    let s = rig.reading(Sensor::Temperature, 22).await;
    assert_eq!(s.thermal_phase, ThermalPhase::On);

    advance(11 * MINUTE).await;
    let s = rig.check().await;

    assert!(s.climate_on());
    assert_eq!(s.thermal.pending_off_since, None);
    assert_eq!(rig.climate.transitions(), vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_hot_reading_cancels_pending_shutoff() {
    let rig = rig();

    rig.reading(Sensor::Temperature, 25).await;
    rig.reading(Sensor::Temperature, 19).await;
    advance(5 * MINUTE).await;
    rig.reading(Sensor::Temperature, 24).await;
    advance(6 * MINUTE).await;

    let s = rig.check().await;
    assert!(s.climate_on());
}

#[tokio::test(start_paused = true)]
async fn test_ticker_switches_off_without_manual_checks() {
    let rig = rig();
    let _ticker = rig.handle.spawn_ticker(Duration::from_secs(10));

    rig.reading(Sensor::Temperature, 25).await;
    rig.reading(Sensor::Temperature, 18).await;

    advance(10 * MINUTE + Duration::from_secs(10)).await;

    // The ticker task needs a few polls to push its checks through
    let mut climate_on = true;
    for _ in 0..100 {
        tokio::task::yield_now().await;
        climate_on = rig.snapshot().await.climate_on();
        if !climate_on {
            break;
        }
    }
    assert!(!climate_on);
}

#[tokio::test]
async fn test_concurrent_submitters_are_serialized() {
    let rig = rig();

    let submits = (0..20).map(|i| {
        let handle = rig.handle.clone();
        async move {
            let value = if i % 2 == 0 { 1 } else { 5 };
            handle.submit(Sensor::Illumination, value).await
        }
    });
    let results = join_all(submits).await;
    assert!(results.into_iter().all(|accepted| accepted));

    let s = rig.reading(Sensor::Illumination, 0).await;
    assert!(s.lights_on());
    assert_eq!(s.last_illumination, Some(0));
    // Every accepted reading wrote the line exactly once, plus the initial low
    assert_eq!(rig.lights.history().len(), 1 + 20 + 1);
}
