//! Proximity evaluation - the armed/triggered hysteresis state machine
//!
//! `evaluate` is pure: it takes the current state and one sample and returns
//! the next state plus at most one crossing event. One `Entered` fires per
//! contiguous stay inside the radius no matter how many samples land there.
//! There is no debounce band: jitter straddling the boundary re-fires on every
//! full out-in cycle.

use crate::domain::geo::distance_to_target;
use crate::domain::types::{AlarmEvent, AlarmRadius, AlarmState, LocationSample, Target};
use tracing::{debug, info};

/// Compute the next alarm state for a sample
pub fn evaluate(
    state: AlarmState,
    sample: &LocationSample,
    target: &Target,
    radius: AlarmRadius,
) -> (AlarmState, Option<AlarmEvent>) {
    let distance_m = distance_to_target(sample, target);
    let inside = distance_m <= radius.meters();

    match state {
        AlarmState::Armed if inside => {
            (AlarmState::Triggered, Some(AlarmEvent::Entered { distance_m, sample: *sample }))
        }
        AlarmState::Triggered if !inside => {
            (AlarmState::Armed, Some(AlarmEvent::Exited { distance_m, sample: *sample }))
        }
        _ => (state, None),
    }
}

/// Owner of the single AlarmState for one monitoring session
#[derive(Debug)]
pub struct ProximityEvaluator {
    target: Target,
    radius: AlarmRadius,
    state: AlarmState,
    last_distance_m: Option<f64>,
}

impl ProximityEvaluator {
    /// Create an evaluator in the Armed state
    pub fn new(target: Target, radius: AlarmRadius) -> Self {
        Self { target, radius, state: AlarmState::Armed, last_distance_m: None }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn last_distance_m(&self) -> Option<f64> {
        self.last_distance_m
    }

    /// Apply one sample, returning the crossing it caused (if any)
    pub fn on_sample(&mut self, sample: &LocationSample) -> Option<AlarmEvent> {
        let prev = self.state;
        let (next, event) = evaluate(prev, sample, &self.target, self.radius);
        self.state = next;

        if prev != AlarmState::Stopped {
            self.last_distance_m = Some(distance_to_target(sample, &self.target));
        }

        match event {
            Some(ref e) => info!(
                event = %e.as_str(),
                from = %prev.as_str(),
                to = %next.as_str(),
                distance_m = format!("{:.1}", e.distance_m()),
                radius_m = %self.radius.meters(),
                "alarm_transition"
            ),
            None => debug!(
                state = %next.as_str(),
                distance_m = ?self.last_distance_m,
                ts = %sample.timestamp,
                "sample_evaluated"
            ),
        }

        event
    }

    /// Return to Stopped; later samples are ignored
    pub fn stop(&mut self) {
        self.state = AlarmState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::destination_point;

    const TARGET_LAT: f64 = -6.1666;
    const TARGET_LON: f64 = 106.8300;

    fn target() -> Target {
        Target::new(TARGET_LAT, TARGET_LON).unwrap()
    }

    fn radius(m: f64) -> AlarmRadius {
        AlarmRadius::new(m).unwrap()
    }

    /// Sample due north of the target at the given distance
    fn sample_at(distance_m: f64, ts: u64) -> LocationSample {
        let (lat, lon) = destination_point(TARGET_LAT, TARGET_LON, 0.0, distance_m);
        LocationSample::new(lat, lon, ts)
    }

    fn run(distances: &[f64], radius_m: f64) -> (Vec<AlarmState>, Vec<Option<&'static str>>) {
        let mut evaluator = ProximityEvaluator::new(target(), radius(radius_m));
        let mut states = Vec::new();
        let mut events = Vec::new();
        for (i, &d) in distances.iter().enumerate() {
            let event = evaluator.on_sample(&sample_at(d, i as u64 * 1000));
            states.push(evaluator.state());
            events.push(event.map(|e| e.as_str()));
        }
        (states, events)
    }

    #[test]
    fn test_outside_stays_armed() {
        let (states, events) = run(&[250.0, 900.0, 200.5, 5_000.0, 201.0], 200.0);
        assert!(states.iter().all(|s| *s == AlarmState::Armed));
        assert!(events.iter().all(Option::is_none));
    }

    #[test]
    fn test_first_entry_fires_once() {
        let (states, events) = run(&[400.0, 180.0, 120.0, 50.0, 10.0], 200.0);
        assert_eq!(events, vec![None, Some("entered"), None, None, None]);
        assert_eq!(states[1], AlarmState::Triggered);
        assert_eq!(states[4], AlarmState::Triggered);
    }

    #[test]
    fn test_reentry_fires_twice() {
        let (_, events) = run(&[250.0, 150.0, 300.0, 190.0], 200.0);
        assert_eq!(events, vec![None, Some("entered"), Some("exited"), Some("entered")]);
        let entered = events.iter().filter(|e| **e == Some("entered")).count();
        assert_eq!(entered, 2);
    }

    #[test]
    fn test_boundary_flap_is_not_debounced() {
        // Pin the radius to the computed distance of the on-boundary fix
        let t = target();
        let on_edge = sample_at(200.0, 0);
        let edge_radius = radius(distance_to_target(&on_edge, &t));
        let samples = [on_edge, sample_at(200.1, 1000), sample_at(199.9, 2000)];

        let mut evaluator = ProximityEvaluator::new(t, edge_radius);
        let mut states = Vec::new();
        let mut events = Vec::new();
        for s in &samples {
            events.push(evaluator.on_sample(s).map(|e| e.as_str()));
            states.push(evaluator.state());
        }

        assert_eq!(
            states,
            vec![AlarmState::Triggered, AlarmState::Armed, AlarmState::Triggered]
        );
        assert_eq!(events, vec![Some("entered"), Some("exited"), Some("entered")]);
    }

    #[test]
    fn test_target_itself_is_inside() {
        let t = target();
        let s = LocationSample::new(TARGET_LAT, TARGET_LON, 0);
        let (state, event) = evaluate(AlarmState::Armed, &s, &t, radius(0.001));
        assert_eq!(state, AlarmState::Triggered);
        assert!(matches!(event, Some(AlarmEvent::Entered { distance_m, .. }) if distance_m == 0.0));
    }

    #[test]
    fn test_stopped_never_triggers() {
        let t = target();
        let inside = sample_at(10.0, 0);
        let outside = sample_at(1_000.0, 1);
        assert_eq!(
            evaluate(AlarmState::Stopped, &inside, &t, radius(200.0)),
            (AlarmState::Stopped, None)
        );
        assert_eq!(
            evaluate(AlarmState::Stopped, &outside, &t, radius(200.0)),
            (AlarmState::Stopped, None)
        );
    }

    #[test]
    fn test_stop_discards_state() {
        let mut evaluator = ProximityEvaluator::new(target(), radius(200.0));
        assert!(evaluator.on_sample(&sample_at(50.0, 0)).is_some());
        evaluator.stop();
        assert_eq!(evaluator.state(), AlarmState::Stopped);
        assert!(evaluator.on_sample(&sample_at(500.0, 1)).is_none());
        assert!(evaluator.on_sample(&sample_at(50.0, 2)).is_none());
        assert_eq!(evaluator.state(), AlarmState::Stopped);
    }

    #[test]
    fn test_event_carries_sample_and_distance() {
        let mut evaluator = ProximityEvaluator::new(target(), radius(200.0));
        let s = sample_at(150.0, 7_000);
        match evaluator.on_sample(&s) {
            Some(AlarmEvent::Entered { distance_m, sample }) => {
                assert!((distance_m - 150.0).abs() < 1e-6);
                assert_eq!(sample.timestamp, 7_000);
            }
            other => panic!("expected Entered, got {other:?}"),
        }
        assert!((evaluator.last_distance_m().unwrap() - 150.0).abs() < 1e-6);
    }
}
