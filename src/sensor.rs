//! Beam-break sensor edge detection.
//!
//! [`EdgeDetector`] is the two-state machine (BROKEN / UNBROKEN) for one sensor.
//! It turns samples into [`SensorEvent`]s:
//!
//! - entering BROKEN emits a Start event, but only when the previous recorded
//!   break is more than the debounce window old
//! - every UNBROKEN sample emits an End event, not just the transition, so a clear
//!   beam keeps refreshing its end column
//!
//! [`BeamBreakSensor`] pairs a detector with the pin it samples and the rowkey its
//! events belong to.

use tracing::info;

use crate::error::DashResult;
use crate::hardware::capabilities::DigitalInput;
use crate::store::RowKey;

/// Which edge of a pass an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Beam broken: something entered the gate
    Start,
    /// Beam clear
    End,
}

/// A timestamped sensor event destined for the active race row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    /// Sensor id (1-based)
    pub sensor_id: u8,
    /// Start or end
    pub kind: EventKind,
    /// Epoch seconds
    pub at: f64,
}

impl SensorEvent {
    /// Column qualifier in the `cf` family, `t{id}_s` or `t{id}_e`
    pub fn column(&self) -> String {
        match self.kind {
            EventKind::Start => format!("t{}_s", self.sensor_id),
            EventKind::End => format!("t{}_e", self.sensor_id),
        }
    }

    /// Cell value
    pub fn value(&self) -> String {
        self.at.to_string()
    }
}

/// Debounced broken/unbroken state for one sensor.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    sensor_id: u8,
    debounce_secs: f64,
    broken_time: f64,
    unbroken_time: f64,
    is_broken: bool,
}

impl EdgeDetector {
    /// A detector in the UNBROKEN state with no history
    pub fn new(sensor_id: u8, debounce_secs: f64) -> Self {
        Self {
            sensor_id,
            debounce_secs,
            broken_time: 0.0,
            unbroken_time: 0.0,
            is_broken: false,
        }
    }

    /// Feed one classified sample
    pub fn observe(&mut self, broken: bool, now: f64) -> Option<SensorEvent> {
        if broken {
            self.on_broken(now)
        } else {
            Some(self.on_unbroken(now))
        }
    }

    fn on_broken(&mut self, now: f64) -> Option<SensorEvent> {
        if self.is_broken {
            return None;
        }
        info!("SENSOR {}: BROKEN", self.sensor_id);
        self.is_broken = true;

        if now - self.broken_time > self.debounce_secs {
            self.broken_time = now;
            Some(self.event(EventKind::Start, now))
        } else {
            None
        }
    }

    fn on_unbroken(&mut self, now: f64) -> SensorEvent {
        self.unbroken_time = now;
        if self.is_broken {
            info!("SENSOR {}: UNBROKEN", self.sensor_id);
            self.is_broken = false;
        }
        self.event(EventKind::End, now)
    }

    fn event(&self, kind: EventKind, at: f64) -> SensorEvent {
        SensorEvent {
            sensor_id: self.sensor_id,
            kind,
            at,
        }
    }

    /// Sensor id
    pub fn sensor_id(&self) -> u8 {
        self.sensor_id
    }

    /// Whether the beam is currently considered broken
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Time of the last recorded (non-suppressed) break
    pub fn broken_time(&self) -> f64 {
        self.broken_time
    }

    /// Time of the last clear sample
    pub fn unbroken_time(&self) -> f64 {
        self.unbroken_time
    }
}

/// A beam-break sensor on one pin.
pub struct BeamBreakSensor<P> {
    input: P,
    detector: EdgeDetector,
    rowkey: Option<RowKey>,
}

impl<P: DigitalInput> BeamBreakSensor<P> {
    /// Wrap `input` as sensor `id`
    pub fn new(id: u8, input: P, debounce_secs: f64) -> Self {
        Self {
            input,
            detector: EdgeDetector::new(id, debounce_secs),
            rowkey: None,
        }
    }

    /// Sample the pin on behalf of `rowkey`
    ///
    /// The input is active-low: a Low level means the beam is broken.
    pub async fn read(&mut self, rowkey: &RowKey, now: f64) -> DashResult<Option<SensorEvent>> {
        self.rowkey = Some(rowkey.clone());
        let level = self.input.read().await?;
        Ok(self.detector.observe(level.is_active_low(), now))
    }

    /// Sensor id
    pub fn id(&self) -> u8 {
        self.detector.sensor_id()
    }

    /// BCM pin
    pub fn pin(&self) -> u8 {
        self.input.pin()
    }

    /// The detector state
    pub fn detector(&self) -> &EdgeDetector {
        &self.detector
    }

    /// Rowkey of the last poll
    pub fn rowkey(&self) -> Option<&RowKey> {
        self.rowkey.as_ref()
    }

    /// Release the underlying pin
    pub fn release(&mut self) {
        self.input.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::Level;
    use crate::hardware::mock::MockInput;
    use crate::side::Side;

    #[test]
    fn unbroken_emits_end_on_every_sample() {
        let mut detector = EdgeDetector::new(3, 10.0);
        for t in [100.0, 100.5, 101.0] {
            let event = detector.observe(false, t).unwrap();
            assert_eq!(event.kind, EventKind::End);
            assert_eq!(event.at, t);
            assert_eq!(event.column(), "t3_e");
        }
        assert_eq!(detector.unbroken_time(), 101.0);
        assert!(!detector.is_broken());
    }

    #[test]
    fn continuous_break_emits_start_once() {
        let mut detector = EdgeDetector::new(1, 10.0);
        let events: Vec<_> = (0..50)
            .filter_map(|i| detector.observe(true, 100.0 + i as f64))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Start);
        assert_eq!(events[0].column(), "t1_s");
        assert_eq!(events[0].at, 100.0);
    }

    #[test]
    fn rebreak_inside_window_is_suppressed() {
        let mut detector = EdgeDetector::new(2, 10.0);
        assert!(detector.observe(true, 100.0).is_some());
        assert!(detector.observe(false, 101.0).is_some());

        // Still inside the 10 second window
        assert!(detector.observe(true, 105.0).is_none());
        assert!(detector.is_broken());
        assert_eq!(detector.broken_time(), 100.0);

        assert!(detector.observe(false, 106.0).is_some());
        let event = detector.observe(true, 110.5).unwrap();
        assert_eq!(event.kind, EventKind::Start);
        assert_eq!(detector.broken_time(), 110.5);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let mut detector = EdgeDetector::new(1, 10.0);
        assert!(detector.observe(true, 50.0).is_some());
        detector.observe(false, 51.0);
        assert!(detector.observe(true, 60.0).is_none());
    }

    #[test]
    #[tracing_test::traced_test]
    fn transitions_are_logged() {
        let mut detector = EdgeDetector::new(5, 10.0);
        detector.observe(true, 100.0);
        detector.observe(false, 101.0);
        assert!(logs_contain("SENSOR 5: BROKEN"));
        assert!(logs_contain("SENSOR 5: UNBROKEN"));
    }

    #[test]
    fn event_value_is_plain_seconds() {
        let event = SensorEvent {
            sensor_id: 4,
            kind: EventKind::Start,
            at: 1700000000.25,
        };
        assert_eq!(event.value(), "1700000000.25");
    }

    #[tokio::test]
    async fn sensor_treats_low_as_broken() {
        let input = MockInput::new(19);
        let handle = input.handle();
        let mut sensor = BeamBreakSensor::new(1, input, 10.0);
        let rowkey = RowKey::new(Side::LEFT, 100.0, 9_999_999_999.0);

        let event = sensor.read(&rowkey, 100.0).await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::End);

        handle.set_level(Level::Low);
        let event = sensor.read(&rowkey, 101.0).await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Start);
        assert!(sensor.detector().is_broken());
        assert_eq!(sensor.rowkey(), Some(&rowkey));
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let input = MockInput::new(19);
        input.handle().fail_next_read();
        let mut sensor = BeamBreakSensor::new(1, input, 10.0);
        let rowkey = RowKey::new(Side::LEFT, 100.0, 9_999_999_999.0);
        assert!(sensor.read(&rowkey, 100.0).await.is_err());
    }
}
