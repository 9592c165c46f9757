//! The polling loop.
//!
//! Each [`RunLoop::step`] does, in order:
//!
//! 1. Clear the rowkey when no scan was accepted within the reset window.
//! 2. Try the RFID reader if the scan interval has elapsed. A tag from the other
//!    side switches sides and starts a new row; any tag starts a new row when none
//!    is active; a tag from the current side otherwise just keeps the row alive.
//! 3. With a rowkey active, read every sensor and write its event into that row.
//!
//! Nothing is retried. The first error ends [`RunLoop::run_until`], after the pins
//! have been released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{DashConfig, TimingConfig};
use crate::error::DashResult;
use crate::hardware::capabilities::{DigitalInput, TagId, TagReader};
use crate::identity::TagPoller;
use crate::sensor::BeamBreakSensor;
use crate::side::{self, Side, SideSelector};
use crate::store::{Cell, RowKey, RowStore, CAR_ID_COLUMN};

/// Owns the sensors and releases their pins exactly once.
///
/// Release happens on the first call to [`PinGuard::release`] or on drop,
/// whichever comes first, so unwinding out of the loop still frees the pins.
pub struct PinGuard<P: DigitalInput> {
    sensors: Vec<BeamBreakSensor<P>>,
    released: bool,
}

impl<P: DigitalInput> PinGuard<P> {
    /// Take ownership of `sensors`
    pub fn new(sensors: Vec<BeamBreakSensor<P>>) -> Self {
        Self {
            sensors,
            released: false,
        }
    }

    /// Release every pin; later calls do nothing
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for sensor in &mut self.sensors {
            sensor.release();
        }
        info!(pins = self.sensors.len(), "GPIO pins released");
    }

    /// Whether the pins have been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The guarded sensors
    pub fn sensors(&self) -> &[BeamBreakSensor<P>] {
        &self.sensors
    }

    fn sensors_mut(&mut self) -> &mut [BeamBreakSensor<P>] {
        &mut self.sensors
    }
}

impl<P: DigitalInput> Drop for PinGuard<P> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build one sensor per configured pin, ids starting at 1
pub fn build_sensors<P, F>(config: &DashConfig, mut open: F) -> DashResult<Vec<BeamBreakSensor<P>>>
where
    P: DigitalInput,
    F: FnMut(u8) -> DashResult<P>,
{
    config
        .sensor_pins()
        .map(|(id, pin)| {
            let input = open(pin)?;
            Ok(BeamBreakSensor::new(id, input, config.timing.debounce_secs))
        })
        .collect()
}

/// Resolve this board, wire up the loop and run it until `shutdown`
///
/// Returns the number of completed steps.
pub async fn serve<P, R, S, C, F>(
    config: &DashConfig,
    store: Arc<S>,
    sensors: Vec<BeamBreakSensor<P>>,
    reader: R,
    clock: &C,
    shutdown: F,
) -> DashResult<u64>
where
    P: DigitalInput,
    R: TagReader,
    S: RowStore,
    C: Clock,
    F: Future<Output = ()>,
{
    let address = match config.board.address {
        Some(address) => address,
        None => side::local_address()?,
    };
    info!(%address, sensors = sensors.len(), "board starting");

    let selector = SideSelector::connect(
        Arc::clone(&store),
        config.bigtable.registry_table.clone(),
        address,
        config.board.default_side,
    )
    .await?;
    let poller = TagPoller::new(reader, config.timing.rfid_wait_secs);

    let mut run_loop = RunLoop::start(config, sensors, poller, selector, store).await?;
    run_loop.run_until(clock, shutdown).await
}

/// What one loop iteration did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// The rowkey expired at the start of this step
    pub rowkey_cleared: bool,
    /// Tag read this step, if any
    pub scanned: Option<TagId>,
    /// A new race row was started
    pub rowkey_started: bool,
    /// The board switched sides
    pub side_switched: bool,
    /// Sensor events written
    pub events_written: usize,
}

/// Loop state and collaborators.
pub struct RunLoop<P: DigitalInput, R, S> {
    pins: PinGuard<P>,
    poller: TagPoller<R>,
    selector: SideSelector<S>,
    store: Arc<S>,
    races_table: String,
    timing: TimingConfig,
    poll_interval: Duration,
    side: Side,
    rowkey: Option<RowKey>,
    last_seen: f64,
}

impl<P, R, S> RunLoop<P, R, S>
where
    P: DigitalInput,
    R: TagReader,
    S: RowStore,
{
    /// Assemble the loop and read this board's starting side
    pub async fn start(
        config: &DashConfig,
        sensors: Vec<BeamBreakSensor<P>>,
        poller: TagPoller<R>,
        selector: SideSelector<S>,
        store: Arc<S>,
    ) -> DashResult<Self> {
        let pins = PinGuard::new(sensors);
        let side = selector.get_side().await?;
        info!(side = %side, "STARTING SIDE: {}", side.car_column());

        Ok(Self {
            pins,
            poller,
            selector,
            store,
            races_table: config.bigtable.races_table.clone(),
            timing: config.timing,
            poll_interval: Duration::from_millis(config.board.poll_interval_ms),
            side,
            rowkey: None,
            last_seen: 0.0,
        })
    }

    /// One iteration at time `now`
    pub async fn step(&mut self, now: f64) -> DashResult<StepReport> {
        let mut report = StepReport::default();

        if now - self.last_seen > self.timing.rowkey_reset_secs {
            if let Some(expired) = self.rowkey.take() {
                info!(rowkey = %expired, "rowkey expired");
                report.rowkey_cleared = true;
            }
        }

        if let Some(tag) = self.poller.poll(now).await? {
            report.scanned = Some(tag);
            self.accept_scan(tag, now, &mut report).await?;
        }

        if let Some(rowkey) = &self.rowkey {
            for sensor in self.pins.sensors_mut() {
                let Some(event) = sensor.read(rowkey, now).await? else {
                    continue;
                };
                // Events land in the row the sensor was polled for
                let target = sensor.rowkey().unwrap_or(rowkey);
                self.store
                    .mutate_row(
                        &self.races_table,
                        target.as_str(),
                        &[Cell::new(event.column(), event.value())],
                    )
                    .await?;
                report.events_written += 1;
            }
        }

        Ok(report)
    }

    async fn accept_scan(&mut self, tag: TagId, now: f64, report: &mut StepReport) -> DashResult<()> {
        let switch = self.selector.is_side(tag, self.side).await?;

        if switch || self.rowkey.is_none() {
            let side = match self.selector.side_of(tag).await? {
                Some(side) => side,
                None => self.selector.get_side().await?,
            };
            if side != self.side {
                info!(from = %self.side, to = %side, "switching side");
                report.side_switched = true;
            }
            self.side = side;

            let rowkey = RowKey::new(self.side, now, self.timing.max_value);
            self.store
                .mutate_row(
                    &self.races_table,
                    rowkey.as_str(),
                    &[Cell::new(CAR_ID_COLUMN, tag.to_string())],
                )
                .await?;
            info!(%tag, rowkey = %rowkey, "race row started");
            self.rowkey = Some(rowkey);
            report.rowkey_started = true;
        } else {
            debug!(%tag, "tag seen again on same side");
        }

        self.last_seen = now;
        Ok(())
    }

    /// Step until `shutdown` resolves or a step fails, then release the pins
    ///
    /// Returns the number of completed steps.
    pub async fn run_until<C, F>(&mut self, clock: &C, shutdown: F) -> DashResult<u64>
    where
        C: Clock,
        F: Future<Output = ()>,
    {
        let result = self.drive(clock, shutdown).await;
        if let Err(e) = &result {
            warn!(error = %e, "polling loop stopped");
        }
        self.pins.release();
        result
    }

    async fn drive<C, F>(&mut self, clock: &C, shutdown: F) -> DashResult<u64>
    where
        C: Clock,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut steps = 0u64;
        loop {
            self.step(clock.now()).await?;
            steps += 1;

            tokio::select! {
                _ = &mut shutdown => {
                    info!(steps, "shutdown requested");
                    return Ok(steps);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Active rowkey, if any
    pub fn rowkey(&self) -> Option<&RowKey> {
        self.rowkey.as_ref()
    }

    /// Side currently streamed
    pub fn side(&self) -> Side {
        self.side
    }

    /// Time the last scan was accepted
    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    /// The pin guard
    pub fn pins(&self) -> &PinGuard<P> {
        &self.pins
    }
}
