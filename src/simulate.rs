//! Simulated board.
//!
//! Mock pins, a reader that keeps presenting one car, and an in-memory store, wired
//! through the same [`runner::serve`](crate::runner::serve) path as real hardware.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::DashConfig;
use crate::error::DashResult;
use crate::hardware::capabilities::{Level, TagId};
use crate::hardware::mock::{MockInput, MockTagReader};
use crate::runner;
use crate::sensor::BeamBreakSensor;
use crate::store::MemoryStore;

/// Tag the simulated reader presents on every scan
pub const SIMULATED_TAG: TagId = TagId(0x88_041A_2BBD);

const PATTERN_LEN: usize = 400;
const BREAK_LEN: usize = 20;

/// Outcome of a simulated run.
#[derive(Debug)]
pub struct Simulation {
    /// Loop iterations completed
    pub steps: u64,
    /// Everything the board wrote
    pub store: Arc<MemoryStore>,
}

/// Mock sensors for the configured pins
///
/// Pins are staggered by their number so the beams break one after another.
pub fn sensors(config: &DashConfig) -> DashResult<Vec<BeamBreakSensor<MockInput>>> {
    runner::build_sensors(config, |pin| {
        let offset = usize::from(pin % 8) * 40;
        let mut pattern = vec![Level::High; PATTERN_LEN];
        for level in pattern.iter_mut().skip(offset).take(BREAK_LEN) {
            *level = Level::Low;
        }
        Ok(MockInput::with_pattern(pin, pattern))
    })
}

/// Run the simulated board until `shutdown`
pub async fn run<C, F>(config: &DashConfig, clock: &C, shutdown: F) -> DashResult<Simulation>
where
    C: Clock,
    F: Future<Output = ()>,
{
    info!("simulating: mock hardware, in-memory store");
    let mut config = config.clone();
    if config.board.address.is_none() {
        config.board.address = Some(Ipv4Addr::LOCALHOST);
    }

    let store = Arc::new(MemoryStore::new());
    let sensors = sensors(&config)?;
    let reader = MockTagReader::repeating(SIMULATED_TAG);

    let steps = runner::serve(&config, Arc::clone(&store), sensors, reader, clock, shutdown).await?;
    info!(
        steps,
        rows = store.row_keys(&config.bigtable.races_table).len(),
        "simulation finished"
    );
    Ok(Simulation { steps, store })
}
