//! Integration tests for the `--simulate` wiring
//!
//! Runs the simulated board end to end through `runner::serve` with a manual clock.

use beam_dash::clock::ManualClock;
use beam_dash::config::DashConfig;
use beam_dash::simulate::{self, SIMULATED_TAG};
use std::time::Duration;

const T0: f64 = 1_700_000_000.0;

#[tokio::test]
async fn test_single_step_registers_board_and_starts_row() {
    let clock = ManualClock::new(T0);
    let simulation = simulate::run(&DashConfig::default(), &clock, std::future::ready(()))
        .await
        .unwrap();
    assert_eq!(simulation.steps, 1);

    let registry = simulation.store.row("ip_addresses", "127.0.0.1").unwrap();
    assert_eq!(registry.get("side"), Some("0"));

    let rows = simulation.store.row_keys("races");
    assert_eq!(rows, vec!["track1#8299999999".to_string()]);

    let row = simulation.store.row("races", &rows[0]).unwrap();
    let car_id = SIMULATED_TAG.to_string();
    assert_eq!(row.get("car_id"), Some(car_id.as_str()));
    // Pin 24 (sensor 6) starts its pattern broken, the rest start clear
    assert_eq!(row.get("t6_s"), Some("1700000000"));
    assert_eq!(row.get("t1_e"), Some("1700000000"));
    assert_eq!(row.get("t6_e"), None);
}

#[tokio::test]
async fn test_configured_address_is_used() {
    let mut config = DashConfig::default();
    config.board.address = Some("10.1.2.3".parse().unwrap());
    config.board.default_side = beam_dash::side::Side::RIGHT;
    config.board.poll_interval_ms = 1;

    let clock = ManualClock::new(T0);
    let simulation = simulate::run(&config, &clock, tokio::time::sleep(Duration::from_millis(20)))
        .await
        .unwrap();
    assert!(simulation.steps >= 1);

    assert!(simulation.store.row("ip_addresses", "127.0.0.1").is_none());
    let registry = simulation.store.row("ip_addresses", "10.1.2.3").unwrap();
    assert_eq!(registry.get("side"), Some("1"));
    assert_eq!(
        simulation.store.row_keys("races"),
        vec!["track2#8299999999".to_string()]
    );
}
