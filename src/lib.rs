//! # Beam Dash
//!
//! Sensor-to-database bridge for a racetrack. Each board along the track polls its
//! beam-break sensors and an RFID reader and writes timing and identity events into
//! Cloud Bigtable, where the race dashboard reads them.
//!
//! ## Crate Structure
//!
//! - **`clock`**: Epoch-seconds time sources (system and manual).
//! - **`config`**: Layered configuration via `figment`. See `config::DashConfig`.
//! - **`error`**: The `DashError` enum used across the crate.
//! - **`hardware`**: `DigitalInput` and `TagReader` capability traits with mock and
//!   Raspberry Pi implementations.
//! - **`identity`**: Rate-limited RFID polling.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`runner`**: The polling loop, rowkey lifecycle and pin release guard.
//! - **`sensor`**: Debounced beam-break edge detection.
//! - **`side`**: Which lane group a board and a car belong to.
//! - **`simulate`**: Mock board wiring behind `--simulate`.
//! - **`store`**: `RowStore` trait with in-memory and Bigtable backends.

pub mod clock;
pub mod config;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod logging;
pub mod runner;
pub mod sensor;
pub mod side;
pub mod simulate;
pub mod store;

pub use error::{DashError, DashResult};
