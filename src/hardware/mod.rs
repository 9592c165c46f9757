//! Track-side hardware.
//!
//! Capability traits for the two device kinds a board talks to, plus the
//! implementations behind them:
//!
//! - [`capabilities`] - `DigitalInput` and `TagReader`
//! - [`mock`] - scripted devices for tests and `--simulate`
//! - `rpi` - rppal-backed GPIO pins and the MFRC522 reader (feature `rpi`)

pub mod capabilities;
pub mod mock;

#[cfg(feature = "rpi")]
pub mod mfrc522;
#[cfg(feature = "rpi")]
pub mod rpi;

pub use capabilities::{DigitalInput, Level, TagId, TagReader};
