//! Hardware Capabilities
//!
//! Small traits for what a track board reads:
//!
//! - A beam-break sensor is a `DigitalInput`
//! - The RFID reader is a `TagReader`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is `Send` so the loop can live on any runtime
//! - Uses the crate `DashResult` for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn beam_clear<P: DigitalInput>(pin: &mut P) -> DashResult<bool> {
//!     Ok(pin.read().await? == Level::High)
//! }
//! ```

use async_trait::async_trait;
use std::fmt;

use crate::error::DashResult;

/// Logic level of a digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Pin pulled high (beam intact on an active-low sensor)
    High,
    /// Pin driven low (beam broken on an active-low sensor)
    Low,
}

impl Level {
    /// Whether an active-low input is asserted
    pub fn is_active_low(self) -> bool {
        self == Level::Low
    }
}

/// RFID tag identifier.
///
/// The reader folds the UID bytes into one integer; it is written to the race row
/// as decimal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub u64);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability: Digital Input
///
/// A single input pin.
///
/// # Contract
/// - `read` samples the current level; it does not wait for an edge
/// - `release` returns the pin to its power-on state; callers invoke it once at
///   shutdown
#[async_trait]
pub trait DigitalInput: Send {
    /// BCM pin number, for logs and errors
    fn pin(&self) -> u8;

    /// Sample the pin
    async fn read(&mut self) -> DashResult<Level>;

    /// Give the pin back to the system
    fn release(&mut self);
}

/// Capability: RFID Tag Reader
///
/// # Contract
/// - `read_id_no_block` returns promptly with `None` when no tag is in the field
/// - rate limiting is the caller's job
#[async_trait]
pub trait TagReader: Send {
    /// Try to read a tag without waiting for one
    async fn read_id_no_block(&mut self) -> DashResult<Option<TagId>>;
}

#[async_trait]
impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn pin(&self) -> u8 {
        (**self).pin()
    }

    async fn read(&mut self) -> DashResult<Level> {
        (**self).read().await
    }

    fn release(&mut self) {
        (**self).release()
    }
}

#[async_trait]
impl<T: TagReader + ?Sized> TagReader for Box<T> {
    async fn read_id_no_block(&mut self) -> DashResult<Option<TagId>> {
        (**self).read_id_no_block().await
    }
}
