//! Mock Hardware Implementations
//!
//! Simulated devices for testing without a board attached.
//!
//! # Available Mocks
//!
//! - `MockInput` - GPIO input whose level is set from a shared handle or cycles
//!   through a pattern
//! - `MockTagReader` - RFID reader fed from a queue of scripted reads
//!
//! Both hand out cloneable handles so a test can drive a device after the run loop
//! has taken ownership of it, and can check how often it was read or released.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{DashError, DashResult};
use crate::hardware::capabilities::{DigitalInput, Level, TagId, TagReader};

// =============================================================================
// MockInput - Simulated GPIO Input
// =============================================================================

#[derive(Debug)]
struct PinState {
    level: Level,
    pattern: Vec<Level>,
    reads: u64,
    releases: u32,
    fail_next: bool,
}

/// Mock GPIO input pin
///
/// Starts High (beam intact). With a pattern, each read returns the next level
/// and wraps around.
///
/// # Example
///
/// ```rust,ignore
/// let pin = MockInput::new(19);
/// let handle = pin.handle();
/// handle.set_level(Level::Low);
/// ```
#[derive(Debug)]
pub struct MockInput {
    pin: u8,
    state: Arc<Mutex<PinState>>,
}

/// Shared control over a [`MockInput`]
#[derive(Debug, Clone)]
pub struct MockInputHandle {
    state: Arc<Mutex<PinState>>,
}

impl MockInput {
    /// Create a pin that reads High until told otherwise
    pub fn new(pin: u8) -> Self {
        Self::with_pattern(pin, Vec::new())
    }

    /// Create a pin that cycles through `pattern`, one level per read
    pub fn with_pattern(pin: u8, pattern: Vec<Level>) -> Self {
        Self {
            pin,
            state: Arc::new(Mutex::new(PinState {
                level: Level::High,
                pattern,
                reads: 0,
                releases: 0,
                fail_next: false,
            })),
        }
    }

    /// Handle for driving this pin from elsewhere
    pub fn handle(&self) -> MockInputHandle {
        MockInputHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockInputHandle {
    /// Level returned by subsequent reads (ignored while a pattern is set)
    pub fn set_level(&self, level: Level) {
        self.state.lock().level = level;
    }

    /// Make the next read fail
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next = true;
    }

    /// Number of successful reads so far
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// Number of times the pin was released
    pub fn releases(&self) -> u32 {
        self.state.lock().releases
    }
}

#[async_trait]
impl DigitalInput for MockInput {
    fn pin(&self) -> u8 {
        self.pin
    }

    async fn read(&mut self) -> DashResult<Level> {
        let mut state = self.state.lock();
        if state.fail_next {
            state.fail_next = false;
            return Err(DashError::Hardware {
                pin: self.pin,
                message: "injected read failure".to_string(),
            });
        }

        let level = if state.pattern.is_empty() {
            state.level
        } else {
            state.pattern[(state.reads % state.pattern.len() as u64) as usize]
        };
        state.reads += 1;
        Ok(level)
    }

    fn release(&mut self) {
        self.state.lock().releases += 1;
    }
}

// =============================================================================
// MockTagReader - Simulated RFID Reader
// =============================================================================

#[derive(Debug, Default)]
struct ReaderState {
    queue: VecDeque<DashResult<Option<TagId>>>,
    repeat: Option<TagId>,
    attempts: u64,
}

/// Mock RFID reader
///
/// Each read pops the next scripted result. An empty queue reads as "no tag", or
/// as the repeating tag when one is set.
#[derive(Debug, Default)]
pub struct MockTagReader {
    state: Arc<Mutex<ReaderState>>,
}

/// Shared control over a [`MockTagReader`]
#[derive(Debug, Clone)]
pub struct MockTagReaderHandle {
    state: Arc<Mutex<ReaderState>>,
}

impl MockTagReader {
    /// Create a reader with nothing in the field
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader that sees `tag` on every attempt
    pub fn repeating(tag: TagId) -> Self {
        let reader = Self::new();
        reader.state.lock().repeat = Some(tag);
        reader
    }

    /// Handle for scripting reads from elsewhere
    pub fn handle(&self) -> MockTagReaderHandle {
        MockTagReaderHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockTagReaderHandle {
    /// Queue a tag for the next attempt
    pub fn present(&self, tag: TagId) {
        self.state.lock().queue.push_back(Ok(Some(tag)));
    }

    /// Queue an empty read
    pub fn absent(&self) {
        self.state.lock().queue.push_back(Ok(None));
    }

    /// Queue a reader failure
    pub fn fail(&self, message: &str) {
        self.state
            .lock()
            .queue
            .push_back(Err(DashError::Rfid(message.to_string())));
    }

    /// Number of read attempts so far
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }
}

#[async_trait]
impl TagReader for MockTagReader {
    async fn read_id_no_block(&mut self) -> DashResult<Option<TagId>> {
        let mut state = self.state.lock();
        state.attempts += 1;
        match state.queue.pop_front() {
            Some(result) => result,
            None => Ok(state.repeat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn input_follows_handle_level() {
        let mut pin = MockInput::new(19);
        let handle = pin.handle();
        assert_eq!(pin.read().await.unwrap(), Level::High);
        handle.set_level(Level::Low);
        assert_eq!(pin.read().await.unwrap(), Level::Low);
        assert_eq!(handle.reads(), 2);
    }

    #[tokio::test]
    async fn input_pattern_wraps() {
        let mut pin = MockInput::with_pattern(20, vec![Level::Low, Level::High]);
        let mut levels = Vec::new();
        for _ in 0..3 {
            levels.push(pin.read().await.unwrap());
        }
        assert_eq!(levels, vec![Level::Low, Level::High, Level::Low]);
    }

    #[tokio::test]
    async fn injected_failure_hits_one_read() {
        let mut pin = MockInput::new(21);
        let handle = pin.handle();
        handle.fail_next_read();
        assert!(pin.read().await.is_err());
        assert!(pin.read().await.is_ok());
        assert_eq!(handle.reads(), 1);
    }

    #[tokio::test]
    async fn reader_drains_queue_then_reports_nothing() {
        let mut reader = MockTagReader::new();
        let handle = reader.handle();
        handle.present(TagId(42));
        handle.absent();

        assert_eq!(reader.read_id_no_block().await.unwrap(), Some(TagId(42)));
        assert_eq!(reader.read_id_no_block().await.unwrap(), None);
        assert_eq!(reader.read_id_no_block().await.unwrap(), None);
        assert_eq!(handle.attempts(), 3);
    }

    #[tokio::test]
    async fn repeating_reader_always_sees_tag() {
        let mut reader = MockTagReader::repeating(TagId(7));
        assert_eq!(reader.read_id_no_block().await.unwrap(), Some(TagId(7)));
        assert_eq!(reader.read_id_no_block().await.unwrap(), Some(TagId(7)));
    }
}
