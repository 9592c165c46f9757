//! RFID polling.
//!
//! The reader is asked for a tag at most once per wait interval. Between
//! attempts [`TagPoller::poll`] returns `None` without touching the hardware.

use tracing::debug;

use crate::error::DashResult;
use crate::hardware::capabilities::{TagId, TagReader};

/// Rate-limited wrapper around a [`TagReader`].
pub struct TagPoller<R> {
    reader: R,
    wait_secs: f64,
    last_scan: f64,
}

impl<R: TagReader> TagPoller<R> {
    /// Poll `reader` no more often than every `wait_secs`
    pub fn new(reader: R, wait_secs: f64) -> Self {
        Self {
            reader,
            wait_secs,
            last_scan: 0.0,
        }
    }

    /// Read a tag if the interval has elapsed
    ///
    /// The attempt time is recorded whether or not a tag was present.
    pub async fn poll(&mut self, now: f64) -> DashResult<Option<TagId>> {
        if now - self.last_scan <= self.wait_secs {
            return Ok(None);
        }
        self.last_scan = now;

        let tag = self.reader.read_id_no_block().await?;
        if let Some(tag) = tag {
            debug!(%tag, "tag read");
        }
        Ok(tag)
    }

    /// Time of the last read attempt
    pub fn last_scan(&self) -> f64 {
        self.last_scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTagReader;

    #[tokio::test]
    async fn reads_at_most_once_per_interval() {
        let reader = MockTagReader::repeating(TagId(11));
        let handle = reader.handle();
        let mut poller = TagPoller::new(reader, 3.0);

        assert_eq!(poller.poll(100.0).await.unwrap(), Some(TagId(11)));
        assert_eq!(poller.poll(101.0).await.unwrap(), None);
        assert_eq!(poller.poll(103.0).await.unwrap(), None);
        assert_eq!(handle.attempts(), 1);

        assert_eq!(poller.poll(103.5).await.unwrap(), Some(TagId(11)));
        assert_eq!(handle.attempts(), 2);
        assert_eq!(poller.last_scan(), 103.5);
    }

    #[tokio::test]
    async fn empty_attempt_still_resets_interval() {
        let reader = MockTagReader::new();
        let handle = reader.handle();
        let mut poller = TagPoller::new(reader, 3.0);

        assert_eq!(poller.poll(50.0).await.unwrap(), None);
        handle.present(TagId(3));
        assert_eq!(poller.poll(52.0).await.unwrap(), None);
        assert_eq!(poller.poll(53.5).await.unwrap(), Some(TagId(3)));
    }

    #[tokio::test]
    async fn reader_errors_propagate() {
        let reader = MockTagReader::new();
        reader.handle().fail("spi timeout");
        let mut poller = TagPoller::new(reader, 3.0);
        assert!(poller.poll(10.0).await.is_err());
    }
}
