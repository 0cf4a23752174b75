/*!
Recording console preview

Answers every capture with a tiny fixed PNG and remembers which controller was
asked, so tests can follow the capture loop of a down host.
*/

use async_trait::async_trait;
use fleetwatch_kernel::config::PowerConf;
use fleetwatch_kernel::preview::{ConsolePreview, ConsolePreviewService, PreviewError};
use parking_lot::Mutex;
use time::OffsetDateTime;

pub const PREVIEW_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfleetwatch";

#[derive(Default)]
pub struct RecordingPreview {
    captures: Mutex<Vec<String>>,
}

impl RecordingPreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures requested for this power controller address.
    pub fn count(&self, power_address: &str) -> usize {
        self.captures.lock().iter().filter(|a| a.as_str() == power_address).count()
    }

    pub fn total(&self) -> usize {
        self.captures.lock().len()
    }
}

#[async_trait]
impl ConsolePreviewService for RecordingPreview {
    async fn capture(&self, power: &PowerConf) -> Result<ConsolePreview, PreviewError> {
        self.captures.lock().push(power.address.clone());
        Ok(ConsolePreview {
            timestamp: OffsetDateTime::now_utc(),
            png: PREVIEW_PNG.to_vec(),
        })
    }
}
