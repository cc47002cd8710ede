//! Shared inbound audio buffer.
//!
//! The receive loop appends raw bytes as they arrive; the processing loop
//! drains everything accumulated since its last pass. Appends never block on
//! processing, and a drain takes the whole buffer in one step so no byte is
//! lost or seen twice.

use std::sync::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct TurnBuffer {
    bytes: Mutex<Vec<u8>>,
    ready: Notify,
}

impl TurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake the consumer.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.lock().extend_from_slice(chunk);
        self.ready.notify_one();
    }

    /// Take every buffered byte, leaving the buffer empty.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves after the next `append`, or immediately if one happened since
    /// the last wakeup was consumed.
    pub fn notified(&self) -> Notified<'_> {
        self.ready.notified()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        // A panic while holding the lock leaves plain bytes behind; keep using them.
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
