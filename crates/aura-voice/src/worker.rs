//! Background worker for post-turn work.
//!
//! Contract: each submitted record is delivered to the observer at most once,
//! best effort, with no ordering relative to the turn loop. When the queue is
//! full the record is dropped and counted. Records still queued when the
//! worker is dropped are processed until the queue drains, then the task ends.

use crate::context::{TurnObserver, TurnRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct BackgroundWorker {
    tx: mpsc::Sender<TurnRecord>,
    handle: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl BackgroundWorker {
    pub fn spawn(observer: Arc<dyn TurnObserver>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TurnRecord>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                debug!(session_id = %record.session_id, "Worker: notifying turn observer");
                observer.on_turn(record).await;
            }
        });
        Self {
            tx,
            handle,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a record without waiting. Returns false if it was dropped.
    pub fn submit(&self, record: TurnRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %record.session_id, "Worker queue full, dropping turn record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %record.session_id, "Worker stopped, dropping turn record");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting records and wait for the queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl TurnObserver for Recorder {
        async fn on_turn(&self, record: TurnRecord) {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.seen.lock().unwrap().push(record.user_text);
        }
    }

    fn record(text: &str) -> TurnRecord {
        TurnRecord {
            session_id: "s".into(),
            user_id: "u".into(),
            user_text: text.into(),
            assistant_text: "ok".into(),
        }
    }

    #[tokio::test]
    async fn delivers_queued_records_before_shutdown_returns() {
        let observer = Arc::new(Recorder::default());
        let worker = BackgroundWorker::spawn(observer.clone(), 8);
        assert!(worker.submit(record("a")));
        assert!(worker.submit(record("b")));
        worker.shutdown().await;
        assert_eq!(*observer.seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn full_queue_drops_records() {
        let gate = Arc::new(Notify::new());
        let observer = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
        });
        let worker = BackgroundWorker::spawn(observer.clone(), 1);
        assert!(worker.submit(record("first")));
        // Let the worker pick up "first" and block on the gate.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(worker.submit(record("queued")));
        assert!(!worker.submit(record("overflow")));
        assert_eq!(worker.dropped(), 1);

        gate.notify_one();
        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_one();
        worker.shutdown().await;
        let seen = observer.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["first", "queued"]);
    }
}
