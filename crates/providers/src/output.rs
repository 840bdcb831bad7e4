//! Buffered service output shared by reader tasks and captures.
//!
//! Reader tasks [`push`](OutputBuffer::push) every line a service emits.
//! A capture asks for everything from an instant onwards: buffered entries
//! first, then live ones, in emission order and without gaps.

use std::sync::{Mutex, MutexGuard, PoisonError};

use systest_core::model::payload_text;
use systest_core::provider::{Observation, RecordStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

const LIVE_CAPACITY: usize = 1024;
const STREAM_CAPACITY: usize = 256;

#[derive(Clone)]
struct Entry {
    at: Instant,
    observation: Observation,
}

struct Inner {
    entries: Vec<Entry>,
    /// `None` once the service has stopped emitting.
    live: Option<broadcast::Sender<Entry>>,
}

/// Every observation a service emitted, plus a live feed.
pub struct OutputBuffer {
    inner: Mutex<Inner>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                live: Some(live),
            }),
        }
    }

    /// Records one observation stamped with the current time.
    pub fn push(&self, observation: Observation) {
        let entry = Entry {
            at: Instant::now(),
            observation,
        };
        let mut inner = self.lock();
        if let Some(live) = &inner.live {
            // no receivers is fine; the entry is still buffered
            let _ = live.send(entry.clone());
        }
        inner.entries.push(entry);
    }

    /// Marks the output finished. Open captures end after draining.
    pub fn close(&self) {
        self.lock().live = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().live.is_none()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Streams every observation emitted at or after `since`.
    pub fn subscribe_from(&self, since: Instant) -> RecordStream {
        self.subscribe(Some(since))
    }

    fn subscribe(&self, since: Option<Instant>) -> RecordStream {
        let wanted = move |at: Instant| since.is_none_or(|since| at >= since);
        let (backlog, live) = {
            let inner = self.lock();
            let backlog: Vec<Observation> = inner
                .entries
                .iter()
                .filter(|e| wanted(e.at))
                .map(|e| e.observation.clone())
                .collect();
            (backlog, inner.live.as_ref().map(broadcast::Sender::subscribe))
        };

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(async move {
            for observation in backlog {
                if tx.send(observation).await.is_err() {
                    return;
                }
            }
            let Some(mut live) = live else {
                return;
            };
            loop {
                match live.recv().await {
                    Ok(entry) if wanted(entry.at) => {
                        if tx.send(entry.observation).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "capture fell behind, records dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        rx
    }

    /// Resolves once some observation's text contains `needle`.
    ///
    /// Returns `false` if the output closes first.
    pub async fn wait_for(&self, needle: &str) -> bool {
        let mut stream = self.subscribe(None);
        while let Some(observation) = stream.recv().await {
            if payload_text(&observation.payload).contains(needle) {
                return true;
            }
        }
        false
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
