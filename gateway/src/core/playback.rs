//! Ordered playback of synthesized speech segments.
//!
//! [`PlaybackQueue`] owns a worker task that pulls one [`AudioSegment`] at a
//! time and waits for the [`AudioSink`] to finish it before starting the next.
//! Segments only leave the queue by being played or by an explicit
//! [`PlaybackQueue::stop_and_clear`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One unit of synthesized speech.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub id: String,
    pub payload: Bytes,
    pub mime: String,
    /// Text this audio was synthesized from
    pub text: String,
    /// Position within the session, assigned on enqueue
    pub ordinal: u64,
}

impl AudioSegment {
    pub fn new(payload: Bytes, mime: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            mime: mime.into(),
            text: text.into(),
            ordinal: 0,
        }
    }
}

/// Playback errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode audio segment: {0}")]
    Decode(String),
    #[error("Audio output failed: {0}")]
    Output(String),
}

/// Output device the queue plays into.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Play a segment to completion.
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError>;

    /// Halt whatever is currently playing.
    async fn stop(&self);
}

/// Notifications from the playback worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A segment played to the end
    Finished { id: String, ordinal: u64 },
    /// A segment could not be played; the queue moves on
    Failed { id: String, ordinal: u64, error: String },
    /// The queue ran empty; a good moment to resume listening
    Drained,
}

/// Completion callback type
pub type PlaybackCallback = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

struct QueueShared {
    pending: Mutex<VecDeque<AudioSegment>>,
    wake: Notify,
    callback: Mutex<Option<PlaybackCallback>>,
    interrupt: Mutex<CancellationToken>,
    playing: AtomicBool,
    next_ordinal: AtomicU64,
}

impl QueueShared {
    fn notify(&self, event: PlaybackEvent) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

/// Strictly sequential audio playback queue.
pub struct PlaybackQueue {
    shared: Arc<QueueShared>,
    worker: JoinHandle<()>,
}

impl PlaybackQueue {
    /// Create a queue and spawn its worker on the current runtime.
    pub fn new<S: AudioSink>(sink: S) -> Self {
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            callback: Mutex::new(None),
            interrupt: Mutex::new(CancellationToken::new()),
            playing: AtomicBool::new(false),
            next_ordinal: AtomicU64::new(0),
        });
        let worker = tokio::spawn(run_worker(shared.clone(), Arc::new(sink)));
        Self { shared, worker }
    }

    /// Register the completion callback, replacing any previous one.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(PlaybackEvent) + Send + Sync + 'static,
    {
        *self.shared.callback.lock() = Some(Arc::new(callback));
    }

    /// Append a segment. Returns the ordinal it was assigned.
    pub fn enqueue(&self, mut segment: AudioSegment) -> u64 {
        let ordinal = self.shared.next_ordinal.fetch_add(1, Ordering::AcqRel);
        segment.ordinal = ordinal;
        self.shared.pending.lock().push_back(segment);
        self.shared.wake.notify_one();
        ordinal
    }

    /// No segments are waiting. The one currently playing doesn't count.
    pub fn is_empty(&self) -> bool {
        self.shared.pending.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Nothing waiting and nothing playing.
    pub fn is_idle(&self) -> bool {
        self.is_empty() && !self.shared.playing.load(Ordering::Acquire)
    }

    /// Snapshot of the waiting segments, in play order.
    pub fn items(&self) -> Vec<AudioSegment> {
        self.shared.pending.lock().iter().cloned().collect()
    }

    /// Drop every waiting segment and interrupt the current one.
    ///
    /// Returns how many waiting segments were discarded.
    pub fn stop_and_clear(&self) -> usize {
        let dropped = {
            let mut pending = self.shared.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        let previous = std::mem::replace(&mut *self.shared.interrupt.lock(), CancellationToken::new());
        previous.cancel();
        debug!(dropped, "Playback queue cleared");
        dropped
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<S: AudioSink>(shared: Arc<QueueShared>, sink: Arc<S>) {
    loop {
        let next = shared.pending.lock().pop_front();
        let Some(segment) = next else {
            if shared.playing.swap(false, Ordering::AcqRel) {
                shared.notify(PlaybackEvent::Drained);
            }
            shared.wake.notified().await;
            continue;
        };

        shared.playing.store(true, Ordering::Release);
        let interrupt = shared.interrupt.lock().clone();

        tokio::select! {
            result = sink.play(&segment) => match result {
                Ok(()) => shared.notify(PlaybackEvent::Finished {
                    id: segment.id.clone(),
                    ordinal: segment.ordinal,
                }),
                Err(e) => {
                    warn!(ordinal = segment.ordinal, "Playback failed: {}", e);
                    shared.notify(PlaybackEvent::Failed {
                        id: segment.id.clone(),
                        ordinal: segment.ordinal,
                        error: e.to_string(),
                    });
                }
            },
            _ = interrupt.cancelled() => {
                debug!(ordinal = segment.ordinal, "Playback interrupted");
                sink.stop().await;
            }
        }
    }
}
