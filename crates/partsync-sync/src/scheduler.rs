//! Event router - turns debounced filesystem events into engine work
//!
//! The [`EventRouter`] sits between the [`FileWatcher`](super::watcher::FileWatcher)
//! and the [`SyncEngine`](super::engine::SyncEngine). It receives raw change
//! events, feeds them through a [`DebouncedChangeQueue`], and hands each
//! settled event to an [`EventSink`] on its own task so a long grace period
//! never stalls the loop.
//!
//! ## Flow
//!
//! ```text
//! FileWatcher ──→ mpsc::Receiver ──→ EventRouter ──→ EventSink::handle_event
//!                                        │              (spawned per event)
//!                                  DebouncedChangeQueue
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::watcher::{ChangeEvent, DebouncedChangeQueue};

/// Receiver of settled change events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_event(&self, event: ChangeEvent) -> anyhow::Result<()>;
}

/// Routes debounced change events to an [`EventSink`]
pub struct EventRouter {
    /// Receiver for change events from the FileWatcher
    change_rx: mpsc::Receiver<ChangeEvent>,
    /// Debounced queue that coalesces rapid-fire events
    queue: DebouncedChangeQueue,
    /// How often the router polls the debounced queue for settled events
    poll_interval: Duration,
    sink: Arc<dyn EventSink>,
    in_flight: JoinSet<()>,
}

impl EventRouter {
    pub fn new(
        change_rx: mpsc::Receiver<ChangeEvent>,
        debounce_delay: Duration,
        poll_interval: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        info!(
            debounce_ms = debounce_delay.as_millis() as u64,
            poll_ms = poll_interval.as_millis() as u64,
            "Creating event router"
        );

        Self {
            change_rx,
            queue: DebouncedChangeQueue::new(debounce_delay),
            poll_interval,
            sink,
            in_flight: JoinSet::new(),
        }
    }

    /// Adds a change event to the debounced queue
    pub fn enqueue(&mut self, event: ChangeEvent) {
        debug!(event = ?event, "Enqueuing change event");
        self.queue.push(event);
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    fn dispatch(&mut self, events: Vec<ChangeEvent>) {
        for event in events {
            debug!(path = %event.path().display(), event = ?event, "Settled");
            let sink = Arc::clone(&self.sink);
            self.in_flight.spawn(async move {
                let path = event.path().to_path_buf();
                if let Err(e) = sink.handle_event(event).await {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "Event handling failed");
                }
            });
        }
    }

    /// Main event loop
    ///
    /// Runs until `cancel` fires or the change channel closes. On channel
    /// close every pending event is flushed and in-flight handlers are
    /// awaited; on cancellation in-flight handlers are aborted.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Event router starting");

        let mut poll_timer = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(pending = self.queue.pending_count(), "Event router cancelled");
                    self.in_flight.abort_all();
                    break;
                }

                event = self.change_rx.recv() => {
                    match event {
                        Some(change) => {
                            debug!(event = ?change, "Router received change event");
                            self.queue.push(change);
                        }
                        None => {
                            info!("Change channel closed, router shutting down");
                            let remaining = self.queue.drain();
                            if !remaining.is_empty() {
                                info!(count = remaining.len(), "Flushing pending events before shutdown");
                            }
                            self.dispatch(remaining);
                            while self.in_flight.join_next().await.is_some() {}
                            break;
                        }
                    }
                }

                _ = poll_timer.tick() => {
                    let settled = self.queue.poll();
                    if !settled.is_empty() {
                        info!(count = settled.len(), "Settled changes ready");
                        self.dispatch(settled);
                    }
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "Event handler panicked");
                        }
                    }
                }
            }
        }

        info!("Event router stopped");
    }
}

// ============================================================================
// Unit tests
// ============================================================================
