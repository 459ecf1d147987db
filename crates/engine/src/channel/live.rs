//! Live push channel
//!
//! Consumes a [`LiveSource`] until the mount is cancelled or the source
//! gives up. Reconnects belong to the transport; this adapter only mirrors
//! what the transport reports into the view's connectivity state.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use qadash_common::ConnectivityState;

use crate::normalizer::InboundItem;
use crate::view::{Ingested, RunViewHandle};

/// Something a live transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Subscription (re)established
    Open,
    Message(InboundItem),
    /// Transport failure. The transport decides whether to retry.
    Error(String),
}

/// Push subscription scoped to one run.
///
/// `next_event` returning `None` means the source is finished for good.
#[async_trait]
pub trait LiveSource: Send {
    async fn next_event(&mut self) -> Option<LiveEvent>;

    /// Release the underlying connection. Called once on disposal.
    async fn close(&mut self);
}

/// Live channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Error,
}

/// Why `LiveChannel::run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveExit {
    Cancelled,
    SourceEnded,
}

pub struct LiveChannel {
    source: Box<dyn LiveSource>,
    state: LiveState,
}

impl LiveChannel {
    pub fn new(source: Box<dyn LiveSource>) -> Self {
        Self {
            source,
            state: LiveState::Connecting,
        }
    }

    pub fn state(&self) -> LiveState {
        self.state
    }

    fn transition(&mut self, run_id: &str, state: LiveState) {
        if self.state != state {
            debug!(run_id, from = ?self.state, to = ?state, "live channel state");
            self.state = state;
        }
    }

    /// Drive the source, applying each message in arrival order.
    pub async fn run(mut self, handle: &mut RunViewHandle, cancel: &CancellationToken) -> LiveExit {
        let run_id = handle.view().run_id().to_string();
        info!(%run_id, "live channel started");

        let exit = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LiveExit::Cancelled,
                event = self.source.next_event() => event,
            };

            match event {
                Some(LiveEvent::Open) => {
                    self.transition(&run_id, LiveState::Open);
                    handle.update(|view| view.set_connectivity(ConnectivityState::open()));
                }
                Some(LiveEvent::Message(item)) => {
                    if self.state != LiveState::Open {
                        self.transition(&run_id, LiveState::Open);
                    }
                    let outcome = handle.update(|view| {
                        if !view.connectivity().connected {
                            view.set_connectivity(ConnectivityState::open());
                        }
                        let outcome = view.ingest(item, true);
                        if outcome == Ingested::RunExit && !view.is_terminal() {
                            view.finalize();
                        }
                        outcome
                    });
                    debug!(%run_id, ?outcome, "live message applied");
                }
                Some(LiveEvent::Error(message)) => {
                    self.transition(&run_id, LiveState::Reconnecting);
                    handle.update(|view| view.set_connectivity(ConnectivityState::failed(message)));
                }
                None => break LiveExit::SourceEnded,
            }
        };

        let state = match exit {
            LiveExit::Cancelled => {
                self.source.close().await;
                LiveState::Closed
            }
            LiveExit::SourceEnded if handle.view().connectivity().last_error.is_some() => LiveState::Error,
            LiveExit::SourceEnded => LiveState::Closed,
        };
        self.transition(&run_id, state);
        handle.update(|view| {
            let last_error = view.connectivity().last_error.clone();
            view.set_connectivity(ConnectivityState {
                connected: false,
                last_error,
            });
        });

        info!(%run_id, ?exit, "live channel stopped");
        exit
    }
}

/// Producer side of [`memory_source`]
#[derive(Debug, Clone)]
pub struct LiveSender {
    tx: mpsc::UnboundedSender<LiveEvent>,
}

impl LiveSender {
    /// Returns false once the receiving source is gone.
    pub fn send(&self, item: impl Into<InboundItem>) -> bool {
        self.tx.send(LiveEvent::Message(item.into())).is_ok()
    }

    pub fn open(&self) -> bool {
        self.tx.send(LiveEvent::Open).is_ok()
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.tx.send(LiveEvent::Error(message.into())).is_ok()
    }
}

/// In-process live source fed through a [`LiveSender`]
#[derive(Debug)]
pub struct MemoryLiveSource {
    rx: mpsc::UnboundedReceiver<LiveEvent>,
}

/// Unbounded in-memory live source. The source ends when every sender is dropped.
pub fn memory_source() -> (LiveSender, MemoryLiveSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LiveSender { tx }, MemoryLiveSource { rx })
}

#[async_trait]
impl LiveSource for MemoryLiveSource {
    async fn next_event(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
