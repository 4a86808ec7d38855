use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broker_api::{BackendError, FeedEvent, MessageFeed};

use crate::buffer::{BufferView, BufferWriter, MessageBuffer};

// ═══════════════════════════════════════════════════════════════
//  SessionGate
// ═══════════════════════════════════════════════════════════════

/// Generation currently allowed to write into the buffer. 0 = closed.
///
/// Shared between the session controller (open/close) and the bridge task
/// (admission check on every event).
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    live: Arc<AtomicU64>,
}

impl SessionGate {
    pub fn open(&self, generation: u64) {
        self.live.store(generation, Ordering::Release);
    }

    pub fn close(&self) {
        self.live.store(0, Ordering::Release);
    }

    pub fn current(&self) -> Option<u64> {
        match self.live.load(Ordering::Acquire) {
            0 => None,
            g => Some(g),
        }
    }

    pub fn admits(&self, tag: u64) -> bool {
        tag != 0 && self.live.load(Ordering::Acquire) == tag
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stats
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Counters {
    ingested: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStats {
    pub ingested: u64,
    /// Events from a superseded or stopped session.
    pub dropped: u64,
}

enum BridgeCommand {
    Reset { ack: oneshot::Sender<()> },
}

// ═══════════════════════════════════════════════════════════════
//  SubscriptionBridge
// ═══════════════════════════════════════════════════════════════

/// Forwards live events from the backend push feed into the message buffer.
///
/// Subscribes once for the lifetime of the connection. The spawned task is
/// the buffer's only writer; events whose tag is not the open generation
/// are dropped.
pub struct SubscriptionBridge {
    gate: SessionGate,
    commands: mpsc::UnboundedSender<BridgeCommand>,
    view: BufferView,
    counters: Arc<Counters>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SubscriptionBridge {
    pub fn spawn(feed: Box<dyn MessageFeed>, capacity: usize) -> Self {
        let (writer, view) = MessageBuffer::shared(capacity);
        let gate = SessionGate::default();
        let counters = Arc::new(Counters::default());
        let token = CancellationToken::new();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run_bridge(
            feed,
            writer,
            gate.clone(),
            counters.clone(),
            command_rx,
            token.clone(),
        ));

        Self {
            gate,
            commands,
            view,
            counters,
            token,
            handle: Some(handle),
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn view(&self) -> BufferView {
        self.view.clone()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Clear the buffer, then admit `generation`. Resolves once the reset
    /// has been applied by the bridge task, so no stale message survives
    /// into the new session.
    pub async fn begin(&self, generation: u64) -> Result<(), BackendError> {
        self.gate.close();
        let (ack, done) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Reset { ack })
            .map_err(|_| BackendError::io("subscription bridge stopped"))?;
        done.await
            .map_err(|_| BackendError::io("subscription bridge stopped"))?;
        self.gate.open(generation);
        Ok(())
    }

    /// Stop admitting events. Takes effect before the next event is checked.
    pub fn end(&self) {
        self.gate.close();
    }

    /// Release the feed subscription and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.gate.close();
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = ?e, "subscription bridge task failed");
            }
        }
    }
}

impl Drop for SubscriptionBridge {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_bridge(
    mut feed: Box<dyn MessageFeed>,
    writer: BufferWriter,
    gate: SessionGate,
    counters: Arc<Counters>,
    mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
    token: CancellationToken,
) {
    tracing::debug!("subscription bridge started");
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            cmd = commands.recv() => match cmd {
                Some(BridgeCommand::Reset { ack }) => {
                    writer.reset();
                    let _ = ack.send(());
                }
                None => break,
            },

            event = feed.recv() => match event {
                Some(event) => ingest(&writer, &gate, &counters, event),
                None => {
                    tracing::info!("message feed closed");
                    break;
                }
            },
        }
    }
    // feed dropped here → subscription released
    tracing::debug!(
        ingested = counters.ingested.load(Ordering::Relaxed),
        dropped = counters.dropped.load(Ordering::Relaxed),
        "subscription bridge stopped"
    );
}

fn ingest(writer: &BufferWriter, gate: &SessionGate, counters: &Counters, event: FeedEvent) {
    if gate.admits(event.tag) {
        writer.ingest(event.message);
        counters.ingested.fetch_add(1, Ordering::Relaxed);
    } else {
        tracing::trace!(
            tag = event.tag,
            live = ?gate.current(),
            topic = %event.topic,
            "dropping event from inactive session"
        );
        counters.dropped.fetch_add(1, Ordering::Relaxed);
    }
}
