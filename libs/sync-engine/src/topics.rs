use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broker_api::{BackendError, BrokerBackend, TopicSummary};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notify::{Notifier, Surface};

/// What the topic table renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicListState {
    /// Latest filter value typed by the user.
    pub filter: String,
    /// Bumped on every filter change; identifies the newest request chain.
    pub sequence: u64,
    /// Sequence whose result is displayed. 0 = nothing fetched yet.
    pub applied_sequence: u64,
    pub topics: Vec<TopicSummary>,
    /// Last failure of the current chain, cleared on success.
    pub last_error: Option<SyncError>,
}

impl TopicListState {
    /// The displayed list belongs to the latest filter.
    pub fn is_current(&self) -> bool {
        self.applied_sequence == self.sequence && self.sequence != 0
    }
}

/// Position of one request chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchAttempt {
    pub sequence: u64,
    pub attempt_count: u32,
}

/// Listing kept failing past the retry cap; the connection is presumed broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub filter: String,
    pub attempts: u32,
    pub last_error: BackendError,
}

#[derive(Clone)]
struct ChainContext {
    backend: Arc<dyn BrokerBackend>,
    state: Arc<watch::Sender<TopicListState>>,
    notifier: Notifier,
    escalations: mpsc::Sender<Escalation>,
    escalated: Arc<AtomicBool>,
    config: SyncConfig,
}

/// Keeps the topic listing in sync with the filter text.
///
/// Filter edits are debounced; failures are retried at a fixed interval and
/// escalated once the cap is exhausted. A chain superseded by a newer filter
/// is cancelled and its late results are never applied.
pub struct TopicListSynchronizer {
    ctx: ChainContext,
    chain: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TopicListSynchronizer {
    pub fn new(
        backend: Arc<dyn BrokerBackend>,
        config: SyncConfig,
        notifier: Notifier,
        escalations: mpsc::Sender<Escalation>,
    ) -> Self {
        let (state, _) = watch::channel(TopicListState::default());
        Self {
            ctx: ChainContext {
                backend,
                state: Arc::new(state),
                notifier,
                escalations,
                escalated: Arc::new(AtomicBool::new(false)),
                config,
            },
            chain: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TopicListState> {
        self.ctx.state.subscribe()
    }

    pub fn state(&self) -> TopicListState {
        self.ctx.state.borrow().clone()
    }

    pub fn has_escalated(&self) -> bool {
        self.ctx.escalated.load(Ordering::Acquire)
    }

    /// Record a filter edit. The request goes out after the quiet window
    /// unless another edit arrives first.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        let filter = filter.into();
        let mut sequence = 0;
        self.ctx.state.send_modify(|s| {
            s.sequence += 1;
            s.filter = filter.clone();
            sequence = s.sequence;
        });
        self.restart_chain(filter, sequence);
    }

    /// Re-fetch the current filter (after create/drop).
    pub fn refresh(&mut self) {
        let filter = self.ctx.state.borrow().filter.clone();
        self.set_filter(filter);
    }

    fn restart_chain(&mut self, filter: String, sequence: u64) {
        if let Some((token, _)) = self.chain.take() {
            token.cancel();
        }
        if self.has_escalated() {
            tracing::debug!(sequence, "synchronizer escalated, not fetching");
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_chain(self.ctx.clone(), filter, sequence, token.clone()));
        self.chain = Some((token, handle));
    }

    /// Cancel any pending debounce, request or retry.
    pub async fn shutdown(mut self) {
        if let Some((token, handle)) = self.chain.take() {
            token.cancel();
            let _ = handle.await;
        }
    }
}

impl Drop for TopicListSynchronizer {
    fn drop(&mut self) {
        if let Some((token, _)) = self.chain.take() {
            token.cancel();
        }
    }
}

async fn run_chain(ctx: ChainContext, filter: String, sequence: u64, token: CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(ctx.config.debounce()) => {}
        _ = token.cancelled() => return,
    }

    let mut attempt = FetchAttempt { sequence, attempt_count: 0 };
    loop {
        tracing::debug!(filter = %filter, sequence, attempt = attempt.attempt_count, "fetching topics");
        let result = tokio::select! {
            r = ctx.backend.fetch_topics(&filter) => r,
            _ = token.cancelled() => return,
        };

        match result {
            Ok(topics) => {
                let applied = apply(&ctx.state, attempt, topics);
                if !applied {
                    tracing::debug!(sequence, "discarding superseded topic list");
                }
                return;
            }
            Err(e) => {
                if !record_failure(&ctx.state, attempt, &e) {
                    return;
                }
                if attempt.attempt_count < ctx.config.max_retries {
                    tracing::warn!(
                        filter = %filter,
                        sequence,
                        attempt = attempt.attempt_count,
                        error = %e,
                        "topic listing failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.config.retry_delay()) => {}
                        _ = token.cancelled() => return,
                    }
                    attempt.attempt_count += 1;
                    continue;
                }
                escalate(&ctx, filter, attempt, e);
                return;
            }
        }
    }
}

/// Replace the list wholesale if the chain is still the newest one.
fn apply(
    state: &watch::Sender<TopicListState>,
    attempt: FetchAttempt,
    topics: Vec<TopicSummary>,
) -> bool {
    state.send_if_modified(|s| {
        if s.sequence != attempt.sequence {
            return false;
        }
        s.topics = topics;
        s.applied_sequence = attempt.sequence;
        s.last_error = None;
        true
    })
}

/// `false` when the chain has been superseded.
fn record_failure(
    state: &watch::Sender<TopicListState>,
    attempt: FetchAttempt,
    err: &BackendError,
) -> bool {
    let mut current = false;
    state.send_if_modified(|s| {
        current = s.sequence == attempt.sequence;
        if current {
            s.last_error = Some(SyncError::TransientFetch(err.clone()));
        }
        current
    });
    current
}

fn escalate(ctx: &ChainContext, filter: String, attempt: FetchAttempt, last_error: BackendError) {
    if ctx.escalated.swap(true, Ordering::AcqRel) {
        return;
    }
    let attempts = attempt.attempt_count + 1;
    tracing::error!(filter = %filter, attempts, error = %last_error, "topic listing exhausted retries, escalating");
    ctx.notifier.failure(&SyncError::Escalated { attempts }, Surface::Inline);
    let escalation = Escalation { filter, attempts, last_error };
    if ctx.escalations.try_send(escalation).is_err() {
        tracing::warn!("escalation receiver unavailable");
    }
}
