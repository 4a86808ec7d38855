use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use broker_api::{BrokerBackend, ConsumeRequest, ConsumptionMode};

use crate::bridge::{BridgeStats, SubscriptionBridge};
use crate::buffer::BufferView;
use crate::error::SyncError;
use crate::notify::{Notifier, Surface};
use crate::settings::ConnectionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Active,
}

/// Checkbox view of the selected mode. Exactly one flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFlags {
    pub tail: bool,
    pub from_beginning: bool,
    pub last_n: bool,
}

impl From<ConsumptionMode> for ModeFlags {
    fn from(mode: ConsumptionMode) -> Self {
        Self {
            tail: mode == ConsumptionMode::Tail,
            from_beginning: mode == ConsumptionMode::FromBeginning,
            last_n: mode == ConsumptionMode::LastN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub topic: Option<String>,
    pub mode: ConsumptionMode,
    pub status: SessionStatus,
    /// Bumped on every accepted `start`.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { generation: u64 },
    /// A session is already active; re-entrant starts are ignored, not queued.
    AlreadyActive,
}

/// Owns the consumption lifecycle for one topic at a time.
///
/// `Idle --start ok--> Active --stop--> Idle`, `Idle --start err--> Idle`.
/// Mode changes never move between the two states.
pub struct SessionController {
    backend: Arc<dyn BrokerBackend>,
    bridge: Option<SubscriptionBridge>,
    notifier: Notifier,
    settings: ConnectionSettings,
    session: Session,
    /// Source of generation tags. Shared across connections so a tag is
    /// never reused while stragglers of an older session may still arrive.
    generations: Arc<AtomicU64>,
    count: usize,
    /// Mode the backend is running with; cleared on stop.
    running: Option<ConsumptionMode>,
    /// A start or stop failed, so the backend may still hold a consumer.
    dirty: bool,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn BrokerBackend>,
        bridge: SubscriptionBridge,
        notifier: Notifier,
        settings: ConnectionSettings,
        default_count: usize,
    ) -> Self {
        Self {
            backend,
            bridge: Some(bridge),
            notifier,
            settings,
            session: Session::default(),
            generations: Arc::new(AtomicU64::new(0)),
            count: default_count,
            running: None,
            dirty: false,
        }
    }

    /// Draw generation tags from a counter that outlives this controller.
    pub fn with_generations(mut self, generations: Arc<AtomicU64>) -> Self {
        self.generations = generations;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn is_active(&self) -> bool {
        self.session.status == SessionStatus::Active
    }

    pub fn mode(&self) -> ConsumptionMode {
        self.session.mode
    }

    pub fn flags(&self) -> ModeFlags {
        self.session.mode.into()
    }

    pub fn running_mode(&self) -> Option<ConsumptionMode> {
        self.running
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn messages(&self) -> Option<BufferView> {
        self.bridge.as_ref().map(SubscriptionBridge::view)
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.as_ref().map(SubscriptionBridge::stats).unwrap_or_default()
    }

    /// Select the single active mode. Ignored while a session is active.
    pub fn set_mode(&mut self, mode: ConsumptionMode) -> bool {
        if self.is_active() {
            tracing::debug!(requested = %mode, current = %self.session.mode, "mode change ignored while active");
            return false;
        }
        self.session.mode = mode;
        true
    }

    /// N for `FromBeginning` / `LastN`. Ignored while active.
    pub fn set_count(&mut self, count: usize) -> bool {
        if self.is_active() || count == 0 {
            return false;
        }
        self.count = count;
        true
    }

    pub async fn start(
        &mut self,
        topic: &str,
        mode: ConsumptionMode,
    ) -> Result<StartOutcome, SyncError> {
        if self.is_active() {
            tracing::debug!(
                topic = %topic,
                active = ?self.session.topic,
                "start ignored, session already active"
            );
            return Ok(StartOutcome::AlreadyActive);
        }

        let bridge = self.bridge.as_ref().ok_or(SyncError::NotConnected)?;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        self.session.generation = generation;
        self.session.topic = Some(topic.to_string());
        self.session.mode = mode;

        if let Err(e) = bridge.begin(generation).await {
            let err = SyncError::Consumption(e);
            self.notifier.failure(&err, Surface::Toast);
            return Err(err);
        }

        let request = ConsumeRequest {
            topic: topic.to_string(),
            mode,
            count: self.count,
            tag: generation,
        };
        match self.backend.consume_messages(&request).await {
            Ok(()) => {
                self.session.status = SessionStatus::Active;
                self.running = Some(mode);
                tracing::info!(
                    connection = %self.settings.name(),
                    topic = %topic,
                    mode = %mode,
                    count = self.count,
                    generation,
                    "consumption started"
                );
                Ok(StartOutcome::Started { generation })
            }
            Err(e) => {
                bridge.end();
                self.dirty = true;
                let err = SyncError::Consumption(e.with_context(format!("consume '{topic}'")));
                self.notifier.failure(&err, Surface::Toast);
                Err(err)
            }
        }
    }

    /// Idempotent. From Idle this is a no-op without a backend call.
    pub async fn stop(&mut self) -> Result<(), SyncError> {
        if !self.is_active() {
            return Ok(());
        }
        if let Some(bridge) = &self.bridge {
            bridge.end();
        }
        self.session.status = SessionStatus::Idle;
        self.running = None;
        self.stop_backend().await
    }

    async fn stop_backend(&mut self) -> Result<(), SyncError> {
        match self.backend.stop_consumers().await {
            Ok(()) => {
                self.dirty = false;
                tracing::info!(
                    topic = ?self.session.topic,
                    generation = self.session.generation,
                    "consumption stopped"
                );
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                let err = SyncError::Consumption(e.with_context("stop consumers"));
                self.notifier.failure(&err, Surface::Toast);
                Err(err)
            }
        }
    }

    /// Dispose of the controller: stop the backend consumer (also after an
    /// earlier failure), then release the feed subscription.
    pub async fn teardown(mut self) {
        let result = if self.is_active() {
            self.stop().await
        } else if self.dirty {
            self.stop_backend().await
        } else {
            Ok(())
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "stop during teardown failed");
        }
        self.dirty = false;
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if !(self.is_active() || self.dirty) {
            return;
        }
        if let Some(bridge) = &self.bridge {
            bridge.end();
        }
        // Dropped without teardown: still make sure the backend consumer goes away.
        let backend = self.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.stop_consumers().await {
                        tracing::warn!(error = %e, "stop on drop failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("session controller dropped outside a runtime, consumer may linger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_mutually_exclusive() {
        for mode in ConsumptionMode::ALL {
            let f = ModeFlags::from(mode);
            let set = [f.tail, f.from_beginning, f.last_n].iter().filter(|b| **b).count();
            assert_eq!(set, 1, "{mode}");
        }
    }

    #[test]
    fn default_session_is_idle_tail() {
        let s = Session::default();
        assert_eq!(s.status, SessionStatus::Idle);
        assert_eq!(s.mode, ConsumptionMode::Tail);
        assert_eq!(s.generation, 0);
        assert!(s.topic.is_none());
    }
}
