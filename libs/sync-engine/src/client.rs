use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{broadcast, mpsc};

use broker_api::{BrokerBackend, ConnectionProfile, NewTopic};

use crate::admin::{TopicAdmin, TopicSelection};
use crate::bridge::SubscriptionBridge;
use crate::config::SyncConfig;
use crate::error::{SyncError, ValidationError};
use crate::notify::{Notification, Notifier, Surface};
use crate::produce::ProduceDispatcher;
use crate::session::SessionController;
use crate::settings::ConnectionSettings;
use crate::topics::{Escalation, TopicListState, TopicListSynchronizer};

// ═══════════════════════════════════════════════════════════════
//  ConnectedSession
// ═══════════════════════════════════════════════════════════════

/// Everything that exists only while connected. Dropped as a unit.
pub struct ConnectedSession {
    pub settings: ConnectionSettings,
    pub consumer: SessionController,
    pub topics: TopicListSynchronizer,
    pub producer: ProduceDispatcher,
    pub admin: TopicAdmin,
    pub selection: TopicSelection,
    escalations: mpsc::Receiver<Escalation>,
}

impl ConnectedSession {
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.topics.set_filter(filter);
    }

    pub fn topic_list(&self) -> TopicListState {
        self.topics.state()
    }

    /// Create, then re-list with the current filter.
    pub async fn create_topic(&mut self, topic: &NewTopic) -> Result<(), SyncError> {
        self.admin.create_topic(topic).await?;
        self.topics.refresh();
        Ok(())
    }

    /// Drop every checked topic, then re-list.
    pub async fn drop_selected(&mut self) -> Result<Vec<String>, SyncError> {
        let names = self.selection.selected();
        self.admin.drop_topics(&names).await?;
        self.selection.clear();
        self.topics.refresh();
        Ok(names)
    }

    /// Teardown order: consumer stop, bridge release, synchronizer cancel.
    async fn teardown(self) {
        self.consumer.teardown().await;
        self.topics.shutdown().await;
    }
}

// ═══════════════════════════════════════════════════════════════
//  AdminClient
// ═══════════════════════════════════════════════════════════════

/// Connection lifecycle: `Disconnected --connect--> Connected --disconnect
/// or escalation--> Disconnected`.
pub struct AdminClient {
    backend: Arc<dyn BrokerBackend>,
    config: SyncConfig,
    notifier: Notifier,
    connected: Option<ConnectedSession>,
    /// Consumption generation tags, unique for the client's lifetime.
    generations: Arc<AtomicU64>,
    /// Shown on the connect screen after a failed connect or an escalation.
    last_error: Option<SyncError>,
}

impl AdminClient {
    pub fn new(backend: Arc<dyn BrokerBackend>, config: SyncConfig) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        Self {
            backend,
            config,
            notifier,
            connected: None,
            generations: Arc::new(AtomicU64::new(0)),
            last_error: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    pub fn connection(&self) -> Option<&ConnectedSession> {
        self.connected.as_ref()
    }

    pub fn connection_mut(&mut self) -> Result<&mut ConnectedSession, SyncError> {
        self.connected.as_mut().ok_or(SyncError::NotConnected)
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub async fn saved_profiles(&self) -> Result<Vec<ConnectionProfile>, SyncError> {
        self.backend.fetch_saved_brokers().await.map_err(|e| {
            let err = SyncError::Backend(e.with_context("saved brokers"));
            self.notifier.failure(&err, Surface::Inline);
            err
        })
    }

    /// Connect and build the per-connection components. An existing
    /// connection is torn down first.
    pub async fn connect(&mut self, profile: ConnectionProfile) -> Result<&mut ConnectedSession, SyncError> {
        if self.connected.is_some() {
            // old session is already torn down at this point
            if let Err(e) = self.disconnect().await {
                tracing::warn!(error = %e, "disconnect before reconnect failed");
            }
        }
        if profile.host.trim().is_empty() {
            return Err(self.connect_failed(ValidationError::EmptyHost.into()));
        }

        let info = match self.backend.connect(&profile).await {
            Ok(info) => info,
            Err(e) => {
                let err = SyncError::Connection(e.with_context(format!("connect '{}'", profile.name)));
                return Err(self.connect_failed(err));
            }
        };

        if profile.schema_registry.is_some() && !info.schema_registry_connected {
            tracing::warn!(connection = %profile.name, "schema registry configured but not connected");
        }
        tracing::info!(
            connection = %profile.name,
            host = %profile.host,
            schema_registry = info.schema_registry_connected,
            "connected"
        );

        let settings = ConnectionSettings::new(profile, info);
        let bridge = SubscriptionBridge::spawn(self.backend.subscribe_messages(), self.config.buffer_capacity);
        let consumer = SessionController::new(
            self.backend.clone(),
            bridge,
            self.notifier.clone(),
            settings.clone(),
            self.config.default_count,
        )
        .with_generations(self.generations.clone());
        let (escalation_tx, escalations) = mpsc::channel(1);
        let mut topics = TopicListSynchronizer::new(
            self.backend.clone(),
            self.config.clone(),
            self.notifier.clone(),
            escalation_tx,
        );
        topics.set_filter("");

        self.last_error = None;
        let session = self.connected.insert(ConnectedSession {
            producer: ProduceDispatcher::new(self.backend.clone(), self.notifier.clone(), settings.clone()),
            admin: TopicAdmin::new(self.backend.clone(), self.notifier.clone(), settings.clone()),
            selection: TopicSelection::default(),
            settings,
            consumer,
            topics,
            escalations,
        });
        Ok(session)
    }

    fn connect_failed(&mut self, err: SyncError) -> SyncError {
        self.notifier.failure(&err, Surface::Inline);
        self.last_error = Some(err.clone());
        err
    }

    /// Full teardown. The client ends Disconnected even if the backend
    /// `disconnect` command fails.
    pub async fn disconnect(&mut self) -> Result<(), SyncError> {
        let Some(session) = self.connected.take() else {
            return Ok(());
        };
        let name = session.settings.name().to_string();
        session.teardown().await;

        match self.backend.disconnect().await {
            Ok(()) => {
                tracing::info!(connection = %name, "disconnected");
                Ok(())
            }
            Err(e) => {
                let err = SyncError::Backend(e.with_context("disconnect"));
                self.notifier.failure(&err, Surface::Toast);
                Err(err)
            }
        }
    }

    /// Resolves when the topic synchronizer gives up. Pending forever while
    /// disconnected, so it can sit in a `select!` next to user input.
    pub async fn next_escalation(&mut self) -> Escalation {
        let Some(session) = self.connected.as_mut() else {
            return std::future::pending().await;
        };
        match session.escalations.recv().await {
            Some(escalation) => escalation,
            None => std::future::pending().await,
        }
    }

    /// Disconnect after an escalation and keep the reason for the connect screen.
    pub async fn handle_escalation(&mut self, escalation: Escalation) -> SyncError {
        tracing::warn!(
            filter = %escalation.filter,
            attempts = escalation.attempts,
            error = %escalation.last_error,
            "disconnecting after repeated listing failures"
        );
        if let Err(e) = self.disconnect().await {
            tracing::warn!(error = %e, "disconnect after escalation failed");
        }
        let err = SyncError::Escalated { attempts: escalation.attempts };
        self.last_error = Some(err.clone());
        err
    }
}
