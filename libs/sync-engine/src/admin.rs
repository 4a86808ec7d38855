use std::collections::BTreeSet;
use std::sync::Arc;

use broker_api::{BrokerBackend, NewTopic, TopicDetails, TopicSummary};

use crate::error::{SyncError, ValidationError};
use crate::notify::{Notifier, Surface};
use crate::settings::ConnectionSettings;

pub const MIN_TOPIC_NAME_LEN: usize = 2;

// ═══════════════════════════════════════════════════════════════
//  Validation
// ═══════════════════════════════════════════════════════════════

/// Field checks run before `create_topic` reaches the backend.
pub fn validate_new_topic(topic: &NewTopic) -> Result<(), ValidationError> {
    if topic.name.trim().chars().count() < MIN_TOPIC_NAME_LEN {
        return Err(ValidationError::TopicNameTooShort { min: MIN_TOPIC_NAME_LEN });
    }
    let minimums: [(&'static str, i64); 4] = [
        ("partitions", topic.partitions as i64),
        ("min in-sync replicas", topic.min_insync_replicas as i64),
        ("replication factor", topic.replication_factor as i64),
        ("retention ms", topic.retention_ms),
    ];
    for (field, value) in minimums {
        if value < 1 {
            return Err(ValidationError::BelowMinimum { field, min: 1 });
        }
    }
    if topic.max_message_size == Some(0) {
        return Err(ValidationError::NotPositive("max message size"));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  TopicAdmin
// ═══════════════════════════════════════════════════════════════

/// One-shot topic and schema commands. Every failure is surfaced, none retried.
pub struct TopicAdmin {
    backend: Arc<dyn BrokerBackend>,
    notifier: Notifier,
    settings: ConnectionSettings,
}

impl TopicAdmin {
    pub fn new(backend: Arc<dyn BrokerBackend>, notifier: Notifier, settings: ConnectionSettings) -> Self {
        Self { backend, notifier, settings }
    }

    pub async fn create_topic(&self, topic: &NewTopic) -> Result<(), SyncError> {
        if let Err(e) = validate_new_topic(topic) {
            let err = SyncError::from(e);
            self.notifier.failure(&err, Surface::Inline);
            return Err(err);
        }
        self.backend
            .create_topic(topic)
            .await
            .map_err(|e| self.surface(e.with_context(format!("create topic '{}'", topic.name))))?;
        tracing::info!(
            topic = %topic.name,
            partitions = topic.partitions,
            cleanup_policy = topic.cleanup_policy.as_str(),
            "topic created"
        );
        self.notifier.success(format!("Topic {} created", topic.name));
        Ok(())
    }

    pub async fn drop_topics(&self, names: &[String]) -> Result<(), SyncError> {
        if names.is_empty() {
            let err = SyncError::from(ValidationError::EmptySelection);
            self.notifier.failure(&err, Surface::Toast);
            return Err(err);
        }
        self.backend
            .drop_topics(names)
            .await
            .map_err(|e| self.surface(e.with_context("drop topics")))?;
        tracing::info!(topics = ?names, "topics dropped");
        self.notifier.success(format!("Dropped {} topic(s)", names.len()));
        Ok(())
    }

    pub async fn fetch_topic(&self, name: &str) -> Result<TopicDetails, SyncError> {
        self.backend
            .fetch_topic(name)
            .await
            .map_err(|e| self.surface(e.with_context(format!("topic '{name}'"))))
    }

    pub async fn schema_subjects(&self) -> Result<Vec<String>, SyncError> {
        self.require_registry()?;
        self.backend
            .fetch_schema_subjects()
            .await
            .map_err(|e| self.surface(e.with_context("schema subjects")))
    }

    pub async fn schema(&self, subject: &str) -> Result<String, SyncError> {
        self.require_registry()?;
        self.backend
            .fetch_schema(subject)
            .await
            .map_err(|e| self.surface(e.with_context(format!("schema '{subject}'"))))
    }

    fn require_registry(&self) -> Result<(), SyncError> {
        if self.settings.schema_registry_connected {
            return Ok(());
        }
        let err = SyncError::from(ValidationError::SchemaRegistryUnavailable);
        self.notifier.failure(&err, Surface::Inline);
        Err(err)
    }

    fn surface(&self, e: broker_api::BackendError) -> SyncError {
        let err = SyncError::Backend(e);
        self.notifier.failure(&err, Surface::Toast);
        err
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicSelection
// ═══════════════════════════════════════════════════════════════

/// Checked rows of the topic table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSelection {
    checked: BTreeSet<String>,
}

impl TopicSelection {
    pub fn toggle(&mut self, name: &str) -> bool {
        if self.checked.remove(name) {
            false
        } else {
            self.checked.insert(name.to_string());
            true
        }
    }

    /// Every listed topic is checked (and the list is non-empty).
    pub fn all_checked(&self, topics: &[TopicSummary]) -> bool {
        !topics.is_empty() && topics.iter().all(|t| self.checked.contains(&t.name))
    }

    /// Header checkbox: uncheck everything if all are checked, else check all listed.
    pub fn toggle_all(&mut self, topics: &[TopicSummary]) {
        if self.all_checked(topics) {
            self.checked.clear();
        } else {
            self.checked = topics.iter().map(|t| t.name.clone()).collect();
        }
    }

    /// Forget names that are no longer listed.
    pub fn retain_listed(&mut self, topics: &[TopicSummary]) {
        self.checked.retain(|name| topics.iter().any(|t| &t.name == name));
    }

    pub fn is_checked(&self, name: &str) -> bool {
        self.checked.contains(name)
    }

    pub fn selected(&self) -> Vec<String> {
        self.checked.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.checked.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.checked.is_empty()
    }
}
