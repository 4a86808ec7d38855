//! Client-side live consumption and topic-list synchronization over a
//! [`broker_api::BrokerBackend`].

pub mod admin;
pub mod bridge;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod notify;
pub mod produce;
pub mod session;
pub mod settings;
pub mod topics;

pub use admin::{validate_new_topic, TopicAdmin, TopicSelection};
pub use bridge::{BridgeStats, SessionGate, SubscriptionBridge};
pub use buffer::{BufferView, MessageBuffer};
pub use client::{AdminClient, ConnectedSession};
pub use config::SyncConfig;
pub use error::{FailureKind, SyncError, ValidationError};
pub use notify::{Level, Notification, Notifier, Surface};
pub use produce::ProduceDispatcher;
pub use session::{ModeFlags, Session, SessionController, SessionStatus, StartOutcome};
pub use settings::ConnectionSettings;
pub use topics::{Escalation, FetchAttempt, TopicListState, TopicListSynchronizer};
