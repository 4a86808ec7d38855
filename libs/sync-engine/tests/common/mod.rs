#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use broker_api::{
    BackendError, BackendFuture, BrokerBackend, ConnectionInfo, ConnectionProfile, ConsumeRequest,
    FeedEvent, Message, MessageFeed, NewTopic, PartitionInfo, ProduceRequest, TopicDetails,
    TopicSummary,
};
use sync_engine::{ConnectionSettings, Notifier, SessionController, SubscriptionBridge};

/// Backend call log entry, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Connect(String),
    Disconnect,
    FetchTopics(String),
    Consume(ConsumeRequest),
    StopConsumers,
    Produce(ProduceRequest),
    CreateTopic(String),
    DropTopics(Vec<String>),
    FetchSchema(String),
    FeedReleased,
}

/// Knobs read on every call.
#[derive(Debug, Default)]
pub struct Script {
    /// The next N `fetch_topics` calls fail.
    pub fetch_failures: u32,
    /// Filters whose listing always fails.
    pub failing_filters: HashSet<String>,
    pub fetch_latency: HashMap<String, Duration>,
    pub fail_connect: bool,
    pub fail_consume: bool,
    pub fail_stop: bool,
    pub fail_disconnect: bool,
    pub produce_latency: Duration,
}

/// A backend whose behavior is set by the test and that records every call.
pub struct ScriptedBackend {
    topics: Vec<TopicSummary>,
    script: Mutex<Script>,
    log: Arc<Mutex<Vec<Op>>>,
    feed: broadcast::Sender<FeedEvent>,
    live_feeds: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(topics: &[&str]) -> Arc<Self> {
        let (feed, _) = broadcast::channel(1024);
        Arc::new(Self {
            topics: topics.iter().map(|n| summary(n)).collect(),
            script: Mutex::new(Script::default()),
            log: Arc::new(Mutex::new(Vec::new())),
            feed,
            live_feeds: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    pub fn ops(&self) -> Vec<Op> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|op| pred(op)).count()
    }

    pub fn fetch_calls(&self) -> usize {
        self.count(|op| matches!(op, Op::FetchTopics(_)))
    }

    pub fn stop_calls(&self) -> usize {
        self.count(|op| matches!(op, Op::StopConsumers))
    }

    pub fn consume_calls(&self) -> usize {
        self.count(|op| matches!(op, Op::Consume(_)))
    }

    pub fn live_feeds(&self) -> usize {
        self.live_feeds.load(Ordering::SeqCst)
    }

    /// Emit a `messageReceived` event carrying `tag`.
    pub fn push(&self, tag: u64, topic: &str, message: Message) {
        let _ = self.feed.send(FeedEvent { tag, topic: topic.to_string(), message });
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }
}

struct ScriptedFeed {
    rx: broadcast::Receiver<FeedEvent>,
    log: Arc<Mutex<Vec<Op>>>,
    live: Arc<AtomicUsize>,
}

impl MessageFeed for ScriptedFeed {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<FeedEvent>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Drop for ScriptedFeed {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Op::FeedReleased);
    }
}

impl BrokerBackend for ScriptedBackend {
    fn connect(&self, profile: &ConnectionProfile) -> BackendFuture<'_, ConnectionInfo> {
        let profile = profile.clone();
        Box::pin(async move {
            self.record(Op::Connect(profile.host.clone()));
            if self.script.lock().unwrap().fail_connect {
                return Err(BackendError::connection(format!("{} unreachable", profile.host)));
            }
            Ok(ConnectionInfo {
                schema_registry_connected: profile.schema_registry.is_some(),
            })
        })
    }

    fn disconnect(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.record(Op::Disconnect);
            if self.script.lock().unwrap().fail_disconnect {
                return Err(BackendError::connection("broker gone"));
            }
            Ok(())
        })
    }

    fn fetch_saved_brokers(&self) -> BackendFuture<'_, Vec<ConnectionProfile>> {
        Box::pin(async move { Ok(vec![profile("local")]) })
    }

    fn fetch_topics(&self, filter: &str) -> BackendFuture<'_, Vec<TopicSummary>> {
        let filter = filter.to_string();
        Box::pin(async move {
            self.record(Op::FetchTopics(filter.clone()));
            let latency = self.script.lock().unwrap().fetch_latency.get(&filter).copied();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let fail = {
                let mut script = self.script.lock().unwrap();
                if script.failing_filters.contains(&filter) {
                    true
                } else if script.fetch_failures > 0 {
                    script.fetch_failures -= 1;
                    true
                } else {
                    false
                }
            };
            if fail {
                return Err(BackendError::io("listing timed out"));
            }
            Ok(self
                .topics
                .iter()
                .filter(|t| t.name.contains(&filter))
                .cloned()
                .collect())
        })
    }

    fn fetch_topic(&self, name: &str) -> BackendFuture<'_, TopicDetails> {
        let name = name.to_string();
        Box::pin(async move {
            if !self.topics.iter().any(|t| t.name == name) {
                return Err(BackendError::rejected(format!("unknown topic {name}")));
            }
            Ok(TopicDetails {
                name,
                partitions: vec![PartitionInfo::new(0, 0, 0, 1, vec![1])],
            })
        })
    }

    fn create_topic(&self, topic: &NewTopic) -> BackendFuture<'_, ()> {
        let name = topic.name.clone();
        Box::pin(async move {
            self.record(Op::CreateTopic(name));
            Ok(())
        })
    }

    fn drop_topics(&self, names: &[String]) -> BackendFuture<'_, ()> {
        let names = names.to_vec();
        Box::pin(async move {
            self.record(Op::DropTopics(names));
            Ok(())
        })
    }

    fn produce(&self, request: &ProduceRequest) -> BackendFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            self.record(Op::Produce(request));
            let latency = self.script.lock().unwrap().produce_latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(())
        })
    }

    fn fetch_schema_subjects(&self) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(vec!["orders-value".to_string()]) })
    }

    fn fetch_schema(&self, subject: &str) -> BackendFuture<'_, String> {
        let subject = subject.to_string();
        Box::pin(async move {
            self.record(Op::FetchSchema(subject));
            Ok(r#"{"type":"record","name":"Order","fields":[]}"#.to_string())
        })
    }

    fn consume_messages(&self, request: &ConsumeRequest) -> BackendFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            self.record(Op::Consume(request.clone()));
            if self.script.lock().unwrap().fail_consume {
                return Err(BackendError::rejected(format!("unknown topic {}", request.topic)));
            }
            Ok(())
        })
    }

    fn stop_consumers(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.record(Op::StopConsumers);
            if self.script.lock().unwrap().fail_stop {
                return Err(BackendError::io("stop timed out"));
            }
            Ok(())
        })
    }

    fn subscribe_messages(&self) -> Box<dyn MessageFeed> {
        self.live_feeds.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedFeed {
            rx: self.feed.subscribe(),
            log: self.log.clone(),
            live: self.live_feeds.clone(),
        })
    }
}

pub fn summary(name: &str) -> TopicSummary {
    TopicSummary {
        name: name.to_string(),
        partition_count: 1,
        message_count: 0,
    }
}

pub fn message(offset: i64) -> Message {
    Message {
        key: format!("key-{offset}"),
        partition: (offset % 3) as i32,
        offset,
        value: serde_json::json!({ "seq": offset }),
    }
}

pub fn profile(host: &str) -> ConnectionProfile {
    ConnectionProfile {
        name: host.to_string(),
        host: host.to_string(),
        schema_registry: None,
    }
}

pub fn settings(schema_registry_connected: bool) -> ConnectionSettings {
    ConnectionSettings {
        profile: profile("local"),
        schema_registry_connected,
    }
}

/// Controller wired to `backend` with a fresh bridge subscription.
pub fn controller(backend: &Arc<ScriptedBackend>, notifier: &Notifier) -> SessionController {
    let bridge = SubscriptionBridge::spawn(backend.subscribe_messages(), 100);
    SessionController::new(backend.clone(), bridge, notifier.clone(), settings(false), 100)
}

/// Let spawned tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
