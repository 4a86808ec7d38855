mod consumer;
mod topic;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use broker_api::{
    BackendError, BackendFuture, BrokerBackend, ConnectionInfo, ConnectionProfile, ConsumeRequest,
    ConsumptionMode, FeedEvent, MessageFeed, NewTopic, PayloadEncoding, ProduceRequest,
    TopicDetails, TopicSummary,
};

use consumer::{run_consumer, Appended, BroadcastFeed};
use topic::TopicLog;

// ═══════════════════════════════════════════════════════════════
//  MemoryBrokerConfig
// ═══════════════════════════════════════════════════════════════

fn default_feed_capacity() -> usize {
    4096
}

fn default_partitions() -> i32 {
    1
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SeedMessage {
    #[serde(default)]
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TopicSeed {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default)]
    pub messages: Vec<SeedMessage>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchemaSeed {
    pub subject: String,
    pub schema: String,
}

/// Начальное содержимое брокера.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryBrokerConfig {
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
    #[serde(default)]
    pub topics: Vec<TopicSeed>,
    #[serde(default)]
    pub schemas: Vec<SchemaSeed>,
    /// Ёмкость общего push-потока.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            topics: Vec::new(),
            schemas: Vec::new(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

/// Искусственные сбои для тестов и демонстрации retry/escalation.
#[derive(Debug, Default)]
struct Faults {
    fail_next_fetches: u32,
    fetch_latency: Duration,
    refuse_connect: bool,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process брокер: топики с партициями, offsets и watermarks,
/// асинхронные consumer'ы, пишущие в общий push-поток.
///
/// Топики с именем на `_` считаются служебными и не попадают в листинг.
pub struct MemoryBroker {
    topics: RwLock<BTreeMap<String, TopicLog>>,
    profiles: Vec<ConnectionProfile>,
    schemas: BTreeMap<String, String>,
    feed: broadcast::Sender<FeedEvent>,
    appends: broadcast::Sender<Arc<Appended>>,
    /// Родительский токен всех запущенных consumer'ов.
    consumers: Mutex<CancellationToken>,
    faults: Mutex<Faults>,
    connected: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory broker mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MemoryBroker {
    pub fn new(config: MemoryBrokerConfig) -> Self {
        let mut topics = BTreeMap::new();
        for seed in config.topics {
            let mut log = TopicLog::new(NewTopic::new(seed.name.clone()).with_partitions(seed.partitions));
            for m in seed.messages {
                log.append(&m.key, m.value);
            }
            topics.insert(seed.name, log);
        }
        let schemas = config.schemas.into_iter().map(|s| (s.subject, s.schema)).collect();
        let capacity = config.feed_capacity.max(1);
        let (feed, _) = broadcast::channel(capacity);
        let (appends, _) = broadcast::channel(capacity);

        Self {
            topics: RwLock::new(topics),
            profiles: config.profiles,
            schemas,
            feed,
            appends,
            consumers: Mutex::new(CancellationToken::new()),
            faults: Mutex::new(Faults::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Следующие `n` вызовов `fetch_topics` завершатся ошибкой.
    pub fn fail_next_fetches(&self, n: u32) {
        lock(&self.faults).fail_next_fetches = n;
    }

    /// Задержка перед ответом `fetch_topics`.
    pub fn set_fetch_latency(&self, latency: Duration) {
        lock(&self.faults).fetch_latency = latency;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.faults).refuse_connect = refuse;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BackendError::not_connected())
        }
    }

    fn cancel_consumers(&self) {
        let old = std::mem::replace(&mut *lock(&self.consumers), CancellationToken::new());
        old.cancel();
    }

    /// Декодировать payload по способу кодирования.
    fn decode(&self, request: &ProduceRequest) -> Result<serde_json::Value, BackendError> {
        match &request.encoding {
            PayloadEncoding::Json => Ok(serde_json::from_str(&request.payload)
                .unwrap_or_else(|_| serde_json::Value::String(request.payload.clone()))),
            PayloadEncoding::Schema { subject } => {
                if !self.schemas.contains_key(subject) {
                    return Err(BackendError::rejected(format!("unknown schema subject '{subject}'")));
                }
                let value: serde_json::Value = serde_json::from_str(&request.payload)?;
                if !value.is_object() {
                    return Err(BackendError::rejected("schema-encoded payload must be a JSON object"));
                }
                Ok(value)
            }
        }
    }
}

impl BrokerBackend for MemoryBroker {
    fn connect(&self, profile: &ConnectionProfile) -> BackendFuture<'_, ConnectionInfo> {
        let profile = profile.clone();
        Box::pin(async move {
            if profile.host.trim().is_empty() {
                return Err(BackendError::connection("empty bootstrap host"));
            }
            if lock(&self.faults).refuse_connect {
                return Err(BackendError::connection(format!("{}: connection refused", profile.host)));
            }
            let schema_registry_connected = profile
                .schema_registry
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty());
            self.connected.store(true, Ordering::Release);
            tracing::info!(host = %profile.host, schema_registry_connected, "memory broker connected");
            Ok(ConnectionInfo { schema_registry_connected })
        })
    }

    fn disconnect(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.cancel_consumers();
            self.connected.store(false, Ordering::Release);
            tracing::info!("memory broker disconnected");
            Ok(())
        })
    }

    fn fetch_saved_brokers(&self) -> BackendFuture<'_, Vec<ConnectionProfile>> {
        Box::pin(async move { Ok(self.profiles.clone()) })
    }

    fn fetch_topics(&self, filter: &str) -> BackendFuture<'_, Vec<TopicSummary>> {
        let filter = filter.to_string();
        Box::pin(async move {
            self.ensure_connected()?;
            let latency = lock(&self.faults).fetch_latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            {
                let mut faults = lock(&self.faults);
                if faults.fail_next_fetches > 0 {
                    faults.fail_next_fetches -= 1;
                    return Err(BackendError::io("metadata request timed out"));
                }
            }
            let topics = self.topics.read().await;
            Ok(topics
                .iter()
                .filter(|(name, _)| !name.starts_with('_') && name.contains(filter.as_str()))
                .map(|(_, log)| log.summary())
                .collect())
        })
    }

    fn fetch_topic(&self, name: &str) -> BackendFuture<'_, TopicDetails> {
        let name = name.to_string();
        Box::pin(async move {
            self.ensure_connected()?;
            let topics = self.topics.read().await;
            topics
                .get(&name)
                .map(TopicLog::details)
                .ok_or_else(|| BackendError::rejected(format!("unknown topic '{name}'")))
        })
    }

    fn create_topic(&self, topic: &NewTopic) -> BackendFuture<'_, ()> {
        let topic = topic.clone();
        Box::pin(async move {
            self.ensure_connected()?;
            if topic.partitions < 1 {
                return Err(BackendError::rejected("partitions must be at least 1"));
            }
            let mut topics = self.topics.write().await;
            if topics.contains_key(&topic.name) {
                return Err(BackendError::rejected(format!("topic '{}' already exists", topic.name)));
            }
            tracing::info!(topic = %topic.name, partitions = topic.partitions, "topic created");
            topics.insert(topic.name.clone(), TopicLog::new(topic));
            Ok(())
        })
    }

    fn drop_topics(&self, names: &[String]) -> BackendFuture<'_, ()> {
        let names = names.to_vec();
        Box::pin(async move {
            self.ensure_connected()?;
            let mut topics = self.topics.write().await;
            if let Some(missing) = names.iter().find(|n| !topics.contains_key(*n)) {
                return Err(BackendError::rejected(format!("unknown topic '{missing}'")));
            }
            for name in &names {
                topics.remove(name);
            }
            tracing::info!(topics = ?names, "topics dropped");
            Ok(())
        })
    }

    fn produce(&self, request: &ProduceRequest) -> BackendFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            self.ensure_connected()?;
            let value = self.decode(&request)?;
            let mut topics = self.topics.write().await;
            let log = topics
                .get_mut(&request.topic)
                .ok_or_else(|| BackendError::rejected(format!("unknown topic '{}'", request.topic)))?;
            if let Some(max) = log.config.max_message_size {
                if request.payload.len() as u64 > max {
                    return Err(BackendError::rejected(format!(
                        "message of {} bytes exceeds max.message.bytes {max}",
                        request.payload.len()
                    )));
                }
            }
            let message = log.append(&request.key, value);
            tracing::debug!(
                topic = %request.topic,
                partition = message.partition,
                offset = message.offset,
                "record appended"
            );
            // под write-lock: consumer, подписавшийся под read-lock, не пропустит запись
            let _ = self.appends.send(Arc::new(Appended {
                topic: request.topic,
                message,
            }));
            Ok(())
        })
    }

    fn fetch_schema_subjects(&self) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.ensure_connected()?;
            Ok(self.schemas.keys().cloned().collect())
        })
    }

    fn fetch_schema(&self, subject: &str) -> BackendFuture<'_, String> {
        let subject = subject.to_string();
        Box::pin(async move {
            self.ensure_connected()?;
            self.schemas
                .get(&subject)
                .cloned()
                .ok_or_else(|| BackendError::rejected(format!("unknown schema subject '{subject}'")))
        })
    }

    fn consume_messages(&self, request: &ConsumeRequest) -> BackendFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            self.ensure_connected()?;
            let topics = self.topics.read().await;
            let log = topics
                .get(&request.topic)
                .ok_or_else(|| BackendError::rejected(format!("unknown topic '{}'", request.topic)))?;

            let appends = request.mode.is_continuous().then(|| self.appends.subscribe());
            let backlog = match request.mode {
                ConsumptionMode::Tail => Vec::new(),
                ConsumptionMode::FromBeginning => log.first(request.count),
                ConsumptionMode::LastN => log.last(request.count),
            };
            drop(topics);

            let token = lock(&self.consumers).child_token();
            tokio::spawn(run_consumer(request, backlog, appends, self.feed.clone(), token));
            Ok(())
        })
    }

    fn stop_consumers(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.cancel_consumers();
            tracing::debug!("consumers stopped");
            Ok(())
        })
    }

    fn subscribe_messages(&self) -> Box<dyn MessageFeed> {
        Box::new(BroadcastFeed::new(self.feed.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryBroker {
        let topic = |name: &str, n: usize| TopicSeed {
            name: name.into(),
            partitions: 2,
            messages: (0..n)
                .map(|i| SeedMessage { key: String::new(), value: json!({ "n": i }) })
                .collect(),
        };
        MemoryBroker::new(MemoryBrokerConfig {
            profiles: vec![ConnectionProfile::adhoc("localhost:9092")],
            topics: vec![topic("orders", 10), topic("payments", 0), topic("__consumer_offsets", 3)],
            schemas: vec![SchemaSeed { subject: "orders-value".into(), schema: "{}".into() }],
            ..Default::default()
        })
    }

    async fn connected() -> MemoryBroker {
        let broker = seeded();
        broker.connect(&ConnectionProfile::adhoc("localhost:9092")).await.unwrap();
        broker
    }

    fn produce(topic: &str, payload: &str) -> ProduceRequest {
        ProduceRequest {
            topic: topic.into(),
            key: String::new(),
            payload: payload.into(),
            encoding: PayloadEncoding::Json,
        }
    }

    fn consume(mode: ConsumptionMode, count: usize, tag: u64) -> ConsumeRequest {
        ConsumeRequest { topic: "orders".into(), mode, count, tag }
    }

    async fn drain(feed: &mut Box<dyn MessageFeed>) -> Vec<FeedEvent> {
        let mut out = Vec::new();
        while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(50), feed.recv()).await {
            out.push(ev);
        }
        out
    }

    fn values(events: &[FeedEvent]) -> Vec<serde_json::Value> {
        events.iter().map(|e| e.message.value.clone()).collect()
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let broker = seeded();
        let err = broker.fetch_topics("").await.unwrap_err();
        assert_eq!(err.kind(), broker_api::ErrorKind::NotConnected);
        assert_eq!(broker.fetch_saved_brokers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_hides_internal_topics_and_filters() {
        let broker = connected().await;
        let names: Vec<String> = broker.fetch_topics("").await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["orders".to_string(), "payments".to_string()]);

        let filtered = broker.fetch_topics("pay").await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message_count, 0);
        assert_eq!(broker.fetch_topics("ord").await.unwrap()[0].message_count, 10);
    }

    #[tokio::test]
    async fn injected_fetch_failures_run_out() {
        let broker = connected().await;
        broker.fail_next_fetches(2);
        assert_eq!(broker.fetch_topics("").await.unwrap_err().kind(), broker_api::ErrorKind::Io);
        assert!(broker.fetch_topics("").await.is_err());
        assert!(broker.fetch_topics("").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn from_beginning_replays_first_n_then_ends() {
        let broker = connected().await;
        let mut feed = broker.subscribe_messages();

        broker.consume_messages(&consume(ConsumptionMode::FromBeginning, 3, 7)).await.unwrap();
        let events = drain(&mut feed).await;
        assert_eq!(values(&events), vec![json!({"n":0}), json!({"n":1}), json!({"n":2})]);
        assert!(events.iter().all(|e| e.tag == 7));

        broker.produce(&produce("orders", r#"{"n":99}"#)).await.unwrap();
        assert!(drain(&mut feed).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn last_n_replays_then_tails() {
        let broker = connected().await;
        let mut feed = broker.subscribe_messages();

        broker.consume_messages(&consume(ConsumptionMode::LastN, 2, 1)).await.unwrap();
        assert_eq!(values(&drain(&mut feed).await), vec![json!({"n":8}), json!({"n":9})]);

        broker.produce(&produce("orders", r#"{"n":10}"#)).await.unwrap();
        broker.produce(&produce("payments", r#"{"n":11}"#)).await.unwrap();
        assert_eq!(values(&drain(&mut feed).await), vec![json!({"n":10})]);
    }

    #[tokio::test(start_paused = true)]
    async fn tail_only_sees_new_records_until_stopped() {
        let broker = connected().await;
        let mut feed = broker.subscribe_messages();

        broker.consume_messages(&consume(ConsumptionMode::Tail, 100, 2)).await.unwrap();
        assert!(drain(&mut feed).await.is_empty());

        broker.produce(&produce("orders", "plain text")).await.unwrap();
        let events = drain(&mut feed).await;
        assert_eq!(values(&events), vec![json!("plain text")]);

        broker.stop_consumers().await.unwrap();
        tokio::task::yield_now().await;
        broker.produce(&produce("orders", r#"{"late":true}"#)).await.unwrap();
        assert!(drain(&mut feed).await.is_empty());
    }

    #[tokio::test]
    async fn schema_produce_checks_subject_and_shape() {
        let broker = connected().await;
        let mut req = produce("orders", r#"{"id":1}"#);
        req.encoding = PayloadEncoding::Schema { subject: "missing".into() };
        assert_eq!(broker.produce(&req).await.unwrap_err().kind(), broker_api::ErrorKind::Rejected);

        req.encoding = PayloadEncoding::Schema { subject: "orders-value".into() };
        broker.produce(&req).await.unwrap();

        req.payload = "[1]".into();
        assert!(broker.produce(&req).await.is_err());
    }

    #[tokio::test]
    async fn create_and_drop_topics() {
        let broker = connected().await;
        broker.create_topic(&NewTopic::new("audit").with_partitions(3)).await.unwrap();
        let details = broker.fetch_topic("audit").await.unwrap();
        assert_eq!(details.partitions.len(), 3);

        assert!(broker.create_topic(&NewTopic::new("audit")).await.is_err());
        assert!(broker.drop_topics(&["audit".into(), "nope".into()]).await.is_err());
        assert!(broker.fetch_topic("audit").await.is_ok());

        broker.drop_topics(&["audit".into(), "payments".into()]).await.unwrap();
        assert!(broker.fetch_topic("audit").await.is_err());
    }

    #[tokio::test]
    async fn max_message_size_is_enforced() {
        let broker = connected().await;
        let mut topic = NewTopic::new("small");
        topic.max_message_size = Some(4);
        broker.create_topic(&topic).await.unwrap();
        assert!(broker.produce(&produce("small", "12345")).await.is_err());
        broker.produce(&produce("small", "1234")).await.unwrap();
    }

    #[tokio::test]
    async fn empty_registry_url_is_not_connected() {
        let broker = seeded();
        let mut profile = ConnectionProfile::adhoc("localhost:9092");
        profile.schema_registry = Some(" ".into());
        let info = broker.connect(&profile).await.unwrap();
        assert!(!info.schema_registry_connected);

        broker.refuse_connections(true);
        assert_eq!(
            broker.connect(&profile).await.unwrap_err().kind(),
            broker_api::ErrorKind::Connection
        );
    }
}
