pub mod backend;
pub mod error;

use serde::{Deserialize, Serialize};

pub use backend::{BackendFuture, BrokerBackend, MessageFeed};
pub use error::{BackendError, ErrorKind};

/// Размер bounded-чтения по умолчанию (`FromBeginning`, `LastN`).
pub const DEFAULT_READ_COUNT: usize = 100;

// ════════════════════════════════════════════════════════════════
//  Consumption
// ════════════════════════════════════════════════════════════════

/// Откуда в логе начинается доставка. Ровно один режим активен,
/// взаимоисключаемость гарантирована самим enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionMode {
    /// Только новые сообщения, непрерывно.
    #[default]
    Tail,
    /// Первые N сообщений топика, однократно.
    FromBeginning,
    /// Последние N сообщений, затем непрерывно новые.
    LastN,
}

impl ConsumptionMode {
    pub const ALL: [ConsumptionMode; 3] = [
        ConsumptionMode::Tail,
        ConsumptionMode::FromBeginning,
        ConsumptionMode::LastN,
    ];

    /// Режим продолжает получать сообщения после начального чтения.
    pub fn is_continuous(self) -> bool {
        !matches!(self, ConsumptionMode::FromBeginning)
    }

    /// Режим читает ограниченное количество исторических сообщений.
    pub fn is_bounded(self) -> bool {
        !matches!(self, ConsumptionMode::Tail)
    }
}

impl std::fmt::Display for ConsumptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumptionMode::Tail => f.write_str("tail"),
            ConsumptionMode::FromBeginning => f.write_str("from_beginning"),
            ConsumptionMode::LastN => f.write_str("last_n"),
        }
    }
}

impl std::str::FromStr for ConsumptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "tail" | "new" => Ok(ConsumptionMode::Tail),
            "from_beginning" | "from" => Ok(ConsumptionMode::FromBeginning),
            "last_n" | "last" => Ok(ConsumptionMode::LastN),
            other => Err(format!("unknown consumption mode '{other}'")),
        }
    }
}

/// Команда "begin consumption".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub topic: String,
    pub mode: ConsumptionMode,
    /// Граница для `FromBeginning` / `LastN`. Для `Tail` игнорируется.
    pub count: usize,
    /// Поколение сессии; backend возвращает его в каждом `FeedEvent`.
    pub tag: u64,
}

/// Полученное сообщение. Неизменяемо после получения.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    pub partition: i32,
    pub offset: i64,
    pub value: serde_json::Value,
}

/// Push-событие `messageReceived`: сообщение + тег сессии-источника.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub tag: u64,
    pub topic: String,
    pub message: Message,
}

// ════════════════════════════════════════════════════════════════
//  Topic metadata
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub partition_count: usize,
    pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub low: i64,
    pub high: i64,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub message_count: i64,
}

impl PartitionInfo {
    /// `message_count` выводится из watermarks.
    pub fn new(id: i32, low: i64, high: i64, leader: i32, replicas: Vec<i32>) -> Self {
        Self {
            id,
            low,
            high,
            leader,
            replicas,
            message_count: high.saturating_sub(low).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDetails {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CleanupPolicy {
    #[default]
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "compact,delete")]
    CompactDelete,
}

impl CleanupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupPolicy::Delete => "delete",
            CleanupPolicy::Compact => "compact",
            CleanupPolicy::CompactDelete => "compact,delete",
        }
    }
}

fn default_partitions() -> i32 {
    1
}
fn default_replicas() -> i32 {
    1
}
fn default_retention_ms() -> i64 {
    // 7 дней
    604_800_000
}

/// Параметры создания топика.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTopic {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
    #[serde(default = "default_replicas")]
    pub min_insync_replicas: i32,
    #[serde(default = "default_replicas")]
    pub replication_factor: i32,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: i64,
    /// Лимит размера на диске, `None` = не задан.
    #[serde(default)]
    pub size_limit: Option<u64>,
    #[serde(default)]
    pub max_message_size: Option<u64>,
}

impl NewTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: default_partitions(),
            cleanup_policy: CleanupPolicy::default(),
            min_insync_replicas: default_replicas(),
            replication_factor: default_replicas(),
            retention_ms: default_retention_ms(),
            size_limit: None,
            max_message_size: None,
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }
}

// ════════════════════════════════════════════════════════════════
//  Connection & produce
// ════════════════════════════════════════════════════════════════

/// Сохранённый профиль подключения.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    /// Bootstrap-хосты через запятую.
    pub host: String,
    #[serde(default)]
    pub schema_registry: Option<String>,
}

impl ConnectionProfile {
    /// Профиль для ad-hoc подключения по адресу.
    pub fn adhoc(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            schema_registry: None,
        }
    }
}

/// Результат `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub schema_registry_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// Payload отправляется как есть.
    Json,
    /// Payload кодируется по схеме из Schema Registry.
    Schema { subject: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub encoding: PayloadEncoding,
}
