use std::future::Future;
use std::pin::Pin;

use crate::{
    BackendError, ConnectionInfo, ConnectionProfile, ConsumeRequest, FeedEvent, NewTopic,
    ProduceRequest, TopicDetails, TopicSummary,
};

/// Асинхронный результат команды backend'а.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Push feed
// ════════════════════════════════════════════════════════════════

/// Подписка на push-поток `messageReceived`.
///
/// Порядок гарантирован только внутри партиции. API crate определяет
/// только трейт, без зависимости от tokio.
pub trait MessageFeed: Send {
    /// Следующее событие. None = поток закрыт / подписка отменена.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<FeedEvent>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Command boundary
// ════════════════════════════════════════════════════════════════

/// Граница команд к broker-management backend'у.
///
/// Каждая команда это request/response; `consume_messages` дополнительно
/// запускает асинхронную доставку событий в поток `subscribe_messages`.
/// Протокол до брокера остаётся заботой реализации.
pub trait BrokerBackend: Send + Sync {
    /// Подключиться к брокеру (и к Schema Registry, если указан в профиле).
    fn connect(&self, profile: &ConnectionProfile) -> BackendFuture<'_, ConnectionInfo>;

    fn disconnect(&self) -> BackendFuture<'_, ()>;

    /// Сохранённые профили подключений.
    fn fetch_saved_brokers(&self) -> BackendFuture<'_, Vec<ConnectionProfile>>;

    /// Список топиков, имя которых содержит `filter`.
    fn fetch_topics(&self, filter: &str) -> BackendFuture<'_, Vec<TopicSummary>>;

    fn fetch_topic(&self, name: &str) -> BackendFuture<'_, TopicDetails>;

    fn create_topic(&self, topic: &NewTopic) -> BackendFuture<'_, ()>;

    fn drop_topics(&self, names: &[String]) -> BackendFuture<'_, ()>;

    /// Отправить одно сообщение (JSON как есть или schema-encoded).
    fn produce(&self, request: &ProduceRequest) -> BackendFuture<'_, ()>;

    fn fetch_schema_subjects(&self) -> BackendFuture<'_, Vec<String>>;

    /// Текст схемы по имени subject'а.
    fn fetch_schema(&self, subject: &str) -> BackendFuture<'_, String>;

    /// Начать потребление. События приходят в `subscribe_messages`
    /// с `tag` из запроса.
    fn consume_messages(&self, request: &ConsumeRequest) -> BackendFuture<'_, ()>;

    /// Остановить все consumer'ы, запущенные `consume_messages`.
    fn stop_consumers(&self) -> BackendFuture<'_, ()>;

    /// Подписаться на push-поток. Каждый вызов создаёт независимую подписку;
    /// drop подписки освобождает её.
    fn subscribe_messages(&self) -> Box<dyn MessageFeed>;
}
