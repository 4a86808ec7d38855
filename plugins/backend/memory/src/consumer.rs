use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use broker_api::{ConsumeRequest, FeedEvent, Message, MessageFeed};

/// Уведомление о новой записи в топике.
#[derive(Debug)]
pub(crate) struct Appended {
    pub topic: String,
    pub message: Message,
}

/// Сколько backlog-сообщений отправлять подряд без уступки планировщику.
const BACKLOG_BATCH: usize = 64;

/// Один consumer: отдаёт backlog, затем (если есть `appends`) хвост топика.
pub(crate) async fn run_consumer(
    request: ConsumeRequest,
    backlog: Vec<Message>,
    appends: Option<broadcast::Receiver<Arc<Appended>>>,
    feed: broadcast::Sender<FeedEvent>,
    token: CancellationToken,
) {
    tracing::debug!(
        topic = %request.topic,
        mode = %request.mode,
        backlog = backlog.len(),
        tag = request.tag,
        "consumer started"
    );

    for (i, message) in backlog.into_iter().enumerate() {
        if token.is_cancelled() {
            return;
        }
        emit(&feed, &request, message);
        if (i + 1) % BACKLOG_BATCH == 0 {
            tokio::task::yield_now().await;
        }
    }

    let Some(mut appends) = appends else {
        tracing::debug!(topic = %request.topic, tag = request.tag, "bounded read complete");
        return;
    };

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            appended = appends.recv() => match appended {
                Ok(a) if a.topic == request.topic => emit(&feed, &request, a.message.clone()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(topic = %request.topic, skipped = n, "consumer lagged behind producers");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!(topic = %request.topic, tag = request.tag, "consumer stopped");
}

fn emit(feed: &broadcast::Sender<FeedEvent>, request: &ConsumeRequest, message: Message) {
    // нет подписчиков: событие теряется, как у push-потока
    let _ = feed.send(FeedEvent {
        tag: request.tag,
        topic: request.topic.clone(),
        message,
    });
}

// ═══════════════════════════════════════════════════════════════
//  BroadcastFeed
// ═══════════════════════════════════════════════════════════════

/// Подписка на общий push-поток брокера.
pub(crate) struct BroadcastFeed {
    rx: broadcast::Receiver<FeedEvent>,
}

impl BroadcastFeed {
    pub fn new(rx: broadcast::Receiver<FeedEvent>) -> Self {
        Self { rx }
    }
}

impl MessageFeed for BroadcastFeed {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<FeedEvent>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "message feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}
