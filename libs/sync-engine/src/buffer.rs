use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use broker_api::Message;

/// Fixed-capacity, newest-first store of received messages.
///
/// Pure arrival order: no dedup by key/partition/offset, no reordering.
#[derive(Debug)]
pub struct MessageBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Prepend, then truncate to `capacity`.
    pub fn ingest(&mut self, message: Message) {
        self.messages.push_front(message);
        self.messages.truncate(self.capacity);
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Split into the single writer and a cloneable read view.
    pub fn shared(capacity: usize) -> (BufferWriter, BufferView) {
        let inner = Arc::new(RwLock::new(MessageBuffer::new(capacity)));
        let (version_tx, version_rx) = watch::channel(0u64);
        (
            BufferWriter {
                inner: inner.clone(),
                version_tx,
            },
            BufferView { inner, version_rx },
        )
    }
}

fn read_lock(inner: &RwLock<MessageBuffer>) -> RwLockReadGuard<'_, MessageBuffer> {
    match inner.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("message buffer read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock(inner: &RwLock<MessageBuffer>) -> RwLockWriteGuard<'_, MessageBuffer> {
    match inner.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("message buffer write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// The only handle that can mutate the buffer. Not `Clone`.
#[derive(Debug)]
pub struct BufferWriter {
    inner: Arc<RwLock<MessageBuffer>>,
    version_tx: watch::Sender<u64>,
}

impl BufferWriter {
    pub fn ingest(&self, message: Message) {
        write_lock(&self.inner).ingest(message);
        self.bump();
    }

    pub fn reset(&self) {
        write_lock(&self.inner).reset();
        self.bump();
    }

    fn bump(&self) {
        self.version_tx.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Read-only view for renderers. Any number may exist.
#[derive(Debug, Clone)]
pub struct BufferView {
    inner: Arc<RwLock<MessageBuffer>>,
    version_rx: watch::Receiver<u64>,
}

impl BufferView {
    /// Copy of the current contents, newest first.
    pub fn snapshot(&self) -> Vec<Message> {
        read_lock(&self.inner).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.inner).is_empty()
    }

    /// Monotonic mutation counter.
    pub fn version(&self) -> u64 {
        *self.version_rx.borrow()
    }

    /// Wait until the buffer changes. `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.version_rx.changed().await.is_ok()
    }
}
