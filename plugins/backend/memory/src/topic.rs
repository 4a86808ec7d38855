use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use broker_api::{Message, NewTopic, PartitionInfo, TopicDetails, TopicSummary};

/// Запись партиции + глобальный порядковый номер в рамках топика.
#[derive(Debug, Clone)]
struct StoredRecord {
    seq: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct PartitionLog {
    low: i64,
    records: Vec<StoredRecord>,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.low + self.records.len() as i64
    }
}

/// Append-only лог одного топика.
#[derive(Debug)]
pub(crate) struct TopicLog {
    pub config: NewTopic,
    partitions: Vec<PartitionLog>,
    next_seq: u64,
    round_robin: usize,
}

impl TopicLog {
    pub fn new(config: NewTopic) -> Self {
        let count = config.partitions.max(1) as usize;
        Self {
            partitions: (0..count).map(|_| PartitionLog::default()).collect(),
            config,
            next_seq: 0,
            round_robin: 0,
        }
    }

    /// Партиция по хэшу ключа, пустой ключ распределяется round-robin.
    fn partition_for(&mut self, key: &str) -> usize {
        let n = self.partitions.len();
        if key.is_empty() {
            let p = self.round_robin % n;
            self.round_robin = self.round_robin.wrapping_add(1);
            return p;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % n as u64) as usize
    }

    pub fn append(&mut self, key: &str, value: serde_json::Value) -> Message {
        let partition = self.partition_for(key);
        let seq = self.next_seq;
        self.next_seq += 1;

        let log = &mut self.partitions[partition];
        let message = Message {
            key: key.to_string(),
            partition: partition as i32,
            offset: log.high(),
            value,
        };
        log.records.push(StoredRecord { seq, message: message.clone() });
        message
    }

    /// Все записи в порядке записи в топик.
    fn ordered(&self) -> Vec<&StoredRecord> {
        let mut all: Vec<&StoredRecord> = self.partitions.iter().flat_map(|p| p.records.iter()).collect();
        all.sort_by_key(|r| r.seq);
        all
    }

    pub fn first(&self, n: usize) -> Vec<Message> {
        self.ordered().into_iter().take(n).map(|r| r.message.clone()).collect()
    }

    pub fn last(&self, n: usize) -> Vec<Message> {
        let all = self.ordered();
        let skip = all.len().saturating_sub(n);
        all.into_iter().skip(skip).map(|r| r.message.clone()).collect()
    }

    pub fn message_count(&self) -> i64 {
        self.partitions.iter().map(|p| p.high() - p.low).sum()
    }

    pub fn summary(&self) -> TopicSummary {
        TopicSummary {
            name: self.config.name.clone(),
            partition_count: self.partitions.len(),
            message_count: self.message_count(),
        }
    }

    pub fn details(&self) -> TopicDetails {
        let replicas: Vec<i32> = (1..=self.config.replication_factor.max(1)).collect();
        let partitions = self
            .partitions
            .iter()
            .enumerate()
            .map(|(id, p)| {
                let leader = replicas[id % replicas.len()];
                PartitionInfo::new(id as i32, p.low, p.high(), leader, replicas.clone())
            })
            .collect();
        TopicDetails {
            name: self.config.name.clone(),
            partitions,
        }
    }
}
