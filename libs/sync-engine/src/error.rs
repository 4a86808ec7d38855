use broker_api::BackendError;

/// Client-side field checks that fail before any backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("topic name must be at least {min} characters")]
    TopicNameTooShort { min: usize },

    #[error("{field} must be at least {min}")]
    BelowMinimum { field: &'static str, min: i64 },

    #[error("{0} must be positive when set")]
    NotPositive(&'static str),

    #[error("no topics selected")]
    EmptySelection,

    #[error("please enter a message")]
    EmptyPayload,

    #[error("payload must be a JSON object: {0}")]
    PayloadNotObject(String),

    #[error("schema registry is not connected")]
    SchemaRegistryUnavailable,

    #[error("broker host must not be empty")]
    EmptyHost,

    #[error("a message is already being sent")]
    SendInFlight,
}

/// Failure taxonomy of the synchronization layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("connection failed: {0}")]
    Connection(BackendError),

    #[error("topic listing failed: {0}")]
    TransientFetch(BackendError),

    #[error("consumption failed: {0}")]
    Consumption(BackendError),

    #[error("produce failed: {0}")]
    Produce(BackendError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Any other backend command (topic details, create, drop, schema lookup).
    #[error("{0}")]
    Backend(BackendError),

    #[error("not connected")]
    NotConnected,

    #[error("topic listing failed {attempts} times in a row, disconnecting")]
    Escalated { attempts: u32 },
}

/// Coarse kind used for notifications and for deciding what happens next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    TransientFetch,
    Consumption,
    Produce,
    Validation,
    Backend,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Connection => f.write_str("connection"),
            FailureKind::TransientFetch => f.write_str("fetch"),
            FailureKind::Consumption => f.write_str("consumption"),
            FailureKind::Produce => f.write_str("produce"),
            FailureKind::Validation => f.write_str("validation"),
            FailureKind::Backend => f.write_str("backend"),
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Connection(_) | SyncError::NotConnected | SyncError::Escalated { .. } => {
                FailureKind::Connection
            }
            SyncError::TransientFetch(_) => FailureKind::TransientFetch,
            SyncError::Consumption(_) => FailureKind::Consumption,
            SyncError::Produce(_) => FailureKind::Produce,
            SyncError::Validation(_) => FailureKind::Validation,
            SyncError::Backend(_) => FailureKind::Backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variant() {
        assert_eq!(SyncError::TransientFetch(BackendError::io("timeout")).kind(), FailureKind::TransientFetch);
        assert_eq!(SyncError::Produce(BackendError::io("timeout")).kind(), FailureKind::Produce);
        assert_eq!(SyncError::from(ValidationError::EmptyPayload).kind(), FailureKind::Validation);
    }

    #[test]
    fn escalation_reads_as_connection_failure() {
        let err = SyncError::Escalated { attempts: 6 };
        assert_eq!(err.kind(), FailureKind::Connection);
        assert_eq!(err.to_string(), "topic listing failed 6 times in a row, disconnecting");
    }
}
