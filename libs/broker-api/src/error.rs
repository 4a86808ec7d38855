/// Category of a backend error. Lets the client decide between
/// surfacing, retrying and tearing the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker or schema registry unreachable at connect time.
    Connection,
    /// I/O or timeout while talking to an established connection, transient.
    Io,
    /// Backend refused the command (unknown topic, bad payload, duplicate name).
    Rejected,
    /// Command issued without an established connection.
    NotConnected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Rejected => f.write_str("rejected"),
            ErrorKind::NotConnected => f.write_str("not_connected"),
        }
    }
}

/// Unified error type for every `BrokerBackend` command.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls pick the kind automatically so implementations can use `?`.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: ErrorKind,
    message: String,
}

impl BackendError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connection, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Rejected, message: msg.into() }
    }

    pub fn not_connected() -> Self {
        Self {
            kind: ErrorKind::NotConnected,
            message: "broker connection not established".to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepend context to the message, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Rejected, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = BackendError::io("timed out").with_context("fetch_topics");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "fetch_topics: timed out");
    }

    #[test]
    fn json_errors_are_rejections() {
        let err: BackendError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }
}
