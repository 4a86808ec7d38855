#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("usage: {0}")]
    Usage(String),

    #[error("{0}")]
    Sync(#[from] sync_engine::SyncError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
