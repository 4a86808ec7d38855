use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use backend_memory::MemoryBrokerConfig;
use sync_engine::SyncConfig;

use crate::error::ConsoleError;

#[derive(Parser)]
#[command(name = "broker-console", about = "Консоль администрирования брокера")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Интерактивная сессия: команды читаются из stdin
    Shell(ShellArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ShellArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "console.toml", env = "CONSOLE_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

/// `[sync]` + содержимое in-memory брокера (`[[profiles]]`, `[[topics]]`, `[[schemas]]`).
#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(flatten)]
    pub broker: MemoryBrokerConfig,
}

impl ConsoleConfig {
    pub fn load(path: &str) -> Result<Self, ConsoleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ConsoleError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
