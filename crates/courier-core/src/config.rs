//! Configuration system for Courier.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $COURIER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/courier/config.toml
//!   3. ~/.config/courier/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::DEFAULT_MAX_MESSAGE_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub transport: TransportSettings,
    pub queue: QueueSettings,
    pub delivery: DeliverySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Largest frame the connection accepts. Payloads that do not fit are
    /// fragmented.
    pub max_message_size: usize,
    /// How long a sent message may stay unconfirmed before it is treated
    /// as a delivery failure.
    pub ack_timeout_ms: u64,
    /// How long an incomplete reassembly may sit before it is abandoned.
    pub reassembly_timeout_ms: u64,
    /// Upper bound on a single connection write.
    pub io_timeout_ms: u64,
    /// How long received message ids are remembered for deduplication.
    pub dedup_window_ms: u64,
    /// Buffer size of the app-facing inbound message stream.
    pub inbound_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Where queued messages are persisted.
    pub storage_path: PathBuf,
    /// Max queued messages per peer. The oldest entry is evicted on
    /// overflow.
    pub capacity_per_peer: usize,
    /// Failed attempts before a message is dropped.
    pub max_retries: u32,
    /// TTL applied when the caller does not supply one.
    pub default_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// How often connected peers are scanned for due messages.
    pub retry_interval_ms: u64,
    /// How often pending acks are swept for timeouts.
    pub ack_sweep_interval_ms: u64,
    /// How often expired queue entries are removed.
    pub expiry_interval_ms: u64,
    /// If true, the first drain after a peer reconnects ignores
    /// `next_retry_at` and sends everything immediately.
    pub aggressive_resume: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            ack_timeout_ms: 10_000,
            reassembly_timeout_ms: 120_000,
            io_timeout_ms: 5_000,
            dedup_window_ms: 300_000,
            inbound_buffer: 256,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            storage_path: data_dir().join("queue"),
            capacity_per_peer: 1000,
            max_retries: 5,
            default_ttl_ms: 86_400_000, // 24h
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1_000,
            ack_sweep_interval_ms: 1_000,
            expiry_interval_ms: 30_000,
            aggressive_resume: true,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("courier")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("courier")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CourierConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CourierConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("COURIER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CourierConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply COURIER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COURIER_TRANSPORT__MAX_MESSAGE_SIZE") {
            if let Ok(n) = v.parse() {
                self.transport.max_message_size = n;
            }
        }
        if let Ok(v) = std::env::var("COURIER_TRANSPORT__ACK_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.transport.ack_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("COURIER_QUEUE__STORAGE_PATH") {
            self.queue.storage_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("COURIER_QUEUE__CAPACITY_PER_PEER") {
            if let Ok(n) = v.parse() {
                self.queue.capacity_per_peer = n;
            }
        }
        if let Ok(v) = std::env::var("COURIER_QUEUE__MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.queue.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("COURIER_DELIVERY__AGGRESSIVE_RESUME") {
            self.delivery.aggressive_resume = v == "true" || v == "1";
        }
    }
}
