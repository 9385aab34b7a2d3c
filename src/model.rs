//! Core data model: log records, source configuration, alarms, partitions,
//! archives, and cluster membership. Plain serde-derived structs, tagged
//! enums where the underlying data is a discriminated union (ingestion
//! source variants tag themselves with `#[serde(tag = "type")]`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized log level. `UNKNOWN` covers unparseable or absent levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Unknown => "UNKNOWN",
        }
    }

    /// Relative severity ordering, used by `sort level` in the query language.
    pub fn rank(&self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
            LogLevel::Fatal => 5,
            LogLevel::Unknown => 6,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "TRACE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "FATAL" | "CRITICAL" => LogLevel::Fatal,
            _ => LogLevel::Unknown,
        })
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable normalized log event. `id` is unique within an index generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    /// Epoch milliseconds of the event itself.
    pub timestamp: i64,
    /// Epoch milliseconds of ingestion; may equal `timestamp`.
    pub record_time: i64,
    pub level: LogLevel,
    pub message: String,
    /// e.g. a filename, or `http:<sourceId>`.
    pub source: String,
    pub metadata: HashMap<String, String>,
    pub raw_content: String,
}

impl LogRecord {
    pub fn new(timestamp: i64, level: LogLevel, message: impl Into<String>, source: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            record_time: timestamp,
            level,
            message: message.into(),
            source: source.into(),
            metadata: HashMap::new(),
            raw_content: raw_content.into(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Administrative record describing one ingestion source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sourceType")]
pub enum SourceConfig {
    #[serde(rename = "FILE")]
    File {
        id: String,
        name: String,
        enabled: bool,
        #[serde(rename = "directoryPath")]
        directory_path: String,
        #[serde(rename = "filePattern")]
        file_pattern: String,
        #[serde(rename = "scanIntervalSeconds")]
        scan_interval_seconds: u64,
    },
    #[serde(rename = "SYSLOG")]
    Syslog {
        id: String,
        name: String,
        enabled: bool,
        port: u16,
        protocol: SyslogTransport,
        format: SyslogFormat,
    },
    #[serde(rename = "HTTP")]
    Http {
        id: String,
        name: String,
        enabled: bool,
        path: String,
        #[serde(rename = "authToken")]
        auth_token: String,
        #[serde(rename = "batchAllowed")]
        batch_allowed: bool,
    },
    #[serde(rename = "CLOUD")]
    Cloud {
        id: String,
        name: String,
        enabled: bool,
        provider: String,
        handle: String,
        #[serde(rename = "pollIntervalSeconds")]
        poll_interval_seconds: u64,
    },
}

impl SourceConfig {
    pub fn id(&self) -> &str {
        match self {
            SourceConfig::File { id, .. }
            | SourceConfig::Syslog { id, .. }
            | SourceConfig::Http { id, .. }
            | SourceConfig::Cloud { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceConfig::File { name, .. }
            | SourceConfig::Syslog { name, .. }
            | SourceConfig::Http { name, .. }
            | SourceConfig::Cloud { name, .. } => name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            SourceConfig::File { enabled, .. }
            | SourceConfig::Syslog { enabled, .. }
            | SourceConfig::Http { enabled, .. }
            | SourceConfig::Cloud { enabled, .. } => *enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyslogTransport {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyslogFormat {
    #[serde(rename = "RFC3164")]
    Rfc3164,
    #[serde(rename = "RFC5424")]
    Rfc5424,
}

/// A notification channel attached to an alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    #[serde(rename = "type")]
    pub channel_type: String,
    pub destination: String,
}

/// A saved query plus a condition and notification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub name: String,
    pub description: String,
    pub query: String,
    pub condition: String,
    pub threshold: i64,
    pub time_window_minutes: u64,
    pub enabled: bool,
    pub notification_channels: Vec<NotificationChannel>,
    #[serde(default = "default_throttle_window")]
    pub throttle_window_minutes: u64,
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_window: u32,
    #[serde(default)]
    pub grouping_key: Option<String>,
    #[serde(default = "default_grouping_window")]
    pub grouping_window_minutes: u64,
}

fn default_throttle_window() -> u64 {
    60
}

fn default_max_notifications() -> u32 {
    1
}

fn default_grouping_window() -> u64 {
    5
}

impl Alarm {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("alarm name must not be empty".into());
        }
        if self.query.trim().is_empty() {
            return Err("alarm query must not be empty".into());
        }
        if self.threshold < 0 {
            return Err("alarm threshold must be >= 0".into());
        }
        if self.time_window_minutes == 0 {
            return Err("alarm timeWindowMinutes must be > 0".into());
        }
        Ok(())
    }
}

/// Time bucket granularity for partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionType {
    Daily,
    Weekly,
    Monthly,
}

/// Metadata describing a compressed off-index archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub id: String,
    pub filename: String,
    pub created_at: i64,
    pub log_count: u64,
    pub size_bytes: u64,
    pub time_range_start: i64,
    pub time_range_end: i64,
}

/// A single node's cluster membership record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    pub url: String,
    pub last_heartbeat_ms: i64,
    pub is_leader: bool,
}

/// Derived cluster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub leader_id: Option<String>,
    pub nodes: Vec<ClusterNode>,
}
