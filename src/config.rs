//! Application configuration.
//!
//! A single [`AppConfig`] carries every knob named in the external
//! interfaces section, loaded from YAML, JSON, or TOML: try each extension
//! in turn and parse with the matching serde backend.

use crate::error::{GrepwiseError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSettings {
    #[serde(rename = "type")]
    pub partition_type: crate::model::PartitionType,
    pub max_active: usize,
    pub auto_archive: bool,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            partition_type: crate::model::PartitionType::Daily,
            max_active: 30,
            auto_archive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSettings {
    pub evaluation_interval_ms: u64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizontalScalingSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub node_id: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub horizontal_scaling: HorizontalScalingSettings,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            horizontal_scaling: HorizontalScalingSettings { enabled: false },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub index_path: PathBuf,
    pub archive_directory: PathBuf,
    pub max_buffer_size: usize,
    pub flush_interval_ms: u64,
    pub cache: CacheConfig,
    pub partition: PartitionSettings,
    pub alarm: AlarmSettings,
    pub cluster: ClusterSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./data/index"),
            archive_directory: PathBuf::from("./data/archive"),
            max_buffer_size: 1000,
            flush_interval_ms: 5_000,
            cache: CacheConfig::default(),
            partition: PartitionSettings::default(),
            alarm: AlarmSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from `<base>.yml`/`.yaml`, `<base>.json`, or `<base>.toml`,
    /// in that order, falling back to defaults when none exist.
    pub fn load_or_default(base: &Path) -> Result<Self> {
        for (ext, parse) in [
            ("yml", parse_yaml as fn(&str) -> Result<AppConfig>),
            ("yaml", parse_yaml),
            ("json", parse_json),
            ("toml", parse_toml),
        ] {
            let candidate = base.with_extension(ext);
            if candidate.exists() {
                let contents = std::fs::read_to_string(&candidate)?;
                return parse(&contents);
            }
        }
        Ok(AppConfig::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => parse_yaml(&contents),
            Some("json") => parse_json(&contents),
            Some("toml") => parse_toml(&contents),
            other => Err(GrepwiseError::Config(format!(
                "unsupported config extension: {:?}",
                other
            ))),
        }
    }
}

fn parse_yaml(contents: &str) -> Result<AppConfig> {
    serde_yaml::from_str(contents).map_err(|e| GrepwiseError::Config(e.to_string()))
}

fn parse_json(contents: &str) -> Result<AppConfig> {
    serde_json::from_str(contents).map_err(|e| GrepwiseError::Config(e.to_string()))
}

fn parse_toml(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| GrepwiseError::Config(e.to_string()))
}
