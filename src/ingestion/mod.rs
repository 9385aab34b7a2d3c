//! Source Registry (C7): CRUD over `SourceConfig` plus lifecycle hooks that
//! start/stop the matching ingestion driver, consulting the Coordinator
//! before attaching a driver so only the node assigned a source actually
//! runs it.
//!
//! One `tokio::spawn` per enabled, locally-owned source, with a stop
//! channel per task.

mod cloud_driver;
mod file_driver;
mod http_driver;
mod syslog_driver;

pub use cloud_driver::{CloudPoller, HttpCloudPoller, NullCloudPoller};
pub use http_driver::{build_router, HttpDriverState};
pub use syslog_driver::parse_syslog_line;

use crate::buffer::LogBuffer;
use crate::cluster::Coordinator;
use crate::error::{GrepwiseError, Result};
use crate::model::SourceConfig;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SourceRegistry {
    sources: Arc<DashMap<String, SourceConfig>>,
    drivers: DashMap<String, tokio::sync::mpsc::Sender<()>>,
    buffer: Arc<LogBuffer>,
    coordinator: Arc<Coordinator>,
    cloud_poller: Arc<dyn CloudPoller>,
}

impl SourceRegistry {
    pub fn new(buffer: Arc<LogBuffer>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            sources: Arc::new(DashMap::new()),
            drivers: DashMap::new(),
            buffer,
            coordinator,
            cloud_poller: Arc::new(NullCloudPoller),
        }
    }

    pub fn with_cloud_poller(mut self, poller: Arc<dyn CloudPoller>) -> Self {
        self.cloud_poller = poller;
        self
    }

    pub fn http_state(&self) -> HttpDriverState {
        HttpDriverState {
            sources: self.sources.clone(),
            buffer: self.buffer.clone(),
        }
    }

    pub fn list(&self) -> Vec<SourceConfig> {
        self.sources.iter().map(|e| e.value().clone()).collect()
    }

    fn validate(&self, source: &SourceConfig) -> Result<()> {
        if source.name().trim().is_empty() {
            return Err(GrepwiseError::Validation("source name must not be empty".into()));
        }
        if source.id().trim().is_empty() {
            return Err(GrepwiseError::Validation("source id must not be empty".into()));
        }
        Ok(())
    }

    #[instrument(skip(self, source))]
    pub async fn create(&self, source: SourceConfig) -> Result<()> {
        self.validate(&source)?;
        if self.sources.contains_key(source.id()) {
            return Err(GrepwiseError::Conflict(format!("source {} already exists", source.id())));
        }
        let id = source.id().to_string();
        self.sources.insert(id.clone(), source.clone());
        self.start(&source).await;
        Ok(())
    }

    #[instrument(skip(self, source))]
    pub async fn update(&self, source: SourceConfig) -> Result<()> {
        let id = source.id().to_string();
        let Some(old) = self.sources.get(&id).map(|e| e.value().clone()) else {
            return Err(GrepwiseError::NotFound(format!("source {id} not found")));
        };
        self.stop(&old).await;
        self.sources.insert(id, source.clone());
        self.start(&source).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some((_, source)) = self.sources.remove(id) else {
            return Err(GrepwiseError::NotFound(format!("source {id} not found")));
        };
        self.stop(&source).await;
        Ok(())
    }

    /// Loads (by re-registering in place) and starts every currently
    /// enabled source; intended for process startup once the registry has
    /// been populated from the external repository collaborator.
    pub async fn start_all_enabled(&self) {
        let sources: Vec<SourceConfig> = self.sources.iter().map(|e| e.value().clone()).collect();
        for source in sources {
            if source.enabled() {
                self.start(&source).await;
            }
        }
    }

    async fn start(&self, source: &SourceConfig) {
        if !source.enabled() {
            return;
        }
        if !self.coordinator.should_process_source(source.id()) {
            info!(source = %source.id(), node = %self.coordinator.node_id(), "source not assigned to this node");
            return;
        }
        if self.drivers.contains_key(source.id()) {
            return;
        }
        let stop = match source {
            SourceConfig::File {
                id,
                directory_path,
                file_pattern,
                scan_interval_seconds,
                ..
            } => file_driver::spawn_file_driver(
                directory_path.clone(),
                file_pattern.clone(),
                *scan_interval_seconds,
                id.clone(),
                self.buffer.clone(),
            ),
            SourceConfig::Syslog { id, port, protocol, format, .. } => {
                syslog_driver::spawn_syslog_driver(*port, *protocol, *format, id.clone(), self.buffer.clone())
            }
            SourceConfig::Http { .. } => {
                // The HTTP driver is a single shared router (see `build_router`);
                // there's no per-source task to spawn, so we register a no-op
                // stop handle purely to mark the source as started.
                let (tx, _rx) = tokio::sync::mpsc::channel(1);
                tx
            }
            SourceConfig::Cloud {
                id,
                provider,
                handle,
                poll_interval_seconds,
                ..
            } => cloud_driver::spawn_cloud_driver(
                provider.clone(),
                handle.clone(),
                *poll_interval_seconds,
                id.clone(),
                self.cloud_poller.clone(),
                self.buffer.clone(),
            ),
        };
        self.drivers.insert(source.id().to_string(), stop);
        info!(source = %source.id(), "started ingestion driver");
    }

    async fn stop(&self, source: &SourceConfig) {
        if let Some((_, tx)) = self.drivers.remove(source.id()) {
            if tx.send(()).await.is_err() {
                warn!(source = %source.id(), "driver task already stopped");
            }
        }
    }

    /// Re-evaluates every local source against the Coordinator's current
    /// view, starting newly-assigned sources and stopping ones no longer
    /// owned by this node. Called on coordinator state changes.
    pub async fn reevaluate_all(&self) {
        let sources: Vec<SourceConfig> = self.sources.iter().map(|e| e.value().clone()).collect();
        for source in sources {
            let should_run = source.enabled() && self.coordinator.should_process_source(source.id());
            let running = self.drivers.contains_key(source.id());
            if should_run && !running {
                self.start(&source).await;
            } else if !should_run && running {
                self.stop(&source).await;
            }
        }
    }
}
