// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Safe removal of input configs for dead containers.
//!
//! A dead container's config stays in place until filebeat's registry shows that every log file
//! the config matched at die time has been read up to the size it had then. Removing it earlier
//! would make filebeat stop tailing a file it has not finished.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::registry::{load_registry, RegistrySnapshot};
use crate::render::read_input_paths;

/// A log file and its size when the container died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSnapshot {
    pub file: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEviction {
    pub container_id: String,
    pub config_path: PathBuf,
    /// Every file matched by the config at die time. `None` until a snapshot succeeds.
    pub logs: Option<Vec<LogSnapshot>>,
}

impl PendingEviction {
    /// An entry whose die-time snapshot failed; the next sweep retries it.
    pub fn unresolved(container_id: &str, config_path: &Path) -> Self {
        Self {
            container_id: container_id.to_string(),
            config_path: config_path.to_path_buf(),
            logs: None,
        }
    }

    fn is_consumed(&self, registry: &RegistrySnapshot) -> bool {
        let Some(logs) = &self.logs else {
            return false;
        };
        logs.iter().all(|log| match registry.get(&log.file) {
            Some(&offset) if offset >= log.size => true,
            Some(&offset) => {
                debug!(
                    "[{}] {} not fully read yet: offset {} of {} bytes",
                    self.container_id, log.file, offset, log.size
                );
                false
            }
            None => {
                debug!("[{}] {} has no registry entry yet", self.container_id, log.file);
                false
            }
        })
    }

    async fn resolve(&mut self) {
        match snapshot_files(&self.config_path).await {
            Ok(logs) => self.logs = Some(logs),
            Err(ControllerError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                self.logs = Some(Vec::new());
            }
            Err(ControllerError::Render(e)) => {
                // filebeat cannot load this file either
                warn!(
                    "[{}] unreadable config {}, nothing to wait for: {}",
                    self.container_id,
                    self.config_path.display(),
                    e
                );
                self.logs = Some(Vec::new());
            }
            Err(e) => warn!("[{}] log snapshot failed again: {}", self.container_id, e),
        }
    }
}

/// Pending evictions keyed by container id.
#[derive(Debug, Default)]
pub struct DestroyQueue {
    pending: BTreeMap<String, PendingEviction>,
}

impl DestroyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `eviction.container_id`.
    pub fn enqueue(&mut self, eviction: PendingEviction) {
        self.pending
            .insert(eviction.container_id.clone(), eviction);
    }

    pub fn cancel(&mut self, container_id: &str) -> Option<PendingEviction> {
        self.pending.remove(container_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.pending.contains_key(container_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingEviction> {
        self.pending.values()
    }

    /// Deletes the config of every entry whose logs the registry shows as consumed.
    /// Entries without a snapshot get one first. Returns the ids of the containers removed
    /// from the queue.
    pub async fn sweep(&mut self, registry: &RegistrySnapshot) -> Vec<String> {
        for eviction in self.pending.values_mut() {
            if eviction.logs.is_none() {
                eviction.resolve().await;
            }
        }

        let ready: Vec<String> = self
            .pending
            .values()
            .filter(|eviction| eviction.is_consumed(registry))
            .map(|eviction| eviction.container_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(ready.len());
        for container_id in ready {
            let Some(eviction) = self.pending.get(&container_id) else {
                continue;
            };
            match tokio::fs::remove_file(&eviction.config_path).await {
                Ok(()) => {
                    info!(
                        "[{}] logs fully read, removed config {}",
                        container_id,
                        eviction.config_path.display()
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(
                        "[{}] config {} already removed",
                        container_id,
                        eviction.config_path.display()
                    );
                }
                Err(e) => {
                    error!(
                        "[{}] failed to remove config {}: {}",
                        container_id,
                        eviction.config_path.display(),
                        e
                    );
                    continue;
                }
            }
            self.pending.remove(&container_id);
            removed.push(container_id);
        }
        removed
    }
}

/// Existing regular files matched by `patterns`, with their current sizes.
fn stat_matches(patterns: &[String]) -> Vec<LogSnapshot> {
    let mut sizes = BTreeMap::new();
    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("invalid log path pattern {}: {}", pattern, e);
                continue;
            }
        };
        for entry in paths {
            let file = match entry {
                Ok(file) => file,
                Err(e) => {
                    debug!("skipping unreadable match of {}: {}", pattern, e);
                    continue;
                }
            };
            match std::fs::metadata(&file) {
                Ok(metadata) if metadata.is_file() => {
                    sizes.insert(file.to_string_lossy().into_owned(), metadata.len());
                }
                _ => {}
            }
        }
    }
    sizes
        .into_iter()
        .map(|(file, size)| LogSnapshot { file, size })
        .collect()
}

/// Expands every `paths` entry of an input file and records each match with its size.
pub async fn snapshot_files(config_path: &Path) -> Result<Vec<LogSnapshot>, ControllerError> {
    let yaml = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| ControllerError::io(config_path, e))?;
    let patterns = read_input_paths(&yaml)?;

    tokio::task::spawn_blocking(move || stat_matches(&patterns))
        .await
        .map_err(|e| ControllerError::EvictionService(format!("log snapshot task failed: {}", e)))
}

/// Records the log files a dead container was writing to and their current sizes.
pub async fn snapshot_logs(
    container_id: &str,
    config_path: &Path,
) -> Result<PendingEviction, ControllerError> {
    let logs = snapshot_files(config_path).await?;
    debug!("[{}] die-time log snapshot: {:?}", container_id, logs);

    Ok(PendingEviction {
        container_id: container_id.to_string(),
        config_path: config_path.to_path_buf(),
        logs: Some(logs),
    })
}

#[derive(Debug)]
pub enum EvictionCommand {
    Enqueue(PendingEviction),
    Cancel(String),
    Pending(oneshot::Sender<Vec<PendingEviction>>),
    Sweep(oneshot::Sender<Result<Vec<String>, ControllerError>>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct EvictionHandle {
    tx: mpsc::UnboundedSender<EvictionCommand>,
}

impl EvictionHandle {
    pub fn enqueue(
        &self,
        eviction: PendingEviction,
    ) -> Result<(), mpsc::error::SendError<EvictionCommand>> {
        self.tx.send(EvictionCommand::Enqueue(eviction))
    }

    /// Drops a pending eviction, e.g. when a container restarts under the same id.
    pub fn cancel(&self, container_id: &str) -> Result<(), mpsc::error::SendError<EvictionCommand>> {
        self.tx.send(EvictionCommand::Cancel(container_id.to_string()))
    }

    pub async fn pending(&self) -> Result<Vec<PendingEviction>, ControllerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(EvictionCommand::Pending(response_tx))
            .map_err(|e| ControllerError::EvictionService(format!("Failed to send pending command: {}", e)))?;

        response_rx.await.map_err(|e| {
            ControllerError::EvictionService(format!("Failed to receive pending response: {}", e))
        })
    }

    /// Runs one eviction pass now, outside the regular schedule.
    pub async fn sweep(&self) -> Result<Vec<String>, ControllerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(EvictionCommand::Sweep(response_tx))
            .map_err(|e| ControllerError::EvictionService(format!("Failed to send sweep command: {}", e)))?;

        response_rx.await.map_err(|e| {
            ControllerError::EvictionService(format!("Failed to receive sweep response: {}", e))
        })?
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<EvictionCommand>> {
        self.tx.send(EvictionCommand::Shutdown)
    }
}

/// Owns the destroy queue. Only this task reads the registry or deletes configs.
pub struct EvictionService {
    queue: DestroyQueue,
    registry_file: PathBuf,
    interval: Duration,
    rx: mpsc::UnboundedReceiver<EvictionCommand>,
}

impl EvictionService {
    pub fn new(registry_file: PathBuf, interval: Duration) -> (Self, EvictionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            queue: DestroyQueue::new(),
            registry_file,
            interval,
            rx,
        };
        (service, EvictionHandle { tx })
    }

    async fn tick(&mut self) -> Result<Vec<String>, ControllerError> {
        if self.queue.is_empty() {
            return Ok(Vec::new());
        }
        let registry = load_registry(&self.registry_file).await?;
        Ok(self.queue.sweep(&registry).await)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("Eviction service started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Eviction service cancelled");
                    break;
                }
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        EvictionCommand::Enqueue(eviction) => {
                            debug!("[{}] queued for eviction", eviction.container_id);
                            self.queue.enqueue(eviction);
                        }
                        EvictionCommand::Cancel(container_id) => {
                            if self.queue.cancel(&container_id).is_some() {
                                info!("[{}] restarted, eviction cancelled", container_id);
                            }
                        }
                        EvictionCommand::Pending(response_tx) => {
                            let pending = self.queue.pending().cloned().collect();
                            if response_tx.send(pending).is_err() {
                                error!("Failed to send pending response - receiver dropped");
                            }
                        }
                        EvictionCommand::Sweep(response_tx) => {
                            let result = self.tick().await;
                            if response_tx.send(result).is_err() {
                                error!("Failed to send sweep response - receiver dropped");
                            }
                        }
                        EvictionCommand::Shutdown => {
                            debug!("Eviction service shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Skipping eviction pass: {}", e);
                    }
                }
            }
        }

        if !self.queue.is_empty() {
            info!(
                "Eviction service stopped with {} container configs still pending",
                self.queue.len()
            );
        }
        debug!("Eviction service stopped");
    }
}
