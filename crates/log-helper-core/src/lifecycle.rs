// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container start/die handling.
//!
//! The presence of `<inputs_dir>/<id>.yml` is the only per-container state kept on disk. A
//! container is `Configured` while that file exists and no die event has been seen for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::derive::ConfigDeriver;
use crate::error::ControllerError;
use crate::eviction::{snapshot_logs, EvictionHandle, PendingEviction};
use crate::render::render_inputs;
use crate::runtime::{ContainerEvent, ContainerRuntime, EventAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No config and nothing to collect
    Unseen,
    /// Inspection and derivation in progress; transient, never reported
    Discovering,
    Configured,
    /// Dead, config kept until its logs are fully read
    PendingEviction,
    Removed,
}

pub struct EventProcessor {
    runtime: Arc<dyn ContainerRuntime>,
    deriver: ConfigDeriver,
    inputs_dir: PathBuf,
    eviction: EvictionHandle,
}

async fn exists(path: &Path) -> Result<bool, ControllerError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| ControllerError::io(path, e))
}

impl EventProcessor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        deriver: ConfigDeriver,
        inputs_dir: PathBuf,
        eviction: EvictionHandle,
    ) -> Self {
        Self {
            runtime,
            deriver,
            inputs_dir,
            eviction,
        }
    }

    pub fn config_path(&self, container_id: &str) -> PathBuf {
        self.inputs_dir.join(format!("{container_id}.yml"))
    }

    /// Applies one runtime event. Returns `None` for events that do not concern the controller.
    pub async fn process_event(
        &self,
        event: ContainerEvent,
    ) -> Result<Option<ContainerState>, ControllerError> {
        let Some(container_id) = event.container_id else {
            debug!("ignoring {:?} event without container id", event.action);
            return Ok(None);
        };

        match event.action {
            EventAction::Start => {
                debug!("discover [start] event container: [{}]", container_id);
                self.discover(&container_id).await.map(Some)
            }
            EventAction::Die => {
                debug!("discover [die] event container: [{}]", container_id);
                self.container_died(&container_id).await.map(Some)
            }
            EventAction::Other(_) => Ok(None),
        }
    }

    /// Derives and writes the input file of a container unless it already has one.
    pub async fn discover(&self, container_id: &str) -> Result<ContainerState, ControllerError> {
        let config_path = self.config_path(container_id);
        if exists(&config_path).await? {
            // restart under the same id keeps the existing config
            if let Err(e) = self.eviction.cancel(container_id) {
                warn!("[{}] could not cancel pending eviction: {}", container_id, e);
            }
            return Ok(ContainerState::Configured);
        }

        let spec = self.runtime.inspect(container_id).await?;
        let config = self.deriver.derive(&spec)?;
        if config.streams.is_empty() {
            debug!("{} has no log config, skipping", container_id);
            return Ok(ContainerState::Unseen);
        }

        let rendered = render_inputs(&config)?;
        // filebeat only loads *.yml, so it never sees a half-written file
        let staging = self.inputs_dir.join(format!(".{container_id}.yml.tmp"));
        tokio::fs::write(&staging, rendered)
            .await
            .map_err(|e| ControllerError::io(&staging, e))?;
        tokio::fs::rename(&staging, &config_path)
            .await
            .map_err(|e| ControllerError::io(&config_path, e))?;

        for stream in &config.streams {
            info!(
                "discover new container logs collection requests: [{}] = {}",
                stream.name,
                stream.host_glob().display()
            );
        }
        Ok(ContainerState::Configured)
    }

    async fn container_died(&self, container_id: &str) -> Result<ContainerState, ControllerError> {
        let config_path = self.config_path(container_id);
        if !exists(&config_path).await? {
            debug!("remove lost container: {}", container_id);
            return Ok(ContainerState::Removed);
        }

        let eviction = match snapshot_logs(container_id, &config_path).await {
            Ok(eviction) => eviction,
            Err(e) => {
                warn!(
                    "[{}] die-time log snapshot failed, retrying on next pass: {}",
                    container_id, e
                );
                PendingEviction::unresolved(container_id, &config_path)
            }
        };
        self.eviction
            .enqueue(eviction)
            .map_err(|e| ControllerError::EvictionService(e.to_string()))?;
        Ok(ContainerState::PendingEviction)
    }

    /// Runs discovery for every running container. Containers that fail are logged and skipped.
    /// Returns how many containers are configured afterwards.
    pub async fn reconcile_running(&self) -> Result<usize, ControllerError> {
        let running = self.runtime.list_running().await?;
        debug!("reconciling {} running containers", running.len());

        let mut configured = 0;
        for container_id in running {
            match self.discover(&container_id).await {
                Ok(ContainerState::Configured) => configured += 1,
                Ok(_) => {}
                Err(e) => warn!("[{}] skipping container: {}", container_id, e),
            }
        }
        Ok(configured)
    }
}
