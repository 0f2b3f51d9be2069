// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The log shipping agent the controller feeds with input files.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FilebeatConfig;
use crate::error::ControllerError;
use crate::render::render_base_config;

#[async_trait]
pub trait LogAgent: Send + Sync {
    /// Writes whatever the agent needs before it can start.
    async fn prepare(&self) -> Result<(), ControllerError>;

    /// Runs the agent until it exits or `cancel` fires. Returns `Ok` only when cancelled.
    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError>;
}

#[derive(Debug, Clone)]
pub struct FilebeatAgent {
    config: FilebeatConfig,
}

impl FilebeatAgent {
    pub fn new(config: FilebeatConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LogAgent for FilebeatAgent {
    async fn prepare(&self) -> Result<(), ControllerError> {
        let base_config = render_base_config(&self.config)?;

        if let Some(dir) = self.config.config_file.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ControllerError::io(dir, e))?;
        }
        tokio::fs::write(&self.config.config_file, base_config)
            .await
            .map_err(|e| ControllerError::io(&self.config.config_file, e))?;
        tokio::fs::create_dir_all(&self.config.inputs_dir)
            .await
            .map_err(|e| ControllerError::io(&self.config.inputs_dir, e))?;

        debug!(
            "wrote filebeat config {}, inputs in {}",
            self.config.config_file.display(),
            self.config.inputs_dir.display()
        );
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let mut child = Command::new(&self.config.exec_path)
            .arg("-c")
            .arg(&self.config.config_file)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ControllerError::AgentStart(format!("{}: {}", self.config.exec_path.display(), e))
            })?;
        info!(
            "started {} (pid {:?})",
            self.config.exec_path.display(),
            child.id()
        );

        tokio::select! {
            status = child.wait() => {
                let reason = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                Err(ControllerError::AgentExited(reason))
            }
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("failed to stop filebeat: {}", e);
                }
                debug!("filebeat stopped");
                Ok(())
            }
        }
    }
}
