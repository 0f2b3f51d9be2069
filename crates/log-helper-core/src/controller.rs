// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The controller's main loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{FusedFuture, FutureExt};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::LogAgent;
use crate::config::HelperConfig;
use crate::derive::ConfigDeriver;
use crate::error::ControllerError;
use crate::eviction::EvictionService;
use crate::format::FormatRegistry;
use crate::lifecycle::EventProcessor;
use crate::runtime::ContainerRuntime;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

type AgentTask = futures::future::Fuse<JoinHandle<Result<(), ControllerError>>>;

pub struct LogHelper {
    config: HelperConfig,
    runtime: Arc<dyn ContainerRuntime>,
    agent: Arc<dyn LogAgent>,
    formats: Arc<FormatRegistry>,
}

impl LogHelper {
    pub fn new(
        config: HelperConfig,
        runtime: Arc<dyn ContainerRuntime>,
        agent: Arc<dyn LogAgent>,
    ) -> Self {
        Self {
            config,
            runtime,
            agent,
            formats: Arc::new(FormatRegistry::default()),
        }
    }

    /// Replaces the default set of log formats.
    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Arc::new(formats);
        self
    }

    /// Runs until `cancel` fires, the agent exits or the event stream closes.
    ///
    /// Returns `Ok` only on cancellation. Background tasks are stopped and awaited before
    /// returning, so an eviction pass in progress always completes.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        self.agent.prepare().await?;

        let tasks = cancel.child_token();

        let mut agent_task: AgentTask = tokio::spawn({
            let agent = Arc::clone(&self.agent);
            let token = tasks.clone();
            async move { agent.run(token).await }
        })
        .fuse();

        let (service, eviction) = EvictionService::new(
            self.config.filebeat.registry_file.clone(),
            self.config.eviction_interval,
        );
        let eviction_task = tokio::spawn(service.run(tasks.clone()));

        let processor = EventProcessor::new(
            Arc::clone(&self.runtime),
            ConfigDeriver::new(&self.config, Arc::clone(&self.formats)),
            self.config.filebeat.inputs_dir.clone(),
            eviction,
        );

        let result = match processor.reconcile_running().await {
            Ok(configured) => {
                info!("{} running containers configured for log collection", configured);
                self.watch(&processor, &mut agent_task, &cancel).await
            }
            Err(e) => Err(e),
        };

        tasks.cancel();
        if let Err(e) = eviction_task.await {
            error!("eviction task failed: {}", e);
        }
        if !agent_task.is_terminated() {
            match agent_task.await {
                Ok(Err(e)) => warn!("log agent stopped with error: {}", e),
                Err(e) => error!("log agent task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        match &result {
            Ok(()) => info!("log helper stopped"),
            Err(e) => error!("log helper stopped: {}", e),
        }
        result
    }

    async fn watch(
        &self,
        processor: &EventProcessor,
        agent_task: &mut AgentTask,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let mut events = self.runtime.events();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("watch loop cancelled");
                    return Ok(());
                }
                agent = &mut *agent_task => {
                    return Err(match agent {
                        Ok(Ok(())) => ControllerError::AgentExited("stopped".to_string()),
                        Ok(Err(e)) => e,
                        Err(e) => ControllerError::AgentExited(e.to_string()),
                    });
                }
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if let Err(e) = processor.process_event(event.clone()).await {
                            error!("failure to process event {:?}: {}", event, e);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("{}, resubscribing", e);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {}
                        }
                        events = self.runtime.events();
                    }
                    None => return Err(ControllerError::EventStreamClosed),
                },
            }
        }
    }
}
