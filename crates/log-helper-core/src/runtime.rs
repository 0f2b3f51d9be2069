// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container runtime access.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessage};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};

use crate::derive::{ContainerSpec, Mount};
use crate::error::ControllerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Start,
    Die,
    Other(String),
}

impl From<&str> for EventAction {
    fn from(action: &str) -> Self {
        match action {
            "start" => EventAction::Start,
            "die" => EventAction::Die,
            other => EventAction::Other(other.to_string()),
        }
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: EventAction,
    pub container_id: Option<String>,
}

impl ContainerEvent {
    pub fn new(action: EventAction, container_id: impl Into<String>) -> Self {
        Self {
            action,
            container_id: Some(container_id.into()),
        }
    }
}

pub type EventStream = BoxStream<'static, Result<ContainerEvent, ControllerError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of the currently running containers.
    async fn list_running(&self) -> Result<Vec<String>, ControllerError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerSpec, ControllerError>;

    /// Subscribes to container events. The stream ends when the runtime closes the connection.
    fn events(&self) -> EventStream;
}

impl From<EventMessage> for ContainerEvent {
    fn from(message: EventMessage) -> Self {
        Self {
            action: EventAction::from(message.action.as_deref().unwrap_or_default()),
            container_id: message
                .actor
                .and_then(|actor| actor.id)
                .filter(|id| !id.is_empty()),
        }
    }
}

impl From<ContainerInspectResponse> for ContainerSpec {
    fn from(response: ContainerInspectResponse) -> Self {
        let (env, labels) = response
            .config
            .map(|config| {
                (
                    config.env.unwrap_or_default(),
                    config.labels.unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let mounts = response
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mount| {
                Some(Mount {
                    source: mount.source?,
                    destination: mount.destination?,
                })
            })
            .collect();

        ContainerSpec {
            id: response.id.unwrap_or_default(),
            log_path: response.log_path.unwrap_or_default(),
            env,
            labels: labels.into_iter().collect(),
            mounts,
        }
    }
}

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects through `DOCKER_HOST` or the local unix socket.
    pub fn connect() -> Result<Self, ControllerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ControllerError::Runtime(format!("Failed to connect to docker: {}", e)))?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<String>, ControllerError> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);
        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ControllerError::Runtime(format!("Failed to list containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|container| container.id)
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSpec, ControllerError> {
        let response = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                ControllerError::Runtime(format!("Failed to inspect container {}: {}", container_id, e))
            })?;
        Ok(ContainerSpec::from(response))
    }

    fn events(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .map(|message| {
                message
                    .map(ContainerEvent::from)
                    .map_err(|e| ControllerError::EventStream(e.to_string()))
            })
            .boxed()
    }
}
