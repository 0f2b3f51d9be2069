// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log discovery for a filebeat sidecar.
//!
//! Containers declare their log streams through `<prefix>_logs_*` env vars or `<prefix>.logs.*`
//! labels. The controller turns those declarations into filebeat input files, one per
//! container, and removes a dead container's file only after filebeat has read its logs to the
//! end.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod agent;
pub mod config;
pub mod controller;
pub mod derive;
pub mod error;
pub mod eviction;
pub mod format;
pub mod lifecycle;
pub mod node;
pub mod registry;
pub mod render;
pub mod runtime;

pub use agent::{FilebeatAgent, LogAgent};
pub use config::{FilebeatConfig, HelperConfig};
pub use controller::LogHelper;
pub use derive::{ConfigDeriver, ContainerConfig, ContainerSpec, Mount, StreamDescriptor};
pub use error::{ControllerError, DeriveError};
pub use eviction::{DestroyQueue, EvictionHandle, EvictionService, LogSnapshot, PendingEviction};
pub use format::{FormatConverter, FormatRegistry};
pub use lifecycle::{ContainerState, EventProcessor};
pub use runtime::{ContainerEvent, ContainerRuntime, DockerRuntime, EventAction};
