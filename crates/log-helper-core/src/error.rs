// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors raised while turning one container's env vars and labels into stream descriptors.
///
/// Any of these fails the whole container for the current discovery pass; other containers are
/// unaffected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeriveError {
    #[error("{0} is not a valid k=v format")]
    MalformedBlock(String),

    #[error("unsupported log format: {0}")]
    UnsupportedFormat(String),

    #[error("{property} is not a valid property for format {format}")]
    InvalidFormatProperty { property: String, format: String },

    #[error("regex pattern can not be empty")]
    EmptyPattern,

    #[error("log path of stream {0} is empty")]
    EmptyPath(String),

    #[error("container does not report a log path, cannot collect stdout of stream {0}")]
    MissingLogPath(String),

    #[error("log path must be an absolute path: {0}")]
    PathNotAbsolute(String),

    #[error("log path must be a file path, not a directory: {0}")]
    NotAFile(String),

    #[error("log path {0} is not mounted on the host")]
    NoHostMount(String),
}

/// Errors surfaced by the controller itself.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to derive container config: {0}")]
    Derive(#[from] DeriveError),

    #[error("Registry file {path} is unreadable: {reason}")]
    RegistryUnreadable { path: PathBuf, reason: String },

    #[error("Container event stream error: {0}")]
    EventStream(String),

    #[error("Container event stream closed")]
    EventStreamClosed,

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Failed to start log agent: {0}")]
    AgentStart(String),

    #[error("Log agent exited: {0}")]
    AgentExited(String),

    #[error("Eviction service unavailable: {0}")]
    EvictionService(String),

    #[error("Failed to render config: {0}")]
    Render(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ControllerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ControllerError::Io {
            path: path.into(),
            source,
        }
    }
}
