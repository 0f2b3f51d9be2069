// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOG_PREFIX: &str = "k8s";
pub const DEFAULT_BASE_DIR: &str = "/host";
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 10;

pub const FILEBEAT_EXEC: &str = "/usr/bin/filebeat";
pub const FILEBEAT_CONFIG_FILE: &str = "/etc/filebeat/filebeat.yml";
pub const FILEBEAT_INPUTS_DIR: &str = "/etc/filebeat/inputs.d";
pub const FILEBEAT_REGISTRY_FILE: &str = "/var/lib/filebeat/registry/filebeat/data.json";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings for the filebeat process and the files it shares with the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct FilebeatConfig {
    /// filebeat binary, started as `<exec_path> -c <config_file>`
    pub exec_path: PathBuf,
    /// Base config written once at startup
    pub config_file: PathBuf,
    /// Directory holding one `<container id>.yml` input file per container
    pub inputs_dir: PathBuf,
    /// filebeat's persisted read offsets
    pub registry_file: PathBuf,
    pub log_level: String,
    pub metrics_enabled: String,
    pub rotate_every_bytes: String,
    pub max_procs: String,
    pub setup_ilm_enabled: String,
}

impl Default for FilebeatConfig {
    fn default() -> Self {
        Self {
            exec_path: PathBuf::from(FILEBEAT_EXEC),
            config_file: PathBuf::from(FILEBEAT_CONFIG_FILE),
            inputs_dir: PathBuf::from(FILEBEAT_INPUTS_DIR),
            registry_file: PathBuf::from(FILEBEAT_REGISTRY_FILE),
            log_level: "info".to_string(),
            metrics_enabled: "true".to_string(),
            rotate_every_bytes: "104857600".to_string(),
            max_procs: "1".to_string(),
            setup_ilm_enabled: "false".to_string(),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HelperConfig {
    /// Convention prefixes, e.g. `k8s` matches `k8s_logs_*` env vars and `k8s.logs.*` labels
    pub log_prefixes: Vec<String>,
    /// Appended to stream names as `<name>-<suffix>` when set
    pub index_suffix: Option<String>,
    /// Only streams tagged `env=<cluster_env>` are collected when set
    pub cluster_env: Option<String>,
    /// Node name attached to every input as `k8s_node_name`
    pub node_name: Option<String>,
    /// Where the host root filesystem is mounted inside this container
    pub base_dir: PathBuf,
    /// How often pending evictions are checked against the registry
    pub eviction_interval: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    pub filebeat: FilebeatConfig,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            log_prefixes: vec![DEFAULT_LOG_PREFIX.to_string()],
            index_suffix: None,
            cluster_env: None,
            node_name: None,
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS),
            log_level: "info".to_string(),
            filebeat: FilebeatConfig::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

impl HelperConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let filebeat_defaults = defaults.filebeat;

        let log_prefixes = non_empty_var("LOGGING_INDEX_PREFIX")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|prefix| !prefix.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.log_prefixes);

        let eviction_interval = match non_empty_var("LOG_HELPER_EVICTION_INTERVAL_SECS") {
            Some(val) => val.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ControllerError::InvalidConfig(format!(
                    "LOG_HELPER_EVICTION_INTERVAL_SECS must be a number of seconds, got '{val}'"
                ))
            })?,
            None => defaults.eviction_interval,
        };

        let filebeat = FilebeatConfig {
            exec_path: non_empty_var("FILEBEAT_EXEC")
                .map(PathBuf::from)
                .unwrap_or(filebeat_defaults.exec_path),
            config_file: non_empty_var("FILEBEAT_CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or(filebeat_defaults.config_file),
            inputs_dir: non_empty_var("FILEBEAT_INPUTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(filebeat_defaults.inputs_dir),
            registry_file: non_empty_var("FILEBEAT_REGISTRY_FILE")
                .map(PathBuf::from)
                .unwrap_or(filebeat_defaults.registry_file),
            log_level: non_empty_var("FILEBEAT_LOG_LEVEL").unwrap_or(filebeat_defaults.log_level),
            metrics_enabled: non_empty_var("FILEBEAT_METRICS_ENABLED")
                .unwrap_or(filebeat_defaults.metrics_enabled),
            rotate_every_bytes: non_empty_var("FILEBEAT_FILES_ROTATEEVERYBYTES")
                .unwrap_or(filebeat_defaults.rotate_every_bytes),
            max_procs: non_empty_var("FILEBEAT_MAX_PROCS").unwrap_or(filebeat_defaults.max_procs),
            setup_ilm_enabled: non_empty_var("FILEBEAT_SETUP_ILM_ENABLED")
                .unwrap_or(filebeat_defaults.setup_ilm_enabled),
        };

        let config = Self {
            log_prefixes,
            index_suffix: non_empty_var("LOGGING_INDEX_SUFFIX"),
            cluster_env: non_empty_var("CLUSTER_ENV_NAME"),
            node_name: non_empty_var("NODE_NAME"),
            base_dir: non_empty_var("LOG_HELPER_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            eviction_interval,
            log_level: non_empty_var("LOG_HELPER_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            filebeat,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.log_prefixes.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "at least one log prefix is required".to_string(),
            ));
        }

        if !self.base_dir.is_absolute() {
            return Err(ControllerError::InvalidConfig(format!(
                "base dir must be absolute, got '{}'",
                self.base_dir.display()
            )));
        }

        if self.eviction_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "eviction interval must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ControllerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
