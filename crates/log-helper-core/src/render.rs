// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! filebeat config rendering.
//!
//! Each configured container gets one `<inputs_dir>/<container id>.yml` file holding a list of
//! inputs, one per stream. filebeat reloads that directory on its own; the controller only adds
//! and removes files.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::config::FilebeatConfig;
use crate::derive::{ContainerConfig, StreamDescriptor};
use crate::error::ControllerError;
use crate::format::FORMAT_JSON;

const MULTILINE_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}\d*";
const INPUTS_RELOAD_PERIOD: &str = "10s";

/// One filebeat input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub input_type: &'static str,
    pub paths: Vec<String>,
    #[serde(rename = "multiline.pattern", skip_serializing_if = "Option::is_none")]
    pub multiline_pattern: Option<&'static str>,
    #[serde(rename = "multiline.negate", skip_serializing_if = "Option::is_none")]
    pub multiline_negate: Option<bool>,
    #[serde(rename = "multiline.match", skip_serializing_if = "Option::is_none")]
    pub multiline_match: Option<&'static str>,
    pub scan_frequency: &'static str,
    pub fields_under_root: bool,
    #[serde(rename = "json.keys_under_root", skip_serializing_if = "Option::is_none")]
    pub json_keys_under_root: Option<bool>,
    #[serde(rename = "json.overwrite_keys", skip_serializing_if = "Option::is_none")]
    pub json_overwrite_keys: Option<bool>,
    #[serde(rename = "json.add_error_key", skip_serializing_if = "Option::is_none")]
    pub json_add_error_key: Option<bool>,
    #[serde(rename = "json.message_key", skip_serializing_if = "Option::is_none")]
    pub json_message_key: Option<&'static str>,
    pub fields: BTreeMap<String, String>,
    pub clean_inactive: &'static str,
    pub ignore_older: &'static str,
    pub close_inactive: &'static str,
    pub close_removed: bool,
    pub clean_removed: bool,
    #[serde(rename = "publisher_pipeline.disable_host")]
    pub publisher_pipeline_disable_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

impl InputConfig {
    pub fn new(stream: &StreamDescriptor, metadata: &BTreeMap<String, String>) -> Self {
        let is_json = stream.format == FORMAT_JSON;
        let mut fields = stream.tags.clone();
        fields.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            input_type: if stream.is_stdout() { "container" } else { "log" },
            paths: vec![stream.host_glob().to_string_lossy().into_owned()],
            multiline_pattern: stream.multiline.then_some(MULTILINE_PATTERN),
            multiline_negate: stream.multiline.then_some(true),
            multiline_match: stream.multiline.then_some("after"),
            scan_frequency: "1s",
            fields_under_root: true,
            json_keys_under_root: is_json.then_some(false),
            json_overwrite_keys: is_json.then_some(true),
            json_add_error_key: is_json.then_some(false),
            json_message_key: is_json.then_some("log"),
            fields,
            clean_inactive: "36h",
            ignore_older: "24h",
            close_inactive: "2h",
            close_removed: false,
            clean_removed: false,
            publisher_pipeline_disable_host: false,
            index: stream.tags.get("index").cloned(),
        }
    }
}

/// Reads a directive value the way YAML would, so `true` and `5m` keep their natural types.
fn scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn input_value(stream: &StreamDescriptor, metadata: &BTreeMap<String, String>) -> Result<Value, ControllerError> {
    let mut value = serde_yaml::to_value(InputConfig::new(stream, metadata))
        .map_err(|e| ControllerError::Render(e.to_string()))?;

    // custom directives replace built-in settings of the same name
    if let Value::Mapping(map) = &mut value {
        for (key, raw) in &stream.custom_directives {
            map.insert(Value::String(key.clone()), scalar(raw));
        }
    }
    Ok(value)
}

/// Renders the input file for one container.
pub fn render_inputs(config: &ContainerConfig) -> Result<String, ControllerError> {
    let inputs = config
        .streams
        .iter()
        .map(|stream| input_value(stream, &config.metadata))
        .collect::<Result<Vec<_>, _>>()?;
    serde_yaml::to_string(&inputs).map_err(|e| ControllerError::Render(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct InputPaths {
    #[serde(default)]
    paths: Vec<String>,
}

/// Every `paths` entry of a rendered input file.
pub fn read_input_paths(yaml: &str) -> Result<Vec<String>, ControllerError> {
    let inputs: Vec<InputPaths> =
        serde_yaml::from_str(yaml).map_err(|e| ControllerError::Render(e.to_string()))?;
    Ok(inputs.into_iter().flat_map(|input| input.paths).collect())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Renders filebeat's base `filebeat.yml`.
pub fn render_base_config(config: &FilebeatConfig) -> Result<String, ControllerError> {
    let config_dir = config
        .config_file
        .parent()
        .map(display)
        .unwrap_or_else(|| "/".to_string());
    // registry file lives at <registry path>/filebeat/data.json
    let registry_path = config
        .registry_file
        .parent()
        .and_then(Path::parent)
        .map(display)
        .ok_or_else(|| {
            ControllerError::Render(format!(
                "registry file {} has no parent directory",
                config.registry_file.display()
            ))
        })?;

    let mut map = Mapping::new();
    let mut put = |key: &str, value: Value| {
        map.insert(Value::String(key.to_string()), value);
    };

    put("path.config", Value::String(config_dir));
    put("path.logs", Value::String("/var/log/filebeat".to_string()));
    put("path.data", Value::String("/var/lib/filebeat".to_string()));
    put("filebeat.registry.path", Value::String(registry_path));
    put("logging.level", scalar(&config.log_level));
    put("logging.metrics.enabled", scalar(&config.metrics_enabled));
    put("logging.files.rotateeverybytes", scalar(&config.rotate_every_bytes));
    put("max_procs", scalar(&config.max_procs));
    put("setup.template.name", Value::String("filebeat".to_string()));
    put("setup.template.pattern", Value::String("filebeat-*".to_string()));
    put("setup.ilm.enabled", scalar(&config.setup_ilm_enabled));

    let mut modules = Mapping::new();
    modules.insert("enabled".into(), Value::Bool(false));
    let mut inputs = Mapping::new();
    inputs.insert("enabled".into(), Value::Bool(true));
    inputs.insert(
        "path".into(),
        Value::String(display(&config.inputs_dir.join("*.yml"))),
    );
    inputs.insert("reload.enabled".into(), Value::Bool(true));
    inputs.insert(
        "reload.period".into(),
        Value::String(INPUTS_RELOAD_PERIOD.to_string()),
    );
    let mut filebeat_config = Mapping::new();
    filebeat_config.insert("modules".into(), Value::Mapping(modules));
    filebeat_config.insert("inputs".into(), Value::Mapping(inputs));
    put("filebeat.config", Value::Mapping(filebeat_config));

    serde_yaml::to_string(&map).map_err(|e| ControllerError::Render(e.to_string()))
}
