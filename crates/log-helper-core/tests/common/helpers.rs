// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log_helper_core::{ContainerSpec, FilebeatConfig, HelperConfig};
use tempfile::TempDir;

/// Config rooted in `dir`: `dir/host` stands in for the host root filesystem.
pub fn test_config(dir: &TempDir) -> HelperConfig {
    let inputs_dir = dir.path().join("inputs.d");
    std::fs::create_dir_all(&inputs_dir).unwrap();
    HelperConfig {
        base_dir: dir.path().join("host"),
        eviction_interval: Duration::from_millis(50),
        filebeat: FilebeatConfig {
            config_file: dir.path().join("filebeat.yml"),
            inputs_dir,
            registry_file: dir.path().join("registry/filebeat/data.json"),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A container whose stdout is declared as stream `app`.
pub fn stdout_container(id: &str) -> ContainerSpec {
    container(id, &["k8s_logs_app=stdout"])
}

pub fn container(id: &str, env: &[&str]) -> ContainerSpec {
    ContainerSpec {
        id: id.to_string(),
        log_path: format!("/containers/{id}/{id}-json.log"),
        env: env.iter().map(|e| e.to_string()).collect(),
        labels: BTreeMap::new(),
        mounts: Vec::new(),
    }
}

/// Host-side path of the stdout log of a container built by `container()`.
pub fn host_log_file(config: &HelperConfig, id: &str) -> PathBuf {
    config
        .base_dir
        .join(format!("containers/{id}/{id}-json.log"))
}

pub fn write_log(path: &Path, bytes: usize) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![b'x'; bytes]).unwrap();
}

pub fn write_registry(config: &HelperConfig, source: &Path, offset: u64) {
    write_registry_entries(config, &[(source, offset)]);
}

pub fn write_registry_entries(config: &HelperConfig, entries: &[(&Path, u64)]) {
    let registry = &config.filebeat.registry_file;
    std::fs::create_dir_all(registry.parent().unwrap()).unwrap();
    let records: Vec<String> = entries
        .iter()
        .map(|(source, offset)| {
            format!(
                r#"{{"source": "{}", "offset": {}, "ttl": -1, "type": "container"}}"#,
                source.display(),
                offset
            )
        })
        .collect();
    std::fs::write(registry, format!("[{}]", records.join(","))).unwrap();
}

pub fn input_file(config: &HelperConfig, id: &str) -> PathBuf {
    config.filebeat.inputs_dir.join(format!("{id}.yml"))
}

/// Polls `condition` until it holds or two seconds have passed.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
