// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Derivation of log stream descriptors from container env vars and labels.
//!
//! Containers declare streams with a naming convention, either as env vars or as labels:
//!
//! ```text
//! k8s_logs_app=stdout                      k8s.logs.app=stdout
//! k8s_logs_app_tags=env=prod,team=core     k8s.logs.app.tags=env=prod,team=core
//! k8s_logs_audit=/var/log/audit/audit.log  k8s.logs.audit=/var/log/audit/audit.log
//! k8s_logs_audit_format=json               k8s.logs.audit.format=json
//! ```
//!
//! Env var keys are normalized to the dotted label form, so `_` cannot appear inside a stream
//! name. The same applies to format properties: `k8s_logs_app_format_time_key` becomes
//! `format.time.key`, whose parent `format.time` does not exist, so the value is dropped.
//! Properties such as `time_key` or `time_format` can only be set through labels.
//!
//! Keys are processed in lexicographic order, which guarantees a stream's own declaration
//! is inserted before any of its attributes.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::HelperConfig;
use crate::error::DeriveError;
use crate::format::FormatRegistry;
use crate::node::ConfigNode;

pub const STDOUT_SOURCE: &str = "stdout";

const POD_NAME_LABEL: &str = "io.kubernetes.pod.name";
const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
const CONTAINER_NAME_LABEL: &str = "io.kubernetes.container.name";

/// A bind mount as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Host path
    pub source: String,
    /// Path inside the container
    pub destination: String,
}

/// What the runtime tells us about a container when it starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub id: String,
    /// Host path of the runtime's stdout/stderr log file
    pub log_path: String,
    /// `KEY=VALUE` strings
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
}

/// One named log stream of a container, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    /// `stdout` or an absolute path inside the container
    pub source_path: String,
    pub format: String,
    pub format_options: BTreeMap<String, String>,
    pub multiline: bool,
    /// Always holds `index` and `topic`
    pub tags: BTreeMap<String, String>,
    pub custom_directives: BTreeMap<String, String>,
    /// Host directory holding the log file(s)
    pub resolved_host_path: PathBuf,
    /// File name or glob inside `resolved_host_path`
    pub file: String,
}

impl StreamDescriptor {
    pub fn is_stdout(&self) -> bool {
        self.source_path == STDOUT_SOURCE
    }

    /// Host glob the agent should tail.
    pub fn host_glob(&self) -> PathBuf {
        self.resolved_host_path.join(&self.file)
    }
}

/// Everything derived for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    pub container_id: String,
    /// Orchestrator metadata attached to every stream
    pub metadata: BTreeMap<String, String>,
    pub streams: Vec<StreamDescriptor>,
}

/// Parses `k1=v1,k2=v2`. Every entry needs exactly one `=` with a non-blank key and value.
pub fn parse_blocks(blocks: &str) -> Result<BTreeMap<String, String>, DeriveError> {
    let mut block_map = BTreeMap::new();
    if blocks.is_empty() {
        return Ok(block_map);
    }

    for kv in blocks.split(',') {
        let parts: Vec<&str> = kv.split('=').collect();
        let [key, value] = parts.as_slice() else {
            return Err(DeriveError::MalformedBlock(kv.to_string()));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(DeriveError::MalformedBlock(kv.to_string()));
        }
        block_map.insert(key.to_string(), value.to_string());
    }
    Ok(block_map)
}

/// Joins `path` below `base` even when `path` is absolute.
fn join_under(base: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_) | Component::CurDir | Component::ParentDir))
        .collect();
    base.join(relative)
}

/// Translates an in-container directory to a host directory through the deepest bind mount
/// whose destination covers it.
pub fn host_dir_of(container_dir: &Path, mounts: &[Mount]) -> Option<PathBuf> {
    container_dir.ancestors().find_map(|ancestor| {
        let mount = mounts
            .iter()
            .find(|mount| Path::new(&mount.destination) == ancestor)?;
        let remainder = container_dir.strip_prefix(ancestor).ok()?;
        if remainder.as_os_str().is_empty() {
            Some(PathBuf::from(&mount.source))
        } else {
            Some(Path::new(&mount.source).join(remainder))
        }
    })
}

#[derive(Debug)]
pub struct ConfigDeriver {
    prefixes: Vec<String>,
    formats: Arc<FormatRegistry>,
    base_dir: PathBuf,
    index_suffix: Option<String>,
    cluster_env: Option<String>,
    node_name: Option<String>,
}

impl ConfigDeriver {
    pub fn new(config: &HelperConfig, formats: Arc<FormatRegistry>) -> Self {
        Self {
            prefixes: config.log_prefixes.clone(),
            formats,
            base_dir: config.base_dir.clone(),
            index_suffix: config.index_suffix.clone(),
            cluster_env: config.cluster_env.clone(),
            node_name: config.node_name.clone(),
        }
    }

    /// Derives every stream declared by `container`. An empty stream list is not an error.
    pub fn derive(&self, container: &ContainerSpec) -> Result<ContainerConfig, DeriveError> {
        let root = self.build_tree(container);

        let mut streams = Vec::new();
        for (name, node) in root.children() {
            match self.resolve_stream(name, node, container)? {
                Some(stream) => {
                    debug!(
                        "discovered log stream {} of container {}: {}",
                        stream.name,
                        container.id,
                        stream.host_glob().display()
                    );
                    streams.push(stream);
                }
                None => continue,
            }
        }

        Ok(ContainerConfig {
            container_id: container.id.clone(),
            metadata: self.metadata(container),
            streams,
        })
    }

    fn build_tree(&self, container: &ContainerSpec) -> ConfigNode {
        // BTreeMap keeps keys sorted; env vars override labels of the same name
        let mut labels = container.labels.clone();
        for entry in &container.env {
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            if self
                .prefixes
                .iter()
                .any(|prefix| key.starts_with(&format!("{prefix}_logs_")))
            {
                labels.insert(key.replace('_', "."), value.to_string());
            }
        }

        let mut root = ConfigNode::default();
        for (key, value) in &labels {
            for prefix in &self.prefixes {
                let Some(remainder) = key.strip_prefix(&format!("{prefix}.logs.")) else {
                    continue;
                };
                if remainder.is_empty() {
                    continue;
                }
                let segments: Vec<&str> = remainder.split('.').collect();
                root.insert(&segments, value);
            }
        }
        root
    }

    fn resolve_stream(
        &self,
        name: &str,
        node: &ConfigNode,
        container: &ContainerSpec,
    ) -> Result<Option<StreamDescriptor>, DeriveError> {
        let mut tags = parse_blocks(node.get("tags"))?;

        if let Some(cluster_env) = &self.cluster_env {
            if tags.get("env") != Some(cluster_env) {
                warn!(
                    "stream {} of container {} is not tagged env={}, skipping logs collection",
                    name, container.id, cluster_env
                );
                return Ok(None);
            }
        }

        let custom_directives = parse_blocks(node.get("config"))?;

        let name = match &self.index_suffix {
            Some(suffix) => format!("{name}-{suffix}"),
            None => name.to_string(),
        };

        let target = [node.get("target"), node.get("index")]
            .into_iter()
            .map(str::trim)
            .find(|v| !v.is_empty())
            .unwrap_or(name.as_str())
            .to_string();
        tags.entry("index".to_string())
            .or_insert_with(|| target.clone());
        tags.entry("topic".to_string()).or_insert(target);

        let format = self.formats.resolve(node.child("format"))?;
        let multiline = node.get("java") == "true";

        let source_path = node.value().trim();
        if source_path.is_empty() {
            return Err(DeriveError::EmptyPath(name));
        }

        let (resolved_host_path, file) = if source_path == STDOUT_SOURCE {
            self.stdout_location(&name, &container.log_path)?
        } else {
            self.mounted_location(source_path, &container.mounts)?
        };

        Ok(Some(StreamDescriptor {
            name,
            source_path: source_path.to_string(),
            format: format.tag,
            format_options: format.options,
            multiline,
            tags,
            custom_directives,
            resolved_host_path,
            file,
        }))
    }

    fn stdout_location(&self, name: &str, log_path: &str) -> Result<(PathBuf, String), DeriveError> {
        let log_path = Path::new(log_path);
        let (Some(dir), Some(file)) = (log_path.parent(), log_path.file_name()) else {
            return Err(DeriveError::MissingLogPath(name.to_string()));
        };
        // trailing glob picks up rotated json-file logs
        Ok((
            join_under(&self.base_dir, dir),
            format!("{}*", file.to_string_lossy()),
        ))
    }

    fn mounted_location(
        &self,
        source_path: &str,
        mounts: &[Mount],
    ) -> Result<(PathBuf, String), DeriveError> {
        let path = Path::new(source_path);
        if !path.is_absolute() {
            return Err(DeriveError::PathNotAbsolute(source_path.to_string()));
        }
        if source_path.ends_with('/') {
            return Err(DeriveError::NotAFile(source_path.to_string()));
        }
        let (Some(container_dir), Some(file)) = (path.parent(), path.file_name()) else {
            return Err(DeriveError::NotAFile(source_path.to_string()));
        };

        let host_dir = host_dir_of(container_dir, mounts)
            .ok_or_else(|| DeriveError::NoHostMount(source_path.to_string()))?;

        Ok((
            join_under(&self.base_dir, &host_dir),
            file.to_string_lossy().into_owned(),
        ))
    }

    fn metadata(&self, container: &ContainerSpec) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        let mut put_if_not_empty = |key: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                metadata.insert(key.to_string(), value.to_string());
            }
        };
        let label = |key: &str| container.labels.get(key).map(String::as_str);

        put_if_not_empty("k8s_pod", label(POD_NAME_LABEL));
        put_if_not_empty("k8s_pod_namespace", label(POD_NAMESPACE_LABEL));
        put_if_not_empty("k8s_pod_name", label(CONTAINER_NAME_LABEL));
        put_if_not_empty("k8s_node_name", self.node_name.as_deref());
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_PATH: &str = "/var/lib/docker/containers/abc/abc-json.log";

    fn deriver() -> ConfigDeriver {
        deriver_with(HelperConfig::default())
    }

    fn deriver_with(config: HelperConfig) -> ConfigDeriver {
        ConfigDeriver::new(&config, Arc::new(FormatRegistry::default()))
    }

    fn container(env: &[&str], labels: &[(&str, &str)], mounts: &[(&str, &str)]) -> ContainerSpec {
        ContainerSpec {
            id: "abc".to_string(),
            log_path: LOG_PATH.to_string(),
            env: env.iter().map(|e| e.to_string()).collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mounts: mounts
                .iter()
                .map(|(source, destination)| Mount {
                    source: source.to_string(),
                    destination: destination.to_string(),
                })
                .collect(),
        }
    }

    fn single_stream(config: ContainerConfig) -> StreamDescriptor {
        assert_eq!(config.streams.len(), 1, "expected one stream: {config:?}");
        config.streams.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_blocks() {
        let blocks = parse_blocks("env=test, cluster = east").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["env"], "test");
        assert_eq!(blocks["cluster"], "east");

        assert!(parse_blocks("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_blocks_malformed() {
        assert_eq!(
            parse_blocks("env=test,cluster"),
            Err(DeriveError::MalformedBlock("cluster".to_string()))
        );
        assert_eq!(
            parse_blocks("a=b=c"),
            Err(DeriveError::MalformedBlock("a=b=c".to_string()))
        );
        assert_eq!(
            parse_blocks("env= "),
            Err(DeriveError::MalformedBlock("env= ".to_string()))
        );
    }

    #[test]
    fn test_host_dir_of_longest_prefix() {
        let mounts = vec![
            Mount {
                source: "/data/root".to_string(),
                destination: "/var".to_string(),
            },
            Mount {
                source: "/data/app-logs".to_string(),
                destination: "/var/log/app".to_string(),
            },
        ];

        assert_eq!(
            host_dir_of(Path::new("/var/log/app"), &mounts),
            Some(PathBuf::from("/data/app-logs"))
        );
        assert_eq!(
            host_dir_of(Path::new("/var/log/app/nested"), &mounts),
            Some(PathBuf::from("/data/app-logs/nested"))
        );
        assert_eq!(
            host_dir_of(Path::new("/var/log/other"), &mounts),
            Some(PathBuf::from("/data/root/log/other"))
        );
        assert_eq!(host_dir_of(Path::new("/opt/logs"), &mounts), None);
    }

    #[test]
    fn test_no_streams_is_not_an_error() {
        let config = deriver()
            .derive(&container(&["PATH=/usr/bin", "other_logs_app=stdout"], &[], &[]))
            .unwrap();
        assert!(config.streams.is_empty());
        assert_eq!(config.container_id, "abc");
    }

    #[test]
    fn test_stdout_stream_from_env() {
        let stream = single_stream(
            deriver()
                .derive(&container(&["k8s_logs_app=stdout"], &[], &[]))
                .unwrap(),
        );

        assert_eq!(stream.name, "app");
        assert!(stream.is_stdout());
        assert_eq!(stream.source_path, "stdout");
        assert_eq!(
            stream.resolved_host_path,
            PathBuf::from("/host/var/lib/docker/containers/abc")
        );
        assert_eq!(stream.file, "abc-json.log*");
        assert_eq!(stream.format, "none");
        assert!(!stream.multiline);
    }

    #[test]
    fn test_stdout_ignores_mounts() {
        let with_mounts = single_stream(
            deriver()
                .derive(&container(
                    &["k8s_logs_app=stdout"],
                    &[],
                    &[("/data", "/var/lib/docker")],
                ))
                .unwrap(),
        );
        let without_mounts = single_stream(
            deriver()
                .derive(&container(&["k8s_logs_app=stdout"], &[], &[]))
                .unwrap(),
        );
        assert_eq!(with_mounts, without_mounts);
    }

    #[test]
    fn test_stdout_without_log_path() {
        let mut spec = container(&["k8s_logs_app=stdout"], &[], &[]);
        spec.log_path = String::new();
        assert_eq!(
            deriver().derive(&spec),
            Err(DeriveError::MissingLogPath("app".to_string()))
        );
    }

    #[test]
    fn test_index_topic_default_to_name() {
        let stream = single_stream(
            deriver()
                .derive(&container(&["k8s_logs_app=stdout"], &[], &[]))
                .unwrap(),
        );
        assert_eq!(stream.tags["index"], "app");
        assert_eq!(stream.tags["topic"], "app");
    }

    #[test]
    fn test_index_topic_default_to_target() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &["k8s_logs_app=stdout", "k8s_logs_app_target=custom"],
                    &[],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(stream.tags["index"], "custom");
        assert_eq!(stream.tags["topic"], "custom");
    }

    #[test]
    fn test_explicit_tags_win_over_target() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &[
                        "k8s_logs_app=stdout",
                        "k8s_logs_app_target=custom",
                        "k8s_logs_app_tags=index=explicit,env=prod",
                    ],
                    &[],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(stream.tags["index"], "explicit");
        assert_eq!(stream.tags["topic"], "custom");
        assert_eq!(stream.tags["env"], "prod");
    }

    #[test]
    fn test_index_attribute_used_without_target() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &["k8s_logs_app=stdout", "k8s_logs_app_index=project-demo-log"],
                    &[],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(stream.tags["index"], "project-demo-log");
        assert_eq!(stream.tags["topic"], "project-demo-log");
    }

    #[test]
    fn test_mounted_file_stream_from_labels() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &[],
                    &[
                        ("k8s.logs.audit", "/var/log/audit/audit.log"),
                        ("k8s.logs.audit.format", "csv"),
                        ("k8s.logs.audit.format.keys", "a,b"),
                        ("k8s.logs.audit.java", "true"),
                        ("k8s.logs.audit.config", "close_eof=true"),
                    ],
                    &[("/data/audit", "/var/log/audit")],
                ))
                .unwrap(),
        );

        assert!(!stream.is_stdout());
        assert_eq!(stream.source_path, "/var/log/audit/audit.log");
        assert_eq!(stream.resolved_host_path, PathBuf::from("/host/data/audit"));
        assert_eq!(stream.file, "audit.log");
        assert_eq!(stream.format, "csv");
        assert_eq!(stream.format_options["keys"], "a,b");
        assert!(stream.multiline);
        assert_eq!(stream.custom_directives["close_eof"], "true");
        assert_eq!(
            stream.host_glob(),
            PathBuf::from("/host/data/audit/audit.log")
        );
    }

    #[test]
    fn test_relative_path_rejected() {
        assert_eq!(
            deriver().derive(&container(&["k8s_logs_app=logs/app.log"], &[], &[])),
            Err(DeriveError::PathNotAbsolute("logs/app.log".to_string()))
        );
    }

    #[test]
    fn test_directory_path_rejected() {
        assert_eq!(
            deriver().derive(&container(
                &["k8s_logs_app=/var/log/"],
                &[],
                &[("/data", "/var/log")]
            )),
            Err(DeriveError::NotAFile("/var/log/".to_string()))
        );
    }

    #[test]
    fn test_unmounted_path_rejected() {
        assert_eq!(
            deriver().derive(&container(
                &["k8s_logs_app=/opt/app/app.log"],
                &[],
                &[("/data", "/var/log")]
            )),
            Err(DeriveError::NoHostMount("/opt/app/app.log".to_string()))
        );
    }

    #[test]
    fn test_empty_path_rejected() {
        assert_eq!(
            deriver().derive(&container(&["k8s_logs_app= "], &[], &[])),
            Err(DeriveError::EmptyPath("app".to_string()))
        );
    }

    #[test]
    fn test_malformed_tags_fail_container() {
        let result = deriver().derive(&container(
            &[
                "k8s_logs_app=stdout",
                "k8s_logs_app_tags=env",
                "k8s_logs_web=stdout",
            ],
            &[],
            &[],
        ));
        assert_eq!(result, Err(DeriveError::MalformedBlock("env".to_string())));
    }

    #[test]
    fn test_regexp_stream() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &[
                        "k8s_logs_app=stdout",
                        "k8s_logs_app_format=regexp",
                        "k8s_logs_app_format_pattern=^ERROR",
                    ],
                    &[],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(stream.format, "/^ERROR/");
        assert!(stream.format_options.is_empty());
    }

    #[test]
    fn test_underscored_format_property_needs_label() {
        let from_env = single_stream(
            deriver()
                .derive(&container(
                    &[
                        "k8s_logs_app=stdout",
                        "k8s_logs_app_format=json",
                        "k8s_logs_app_format_time_key=ts",
                    ],
                    &[],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(from_env.format, "json");
        assert!(from_env.format_options.is_empty());

        let from_label = single_stream(
            deriver()
                .derive(&container(
                    &["k8s_logs_app=stdout", "k8s_logs_app_format=json"],
                    &[("k8s.logs.app.format.time_key", "ts")],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(from_label.format_options["time_key"], "ts");
    }

    #[test]
    fn test_env_overrides_label() {
        let stream = single_stream(
            deriver()
                .derive(&container(
                    &["k8s_logs_app_target=from-env"],
                    &[("k8s.logs.app", "stdout"), ("k8s.logs.app.target", "from-label")],
                    &[],
                ))
                .unwrap(),
        );
        assert_eq!(stream.tags["index"], "from-env");
    }

    #[test]
    fn test_multiple_prefixes_and_streams() {
        let config = HelperConfig {
            log_prefixes: vec!["k8s".to_string(), "svc".to_string()],
            ..Default::default()
        };
        let derived = deriver_with(config)
            .derive(&container(
                &["svc_logs_web=stdout", "k8s_logs_app=stdout"],
                &[],
                &[],
            ))
            .unwrap();
        let names: Vec<_> = derived.streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app", "web"]);
    }

    #[test]
    fn test_index_suffix() {
        let config = HelperConfig {
            index_suffix: Some("log".to_string()),
            ..Default::default()
        };
        let stream = single_stream(
            deriver_with(config)
                .derive(&container(&["k8s_logs_app=stdout"], &[], &[]))
                .unwrap(),
        );
        assert_eq!(stream.name, "app-log");
        assert_eq!(stream.tags["index"], "app-log");
    }

    #[test]
    fn test_cluster_env_filter() {
        let config = HelperConfig {
            cluster_env: Some("prod".to_string()),
            ..Default::default()
        };
        let derived = deriver_with(config)
            .derive(&container(
                &[
                    "k8s_logs_app=stdout",
                    "k8s_logs_app_tags=env=prod",
                    "k8s_logs_web=stdout",
                    "k8s_logs_web_tags=env=test",
                ],
                &[],
                &[],
            ))
            .unwrap();
        let names: Vec<_> = derived.streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app"]);
    }

    #[test]
    fn test_metadata_from_labels() {
        let config = HelperConfig {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        };
        let derived = deriver_with(config)
            .derive(&container(
                &[],
                &[
                    ("io.kubernetes.pod.name", "web-0"),
                    ("io.kubernetes.pod.namespace", "shop"),
                    ("io.kubernetes.container.name", ""),
                ],
                &[],
            ))
            .unwrap();

        assert_eq!(derived.metadata.len(), 3);
        assert_eq!(derived.metadata["k8s_pod"], "web-0");
        assert_eq!(derived.metadata["k8s_pod_namespace"], "shop");
        assert_eq!(derived.metadata["k8s_node_name"], "node-1");
        assert!(!derived.metadata.contains_key("k8s_pod_name"));
    }
}
