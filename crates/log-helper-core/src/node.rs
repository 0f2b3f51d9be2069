// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key-path tree used to rebuild per-stream settings from flat convention keys.
//!
//! A key such as `k8s.logs.app.format.time_key` becomes the path
//! `["app", "format", "time_key"]` once the prefix is stripped. The first segment names the
//! stream, and its node value is the stream's source path. Deeper segments are attributes.

use std::collections::BTreeMap;

use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNode {
    value: String,
    children: BTreeMap<String, ConfigNode>,
}

impl ConfigNode {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            children: BTreeMap::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Inserts `value` at `keys`.
    ///
    /// A single segment creates or replaces a leaf. Longer paths only descend into children that
    /// already exist; when the parent is missing the insertion is dropped with a warning and the
    /// tree is left untouched.
    pub fn insert<S: AsRef<str>>(&mut self, keys: &[S], value: &str) {
        let Some((first, rest)) = keys.split_first() else {
            return;
        };
        let key = first.as_ref();

        if rest.is_empty() {
            self.children.insert(key.to_string(), ConfigNode::new(value));
            return;
        }

        match self.children.get_mut(key) {
            Some(child) => child.insert(rest, value),
            None => warn!("[{}] has no parent node, ignoring value {:?}", key, value),
        }
    }

    /// Value of the direct child `key`, or an empty string.
    pub fn get(&self, key: &str) -> &str {
        self.children
            .get(key)
            .map(|child| child.value.as_str())
            .unwrap_or_default()
    }

    pub fn child(&self, key: &str) -> Option<&ConfigNode> {
        self.children.get(key)
    }

    /// Children in lexicographic order of their segment name.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ConfigNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
