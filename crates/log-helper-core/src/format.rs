// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log format registry.
//!
//! Each stream may declare `<prefix>.logs.<name>.format=<tag>` plus format properties as
//! children (`...format.time_key=ts`). The registry validates those properties eagerly so that a
//! malformed convention fails at derivation time instead of producing a broken input file.

use std::collections::{BTreeMap, HashMap};

use crate::error::DeriveError;
use crate::node::ConfigNode;

pub const FORMAT_NONE: &str = "none";
pub const FORMAT_CSV: &str = "csv";
pub const FORMAT_JSON: &str = "json";
pub const FORMAT_REGEXP: &str = "regexp";
pub const FORMAT_APACHE2: &str = "apache2";
pub const FORMAT_APACHE_ERROR: &str = "apache_error";
pub const FORMAT_NGINX: &str = "nginx";

/// A format after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    /// Format tag handed to the renderer. For `regexp` this is the `/pattern/` literal.
    pub tag: String,
    pub options: BTreeMap<String, String>,
}

pub trait FormatConverter: Send + Sync {
    fn convert(&self, node: &ConfigNode) -> Result<ResolvedFormat, DeriveError>;
}

/// Accepts only the listed child properties and copies them verbatim.
#[derive(Debug, Clone, Copy)]
pub struct AllowList(pub &'static [&'static str]);

impl AllowList {
    fn options(&self, node: &ConfigNode) -> Result<BTreeMap<String, String>, DeriveError> {
        node.children()
            .map(|(key, child)| {
                if self.0.iter().any(|allowed| *allowed == key) {
                    Ok((key.to_string(), child.value().to_string()))
                } else {
                    Err(DeriveError::InvalidFormatProperty {
                        property: key.to_string(),
                        format: node.value().to_string(),
                    })
                }
            })
            .collect()
    }
}

impl FormatConverter for AllowList {
    fn convert(&self, node: &ConfigNode) -> Result<ResolvedFormat, DeriveError> {
        Ok(ResolvedFormat {
            tag: node.value().to_string(),
            options: self.options(node)?,
        })
    }
}

/// `regexp` requires a non-blank `pattern`, which is moved into the tag as `/pattern/`.
#[derive(Debug, Clone, Copy)]
pub struct RegexpConverter;

const REGEXP_PROPERTIES: AllowList = AllowList(&["pattern", "time_format"]);

impl FormatConverter for RegexpConverter {
    fn convert(&self, node: &ConfigNode) -> Result<ResolvedFormat, DeriveError> {
        let mut options = REGEXP_PROPERTIES.options(node)?;
        let pattern = options.remove("pattern").unwrap_or_default();
        if pattern.trim().is_empty() {
            return Err(DeriveError::EmptyPattern);
        }
        Ok(ResolvedFormat {
            tag: format!("/{pattern}/"),
            options,
        })
    }
}

pub struct FormatRegistry {
    converters: HashMap<String, Box<dyn FormatConverter>>,
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<_> = self.converters.keys().collect();
        formats.sort();
        f.debug_struct("FormatRegistry")
            .field("formats", &formats)
            .finish()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(FORMAT_NONE, AllowList(&[]));
        registry.register(FORMAT_CSV, AllowList(&["time_key", "time_format", "keys"]));
        registry.register(FORMAT_JSON, AllowList(&["time_key", "time_format"]));
        registry.register(FORMAT_REGEXP, RegexpConverter);
        registry.register(FORMAT_APACHE2, AllowList(&[]));
        registry.register(FORMAT_APACHE_ERROR, AllowList(&[]));
        registry.register(FORMAT_NGINX, AllowList(&[]));
        registry
    }
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: &str, converter: impl FormatConverter + 'static) {
        self.converters.insert(format.to_string(), Box::new(converter));
    }

    pub fn contains(&self, format: &str) -> bool {
        self.converters.contains_key(format)
    }

    /// Validates `node`, whose value is the format tag and whose children are its properties.
    pub fn convert(&self, node: &ConfigNode) -> Result<ResolvedFormat, DeriveError> {
        let converter = self
            .converters
            .get(node.value())
            .ok_or_else(|| DeriveError::UnsupportedFormat(node.value().to_string()))?;
        converter.convert(node)
    }

    /// Resolves a stream's optional `format` node. Absent and `none` both mean plain lines;
    /// properties attached to an explicit `none` are discarded.
    pub fn resolve(&self, node: Option<&ConfigNode>) -> Result<ResolvedFormat, DeriveError> {
        match node {
            Some(node) if node.value() != FORMAT_NONE => self.convert(node),
            _ => self.convert(&ConfigNode::new(FORMAT_NONE)),
        }
    }
}
