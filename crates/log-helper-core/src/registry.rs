// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only view of filebeat's registry file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ControllerError;

/// One registry record. Only `source` and `offset` matter; other fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub source: String,
    #[serde(default)]
    pub offset: u64,
}

/// Offsets by source file. The registry may list a source more than once; the first entry wins.
pub type RegistrySnapshot = HashMap<String, u64>;

pub fn parse_registry(data: &[u8]) -> Result<RegistrySnapshot, serde_json::Error> {
    let entries: Vec<RegistryEntry> = serde_json::from_slice(data)?;
    let mut snapshot = RegistrySnapshot::with_capacity(entries.len());
    for entry in entries {
        snapshot.entry(entry.source).or_insert(entry.offset);
    }
    Ok(snapshot)
}

pub async fn load_registry(path: &Path) -> Result<RegistrySnapshot, ControllerError> {
    let unreadable = |reason: String| ControllerError::RegistryUnreadable {
        path: path.to_path_buf(),
        reason,
    };

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    let snapshot = parse_registry(&data).map_err(|e| unreadable(e.to_string()))?;
    debug!("loaded {} registry entries from {}", snapshot.len(), path.display());
    Ok(snapshot)
}
