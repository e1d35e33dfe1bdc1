//! Graph snapshots: serialize a whole in-memory graph to a JSON file.
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a crash
//! mid-write never leaves a truncated snapshot behind.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::error::StorageError;
use crate::types::{GraphChange, GraphEdge, GraphNode, SyncRecord};

/// Current on-disk snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full contents of a graph store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub version: u32,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub changes: Vec<GraphChange>,
    pub sync_records: Vec<SyncRecord>,
}

impl GraphSnapshot {
    /// Atomically write the snapshot as pretty JSON, creating parent dirs.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_atomic(path, self).map_err(|e| StorageError::Snapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a snapshot. Returns `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let err = |message: String| StorageError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let data = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let snapshot: GraphSnapshot =
            serde_json::from_str(&data).map_err(|e| err(e.to_string()))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(err(format!(
                "unsupported snapshot version {} (max {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}

fn write_atomic(path: &Path, snapshot: &GraphSnapshot) -> io::Result<()> {
    let json = serde_json::to_string_pretty(snapshot).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
