//! `build.json`: the staging record and crash-recovery checkpoint.
//!
//! Created by `stage`, rewritten after every successful publication phase.
//! Writes use the `.tmp` sibling + rename pattern so a crash mid-write never
//! leaves a truncated descriptor behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::{Cid, NodeStat};

/// Default descriptor file name, relative to the working directory.
pub const DESCRIPTOR_FILE: &str = "build.json";

/// On-disk staging record.
///
/// `previous_*` fields are only ever assigned when a new root replaces an
/// existing, different one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_raw_build: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_raw_build: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_build: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_build: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BuildDescriptor {
    /// A fresh descriptor for content that was just uploaded.
    pub fn staged(version: impl Into<String>, source: &NodeStat) -> Self {
        Self {
            version: Some(version.into()),
            source_uri: Some(format!("/ipfs/{}", source.cid)),
            source_size: Some(source.size),
            updated_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// The staged version name; a missing or blank value is a structural error.
    pub fn require_version(&self, path: &Path) -> Result<&str, CoreError> {
        match self.version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(CoreError::MissingField {
                path: path.to_path_buf(),
                field: "version",
            }),
        }
    }

    /// The staged content root.
    pub fn require_source(&self, path: &Path) -> Result<Cid, CoreError> {
        let raw = self
            .source_uri
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CoreError::MissingField {
                path: path.to_path_buf(),
                field: "sourceUri",
            })?;
        Cid::parse(raw)
    }

    /// Record the outcome of a raw-tree reconciliation.
    pub fn record_raw(&mut self, replaced: Option<Cid>, root: Cid) {
        advance(
            &mut self.current_raw_build,
            &mut self.previous_raw_build,
            replaced,
            root,
        );
        self.updated_at = Some(Utc::now());
    }

    /// Record the outcome of a production aggregation.
    pub fn record_build(&mut self, replaced: Option<Cid>, root: Cid) {
        advance(
            &mut self.current_build,
            &mut self.previous_build,
            replaced,
            root,
        );
        self.updated_at = Some(Utc::now());
    }

    /// Swap `current*` and `previous*` after a manual rollback of the raw key.
    pub fn rollback_raw(&mut self) {
        std::mem::swap(&mut self.current_raw_build, &mut self.previous_raw_build);
        self.updated_at = Some(Utc::now());
    }

    /// Swap `current*` and `previous*` after a manual rollback of the production key.
    pub fn rollback_build(&mut self) {
        std::mem::swap(&mut self.current_build, &mut self.previous_build);
        self.updated_at = Some(Utc::now());
    }
}

fn advance(current: &mut Option<Cid>, previous: &mut Option<Cid>, replaced: Option<Cid>, root: Cid) {
    if let Some(old) = replaced.filter(|old| *old != root) {
        *previous = Some(old);
    }
    *current = Some(root);
}

/// Load the descriptor at `path`.
///
/// Returns [`CoreError::DescriptorNotFound`] if absent and
/// [`CoreError::DescriptorParse`] (with path) if malformed.
pub fn load(path: &Path) -> Result<BuildDescriptor, CoreError> {
    if !path.exists() {
        return Err(CoreError::DescriptorNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| CoreError::DescriptorParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically save the descriptor to `path`.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save(path: &Path, descriptor: &BuildDescriptor) -> Result<(), CoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let json = serde_json::to_string_pretty(descriptor)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// `<path>.tmp`, in the same directory as the target.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DESCRIPTOR_FILE.into());
    name.push(".tmp");
    path.with_file_name(name)
}
