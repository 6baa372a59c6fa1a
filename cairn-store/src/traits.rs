//! Store trait definition for the content-addressed backend.
//!
//! # Design
//!
//! The `Store` trait is async because every operation is a network call to
//! the node. Each implementation applies its own per-call timeout; there is
//! no cross-call cancellation.
//!
//! Nothing here pins implicitly: `put_node` and `add_dir` only make content
//! addressable, retention is managed through `pin_add` / `pin_rm`.

use std::time::Duration;

use async_trait::async_trait;

use cairn_core::{Cid, ContentPath, DagNode, NodeStat};

use crate::error::StoreError;

/// Options for [`Store::name_publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Publish even when the node has no peers.
    pub allow_offline: bool,
    /// Check that the target resolves before publishing.
    pub resolve: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            allow_offline: true,
            resolve: false,
        }
    }
}

/// Options for [`Store::name_resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub recursive: bool,
    /// Bypass the node's name cache.
    pub nocache: bool,
    /// Overrides the store's default resolve timeout.
    pub timeout: Option<Duration>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            nocache: true,
            timeout: None,
        }
    }
}

/// Result of a name publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The mutable name that was updated.
    pub name: String,
    /// The path it now points at, e.g. `/ipfs/<cid>`.
    pub value: String,
}

/// One file of a directory upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// `/`-separated path relative to the uploaded directory root.
    pub path: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// A content-addressed store with mutable name pointers.
///
/// Implementations must be `Send + Sync` so a single handle can be shared by
/// every phase of a run.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for log output (e.g. "kubo", "memory").
    fn name(&self) -> &'static str;

    /// Commit a directory node. Links are stored in the order given.
    async fn put_node(&self, node: &DagNode) -> Result<NodeStat, StoreError>;

    /// Fetch the node at `cid`. File leaves come back with a non-directory
    /// `data` payload and no links.
    async fn get_node(&self, cid: &Cid) -> Result<DagNode, StoreError>;

    /// Read the bytes of the file at `path`.
    async fn cat(&self, path: &ContentPath) -> Result<Vec<u8>, StoreError>;

    /// Resolve `path` (ipfs- or ipns-rooted) to the CID it designates.
    ///
    /// Fails with `NotFound` when any step of the path is missing.
    async fn resolve_path(&self, path: &ContentPath) -> Result<Cid, StoreError>;

    /// Cumulative size of the DAG rooted at `cid`.
    async fn stat(&self, cid: &Cid) -> Result<NodeStat, StoreError>;

    /// Upload a set of files as one directory and return its root.
    async fn add_dir(&self, files: Vec<StagedFile>) -> Result<NodeStat, StoreError>;

    async fn pin_add(&self, cid: &Cid, recursive: bool) -> Result<(), StoreError>;

    async fn pin_rm(&self, cid: &Cid, recursive: bool) -> Result<(), StoreError>;

    /// Point the name owned by `key` at `cid`.
    async fn name_publish(
        &self,
        key: &str,
        cid: &Cid,
        options: &PublishOptions,
    ) -> Result<Published, StoreError>;

    /// Resolve a mutable name (not a key name) to its current CID.
    async fn name_resolve(&self, name: &str, options: &ResolveOptions)
        -> Result<Cid, StoreError>;

    /// The mutable name owned by the local key `key`.
    async fn key_id(&self, key: &str) -> Result<String, StoreError>;
}
