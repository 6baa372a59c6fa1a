//! In-memory store for deterministic testing.
//!
//! # Design
//!
//! `MemoryStore` keeps nodes, file blobs, pins and name pointers in memory.
//! CIDs are sha256 digests of the stored bytes, so the same node always gets
//! the same CID and link order matters exactly as it does on a real node.
//! Every call is recorded, and individual operations can be configured to
//! fail with a chosen [`ErrorKind`].
//!
//! # Example
//!
//! ```
//! use cairn_core::{DagNode, Link};
//! use cairn_store::memory::MemoryStore;
//! use cairn_store::{Store, PublishOptions, ResolveOptions};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let leaf = store.insert_blob(b"hello");
//! let root = store
//!     .put_node(&DagNode::directory(vec![Link::new("hello.txt", leaf, 5)]))
//!     .await
//!     .unwrap();
//!
//! store.name_publish("site", &root.cid, &PublishOptions::default()).await.unwrap();
//! let name = store.key_id("site").await.unwrap();
//! let resolved = store.name_resolve(&name, &ResolveOptions::default()).await.unwrap();
//! assert_eq!(resolved, root.cid);
//! # });
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use cairn_core::{Cid, ContentPath, DagNode, Link, NodeStat};

use crate::error::{ErrorKind, StoreError};
use crate::traits::{PublishOptions, Published, ResolveOptions, StagedFile, Store};

/// UnixFS `Data` of a file node; anything but the directory marker.
const FILE_MARKER: [u8; 2] = [0x08, 0x02];

/// Operation selector for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    PutNode,
    GetNode,
    Cat,
    ResolvePath,
    Stat,
    AddDir,
    PinAdd,
    PinRm,
    NamePublish,
    NameResolve,
    KeyId,
}

impl Op {
    fn label(self) -> &'static str {
        match self {
            Op::PutNode => "dag/put",
            Op::GetNode => "dag/get",
            Op::Cat => "cat",
            Op::ResolvePath => "resolve",
            Op::Stat => "files/stat",
            Op::AddDir => "add",
            Op::PinAdd => "pin/add",
            Op::PinRm => "pin/rm",
            Op::NamePublish => "name/publish",
            Op::NameResolve => "name/resolve",
            Op::KeyId => "key/list",
        }
    }
}

/// Recorded call, for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    PutNode { cid: Cid },
    GetNode { cid: Cid },
    Cat { path: String },
    ResolvePath { path: String },
    Stat { cid: Cid },
    AddDir { files: usize },
    PinAdd { cid: Cid },
    PinRm { cid: Cid },
    NamePublish { key: String, cid: Cid },
    NameResolve { name: String },
    KeyId { key: String },
}

/// Mock store for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>`; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<Cid, DagNode>,
    blobs: HashMap<Cid, Vec<u8>>,
    pins: BTreeSet<Cid>,
    /// Name id -> current target.
    names: HashMap<String, Cid>,
    failures: HashMap<Op, ErrorKind>,
    operations: Vec<Operation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not poison every later assertion.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configure `op` to fail with `kind` until cleared.
    pub fn fail_on(self, op: Op, kind: ErrorKind) -> Self {
        self.set_failure(op, kind);
        self
    }

    pub fn set_failure(&self, op: Op, kind: ErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All recorded operations, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    pub fn pinned(&self) -> Vec<Cid> {
        self.lock().pins.iter().cloned().collect()
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.lock().pins.contains(cid)
    }

    /// Mark `cid` pinned without going through `pin_add`.
    pub fn pin_directly(&self, cid: &Cid) {
        self.lock().pins.insert(cid.clone());
    }

    /// Store a file blob and return its CID.
    pub fn insert_blob(&self, bytes: &[u8]) -> Cid {
        let cid = digest_cid("bafkmem", bytes);
        self.lock().blobs.insert(cid.clone(), bytes.to_vec());
        cid
    }

    /// Store a node without recording an operation.
    pub fn insert_node(&self, node: &DagNode) -> NodeStat {
        self.lock().store_node(node)
    }

    pub fn node(&self, cid: &Cid) -> Option<DagNode> {
        self.lock().nodes.get(cid).cloned()
    }

    /// Point the name owned by `key` at `cid` without recording an operation.
    pub fn set_name(&self, key: &str, cid: &Cid) {
        self.lock().names.insert(key_name(key), cid.clone());
    }

    /// Current target of the name owned by `key`.
    pub fn name_target(&self, key: &str) -> Option<Cid> {
        self.lock().names.get(&key_name(key)).cloned()
    }
}

impl Inner {
    fn begin(&mut self, op: Op, record: Operation) -> Result<(), StoreError> {
        self.operations.push(record);
        match self.failures.get(&op) {
            Some(kind) => Err(StoreError::new(*kind, op.label(), "injected failure")),
            None => Ok(()),
        }
    }

    fn store_node(&mut self, node: &DagNode) -> NodeStat {
        // serde_json never fails for DagNode: plain strings, numbers and bytes.
        let bytes = serde_json::to_vec(node).unwrap_or_default();
        let cid = digest_cid("bafymem", &bytes);
        let size = bytes.len() as u64 + node.links.iter().map(|l| l.tsize).sum::<u64>();
        self.nodes.insert(cid.clone(), node.clone());
        NodeStat::new(cid, size)
    }

    fn exists(&self, cid: &Cid) -> bool {
        self.nodes.contains_key(cid) || self.blobs.contains_key(cid)
    }

    fn size_of(&self, cid: &Cid) -> Option<u64> {
        if let Some(bytes) = self.blobs.get(cid) {
            return Some(bytes.len() as u64);
        }
        let node = self.nodes.get(cid)?;
        let encoded = serde_json::to_vec(node).unwrap_or_default().len() as u64;
        Some(encoded + node.links.iter().map(|l| l.tsize).sum::<u64>())
    }

    fn walk(&self, op: &'static str, path: &ContentPath) -> Result<Cid, StoreError> {
        let mut cid = match path {
            ContentPath::Ipfs { cid, .. } => cid.clone(),
            ContentPath::Ipns { name, .. } => self
                .names
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::not_found(op, format!("could not resolve name {name}")))?,
        };
        if !self.exists(&cid) {
            return Err(StoreError::not_found(op, format!("block {cid} not found")));
        }
        for segment in path.segments() {
            let node = self
                .nodes
                .get(&cid)
                .ok_or_else(|| StoreError::not_found(op, format!("no link named {segment:?} under {cid}")))?;
            let link = node
                .link(segment)
                .ok_or_else(|| StoreError::not_found(op, format!("no link named {segment:?} under {cid}")))?;
            cid = link.hash.clone();
            if !self.exists(&cid) {
                return Err(StoreError::not_found(op, format!("block {cid} not found")));
            }
        }
        Ok(cid)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put_node(&self, node: &DagNode) -> Result<NodeStat, StoreError> {
        let mut inner = self.lock();
        let bytes = serde_json::to_vec(node).unwrap_or_default();
        let cid = digest_cid("bafymem", &bytes);
        inner.begin(Op::PutNode, Operation::PutNode { cid })?;
        Ok(inner.store_node(node))
    }

    async fn get_node(&self, cid: &Cid) -> Result<DagNode, StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::GetNode, Operation::GetNode { cid: cid.clone() })?;
        if let Some(node) = inner.nodes.get(cid) {
            return Ok(node.clone());
        }
        if inner.blobs.contains_key(cid) {
            return Ok(DagNode {
                data: FILE_MARKER.to_vec(),
                links: Vec::new(),
            });
        }
        Err(StoreError::not_found(Op::GetNode.label(), format!("block {cid} not found")))
    }

    async fn cat(&self, path: &ContentPath) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::Cat, Operation::Cat { path: path.to_string() })?;
        let cid = inner.walk(Op::Cat.label(), path)?;
        inner.blobs.get(&cid).cloned().ok_or_else(|| {
            StoreError::new(ErrorKind::Api, Op::Cat.label(), "this dag node is a directory")
        })
    }

    async fn resolve_path(&self, path: &ContentPath) -> Result<Cid, StoreError> {
        let mut inner = self.lock();
        inner.begin(
            Op::ResolvePath,
            Operation::ResolvePath { path: path.to_string() },
        )?;
        inner.walk(Op::ResolvePath.label(), path)
    }

    async fn stat(&self, cid: &Cid) -> Result<NodeStat, StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::Stat, Operation::Stat { cid: cid.clone() })?;
        inner
            .size_of(cid)
            .map(|size| NodeStat::new(cid.clone(), size))
            .ok_or_else(|| StoreError::not_found(Op::Stat.label(), format!("block {cid} not found")))
    }

    async fn add_dir(&self, files: Vec<StagedFile>) -> Result<NodeStat, StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::AddDir, Operation::AddDir { files: files.len() })?;

        let mut root = Entry::dir();
        for file in files {
            let segments: Vec<String> = file
                .path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
            root.insert(&segments, file.bytes);
        }
        Ok(root.commit(&mut inner))
    }

    async fn pin_add(&self, cid: &Cid, _recursive: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::PinAdd, Operation::PinAdd { cid: cid.clone() })?;
        if !inner.exists(cid) {
            return Err(StoreError::not_found(Op::PinAdd.label(), format!("block {cid} not found")));
        }
        inner.pins.insert(cid.clone());
        Ok(())
    }

    async fn pin_rm(&self, cid: &Cid, _recursive: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::PinRm, Operation::PinRm { cid: cid.clone() })?;
        if !inner.pins.remove(cid) {
            return Err(StoreError::new(
                ErrorKind::Api,
                Op::PinRm.label(),
                format!("{cid} is not pinned or pinned indirectly"),
            ));
        }
        Ok(())
    }

    async fn name_publish(
        &self,
        key: &str,
        cid: &Cid,
        _options: &PublishOptions,
    ) -> Result<Published, StoreError> {
        let mut inner = self.lock();
        inner.begin(
            Op::NamePublish,
            Operation::NamePublish {
                key: key.to_string(),
                cid: cid.clone(),
            },
        )?;
        let name = key_name(key);
        inner.names.insert(name.clone(), cid.clone());
        Ok(Published {
            name,
            value: format!("/ipfs/{cid}"),
        })
    }

    async fn name_resolve(
        &self,
        name: &str,
        _options: &ResolveOptions,
    ) -> Result<Cid, StoreError> {
        let mut inner = self.lock();
        inner.begin(
            Op::NameResolve,
            Operation::NameResolve {
                name: name.to_string(),
            },
        )?;
        let bare = name.trim_start_matches("/ipns/");
        inner.names.get(bare).cloned().ok_or_else(|| {
            StoreError::not_found(Op::NameResolve.label(), format!("could not resolve name {bare}"))
        })
    }

    async fn key_id(&self, key: &str) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.begin(Op::KeyId, Operation::KeyId { key: key.to_string() })?;
        Ok(key_name(key))
    }
}

/// Deterministic mutable name for a key.
pub fn key_name(key: &str) -> String {
    format!("k51{key}")
}

fn digest_cid(prefix: &str, bytes: &[u8]) -> Cid {
    let digest = hex::encode(Sha256::digest(bytes));
    Cid::parse(&format!("{prefix}{digest}")).unwrap_or_else(|_| unreachable!("hex digest is a valid cid"))
}

/// Directory tree under construction during `add_dir`.
enum Entry {
    File(Vec<u8>),
    Dir(BTreeMap<String, Entry>),
}

impl Entry {
    fn dir() -> Self {
        Entry::Dir(BTreeMap::new())
    }

    fn insert(&mut self, segments: &[String], bytes: Vec<u8>) {
        let Entry::Dir(children) = self else {
            return;
        };
        match segments {
            [] => {}
            [leaf] => {
                children.insert(leaf.clone(), Entry::File(bytes));
            }
            [head, rest @ ..] => {
                let child = children.entry(head.clone()).or_insert_with(Entry::dir);
                if matches!(child, Entry::File(_)) {
                    *child = Entry::dir();
                }
                child.insert(rest, bytes);
            }
        }
    }

    fn commit(self, inner: &mut Inner) -> NodeStat {
        match self {
            Entry::File(bytes) => {
                let cid = digest_cid("bafkmem", &bytes);
                let size = bytes.len() as u64;
                inner.blobs.insert(cid.clone(), bytes);
                NodeStat::new(cid, size)
            }
            Entry::Dir(children) => {
                let links: Vec<Link> = children
                    .into_iter()
                    .map(|(name, entry)| entry.commit(inner).to_link(name))
                    .collect();
                inner.store_node(&DagNode::directory(links))
            }
        }
    }
}
