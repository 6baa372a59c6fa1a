//! Domain types shared by the store, the publication engine and the CLI.
//!
//! DAG nodes here are plain values keyed by their CID; nothing in this module
//! talks to a store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// UnixFS `Data` payload of a directory node (`Type: Directory`).
pub const DIRECTORY_MARKER: [u8; 2] = [0x08, 0x01];

/// File name of the per-build liveness manifest.
pub const MANIFEST_FILE: &str = "current.json";

/// Name of the one-generation rollback link in a raw tree.
pub const PREVIOUS_LINK: &str = "previous";

/// Channel pointer link names in a raw tree.
pub const POINTER_LINKS: [&str; 3] = ["latest-release", "latest-pre-release", "latest-build"];

/// `previous` or one of the `latest-*` pointers. A raw tree never holds a
/// version or product under one of these names.
pub fn is_reserved_link(name: &str) -> bool {
    name == PREVIOUS_LINK || POINTER_LINKS.contains(&name)
}

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A content identifier: the hash-derived address of an immutable blob or
/// directory node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    /// Parse a CID from a bare identifier, `/ipfs/<cid>` or `ipfs://<cid>`.
    ///
    /// Any trailing path segments are rejected; use [`ContentPath`] for those.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let bare = trimmed
            .strip_prefix("/ipfs/")
            .or_else(|| trimmed.strip_prefix("ipfs://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        if bare.is_empty() || bare.contains('/') || bare.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidCid(raw.to_string()));
        }
        Ok(Self(bare.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Content paths
// ---------------------------------------------------------------------------

/// A path into the store, rooted either at immutable content or at a
/// mutable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentPath {
    Ipfs { cid: Cid, segments: Vec<String> },
    Ipns { name: String, segments: Vec<String> },
}

impl ContentPath {
    pub fn ipfs(cid: Cid) -> Self {
        Self::Ipfs {
            cid,
            segments: Vec::new(),
        }
    }

    pub fn ipns(name: impl Into<String>) -> Self {
        Self::Ipns {
            name: name.into(),
            segments: Vec::new(),
        }
    }

    /// Parse `/ipfs/..`, `/ipns/..`, `ipfs://..`, `ipns://..` or a bare CID
    /// optionally followed by `/segments`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let (namespace, rest) = if let Some(rest) = trimmed
            .strip_prefix("/ipfs/")
            .or_else(|| trimmed.strip_prefix("ipfs://"))
        {
            ("ipfs", rest)
        } else if let Some(rest) = trimmed
            .strip_prefix("/ipns/")
            .or_else(|| trimmed.strip_prefix("ipns://"))
        {
            ("ipns", rest)
        } else if trimmed.starts_with('/') || trimmed.contains("://") {
            return Err(CoreError::InvalidPath(raw.to_string()));
        } else {
            ("ipfs", trimmed)
        };

        let mut parts = rest.split('/').filter(|s| !s.is_empty());
        let Some(root) = parts.next() else {
            return Err(CoreError::InvalidPath(raw.to_string()));
        };
        let segments = parts.map(str::to_owned).collect();

        Ok(match namespace {
            "ipns" => Self::Ipns {
                name: root.to_string(),
                segments,
            },
            _ => Self::Ipfs {
                cid: Cid::parse(root).map_err(|_| CoreError::InvalidPath(raw.to_string()))?,
                segments,
            },
        })
    }

    /// Append one path segment.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        match &mut self {
            Self::Ipfs { segments, .. } | Self::Ipns { segments, .. } => {
                segments.push(segment.into())
            }
        }
        self
    }

    pub fn segments(&self) -> &[String] {
        match self {
            Self::Ipfs { segments, .. } | Self::Ipns { segments, .. } => segments,
        }
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Ipns { .. })
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipfs { cid, .. } => write!(f, "/ipfs/{cid}")?,
            Self::Ipns { name, .. } => write!(f, "/ipns/{name}")?,
        }
        for segment in self.segments() {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ContentPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// DAG nodes
// ---------------------------------------------------------------------------

/// A named edge from a directory node to a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hash")]
    pub hash: Cid,
    /// Cumulative size of the target; informational only.
    #[serde(rename = "Tsize", default)]
    pub tsize: u64,
}

impl Link {
    pub fn new(name: impl Into<String>, hash: Cid, tsize: u64) -> Self {
        Self {
            name: name.into(),
            hash,
            tsize,
        }
    }
}

/// A directory-equivalent DAG node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    #[serde(rename = "Data", default)]
    pub data: Vec<u8>,
    #[serde(rename = "Links", default)]
    pub links: Vec<Link>,
}

impl DagNode {
    /// A directory node over `links`, in the order given.
    pub fn directory(links: Vec<Link>) -> Self {
        Self {
            data: DIRECTORY_MARKER.to_vec(),
            links,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.data == DIRECTORY_MARKER
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.link(name).is_some()
    }
}

/// Result of committing content to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStat {
    pub cid: Cid,
    pub size: u64,
}

impl NodeStat {
    pub fn new(cid: Cid, size: u64) -> Self {
        Self { cid, size }
    }

    pub fn to_link(&self, name: impl Into<String>) -> Link {
        Link::new(name, self.cid.clone(), self.size)
    }
}

// ---------------------------------------------------------------------------
// Build manifest (`current.json`)
// ---------------------------------------------------------------------------

/// The `current.json` document carried by every deployable build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: String,
    #[serde(rename = "buildUri")]
    pub build_uri: String,
    /// Fields written by other tooling; preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BuildManifest {
    pub fn new(version: impl Into<String>, build_uri: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            build_uri: build_uri.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn build_path(&self) -> Result<ContentPath, CoreError> {
        ContentPath::parse(&self.build_uri)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
