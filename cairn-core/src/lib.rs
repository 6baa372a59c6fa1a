//! cairn core library: domain types, build descriptor persistence, config,
//! errors.
//!
//! - [`types`]: CIDs, content paths, DAG nodes, build manifests
//! - [`descriptor`]: `build.json` load / save
//! - [`config`]: `cairn.yaml` load / validate
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod types;

pub use config::{CollapseMode, Config, ProductConfig, Timeouts};
pub use descriptor::BuildDescriptor;
pub use error::CoreError;
pub use types::{
    is_reserved_link, BuildManifest, Cid, ContentPath, DagNode, Link, NodeStat, DIRECTORY_MARKER,
    MANIFEST_FILE, POINTER_LINKS, PREVIOUS_LINK,
};
