//! # cairn-store
//!
//! Abstraction over the content-addressed backend.
//!
//! - `traits`: the async [`Store`] trait and its option/result types
//! - [`kubo`]: Kubo RPC implementation over HTTP
//! - [`memory`]: deterministic in-memory implementation for tests
//! - `error`: [`StoreError`] and the closed [`ErrorKind`] set

mod error;
pub mod kubo;
pub mod memory;
mod traits;

pub use error::{ErrorKind, StoreError};
pub use kubo::KuboStore;
pub use memory::MemoryStore;
pub use traits::*;
