//! # cairn-publish
//!
//! Build publication engine: deterministic directory nodes, the raw history
//! tree, the aggregated production tree and the pins and names behind them.
//!
//! Call [`Pipeline::publish`] for a full run (raw, then production, then an
//! optional gateway warm fetch), or the individual phases it is made of.
//!
//! Only one process may publish a given key at a time; nothing here guards
//! against concurrent writers.

pub mod channel;
pub mod error;
pub mod names;
pub mod pins;
pub mod pipeline;
pub mod production;
pub mod raw;
pub mod stage;
pub mod tree;
pub mod warm;

pub use channel::Channel;
pub use error::PublishError;
pub use names::NamePublisher;
pub use pins::{PinLifecycle, PinOutcome, PinReport};
pub use pipeline::{Pipeline, PublishOutcome, Rollback, RollbackTarget, RunReport};
pub use production::{CollapseMode, ProductSource, ProductionAggregator, ProductionResult, Sweep};
pub use raw::{RawReconcile, RawTreeReconciler};
pub use stage::Staged;
pub use tree::TreeBuilder;
pub use warm::{GatewayWarmer, WarmReport};
