//! Publication phases shared by every CLI command.
//!
//! Each phase loads `build.json`, checks the fields it needs, does its work
//! and saves the descriptor again before returning. A run that stops between
//! phases therefore resumes from the last completed checkpoint.

use std::fmt;
use std::path::{Path, PathBuf};

use cairn_core::descriptor;
use cairn_core::{BuildDescriptor, Cid, Config, NodeStat};
use cairn_store::{PublishOptions, Store};

use crate::channel::PREVIOUS_LINK;
use crate::error::PublishError;
use crate::names::NamePublisher;
use crate::pins::{PinLifecycle, PinReport};
use crate::production::{CollapseMode, ProductSource, ProductionAggregator, ProductionResult};
use crate::raw::{RawReconcile, RawTreeReconciler};
use crate::stage::{self, Staged};
use crate::warm::{GatewayWarmer, WarmReport};

/// Whether a full run changed anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { raw: Cid, production: Cid },
    /// The version was already in the raw tree and production did not move.
    Unchanged { raw: Cid, production: Cid },
}

impl PublishOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Everything a full [`Pipeline::publish`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub raw: RawReconcile,
    pub production: ProductionResult,
    pub warm: Option<WarmReport>,
    pub outcome: PublishOutcome,
}

/// Which named pointer a rollback moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    Raw,
    Production,
}

impl fmt::Display for RollbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackTarget::Raw => write!(f, "raw"),
            RollbackTarget::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollback {
    pub target: RollbackTarget,
    pub key: String,
    pub from: Cid,
    pub to: Cid,
    pub pins: PinReport,
}

pub struct Pipeline<'a> {
    store: &'a dyn Store,
    config: &'a Config,
    descriptor: PathBuf,
    collapse: CollapseMode,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn Store, config: &'a Config) -> Self {
        Self {
            store,
            config,
            descriptor: config.descriptor.clone(),
            collapse: config.collapse,
        }
    }

    /// Use `path` instead of the configured descriptor location.
    pub fn with_descriptor(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor = path.into();
        self
    }

    pub fn with_collapse(mut self, collapse: CollapseMode) -> Self {
        self.collapse = collapse;
        self
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor
    }

    fn names(&self) -> NamePublisher<'a> {
        NamePublisher::new(self.store).with_options(PublishOptions {
            allow_offline: self.config.allow_offline,
            resolve: false,
        })
    }

    fn pins(&self) -> PinLifecycle<'a> {
        PinLifecycle::new(self.store, self.config.pin)
    }

    fn load(&self) -> Result<BuildDescriptor, PublishError> {
        Ok(descriptor::load(&self.descriptor)?)
    }

    fn save(&self, d: &BuildDescriptor) -> Result<(), PublishError> {
        descriptor::save(&self.descriptor, d)?;
        tracing::debug!(path = %self.descriptor.display(), "descriptor saved");
        Ok(())
    }

    /// Upload the staging directory and start a fresh descriptor.
    pub async fn stage(&self, dir: Option<&Path>, version: &str) -> Result<Staged, PublishError> {
        let dir = dir.unwrap_or(self.config.staging_dir.as_path());
        if !dir.is_dir() {
            return Err(PublishError::StagingDirMissing {
                path: dir.to_path_buf(),
            });
        }
        let raw_name = self.names().key_name(&self.config.raw_key).await?;
        let staged = stage::stage(self.store, dir, version, &raw_name).await?;
        self.save(&BuildDescriptor::staged(version, &staged.root))?;
        Ok(staged)
    }

    /// Link the staged content into the raw tree and publish it.
    pub async fn publish_raw(&self) -> Result<RawReconcile, PublishError> {
        let mut d = self.load()?;
        let version = d.require_version(&self.descriptor)?.to_string();
        let source = d.require_source(&self.descriptor)?;
        let size = match d.source_size {
            Some(size) => size,
            None => self.store.stat(&source).await?.size,
        };

        let reconciler =
            RawTreeReconciler::new(self.store, self.names(), self.pins(), &self.config.raw_key);
        let result = reconciler
            .reconcile(d.current_raw_build.as_ref(), &version, &NodeStat::new(source, size))
            .await?;

        let replaced = if result.already_published {
            None
        } else {
            result.previous.clone()
        };
        d.record_raw(replaced, result.root.clone());
        self.save(&d)?;
        Ok(result)
    }

    /// Re-aggregate and publish the production tree.
    pub async fn publish_production(&self, purge: bool) -> Result<ProductionResult, PublishError> {
        let mut d = self.load()?;
        d.require_version(&self.descriptor)?;

        // The raw root just checkpointed is fresher than a name lookup.
        let products: Vec<ProductSource> = self
            .config
            .products()
            .into_iter()
            .map(|p| ProductSource {
                root: if p.raw_key == self.config.raw_key {
                    d.current_raw_build.clone()
                } else {
                    None
                },
                name: p.name,
                raw_key: p.raw_key,
            })
            .collect();

        let aggregator = ProductionAggregator::new(
            self.store,
            self.names(),
            self.pins(),
            &self.config.production_key,
        )
        .with_collapse(self.collapse);
        let result = aggregator
            .publish(&products, d.current_build.as_ref(), purge)
            .await?;

        d.record_build(result.previous.clone(), result.root.clone());
        self.save(&d)?;
        Ok(result)
    }

    /// Raw, then production, then the optional gateway warm fetch.
    pub async fn publish(&self, purge: bool) -> Result<RunReport, PublishError> {
        let raw = self.publish_raw().await?;
        let production = self.publish_production(purge).await?;
        let warm = if self.config.warm {
            Some(self.warm(&production.root).await)
        } else {
            None
        };

        let outcome = if raw.already_published && !production.changed {
            PublishOutcome::Unchanged {
                raw: raw.root.clone(),
                production: production.root.clone(),
            }
        } else {
            PublishOutcome::Published {
                raw: raw.root.clone(),
                production: production.root.clone(),
            }
        };
        Ok(RunReport {
            raw,
            production,
            warm,
            outcome,
        })
    }

    pub async fn warm(&self, root: &Cid) -> WarmReport {
        let links = match self.store.get_node(root).await {
            Ok(node) => node.links,
            Err(e) => {
                tracing::warn!(root = %root, error = %e, "could not list production root for warming");
                Vec::new()
            }
        };
        GatewayWarmer::new(&self.config.gateway_url, self.config.timeouts.fetch())
            .warm(root, &links)
            .await
    }

    /// Point `target`'s key back at the root it replaced.
    ///
    /// The descriptor's `previous*` field is used first; for the raw tree the
    /// current root's `previous` link is the fallback.
    pub async fn rollback(&self, target: RollbackTarget) -> Result<Rollback, PublishError> {
        let mut d = self.load()?;
        let (key, current, previous) = match target {
            RollbackTarget::Raw => (
                self.config.raw_key.clone(),
                d.current_raw_build.clone(),
                d.previous_raw_build.clone(),
            ),
            RollbackTarget::Production => (
                self.config.production_key.clone(),
                d.current_build.clone(),
                d.previous_build.clone(),
            ),
        };
        let no_target = || PublishError::NoRollbackTarget { key: key.clone() };

        let names = self.names();
        let current = match current {
            Some(cid) => cid,
            None => names.resolve_key(&key).await?.ok_or_else(no_target)?,
        };
        let previous = match (previous, target) {
            (Some(cid), _) => Some(cid),
            (None, RollbackTarget::Raw) => self.previous_link(&current).await?,
            (None, RollbackTarget::Production) => None,
        }
        .filter(|prev| *prev != current)
        .ok_or_else(no_target)?;

        tracing::info!(%target, key = %key, from = %current, to = %previous, "rolling back");
        let pins = self.pins().reverse(&previous, &current).await;
        names.publish(&key, &previous).await?;

        match target {
            RollbackTarget::Raw => {
                d.current_raw_build = Some(current.clone());
                d.previous_raw_build = Some(previous.clone());
                d.rollback_raw();
            }
            RollbackTarget::Production => {
                d.current_build = Some(current.clone());
                d.previous_build = Some(previous.clone());
                d.rollback_build();
            }
        }
        self.save(&d)?;

        Ok(Rollback {
            target,
            key,
            from: current,
            to: previous,
            pins,
        })
    }

    async fn previous_link(&self, root: &Cid) -> Result<Option<Cid>, PublishError> {
        match self.store.get_node(root).await {
            Ok(node) => Ok(node.link(PREVIOUS_LINK).map(|l| l.hash.clone())),
            Err(e) if e.is_transient() => {
                tracing::warn!(root = %root, error = %e, "raw root unavailable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
