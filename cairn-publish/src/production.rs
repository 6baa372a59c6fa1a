//! Production tree aggregation.
//!
//! The production tree mirrors the raw trees of every configured product,
//! keeping only builds whose `current.json` manifest still points at
//! resolvable content. A directory holding a manifest is a build; any other
//! directory is walked recursively.
//!
//! `previous` and the `latest-*` pointers are only meaningful at the root of
//! a raw tree. There they are dropped and the pointers recomputed from the
//! live builds; anywhere deeper they are ordinary content.
//!
//! # Liveness
//!
//! A build is live when its manifest parses and its `buildUri` resolves.
//! Dead builds are retained by default (the link from the previous
//! production tree wins over the current one). With `purge` they are
//! dropped, and a directory whose own builds were all dropped disappears
//! from its parent. [`CollapseMode::Transitive`] extends that to parents
//! left empty by a vanished child.
//!
//! A node-store failure (`Network`) aborts the run. Every other failure
//! while reading a build counts as dead; a failure while reading a plain
//! directory keeps its link untouched.
//!
//! # Pointers
//!
//! An existing `latest-*` pointer is kept while it targets a live build of
//! its channel. Otherwise the live build with the highest version name wins,
//! comparing digit runs numerically (`1.10.0-build` > `1.9.0-build`).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use cairn_core::{BuildManifest, Cid, ContentPath, DagNode, Link, NodeStat, MANIFEST_FILE};
use cairn_store::{ErrorKind, Store, StoreError};

use crate::channel::{is_reserved, upsert_pointer, Channel};
use crate::error::PublishError;
use crate::names::NamePublisher;
use crate::pins::{PinLifecycle, PinReport};
use crate::tree::{canonical_links, TreeBuilder};

pub use cairn_core::CollapseMode;

/// Build paths visited by one aggregation, relative to the production root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sweep {
    pub live: Vec<String>,
    /// Dead builds kept because purging was off.
    pub retained: Vec<String>,
    pub purged: Vec<String>,
}

/// One product feeding the production root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSource {
    /// Link name under the production root.
    pub name: String,
    pub raw_key: String,
    /// Known raw root; resolved from `raw_key` when `None`.
    pub root: Option<Cid>,
}

/// Outcome of [`ProductionAggregator::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionResult {
    pub root: Cid,
    pub previous: Option<Cid>,
    /// `false` when the aggregated root equals the previous one.
    pub changed: bool,
    pub sweep: Sweep,
    pub pins: Option<PinReport>,
}

#[derive(Debug)]
enum Liveness {
    Live { version: String },
    Dead { reason: String },
}

type Walk<'s> = Pin<Box<dyn Future<Output = Result<Option<NodeStat>, PublishError>> + 's>>;

pub struct ProductionAggregator<'a> {
    store: &'a dyn Store,
    tree: TreeBuilder<'a>,
    names: NamePublisher<'a>,
    pins: PinLifecycle<'a>,
    production_key: String,
    collapse: CollapseMode,
}

impl<'a> ProductionAggregator<'a> {
    pub fn new(
        store: &'a dyn Store,
        names: NamePublisher<'a>,
        pins: PinLifecycle<'a>,
        production_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tree: TreeBuilder::new(store),
            names,
            pins,
            production_key: production_key.into(),
            collapse: CollapseMode::default(),
        }
    }

    pub fn with_collapse(mut self, collapse: CollapseMode) -> Self {
        self.collapse = collapse;
        self
    }

    /// Aggregate the raw tree `current` against its previous production
    /// counterpart.
    ///
    /// Returns `None` when purging removed everything. The result is
    /// committed to the store but neither pinned nor published.
    pub async fn aggregate(
        &self,
        previous: Option<&DagNode>,
        current: &DagNode,
        purge: bool,
    ) -> Result<(Option<NodeStat>, Sweep), PublishError> {
        let mut sweep = Sweep::default();
        let root = self
            .walk(String::new(), previous, current, None, purge, true, &mut sweep)
            .await?;
        Ok((root, sweep))
    }

    /// One product's raw tree, as linked from the production root.
    async fn aggregate_product(
        &self,
        name: &str,
        prior: Option<&Link>,
        raw: &Link,
        purge: bool,
        sweep: &mut Sweep,
    ) -> Result<Option<NodeStat>, PublishError> {
        let raw_stat = NodeStat::new(raw.hash.clone(), raw.tsize);
        let Some(current) = self.fetch_dir(&raw.hash).await? else {
            tracing::warn!(product = %name, root = %raw.hash, "raw root unreadable, keeping link");
            return Ok(Some(raw_stat));
        };
        let previous = match prior {
            Some(p) => self.fetch_dir(&p.hash).await?,
            None => None,
        };
        self.walk(
            name.to_string(),
            previous.as_ref(),
            &current,
            Some(raw_stat),
            purge,
            true,
            sweep,
        )
        .await
    }

    /// Aggregate every product into a new production root and publish it.
    ///
    /// `previous` is the production root to compare against; when `None` the
    /// current target of the production key is used.
    pub async fn publish(
        &self,
        products: &[ProductSource],
        previous: Option<&Cid>,
        purge: bool,
    ) -> Result<ProductionResult, PublishError> {
        let previous_root = match previous {
            Some(cid) => Some(cid.clone()),
            None => self.names.resolve_key(&self.production_key).await?,
        };
        let previous_node = match &previous_root {
            Some(root) => self.fetch_dir(root).await?,
            None => None,
        };

        let mut sweep = Sweep::default();
        let mut links = Vec::with_capacity(products.len());
        for product in products {
            let prior = previous_node.as_ref().and_then(|n| n.link(&product.name));
            let Some(raw) = self.product_link(product).await? else {
                match prior {
                    Some(old) => {
                        tracing::warn!(product = %product.name, "raw tree unavailable, keeping previous production link");
                        links.push(old.clone());
                    }
                    None => {
                        tracing::warn!(product = %product.name, "raw tree unavailable, product skipped");
                    }
                }
                continue;
            };
            match self
                .aggregate_product(&product.name, prior, &raw, purge, &mut sweep)
                .await?
            {
                Some(stat) => links.push(stat.to_link(product.name.as_str())),
                None => tracing::info!(product = %product.name, "every build purged, product dropped"),
            }
        }
        let root = self.tree.build_node(links).await?;
        tracing::info!(
            root = %root.cid,
            live = sweep.live.len(),
            retained = sweep.retained.len(),
            purged = sweep.purged.len(),
            "aggregated production tree"
        );

        if previous_root.as_ref() == Some(&root.cid) {
            tracing::info!(root = %root.cid, "production tree unchanged");
            return Ok(ProductionResult {
                root: root.cid,
                previous: previous_root,
                changed: false,
                sweep,
                pins: None,
            });
        }

        let pins = self.pins.reconcile(previous_root.as_ref(), &root.cid).await;
        self.names.publish(&self.production_key, &root.cid).await?;

        Ok(ProductionResult {
            root: root.cid,
            previous: previous_root,
            changed: true,
            sweep,
            pins: Some(pins),
        })
    }

    async fn product_link(&self, product: &ProductSource) -> Result<Option<Link>, PublishError> {
        let root = match &product.root {
            Some(cid) => cid.clone(),
            None => match self.names.resolve_key(&product.raw_key).await? {
                Some(cid) => cid,
                None => return Ok(None),
            },
        };
        match self.store.stat(&root).await {
            Ok(stat) => Ok(Some(stat.to_link(product.name.as_str()))),
            Err(e) if e.is_transient() => {
                tracing::warn!(product = %product.name, root = %root, error = %e, "raw root unavailable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One directory level. `original` is the directory's own stat, reused
    /// as-is when nothing below it changed. `raw_root` marks the level that
    /// holds versions and pointers.
    #[allow(clippy::too_many_arguments)]
    fn walk<'s>(
        &'s self,
        path: String,
        previous: Option<&'s DagNode>,
        current: &'s DagNode,
        original: Option<NodeStat>,
        purge: bool,
        raw_root: bool,
        sweep: &'s mut Sweep,
    ) -> Walk<'s> {
        Box::pin(async move {
            let mut kept: BTreeMap<String, Link> = BTreeMap::new();
            // (link name, manifest version) of live builds at this level
            let mut live: Vec<(String, String)> = Vec::new();
            let mut purged_here = false;
            let mut collapsed_child = false;

            for link in &current.links {
                if raw_root && is_reserved(&link.name) {
                    continue;
                }
                let child_path = join(&path, &link.name);
                let prior = previous.and_then(|p| p.link(&link.name));

                let child = match self.store.get_node(&link.hash).await {
                    Ok(node) => node,
                    Err(e) if e.kind == ErrorKind::Network => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(path = %child_path, error = %e, "unreadable entry, keeping link");
                        kept.insert(link.name.clone(), link.clone());
                        continue;
                    }
                };
                if !child.is_directory() {
                    kept.insert(link.name.clone(), link.clone());
                    continue;
                }

                if child.contains(MANIFEST_FILE) {
                    match self.liveness(&link.hash).await? {
                        Liveness::Live { version } => {
                            tracing::debug!(path = %child_path, version = %version, "live build");
                            sweep.live.push(child_path);
                            live.push((link.name.clone(), version));
                            kept.insert(link.name.clone(), link.clone());
                        }
                        Liveness::Dead { reason } if purge => {
                            tracing::info!(path = %child_path, reason = %reason, "purging dead build");
                            sweep.purged.push(child_path);
                            purged_here = true;
                        }
                        Liveness::Dead { reason } => {
                            tracing::warn!(path = %child_path, reason = %reason, "dead build retained");
                            sweep.retained.push(child_path);
                            kept.insert(link.name.clone(), prior.unwrap_or(link).clone());
                        }
                    }
                    continue;
                }

                let prior_node = match prior {
                    Some(p) => self.fetch_dir(&p.hash).await?,
                    None => None,
                };
                let child_stat = NodeStat::new(link.hash.clone(), link.tsize);
                let walked = self
                    .walk(
                        child_path,
                        prior_node.as_ref(),
                        &child,
                        Some(child_stat),
                        purge,
                        false,
                        &mut *sweep,
                    )
                    .await?;
                match walked {
                    Some(stat) => {
                        kept.insert(link.name.clone(), stat.to_link(link.name.as_str()));
                    }
                    None => collapsed_child = true,
                }
            }

            if kept.is_empty()
                && (purged_here
                    || (collapsed_child && self.collapse == CollapseMode::Transitive))
            {
                tracing::info!(path = %path, "directory emptied by purge, dropping");
                return Ok(None);
            }

            if raw_root {
                let pointers = channel_pointers(current, &kept, &mut live);
                kept.extend(pointers);
            }

            let links = canonical_links(kept.into_values());
            if let Some(original) = original {
                if links == canonical_links(current.links.iter().cloned()) {
                    return Ok(Some(original));
                }
            }
            Ok(Some(self.tree.build_node(links).await?))
        })
    }

    async fn liveness(&self, build: &Cid) -> Result<Liveness, PublishError> {
        let manifest_path = ContentPath::ipfs(build.clone()).join(MANIFEST_FILE);
        let bytes = match self.store.cat(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) => return dead_unless_network(e, "manifest unreadable"),
        };
        let manifest: BuildManifest = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                return Ok(Liveness::Dead {
                    reason: format!("malformed manifest: {e}"),
                })
            }
        };
        let target = match manifest.build_path() {
            Ok(path) => path,
            Err(e) => {
                return Ok(Liveness::Dead {
                    reason: e.to_string(),
                })
            }
        };
        match self.store.resolve_path(&target).await {
            Ok(cid) => {
                tracing::debug!(build_uri = %target, cid = %cid, "build uri resolved");
                Ok(Liveness::Live {
                    version: manifest.version,
                })
            }
            Err(e) => dead_unless_network(e, "build uri unresolvable"),
        }
    }

    /// Directory node at `cid`, or `None` when it cannot be read right now.
    async fn fetch_dir(&self, cid: &Cid) -> Result<Option<DagNode>, PublishError> {
        match self.store.get_node(cid).await {
            Ok(node) if node.is_directory() => Ok(Some(node)),
            Ok(_) => Ok(None),
            Err(e) if e.kind == ErrorKind::Network => Err(e.into()),
            Err(e) => {
                tracing::debug!(cid = %cid, error = %e, "previous node unavailable");
                Ok(None)
            }
        }
    }
}

fn dead_unless_network(e: StoreError, context: &str) -> Result<Liveness, PublishError> {
    if e.kind == ErrorKind::Network {
        return Err(e.into());
    }
    Ok(Liveness::Dead {
        reason: format!("{context}: {e}"),
    })
}

/// `latest-*` links for one aggregated level.
///
/// A pointer already present in `current` survives when it targets a live
/// build of its own channel. Otherwise the live build with the highest
/// version name wins.
fn channel_pointers(
    current: &DagNode,
    kept: &BTreeMap<String, Link>,
    live: &mut [(String, String)],
) -> BTreeMap<String, Link> {
    live.sort_by(|a, b| version_cmp(&a.0, &b.0));
    let mut pointers = BTreeMap::new();
    for (name, version) in live.iter() {
        if let Some(link) = kept.get(name) {
            upsert_pointer(&mut pointers, version, &NodeStat::new(link.hash.clone(), link.tsize));
        }
    }
    for channel in Channel::ALL {
        let pointer = channel.pointer_name();
        let Some(existing) = current.link(pointer) else {
            continue;
        };
        let honoured = live.iter().find_map(|(name, version)| {
            let link = kept.get(name)?;
            (link.hash == existing.hash && Channel::classify(version) == channel).then_some(link)
        });
        if let Some(link) = honoured {
            pointers.insert(pointer.to_string(), Link::new(pointer, link.hash.clone(), link.tsize));
        }
    }
    pointers
}

/// Compare version names run by run, digit runs by numeric value.
fn version_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        let (run_a, rest_a) = leading_run(a);
        let (run_b, rest_b) = leading_run(b);
        if run_a.is_empty() || run_b.is_empty() {
            return run_a.len().cmp(&run_b.len());
        }
        let ord = match (is_digits(run_a), is_digits(run_b)) {
            (true, true) => {
                let (x, y) = (run_a.trim_start_matches('0'), run_b.trim_start_matches('0'));
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            _ => run_a.cmp(run_b),
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = rest_a;
        b = rest_b;
    }
}

fn is_digits(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit())
}

/// Longest prefix that is all digits or all non-digits.
fn leading_run(s: &str) -> (&str, &str) {
    let digits = is_digits(s);
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
