//! Raw history tree reconciliation.
//!
//! The raw tree holds one link per published version, a `latest-*` link per
//! channel, and a `previous` link to the root it replaced. `previous` is
//! recomputed on every run, so rollback reaches back exactly one
//! generation.

use std::collections::BTreeMap;

use cairn_core::{Cid, DagNode, Link, NodeStat};
use cairn_store::Store;

use crate::channel::{is_reserved, upsert_pointer, PREVIOUS_LINK};
use crate::error::PublishError;
use crate::names::NamePublisher;
use crate::pins::{PinLifecycle, PinReport};
use crate::tree::TreeBuilder;

/// Outcome of [`RawTreeReconciler::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReconcile {
    /// Root now published under the raw key.
    pub root: Cid,
    /// Root the reconcile started from, if any.
    pub previous: Option<Cid>,
    /// The version was already linked; nothing was built or published.
    pub already_published: bool,
    pub pins: Option<PinReport>,
}

pub struct RawTreeReconciler<'a> {
    store: &'a dyn Store,
    tree: TreeBuilder<'a>,
    names: NamePublisher<'a>,
    pins: PinLifecycle<'a>,
    raw_key: String,
}

impl<'a> RawTreeReconciler<'a> {
    pub fn new(
        store: &'a dyn Store,
        names: NamePublisher<'a>,
        pins: PinLifecycle<'a>,
        raw_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tree: TreeBuilder::new(store),
            names,
            pins,
            raw_key: raw_key.into(),
        }
    }

    /// Link `staged` under `version` in the raw tree and publish the result.
    ///
    /// `previous` is the root to build on; when `None` the current target of
    /// the raw key is used. A root that cannot be resolved or fetched right
    /// now is treated as an empty tree.
    pub async fn reconcile(
        &self,
        previous: Option<&Cid>,
        version: &str,
        staged: &NodeStat,
    ) -> Result<RawReconcile, PublishError> {
        check_version(version)?;

        let resolved = match previous {
            Some(cid) => Some(cid.clone()),
            None => self.names.resolve_key(&self.raw_key).await?,
        };
        let base = match &resolved {
            Some(root) => self.fetch_base(root).await?,
            None => None,
        };
        // A root we could not read is not a root we can link back to.
        let previous_root = base.as_ref().map(|(cid, _)| cid.clone());

        if let Some((root, node)) = &base {
            if node.contains(version) {
                tracing::info!(version, root = %root, "version already published");
                return Ok(RawReconcile {
                    root: root.clone(),
                    previous: previous_root,
                    already_published: true,
                    pins: None,
                });
            }
        }

        let mut links: BTreeMap<String, Link> = base
            .as_ref()
            .map(|(_, node)| {
                node.links
                    .iter()
                    .filter(|l| l.name != PREVIOUS_LINK)
                    .map(|l| (l.name.clone(), l.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let channel = upsert_pointer(&mut links, version, staged);
        links.insert(version.to_string(), staged.to_link(version));
        tracing::debug!(version, %channel, "linked staged content");

        let mut root = self.tree.build_node(links.values().cloned()).await?;
        if let Some((prev, node)) = &base {
            if root.cid != *prev {
                let size = self.root_size(prev, node).await;
                links.insert(PREVIOUS_LINK.to_string(), Link::new(PREVIOUS_LINK, prev.clone(), size));
                root = self.tree.build_node(links.into_values()).await?;
            }
        }
        tracing::info!(root = %root.cid, version, "built raw tree");

        let pins = self.pins.reconcile(previous_root.as_ref(), &root.cid).await;
        self.names.publish(&self.raw_key, &root.cid).await?;

        Ok(RawReconcile {
            root: root.cid,
            previous: previous_root,
            already_published: false,
            pins: Some(pins),
        })
    }

    async fn fetch_base(&self, root: &Cid) -> Result<Option<(Cid, DagNode)>, PublishError> {
        match self.store.get_node(root).await {
            Ok(node) if node.is_directory() => Ok(Some((root.clone(), node))),
            Ok(_) => {
                tracing::warn!(root = %root, "raw root is not a directory, starting empty");
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(root = %root, error = %e, "raw root unavailable, starting empty");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cumulative size of the replaced root, for its `previous` link.
    async fn root_size(&self, root: &Cid, node: &DagNode) -> u64 {
        match self.store.stat(root).await {
            Ok(stat) => stat.size,
            Err(e) => {
                tracing::debug!(root = %root, error = %e, "stat failed, summing link sizes");
                node.links.iter().map(|l| l.tsize).sum()
            }
        }
    }
}

/// Version names become link names in the raw tree.
pub(crate) fn check_version(version: &str) -> Result<(), PublishError> {
    if version.trim().is_empty() {
        return Err(PublishError::EmptyVersion);
    }
    if is_reserved(version) || version.contains('/') || version != version.trim() {
        return Err(PublishError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cairn_store::memory::{Op, Operation};
    use cairn_store::{ErrorKind, MemoryStore};

    use super::*;
    use crate::pins::PinOutcome;

    const RAW_KEY: &str = "raw";

    fn reconciler(store: &MemoryStore) -> RawTreeReconciler<'_> {
        RawTreeReconciler::new(
            store,
            NamePublisher::new(store),
            PinLifecycle::new(store, true),
            RAW_KEY,
        )
    }

    fn staged(store: &MemoryStore, body: &str) -> NodeStat {
        let blob = store.insert_blob(body.as_bytes());
        store.insert_node(&DagNode::directory(vec![Link::new(
            "index.html",
            blob,
            body.len() as u64,
        )]))
    }

    fn names_of(node: &DagNode) -> Vec<&str> {
        let mut names: Vec<_> = node.links.iter().map(|l| l.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    #[tokio::test]
    async fn first_version_on_empty_tree() {
        let store = MemoryStore::new();
        let x = staged(&store, "x");

        let result = reconciler(&store).reconcile(None, "1.0.0-build", &x).await.unwrap();

        assert!(!result.already_published);
        assert_eq!(result.previous, None);
        let node = store.node(&result.root).unwrap();
        assert_eq!(names_of(&node), vec!["1.0.0-build", "latest-build"]);
        assert_eq!(node.link("1.0.0-build").unwrap().hash, x.cid);
        assert_eq!(node.link("latest-build").unwrap().hash, x.cid);
        assert_eq!(store.name_target(RAW_KEY), Some(result.root.clone()));
        let pins = result.pins.unwrap();
        assert_eq!(pins.unpinned, None);
        assert_eq!(pins.pinned, PinOutcome::Done);
    }

    #[tokio::test]
    async fn republishing_a_version_is_a_noop() {
        let store = MemoryStore::new();
        let x = staged(&store, "x");
        let first = reconciler(&store).reconcile(None, "2.0.0-release", &x).await.unwrap();

        store.clear_operations();
        let second = reconciler(&store).reconcile(None, "2.0.0-release", &x).await.unwrap();

        assert!(second.already_published);
        assert_eq!(second.root, first.root);
        let published = store
            .operations()
            .iter()
            .any(|op| matches!(op, Operation::NamePublish { .. }));
        assert!(!published);
    }

    #[tokio::test]
    async fn second_version_links_previous_root() {
        let store = MemoryStore::new();
        let a = staged(&store, "a");
        let b = staged(&store, "b");
        let first = reconciler(&store).reconcile(None, "1.0.0-build", &a).await.unwrap();

        let second = reconciler(&store).reconcile(None, "1.1.0-build", &b).await.unwrap();

        let node = store.node(&second.root).unwrap();
        assert_eq!(
            names_of(&node),
            vec!["1.0.0-build", "1.1.0-build", "latest-build", "previous"]
        );
        assert_eq!(node.link("1.0.0-build").unwrap().hash, a.cid);
        assert_eq!(node.link("latest-build").unwrap().hash, b.cid);
        assert_eq!(node.link("previous").unwrap().hash, first.root);
        assert_eq!(second.previous, Some(first.root));
    }

    #[tokio::test]
    async fn previous_is_one_generation_deep() {
        let store = MemoryStore::new();
        let r = reconciler(&store);
        let mut roots = Vec::new();
        for (i, version) in ["1.0.0-build", "1.1.0-build", "1.2.0-build"].iter().enumerate() {
            let content = staged(&store, &i.to_string());
            roots.push(r.reconcile(None, version, &content).await.unwrap().root);
        }

        let last = store.node(&roots[2]).unwrap();
        assert_eq!(last.link("previous").unwrap().hash, roots[1]);
        let middle = store.node(&roots[1]).unwrap();
        assert_eq!(middle.link("previous").unwrap().hash, roots[0]);
        // the older `previous` link was dropped, not nested
        assert_eq!(last.links.iter().filter(|l| l.name == "previous").count(), 1);
    }

    #[tokio::test]
    async fn channels_keep_independent_pointers() {
        let store = MemoryStore::new();
        let r = reconciler(&store);
        let rel = staged(&store, "rel");
        let pre = staged(&store, "pre");
        r.reconcile(None, "1.0.0-release", &rel).await.unwrap();
        let result = r.reconcile(None, "1.1.0-pre-release", &pre).await.unwrap();

        let node = store.node(&result.root).unwrap();
        assert_eq!(node.link("latest-release").unwrap().hash, rel.cid);
        assert_eq!(node.link("latest-pre-release").unwrap().hash, pre.cid);
        assert!(node.link("latest-build").is_none());
    }

    #[tokio::test]
    async fn explicit_previous_overrides_name() {
        let store = MemoryStore::new();
        let a = staged(&store, "a");
        let base = store.insert_node(&DagNode::directory(vec![
            Link::new("1.0.0-build", a.cid.clone(), a.size),
            Link::new("latest-build", a.cid.clone(), a.size),
        ]));
        let b = staged(&store, "b");

        let result = reconciler(&store)
            .reconcile(Some(&base.cid), "1.1.0-build", &b)
            .await
            .unwrap();

        assert_eq!(result.previous, Some(base.cid.clone()));
        let node = store.node(&result.root).unwrap();
        assert_eq!(node.link("previous").unwrap().hash, base.cid);
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, Operation::NameResolve { .. })));
    }

    #[tokio::test]
    async fn resolve_timeout_starts_from_empty_tree() {
        let store = MemoryStore::new();
        let a = staged(&store, "a");
        reconciler(&store).reconcile(None, "1.0.0-build", &a).await.unwrap();
        store.set_failure(Op::NameResolve, ErrorKind::Timeout);

        let b = staged(&store, "b");
        let result = reconciler(&store).reconcile(None, "1.1.0-build", &b).await.unwrap();

        let node = store.node(&result.root).unwrap();
        assert_eq!(names_of(&node), vec!["1.1.0-build", "latest-build"]);
        assert_eq!(result.previous, None);
    }

    #[tokio::test]
    async fn fetch_failure_starts_from_empty_tree() {
        let store = MemoryStore::new();
        store.set_name(RAW_KEY, &Cid::parse("bafymissing").unwrap());
        let a = staged(&store, "a");

        let result = reconciler(&store).reconcile(None, "1.0.0-build", &a).await.unwrap();

        let node = store.node(&result.root).unwrap();
        assert!(node.link("previous").is_none());
        assert_eq!(result.previous, None);
        assert_eq!(store.name_target(RAW_KEY), Some(result.root));
    }

    #[tokio::test]
    async fn publish_failure_is_fatal() {
        let store = MemoryStore::new().fail_on(Op::NamePublish, ErrorKind::Api);
        let a = staged(&store, "a");
        let err = reconciler(&store)
            .reconcile(None, "1.0.0-build", &a)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Store(_)));
    }

    #[tokio::test]
    async fn pin_failure_does_not_abort() {
        let store = MemoryStore::new().fail_on(Op::PinAdd, ErrorKind::Network);
        let a = staged(&store, "a");
        let result = reconciler(&store).reconcile(None, "1.0.0-build", &a).await.unwrap();
        assert_eq!(
            result.pins.unwrap().pinned,
            PinOutcome::Failed(ErrorKind::Network)
        );
        assert_eq!(store.name_target(RAW_KEY), Some(result.root));
    }

    #[tokio::test]
    async fn empty_version_is_rejected() {
        let store = MemoryStore::new();
        let a = staged(&store, "a");
        let err = reconciler(&store).reconcile(None, "  ", &a).await.unwrap_err();
        assert!(matches!(err, PublishError::EmptyVersion));
    }

    #[test]
    fn pointer_names_are_not_versions() {
        for name in ["previous", "latest-release", "a/b", " 1.0.0"] {
            assert!(
                matches!(check_version(name), Err(PublishError::InvalidVersion(_))),
                "{name} accepted"
            );
        }
        assert!(check_version("1.0.0-build").is_ok());
    }
}
