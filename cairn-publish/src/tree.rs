//! Deterministic directory-node construction.
//!
//! The same set of links always commits to the same CID: links are keyed by
//! name (the last occurrence wins) and submitted in reverse-lexicographic
//! name order.

use std::collections::BTreeMap;

use cairn_core::{DagNode, Link, NodeStat};
use cairn_store::{Store, StoreError};

/// Commits directory nodes to a store.
#[derive(Clone, Copy)]
pub struct TreeBuilder<'a> {
    store: &'a dyn Store,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Commit a directory node over `links`. Does not pin.
    pub async fn build_node(
        &self,
        links: impl IntoIterator<Item = Link>,
    ) -> Result<NodeStat, StoreError> {
        let node = DagNode::directory(canonical_links(links));
        let stat = self.store.put_node(&node).await?;
        tracing::debug!(cid = %stat.cid, links = node.links.len(), "built node");
        Ok(stat)
    }
}

/// Dedupe by name (last wins) and sort reverse-lexicographically.
pub fn canonical_links(links: impl IntoIterator<Item = Link>) -> Vec<Link> {
    let by_name: BTreeMap<String, Link> = links
        .into_iter()
        .map(|link| (link.name.clone(), link))
        .collect();
    by_name.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use cairn_core::Cid;
    use cairn_store::MemoryStore;

    use super::*;

    fn link(name: &str, cid: &str) -> Link {
        Link::new(name, Cid::parse(cid).unwrap(), 10)
    }

    #[test]
    fn canonical_order_is_reverse_lexicographic() {
        let links = canonical_links(vec![
            link("1.0.0-build", "bafya"),
            link("latest-build", "bafya"),
            link("2.0.0-release", "bafyb"),
        ]);
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["latest-build", "2.0.0-release", "1.0.0-build"]);
    }

    #[test]
    fn duplicate_names_keep_last_link() {
        let links = canonical_links(vec![link("a", "bafyold"), link("a", "bafynew")]);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].hash.as_str(), "bafynew");
    }

    #[tokio::test]
    async fn insertion_order_does_not_change_cid() {
        let store = MemoryStore::new();
        let tree = TreeBuilder::new(&store);
        let a = link("a", "bafya");
        let b = link("b", "bafyb");
        let c = link("c", "bafyc");

        let first = tree
            .build_node(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();
        let second = tree.build_node(vec![c, a, b]).await.unwrap();
        assert_eq!(first.cid, second.cid);
    }

    #[tokio::test]
    async fn built_nodes_are_directories_and_unpinned() {
        let store = MemoryStore::new();
        let stat = TreeBuilder::new(&store)
            .build_node(vec![link("a", "bafya")])
            .await
            .unwrap();
        let node = store.node(&stat.cid).expect("stored");
        assert!(node.is_directory());
        assert!(!store.is_pinned(&stat.cid));
    }
}
