//! Mutable name pointers.
//!
//! Publishing is always fatal on failure. Resolution degrades: a timeout or
//! an unknown name reads as "no pointer yet".

use cairn_core::Cid;
use cairn_store::{PublishOptions, Published, ResolveOptions, Store};

use crate::error::PublishError;

#[derive(Clone, Copy)]
pub struct NamePublisher<'a> {
    store: &'a dyn Store,
    options: PublishOptions,
}

impl<'a> NamePublisher<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            options: PublishOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    /// Point the name owned by `key` at `cid`.
    pub async fn publish(&self, key: &str, cid: &Cid) -> Result<Published, PublishError> {
        let published = self.store.name_publish(key, cid, &self.options).await?;
        tracing::info!(key, name = %published.name, cid = %cid, "published name");
        Ok(published)
    }

    /// Current target of `name`, or `None` when it cannot be resolved right now.
    pub async fn resolve(
        &self,
        name: &str,
        options: &ResolveOptions,
    ) -> Result<Option<Cid>, PublishError> {
        match self.store.name_resolve(name, options).await {
            Ok(cid) => {
                tracing::debug!(name, cid = %cid, "resolved name");
                Ok(Some(cid))
            }
            Err(e) if e.is_transient() => {
                tracing::info!(name, error = %e, "name not resolvable, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The mutable name owned by local key `key`.
    pub async fn key_name(&self, key: &str) -> Result<String, PublishError> {
        Ok(self.store.key_id(key).await?)
    }

    /// Resolve the name owned by `key` with default options.
    pub async fn resolve_key(&self, key: &str) -> Result<Option<Cid>, PublishError> {
        let name = self.key_name(key).await?;
        self.resolve(&name, &ResolveOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use cairn_store::memory::Op;
    use cairn_store::{ErrorKind, MemoryStore};

    use super::*;

    fn cid(s: &str) -> Cid {
        Cid::parse(s).unwrap()
    }

    #[tokio::test]
    async fn publish_then_resolve_by_key() {
        let store = MemoryStore::new();
        let names = NamePublisher::new(&store);
        names.publish("raw", &cid("bafyroot")).await.unwrap();
        assert_eq!(names.resolve_key("raw").await.unwrap(), Some(cid("bafyroot")));
    }

    #[tokio::test]
    async fn unknown_name_resolves_to_none() {
        let store = MemoryStore::new();
        let names = NamePublisher::new(&store);
        assert_eq!(names.resolve_key("never-published").await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolve_timeout_is_absent() {
        let store = MemoryStore::new().fail_on(Op::NameResolve, ErrorKind::Timeout);
        let names = NamePublisher::new(&store);
        assert_eq!(names.resolve_key("raw").await.unwrap(), None);
    }

    #[tokio::test]
    async fn resolve_network_failure_is_fatal() {
        let store = MemoryStore::new().fail_on(Op::NameResolve, ErrorKind::Network);
        let names = NamePublisher::new(&store);
        assert!(names.resolve_key("raw").await.is_err());
    }

    #[tokio::test]
    async fn publish_failure_is_fatal_even_when_transient() {
        let store = MemoryStore::new().fail_on(Op::NamePublish, ErrorKind::Timeout);
        let names = NamePublisher::new(&store);
        let err = names.publish("raw", &cid("bafyroot")).await.unwrap_err();
        assert!(matches!(err, PublishError::Store(ref e) if e.kind == ErrorKind::Timeout));
    }
}
