//! Typed configuration store.
//!
//! Materializes [`ConfigBundle`] records out of MongoDB documents. The
//! cache holds the raw persisted document per `(collection, id)`; merging
//! of declared defaults and the typed decode happen at the edge, so a
//! change-stream refresh can drop a raw post-image straight into the
//! cache. Writes go through the gateway and then write through the local
//! cache, so the writing process sees its own update before the change
//! stream echoes it back.

use std::sync::Arc;

use bson::{Bson, Document};
use serde::de::DeserializeOwned;

use mc_domain::bundle::{ConfigBundle, Target};
use mc_domain::error::{Error, Result};
use mc_domain::settings::Settings;
use mc_domain::codec;
use mc_storage::DocumentStore;

use crate::cache::{Cache, CacheConfig, DocKey};
use crate::context::Coherency;

#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<ConfigsInner>,
}

struct ConfigsInner {
    store: Arc<dyn DocumentStore>,
    cache: Arc<Cache<DocKey, Document>>,
    settings: Arc<Settings>,
    coherency: Arc<Coherency>,
}

impl ConfigStore {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        settings: Arc<Settings>,
        coherency: Arc<Coherency>,
    ) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig::from_settings(&settings)));
        Self {
            inner: Arc::new(ConfigsInner {
                store,
                cache,
                settings,
                coherency,
            }),
        }
    }

    /// Return the persisted record, or persist (and return) the factory's
    /// value when none exists yet. A lost upsert race is tolerated: the
    /// winner's document is what later reads observe.
    pub async fn get_or_generate<T, F>(&self, factory: F) -> Result<T>
    where
        T: ConfigBundle,
        F: FnOnce() -> T,
    {
        let (target, key) = self.address::<T>()?;
        let store = self.inner.store.clone();
        let loader_target = target.clone();
        let loader_id = key.id.clone();
        let raw = self
            .inner
            .cache
            .get_with(key, move || async move {
                if let Some(found) = store.find_by_id(&loader_target, &loader_id).await? {
                    return Ok(found);
                }
                let mut document = codec::to_document(&factory())?;
                document.insert("_id", loader_id.as_str());
                store
                    .upsert_by_id(&loader_target, &loader_id, document.clone())
                    .await?;
                tracing::info!(collection = %loader_target, id = %loader_id, "generated config document");
                Ok(document)
            })
            .await?;
        decode_merged(raw)
    }

    /// Strict read: `NotFound` when no document exists.
    pub async fn get<T: ConfigBundle>(&self) -> Result<T> {
        let (target, key) = self.address::<T>()?;
        let raw = self.raw_document(&target, key).await?;
        decode_merged(raw)
    }

    /// Serialize and upsert the record, carrying over persisted fields
    /// the type does not declare, then update the local cache.
    pub async fn set<T: ConfigBundle>(&self, value: &T) -> Result<()> {
        let (target, key) = self.address::<T>()?;
        let mut document = codec::to_document(value)?;

        let previous = match self.inner.cache.peek(&key) {
            Some(cached) => Some(cached),
            None => self.inner.store.find_by_id(&target, &key.id).await?,
        };
        if let Some(previous) = previous {
            codec::merge_missing(&mut document, &previous);
        }
        document.insert("_id", key.id.as_str());

        self.inner
            .store
            .upsert_by_id(&target, &key.id, document.clone())
            .await?;
        self.inner.cache.insert(key, document);
        Ok(())
    }

    /// Remove the record's document and evict it locally.
    pub async fn delete<T: ConfigBundle>(&self) -> Result<bool> {
        let (target, key) = self.address::<T>()?;
        let removed = self.inner.store.delete_by_id(&target, &key.id).await?;
        self.inner.cache.invalidate(&key);
        Ok(removed)
    }

    /// Read one field by dotted path without decoding the whole record.
    /// `Ok(None)` when the path is absent.
    pub async fn get_field<V: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        path: &str,
    ) -> Result<Option<V>> {
        let (target, key) = self.address_raw(collection, id);
        let document = self.raw_document(&target, key).await?;
        match codec::path_get(&document, path)? {
            Some(value) => Ok(Some(codec::from_bson(path, value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write one field by dotted path, creating the document if needed.
    pub async fn set_field(
        &self,
        collection: &str,
        id: &str,
        path: &str,
        value: impl Into<Bson>,
    ) -> Result<()> {
        let (target, key) = self.address_raw(collection, id);
        self.watch(&target);

        let mut document = self
            .inner
            .store
            .find_by_id(&target, id)
            .await?
            .unwrap_or_default();
        codec::path_set(&mut document, path, value.into())?;
        document.insert("_id", id);

        self.inner
            .store
            .upsert_by_id(&target, id, document.clone())
            .await?;
        self.inner.cache.insert(key, document);
        Ok(())
    }

    /// Drop every cached entry of one collection; the next reads go back
    /// to storage.
    pub fn reload_collection(&self, collection: &str) {
        let collection = collection.to_owned();
        self.inner
            .cache
            .invalidate_matching(|key| key.target.collection == collection);
    }

    /// Drop the whole cache.
    pub fn reload_all(&self) {
        self.inner.cache.invalidate_all();
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.inner.cache.stats()
    }

    // ── internals ────────────────────────────────────────────────────

    fn address<T: ConfigBundle>(&self) -> Result<(Target, DocKey)> {
        let meta = T::meta();
        meta.validate()?;
        let target = meta.resolve(&self.inner.settings, &self.inner.settings.configs_collection);
        self.watch(&target);
        Ok((target.clone(), DocKey::new(target, meta.document_id)))
    }

    fn address_raw(&self, collection: &str, id: &str) -> (Target, DocKey) {
        let target = Target::new(self.inner.settings.default_database.clone(), collection);
        self.watch(&target);
        (target.clone(), DocKey::new(target, id))
    }

    fn watch(&self, target: &Target) {
        self.inner
            .coherency
            .ensure_document_cache(target, &self.inner.cache);
    }

    async fn raw_document(&self, target: &Target, key: DocKey) -> Result<Document> {
        let store = self.inner.store.clone();
        let loader_target = target.clone();
        let loader_id = key.id.clone();
        self.inner
            .cache
            .get_with(key, move || async move {
                store
                    .find_by_id(&loader_target, &loader_id)
                    .await?
                    .ok_or_else(|| Error::NotFound {
                        collection: loader_target.collection.clone(),
                        id: loader_id.clone(),
                    })
            })
            .await
    }
}

/// Fill holes with the bundle's declared defaults, then decode.
fn decode_merged<T: ConfigBundle>(mut raw: Document) -> Result<T> {
    let defaults = codec::to_document(&T::defaults())?;
    codec::merge_missing(&mut raw, &defaults);
    codec::from_document(raw)
}
