//! Localized message store.
//!
//! One document per `(catalog, language)` holds a flat map of dotted keys
//! to strings or string lists. Registration propagates newly declared
//! keys into every supported language without touching existing
//! translations; retrieval falls back from the requested language to the
//! process default and, as a last resort, to the key itself, so a caller
//! always gets something printable.

use std::collections::HashMap;
use std::sync::Arc;

use bson::Document;
use parking_lot::RwLock;

use mc_domain::bundle::Target;
use mc_domain::catalog::{CatalogDef, MessageValue};
use mc_domain::codec;
use mc_domain::error::Result;
use mc_domain::settings::Settings;
use mc_storage::DocumentStore;

use crate::cache::{Cache, CacheConfig, DocKey};
use crate::context::Coherency;
use crate::format::{self, Placeholders};
use crate::languages::SupportedLanguages;

/// Optional transform applied once to every retrieved string, before
/// placeholder substitution. Hosts hang their markup/color engines here.
pub type PostProcessor = Arc<dyn Fn(String) -> String + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<MessagesInner>,
}

struct MessagesInner {
    store: Arc<dyn DocumentStore>,
    cache: Arc<Cache<DocKey, Document>>,
    settings: Arc<Settings>,
    coherency: Arc<Coherency>,
    supported: Arc<SupportedLanguages>,
    post: RwLock<Option<PostProcessor>>,
    catalogs: RwLock<HashMap<String, Arc<CatalogEntry>>>,
}

struct CatalogEntry {
    def: CatalogDef,
    target: Target,
}

impl MessageStore {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        settings: Arc<Settings>,
        coherency: Arc<Coherency>,
        supported: Arc<SupportedLanguages>,
    ) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig::from_settings(&settings)));
        Self {
            inner: Arc::new(MessagesInner {
                store,
                cache,
                settings,
                coherency,
                supported,
                post: RwLock::new(None),
                catalogs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn set_post_processor(&self, post: Option<PostProcessor>) {
        *self.inner.post.write() = post;
    }

    /// Register a catalog: make sure every declared key exists in every
    /// supported language, writing defaults only where a key is missing.
    /// Idempotent; safe to re-run after extending the defaults.
    pub async fn ensure_from_defaults(&self, def: CatalogDef) -> Result<CatalogHandle> {
        def.meta().validate()?;
        let target = def.resolve(&self.inner.settings);
        self.inner
            .coherency
            .ensure_document_cache(&target, &self.inner.cache);

        let defaults = def.defaults_document();
        let mut updates = Vec::new();
        for language in def.languages() {
            let id = def.language_doc_id(language);
            let persisted = self.inner.store.find_by_id(&target, &id).await?;
            let was_absent = persisted.is_none();
            let mut document = persisted.unwrap_or_default();
            let inserted = codec::merge_missing(&mut document, &defaults);
            document.insert("_id", id.as_str());
            if was_absent || inserted > 0 {
                tracing::debug!(
                    catalog = def.document_id(),
                    language = %language,
                    inserted,
                    "propagating message defaults"
                );
                updates.push((id.clone(), document.clone()));
            }
            self.inner
                .cache
                .insert(DocKey::new(target.clone(), id), document);
        }
        if !updates.is_empty() {
            let count = updates.len();
            self.inner.store.bulk_upsert(&target, updates).await?;
            tracing::info!(
                catalog = def.document_id(),
                documents = count,
                "message catalog synchronized"
            );
        }

        self.inner.supported.register(def.languages());
        let entry = Arc::new(CatalogEntry { target, def });
        self.inner
            .catalogs
            .write()
            .insert(entry.def.document_id().to_owned(), entry.clone());
        Ok(CatalogHandle {
            store: self.clone(),
            entry,
        })
    }

    /// Handle for an already registered catalog.
    pub fn handle(&self, document_id: &str) -> Option<CatalogHandle> {
        let entry = self.inner.catalogs.read().get(document_id)?.clone();
        Some(CatalogHandle {
            store: self.clone(),
            entry,
        })
    }

    // ── internals ────────────────────────────────────────────────────

    /// The raw stored value for `(language, key)`, after the language
    /// fallback chain; `None` only when the default language misses too.
    async fn value(
        &self,
        entry: &CatalogEntry,
        language: &str,
        key: &str,
    ) -> Result<Option<MessageValue>> {
        let document = self.language_document(entry, language).await?;
        if let Some(value) = document.get(key).and_then(MessageValue::from_bson) {
            return Ok(Some(value));
        }
        let fallback = &self.inner.settings.default_language;
        if language != fallback {
            let document = self.language_document(entry, fallback).await?;
            if let Some(value) = document.get(key).and_then(MessageValue::from_bson) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Read-through fetch of one language document. Languages with no
    /// persisted document resolve to an empty map, which also caches the
    /// absence until the change stream reports otherwise.
    async fn language_document(&self, entry: &CatalogEntry, language: &str) -> Result<Document> {
        let id = entry.def.language_doc_id(language);
        let key = DocKey::new(entry.target.clone(), id.clone());
        let store = self.inner.store.clone();
        let target = entry.target.clone();
        self.inner
            .cache
            .get_with(key, move || async move {
                Ok(store.find_by_id(&target, &id).await?.unwrap_or_default())
            })
            .await
    }

    fn post_process(&self, message: String) -> String {
        match &*self.inner.post.read() {
            Some(post) => post(message),
            None => message,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scoped access to one registered catalog.
#[derive(Clone)]
pub struct CatalogHandle {
    store: MessageStore,
    entry: Arc<CatalogEntry>,
}

impl CatalogHandle {
    pub fn document_id(&self) -> &str {
        self.entry.def.document_id()
    }

    pub fn languages(&self) -> &[String] {
        self.entry.def.languages()
    }

    pub fn supports(&self, language: &str) -> bool {
        self.entry.def.supports(language)
    }

    /// The message for `(language, key)`. Falls back to the process
    /// default language, then to the key itself.
    pub async fn get(&self, language: &str, key: &str) -> Result<String> {
        let value = self.store.value(&self.entry, language, key).await?;
        let text = match value {
            Some(value) => value.into_text(),
            None => key.to_owned(),
        };
        Ok(self.store.post_process(text))
    }

    /// List-valued lookup; a scalar stored value wraps to a singleton.
    pub async fn get_list(&self, language: &str, key: &str) -> Result<Vec<String>> {
        let value = self.store.value(&self.entry, language, key).await?;
        let lines = match value {
            Some(value) => value.into_lines(),
            None => vec![key.to_owned()],
        };
        Ok(lines
            .into_iter()
            .map(|line| self.store.post_process(line))
            .collect())
    }

    /// Retrieve and substitute placeholders.
    pub async fn format(
        &self,
        language: &str,
        key: &str,
        placeholders: &Placeholders,
    ) -> Result<String> {
        let template = self.get(language, key).await?;
        Ok(format::apply(&template, placeholders))
    }

    pub async fn format_list(
        &self,
        language: &str,
        key: &str,
        placeholders: &Placeholders,
    ) -> Result<Vec<String>> {
        let lines = self.get_list(language, key).await?;
        Ok(lines
            .into_iter()
            .map(|line| format::apply(&line, placeholders))
            .collect())
    }

    /// Deliver the resolved message to `consumer` as soon as it is
    /// available. Never blocks or suspends the caller.
    pub fn use_message(
        &self,
        language: &str,
        key: &str,
        consumer: impl FnOnce(String) + Send + 'static,
    ) {
        let handle = self.clone();
        let language = language.to_owned();
        let key = key.to_owned();
        tokio::spawn(async move {
            match handle.get(&language, &key).await {
                Ok(message) => consumer(message),
                Err(e) => tracing::warn!(
                    catalog = handle.document_id(),
                    key = %key,
                    error = %e,
                    "message lookup failed"
                ),
            }
        });
    }

    /// Same as [`use_message`](Self::use_message) with placeholder
    /// substitution applied first.
    pub fn use_formatted(
        &self,
        language: &str,
        key: &str,
        placeholders: Placeholders,
        consumer: impl FnOnce(String) + Send + 'static,
    ) {
        let handle = self.clone();
        let language = language.to_owned();
        let key = key.to_owned();
        tokio::spawn(async move {
            match handle.format(&language, &key, &placeholders).await {
                Ok(message) => consumer(message),
                Err(e) => tracing::warn!(
                    catalog = handle.document_id(),
                    key = %key,
                    error = %e,
                    "message format failed"
                ),
            }
        });
    }

    /// A language-bound projection of this catalog.
    pub fn view(&self, language: &str) -> CatalogView {
        CatalogView {
            handle: self.clone(),
            language: language.to_owned(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Language-bound view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A lazy projection of one catalog onto one language.
///
/// The `blocking_*` variants park the current worker thread while the
/// cache fills. They exist for worker-context call sites that produce
/// many messages at once; they must not be used on latency-critical
/// threads and panic on a current-thread runtime. Everything else should
/// use the async methods or [`CatalogHandle::use_message`].
#[derive(Clone)]
pub struct CatalogView {
    handle: CatalogHandle,
    language: String,
}

impl CatalogView {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        self.handle.get(&self.language, key).await
    }

    pub async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        self.handle.get_list(&self.language, key).await
    }

    pub async fn format(&self, key: &str, placeholders: &Placeholders) -> Result<String> {
        self.handle.format(&self.language, key, placeholders).await
    }

    /// Synchronous lookup; may suspend the worker thread on a cache fill.
    pub fn blocking_get(&self, key: &str) -> Result<String> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.get(key))
        })
    }

    /// Synchronous formatted lookup; same caveats as [`Self::blocking_get`].
    pub fn blocking_format(&self, key: &str, placeholders: &Placeholders) -> Result<String> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.format(key, placeholders))
        })
    }
}
