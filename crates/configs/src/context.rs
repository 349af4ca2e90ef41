//! Process context: construction, coherency wiring, shutdown.
//!
//! `MongoConfigs` is the explicit handle the host threads through its
//! code; there is no global accessor. It owns the shared gateway, the
//! change-stream pump and the three stores, and wires pump events into
//! the stores' caches so an edit made by any process in the cluster (or
//! directly in the database) evicts or refreshes the matching cache
//! entries everywhere.

use std::collections::HashSet;
use std::sync::Arc;

use bson::Document;
use parking_lot::Mutex;

use mc_domain::bundle::Target;
use mc_domain::error::Result;
use mc_domain::settings::Settings;
use mc_storage::{ChangeEvent, ChangeKind, ChangePump, DocumentStore, EventHandler, MongoGateway};

use crate::cache::{Cache, DocKey};
use crate::configs::ConfigStore;
use crate::languages::{LanguageStore, SupportedLanguages};
use crate::messages::{MessageStore, PostProcessor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coherency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks which collections are already watched and registers new
/// subscriptions on first touch. A failed registration is logged and
/// forgotten so the next touch retries; the store itself keeps working
/// with degraded coherence in the meantime.
pub(crate) struct Coherency {
    pump: Arc<ChangePump>,
    watched: Mutex<HashSet<Target>>,
}

impl Coherency {
    fn new(pump: Arc<ChangePump>) -> Self {
        Self {
            pump,
            watched: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe a handler for a target exactly once.
    pub(crate) fn ensure(&self, target: &Target, handler: EventHandler) {
        if !self.watched.lock().insert(target.clone()) {
            return;
        }
        if let Err(e) = self.pump.watch(target.clone(), handler) {
            tracing::warn!(watched = %target, error = %e, "watch registration failed; cache coherence degraded");
            self.watched.lock().remove(target);
        }
    }

    /// Subscribe the standard document-cache handler: refresh from the
    /// event's post-image when present, evict otherwise.
    pub(crate) fn ensure_document_cache(
        &self,
        target: &Target,
        cache: &Arc<Cache<DocKey, Document>>,
    ) {
        let cache = cache.clone();
        self.ensure(
            target,
            Arc::new(move |event: ChangeEvent| {
                let key = DocKey::new(event.target.clone(), event.id.clone());
                match event.kind {
                    ChangeKind::Upsert => match event.full_document {
                        Some(document) => cache.insert(key, document),
                        None => {
                            cache.invalidate(&key);
                        }
                    },
                    ChangeKind::Delete => {
                        cache.invalidate(&key);
                    }
                }
            }),
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The top-level handle over the configuration, message and language
/// stores of one process.
pub struct MongoConfigs {
    settings: Arc<Settings>,
    pump: Arc<ChangePump>,
    mongo: Option<Arc<MongoGateway>>,
    configs: ConfigStore,
    messages: MessageStore,
    languages: LanguageStore,
}

impl MongoConfigs {
    /// Connect to MongoDB and assemble the stores.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let gateway = Arc::new(MongoGateway::connect(&settings).await?);
        tracing::info!(
            database = %settings.default_database,
            "mongo-configs connected"
        );
        Ok(Self::build(gateway.clone(), Some(gateway), settings))
    }

    /// Assemble the stores over a caller-provided gateway. This is the
    /// seam embedding hosts and tests use to swap the backend.
    pub fn with_gateway(gateway: Arc<dyn DocumentStore>, settings: Settings) -> Self {
        Self::build(gateway, None, settings)
    }

    fn build(
        gateway: Arc<dyn DocumentStore>,
        mongo: Option<Arc<MongoGateway>>,
        settings: Settings,
    ) -> Self {
        let settings = Arc::new(settings);
        let pump = Arc::new(ChangePump::new(gateway.clone(), &settings));
        let coherency = Arc::new(Coherency::new(pump.clone()));
        let supported = Arc::new(SupportedLanguages::new(settings.default_language.clone()));

        let configs = ConfigStore::new(gateway.clone(), settings.clone(), coherency.clone());
        let messages = MessageStore::new(
            gateway.clone(),
            settings.clone(),
            coherency.clone(),
            supported.clone(),
        );
        let languages = LanguageStore::new(gateway, settings.clone(), coherency, supported);

        Self {
            settings,
            pump,
            mongo,
            configs,
            messages,
            languages,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn languages(&self) -> &LanguageStore {
        &self.languages
    }

    pub fn pump(&self) -> &ChangePump {
        &self.pump
    }

    /// Install (or clear) the string post-processor applied to every
    /// retrieved message.
    pub fn set_post_processor(&self, post: Option<PostProcessor>) {
        self.messages.set_post_processor(post);
    }

    /// Stop the change-stream pump, then close the client. In-flight
    /// consumer tasks observe cancellation; accepted writes are not
    /// rolled back.
    pub async fn shutdown(&self) {
        self.pump.stop().await;
        if let Some(mongo) = &self.mongo {
            mongo.shutdown().await;
        }
        tracing::info!("mongo-configs shut down");
    }
}
