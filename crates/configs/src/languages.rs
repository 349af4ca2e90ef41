//! Per-player language preferences.
//!
//! Reads consult a process-local cache keyed by player id; writes are
//! write-behind: the cache is updated immediately and the upsert runs on
//! its own task, so a chat hot path never waits on storage. The
//! supported-language set is fed by catalog registration and always
//! contains the process default.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mc_domain::bundle::Target;
use mc_domain::codec;
use mc_domain::error::Result;
use mc_domain::settings::Settings;
use mc_storage::{ChangeEvent, ChangeKind, DocumentStore};

use crate::cache::{Cache, CacheConfig};
use crate::context::Coherency;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supported-language set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide language knowledge: the default plus every language any
/// registered catalog declares.
pub struct SupportedLanguages {
    default_language: String,
    set: RwLock<BTreeSet<String>>,
}

impl SupportedLanguages {
    pub(crate) fn new(default_language: String) -> Self {
        let mut set = BTreeSet::new();
        set.insert(default_language.clone());
        Self {
            default_language,
            set: RwLock::new(set),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn register<I, S>(&self, languages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.set.write();
        for language in languages {
            set.insert(language.as_ref().to_owned());
        }
    }

    pub fn contains(&self, language: &str) -> bool {
        self.set.read().contains(language)
    }

    pub fn all(&self) -> Vec<String> {
        self.set.read().iter().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Player language store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stored preference record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerLanguage {
    #[serde(rename = "_id")]
    id: String,
    language: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct LanguageStore {
    inner: Arc<LanguagesInner>,
}

struct LanguagesInner {
    store: Arc<dyn DocumentStore>,
    cache: Arc<Cache<Uuid, String>>,
    target: Target,
    supported: Arc<SupportedLanguages>,
    coherency: Arc<Coherency>,
}

impl LanguagesInner {
    /// Preference edits made anywhere in the cluster reach this cache
    /// through the change stream. Registered on first storage touch, so
    /// building the store needs no runtime.
    fn ensure_watch(&self) {
        let cache = self.cache.clone();
        self.coherency.ensure(
            &self.target,
            Arc::new(move |event: ChangeEvent| {
                let Ok(id) = Uuid::parse_str(&event.id) else {
                    return;
                };
                let refreshed = match event.kind {
                    ChangeKind::Upsert => event
                        .full_document
                        .as_ref()
                        .and_then(|doc| doc.get_str("language").ok()),
                    ChangeKind::Delete => None,
                };
                match refreshed {
                    Some(language) => cache.insert(id, language.to_owned()),
                    None => {
                        cache.invalidate(&id);
                    }
                }
            }),
        );
    }
}

impl LanguageStore {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        settings: Arc<Settings>,
        coherency: Arc<Coherency>,
        supported: Arc<SupportedLanguages>,
    ) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig::from_settings(&settings)));
        let target = Target::new(
            settings.default_database.clone(),
            settings.languages_collection.clone(),
        );
        Self {
            inner: Arc::new(LanguagesInner {
                store,
                cache,
                target,
                supported,
                coherency,
            }),
        }
    }

    /// Cache-only lookup; `None` when the preference is not loaded.
    pub fn player_language(&self, player: Uuid) -> Option<String> {
        self.inner.cache.peek(&player)
    }

    /// Cache-only lookup with the process default as fallback.
    pub fn player_language_or_default(&self, player: Uuid) -> String {
        self.player_language(player)
            .unwrap_or_else(|| self.default_language().to_owned())
    }

    /// Read-through lookup. Players with no stored preference resolve to
    /// the process default.
    pub async fn fetch_player_language(&self, player: Uuid) -> Result<String> {
        self.inner.ensure_watch();
        let store = self.inner.store.clone();
        let target = self.inner.target.clone();
        let fallback = self.default_language().to_owned();
        self.inner
            .cache
            .get_with(player, move || async move {
                let found = store.find_by_id(&target, &player.to_string()).await?;
                Ok(match found.as_ref().and_then(|d| d.get_str("language").ok()) {
                    Some(language) => language.to_owned(),
                    None => fallback,
                })
            })
            .await
    }

    /// Record a preference. Write-behind: the cache updates immediately,
    /// the upsert runs on its own task and only logs on failure.
    pub fn set_player_language(&self, player: Uuid, language: impl Into<String>) {
        let language = language.into();
        self.inner.ensure_watch();
        self.inner.cache.insert(player, language.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = write_preference(&inner, player, &language).await {
                tracing::warn!(player = %player, error = %e, "language write-behind failed");
            }
        });
    }

    /// Record a preference and wait for the upsert to land.
    pub async fn set_player_language_now(
        &self,
        player: Uuid,
        language: impl Into<String>,
    ) -> Result<()> {
        let language = language.into();
        self.inner.ensure_watch();
        self.inner.cache.insert(player, language.clone());
        write_preference(&self.inner, player, &language).await
    }

    /// Forget a stored preference.
    pub async fn clear_player_language(&self, player: Uuid) -> Result<bool> {
        self.inner.ensure_watch();
        self.inner.cache.invalidate(&player);
        self.inner
            .store
            .delete_by_id(&self.inner.target, &player.to_string())
            .await
    }

    pub fn default_language(&self) -> &str {
        self.inner.supported.default_language()
    }

    pub fn supported_languages(&self) -> Vec<String> {
        self.inner.supported.all()
    }

    pub fn is_language_supported(&self, language: &str) -> bool {
        self.inner.supported.contains(language)
    }
}

async fn write_preference(inner: &LanguagesInner, player: Uuid, language: &str) -> Result<()> {
    let record = PlayerLanguage {
        id: player.to_string(),
        language: language.to_owned(),
        updated_at: chrono::Utc::now(),
    };
    let document = codec::to_document(&record)?;
    inner
        .store
        .upsert_by_id(&inner.target, &record.id, document)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_set_always_contains_the_default() {
        let supported = SupportedLanguages::new("en".into());
        assert!(supported.contains("en"));
        assert_eq!(supported.all(), vec!["en".to_string()]);
    }

    #[test]
    fn register_extends_the_set_without_duplicates() {
        let supported = SupportedLanguages::new("en".into());
        supported.register(["pl", "de", "pl"]);
        assert_eq!(
            supported.all(),
            vec!["de".to_string(), "en".into(), "pl".into()]
        );
        assert!(supported.contains("pl"));
        assert!(!supported.contains("fr"));
    }
}
