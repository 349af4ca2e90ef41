//! Bundle metadata and the typed config-bundle trait.
//!
//! A bundle is a user-declared schema for a persisted record. Instead of
//! runtime reflection, the metadata the original class annotations carried
//! lives in associated consts of [`ConfigBundle`] (for typed configs) or in
//! a [`CatalogDef`](crate::catalog::CatalogDef) value (for message
//! catalogs).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::settings::Settings;

/// A fully resolved collection address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub database: String,
    pub collection: String,
}

impl Target {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// Metadata every bundle carries: a stable document id plus optional
/// database/collection overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMeta {
    pub document_id: String,
    pub database: Option<String>,
    pub collection: Option<String>,
}

impl BundleMeta {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            database: None,
            collection: None,
        }
    }

    /// A missing document id is a configuration error, caught before any
    /// storage call is made.
    pub fn validate(&self) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(Error::Schema("bundle has an empty document id".into()));
        }
        Ok(())
    }

    /// Resolve against process settings. `fallback_collection` is the
    /// settings-level collection for the bundle's kind (configs or
    /// messages); bundles that name their own override it.
    pub fn resolve(&self, settings: &Settings, fallback_collection: &str) -> Target {
        Target {
            database: self
                .database
                .clone()
                .unwrap_or_else(|| settings.default_database.clone()),
            collection: self
                .collection
                .clone()
                .unwrap_or_else(|| fallback_collection.to_owned()),
        }
    }
}

/// A typed configuration bundle.
///
/// Implementors are plain serde records; the associated consts replace the
/// class annotations of the original design. `defaults()` provides the
/// value whose serialized tree acts as the default document on reads.
///
/// ```rust
/// use mc_domain::ConfigBundle;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct ServerConfig {
///     max_players: i32,
///     motd: String,
/// }
///
/// impl ConfigBundle for ServerConfig {
///     const DOCUMENT_ID: &'static str = "server-config";
///
///     fn defaults() -> Self {
///         Self { max_players: 100, motd: "welcome".into() }
///     }
/// }
/// ```
pub trait ConfigBundle: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of the bundle's document within its collection.
    const DOCUMENT_ID: &'static str;

    /// Database override; process default when `None`.
    const DATABASE: Option<&'static str> = None;

    /// Collection override; the settings-level configs collection when
    /// `None`.
    const COLLECTION: Option<&'static str> = None;

    /// The record whose fields fill any keys missing from persisted data.
    fn defaults() -> Self;

    fn meta() -> BundleMeta {
        BundleMeta {
            document_id: Self::DOCUMENT_ID.to_owned(),
            database: Self::DATABASE.map(str::to_owned),
            collection: Self::COLLECTION.map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn resolve_falls_back_to_settings() {
        let meta = BundleMeta::new("server-config");
        let target = meta.resolve(&settings(), "configs");
        assert_eq!(target, Target::new("configs", "configs"));
    }

    #[test]
    fn resolve_prefers_bundle_overrides() {
        let meta = BundleMeta {
            document_id: "arena".into(),
            database: Some("minigames".into()),
            collection: Some("arenas".into()),
        };
        let target = meta.resolve(&settings(), "configs");
        assert_eq!(target, Target::new("minigames", "arenas"));
    }

    #[test]
    fn empty_document_id_is_a_schema_error() {
        let meta = BundleMeta::new("  ");
        assert!(matches!(meta.validate(), Err(Error::Schema(_))));
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::new("db", "coll").to_string(), "db/coll");
    }
}
