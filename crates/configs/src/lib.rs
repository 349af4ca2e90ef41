//! `mc-configs` — MongoDB-backed configuration and localized messages
//! for clustered game servers.
//!
//! Three stores share one gateway, one change-stream pump and one caching
//! discipline:
//!
//! * [`ConfigStore`] materializes typed config records, merging declared
//!   defaults under persisted data;
//! * [`MessageStore`] keeps one document per `(catalog, language)`,
//!   propagates newly declared keys to every supported language and
//!   serves formatted strings with placeholder substitution;
//! * [`LanguageStore`] tracks per-player language preferences with a
//!   write-behind cache.
//!
//! Every process pointed at the same database converges: writes go
//! through the gateway, the pump observes the resulting change stream
//! and refreshes or evicts the matching cache entries on every
//! subscriber.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mc_configs::{MongoConfigs, Placeholders};
//! use mc_domain::{CatalogBuilder, Settings};
//!
//! # async fn example() -> mc_domain::Result<()> {
//! let core = MongoConfigs::connect(Settings::default()).await?;
//!
//! let catalog = CatalogBuilder::new("messages")
//!     .languages(["en", "pl"])
//!     .text("welcome", "Welcome, {name}!")
//!     .build()?;
//! let messages = core.messages().ensure_from_defaults(catalog).await?;
//!
//! let greeting = messages
//!     .format("en", "welcome", &Placeholders::new().set("name", "Alex"))
//!     .await?;
//! println!("{greeting}");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod configs;
pub mod context;
pub mod format;
pub mod languages;
pub mod messages;

pub use cache::{Cache, CacheConfig, CacheStats, DocKey, RemovalCause, RemovalListener};
pub use configs::ConfigStore;
pub use context::MongoConfigs;
pub use format::Placeholders;
pub use languages::{LanguageStore, SupportedLanguages};
pub use messages::{CatalogHandle, CatalogView, MessageStore, PostProcessor};

pub use mc_domain::{
    BundleMeta, CatalogBuilder, CatalogDef, ConfigBundle, Error, MessageValue, Result, Settings,
};
