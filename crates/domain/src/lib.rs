//! `mc-domain` — shared types for the mongo-configs workspace.
//!
//! Holds everything the storage and store crates agree on: the shared
//! [`Error`] type, the process [`Settings`] record, bundle metadata and the
//! [`ConfigBundle`] trait, message-catalog definitions with their dotted-key
//! derivation, and the BSON codec helpers (default merging, dotted-path
//! access).

pub mod bundle;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod settings;

pub use bundle::{BundleMeta, ConfigBundle, Target};
pub use catalog::{CatalogBuilder, CatalogDef, MessageValue, SectionBuilder};
pub use error::{Error, Result};
pub use settings::Settings;
