//! `mc-storage` — the MongoDB side of the mongo-configs workspace.
//!
//! Provides the [`DocumentStore`] trait that abstracts over document
//! storage (production MongoDB, in-memory test doubles), the
//! [`MongoGateway`] implementation over the official async driver, change
//! event types, and the supervised [`ChangePump`] that keeps one resilient
//! change-stream subscription per watched collection.

pub mod events;
pub mod mongo;
pub mod pump;
pub mod store;

pub use events::{ChangeEvent, ChangeFeed, ChangeKind, ResumePoint};
pub use mongo::MongoGateway;
pub use pump::{ChangePump, EventHandler, PumpStatus};
pub use store::DocumentStore;
