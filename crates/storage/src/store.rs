//! The `DocumentStore` trait defines the storage gateway surface every
//! higher-level store goes through (find, upsert, bulk write, delete,
//! watch).
//!
//! Implementations may talk to a real MongoDB deployment
//! ([`MongoGateway`](crate::mongo::MongoGateway)) or be an in-memory test
//! double. All methods return `mc_domain::error::Result` and never block
//! the calling thread.

use async_trait::async_trait;
use bson::Document;
use mc_domain::bundle::Target;
use mc_domain::error::Result;

use crate::events::{ChangeFeed, ResumePoint};

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch one document by `_id`.
    async fn find_by_id(&self, target: &Target, id: &str) -> Result<Option<Document>>;

    /// Replace-or-insert one document under `_id = id`. Last writer wins.
    async fn upsert_by_id(&self, target: &Target, id: &str, document: Document) -> Result<()>;

    /// Upsert a batch of documents into one collection.
    async fn bulk_upsert(&self, target: &Target, documents: Vec<(String, Document)>) -> Result<()>;

    /// Delete one document by `_id`. Returns whether anything was removed.
    async fn delete_by_id(&self, target: &Target, id: &str) -> Result<bool>;

    /// Open a change feed over the collection, filtered by the given
    /// aggregation pipeline, optionally resuming after a stored position.
    /// Subscriptions request full-document lookup on updates.
    async fn watch(
        &self,
        target: &Target,
        pipeline: Vec<Document>,
        resume: Option<ResumePoint>,
    ) -> Result<ChangeFeed>;
}
