//! Change events delivered by a watch subscription.

use std::pin::Pin;

use bson::Document;
use futures_core::Stream;
use mc_domain::bundle::Target;
use mc_domain::error::Result;

/// What happened to a document. Inserts, updates and replaces all leave a
/// readable document behind, so they collapse to one variant; deletes
/// carry the tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Delete,
}

/// An opaque stream position. Wraps the raw resume-token document so test
/// doubles can mint their own positions without a live deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint(Document);

impl ResumePoint {
    pub fn new(document: Document) -> Self {
        Self(document)
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

/// One change observed on a watched collection.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub target: Target,
    pub id: String,
    pub kind: ChangeKind,
    /// The post-image when the subscription requested full-document
    /// lookup. Never present for deletes.
    pub full_document: Option<Document>,
    /// Position to resume after this event.
    pub resume: Option<ResumePoint>,
}

/// A live feed of change events. Ends only on subscription failure.
pub type ChangeFeed = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;
