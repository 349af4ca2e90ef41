//! MongoDB implementation of [`DocumentStore`].
//!
//! `MongoGateway` wraps one shared `mongodb::Client` and translates every
//! trait method into the corresponding driver call, with a per-call
//! deadline, automatic retry + exponential back-off on idempotent reads,
//! and cached collection handles so no handle is reopened per call.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::StreamExt;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use mongodb::options::{ChangeStreamOptions, ClientOptions, FullDocumentType, ReplaceOptions};
use mongodb::{Client, Collection};
use parking_lot::RwLock;

use mc_domain::bundle::Target;
use mc_domain::error::{Error, Result};
use mc_domain::settings::Settings;

use crate::events::{ChangeEvent, ChangeFeed, ChangeKind, ResumePoint};
use crate::store::DocumentStore;

/// Attempts for idempotent reads before surfacing `Transport`.
const READ_ATTEMPTS: u32 = 3;

/// Base delay of the read-retry back-off.
const RETRY_BASE: Duration = Duration::from_millis(100);

/// Production gateway over the official async driver.
///
/// Created once and shared (`Arc`) across every store in the process; the
/// underlying `Client` maintains its own connection pool.
pub struct MongoGateway {
    client: Client,
    deadline: Duration,
    collections: RwLock<HashMap<Target, Collection<Document>>>,
}

impl MongoGateway {
    /// Build a gateway from the shared [`Settings`].
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let mut options = ClientOptions::parse(&settings.connection_string)
            .await
            .map_err(|e| Error::Transport(format!("parse connection string: {e}")))?;
        options.app_name = Some("mongo-configs".into());
        options.max_pool_size = Some(settings.storage_pool_size);

        let client = Client::with_options(options)
            .map_err(|e| Error::Transport(format!("build client: {e}")))?;

        Ok(Self {
            client,
            deadline: Duration::from_millis(settings.operation_timeout_millis),
            collections: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve (and memoize) the handle for a target collection.
    fn collection(&self, target: &Target) -> Collection<Document> {
        if let Some(coll) = self.collections.read().get(target) {
            return coll.clone();
        }
        let coll = self
            .client
            .database(&target.database)
            .collection::<Document>(&target.collection);
        self.collections
            .write()
            .entry(target.clone())
            .or_insert(coll)
            .clone()
    }

    /// Close the underlying client, draining in-flight operations.
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }

    /// Run one driver call under the configured deadline.
    async fn bounded<T, Fut>(&self, op: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = mongodb::error::Result<T>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Transport(format!("{op}: {e}"))),
            Err(_) => Err(Error::Transport(format!(
                "{op}: deadline elapsed after {:?}",
                self.deadline
            ))),
        }
    }

    /// Retry engine for idempotent reads: deadline per attempt, then
    /// 100ms·2ⁿ between attempts.
    async fn bounded_read<T, F, Fut>(&self, op: &str, build: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = mongodb::error::Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..READ_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt - 1)).await;
            }
            match self.bounded(op, build()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(op, attempt, error = %e, "read attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }
}

#[async_trait]
impl DocumentStore for MongoGateway {
    async fn find_by_id(&self, target: &Target, id: &str) -> Result<Option<Document>> {
        let coll = self.collection(target);
        self.bounded_read("findById", || coll.find_one(doc! { "_id": id }, None))
            .await
    }

    async fn upsert_by_id(&self, target: &Target, id: &str, document: Document) -> Result<()> {
        let coll = self.collection(target);
        let mut replacement = document;
        replacement.insert("_id", id);
        let options = ReplaceOptions::builder().upsert(true).build();
        self.bounded(
            "upsertById",
            coll.replace_one(doc! { "_id": id }, replacement, options),
        )
        .await?;
        Ok(())
    }

    async fn bulk_upsert(&self, target: &Target, documents: Vec<(String, Document)>) -> Result<()> {
        // The 2.x driver has no bulk replace; issue the upserts serially
        // on the pooled client.
        let coll = self.collection(target);
        for (id, document) in documents {
            let mut replacement = document;
            replacement.insert("_id", id.as_str());
            let options = ReplaceOptions::builder().upsert(true).build();
            self.bounded(
                "bulkUpsert",
                coll.replace_one(doc! { "_id": id.as_str() }, replacement, options),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_by_id(&self, target: &Target, id: &str) -> Result<bool> {
        let coll = self.collection(target);
        let result = self
            .bounded("deleteById", coll.delete_one(doc! { "_id": id }, None))
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn watch(
        &self,
        target: &Target,
        pipeline: Vec<Document>,
        resume: Option<ResumePoint>,
    ) -> Result<ChangeFeed> {
        let coll = self.collection(target);
        let mut options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();
        if let Some(point) = resume {
            options.resume_after = Some(decode_token(&point)?);
        }

        let stream = self
            .bounded("watch", coll.watch(pipeline, options))
            .await?;

        let target = target.clone();
        let feed = async_stream::stream! {
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => match adapt_event(&target, event) {
                        Adapted::Change(change) => yield Ok(change),
                        Adapted::Skip => {}
                        Adapted::Invalidated => {
                            yield Err(Error::Transport(format!(
                                "change stream for {target} invalidated"
                            )));
                            return;
                        }
                    },
                    Err(e) => {
                        yield Err(Error::Transport(format!("change stream: {e}")));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(feed))
    }
}

enum Adapted {
    Change(ChangeEvent),
    Skip,
    Invalidated,
}

fn adapt_event(target: &Target, event: ChangeStreamEvent<Document>) -> Adapted {
    let kind = match event.operation_type {
        OperationType::Insert | OperationType::Update | OperationType::Replace => {
            ChangeKind::Upsert
        }
        OperationType::Delete => ChangeKind::Delete,
        OperationType::Invalidate
        | OperationType::Drop
        | OperationType::DropDatabase
        | OperationType::Rename => return Adapted::Invalidated,
        _ => return Adapted::Skip,
    };

    // Our documents are keyed by string ids; anything else on a watched
    // collection is not ours to invalidate.
    let id = match event
        .document_key
        .as_ref()
        .and_then(|key| key.get("_id"))
    {
        Some(Bson::String(id)) => id.clone(),
        _ => {
            tracing::debug!(watched = %target, "change event without a string _id skipped");
            return Adapted::Skip;
        }
    };

    Adapted::Change(ChangeEvent {
        target: target.clone(),
        id,
        kind,
        full_document: match kind {
            ChangeKind::Upsert => event.full_document,
            ChangeKind::Delete => None,
        },
        resume: encode_token(&event.id),
    })
}

fn encode_token(token: &ResumeToken) -> Option<ResumePoint> {
    match bson::to_bson(token) {
        Ok(Bson::Document(doc)) => Some(ResumePoint::new(doc)),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "resume token not serializable");
            None
        }
    }
}

fn decode_token(point: &ResumePoint) -> Result<ResumeToken> {
    bson::from_bson(Bson::Document(point.as_document().clone()))
        .map_err(|e| Error::Transport(format!("malformed resume token: {e}")))
}

/// The standard filter pipeline: only document-level operations the
/// invalidation layer cares about.
pub fn standard_pipeline() -> Vec<Document> {
    vec![doc! {
        "$match": {
            "operationType": { "$in": ["insert", "update", "replace", "delete"] }
        }
    }]
}
