//! In-memory [`DocumentStore`] double shared by the integration tests.
//!
//! Documents live in a map; every committed write is broadcast as a
//! change event, so two `MongoConfigs` contexts built over one shared
//! `MemoryStore` behave like two processes attached to one deployment.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use mc_configs::{Error, Result};
use mc_domain::bundle::Target;
use mc_storage::{ChangeEvent, ChangeFeed, ChangeKind, DocumentStore, ResumePoint};

pub struct MemoryStore {
    docs: Mutex<HashMap<(Target, String), Document>>,
    find_counts: Mutex<HashMap<(Target, String), u32>>,
    find_total: AtomicU32,
    find_delay: Option<Duration>,
    fail_finds: AtomicU32,
    events: broadcast::Sender<ChangeEvent>,
    seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Self::with_find_delay(None)
    }

    pub fn with_find_delay(delay: Option<Duration>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            docs: Mutex::new(HashMap::new()),
            find_counts: Mutex::new(HashMap::new()),
            find_total: AtomicU32::new(0),
            find_delay: delay,
            fail_finds: AtomicU32::new(0),
            events,
            seq: AtomicI64::new(0),
        })
    }

    /// Place a document directly, bypassing events — models pre-existing
    /// state or an out-of-band edit the stream never saw.
    pub fn seed(&self, target: &Target, id: &str, mut document: Document) {
        document.insert("_id", id);
        self.docs
            .lock()
            .insert((target.clone(), id.to_owned()), document);
    }

    pub fn document(&self, target: &Target, id: &str) -> Option<Document> {
        self.docs.lock().get(&(target.clone(), id.to_owned())).cloned()
    }

    pub fn find_count(&self, target: &Target, id: &str) -> u32 {
        self.find_counts
            .lock()
            .get(&(target.clone(), id.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_finds(&self) -> u32 {
        self.find_total.load(Ordering::SeqCst)
    }

    /// Make the next `n` finds fail with `Transport`.
    pub fn fail_next_finds(&self, n: u32) {
        self.fail_finds.store(n, Ordering::SeqCst);
    }

    fn emit(&self, target: &Target, id: &str, kind: ChangeKind, full: Option<Document>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(ChangeEvent {
            target: target.clone(),
            id: id.to_owned(),
            kind,
            full_document: full,
            resume: Some(ResumePoint::new(doc! { "seq": seq })),
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_id(&self, target: &Target, id: &str) -> Result<Option<Document>> {
        if let Some(delay) = self.find_delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .fail_finds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transport("scripted failure".into()));
        }
        *self
            .find_counts
            .lock()
            .entry((target.clone(), id.to_owned()))
            .or_insert(0) += 1;
        self.find_total.fetch_add(1, Ordering::SeqCst);
        Ok(self.document(target, id))
    }

    async fn upsert_by_id(&self, target: &Target, id: &str, document: Document) -> Result<()> {
        let mut stored = document;
        stored.insert("_id", id);
        self.docs
            .lock()
            .insert((target.clone(), id.to_owned()), stored.clone());
        self.emit(target, id, ChangeKind::Upsert, Some(stored));
        Ok(())
    }

    async fn bulk_upsert(&self, target: &Target, documents: Vec<(String, Document)>) -> Result<()> {
        for (id, document) in documents {
            self.upsert_by_id(target, &id, document).await?;
        }
        Ok(())
    }

    async fn delete_by_id(&self, target: &Target, id: &str) -> Result<bool> {
        let removed = self
            .docs
            .lock()
            .remove(&(target.clone(), id.to_owned()))
            .is_some();
        if removed {
            self.emit(target, id, ChangeKind::Delete, None);
        }
        Ok(removed)
    }

    async fn watch(
        &self,
        target: &Target,
        _pipeline: Vec<Document>,
        _resume: Option<ResumePoint>,
    ) -> Result<ChangeFeed> {
        let mut rx = self.events.subscribe();
        let target = target.clone();
        let feed = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) if event.target == target => yield Ok(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        };
        Ok(Box::pin(feed))
    }
}

/// Route core logs into the test harness (`RUST_LOG=debug` to see them).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait until `probe` returns true, or panic after ~2 seconds.
pub async fn eventually<F>(mut probe: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── shared test bundles ──────────────────────────────────────────────

use mc_configs::ConfigBundle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub max_players: i32,
    pub motd: String,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub render_distance: i32,
    pub pvp: bool,
}

impl ConfigBundle for ServerConfig {
    const DOCUMENT_ID: &'static str = "server-config";
    const COLLECTION: Option<&'static str> = Some("server-config");

    fn defaults() -> Self {
        Self {
            max_players: 100,
            motd: "welcome".into(),
            limits: Limits {
                render_distance: 10,
                pvp: true,
            },
        }
    }
}

impl ServerConfig {
    /// The collection target the bundle resolves to under default
    /// settings.
    pub fn target() -> Target {
        Target::new("configs", "server-config")
    }
}
