//! Supervised change-stream pumps.
//!
//! One pump owns every watch subscription in the process: for each
//! watched collection it runs exactly one task that opens the change
//! feed, dispatches events to the registered handler, records the resume
//! position after each dispatched event, and survives transient failures
//! with exponential back-off. A subscription that fails more than the
//! configured ceiling of consecutive times is declared lost; the host has
//! to restart it explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mc_domain::bundle::Target;
use mc_domain::error::{Error, Result};
use mc_domain::settings::Settings;

use crate::events::{ChangeEvent, ResumePoint};
use crate::mongo::standard_pipeline;
use crate::store::DocumentStore;

/// Invalidation callback. Must be cheap and non-blocking; anything heavy
/// belongs on a task of its own.
pub type EventHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Observable life-cycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Idle,
    Running,
    Backoff,
    /// Retry ceiling exceeded; no further attempts until re-watched.
    Lost,
    Stopped,
}

struct Subscription {
    handler: Arc<RwLock<EventHandler>>,
    status: watch::Receiver<PumpStatus>,
    resume: Arc<Mutex<Option<ResumePoint>>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The process-wide change-stream pump.
pub struct ChangePump {
    store: Arc<dyn DocumentStore>,
    dispatch: Arc<Semaphore>,
    backoff_start: Duration,
    backoff_max: Duration,
    max_failures: u32,
    shutdown: CancellationToken,
    subs: Mutex<HashMap<Target, Subscription>>,
}

impl ChangePump {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &Settings) -> Self {
        Self {
            store,
            dispatch: Arc::new(Semaphore::new(settings.event_pool_size.max(1))),
            backoff_start: Duration::from_millis(settings.change_stream_backoff_start_millis.max(1)),
            backoff_max: Duration::from_millis(settings.change_stream_backoff_max_millis.max(1)),
            max_failures: settings.change_stream_max_consecutive_failures.max(1),
            shutdown: CancellationToken::new(),
            subs: Mutex::new(HashMap::new()),
        }
    }

    /// Watch a collection with the standard document-operation filter.
    pub fn watch(&self, target: Target, handler: EventHandler) -> Result<()> {
        self.watch_filtered(target, standard_pipeline(), handler)
    }

    /// Watch a collection with a caller-supplied filter pipeline.
    ///
    /// Registering the same target again swaps the handler in place; the
    /// live subscription (and its resume position) is kept.
    pub fn watch_filtered(
        &self,
        target: Target,
        pipeline: Vec<Document>,
        handler: EventHandler,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut subs = self.subs.lock();
        if let Some(existing) = subs.get(&target) {
            *existing.handler.write() = handler;
            return Ok(());
        }

        let handler = Arc::new(RwLock::new(handler));
        let resume = Arc::new(Mutex::new(None));
        let (status_tx, status_rx) = watch::channel(PumpStatus::Idle);
        let cancel = self.shutdown.child_token();

        let task = tokio::spawn(run_subscription(SubscriptionLoop {
            store: self.store.clone(),
            target: target.clone(),
            pipeline,
            handler: handler.clone(),
            resume: resume.clone(),
            status: status_tx,
            cancel: cancel.clone(),
            dispatch: self.dispatch.clone(),
            backoff_start: self.backoff_start,
            backoff_max: self.backoff_max,
            max_failures: self.max_failures,
        }));

        subs.insert(
            target,
            Subscription {
                handler,
                status: status_rx,
                resume,
                cancel,
                task,
            },
        );
        Ok(())
    }

    /// Stop watching one collection and wait for its task to finish.
    pub async fn unwatch(&self, target: &Target) {
        let sub = self.subs.lock().remove(target);
        if let Some(sub) = sub {
            sub.cancel.cancel();
            let _ = sub.task.await;
        }
    }

    /// Stop every subscription. The pump accepts no new watches after
    /// this.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let drained: Vec<Subscription> = {
            let mut subs = self.subs.lock();
            subs.drain().map(|(_, sub)| sub).collect()
        };
        for sub in drained {
            let _ = sub.task.await;
        }
    }

    pub fn status(&self, target: &Target) -> Option<PumpStatus> {
        self.subs.lock().get(target).map(|sub| *sub.status.borrow())
    }

    /// The last position recorded for a subscription. Pump-owned; exposed
    /// read-only.
    pub fn resume_point(&self, target: &Target) -> Option<ResumePoint> {
        self.subs
            .lock()
            .get(target)
            .and_then(|sub| sub.resume.lock().clone())
    }

    pub fn is_watching(&self, target: &Target) -> bool {
        self.subs.lock().contains_key(target)
    }
}

struct SubscriptionLoop {
    store: Arc<dyn DocumentStore>,
    target: Target,
    pipeline: Vec<Document>,
    handler: Arc<RwLock<EventHandler>>,
    resume: Arc<Mutex<Option<ResumePoint>>>,
    status: watch::Sender<PumpStatus>,
    cancel: CancellationToken,
    dispatch: Arc<Semaphore>,
    backoff_start: Duration,
    backoff_max: Duration,
    max_failures: u32,
}

async fn run_subscription(ctx: SubscriptionLoop) {
    let mut failures = 0u32;
    let mut delay = ctx.backoff_start;

    loop {
        if ctx.cancel.is_cancelled() {
            let _ = ctx.status.send(PumpStatus::Stopped);
            return;
        }

        let resume = ctx.resume.lock().clone();
        let had_resume = resume.is_some();

        let subscribed = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let _ = ctx.status.send(PumpStatus::Stopped);
                return;
            }
            result = ctx.store.watch(&ctx.target, ctx.pipeline.clone(), resume) => result,
        };

        match subscribed {
            Ok(mut feed) => {
                let _ = ctx.status.send(PumpStatus::Running);
                loop {
                    let item = tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            let _ = ctx.status.send(PumpStatus::Stopped);
                            return;
                        }
                        item = feed.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            let point = event.resume.clone();
                            dispatch(&ctx, event).await;
                            if let Some(point) = point {
                                *ctx.resume.lock() = Some(point);
                            }
                            failures = 0;
                            delay = ctx.backoff_start;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(watched = %ctx.target, error = %e, "change stream failed");
                            break;
                        }
                        None => {
                            tracing::warn!(watched = %ctx.target, "change stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(watched = %ctx.target, error = %e, "subscribe failed");
                if had_resume {
                    // The stored position may be past the oplog horizon.
                    // Drop it once and restart from now.
                    tracing::warn!(
                        watched = %ctx.target,
                        "resume position rejected, restarting stream from now"
                    );
                    *ctx.resume.lock() = None;
                }
            }
        }

        failures += 1;
        if failures >= ctx.max_failures {
            tracing::error!(
                watched = %ctx.target,
                failures,
                "change stream lost; coherence degraded until re-watched"
            );
            let _ = ctx.status.send(PumpStatus::Lost);
            return;
        }

        let _ = ctx.status.send(PumpStatus::Backoff);
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let _ = ctx.status.send(PumpStatus::Stopped);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(ctx.backoff_max);
    }
}

/// Hand one event to the handler. Delivery stays on the subscription
/// task, so events of one collection arrive in stream order; the event
/// semaphore bounds how many subscriptions dispatch at once so handlers
/// cannot saturate the process.
async fn dispatch(ctx: &SubscriptionLoop, event: ChangeEvent) {
    let permit = match ctx.dispatch.acquire().await {
        Ok(permit) => permit,
        // Semaphore closed only at process teardown.
        Err(_) => return,
    };
    let handler = ctx.handler.read().clone();
    handler(event);
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeFeed, ChangeKind};
    use async_trait::async_trait;
    use bson::doc;
    use futures_util::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target() -> Target {
        Target::new("db", "coll")
    }

    fn point(seq: i64) -> ResumePoint {
        ResumePoint::new(doc! { "seq": seq })
    }

    fn event(id: &str, seq: i64) -> ChangeEvent {
        ChangeEvent {
            target: target(),
            id: id.to_owned(),
            kind: ChangeKind::Upsert,
            full_document: None,
            resume: Some(point(seq)),
        }
    }

    /// A store whose `watch` plays scripted feeds, recording the resume
    /// position of every subscribe call.
    struct ScriptedStore {
        feeds: Mutex<Vec<Vec<Result<ChangeEvent>>>>,
        resume_args: Mutex<Vec<Option<ResumePoint>>>,
        watch_calls: AtomicU32,
    }

    impl ScriptedStore {
        fn new(feeds: Vec<Vec<Result<ChangeEvent>>>) -> Self {
            Self {
                feeds: Mutex::new(feeds),
                resume_args: Mutex::new(Vec::new()),
                watch_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for ScriptedStore {
        async fn find_by_id(&self, _: &Target, _: &str) -> Result<Option<Document>> {
            Ok(None)
        }
        async fn upsert_by_id(&self, _: &Target, _: &str, _: Document) -> Result<()> {
            Ok(())
        }
        async fn bulk_upsert(&self, _: &Target, _: Vec<(String, Document)>) -> Result<()> {
            Ok(())
        }
        async fn delete_by_id(&self, _: &Target, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn watch(
            &self,
            _: &Target,
            _: Vec<Document>,
            resume: Option<ResumePoint>,
        ) -> Result<ChangeFeed> {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            self.resume_args.lock().push(resume);
            let mut feeds = self.feeds.lock();
            if feeds.is_empty() {
                return Err(Error::Transport("no feed scripted".into()));
            }
            let items = feeds.remove(0);
            Ok(Box::pin(stream::iter(items).chain(stream::pending())))
        }
    }

    fn settings() -> Settings {
        Settings {
            change_stream_backoff_start_millis: 10,
            change_stream_backoff_max_millis: 80,
            change_stream_max_consecutive_failures: 3,
            ..Settings::default()
        }
    }

    async fn wait_for(pump: &ChangePump, target: &Target, status: PumpStatus) {
        for _ in 0..2_000 {
            if pump.status(target) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pump never reached {status:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_failure_without_missing_events() {
        let store = Arc::new(ScriptedStore::new(vec![
            vec![
                Ok(event("a", 1)),
                Ok(event("b", 2)),
                Err(Error::Transport("connection reset".into())),
            ],
            vec![Ok(event("c", 3)), Ok(event("d", 4))],
        ]));
        let pump = ChangePump::new(store.clone(), &settings());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        pump.watch(
            target(),
            Arc::new(move |ev: ChangeEvent| sink.lock().push(ev.id)),
        )
        .unwrap();

        for _ in 0..2_000 {
            if seen.lock().len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(*seen.lock(), vec!["a", "b", "c", "d"]);
        // The second subscribe resumed after the last dispatched event.
        let resumes = store.resume_args.lock();
        assert_eq!(resumes.len(), 2);
        assert_eq!(resumes[0], None);
        assert_eq!(resumes[1], Some(point(2)));
        assert_eq!(pump.resume_point(&target()), Some(point(4)));

        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn declares_the_stream_lost_after_the_failure_ceiling() {
        let store = Arc::new(ScriptedStore::new(Vec::new()));
        let pump = ChangePump::new(store.clone(), &settings());
        pump.watch(target(), Arc::new(|_| {})).unwrap();

        wait_for(&pump, &target(), PumpStatus::Lost).await;
        assert_eq!(store.watch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rewatching_swaps_the_handler_without_resubscribing() {
        let store = Arc::new(ScriptedStore::new(vec![vec![Ok(event("a", 1))]]));
        let pump = ChangePump::new(store.clone(), &settings());

        pump.watch(target(), Arc::new(|_| {})).unwrap();
        wait_for(&pump, &target(), PumpStatus::Running).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        pump.watch(
            target(),
            Arc::new(move |ev: ChangeEvent| sink.lock().push(ev.id)),
        )
        .unwrap();

        assert_eq!(store.watch_calls.load(Ordering::SeqCst), 1);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unwatch_removes_one_subscription() {
        let store = Arc::new(ScriptedStore::new(vec![
            vec![Ok(event("a", 1))],
            vec![],
        ]));
        let pump = ChangePump::new(store.clone(), &settings());
        let other = Target::new("db", "other");

        pump.watch(target(), Arc::new(|_| {})).unwrap();
        pump.watch(other.clone(), Arc::new(|_| {})).unwrap();
        wait_for(&pump, &target(), PumpStatus::Running).await;

        pump.unwatch(&target()).await;
        assert!(!pump.is_watching(&target()));
        assert!(pump.is_watching(&other));

        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_moves_subscriptions_to_stopped() {
        let store = Arc::new(ScriptedStore::new(vec![vec![Ok(event("a", 1))]]));
        let pump = ChangePump::new(store.clone(), &settings());
        pump.watch(target(), Arc::new(|_| {})).unwrap();
        wait_for(&pump, &target(), PumpStatus::Running).await;

        pump.stop().await;
        assert!(!pump.is_watching(&target()));
        assert!(matches!(
            pump.watch(target(), Arc::new(|_| {})),
            Err(Error::Canceled)
        ));
    }
}
