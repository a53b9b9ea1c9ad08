use std::collections::BTreeMap;
use std::sync::Mutex;

use foundation::{GeoWindow, Millis};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use tracing::debug;

use crate::engine::{EngineError, GeometryEngine};
use crate::region::FeatureSet;
use crate::scheduler::{ApplyResult, LoadRequest, LoadScheduler, SchedulerConfig, ViewportAction};
use crate::tier::ResolutionTier;

/// The single outcome emitted for an accepted window request.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Data(FeatureSet),
    /// Superseded, deduplicated, or coalesced away. Never surfaced as an
    /// error.
    Cancelled,
    /// Recoverable: retried on the next qualifying viewport change.
    Failed(EngineError),
}

/// Async driver wiring the deterministic [`LoadScheduler`] to a
/// [`GeometryEngine`].
///
/// All scheduler mutation happens under one mutex that is never held across
/// an await, so scheduling stays single-writer while loads overlap as
/// asynchronous I/O. Cancellation is two-layered: the scheduler's id guard
/// makes a superseded result inert, and a watch flag raced against the fetch
/// aborts the wasted transfer outright.
pub struct ViewportService<E> {
    engine: E,
    scheduler: Mutex<LoadScheduler>,
    cancels: Mutex<BTreeMap<ResolutionTier, watch::Sender<bool>>>,
    epoch: Instant,
    load_timeout: Duration,
}

impl<E: GeometryEngine> ViewportService<E> {
    pub fn new(engine: E, config: SchedulerConfig) -> Self {
        Self {
            engine,
            scheduler: Mutex::new(LoadScheduler::new(config)),
            cancels: Mutex::new(BTreeMap::new()),
            epoch: Instant::now(),
            load_timeout: Duration::from_millis(config.load_timeout_ms),
        }
    }

    fn now_ms(&self) -> Millis {
        self.epoch.elapsed().as_millis() as Millis
    }

    /// Sole entry point for zoom/pan events. Every accepted request resolves
    /// to exactly one outcome: data, cancelled, or a recoverable failure.
    pub async fn request_window(
        &self,
        zoom: f64,
        viewport: GeoWindow,
        settled: bool,
    ) -> LoadOutcome {
        let now = self.now_ms();
        let (tier, action) = self
            .scheduler
            .lock()
            .expect("scheduler lock")
            .on_view_event(zoom, viewport, settled, now);
        self.execute(tier, Some(viewport), action).await
    }

    /// Content-triggered refresh (plan-version counter), orthogonal to the
    /// bounds machinery: fires even when the viewport is unchanged. Returns
    /// `None` when no tier has seen a view event yet.
    pub async fn plan_changed(&self) -> Option<LoadOutcome> {
        let now = self.now_ms();
        let (tier, action) = {
            let mut sched = self.scheduler.lock().expect("scheduler lock");
            let action = sched.on_plan_changed(now)?;
            (sched.active_tier()?, action)
        };
        Some(self.execute(tier, None, action).await)
    }

    /// Features most recently loaded for a tier, if any.
    pub fn loaded_features(&self, tier: ResolutionTier) -> Option<FeatureSet> {
        self.scheduler
            .lock()
            .expect("scheduler lock")
            .loaded_region(tier)
            .map(|r| r.features.clone())
    }

    async fn execute(
        &self,
        tier: ResolutionTier,
        viewport: Option<GeoWindow>,
        action: ViewportAction,
    ) -> LoadOutcome {
        match action {
            ViewportAction::None => self.resolve_noop(tier, viewport),
            ViewportAction::Start(request) => self.run_load(request).await,
            ViewportAction::Supersede { cancelled, request } => {
                debug!(
                    tier = tier.name(),
                    cancelled = cancelled.0,
                    replacement = request.id.0,
                    "superseding in-flight load"
                );
                self.signal_cancel(tier);
                self.run_load(request).await
            }
            ViewportAction::Deferred {
                fire_at_ms,
                generation,
            } => {
                sleep_until(self.epoch + Duration::from_millis(fire_at_ms)).await;
                let now = self.now_ms();
                let fired = self
                    .scheduler
                    .lock()
                    .expect("scheduler lock")
                    .fire_deferred(tier, generation, now);
                match fired {
                    Some(request) => self.run_load(request).await,
                    // A later event replaced this deferral; its caller owns
                    // the load now.
                    None => LoadOutcome::Cancelled,
                }
            }
        }
    }

    /// A no-op action means either coverage held (serve the loaded data) or
    /// the event deduplicated into an in-flight request (resolve cancelled;
    /// the original request's caller receives the data).
    fn resolve_noop(&self, tier: ResolutionTier, viewport: Option<GeoWindow>) -> LoadOutcome {
        let sched = self.scheduler.lock().expect("scheduler lock");
        let eps = sched.config().epsilon;
        if let Some(region) = sched.loaded_region(tier)
            && region.plan_version == sched.plan_version()
            && viewport.is_none_or(|vp| vp.within(&region.window, eps))
        {
            return LoadOutcome::Data(region.features.clone());
        }
        LoadOutcome::Cancelled
    }

    async fn run_load(&self, request: LoadRequest) -> LoadOutcome {
        let LoadRequest {
            id,
            tier,
            window,
            plan_version,
        } = request;

        let (tx, mut rx) = watch::channel(false);
        self.cancels
            .lock()
            .expect("cancel lock")
            .insert(tier, tx);

        debug!(tier = tier.name(), id = id.0, "starting window load");
        let fetch = self.engine.fetch_features(tier, Some(window), plan_version);
        let result = tokio::select! {
            res = timeout(self.load_timeout, fetch) => match res {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::TimedOut),
            },
            // Fires on a supersession signal; also when a newer load for this
            // tier replaced our sender, which means the same thing.
            _ = rx.changed() => {
                debug!(tier = tier.name(), id = id.0, "load aborted by supersession");
                return LoadOutcome::Cancelled;
            }
        };

        let mut sched = self.scheduler.lock().expect("scheduler lock");
        match result {
            Ok(features) => match sched.on_load_success(tier, id, features.clone()) {
                ApplyResult::Applied => LoadOutcome::Data(features),
                ApplyResult::Stale => LoadOutcome::Cancelled,
            },
            Err(err) => {
                if sched.on_load_failure(tier, id) {
                    debug!(tier = tier.name(), id = id.0, error = %err, "window load failed");
                    LoadOutcome::Failed(err)
                } else {
                    LoadOutcome::Cancelled
                }
            }
        }
    }

    fn signal_cancel(&self, tier: ResolutionTier) {
        if let Some(tx) = self.cancels.lock().expect("cancel lock").get(&tier) {
            let _ = tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use foundation::GeoWindow;
    use serde_json::json;
    use tokio::time::{Duration, advance};

    use super::{LoadOutcome, ViewportService};
    use crate::engine::{EngineError, GeometryEngine};
    use crate::region::FeatureSet;
    use crate::scheduler::SchedulerConfig;
    use crate::tier::ResolutionTier;

    /// Engine whose per-call latency is keyed off the window's west edge, so
    /// tests can make one load slow and its replacement fast.
    struct FakeEngine {
        calls: AtomicUsize,
        slow_west_at_most: f64,
        slow_for: Duration,
    }

    impl FakeEngine {
        fn instant() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                slow_west_at_most: f64::NEG_INFINITY,
                slow_for: Duration::ZERO,
            }
        }

        fn slow_below(west: f64, slow_for: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                slow_west_at_most: west,
                slow_for,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GeometryEngine for FakeEngine {
        async fn fetch_features(
            &self,
            tier: ResolutionTier,
            window: Option<GeoWindow>,
            plan_version: u64,
        ) -> Result<FeatureSet, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let west = window.map(|w| w.west).unwrap_or(f64::INFINITY);
            if west <= self.slow_west_at_most {
                tokio::time::sleep(self.slow_for).await;
            }
            Ok(FeatureSet::new(json!({
                "tier": tier.name(),
                "plan": plan_version,
                "west": west,
            })))
        }
    }

    fn win(west: f64, south: f64, east: f64, north: f64) -> GeoWindow {
        GeoWindow::new(west, south, east, north)
    }

    #[tokio::test(start_paused = true)]
    async fn covered_viewport_serves_loaded_data_without_refetch() {
        let svc = ViewportService::new(FakeEngine::instant(), SchedulerConfig::default());
        let vp = win(0.0, 0.0, 10.0, 10.0);

        let first = svc.request_window(6.0, vp, true).await;
        assert!(matches!(first, LoadOutcome::Data(_)));
        assert_eq!(svc.engine.calls(), 1);

        advance(Duration::from_millis(500)).await;
        let second = svc.request_window(6.0, vp, true).await;
        assert_eq!(second, first);
        assert_eq!(svc.engine.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supersession_aborts_the_slow_load() {
        // Loads west of 50 hang for 5s; the replacement east of it is instant.
        let svc = Arc::new(ViewportService::new(
            FakeEngine::slow_below(50.0, Duration::from_secs(5)),
            SchedulerConfig::default(),
        ));

        let slow = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.request_window(6.0, win(0.0, 0.0, 10.0, 10.0), true).await })
        };
        tokio::task::yield_now().await;

        let fast = svc
            .request_window(6.0, win(100.0, 40.0, 110.0, 50.0), true)
            .await;
        assert!(matches!(fast, LoadOutcome::Data(_)));

        assert_eq!(slow.await.unwrap(), LoadOutcome::Cancelled);
        // The superseded load's region never lands.
        let loaded = svc.loaded_features(ResolutionTier::Coarse).unwrap();
        assert_eq!(loaded.features["west"], json!(100.0 - 5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_events_produce_exactly_one_load_for_the_last_window() {
        let svc = ViewportService::new(FakeEngine::instant(), SchedulerConfig::default());

        // Seed a completed load so the interval throttle is armed.
        let seeded = svc.request_window(6.0, win(0.0, 0.0, 1.0, 1.0), true).await;
        assert!(matches!(seeded, LoadOutcome::Data(_)));

        advance(Duration::from_millis(5)).await;
        let f1 = svc.request_window(6.0, win(20.0, 20.0, 21.0, 21.0), true);
        let f2 = svc.request_window(6.0, win(30.0, 30.0, 31.0, 31.0), true);
        let f3 = svc.request_window(6.0, win(40.0, 40.0, 41.0, 41.0), true);
        let (o1, o2, o3) = tokio::join!(f1, f2, f3);

        assert_eq!(o1, LoadOutcome::Cancelled);
        assert_eq!(o2, LoadOutcome::Cancelled);
        match o3 {
            LoadOutcome::Data(features) => {
                assert_eq!(features.features["west"], json!(40.0 - 0.5));
            }
            other => panic!("expected data for the last window, got {other:?}"),
        }
        assert_eq!(svc.engine.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_as_recoverable_failure_and_retries() {
        let mut config = SchedulerConfig::default();
        config.load_timeout_ms = 1_000;
        // Slower than the timeout for every window.
        let svc = ViewportService::new(
            FakeEngine::slow_below(f64::INFINITY, Duration::from_secs(30)),
            config,
        );

        let vp = win(0.0, 0.0, 10.0, 10.0);
        let outcome = svc.request_window(6.0, vp, true).await;
        assert_eq!(outcome, LoadOutcome::Failed(EngineError::TimedOut));

        // The failure cleared the pending slot, so the next event retries.
        advance(Duration::from_millis(500)).await;
        let retry = svc.request_window(6.0, vp, true).await;
        assert_eq!(retry, LoadOutcome::Failed(EngineError::TimedOut));
        assert_eq!(svc.engine.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn plan_change_refetches_the_same_viewport() {
        let svc = ViewportService::new(FakeEngine::instant(), SchedulerConfig::default());
        let vp = win(0.0, 0.0, 10.0, 10.0);

        let first = svc.request_window(6.0, vp, true).await;
        match &first {
            LoadOutcome::Data(features) => assert_eq!(features.features["plan"], json!(0)),
            other => panic!("expected data, got {other:?}"),
        }

        advance(Duration::from_millis(500)).await;
        let refreshed = svc.plan_changed().await.expect("an active tier exists");
        match refreshed {
            LoadOutcome::Data(features) => assert_eq!(features.features["plan"], json!(1)),
            other => panic!("expected refreshed data, got {other:?}"),
        }
        assert_eq!(svc.engine.calls(), 2);
    }
}
