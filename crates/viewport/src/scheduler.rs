use std::collections::BTreeMap;

use foundation::{EPSILON_DEG, GeoWindow, Millis};

use crate::region::{DeferredLoad, FeatureSet, LoadedRegion, PendingRequest};
use crate::request::RequestId;
use crate::tier::{ResolutionTier, ZoomThresholds};

/// Tuning for the load scheduler.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Preload padding as a fraction of the viewport, applied per side.
    pub pad_fraction: f64,
    /// Minimum interval between load starts for one tier.
    pub min_interval_ms: Millis,
    /// Geometric jitter tolerance for the bounds predicates.
    pub epsilon: f64,
    /// Application-level timeout per load, enforced by the async driver.
    pub load_timeout_ms: Millis,
    pub thresholds: ZoomThresholds,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pad_fraction: 0.5,
            min_interval_ms: 150,
            epsilon: EPSILON_DEG,
            load_timeout_ms: 10_000,
            thresholds: ZoomThresholds::default(),
        }
    }
}

/// A load the caller must now execute against the engine.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LoadRequest {
    pub id: RequestId,
    pub tier: ResolutionTier,
    pub window: GeoWindow,
    pub plan_version: u64,
}

/// What a view event requires of the caller.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ViewportAction {
    /// Coverage holds, or the event deduplicated into the in-flight request.
    None,
    /// Begin this load now.
    Start(LoadRequest),
    /// A load is desired but throttled; call [`LoadScheduler::fire_deferred`]
    /// (or `poll_deferred`) at `fire_at_ms`.
    Deferred { fire_at_ms: Millis, generation: u64 },
    /// The in-flight request no longer covers the viewport: abort it and
    /// begin the replacement immediately.
    Supersede {
        cancelled: RequestId,
        request: LoadRequest,
    },
}

/// Whether a completed load's result was applied or discarded as stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    Stale,
}

#[derive(Debug, Default)]
struct TierState {
    loaded: Option<LoadedRegion>,
    pending: Option<PendingRequest>,
    deferred: Option<DeferredLoad>,
    last_start_ms: Option<Millis>,
    last_viewport: Option<GeoWindow>,
}

enum Decision {
    Start { cancelled: Option<RequestId> },
    Defer { fire_at_ms: Millis },
}

/// Per-tier load state machine: Idle → Throttled → Loading → Idle.
///
/// Owns all mutable load state (`LoadedRegion`, `PendingRequest`, deferred
/// targets) and is fed explicit `now_ms` timestamps, so any event sequence
/// replays deterministically. At most one pending request exists per tier;
/// results whose id no longer matches the current pending request are
/// discarded without touching loaded state.
#[derive(Debug)]
pub struct LoadScheduler {
    config: SchedulerConfig,
    tiers: BTreeMap<ResolutionTier, TierState>,
    next_request: u64,
    next_generation: u64,
    plan_version: u64,
    active_tier: Option<ResolutionTier>,
}

impl LoadScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tiers: BTreeMap::new(),
            next_request: 1,
            next_generation: 1,
            plan_version: 0,
            active_tier: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn plan_version(&self) -> u64 {
        self.plan_version
    }

    pub fn active_tier(&self) -> Option<ResolutionTier> {
        self.active_tier
    }

    pub fn loaded_region(&self, tier: ResolutionTier) -> Option<&LoadedRegion> {
        self.tiers.get(&tier).and_then(|s| s.loaded.as_ref())
    }

    pub fn pending_request(&self, tier: ResolutionTier) -> Option<&PendingRequest> {
        self.tiers.get(&tier).and_then(|s| s.pending.as_ref())
    }

    /// Entry point for a debounced zoom/pan event. Selects the tier for the
    /// zoom level, marks it active, and runs the window logic against that
    /// tier's own state (a tier switch is just a viewport change for the new
    /// tier, independent of the previous tier).
    pub fn on_view_event(
        &mut self,
        zoom: f64,
        viewport: GeoWindow,
        settled: bool,
        now_ms: Millis,
    ) -> (ResolutionTier, ViewportAction) {
        let tier = self.config.thresholds.tier_for_zoom(zoom);
        self.active_tier = Some(tier);
        let action = self.on_viewport_change(tier, viewport, settled, now_ms);
        (tier, action)
    }

    /// Core transition: decide what (if anything) a viewport change requires.
    ///
    /// `settled` distinguishes the two reload triggers: during continuous
    /// panning the raw viewport is tested against the loaded (padded) window
    /// with `outside_padded`, firing early; after a debounced settle the
    /// stricter `exceeds` applies. The two paths are deliberately separate
    /// predicates with their own epsilon conventions.
    pub fn on_viewport_change(
        &mut self,
        tier: ResolutionTier,
        viewport: GeoWindow,
        settled: bool,
        now_ms: Millis,
    ) -> ViewportAction {
        let eps = self.config.epsilon;
        let min_interval = self.config.min_interval_ms;
        let plan = self.plan_version;

        let decision = {
            let state = self.tiers.entry(tier).or_default();
            state.last_viewport = Some(viewport);

            // In-flight deduplication: a request already covering the desired
            // window absorbs the event entirely. Only requests issued under
            // the current plan qualify; a plan change must supersede instead.
            if let Some(pending) = &state.pending
                && !pending.cancelled
                && pending.plan_version == plan
                && pending.window.covers(&viewport, eps)
            {
                return ViewportAction::None;
            }

            // Coverage check against the loaded region, gated on the plan
            // version: data fetched under an older assignment never satisfies
            // coverage.
            if let Some(loaded) = &state.loaded
                && loaded.plan_version == plan
            {
                let covered = if settled {
                    !viewport.exceeds(&loaded.window, eps)
                } else {
                    !viewport.outside_padded(&loaded.window, eps)
                };
                if covered {
                    state.deferred = None;
                    return ViewportAction::None;
                }
            }

            if let Some(pending) = &mut state.pending {
                // Supersession: the in-flight window no longer covers the
                // viewport. Cancel it and start the replacement immediately;
                // the throttle does not apply here.
                pending.cancelled = true;
                Decision::Start {
                    cancelled: Some(pending.id),
                }
            } else {
                let due = state
                    .last_start_ms
                    .is_none_or(|t| now_ms.saturating_sub(t) >= min_interval);
                if due {
                    Decision::Start { cancelled: None }
                } else {
                    // Fire time is fixed when the deferral begins; coalescing
                    // events only replace the target window.
                    let fire_at_ms = state
                        .deferred
                        .as_ref()
                        .map(|d| d.fire_at_ms)
                        .unwrap_or_else(|| {
                            state.last_start_ms.unwrap_or(now_ms) + min_interval
                        });
                    Decision::Defer { fire_at_ms }
                }
            }
        };

        let window = viewport.padded(self.config.pad_fraction);
        match decision {
            Decision::Start { cancelled } => {
                let request = self.begin_load(tier, window, now_ms);
                match cancelled {
                    Some(cancelled) => ViewportAction::Supersede { cancelled, request },
                    None => ViewportAction::Start(request),
                }
            }
            Decision::Defer { fire_at_ms } => {
                let generation = self.next_generation;
                self.next_generation += 1;
                let state = self.tiers.entry(tier).or_default();
                state.deferred = Some(DeferredLoad {
                    window,
                    fire_at_ms,
                    generation,
                });
                ViewportAction::Deferred {
                    fire_at_ms,
                    generation,
                }
            }
        }
    }

    /// Fire the tier's deferred load if `generation` still owns it.
    ///
    /// Returns `None` when a later viewport event replaced the deferral
    /// (last-write-wins coalescing): the newer generation's caller will fire
    /// instead, and this one's request resolves as cancelled.
    pub fn fire_deferred(
        &mut self,
        tier: ResolutionTier,
        generation: u64,
        now_ms: Millis,
    ) -> Option<LoadRequest> {
        let window = {
            let state = self.tiers.get_mut(&tier)?;
            match &state.deferred {
                Some(d) if d.generation == generation => {
                    let window = d.window;
                    state.deferred = None;
                    window
                }
                _ => return None,
            }
        };
        if let Some(pending) = self.pending_request(tier)
            && !pending.cancelled
            && pending.plan_version == self.plan_version
            && pending.window.covers(&window, self.config.epsilon)
        {
            return None;
        }
        Some(self.begin_load(tier, window, now_ms))
    }

    /// Fire every deferred load that is due, across all tiers.
    pub fn poll_deferred(&mut self, now_ms: Millis) -> Vec<LoadRequest> {
        let due: Vec<(ResolutionTier, u64)> = self
            .tiers
            .iter()
            .filter_map(|(tier, state)| {
                state
                    .deferred
                    .as_ref()
                    .filter(|d| d.fire_at_ms <= now_ms)
                    .map(|d| (*tier, d.generation))
            })
            .collect();

        due.into_iter()
            .filter_map(|(tier, generation)| self.fire_deferred(tier, generation, now_ms))
            .collect()
    }

    /// Apply a completed load. Stale results (superseded or cancelled ids)
    /// are discarded without touching `LoadedRegion` and without error.
    pub fn on_load_success(
        &mut self,
        tier: ResolutionTier,
        id: RequestId,
        features: FeatureSet,
    ) -> ApplyResult {
        let Some(state) = self.tiers.get_mut(&tier) else {
            return ApplyResult::Stale;
        };
        match &state.pending {
            Some(pending) if pending.id == id && !pending.cancelled => {
                state.loaded = Some(LoadedRegion {
                    window: pending.window,
                    features,
                    plan_version: pending.plan_version,
                });
                state.pending = None;
                ApplyResult::Applied
            }
            _ => ApplyResult::Stale,
        }
    }

    /// Record a failed load (non-cancellation). Clears the pending request if
    /// it is still current, so the next qualifying viewport change retries;
    /// loaded state is left untouched. Returns whether the failure was
    /// current (and therefore worth surfacing).
    pub fn on_load_failure(&mut self, tier: ResolutionTier, id: RequestId) -> bool {
        let Some(state) = self.tiers.get_mut(&tier) else {
            return false;
        };
        match &state.pending {
            Some(pending) if pending.id == id => {
                state.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Content-triggered refresh: the active feature assignments changed, so
    /// data for every tier is stale regardless of bounds. Re-issues a load
    /// for the active tier's last viewport immediately (even if the viewport
    /// is unchanged); other tiers reload lazily on their next view event
    /// because their recorded plan version no longer satisfies coverage.
    pub fn on_plan_changed(&mut self, now_ms: Millis) -> Option<ViewportAction> {
        self.plan_version += 1;
        let tier = self.active_tier?;
        let viewport = self.tiers.get(&tier)?.last_viewport?;
        Some(self.on_viewport_change(tier, viewport, true, now_ms))
    }

    /// Forced refresh: drop a tier's loaded region so the next qualifying
    /// viewport change reloads it.
    pub fn invalidate(&mut self, tier: ResolutionTier) {
        if let Some(state) = self.tiers.get_mut(&tier) {
            state.loaded = None;
        }
    }

    fn begin_load(
        &mut self,
        tier: ResolutionTier,
        window: GeoWindow,
        now_ms: Millis,
    ) -> LoadRequest {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        let plan_version = self.plan_version;

        let state = self.tiers.entry(tier).or_default();
        state.pending = Some(PendingRequest {
            id,
            window,
            plan_version,
            cancelled: false,
            started_ms: now_ms,
        });
        state.deferred = None;
        state.last_start_ms = Some(now_ms);

        LoadRequest {
            id,
            tier,
            window,
            plan_version,
        }
    }
}
