use foundation::{GeoWindow, Millis};
use serde_json::Value;

use crate::request::RequestId;

/// Opaque feature collection returned by the geometry/attribute engine.
///
/// The payload is deliberately untyped; geometry and partition attribution
/// are the engine's business, this subsystem only moves them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub features: Value,
}

impl FeatureSet {
    pub fn new(features: Value) -> Self {
        Self { features }
    }

    pub fn empty() -> Self {
        Self {
            features: Value::Null,
        }
    }
}

/// The single window the most recently completed load covers for a tier,
/// plus the data it returned.
///
/// Owned exclusively by the scheduler; updated only on successful load
/// completion. `plan_version` records the assignment state the data was
/// fetched under, so a content change invalidates coverage without touching
/// the bounds machinery.
#[derive(Debug, Clone)]
pub struct LoadedRegion {
    pub window: GeoWindow,
    pub features: FeatureSet,
    pub plan_version: u64,
}

/// At most one outstanding request descriptor per tier.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: RequestId,
    pub window: GeoWindow,
    pub plan_version: u64,
    pub cancelled: bool,
    pub started_ms: Millis,
}

/// A load that is desired but delayed to coalesce rapid viewport events.
///
/// Later events replace the target window (last-write-wins); the fire time
/// is set once when the deferral begins.
#[derive(Debug, Clone)]
pub struct DeferredLoad {
    pub window: GeoWindow,
    pub fire_at_ms: Millis,
    pub generation: u64,
}
