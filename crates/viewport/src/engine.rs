use foundation::GeoWindow;

use crate::region::FeatureSet;
use crate::tier::ResolutionTier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Network or upstream failure mid-load. Recoverable: the scheduler
    /// retries on the next qualifying view event, never in a loop.
    Transient(String),
    /// The load exceeded the application-level timeout. Treated identically
    /// to a transient failure.
    TimedOut,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Transient(msg) => write!(f, "window load failed: {msg}"),
            EngineError::TimedOut => write!(f, "window load timed out"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Opaque geometry/attribute collaborator.
///
/// Accepts a resolution tier and an optional bounding window and returns a
/// structured feature collection, either raw geography or geography
/// annotated with a partition assignment (selected by `plan_version`).
/// Implementations must tolerate `window = None`, meaning "no windowing,
/// return everything", for tiers where windowing is not meaningful.
pub trait GeometryEngine: Send + Sync {
    fn fetch_features(
        &self,
        tier: ResolutionTier,
        window: Option<GeoWindow>,
        plan_version: u64,
    ) -> impl std::future::Future<Output = Result<FeatureSet, EngineError>> + Send;
}
