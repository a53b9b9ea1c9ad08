use serde::{Deserialize, Serialize};

/// Geographic resolution tiers, totally ordered by the zoom thresholds that
/// select them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    Coarse,
    Medium,
    Fine,
}

impl ResolutionTier {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionTier::Coarse => "coarse",
            ResolutionTier::Medium => "medium",
            ResolutionTier::Fine => "fine",
        }
    }
}

/// Fixed ascending zoom thresholds selecting a tier.
///
/// The mapping is a pure, monotonic step function: coarse below `medium_at`,
/// medium in `[medium_at, fine_at)`, fine at or above `fine_at`. The caller
/// debounces raw zoom noise; no time-based state lives here.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ZoomThresholds {
    pub medium_at: f64,
    pub fine_at: f64,
}

impl Default for ZoomThresholds {
    fn default() -> Self {
        Self {
            medium_at: 8.0,
            fine_at: 11.0,
        }
    }
}

impl ZoomThresholds {
    pub fn tier_for_zoom(&self, zoom: f64) -> ResolutionTier {
        if zoom < self.medium_at {
            ResolutionTier::Coarse
        } else if zoom < self.fine_at {
            ResolutionTier::Medium
        } else {
            ResolutionTier::Fine
        }
    }
}
