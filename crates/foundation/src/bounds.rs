/// Axis-aligned geographic bounding windows, in degrees.
///
/// Windows are plain values: padding and other derivations produce new
/// windows, never in-place mutation. Callers guarantee `west <= east` and
/// `south <= north`; a violated ordering is a caller bug, not a runtime
/// fault, so the predicates stay total.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoWindow {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// Default tolerance absorbing floating-point jitter from projection math.
pub const EPSILON_DEG: f64 = 1e-4;

impl GeoWindow {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// True iff `self` is fully contained in `outer` expanded outward by
    /// `eps` on every side.
    ///
    /// Forgiving by convention: right on the edge still counts as inside, so
    /// coverage checks err toward *not* reloading.
    pub fn within(&self, outer: &GeoWindow, eps: f64) -> bool {
        self.west >= outer.west - eps
            && self.east <= outer.east + eps
            && self.south >= outer.south - eps
            && self.north <= outer.north + eps
    }

    /// True iff `self` extends beyond `loaded` by strictly more than `eps`
    /// on any side.
    ///
    /// Strict by convention: this is the post-settle reload trigger and errs
    /// toward reloading. Not the logical negation of [`within`]; the two
    /// apply `eps` independently.
    ///
    /// [`within`]: GeoWindow::within
    pub fn exceeds(&self, loaded: &GeoWindow, eps: f64) -> bool {
        self.west < loaded.west - eps
            || self.east > loaded.east + eps
            || self.south < loaded.south - eps
            || self.north > loaded.north + eps
    }

    /// True iff `self` (the raw, unpadded viewport) has crossed outside
    /// `padded` shrunk *inward* by `eps`.
    ///
    /// Opposite sign convention from [`within`]: the padded window already
    /// includes preload slack, so the trigger fires a little early, before
    /// the viewport reaches the strict edge.
    ///
    /// [`within`]: GeoWindow::within
    pub fn outside_padded(&self, padded: &GeoWindow, eps: f64) -> bool {
        self.west < padded.west + eps
            || self.east > padded.east - eps
            || self.south < padded.south + eps
            || self.north > padded.north - eps
    }

    /// True iff `self` (an in-flight request window) already covers `other`
    /// within `eps` slack. Used for in-flight deduplication.
    pub fn covers(&self, other: &GeoWindow, eps: f64) -> bool {
        other.west >= self.west - eps
            && other.east <= self.east + eps
            && other.south >= self.south - eps
            && other.north <= self.north + eps
    }

    /// Symmetric expansion by `fraction` of each dimension per side.
    ///
    /// `padded(0.5)` preloads half a viewport of slack in every direction.
    /// Padding never shrinks coverage: `w.within(&w.padded(f), eps)` holds
    /// for any `f >= 0`.
    pub fn padded(&self, fraction: f64) -> GeoWindow {
        let dx = self.width() * fraction;
        let dy = self.height() * fraction;
        GeoWindow {
            west: self.west - dx,
            south: self.south - dy,
            east: self.east + dx,
            north: self.north + dy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EPSILON_DEG, GeoWindow};

    const EPS: f64 = EPSILON_DEG;

    fn win(west: f64, south: f64, east: f64, north: f64) -> GeoWindow {
        GeoWindow::new(west, south, east, north)
    }

    #[test]
    fn within_is_forgiving_at_the_edge() {
        let loaded = win(-10.0, -10.0, 10.0, 10.0);

        assert!(win(-5.0, -5.0, 5.0, 5.0).within(&loaded, EPS));
        // Sticking out by less than eps still counts as inside.
        assert!(win(-10.0 - EPS / 2.0, -5.0, 5.0, 5.0).within(&loaded, EPS));
        // Sticking out by more than eps does not.
        assert!(!win(-10.0 - 2.0 * EPS, -5.0, 5.0, 5.0).within(&loaded, EPS));
    }

    #[test]
    fn exceeds_is_strict() {
        let loaded = win(-10.0, -10.0, 10.0, 10.0);

        assert!(!win(-10.0, -10.0, 10.0, 10.0).exceeds(&loaded, EPS));
        assert!(!win(-10.0 - EPS / 2.0, -10.0, 10.0, 10.0).exceeds(&loaded, EPS));
        assert!(win(-10.0 - 2.0 * EPS, -10.0, 10.0, 10.0).exceeds(&loaded, EPS));
        assert!(win(-10.0, -10.0, 10.0, 10.0 + 2.0 * EPS).exceeds(&loaded, EPS));
    }

    #[test]
    fn outside_padded_fires_early() {
        let padded = win(-15.0, -15.0, 15.0, 15.0);

        // Comfortably interior: no trigger.
        assert!(!win(-10.0, -10.0, 10.0, 10.0).outside_padded(&padded, EPS));
        // Touching the padded edge exactly: the inward eps makes this fire
        // before the strict edge is reached.
        assert!(win(-15.0, -10.0, 10.0, 10.0).outside_padded(&padded, EPS));
        // Just inside the inward margin: no trigger.
        assert!(!win(-15.0 + 2.0 * EPS, -10.0, 10.0, 10.0).outside_padded(&padded, EPS));
    }

    #[test]
    fn covers_allows_eps_slack() {
        let request = win(0.0, 0.0, 10.0, 10.0);
        assert!(request.covers(&win(1.0, 1.0, 9.0, 9.0), EPS));
        assert!(request.covers(&win(-EPS / 2.0, 0.0, 10.0, 10.0), EPS));
        assert!(!request.covers(&win(-1.0, 0.0, 10.0, 10.0), EPS));
    }

    #[test]
    fn padding_never_shrinks_coverage() {
        let windows = [
            win(-122.6, 37.2, -121.8, 38.0),
            win(0.0, 0.0, 0.001, 0.001),
            win(-180.0, -90.0, 180.0, 90.0),
        ];
        for w in windows {
            for fraction in [0.0, 0.1, 0.5, 2.0] {
                let p = w.padded(fraction);
                assert!(w.within(&p, EPS), "{w:?} not within padded({fraction})");
            }
        }
    }

    #[test]
    fn padded_expands_symmetrically() {
        let w = win(0.0, 0.0, 10.0, 4.0);
        let p = w.padded(0.5);
        assert_eq!(p, win(-5.0, -2.0, 15.0, 6.0));
    }
}
