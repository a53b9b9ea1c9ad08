/// Millisecond timestamps for deterministic scheduling.
///
/// The scheduler never reads a wall clock; callers supply `Millis` values so
/// event sequences replay identically in tests.
pub type Millis = u64;
