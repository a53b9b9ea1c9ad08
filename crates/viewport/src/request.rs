/// Identifies a window load request in a deterministic, stable way.
///
/// Ids are handed out monotonically by the scheduler; a result whose id no
/// longer matches the tier's current pending request is stale and inert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);
