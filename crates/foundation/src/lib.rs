pub mod bounds;
pub mod time;

// Foundation crate: small, well-tested primitives only.
pub use bounds::*;
pub use time::*;
