pub mod download;
pub mod interceptor;
pub mod range;
pub mod store;

pub use download::*;
pub use interceptor::*;
pub use range::*;
pub use store::*;
