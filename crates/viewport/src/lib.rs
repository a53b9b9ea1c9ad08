pub mod engine;
pub mod region;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod tier;

pub use engine::*;
pub use region::*;
pub use request::*;
pub use scheduler::*;
pub use service::*;
pub use tier::*;
