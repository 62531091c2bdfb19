//! Seams between the orchestrator and the outside world.

pub mod adapter;
pub mod clock;

pub use adapter::ServiceAdapter;
pub use clock::{Clock, ManualClock, SystemClock};
