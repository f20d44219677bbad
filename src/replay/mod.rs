//! Record-replay orchestration

mod engine;
mod inflight;

pub use engine::{EngineStats, Outcome, RecordReplay};
pub use inflight::{InFlight, InFlightGuard};
