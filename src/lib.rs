pub mod boards;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fleet;
pub mod market;
pub mod monitoring;
pub mod oracle;
pub mod sourcing;

pub use engine::{AutonomousEngine, EngineBuilder};
pub use error::{DispatchError, Result};
