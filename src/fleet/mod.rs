pub mod registry;

pub use registry::{AutomationLevel, PerformanceMetrics, Worker, WorkerRegistry};
