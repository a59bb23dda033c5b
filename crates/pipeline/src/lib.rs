pub mod error;
pub mod orchestrator;
pub mod progress;

pub use error::PipelineError;
pub use orchestrator::{Orchestrator, PipelineConfig, RunOptions, RunResult};
pub use progress::{FileLedger, MemoryLedger, ProgressLedger, ProgressTracker};
