pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod runner;

pub use job::{ConversionJob, ConversionTask, JobOutcome, JobStatus};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings, MODELS_DIR};
pub use pool::WorkerPool;
pub use runner::JobRunner;
