pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorConfig, Submission, SubmissionOutcome};
