pub mod backoff;
pub mod processor;

pub use backoff::Backoff;
pub use processor::{DrainSummary, ProcessOutcome, Processor, ProcessorConfig};
