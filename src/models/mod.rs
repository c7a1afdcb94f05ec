pub mod queue_entry;

pub use queue_entry::{Classification, EnqueueOptions, EntryStatus, EntryUpdate, QueueEntry};
