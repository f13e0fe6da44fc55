//! Domain model (records, lifecycle state, batch job ids).

pub mod attachment;
pub mod batch_job;
pub mod document;
pub mod job;
pub mod state;
pub mod task;

pub use attachment::{Attachment, guess_content_type};
pub use batch_job::{BatchJob, Scheduler};
pub use document::{Document, Record, Revision};
pub use job::Job;
pub use state::{ERROR_SENTINEL, Stamp, TokenFields, TokenState, transition};
pub use task::{ErrorEntry, Task};
