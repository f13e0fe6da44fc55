//! Stop and retry policy for [`RunActor`](super::RunActor).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Task;

/// Lock/done values written to the current task on shutdown.
///
/// `(0, 0)` returns it to todo; anything else marks it as interrupted in a
/// way the caller's views can pick out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResetValues {
    pub lock: i64,
    pub done: i64,
}

impl ResetValues {
    pub fn new(lock: i64, done: i64) -> Self {
        Self { lock, done }
    }
}

/// What a stop function gets to look at after each task.
#[derive(Debug)]
pub struct StopContext<'a> {
    pub task: &'a Task,
    pub tasks_processed: u64,
    pub elapsed: Duration,
}

pub type StopFunction = Box<dyn Fn(&StopContext<'_>) -> bool + Send + Sync>;

/// Bounds and predicates evaluated by the run loop.
///
/// Checked after every task, in this order: scrub, stop function, task
/// count, total time.
#[derive(Default)]
pub struct StopPolicy {
    /// Wall-clock budget for one task's processing.
    pub max_token_time: Option<Duration>,

    /// Budget for the whole run.
    pub max_total_time: Option<Duration>,

    /// Stop after this many tasks. `None` and `Some(0)` mean unbounded.
    pub max_tasks: Option<u64>,

    /// Failed tasks are returned to todo while `scrub_count < max_scrub`.
    pub max_scrub: u32,

    pub stop_function: Option<StopFunction>,
}

impl StopPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_token_time(mut self, limit: Duration) -> Self {
        self.max_token_time = Some(limit);
        self
    }

    pub fn with_max_total_time(mut self, limit: Duration) -> Self {
        self.max_total_time = Some(limit);
        self
    }

    pub fn with_max_tasks(mut self, limit: u64) -> Self {
        self.max_tasks = Some(limit);
        self
    }

    pub fn with_max_scrub(mut self, limit: u32) -> Self {
        self.max_scrub = limit;
        self
    }

    pub fn with_stop_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&StopContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.stop_function = Some(Box::new(f));
        self
    }

    /// A task that did not succeed goes back to todo until it has been
    /// scrubbed `max_scrub` times.
    pub fn should_scrub(&self, task: &Task) -> bool {
        task.scrub_count() < self.max_scrub && task.exit_code != Some(0)
    }

    pub(crate) fn max_tasks_reached(&self, processed: u64) -> bool {
        matches!(self.max_tasks, Some(limit) if limit > 0 && processed >= limit)
    }
}

impl fmt::Debug for StopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopPolicy")
            .field("max_token_time", &self.max_token_time)
            .field("max_total_time", &self.max_total_time)
            .field("max_tasks", &self.max_tasks)
            .field("max_scrub", &self.max_scrub)
            .field("stop_function", &self.stop_function.is_some())
            .finish()
    }
}

/// Why [`RunActor::run`](super::RunActor::run) returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The iterator ran out of tasks.
    Exhausted,
    /// Tasks were left, but every claim attempt lost to other pilots.
    Contention,
    StopFunction,
    MaxTasks,
    MaxTotalTime,
    /// SIGTERM / SIGINT (or an injected shutdown trigger).
    Signal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks_processed: u64,
    pub stop_reason: StopReason,
    pub last_task_id: Option<String>,
}
