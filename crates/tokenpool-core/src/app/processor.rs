use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::process::ProcessContext;
use crate::domain::Task;
use crate::error::ProcessError;

/// Caller-supplied task logic.
///
/// Only `process` is required. `prepare_env`/`cleanup_env` bracket the
/// whole run (`cleanup_env` runs on every exit path); `prepare_run`/
/// `cleanup_run` bracket each task.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn prepare_env(&self) -> Result<(), ProcessError> {
        Ok(())
    }

    async fn prepare_run(&self, _task: &mut Task) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Do the work. Set `exit_code`/`output`/attachments on `task`; an error
    /// is recorded into the task's error history.
    ///
    /// Runs on the loop's own task, so it must not block: the timeout and
    /// the shutdown signal can only take over at an `.await`. Blocking work
    /// belongs in `spawn_blocking` or [`ProcessContext::execute`].
    async fn process(&self, task: &mut Task, ctx: &ProcessContext) -> Result<(), ProcessError>;

    async fn cleanup_run(&self, _task: &mut Task) -> Result<(), ProcessError> {
        Ok(())
    }

    async fn cleanup_env(&self) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Adapts a synchronous closure into a [`TaskProcessor`].
///
/// The closure runs on tokio's blocking pool against a copy of the task,
/// which is written back once it returns. If the timeout or shutdown fires
/// first the closure keeps running detached and its changes are discarded.
pub struct FnProcessor<F> {
    f: Arc<F>,
}

impl<F> FnProcessor<F>
where
    F: Fn(&mut Task) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> TaskProcessor for FnProcessor<F>
where
    F: Fn(&mut Task) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    async fn process(&self, task: &mut Task, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let shared = Arc::new(Mutex::new(task.clone()));
        let write_back = WriteBack {
            task,
            shared: Arc::clone(&shared),
        };

        let f = Arc::clone(&self.f);
        let result = tokio::task::spawn_blocking(move || {
            let mut task = shared
                .lock()
                .map_err(|_| ProcessError::from("task state poisoned by an earlier panic"))?;
            f(&mut *task)
        })
        .await;
        drop(write_back);

        match result {
            Ok(result) => result,
            Err(join) => Err(join.into()),
        }
    }
}

/// Copies the closure's task back, unless the closure still holds it.
struct WriteBack<'a> {
    task: &'a mut Task,
    shared: Arc<Mutex<Task>>,
}

impl Drop for WriteBack<'_> {
    fn drop(&mut self) {
        if let Ok(done) = self.shared.try_lock() {
            *self.task = done.clone();
        }
    }
}
