//! RunActor: the pilot's main loop.
//!
//! ```text
//! loop:
//!   next_task (claim)  ──signal──▶ shut_down(None)
//!   run_task           ──signal──▶ shut_down(Some(task))
//!     prepare_run → process (timeout) → done → persist → cleanup_run
//!   scrub policy → stop function → max tasks → total time
//! ```
//!
//! The actor is the only owner of the task being worked on and of the child
//! process slot; the shutdown path reads both from here rather than from
//! process-global state.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::policy::{ResetValues, RunSummary, StopContext, StopPolicy, StopReason};
use super::process::{ChildSlot, ProcessContext};
use super::processor::TaskProcessor;
use super::shutdown::Shutdown;
use crate::domain::{Record, Task, TokenFields};
use crate::error::{ProcessError, RunError, StoreError};
use crate::iterators::{TaskIterator, TaskViewIterator};
use crate::ports::{DocumentStore, ViewRef, save_record};

pub const DEFAULT_CHILD_GRACE: Duration = Duration::from_secs(30);

pub struct RunActor {
    store: Arc<dyn DocumentStore>,
    iterator: Box<dyn TaskIterator>,
    processor: Arc<dyn TaskProcessor>,
    policy: StopPolicy,
    reset_values: Option<ResetValues>,
    child_grace: Duration,
    child: ChildSlot,
    shutdown: Option<Shutdown>,
    tasks_processed: u64,
    last_task_id: Option<String>,
}

impl RunActor {
    /// Actor claiming from the `Monitor/todo` view.
    pub fn new(store: Arc<dyn DocumentStore>, processor: Arc<dyn TaskProcessor>) -> Self {
        let iterator = TaskViewIterator::new(Arc::clone(&store), ViewRef::new("todo"));
        Self {
            store,
            iterator: Box::new(iterator),
            processor,
            policy: StopPolicy::default(),
            reset_values: Some(ResetValues::default()),
            child_grace: DEFAULT_CHILD_GRACE,
            child: ChildSlot::new(),
            shutdown: None,
            tasks_processed: 0,
            last_task_id: None,
        }
    }

    pub fn with_iterator(mut self, iterator: impl TaskIterator + 'static) -> Self {
        self.iterator = Box::new(iterator);
        self
    }

    pub fn with_view(mut self, view: ViewRef) -> Self {
        self.iterator = Box::new(TaskViewIterator::new(Arc::clone(&self.store), view));
        self
    }

    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Values written to lock/done of the current task on shutdown. `None`
    /// leaves the task untouched.
    pub fn with_reset_values(mut self, reset: Option<ResetValues>) -> Self {
        self.reset_values = reset;
        self
    }

    pub fn with_child_grace(mut self, grace: Duration) -> Self {
        self.child_grace = grace;
        self
    }

    /// Use an explicit shutdown source instead of OS signal handlers.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed
    }

    pub fn child_slot(&self) -> ChildSlot {
        self.child.clone()
    }

    /// Consume the iterator until a stop condition, exhaustion or a signal.
    ///
    /// `cleanup_env` runs on every exit path. Without an explicit
    /// [`Shutdown`], SIGTERM/SIGINT handlers are installed; only one actor
    /// per process may do that.
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        let shutdown = match &self.shutdown {
            Some(shutdown) => shutdown.clone(),
            None => {
                info!("setting up signal handlers");
                let shutdown = Shutdown::from_os_signals()?;
                self.shutdown = Some(shutdown.clone());
                shutdown
            }
        };

        let started = Instant::now();
        let deadline = self.policy.max_total_time.map(|limit| started + limit);
        if let Some(deadline) = deadline {
            // 待機中の iterator も締め切りで止まるように
            let installed = self
                .iterator
                .set_stop_callback(Arc::new(move || Instant::now() >= deadline));
            debug!(installed, "total time limit installed on iterator");
        }

        let result = match self.processor.prepare_env().await {
            Ok(()) => self.drive(shutdown, started, deadline).await,
            Err(source) => Err(RunError::Hook {
                hook: "prepare_env",
                source,
            }),
        };

        if let Err(err) = self.processor.cleanup_env().await {
            warn!(error = %err, "cleanup_env failed");
        }

        let stop_reason = result?;
        info!(
            tasks_processed = self.tasks_processed,
            ?stop_reason,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "run finished"
        );
        Ok(RunSummary {
            tasks_processed: self.tasks_processed,
            stop_reason,
            last_task_id: self.last_task_id.clone(),
        })
    }

    async fn drive(
        &mut self,
        mut shutdown: Shutdown,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<StopReason, RunError> {
        let past_deadline = || deadline.is_some_and(|d| Instant::now() >= d);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                next = self.iterator.next_task() => Some(next),
            };
            let Some(next) = next else {
                return self.shut_down(None).await;
            };
            let Some(mut task) = next? else {
                if past_deadline() {
                    return Ok(StopReason::MaxTotalTime);
                }
                // 停止していない iterator の None は claim 競合
                if !self.iterator.is_stopped() {
                    warn!("claim attempts exhausted by other pilots, stopping");
                    return Ok(StopReason::Contention);
                }
                info!("no more tasks");
                return Ok(StopReason::Exhausted);
            };

            info!(task_id = task.id(), "processing task");
            self.last_task_id = Some(task.id().to_string());

            let finished = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                result = self.run_task(&mut task) => Some(result),
            };
            match finished {
                Some(result) => result?,
                None => return self.shut_down(Some(task)).await,
            }

            if self.policy.should_scrub(&task) {
                info!(
                    task_id = task.id(),
                    scrub_count = task.scrub_count(),
                    "scrubbing task"
                );
                task.scrub();
                self.persist(&mut task).await?;
            }

            let ctx = StopContext {
                task: &task,
                tasks_processed: self.tasks_processed,
                elapsed: started.elapsed(),
            };
            if self.policy.stop_function.as_ref().is_some_and(|stop| stop(&ctx)) {
                info!(task_id = task.id(), "stop function requested stop");
                return Ok(StopReason::StopFunction);
            }
            if self.policy.max_tasks_reached(self.tasks_processed) {
                info!(tasks_processed = self.tasks_processed, "max tasks reached");
                return Ok(StopReason::MaxTasks);
            }
            if past_deadline() {
                info!("max total time exceeded");
                return Ok(StopReason::MaxTotalTime);
            }
        }
    }

    async fn run_task(&mut self, task: &mut Task) -> Result<(), RunError> {
        let task_id = task.id().to_string();

        match self.processor.prepare_run(task).await {
            Ok(()) => self.process(task, &task_id).await,
            Err(err) => {
                warn!(%task_id, error = %err, "prepare_run failed, skipping processing");
                record_failure(task, "prepare_run failed", &err);
            }
        }

        if task.done_time() == 0 {
            task.done();
        }
        self.persist(task).await?;

        if let Err(err) = self.processor.cleanup_run(task).await {
            warn!(%task_id, error = %err, "cleanup_run failed");
        }
        self.tasks_processed += 1;
        Ok(())
    }

    async fn process(&self, task: &mut Task, task_id: &str) {
        let ctx = ProcessContext::new(self.child.clone());
        let result = match self.policy.max_token_time {
            Some(limit) => {
                match tokio::time::timeout(limit, self.processor.process(task, &ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            task_id,
                            limit_secs = limit.as_secs_f64(),
                            "task execution exceeded timeout limit"
                        );
                        return;
                    }
                }
            }
            None => self.processor.process(task, &ctx).await,
        };

        if let Err(err) = result {
            warn!(task_id, error = %err, "task processing failed");
            record_failure(task, "processing failed", &err);
        }
    }

    /// Save, overwriting concurrent changes on conflict and reconnecting
    /// once on connection loss. Anything else is fatal.
    async fn persist(&mut self, task: &mut Task) -> Result<(), StoreError> {
        match save_record(self.store.as_ref(), task).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict(id)) => {
                // 処理結果を優先して上書きする
                warn!(task_id = %id, "revision conflict on save, overwriting with local result");
                let latest = self.store.get(&id).await?;
                let rev = latest.rev().ok_or_else(|| {
                    StoreError::Other(format!("stored document {id} has no revision"))
                })?;
                task.set_rev(rev);
                save_record(self.store.as_ref(), task).await
            }
            Err(StoreError::ConnectionLost(reason)) => {
                warn!(task_id = task.id(), %reason, "connection lost on save, reconnecting");
                self.reconnect().await?;
                save_record(self.store.as_ref(), task)
                    .await
                    .inspect_err(|err| error!(task_id = task.id(), error = %err, "save failed after reconnect"))
            }
            Err(err) => {
                error!(task_id = task.id(), error = %err, "failed to save task");
                Err(err)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        self.store = self.store.copy().await?;
        self.iterator.reconnect(Arc::clone(&self.store));
        Ok(())
    }

    async fn shut_down(&mut self, current: Option<Task>) -> Result<StopReason, RunError> {
        info!("shutting down on signal");
        self.child.terminate(self.child_grace).await;

        if let (Some(mut task), Some(reset)) = (current, self.reset_values) {
            info!(
                task_id = task.id(),
                lock = reset.lock,
                done = reset.done,
                "resetting current task"
            );
            task.scrub();
            task.set_lock_time(reset.lock);
            task.set_done_time(reset.done);
            self.persist(&mut task).await?;
        }
        Ok(StopReason::Signal)
    }
}

fn record_failure(task: &mut Task, context: &str, err: &ProcessError) {
    let source: &(dyn StdError + 'static) = &**err;
    task.error(format!("{context}: {err}"), Some(source));
}
