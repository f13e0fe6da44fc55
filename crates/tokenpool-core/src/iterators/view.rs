use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::TaskIterator;
use crate::claim::{Claim, ClaimOptions, claim};
use crate::domain::Task;
use crate::error::StoreError;
use crate::ports::{DocumentStore, ViewRef};

/// Claims from a single view, one claim per pull.
///
/// An empty view stops the iterator. Exhausted claim attempts end the
/// current pull but leave the iterator running.
pub struct TaskViewIterator {
    store: Arc<dyn DocumentStore>,
    view: ViewRef,
    opts: ClaimOptions,
    stopped: bool,
}

impl TaskViewIterator {
    pub fn new(store: Arc<dyn DocumentStore>, view: ViewRef) -> Self {
        Self {
            store,
            view,
            opts: ClaimOptions::default(),
            stopped: false,
        }
    }

    pub fn with_options(mut self, opts: ClaimOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn view(&self) -> &ViewRef {
        &self.view
    }
}

#[async_trait]
impl TaskIterator for TaskViewIterator {
    async fn next_task(&mut self) -> Result<Option<Task>, StoreError> {
        if self.stopped {
            return Ok(None);
        }
        match claim(self.store.as_ref(), &self.view, self.opts).await? {
            Claim::Claimed(task) => Ok(Some(task)),
            Claim::NoWork => {
                self.stopped = true;
                Ok(None)
            }
            Claim::Exhausted { attempts } => {
                warn!(view = %self.view, attempts, "could not claim a task");
                Ok(None)
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn reset(&mut self) {
        self.stopped = false;
    }

    fn reconnect(&mut self, store: Arc<dyn DocumentStore>) {
        self.store = store;
    }
}
