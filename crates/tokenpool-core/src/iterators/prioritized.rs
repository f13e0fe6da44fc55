use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::TaskIterator;
use crate::claim::{Claim, ClaimOptions, claim};
use crate::domain::Task;
use crate::error::StoreError;
use crate::ports::{DocumentStore, ViewRef};

/// Claims from `high` whenever it has rows, from `low` otherwise.
///
/// The low view is only consulted after the high view came back empty in
/// the same pull. The iterator stops once both are empty.
pub struct PrioritizedViewIterator {
    store: Arc<dyn DocumentStore>,
    high: ViewRef,
    low: ViewRef,
    opts: ClaimOptions,
    stopped: bool,
}

impl PrioritizedViewIterator {
    pub fn new(store: Arc<dyn DocumentStore>, high: ViewRef, low: ViewRef) -> Self {
        Self {
            store,
            high,
            low,
            opts: ClaimOptions::default(),
            stopped: false,
        }
    }

    pub fn with_options(mut self, opts: ClaimOptions) -> Self {
        self.opts = opts;
        self
    }
}

#[async_trait]
impl TaskIterator for PrioritizedViewIterator {
    async fn next_task(&mut self) -> Result<Option<Task>, StoreError> {
        if self.stopped {
            return Ok(None);
        }

        let view = match claim(self.store.as_ref(), &self.high, self.opts).await? {
            Claim::Claimed(task) => return Ok(Some(task)),
            Claim::Exhausted { attempts } => {
                warn!(view = %self.high, attempts, "could not claim a high priority task");
                return Ok(None);
            }
            Claim::NoWork => {
                debug!(high = %self.high, low = %self.low, "high priority view empty");
                &self.low
            }
        };

        match claim(self.store.as_ref(), view, self.opts).await? {
            Claim::Claimed(task) => Ok(Some(task)),
            Claim::NoWork => {
                self.stopped = true;
                Ok(None)
            }
            Claim::Exhausted { attempts } => {
                warn!(%view, attempts, "could not claim a task");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Document, Record};
    use crate::impls::InMemoryStore;
    use serde_json::json;

    /// `todo` split by the `priority` input flag.
    async fn store_with(tasks: &[(&str, bool)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for (prio, wanted) in [("todo_high", true), ("todo_low", false)] {
            store
                .register_view(ViewRef::in_design("Prio", prio), move |doc: &Document| {
                    let high = doc
                        .get("input")
                        .and_then(|input| input.get("priority"))
                        .and_then(|p| p.as_bool())
                        .unwrap_or(false);
                    high == wanted
                        && doc.int_field("lock").unwrap_or(0) == 0
                        && doc.int_field("done").unwrap_or(0) == 0
                })
                .await;
        }
        for (id, high) in tasks {
            let task = Task::with_id(*id).with_input(json!({"priority": high}));
            store.insert(task.to_document().unwrap()).await.unwrap();
        }
        store
    }

    fn iterator(store: &InMemoryStore) -> PrioritizedViewIterator {
        PrioritizedViewIterator::new(
            Arc::new(store.clone()),
            ViewRef::in_design("Prio", "todo_high"),
            ViewRef::in_design("Prio", "todo_low"),
        )
    }

    #[tokio::test]
    async fn high_priority_is_drained_first() {
        let store = store_with(&[("l1", false), ("h1", true), ("l2", false), ("h2", true)]).await;
        let mut it = iterator(&store);

        let mut order = Vec::new();
        while let Some(task) = it.next_task().await.unwrap() {
            order.push(task.id().to_string());
        }

        assert_eq!(order.len(), 4);
        assert!(order[..2].iter().all(|id| id.starts_with('h')));
        assert!(order[2..].iter().all(|id| id.starts_with('l')));
        assert!(it.is_stopped());
    }

    #[tokio::test]
    async fn low_only_pool_is_served() {
        let store = store_with(&[("l1", false)]).await;
        let mut it = iterator(&store);

        assert_eq!(it.next_task().await.unwrap().unwrap().id(), "l1");
        assert!(it.next_task().await.unwrap().is_none());
        assert!(it.is_stopped());
    }

    #[tokio::test]
    async fn empty_pool_stops_immediately() {
        let store = store_with(&[]).await;
        let mut it = iterator(&store);
        assert!(it.next_task().await.unwrap().is_none());
        assert!(it.is_stopped());
    }
}
