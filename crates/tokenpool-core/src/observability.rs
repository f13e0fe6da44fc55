use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::domain::TokenState;
use crate::error::StoreError;
use crate::ports::{DocumentStore, ViewRef};

/// Number of tokens per monitor view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub todo: usize,
    pub locked: usize,
    pub done: usize,
    pub error: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.todo + self.locked + self.done + self.error
    }

    pub fn get(&self, state: TokenState) -> usize {
        match state {
            TokenState::Todo => self.todo,
            TokenState::Locked => self.locked,
            TokenState::Done => self.done,
            TokenState::Error => self.error,
        }
    }

    fn set(&mut self, state: TokenState, n: usize) {
        match state {
            TokenState::Todo => self.todo = n,
            TokenState::Locked => self.locked = n,
            TokenState::Done => self.done = n,
            TokenState::Error => self.error = n,
        }
    }
}

/// Query the four monitor views of `design_doc`.
pub async fn count_states(
    store: &dyn DocumentStore,
    design_doc: &str,
) -> Result<StateCounts, StoreError> {
    let mut counts = StateCounts::default();
    for state in TokenState::ALL {
        let view = ViewRef::in_design(design_doc, state.view_name());
        let n = store.view_ids(&view, None).await?.len();
        counts.set(state, n);
    }
    Ok(counts)
}

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, Task};
    use crate::impls::InMemoryStore;

    #[tokio::test]
    async fn counts_every_state() {
        let store = InMemoryStore::new();

        let todo = Task::with_id("todo");
        let mut locked = Task::with_id("locked");
        locked.lock();
        let mut done = Task::with_id("done");
        done.lock();
        done.exit_code = Some(0);
        done.done();
        let mut failed = Task::with_id("failed");
        failed.lock();
        failed.error("boom", None);

        for task in [todo, locked, done, failed] {
            store.insert(task.to_document().unwrap()).await.unwrap();
        }

        let counts = count_states(&store, "Monitor").await.unwrap();
        assert_eq!(
            counts,
            StateCounts {
                todo: 1,
                locked: 1,
                done: 1,
                error: 1
            }
        );
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.get(TokenState::Error), 1);
    }
}
