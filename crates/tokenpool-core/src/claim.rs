//! Claim protocol: take one todo task out of a view without locks.
//!
//! Each attempt picks a random id among the first `window` rows of the view,
//! locks it locally and writes it back with the revision it was read at. The
//! store's compare-and-swap lets at most one concurrent claimant win; the
//! losers see a conflict and try again with a fresh pick.

use tracing::{debug, warn};

use crate::domain::{Record, Task, TokenState};
use crate::error::StoreError;
use crate::ports::{DocumentStore, ViewRef, save_record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Number of view rows the random pick is drawn from.
    pub window: usize,

    pub max_attempts: u32,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            window: 100,
            max_attempts: 10,
        }
    }
}

/// Result of one claim call.
#[derive(Debug)]
pub enum Claim {
    /// Locked and saved; the task carries the new revision.
    Claimed(Task),

    /// The view is empty.
    NoWork,

    /// There was work, but every attempt lost to another writer.
    Exhausted { attempts: u32 },
}

impl Claim {
    pub fn into_task(self) -> Option<Task> {
        match self {
            Claim::Claimed(task) => Some(task),
            Claim::NoWork | Claim::Exhausted { .. } => None,
        }
    }
}

/// Claim one task from `view`.
///
/// `NoWork` is returned as soon as the view comes back empty. Conflicts and
/// rows that vanished or were locked since the query are retried up to
/// `max_attempts` times. Any other store failure is returned as an error.
pub async fn claim(
    store: &dyn DocumentStore,
    view: &ViewRef,
    opts: ClaimOptions,
) -> Result<Claim, StoreError> {
    let window = opts.window.max(1);

    for attempt in 1..=opts.max_attempts {
        let doc = match store.get_one_from_view(view, window).await {
            Ok(doc) => doc,
            Err(StoreError::NoResults(_)) => {
                debug!(%view, "no work available");
                return Ok(Claim::NoWork);
            }
            Err(StoreError::NotFound(id)) => {
                debug!(%view, attempt, task_id = %id, "row vanished before fetch, retrying");
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut task = Task::from_document(doc)?;

        // view が古い可能性がある: 既に他の pilot が lock 済みなら conflict 扱い
        if task.state() != Some(TokenState::Todo) {
            debug!(%view, attempt, task_id = task.id(), "row already claimed, retrying");
            continue;
        }

        task.lock();
        match save_record(store, &mut task).await {
            Ok(()) => {
                debug!(%view, attempt, task_id = task.id(), "claimed task");
                return Ok(Claim::Claimed(task));
            }
            Err(StoreError::Conflict(id)) => {
                debug!(%view, attempt, task_id = %id, "lost claim race, retrying");
            }
            Err(err) => return Err(err),
        }
    }

    warn!(%view, attempts = opts.max_attempts, "claim attempts exhausted");
    Ok(Claim::Exhausted {
        attempts: opts.max_attempts,
    })
}
