//! Producer and sweep helpers that run outside the pilot loop.

use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{Record, Task};
use crate::domain::state::now_secs;
use crate::error::StoreError;
use crate::ports::{DocumentStore, ViewRef};

/// Insert new tasks in one batch. Accepted tasks adopt their revision;
/// the ids of the accepted ones are returned. Duplicates are rejected by
/// the store and skipped.
pub async fn push_tasks(
    store: &dyn DocumentStore,
    tasks: &mut [Task],
) -> Result<Vec<String>, StoreError> {
    let docs = tasks
        .iter()
        .map(Task::to_document)
        .collect::<Result<Vec<_>, _>>()?;
    let results = store.save_batch(&docs).await?;

    let mut accepted = Vec::with_capacity(results.len());
    for (task, result) in tasks.iter_mut().zip(results) {
        match (result.accepted, result.rev) {
            (true, Some(rev)) => {
                task.set_rev(rev);
                accepted.push(result.id);
            }
            _ => warn!(task_id = %result.id, "task rejected by the store"),
        }
    }
    info!(pushed = accepted.len(), requested = tasks.len(), "pushed tasks");
    Ok(accepted)
}

/// Requeue tasks of `view` that have been locked longer than `max_age`.
///
/// A zero `max_age` requeues every task in the view. Returns how many were
/// written back.
pub async fn reset_locked(
    store: &dyn DocumentStore,
    view: &ViewRef,
    max_age: Duration,
) -> Result<usize, StoreError> {
    let now = now_secs();
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);

    let mut docs = Vec::new();
    for doc in store.get_from_view(view).await? {
        let mut task = Task::from_document(doc)?;
        let age = now - task.lock_time();
        if max_age == 0 || age > max_age {
            task.requeue();
            docs.push(task.to_document()?);
        }
    }
    if docs.is_empty() {
        return Ok(0);
    }

    let results = store.save_batch(&docs).await?;
    let reset = results.iter().filter(|r| r.accepted).count();
    info!(%view, reset, candidates = docs.len(), "reset locked tasks");
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Document, TokenFields, TokenState};
    use crate::impls::InMemoryStore;

    #[tokio::test]
    async fn push_rejects_duplicates() {
        let store = InMemoryStore::new();
        let mut first = vec![Task::with_id("a"), Task::with_id("b")];
        let ids = push_tasks(&store, &mut first).await.unwrap();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(first.iter().all(|t| t.rev().is_some()));

        let mut again = vec![Task::with_id("a"), Task::with_id("c")];
        let ids = push_tasks(&store, &mut again).await.unwrap();
        assert_eq!(ids, vec!["c"]);
        assert!(again[0].rev().is_none());
    }

    async fn locked_at(store: &InMemoryStore, id: &str, lock: i64) {
        let mut task = Task::with_id(id);
        task.lock();
        task.set_lock_time(lock);
        task.exit_code = Some(1);
        task.put_attachment("log.txt", "partial", None);
        store.insert(task.to_document().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn only_stale_locks_are_reset() {
        let store = InMemoryStore::new();
        let now = now_secs();
        locked_at(&store, "stale", now - 7200).await;
        locked_at(&store, "fresh", now - 10).await;

        let reset = reset_locked(&store, &ViewRef::new("locked"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let stale = Task::from_document(store.document("stale").await.unwrap()).unwrap();
        assert_eq!(stale.state(), Some(TokenState::Todo));
        assert_eq!(stale.scrub_count(), 1);
        assert_eq!(stale.hostname(), "");
        assert_eq!(stale.exit_code, None);
        assert!(stale.attachment("log.txt").is_none());

        let fresh = Task::from_document(store.document("fresh").await.unwrap()).unwrap();
        assert_eq!(fresh.state(), Some(TokenState::Locked));
    }

    #[tokio::test]
    async fn zero_age_resets_everything() {
        let store = InMemoryStore::new();
        let now = now_secs();
        locked_at(&store, "a", now).await;
        locked_at(&store, "b", now - 5).await;

        let reset = reset_locked(&store, &ViewRef::new("locked"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(reset, 2);

        let todo: Vec<Document> = store.get_from_view(&ViewRef::new("todo")).await.unwrap();
        assert_eq!(todo.len(), 2);
    }
}
