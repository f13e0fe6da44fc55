//! In-memory document store.
//!
//! 開発・テスト用の実装。Revisions are `N-<ulid>` where `N` counts the
//! writes to that document. Views are plain predicates evaluated over every
//! stored document; rows come back in id order.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::{Document, Revision, TokenState};
use crate::error::StoreError;
use crate::ports::{BatchSaveResult, DocumentStore, ViewRef};

pub type ViewPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Failure injected into the next `save` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    Conflict,
    ConnectionLost,
    Other,
}

impl InjectedFault {
    fn into_error(self, id: &str) -> StoreError {
        match self {
            InjectedFault::Conflict => StoreError::Conflict(id.to_string()),
            InjectedFault::ConnectionLost => {
                StoreError::ConnectionLost(format!("injected while saving {id}"))
            }
            InjectedFault::Other => StoreError::Other(format!("injected failure saving {id}")),
        }
    }
}

struct StoreState {
    docs: BTreeMap<String, Document>,
    views: HashMap<ViewRef, ViewPredicate>,
    save_faults: VecDeque<InjectedFault>,
    connections: usize,
    writes: usize,
}

impl StoreState {
    fn new() -> Self {
        let mut state = Self {
            docs: BTreeMap::new(),
            views: HashMap::new(),
            save_faults: VecDeque::new(),
            connections: 1,
            writes: 0,
        };
        for token_state in TokenState::ALL {
            let predicate: ViewPredicate =
                Arc::new(move |doc: &Document| classify(doc) == Some(token_state));
            state
                .views
                .insert(ViewRef::new(token_state.view_name()), predicate);
        }
        state
    }

    /// Compare-and-swap write. An existing document must be written at its
    /// current revision; a new one must come without a revision.
    fn commit(&mut self, mut doc: Document) -> Result<(String, Revision), StoreError> {
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Ulid::new().to_string().to_lowercase();
                doc.set_id(id.clone());
                id
            }
        };

        let current = self.docs.get(&id).and_then(Document::rev);
        let generation = match (current, doc.rev()) {
            (None, None) => 0,
            (Some(current), Some(given)) if current == given => generation_of(&current),
            _ => return Err(StoreError::Conflict(id)),
        };

        let rev = next_revision(generation);
        doc.set_rev(&rev);
        self.docs.insert(id.clone(), doc);
        self.writes += 1;
        Ok((id, rev))
    }
}

/// Shared in-memory database. Clones and [`copy`](DocumentStore::copy)
/// handles all see the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store with the `Monitor` views (`todo`, `locked`, `done`,
    /// `error`) registered.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new())),
        }
    }

    pub async fn register_view<F>(&self, view: ViewRef, predicate: F)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        state.views.insert(view, Arc::new(predicate));
    }

    /// Seed a document, bypassing the revision check. Not counted as a write.
    pub async fn insert(&self, mut doc: Document) -> Result<Revision, StoreError> {
        let id = doc
            .id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Other("seeded document has no _id".to_string()))?;
        let mut state = self.state.lock().await;
        let generation = state
            .docs
            .get(&id)
            .and_then(Document::rev)
            .map_or(0, |rev| generation_of(&rev));
        let rev = next_revision(generation);
        doc.set_rev(&rev);
        state.docs.insert(id, doc);
        Ok(rev)
    }

    pub async fn document(&self, id: &str) -> Option<Document> {
        self.state.lock().await.docs.get(id).cloned()
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.state.lock().await.docs.values().cloned().collect()
    }

    /// Make the next `n` calls to `save` fail with `fault`.
    pub async fn fail_next_saves(&self, n: usize, fault: InjectedFault) {
        let mut state = self.state.lock().await;
        state.save_faults.extend(std::iter::repeat_n(fault, n));
    }

    /// Number of client handles opened so far (1 + number of `copy` calls).
    pub async fn connections(&self) -> usize {
        self.state.lock().await.connections
    }

    /// Number of successful writes (saves, batch rows, deletes).
    pub async fn writes(&self) -> usize {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Document, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().await;
        state
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn view_ids(
        &self,
        view: &ViewRef,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().await;
        let predicate = state
            .views
            .get(view)
            .ok_or_else(|| StoreError::Other(format!("unknown view {view}")))?;
        let ids = state
            .docs
            .iter()
            .filter(|(_, doc)| predicate(doc))
            .map(|(id, _)| id.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(ids)
    }

    async fn save(&self, doc: &Document) -> Result<Revision, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        if let Some(fault) = state.save_faults.pop_front() {
            return Err(fault.into_error(doc.id().unwrap_or_default()));
        }
        state.commit(doc.clone()).map(|(_, rev)| rev)
    }

    async fn save_batch(&self, docs: &[Document]) -> Result<Vec<BatchSaveResult>, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let result = match state.commit(doc.clone()) {
                Ok((id, rev)) => BatchSaveResult {
                    accepted: true,
                    id,
                    rev: Some(rev),
                },
                Err(StoreError::Conflict(id)) => BatchSaveResult {
                    accepted: false,
                    id,
                    rev: None,
                },
                Err(err) => return Err(err),
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn delete(&self, doc: &Document) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let id = doc
            .id()
            .ok_or_else(|| StoreError::Other("cannot delete a document without _id".to_string()))?;
        let mut state = self.state.lock().await;
        let current = state
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if current.rev() != doc.rev() {
            return Err(StoreError::Conflict(id.to_string()));
        }
        state.docs.remove(id);
        state.writes += 1;
        Ok(())
    }

    async fn copy(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        self.state.lock().await.connections += 1;
        Ok(Arc::new(self.clone()))
    }
}

/// Monitor-view classification of a raw document. Only task documents
/// (`type` absent or `"task"`) are classified.
fn classify(doc: &Document) -> Option<TokenState> {
    match doc.get("type").and_then(|v| v.as_str()) {
        None | Some("task") => {}
        Some(_) => return None,
    }
    TokenState::classify(
        doc.int_field("lock").unwrap_or(0),
        doc.int_field("done").unwrap_or(0),
        doc.int_field("exit_code"),
    )
}

fn generation_of(rev: &Revision) -> u64 {
    rev.as_str()
        .split_once('-')
        .and_then(|(n, _)| n.parse().ok())
        .unwrap_or(0)
}

fn next_revision(generation: u64) -> Revision {
    Revision::new(format!(
        "{}-{}",
        generation + 1,
        Ulid::new().to_string().to_lowercase()
    ))
}
