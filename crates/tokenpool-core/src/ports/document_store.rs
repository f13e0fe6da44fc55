//! DocumentStore port - 共有ドキュメントストア
//!
//! The store is the only shared resource between pilots. It provides two
//! primitives everything else is built on:
//! - conditional save: a write succeeds only at the revision it was read at
//! - views: server-side predicates that return matching document ids

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::domain::{Document, Record, Revision};
use crate::error::StoreError;

pub const DEFAULT_DESIGN_DOC: &str = "Monitor";

/// A view, addressed by design document and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewRef {
    pub design_doc: String,
    pub name: String,
}

impl ViewRef {
    /// View in the default `Monitor` design document.
    pub fn new(name: impl Into<String>) -> Self {
        Self::in_design(DEFAULT_DESIGN_DOC, name)
    }

    pub fn in_design(design_doc: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            design_doc: design_doc.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ViewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.design_doc, self.name)
    }
}

/// Per-document outcome of [`DocumentStore::save_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSaveResult {
    pub accepted: bool,
    pub id: String,
    pub rev: Option<Revision>,
}

/// Client of the shared document store.
///
/// Implementations must make `save` a compare-and-swap on the document's
/// `_rev`: of several writers holding the same revision, exactly one wins
/// and the rest get [`StoreError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Document, StoreError>;

    /// Ids of the documents matching `view`, at most `limit` of them.
    async fn view_ids(&self, view: &ViewRef, limit: Option<usize>)
    -> Result<Vec<String>, StoreError>;

    /// Conditional save. Returns the new revision.
    async fn save(&self, doc: &Document) -> Result<Revision, StoreError>;

    async fn save_batch(&self, docs: &[Document]) -> Result<Vec<BatchSaveResult>, StoreError>;

    async fn delete(&self, doc: &Document) -> Result<(), StoreError>;

    /// A freshly connected client onto the same database.
    async fn copy(&self) -> Result<Arc<dyn DocumentStore>, StoreError>;

    async fn is_view_nonempty(&self, view: &ViewRef) -> Result<bool, StoreError> {
        Ok(!self.view_ids(view, Some(1)).await?.is_empty())
    }

    /// One document picked uniformly at random among the first `window`
    /// rows of `view`.
    async fn get_one_from_view(
        &self,
        view: &ViewRef,
        window: usize,
    ) -> Result<Document, StoreError> {
        let ids = self.view_ids(view, Some(window)).await?;
        let picked = ids.choose(&mut rand::thread_rng()).cloned();
        match picked {
            Some(id) => self.get(&id).await,
            None => Err(StoreError::NoResults(view.to_string())),
        }
    }

    /// Every document of `view`. Rows deleted between the query and the
    /// fetch are skipped.
    async fn get_from_view(&self, view: &ViewRef) -> Result<Vec<Document>, StoreError> {
        let ids = self.view_ids(view, None).await?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(doc) => docs.push(doc),
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(docs)
    }
}

/// Save a typed record and adopt the revision the store hands back.
pub async fn save_record<R>(store: &dyn DocumentStore, record: &mut R) -> Result<(), StoreError>
where
    R: Record + Send,
{
    let doc = record.to_document()?;
    let rev = store.save(&doc).await?;
    record.set_rev(rev);
    Ok(())
}

pub async fn fetch_record<R: Record>(store: &dyn DocumentStore, id: &str) -> Result<R, StoreError> {
    R::from_document(store.get(id).await?)
}
