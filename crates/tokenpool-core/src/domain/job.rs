//! Pilot job record.
//!
//! A `Job` document tracks one pilot submission: when it was queued, when it
//! started pulling tokens, when it finished. Finished jobs are archived under
//! a new id so the live id can be reused by the next submission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::document::{Document, Record, Revision, decode, encode};
use super::state::{hostname, now_secs};
use crate::error::{DocumentError, StoreError};

pub const JOB_KIND: &str = "job";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id")]
    id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<Revision>,

    #[serde(rename = "type", default = "default_kind")]
    kind: String,

    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub queue: i64,

    #[serde(default)]
    pub start: i64,

    #[serde(default)]
    pub done: i64,

    #[serde(default)]
    pub archive: i64,

    /// Submission method (scheduler name, "manual", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Result<Self, DocumentError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DocumentError::MissingId);
        }
        Ok(Self {
            id,
            rev: None,
            kind: default_kind(),
            hostname: String::new(),
            queue: 0,
            start: 0,
            done: 0,
            archive: 0,
            method: None,
            extra: Map::new(),
        })
    }

    pub fn queue(&mut self, method: impl Into<String>, host: Option<&str>) -> &mut Self {
        self.queue = now_secs();
        self.method = Some(method.into());
        if let Some(host) = host {
            self.hostname = host.to_string();
        }
        self
    }

    pub fn start(&mut self) -> &mut Self {
        self.start = now_secs();
        self.done = 0;
        self.archive = 0;
        self.hostname = hostname().to_string();
        self
    }

    pub fn finish(&mut self) -> &mut Self {
        self.done = now_secs();
        self
    }

    pub fn is_done(&self) -> bool {
        self.done != 0
    }

    /// Move the record to `archived-<id>-<secs>` and drop the revision, so
    /// the next save creates a new document.
    pub fn archive(&mut self) -> &mut Self {
        if !self.is_done() {
            self.finish();
        }
        self.archive = now_secs();
        self.id = format!("archived-{}-{}", self.id, self.archive);
        self.rev = None;
        self
    }
}

impl Record for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn rev(&self) -> Option<&Revision> {
        self.rev.as_ref()
    }

    fn set_rev(&mut self, rev: Revision) {
        self.rev = Some(rev);
    }

    fn to_document(&self) -> Result<Document, StoreError> {
        encode(&self.id, self)
    }

    fn from_document(doc: Document) -> Result<Self, StoreError> {
        decode(doc)
    }
}

fn default_kind() -> String {
    JOB_KIND.to_string()
}
