//! Task record: one unit of work in the shared pool.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use ulid::Ulid;

use super::attachment::{Attachment, guess_content_type};
use super::batch_job::{BatchJob, LEGACY_JOB_ID_FIELDS};
use super::document::{Document, Record, Revision, decode, encode};
use super::state::{ERROR_SENTINEL, Stamp, TokenFields, TokenState, now_secs, transition};
use crate::error::{DocumentError, StoreError};

pub const TASK_KIND: &str = "task";

/// One entry of a task's error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub time: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Rendered error chain of the failure, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// A work item ("token").
///
/// Lifecycle fields are private: they only change through the transitions
/// in [`state::transition`](super::state::transition). `input`, `output`
/// and `exit_code` belong to the caller. Unknown fields survive a round trip
/// through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<Revision>,

    #[serde(rename = "type", default = "default_kind")]
    kind: String,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    lock: i64,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    done: i64,

    #[serde(default)]
    hostname: String,

    #[serde(default)]
    scrub_count: u32,

    #[serde(default = "empty_object")]
    pub input: Value,

    #[serde(default = "empty_object")]
    pub output: Value,

    #[serde(default, deserialize_with = "lenient_exit_code")]
    pub exit_code: Option<i64>,

    #[serde(rename = "error", default)]
    errors: Vec<ErrorEntry>,

    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    attachments: BTreeMap<String, Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Task {
    /// New todo task with a generated id.
    pub fn new() -> Self {
        Self::with_id(format!("task_{}", Ulid::new().to_string().to_lowercase()))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            kind: default_kind(),
            lock: 0,
            done: 0,
            hostname: String::new(),
            scrub_count: 0,
            input: empty_object(),
            output: empty_object(),
            exit_code: None,
            errors: Vec::new(),
            attachments: BTreeMap::new(),
            job_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn lock_time(&self) -> i64 {
        self.lock
    }

    pub fn done_time(&self) -> i64 {
        self.done
    }

    pub fn scrub_count(&self) -> u32 {
        self.scrub_count
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Id of the batch job that holds (or last held) the lock.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn state(&self) -> Option<TokenState> {
        TokenState::classify(self.lock, self.done, self.exit_code)
    }

    pub fn has_error(&self) -> bool {
        self.lock == ERROR_SENTINEL
    }

    pub fn is_done(&self) -> bool {
        self.done != 0
    }

    /// Claim: lock now, record host and batch job.
    pub fn lock(&mut self) -> &mut Self {
        transition::lock(self, &Stamp::capture());
        self
    }

    /// Finish: done now.
    pub fn done(&mut self) -> &mut Self {
        transition::close(self, &Stamp::capture());
        self
    }

    /// Return the task to todo and count the retry.
    pub fn scrub(&mut self) -> &mut Self {
        transition::scrub(self, &Stamp::capture());
        self
    }

    /// Scrub and also drop everything the previous attempt left behind:
    /// host, exit code and attachments.
    pub fn requeue(&mut self) -> &mut Self {
        self.scrub();
        self.hostname.clear();
        self.exit_code = None;
        self.attachments.clear();
        self
    }

    /// Append to the error history and move the task to the error state.
    pub fn error(
        &mut self,
        message: impl Into<String>,
        exception: Option<&(dyn StdError + 'static)>,
    ) -> &mut Self {
        self.errors.push(ErrorEntry {
            time: now_secs(),
            message: Some(message.into()),
            exception: exception.map(render_chain),
        });
        transition::set_error(self);
        self
    }

    /// Store `data` inline. Without an explicit content type one is guessed
    /// from `name`.
    pub fn put_attachment(
        &mut self,
        name: impl Into<String>,
        data: impl AsRef<[u8]>,
        content_type: Option<&str>,
    ) -> &mut Self {
        let name = name.into();
        let content_type = content_type.unwrap_or_else(|| guess_content_type(&name));
        self.attachments
            .insert(name, Attachment::encode(data.as_ref(), content_type));
        self
    }

    /// Decoded bytes of an attachment.
    pub fn get_attachment(&self, name: &str) -> Result<Vec<u8>, DocumentError> {
        let attachment = self
            .attachments
            .get(name)
            .ok_or_else(|| DocumentError::MissingAttachment(name.to_string()))?;
        attachment.decode().map_err(|source| DocumentError::Base64 {
            name: name.to_string(),
            source,
        })
    }

    /// Raw stored attachment, content type included.
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(name)
    }

    pub fn remove_attachment(&mut self, name: &str) -> Option<Attachment> {
        self.attachments.remove(name)
    }

    pub fn attachment_names(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }
}

impl TokenFields for Task {
    fn lock_time(&self) -> i64 {
        self.lock
    }

    fn set_lock_time(&mut self, value: i64) {
        self.lock = value;
    }

    fn done_time(&self) -> i64 {
        self.done
    }

    fn set_done_time(&mut self, value: i64) {
        self.done = value;
    }

    fn scrub_count(&self) -> u32 {
        self.scrub_count
    }

    fn set_scrub_count(&mut self, value: u32) {
        self.scrub_count = value;
    }

    fn set_hostname(&mut self, hostname: String) {
        self.hostname = hostname;
    }

    fn set_batch_job(&mut self, job: Option<BatchJob>) {
        for field in LEGACY_JOB_ID_FIELDS {
            self.extra.remove(field);
        }
        self.job_id = job.map(|job| job.id);
    }
}

impl Record for Task {
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
    TASK_KIND.to_string()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

// Records written by other tools may carry `null` or `""` in these fields.

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {n}"))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!(
            "expected an epoch timestamp, found {other}"
        ))),
    }
}

fn lenient_exit_code<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("exit code out of range: {n}"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(de::Error::custom),
        other => Err(de::Error::custom(format!(
            "expected an exit code, found {other}"
        ))),
    }
}
