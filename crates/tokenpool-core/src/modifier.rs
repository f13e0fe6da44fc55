//! Token Modifier: lifecycle transitions over raw documents.
//!
//! For callers that keep their own object model instead of [`Task`]. The
//! transitions are the same functions `Task` uses
//! ([`state::transition`](crate::domain::state::transition)), so the two
//! paths cannot drift apart.
//!
//! [`Task`]: crate::domain::Task

use serde_json::{Map, Value};

use crate::domain::batch_job::{JOB_ID_FIELD, LEGACY_JOB_ID_FIELDS};
use crate::domain::state::{Stamp, TokenFields, transition};
use crate::domain::{BatchJob, Document};

const LOCK: &str = "lock";
const DONE: &str = "done";
const SCRUB_COUNT: &str = "scrub_count";
const HOSTNAME: &str = "hostname";

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenModifier;

impl TokenModifier {
    pub fn new() -> Self {
        Self
    }

    pub fn lock<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::lock(token, &Stamp::capture());
    }

    pub fn unlock<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::unlock(token, &Stamp::capture());
    }

    pub fn close<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::close(token, &Stamp::capture());
    }

    pub fn unclose<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::unclose(token);
    }

    pub fn scrub<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::scrub(token, &Stamp::capture());
    }

    pub fn set_error<T: TokenFields + ?Sized>(&self, token: &mut T) {
        transition::set_error(token);
    }

    /// Merge `output` into the document's top-level fields.
    pub fn add_output(&self, token: &mut Document, output: Map<String, Value>) {
        token.update(output);
    }
}

impl TokenFields for Document {
    fn lock_time(&self) -> i64 {
        self.int_field(LOCK).unwrap_or(0)
    }

    fn set_lock_time(&mut self, value: i64) {
        self.insert(LOCK, Value::from(value));
    }

    fn done_time(&self) -> i64 {
        self.int_field(DONE).unwrap_or(0)
    }

    fn set_done_time(&mut self, value: i64) {
        self.insert(DONE, Value::from(value));
    }

    fn scrub_count(&self) -> u32 {
        self.int_field(SCRUB_COUNT)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    fn set_scrub_count(&mut self, value: u32) {
        self.insert(SCRUB_COUNT, Value::from(value));
    }

    fn set_hostname(&mut self, hostname: String) {
        self.insert(HOSTNAME, Value::String(hostname));
    }

    fn set_batch_job(&mut self, job: Option<BatchJob>) {
        for field in LEGACY_JOB_ID_FIELDS {
            self.remove(field);
        }
        match job {
            Some(job) => {
                self.insert(JOB_ID_FIELD, Value::String(job.id));
            }
            None => {
                self.remove(JOB_ID_FIELD);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ERROR_SENTINEL, Record, Task, TokenState};
    use serde_json::json;

    fn state_of(doc: &Document) -> Option<TokenState> {
        TokenState::classify(doc.lock_time(), doc.done_time(), doc.int_field("exit_code"))
    }

    #[test]
    fn document_walks_the_same_states_as_task() {
        let modifier = TokenModifier::new();
        let mut doc = Document::with_id("t1");
        let mut task = Task::with_id("t1");

        modifier.lock(&mut doc);
        task.lock();
        assert_eq!(state_of(&doc), task.state());

        doc.insert("exit_code", json!(1));
        task.exit_code = Some(1);
        modifier.close(&mut doc);
        task.done();
        assert_eq!(state_of(&doc), Some(TokenState::Error));
        assert_eq!(state_of(&doc), task.state());

        modifier.scrub(&mut doc);
        task.scrub();
        assert_eq!(state_of(&doc), Some(TokenState::Todo));
        assert_eq!(doc.scrub_count(), task.scrub_count());
        assert_eq!(doc.get("job_id"), None);
    }

    #[test]
    fn job_id_matches_task_representation() {
        let stamp = Stamp {
            now: 1_700_000_000,
            hostname: "wn-12".to_string(),
            batch_job: Some(BatchJob::new(crate::domain::Scheduler::Pbs, "7.pbs")),
        };
        let mut doc = Document::with_id("t1");
        doc.insert("wms_job_id", json!("https://wms/1"));

        transition::lock(&mut doc, &stamp);
        assert_eq!(doc.get("job_id"), Some(&json!("7.pbs")));
        assert_eq!(doc.get("wms_job_id"), None);

        doc.insert("cream_job_id", json!("c1"));
        TokenModifier::new().scrub(&mut doc);
        assert_eq!(doc.get("job_id"), None);
        assert_eq!(doc.get("cream_job_id"), None);
    }

    #[test]
    fn set_error_uses_the_task_sentinel() {
        let modifier = TokenModifier::new();
        let mut doc = Document::with_id("t1");
        modifier.lock(&mut doc);
        modifier.set_error(&mut doc);

        let mut task = Task::with_id("t1");
        task.error("boom", None);

        assert_eq!(doc.lock_time(), ERROR_SENTINEL);
        assert_eq!(doc.done_time(), ERROR_SENTINEL);
        assert_eq!(doc.lock_time(), task.lock_time());
        assert_eq!(doc.done_time(), task.done_time());
    }

    #[test]
    fn unlock_and_unclose() {
        let modifier = TokenModifier::new();
        let mut doc = Document::with_id("t1");
        modifier.lock(&mut doc);
        modifier.close(&mut doc);

        modifier.unclose(&mut doc);
        assert_eq!(state_of(&doc), Some(TokenState::Locked));

        modifier.unlock(&mut doc);
        assert_eq!(state_of(&doc), Some(TokenState::Todo));
        assert_eq!(doc.scrub_count(), 0);
    }

    #[test]
    fn add_output_merges_fields() {
        let modifier = TokenModifier::new();
        let mut doc = Document::with_id("t1");
        doc.insert("exit_code", json!(""));

        let mut output = Map::new();
        output.insert("exit_code".to_string(), json!(0));
        output.insert("result".to_string(), json!({"sum": 3}));
        modifier.add_output(&mut doc, output);

        assert_eq!(doc.int_field("exit_code"), Some(0));
        assert_eq!(doc.get("result"), Some(&json!({"sum": 3})));
    }

    #[test]
    fn modified_document_decodes_as_task() {
        let modifier = TokenModifier::new();
        let mut doc = Task::with_id("t1").to_document().unwrap();
        modifier.lock(&mut doc);

        let task = Task::from_document(doc).unwrap();
        assert_eq!(task.state(), Some(TokenState::Locked));
    }
}
