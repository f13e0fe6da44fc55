//! Token lifecycle state machine.
//!
//! State transitions:
//! - Todo -> Locked (claim)
//! - Locked -> Done | Error (finish)
//! - Done | Error | Locked -> Todo (scrub, `scrub_count` + 1)
//!
//! The transitions are written once here as functions over [`TokenFields`],
//! and both [`Task`](super::Task) and
//! [`TokenModifier`](crate::modifier::TokenModifier) go through them.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::batch_job::BatchJob;

/// Value written to both `lock` and `done` when a task records an error.
pub const ERROR_SENTINEL: i64 = 99;

/// Where a token sits in the lifecycle, as the monitor views classify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// `lock == 0 && done == 0`: eligible to be claimed.
    Todo,

    /// `lock > 0 && done == 0`: claimed, in progress.
    Locked,

    /// Finished with `exit_code == 0`.
    Done,

    /// Finished with any other exit code (or none).
    Error,
}

impl TokenState {
    pub const ALL: [TokenState; 4] = [
        TokenState::Todo,
        TokenState::Locked,
        TokenState::Done,
        TokenState::Error,
    ];

    /// Classify raw fields. Combinations outside the state machine
    /// (negative values, `done` without `lock`) yield `None`.
    pub fn classify(lock: i64, done: i64, exit_code: Option<i64>) -> Option<Self> {
        match (lock, done) {
            (0, 0) => Some(TokenState::Todo),
            (l, 0) if l > 0 => Some(TokenState::Locked),
            (l, d) if l > 0 && d > 0 => {
                if exit_code == Some(0) {
                    Some(TokenState::Done)
                } else {
                    Some(TokenState::Error)
                }
            }
            _ => None,
        }
    }

    /// Name of the monitor view that selects this state.
    pub fn view_name(self) -> &'static str {
        match self {
            TokenState::Todo => "todo",
            TokenState::Locked => "locked",
            TokenState::Done => "done",
            TokenState::Error => "error",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TokenState::Done | TokenState::Error)
    }
}

/// Lifecycle fields shared by every token representation.
pub trait TokenFields {
    fn lock_time(&self) -> i64;
    fn set_lock_time(&mut self, value: i64);

    fn done_time(&self) -> i64;
    fn set_done_time(&mut self, value: i64);

    fn scrub_count(&self) -> u32;
    fn set_scrub_count(&mut self, value: u32);

    fn set_hostname(&mut self, hostname: String);

    fn set_batch_job(&mut self, job: Option<BatchJob>);
}

/// Environment captured at the moment of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub now: i64,
    pub hostname: String,
    pub batch_job: Option<BatchJob>,
}

impl Stamp {
    pub fn capture() -> Self {
        Self {
            now: now_secs(),
            hostname: hostname().to_string(),
            batch_job: BatchJob::from_env(),
        }
    }
}

/// Current time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Host name of this machine, resolved once per process.
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| sysinfo::System::host_name().unwrap_or_default())
}

pub mod transition {
    use super::{ERROR_SENTINEL, Stamp, TokenFields};

    /// Todo -> Locked.
    pub fn lock<T: TokenFields + ?Sized>(token: &mut T, stamp: &Stamp) {
        token.set_lock_time(stamp.now);
        token.set_batch_job(stamp.batch_job.clone());
        token.set_hostname(stamp.hostname.clone());
    }

    /// Locked -> Todo without counting a retry.
    pub fn unlock<T: TokenFields + ?Sized>(token: &mut T, stamp: &Stamp) {
        token.set_lock_time(0);
        token.set_hostname(stamp.hostname.clone());
    }

    /// Locked -> Done | Error.
    pub fn close<T: TokenFields + ?Sized>(token: &mut T, stamp: &Stamp) {
        token.set_done_time(stamp.now);
    }

    /// Done | Error -> Locked.
    pub fn unclose<T: TokenFields + ?Sized>(token: &mut T) {
        token.set_done_time(0);
    }

    /// Any -> Todo, counting one more retry.
    pub fn scrub<T: TokenFields + ?Sized>(token: &mut T, stamp: &Stamp) {
        token.set_scrub_count(token.scrub_count().saturating_add(1));
        token.set_done_time(0);
        token.set_lock_time(0);
        token.set_batch_job(None);
        token.set_hostname(stamp.hostname.clone());
    }

    /// Any -> Error, marked with the sentinel on both timestamps.
    pub fn set_error<T: TokenFields + ?Sized>(token: &mut T) {
        token.set_lock_time(ERROR_SENTINEL);
        token.set_done_time(ERROR_SENTINEL);
    }
}
