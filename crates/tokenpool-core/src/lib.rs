//! tokenpool-core
//!
//! Client side of a pull-based work pool. Pilots claim tasks ("tokens")
//! from a shared document store, run them, and write the results back.
//! There is no scheduler: the store's revision check is the only
//! coordination between pilots.
//!
//! # モジュール構成
//! - **domain**: Task / Job records, lifecycle state machine, batch job ids
//! - **ports**: DocumentStore trait (conditional save + views)
//! - **impls**: InMemoryStore（開発・テスト用）
//! - **claim**: optimistic claim of one task from a view
//! - **iterators**: view, prioritized and endless task iterators
//! - **app**: RunActor (worker loop), stop policy, shutdown, child processes
//! - **modifier**: lifecycle transitions over raw documents
//! - **maintenance**: task producer and stale-lock sweep
//! - **config**: RunConfig (JSON file + `TOKENPOOL_*` env)
//! - **observability**: tracing setup, per-state counts
//!
//! # Constraints
//! - Only one [`RunActor`](app::RunActor) per process may install OS signal
//!   handlers.
//! - A pilot killed with SIGKILL leaves its task locked; run
//!   [`maintenance::reset_locked`] to requeue such tasks.

pub mod app;
pub mod claim;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod iterators;
pub mod maintenance;
pub mod modifier;
pub mod observability;
pub mod ports;

pub use app::{RunActor, RunSummary, StopPolicy, StopReason, TaskProcessor};
pub use claim::{Claim, ClaimOptions, claim};
pub use config::RunConfig;
pub use domain::{Job, Task};
pub use error::{ProcessError, RunError, StoreError};
pub use ports::{DocumentStore, ViewRef};
