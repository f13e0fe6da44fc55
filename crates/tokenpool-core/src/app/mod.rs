//! App - アプリケーション層
//!
//! The pilot run loop and everything it is configured with.
//!
//! # 主要コンポーネント
//! - **RunActor**: claim → process → save loop with stop conditions
//! - **StopPolicy**: timeouts, task/scrub bounds, custom stop function
//! - **TaskProcessor**: caller-supplied task logic and its hooks
//! - **ProcessContext / ChildSlot**: external commands the shutdown path can stop
//! - **Shutdown**: OS signal or injected trigger

pub mod actor;
pub mod policy;
pub mod process;
pub mod processor;
pub mod shutdown;

pub use self::actor::{DEFAULT_CHILD_GRACE, RunActor};
pub use self::policy::{
    ResetValues, RunSummary, StopContext, StopFunction, StopPolicy, StopReason,
};
pub use self::process::{ChildSlot, ExecOutput, ProcessContext};
pub use self::processor::{FnProcessor, TaskProcessor};
pub use self::shutdown::{Shutdown, ShutdownTrigger};
