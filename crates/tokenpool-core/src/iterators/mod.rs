//! View iterators: lazy sequences of claimed tasks.
//!
//! - [`TaskViewIterator`]: one view, ends when the view is empty
//! - [`PrioritizedViewIterator`]: high-priority view first, then low
//! - [`EndlessViewIterator`]: wraps another iterator and polls forever
//!
//! Every task an iterator yields is already locked in the store and belongs
//! to the caller until it is saved back.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Task;
use crate::error::StoreError;
use crate::ports::DocumentStore;

pub mod endless;
pub mod prioritized;
pub mod view;

pub use self::endless::EndlessViewIterator;
pub use self::prioritized::PrioritizedViewIterator;
pub use self::view::TaskViewIterator;

/// External stop condition, polled by iterators that can wait.
pub type StopCallback = Arc<dyn Fn() -> bool + Send + Sync>;

#[async_trait]
pub trait TaskIterator: Send + Sync {
    /// Next claimed task. `Ok(None)` ends the sequence (until `reset`).
    async fn next_task(&mut self) -> Result<Option<Task>, StoreError>;

    fn stop(&mut self);

    fn is_stopped(&self) -> bool;

    /// Make a stopped iterator pullable again.
    fn reset(&mut self);

    /// Continue on a freshly connected store client.
    fn reconnect(&mut self, store: Arc<dyn DocumentStore>);

    /// Add a stop condition; the iterator stops once any installed
    /// condition holds. Returns `false` if this iterator never waits and
    /// therefore ignores it.
    fn set_stop_callback(&mut self, _callback: StopCallback) -> bool {
        false
    }
}

#[async_trait]
impl<T: TaskIterator + ?Sized> TaskIterator for Box<T> {
    async fn next_task(&mut self) -> Result<Option<Task>, StoreError> {
        (**self).next_task().await
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_stopped(&self) -> bool {
        (**self).is_stopped()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn reconnect(&mut self, store: Arc<dyn DocumentStore>) {
        (**self).reconnect(store)
    }

    fn set_stop_callback(&mut self, callback: StopCallback) -> bool {
        (**self).set_stop_callback(callback)
    }
}
