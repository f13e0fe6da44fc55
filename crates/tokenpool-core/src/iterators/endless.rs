use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{StopCallback, TaskIterator};
use crate::domain::Task;
use crate::error::StoreError;
use crate::ports::DocumentStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Wraps another iterator and never runs dry on its own.
///
/// When the inner iterator ends, it is reset and polled again after
/// `interval` (zero busy-polls). Only `stop()` or the stop callback end the
/// sequence. The callback is checked before every claim, never between a
/// claim and handing the task out, so a claimed task is always yielded.
pub struct EndlessViewIterator {
    inner: Box<dyn TaskIterator>,
    interval: Duration,
    stop_callback: Option<StopCallback>,
    stopped: bool,
}

impl EndlessViewIterator {
    pub fn new(inner: impl TaskIterator + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            interval: DEFAULT_POLL_INTERVAL,
            stop_callback: None,
            stopped: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stop_callback(mut self, callback: StopCallback) -> Self {
        self.add_stop_callback(callback);
        self
    }

    fn add_stop_callback(&mut self, callback: StopCallback) {
        self.stop_callback = Some(match self.stop_callback.take() {
            Some(existing) => Arc::new(move || existing() || callback()),
            None => callback,
        });
    }

    fn should_stop(&self) -> bool {
        self.stopped || self.stop_callback.as_ref().is_some_and(|stop| stop())
    }

    fn finish(&mut self) {
        info!("iterator is finishing");
        self.inner.stop();
        self.stopped = true;
    }
}

#[async_trait]
impl TaskIterator for EndlessViewIterator {
    async fn next_task(&mut self) -> Result<Option<Task>, StoreError> {
        loop {
            if self.should_stop() {
                self.finish();
                return Ok(None);
            }

            if let Some(task) = self.inner.next_task().await? {
                return Ok(Some(task));
            }

            self.inner.reset();
            info!(interval_secs = self.interval.as_secs_f64(), "iterator is waiting for work");
            if self.interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.interval).await;
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.inner.stop();
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn reset(&mut self) {
        self.stopped = false;
        self.inner.reset();
    }

    fn reconnect(&mut self, store: Arc<dyn DocumentStore>) {
        self.inner.reconnect(store);
    }

    fn set_stop_callback(&mut self, callback: StopCallback) -> bool {
        self.add_stop_callback(callback);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Record;
    use crate::impls::InMemoryStore;
    use crate::iterators::TaskViewIterator;
    use crate::ports::ViewRef;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing_test::traced_test;

    fn endless(store: &InMemoryStore) -> EndlessViewIterator {
        EndlessViewIterator::new(TaskViewIterator::new(
            Arc::new(store.clone()),
            ViewRef::new("todo"),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_work_that_arrives_later() {
        let store = InMemoryStore::new();
        let mut it = endless(&store).with_interval(Duration::from_secs(30));

        let producer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(95)).await;
                store
                    .insert(Task::with_id("late").to_document().unwrap())
                    .await
                    .unwrap();
            })
        };

        let started = tokio::time::Instant::now();
        let task = it.next_task().await.unwrap().unwrap();
        assert_eq!(task.id(), "late");
        // polled at 0, 30, 60, 90 and found it at 120
        assert_eq!(started.elapsed(), Duration::from_secs(120));
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_callback_ends_the_wait() {
        let store = InMemoryStore::new();
        let flag = Arc::new(AtomicBool::new(false));
        let callback: StopCallback = {
            let flag = Arc::clone(&flag);
            Arc::new(move || flag.load(Ordering::SeqCst))
        };
        let mut it = endless(&store)
            .with_interval(Duration::from_secs(10))
            .with_stop_callback(callback);

        let setter = {
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                flag.store(true, Ordering::SeqCst);
            })
        };

        assert!(it.next_task().await.unwrap().is_none());
        assert!(it.is_stopped());
        setter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn logs_waiting_and_finishing() {
        let store = InMemoryStore::new();
        let mut it = endless(&store).with_interval(Duration::ZERO);
        let polls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        assert!(it.set_stop_callback(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        })));

        assert!(it.next_task().await.unwrap().is_none());

        assert!(logs_contain("iterator is waiting for work"));
        assert!(logs_contain("iterator is finishing"));
    }

    #[tokio::test]
    async fn installed_callbacks_are_combined() {
        let store = InMemoryStore::new();
        store
            .insert(Task::with_id("a").to_document().unwrap())
            .await
            .unwrap();
        let user_stop = Arc::new(AtomicBool::new(false));
        let callback: StopCallback = {
            let user_stop = Arc::clone(&user_stop);
            Arc::new(move || user_stop.load(Ordering::SeqCst))
        };
        let mut it = endless(&store).with_stop_callback(callback);
        assert!(it.set_stop_callback(Arc::new(|| false)));

        assert_eq!(it.next_task().await.unwrap().unwrap().id(), "a");

        user_stop.store(true, Ordering::SeqCst);
        assert!(it.next_task().await.unwrap().is_none());
        assert!(it.is_stopped());
    }

    #[tokio::test]
    async fn external_stop_wins_over_available_work() {
        let store = InMemoryStore::new();
        store
            .insert(Task::with_id("a").to_document().unwrap())
            .await
            .unwrap();
        let mut it = endless(&store);

        it.stop();
        assert!(it.next_task().await.unwrap().is_none());

        it.reset();
        assert_eq!(it.next_task().await.unwrap().unwrap().id(), "a");
    }
}
