//! Shutdown signalling.
//!
//! A `watch` channel carries "shutdown requested". The run loop holds a
//! [`Shutdown`]; the trigger side is either the OS signal listener installed
//! by [`Shutdown::from_os_signals`] or a [`ShutdownTrigger`] the caller keeps
//! (tests, embedding applications).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::info;

use crate::error::RunError;

// OS handlers are process-wide: at most one run loop per process owns them.
static OS_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // receivers may already be gone
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. Never resolves if every
    /// trigger is dropped without firing.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Listen for SIGTERM and SIGINT (Ctrl-C elsewhere).
    ///
    /// Fails with [`RunError::HandlerAlreadyInstalled`] when called a second
    /// time in the same process.
    pub fn from_os_signals() -> Result<Shutdown, RunError> {
        if OS_HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(RunError::HandlerAlreadyInstalled);
        }
        let (trigger, shutdown) = Self::channel();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let installed = signal(SignalKind::terminate())
                .and_then(|term| Ok((term, signal(SignalKind::interrupt())?)));
            let (mut term, mut int) = match installed {
                Ok(streams) => streams,
                Err(err) => {
                    OS_HANDLERS_INSTALLED.store(false, Ordering::SeqCst);
                    return Err(RunError::Signal(err));
                }
            };

            tokio::spawn(async move {
                let name = tokio::select! {
                    _ = term.recv() => "SIGTERM",
                    _ = int.recv() => "SIGINT",
                };
                info!(signal = name, "shutdown signal received");
                trigger.trigger();
            });
        }

        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!(signal = "ctrl_c", "shutdown signal received");
                    trigger.trigger();
                }
            });
        }

        Ok(shutdown)
    }
}
