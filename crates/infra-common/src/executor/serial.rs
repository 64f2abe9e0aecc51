use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{Error, Result};

/// A boxed unit of deferred work
pub type CoreOperation = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Job {
    name: String,
    operation: CoreOperation,
}

/// Runs submitted operations strictly one at a time, in submission order.
///
/// A panicking operation is logged and skipped; the executor keeps running.
pub struct SerialExecutor {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl SerialExecutor {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(Self::run(
            name.clone(),
            receiver,
            cancel_token.clone(),
            pending.clone(),
        ));

        Self {
            name,
            sender,
            cancel_token,
            handle: Mutex::new(Some(handle)),
            pending,
        }
    }

    async fn run(
        name: String,
        mut receiver: mpsc::UnboundedReceiver<Job>,
        cancel_token: CancellationToken,
        pending: Arc<AtomicUsize>,
    ) {
        debug!("Executor {} started", name);
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            debug!("Executor {} running operation {}", name, job.name);
            if AssertUnwindSafe(job.operation).catch_unwind().await.is_err() {
                error!("Operation {} panicked on executor {}", job.name, name);
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("Executor {} stopped", name);
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an operation behind everything already submitted
    pub fn schedule<F>(&self, name: impl Into<String>, operation: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ExecutorShutdown(self.name.clone()));
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            name: name.into(),
            operation: Box::pin(operation),
        };
        self.sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::ExecutorShutdown(self.name.clone())
        })
    }

    /// Wait until every operation submitted before this call has run
    pub async fn drain(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.schedule("drain", async move {
            let _ = tx.send(());
        })?;
        rx.await.map_err(|_| Error::ExecutorShutdown(self.name.clone()))
    }

    /// Number of operations queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Stop accepting work and wait for the worker to exit.
    ///
    /// The operation in progress, if any, is allowed to finish. Queued
    /// operations that have not started are dropped.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel_token.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => debug!("Executor {} shut down", self.name),
                Err(_) => warn!(
                    "Executor {} did not stop within {:?}",
                    self.name, timeout
                ),
            }
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
