//! Background executor
//!
//! One dedicated worker thread per [`Registry`](crate::registry::Registry)
//! runs a `current_thread` tokio runtime. Every piece of IPC is scheduled
//! onto that loop, so backend state is only ever touched from one thread
//! and backends need no locks of their own. Callers bridge in two ways:
//!
//! - [`Executor::run`]: post a future, await its result over a oneshot.
//! - [`Executor::run_blocking`]: same, but blocks the calling thread;
//!   re-entrant calls from the worker thread itself are driven inline
//!   instead of deadlocking on the loop.
//!
//! A single [`Cancellable`] token is shared by the whole Registry. Tearing
//! the Registry down cancels it, which fails in-flight calls fast with
//! [`Error::Cancelled`] rather than letting them hang.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};

use crate::error::{Error, Result};

/// Shared cancellation token.
#[derive(Clone)]
pub struct Cancellable {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token has been cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before the re-check so a concurrent
            // cancel() cannot slip between check and wait.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a one-shot timer scheduled on the worker loop.
///
/// Dropping the handle does *not* cancel the timer; call
/// [`TimeoutHandle::cancel`] for that.
pub struct TimeoutHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl TimeoutHandle {
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// The worker thread and its scheduling surface.
pub struct Executor {
    handle: Handle,
    worker_id: ThreadId,
    cancel: Cancellable,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Executor {
    pub fn new() -> Result<Self> {
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = thread::Builder::new()
            .name("app-launch-worker".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok((rt.handle().clone(), thread::current().id())));
                // Park on the shutdown signal; spawned work runs meanwhile.
                rt.block_on(async move {
                    let _ = shutdown_rx.await;
                });
                log::debug!("executor loop stopped");
            })
            .map_err(|e| Error::ExecutorStart(e.to_string()))?;

        let (handle, worker_id) = init_rx
            .recv()
            .map_err(|_| Error::ExecutorStart("worker thread exited during init".into()))?
            .map_err(|e| Error::ExecutorStart(e.to_string()))?;

        Ok(Self {
            handle,
            worker_id,
            cancel: Cancellable::new(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            join: Mutex::new(Some(join)),
        })
    }

    /// The Registry-wide cancellation token.
    pub fn cancellable(&self) -> Cancellable {
        self.cancel.clone()
    }

    /// Schedule `fut` on the worker loop. The returned handle can abort it.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Schedule `fut` on the worker loop and await its result.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cancel = self.cancel.clone();
        self.handle.spawn(async move {
            tokio::select! {
                v = fut => { let _ = tx.send(v); }
                _ = cancel.cancelled() => {}
            }
        });
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Schedule `fut` on the worker loop and block the calling thread on
    /// its result. Called *from* the worker thread, the future is driven
    /// inline instead (the loop cannot wait on itself).
    pub fn run_blocking<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if thread::current().id() == self.worker_id {
            return Ok(futures::executor::block_on(fut));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let cancel = self.cancel.clone();
        self.handle.spawn(async move {
            tokio::select! {
                v = fut => { let _ = tx.send(v); }
                _ = cancel.cancelled() => {}
            }
        });
        rx.recv().map_err(|_| Error::Cancelled)
    }

    /// Arm a one-shot timer on the worker loop. The callback is skipped if
    /// the handle or the Registry token cancels first.
    pub fn timeout<F>(&self, delay: Duration, f: F) -> TimeoutHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let token = self.cancel.clone();
        self.handle.spawn(async move {
            let explicit_cancel = async move {
                // A dropped handle keeps the timer alive; only a sent
                // cancellation stops it.
                if cancel_rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => f(),
                _ = explicit_cancel => {}
                _ = token.cancelled() => {}
            }
        });
        TimeoutHandle {
            cancel: Some(cancel_tx),
        }
    }

    /// Cancel the token, stop the loop, and join the worker. Invoked on
    /// the worker thread itself, the thread is detached instead (a thread
    /// cannot join itself).
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let join = self.join.lock().unwrap().take();
        if let Some(j) = join {
            if thread::current().id() == self.worker_id {
                drop(j);
            } else {
                let _ = j.join();
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_run_blocking_bridges_to_worker() {
        let exec = Executor::new().unwrap();
        let worker = exec.worker_id;
        let ran_on = exec
            .run_blocking(async move { thread::current().id() })
            .unwrap();
        assert_eq!(ran_on, worker);
        exec.shutdown();
    }

    #[test]
    fn test_run_blocking_reentrant_inline() {
        let exec = Arc::new(Executor::new().unwrap());
        let exec2 = Arc::clone(&exec);
        // A task on the loop calling back into run_blocking must not
        // deadlock.
        let v = exec
            .run_blocking(async move { exec2.run_blocking(async { 42 }).unwrap() })
            .unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_timer_fires() {
        let exec = Executor::new().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        exec.timeout(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_timer_cancel() {
        let exec = Executor::new().unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let handle = exec.timeout(Duration::from_millis(50), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_cancels_in_flight_work() {
        let exec = Arc::new(Executor::new().unwrap());
        let exec2 = Arc::clone(&exec);
        let waiter = thread::spawn(move || {
            exec2.run_blocking(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        });
        thread::sleep(Duration::from_millis(50));
        exec.shutdown();
        let res = waiter.join().unwrap();
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancellable_flag() {
        let c = Cancellable::new();
        assert!(!c.is_cancelled());
        c.cancel();
        assert!(c.is_cancelled());
    }
}
