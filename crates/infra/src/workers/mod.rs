//! Background worker threads with explicit shutdown.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Run `task` once on a named thread.
    pub fn spawn_once<F>(name: impl Into<String>, task: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, _shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new().name(name.clone()).spawn(task)?;

        Ok(Self {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Call `step` repeatedly on a named thread until shutdown is requested.
    ///
    /// `step` is expected to block for a bounded time (e.g. a `BLOCK`ing
    /// read). When it fails, the error is logged and the worker waits `backoff`
    /// (or until shutdown) before the next attempt.
    pub fn spawn_loop<F, E>(name: impl Into<String>, backoff: Duration, mut step: F) -> io::Result<Self>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: core::fmt::Display,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker = name.clone();

        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            loop {
                match shutdown_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                if let Err(err) = step() {
                    warn!(worker = %worker, error = %err, "worker step failed");
                    match shutdown_rx.recv_timeout(backoff) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
            }
        })?;

        Ok(Self {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = %self.name, "worker panicked before shutdown");
            }
        }
    }
}
