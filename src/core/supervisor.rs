//! Worker supervision
//!
//! The fixed set of long-lived workers runs on named OS threads. The first
//! worker to exit decides the process outcome:
//! - `Ok(())` (e.g. fast input reached EOF) → exit code 0
//! - `Err` or panic → exit code 1

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::core::context::Context;

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Clean,
    Failed(String),
    Panicked(String),
}

impl WorkerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerExit::Clean => 0,
            WorkerExit::Failed(_) | WorkerExit::Panicked(_) => 1,
        }
    }
}

struct Worker {
    name: String,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| h.is_finished())
    }

    fn join(&mut self) -> Option<WorkerExit> {
        let handle = self.handle.take()?;
        let exit = match handle.join() {
            Ok(Ok(())) => WorkerExit::Clean,
            Ok(Err(e)) => WorkerExit::Failed(format!("{:#}", e)),
            Err(panic) => WorkerExit::Panicked(panic_message(panic.as_ref())),
        };
        Some(exit)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Supervisor {
    ctx: Arc<Context>,
    workers: Vec<Worker>,
}

impl Supervisor {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            workers: Vec::new(),
        }
    }

    /// Start a named worker thread
    pub fn spawn<F>(&mut self, name: &str, work: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .with_context(|| format!("failed to spawn {} thread", name))?;
        tracing::debug!(worker = name, "Worker started");
        self.workers.push(Worker {
            name: name.to_string(),
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Block until some worker exits and report which one and how
    ///
    /// Returns `None` when there are no running workers.
    pub fn wait_first(&mut self, poll: Duration) -> Option<(String, WorkerExit)> {
        loop {
            if self.workers.iter().all(|w| w.handle.is_none()) {
                return None;
            }
            if let Some(worker) = self.workers.iter_mut().find(|w| w.is_finished()) {
                let exit = worker.join()?;
                match &exit {
                    WorkerExit::Clean => tracing::info!(worker = %worker.name, "Worker finished"),
                    WorkerExit::Failed(e) => tracing::error!(worker = %worker.name, error = %e, "Worker failed"),
                    WorkerExit::Panicked(e) => tracing::error!(worker = %worker.name, panic = %e, "Worker panicked"),
                }
                return Some((worker.name.clone(), exit));
            }
            thread::sleep(poll);
        }
    }

    /// Ask all workers to stop and join those that do within `grace`
    ///
    /// Workers blocked outside the shutdown protocol (a reader waiting on
    /// stdin) are left detached.
    pub fn shutdown(&mut self, grace: Duration) {
        self.ctx.request_shutdown();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && self.workers.iter().any(|w| w.handle.is_some() && !w.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }
        for worker in &mut self.workers {
            if worker.handle.is_none() {
                continue;
            }
            if worker.is_finished() {
                if let Some(WorkerExit::Failed(e) | WorkerExit::Panicked(e)) = worker.join() {
                    tracing::warn!(worker = %worker.name, error = %e, "Worker ended badly during shutdown");
                }
            } else {
                tracing::warn!(worker = %worker.name, "Worker did not stop in time; detaching");
                worker.handle = None;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
