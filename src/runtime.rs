//! Background execution for the seen service.
//!
//! Queries may block on a remote lookup for up to the HTTP timeout, while
//! connection events must be recorded promptly. [`SeenRuntime`] runs the two on
//! separate bounded worker pools so that slow queries never delay recording.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, RuntimeError};
use crate::identity::IdentityId;
use crate::service::{Query, QueryResult, SeenService};

/// Worker pool selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkPath {
    /// Connection recording.
    Events,
    /// Query answering.
    Queries,
}

impl WorkPath {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Queries => "queries",
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of query workers.
    pub query_workers: usize,
    /// Number of connection-event workers.
    pub event_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            query_workers: 4,
            event_workers: 1,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::InvalidField` if any count is zero.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.query_workers == 0 {
            return Err(ConfigError::invalid("runtime.query_workers", "must be > 0"));
        }
        if self.event_workers == 0 {
            return Err(ConfigError::invalid("runtime.event_workers", "must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("runtime.queue_capacity", "must be > 0"));
        }
        Ok(self)
    }
}

enum Job {
    Observe {
        id: IdentityId,
        name: String,
    },
    Query {
        query: Query,
        reply: Sender<QueryResult>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    path: WorkPath,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(
        path: WorkPath,
        workers: usize,
        queue_capacity: usize,
        service: &Arc<SeenService>,
    ) -> Result<Self, RuntimeError> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut pool = Self {
            path,
            tx: Some(tx),
            workers: Vec::with_capacity(workers),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let service = Arc::clone(service);
            let thread_name = format!("seendb-{}-{idx}", path.as_str());
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&rx, &service))
                .map_err(|e| RuntimeError::Spawn {
                    name: thread_name,
                    message: e.to_string(),
                });
            match handle {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    fn try_submit(&self, job: Job) -> Result<(), RuntimeError> {
        let path = self.path.as_str().to_string();
        let Some(tx) = &self.tx else {
            return Err(RuntimeError::Disconnected { path });
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RuntimeError::QueueFull {
                path,
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::Disconnected { path }),
        }
    }

    fn shutdown(&mut self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        self.tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(path = self.path.as_str(), "worker thread panicked");
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Job>, service: &SeenService) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Observe { id, name } => service.on_connection_observed(id, &name),
            Job::Query { query, reply } => {
                let result = service.query(&query);
                // The caller may have dropped its handle.
                let _ = reply.send(result);
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

/// Handle returned by [`SeenRuntime::query_async`].
#[derive(Debug)]
pub struct QueryHandle {
    rx: Receiver<QueryResult>,
}

impl QueryHandle {
    fn disconnected() -> RuntimeError {
        RuntimeError::Disconnected {
            path: WorkPath::Queries.as_str().to_string(),
        }
    }

    /// Waits for the result.
    ///
    /// # Errors
    /// `RuntimeError::Disconnected` if the worker went away without answering.
    pub fn join(self) -> Result<QueryResult, RuntimeError> {
        self.rx.recv().map_err(|_| Self::disconnected())
    }

    /// Waits for the result with a timeout.
    ///
    /// # Errors
    /// `RuntimeError::Timeout` if nothing arrives in time, `Disconnected` if the
    /// worker went away.
    pub fn join_timeout(self, timeout: Duration) -> Result<QueryResult, RuntimeError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => RuntimeError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => Self::disconnected(),
        })
    }

    /// Returns the result if it is ready, without blocking.
    ///
    /// # Errors
    /// `RuntimeError::Disconnected` if the worker went away without answering.
    pub fn try_result(&self) -> Result<Option<QueryResult>, RuntimeError> {
        match self.rx.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Self::disconnected()),
        }
    }
}

/// A runtime that keeps connection recording isolated from queries.
pub struct SeenRuntime {
    service: Arc<SeenService>,
    events: WorkerPool,
    queries: WorkerPool,
}

impl SeenRuntime {
    /// Start worker pools over `service`.
    ///
    /// # Errors
    /// `RuntimeError::Spawn` if a worker thread cannot be started.
    pub fn start(service: Arc<SeenService>, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let events = WorkerPool::start(
            WorkPath::Events,
            config.event_workers,
            config.queue_capacity,
            &service,
        )?;
        let queries = WorkerPool::start(
            WorkPath::Queries,
            config.query_workers,
            config.queue_capacity,
            &service,
        )?;
        debug!(
            event_workers = events.workers.len(),
            query_workers = queries.workers.len(),
            "seen runtime started"
        );
        Ok(Self {
            service,
            events,
            queries,
        })
    }

    /// Enqueue a connection event without blocking.
    ///
    /// # Errors
    /// `QueueFull` when the events queue is at capacity, `Disconnected` after shutdown.
    pub fn observe_connection(&self, id: IdentityId, name: impl Into<String>) -> Result<(), RuntimeError> {
        self.events.try_submit(Job::Observe {
            id,
            name: name.into(),
        })
    }

    /// Enqueue a query; the answer arrives on the returned handle.
    ///
    /// # Errors
    /// `QueueFull` when the queries queue is at capacity, `Disconnected` after shutdown.
    pub fn query_async(&self, query: Query) -> Result<QueryHandle, RuntimeError> {
        let (reply, rx) = bounded::<QueryResult>(1);
        self.queries.try_submit(Job::Query { query, reply })?;
        Ok(QueryHandle { rx })
    }

    /// Run a query on the worker pool and wait for it.
    ///
    /// # Errors
    /// See [`SeenRuntime::query_async`] and [`QueryHandle::join`].
    pub fn query(&self, query: Query) -> Result<QueryResult, RuntimeError> {
        self.query_async(query)?.join()
    }

    /// The service the workers run against.
    #[must_use]
    pub fn service(&self) -> &Arc<SeenService> {
        &self.service
    }

    /// Stop accepting work, drain queued jobs and join every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.events.shutdown();
        self.queries.shutdown();
    }

    #[cfg(test)]
    fn submit_sleep(&self, path: WorkPath, duration: Duration) -> Result<Receiver<()>, RuntimeError> {
        let (tx, rx) = bounded::<()>(1);
        let job = Job::Sleep { duration, reply: tx };
        match path {
            WorkPath::Events => self.events.try_submit(job)?,
            WorkPath::Queries => self.queries.try_submit(job)?,
        }
        Ok(rx)
    }
}

impl Drop for SeenRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
