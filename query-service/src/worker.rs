//! Fixed-size pool of blocking SQL worker threads.
//!
//! Every worker owns its own connection per database, opened lazily on first
//! use, so the pool size also bounds the open connections per database.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use common::errors::{AppError, AppResult};
use connection_service::{ConnectionSetup, Database};
use rusqlite::Connection;
use serde::Serialize;

/// A unit of work run on a pool thread.
pub type Job = Box<dyn FnOnce(&mut WorkerConnections) + Send + 'static>;

/// The connections owned by one worker thread.
pub struct WorkerConnections {
    setup: Arc<ConnectionSetup>,
    connections: HashMap<String, (Option<PathBuf>, Connection)>,
}

impl WorkerConnections {
    fn new(setup: Arc<ConnectionSetup>) -> Self {
        Self {
            setup,
            connections: HashMap::new(),
        }
    }

    /// This worker's connection to `db`, opened and prepared on first use.
    ///
    /// A database re-registered under the same name with a different path
    /// gets a fresh connection.
    pub fn get(&mut self, db: &Database) -> rusqlite::Result<&Connection> {
        let path = db.path().map(PathBuf::from);
        match self.connections.entry(db.name().to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().0 != path {
                    entry.insert((path, self.setup.open(db)?));
                }
                Ok(&entry.into_mut().1)
            }
            Entry::Vacant(entry) => Ok(&entry.insert((path, self.setup.open(db)?)).1),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    busy: AtomicUsize,
    queued: AtomicUsize,
}

/// Snapshot of the pool for `/-/threads`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStatus {
    pub num_threads: usize,
    pub threads: Vec<String>,
    pub busy: usize,
    pub queued: usize,
}

pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    names: Vec<String>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Starts `size` worker threads sharing one job queue.
    pub fn new(size: usize, setup: ConnectionSetup) -> AppResult<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let setup = Arc::new(setup);
        let counters = Arc::new(PoolCounters::default());
        let mut names = Vec::with_capacity(size);

        for i in 0..size {
            let name = format!("sql-worker-{i}");
            let receiver = receiver.clone();
            let counters = counters.clone();
            let mut connections = WorkerConnections::new(setup.clone());
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&receiver, &counters, &mut connections))
                .map_err(|e| AppError::Internal(format!("failed to spawn {name}: {e}")))?;
            names.push(name);
        }

        tracing::info!(threads = size, "SQL worker pool started");
        Ok(Self {
            sender: Some(sender),
            names,
            counters,
        })
    }

    /// Queues a job. Jobs run in no particular order relative to each other.
    pub fn submit(&self, job: Job) -> AppResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| AppError::Internal("worker pool is shut down".into()))?;
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        sender.send(job).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            AppError::Internal("worker pool is shut down".into())
        })
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            num_threads: self.names.len(),
            threads: self.names.clone(),
            busy: self.counters.busy.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker exit after draining the queue.
        self.sender.take();
    }
}

fn worker_loop(
    receiver: &Mutex<mpsc::Receiver<Job>>,
    counters: &PoolCounters,
    connections: &mut WorkerConnections,
) {
    loop {
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        let Ok(job) = next else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.busy.fetch_add(1, Ordering::SeqCst);
        if std::panic::catch_unwind(AssertUnwindSafe(|| job(connections))).is_err() {
            tracing::error!(thread = ?thread::current().name(), "SQL job panicked");
        }
        counters.busy.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!(thread = ?thread::current().name(), "SQL worker exiting");
}
