//! Work stealing over a single stack
//!
//! A `WorkStealStack` is one LIFO stack with two views attached for its
//! whole life:
//!
//! ```text
//!            thief (FIFO view)            owner (LIFO view)
//!                   │                            │
//!                   ▼                            ▼
//!   stack:       [ t1 | t2 | t3 | t4 | t5 ]
//!                oldest                 newest
//! ```
//!
//! The owner pushes and pops at the newest end, where its work is hot; a
//! thief takes from the oldest end. Both go through the stack's lock, so each
//! element is delivered to exactly one of them in every interleaving.
//!
//! ## Worker Pool
//!
//! `WorkerPool::run` spreads tasks round-robin over one `WorkStealStack`
//! per worker and runs each worker as a May coroutine. A worker drains its
//! own stack, then steals from its siblings in ring order, and finishes once
//! its own stack and every sibling's are empty. Tasks are never added during
//! a run, so an empty ring means all work has been handed out.
//!
//! Only `StackError::Empty` means "nothing left here". Any other error from a
//! queue (a frozen or released stack) stops that worker, and the run reports
//! it as `PoolError::Worker` once every worker has been joined.
//!
//! ## Counters
//!
//! - `TASKS_RUN`: tasks executed by any pool, ever
//! - `TASKS_STOLEN`: of those, tasks a worker took from a sibling

use crate::config::{RuntimeConfig, runtime_config};
use may::coroutine;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use ual_core::{ElementType, Perspective, Result, Stack, StackError, Value, View};

pub static TASKS_RUN: AtomicU64 = AtomicU64::new(0);
pub static TASKS_STOLEN: AtomicU64 = AtomicU64::new(0);

static SCHEDULER_INIT: Once = Once::new();
static SCHEDULER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Configure May from the runtime configuration (idempotent)
pub fn init_scheduler() {
    SCHEDULER_INIT.call_once(|| {
        let config = runtime_config();
        may::config()
            .set_stack_size(config.stack_size)
            .set_workers(config.workers);
        SCHEDULER_START_TIME.get_or_init(Instant::now);
        info!(
            workers = config.workers,
            stack_size = config.stack_size,
            "scheduler configured"
        );
    });
}

/// Time since the scheduler was configured
pub fn scheduler_elapsed() -> Option<Duration> {
    SCHEDULER_START_TIME.get().map(Instant::elapsed)
}

/// A LIFO stack shared by its owner and any number of thieves
pub struct WorkStealStack {
    stack: Stack,
    owner: View,
    thief: View,
}

impl WorkStealStack {
    pub fn new(element_type: ElementType) -> Self {
        let stack = Stack::new(element_type, Perspective::Lifo);
        let owner = View::on(&stack, Perspective::Lifo);
        let thief = View::on(&stack, Perspective::Fifo);
        Self {
            stack,
            owner,
            thief,
        }
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.owner.push(value)
    }

    /// Newest element, for the owner
    pub fn pop(&self) -> Result<Value> {
        self.owner.pop()
    }

    /// Oldest element, for a thief
    pub fn steal(&self) -> Result<Value> {
        self.thief.pop()
    }

    /// Up to `max` of the oldest elements, oldest first.
    ///
    /// Stops early when the stack runs empty. Any other error is returned,
    /// unless elements were already taken: those are handed back and the
    /// next call reports the error.
    pub fn steal_batch(&self, max: usize) -> Result<Vec<Value>> {
        let mut loot = Vec::with_capacity(max);
        while loot.len() < max {
            match self.steal() {
                Ok(value) => loot.push(value),
                Err(StackError::Empty) => break,
                Err(_) if !loot.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(loot)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Per-worker tallies of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerRun {
    pub executed: u64,
    pub stolen: u64,
}

/// Result of `WorkerPool::run`
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolRun {
    pub tasks_run: u64,
    pub tasks_stolen: u64,
    pub workers: Vec<WorkerRun>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolError {
    /// Seeding the workers' stacks failed
    Stack(StackError),
    /// A task panicked; the worker's remaining tasks may not have run
    WorkerPanicked(usize),
    /// A worker's queue failed with something other than running empty
    Worker { id: usize, error: StackError },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Stack(e) => write!(f, "stack error: {}", e),
            PoolError::WorkerPanicked(id) => write!(f, "worker {} panicked", id),
            PoolError::Worker { id, error } => write!(f, "worker {} stopped: {}", id, error),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<StackError> for PoolError {
    fn from(e: StackError) -> Self {
        PoolError::Stack(e)
    }
}

/// Fixed-size pool of work-stealing coroutines
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    steal_batch: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            steal_batch: crate::config::DEFAULT_STEAL_BATCH,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.workers).with_steal_batch(config.steal_batch)
    }

    pub fn with_steal_batch(mut self, batch: usize) -> Self {
        self.steal_batch = batch.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` once for every element of `tasks`
    pub fn run<I, F>(&self, element_type: ElementType, tasks: I, task: F) -> std::result::Result<PoolRun, PoolError>
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value) + Send + Sync + 'static,
    {
        init_scheduler();

        let queues: Arc<Vec<WorkStealStack>> = Arc::new(
            (0..self.workers)
                .map(|_| WorkStealStack::new(element_type))
                .collect(),
        );
        let mut seeded = 0usize;
        for (i, value) in tasks.into_iter().enumerate() {
            queues[i % self.workers].push(value)?;
            seeded += 1;
        }
        debug!(workers = self.workers, tasks = seeded, "pool run starting");

        let task = Arc::new(task);
        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                let queues = Arc::clone(&queues);
                let task = Arc::clone(&task);
                let batch = self.steal_batch;
                // Safety: the coroutine only touches data it owns through Arcs
                unsafe { coroutine::spawn(move || work(id, &queues, task.as_ref(), batch)) }
            })
            .collect();

        let mut run = PoolRun::default();
        let mut failure = None;
        for (id, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.join() {
                Ok(Ok(worker)) => Ok(worker),
                Ok(Err(error)) => Err(PoolError::Worker { id, error }),
                Err(_) => Err(PoolError::WorkerPanicked(id)),
            };
            match outcome {
                Ok(worker) => {
                    run.tasks_run += worker.executed;
                    run.tasks_stolen += worker.stolen;
                    run.workers.push(worker);
                }
                Err(e) => {
                    warn!(error = %e, "pool worker failed");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        TASKS_RUN.fetch_add(run.tasks_run, Ordering::Relaxed);
        TASKS_STOLEN.fetch_add(run.tasks_stolen, Ordering::Relaxed);
        debug!(tasks_run = run.tasks_run, tasks_stolen = run.tasks_stolen, "pool run finished");
        Ok(run)
    }
}

fn work<F>(id: usize, queues: &[WorkStealStack], task: &F, batch: usize) -> Result<WorkerRun>
where
    F: Fn(Value),
{
    let own = &queues[id];
    let mut tally = WorkerRun::default();
    loop {
        match own.pop() {
            Ok(value) => {
                task(value);
                tally.executed += 1;
                continue;
            }
            Err(StackError::Empty) => {}
            Err(e) => return Err(e),
        }

        let mut loot = Vec::new();
        for offset in 1..queues.len() {
            loot = queues[(id + offset) % queues.len()].steal_batch(batch)?;
            if !loot.is_empty() {
                break;
            }
        }
        if loot.is_empty() {
            return Ok(tally);
        }
        for value in loot {
            task(value);
            tally.executed += 1;
            tally.stolen += 1;
        }
        coroutine::yield_now();
    }
}
