//! ual runtime: concurrency services on top of the ual container engine
//!
//! Key design principles:
//! - Everything shared between tasks is a ual-core `Stack`; there is no
//!   second queue primitive
//! - BlockingStack: a stack whose takes wait for producers (message passing)
//! - WorkStealStack: an owner LIFO view and a thief FIFO view over one stack
//! - WorkerPool: May coroutines draining and stealing from each other
//!
//! # Modules
//!
//! - `blocking`: BlockingStack (take, take_timeout, close)
//! - `worksteal`: WorkStealStack, WorkerPool and the pool counters
//! - `config`: environment-driven runtime configuration
//! - `report`: exit report controlled by `UAL_REPORT`
//! - `logging`: stderr log subscriber controlled by `UAL_LOG`

pub mod blocking;
pub mod config;
pub mod logging;
pub mod report;
pub mod worksteal;

pub use blocking::BlockingStack;
pub use config::{RuntimeConfig, runtime_config};
pub use report::{ReportConfig, emit_report};
pub use worksteal::{PoolError, PoolRun, WorkStealStack, WorkerPool, WorkerRun};
