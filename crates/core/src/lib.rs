//! ual core: the container engine behind ual programs
//!
//! Everything in ual lives on stacks. This crate provides the stack itself
//! and the ways of looking at it; the runtime crate adds blocking and
//! work-stealing adapters on top.
//!
//! Key design principles:
//! - Stack: one insertion-ordered sequence per stack, typed at construction
//! - Perspective: which element an unqualified read or remove selects
//!   (LIFO, FIFO, Max, Min, Keyed), switchable without moving data
//! - View: an independent cursor with its own perspective that never owns
//!   the stack it reads
//! - Borrow scope: a read-only or exclusive lens over a range, released
//!   when the guard drops
//!
//! # Modules
//!
//! - `value`: Value, Key and ElementType
//! - `perspective`: Perspective and OwnershipMode
//! - `error`: StackError and the crate Result alias
//! - `stack`: Stack and its builder
//! - `view`: View, its traversal iterator and StackRef
//! - `borrow`: BorrowScope and the range exclusivity rules
//! - `bring`: atomic transfer of one element between stacks
//! - `shuffle`: dup, swap, over, rot, nip and tuck on the newest elements
//! - `crosstack`: reading a stack of stacks across one level
//! - `walk`: whole-stack map, filter and reduce
//! - `config`: environment-driven storage tuning
//! - `stats`: engine-wide counters
//!
//! # Example
//!
//! ```
//! use ual_core::{ElementType, Perspective, Stack, View};
//!
//! let stack = Stack::new(ElementType::Int, Perspective::Lifo);
//! stack.push(10).unwrap();
//! stack.push(20).unwrap();
//!
//! let mut fifo = View::on(&stack, Perspective::Fifo);
//! assert_eq!(fifo.peek().unwrap().as_int(), Some(10));
//! fifo.advance().unwrap();
//! assert_eq!(fifo.peek().unwrap().as_int(), Some(20));
//! assert_eq!(stack.peek().unwrap().as_int(), Some(20));
//! ```

pub mod borrow;
pub mod bring;
pub mod config;
pub mod crosstack;
pub mod error;
pub mod perspective;
pub mod shuffle;
pub mod stack;
pub mod stats;
mod storage;
pub mod value;
pub mod view;
pub mod walk;

pub use borrow::{BorrowScope, borrow, take};
pub use config::{EngineConfig, engine_config};
pub use crosstack::Level;
pub use error::{Result, StackError};
pub use perspective::{OwnershipMode, Perspective};
pub use stack::{Comparator, Stack, StackBuilder};
pub use stats::EngineStats;
pub use value::{ElementType, Key, Value};
pub use view::{StackRef, View, ViewIter};
