//! Perspectives and ownership modes
//!
//! A perspective decides which element an unqualified read or remove
//! selects. It never changes the physical layout: every stack stores its
//! elements in insertion order, and each perspective is a different way of
//! picking from that one sequence.
//!
//! ```text
//!   physical:   [ 10 | 20 | 30 ]
//!                 ^          ^
//!               FIFO       LIFO
//!   Max / Min:  ranked by the stack's comparator
//!   Keyed:      addressed by an explicit key
//! ```

use serde::Serialize;
use std::fmt;

/// Selection strategy for reads and removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Perspective {
    /// Last in, first out: the physical tail
    #[default]
    Lifo,
    /// First in, first out: the physical head
    Fifo,
    /// Highest-ranked element by the stack's comparator
    Max,
    /// Lowest-ranked element by the stack's comparator
    Min,
    /// Element addressed by an explicit key
    Keyed,
}

impl Perspective {
    /// Whether selection needs the priority index
    pub fn is_priority(self) -> bool {
        matches!(self, Perspective::Max | Perspective::Min)
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Perspective::Lifo => "LIFO",
            Perspective::Fifo => "FIFO",
            Perspective::Max => "Max",
            Perspective::Min => "Min",
            Perspective::Keyed => "Keyed",
        };
        f.write_str(name)
    }
}

/// How a holder may use a stack's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OwnershipMode {
    /// Exclusive holder of the storage; releases it on destruction
    Owned,
    /// Read-only lens over a range of an Owned stack
    Borrowed,
    /// Read-write lens over a range of an Owned stack
    Mutable,
}

impl OwnershipMode {
    /// Whether structural mutation is allowed under this mode
    pub fn can_mutate(self) -> bool {
        !matches!(self, OwnershipMode::Borrowed)
    }
}

impl fmt::Display for OwnershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
