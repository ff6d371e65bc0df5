//! Stack Error Handling
//!
//! Every engine operation returns an explicit `Result`. Nothing in this crate
//! panics on a bad request: an empty selection, a frozen stack, a stale view
//! or a conflicting borrow all come back as a `StackError` for the calling
//! layer (compiler output or interpreter) to decide on.
//!
//! # Usage
//!
//! ```ignore
//! match view.pop() {
//!     Ok(value) => consume(value),
//!     Err(StackError::Empty) => idle(),
//!     Err(other) => return Err(other),
//! }
//! ```

use crate::perspective::OwnershipMode;
use crate::value::{ElementType, Key};
use std::fmt;

/// Errors produced by stacks, views and borrow scopes.
#[derive(Debug, Clone, PartialEq)]
pub enum StackError {
    /// The selection found nothing to return
    Empty,
    /// A structural mutation was attempted on a frozen stack
    Frozen,
    /// The view is not attached, was detached, or its stack was released
    DetachedView,
    /// Keyed selection on a key that is not present
    KeyNotFound(Key),
    /// Keyed selection without a key
    KeyRequired,
    /// A borrow or mutation overlaps an outstanding borrow it is not compatible with
    BorrowConflict {
        requested: OwnershipMode,
        held: OwnershipMode,
    },
    /// The pushed value does not match the stack's element type
    TypeMismatch {
        expected: ElementType,
        found: ElementType,
    },
    /// Positional access past the live range
    OutOfBounds { offset: usize, len: usize },
    /// A shuffling word needs more elements than the stack holds
    Underflow { needed: usize, len: usize },
    /// Mutation attempted through a read-only (Borrowed) scope
    ReadOnly,
    /// Borrow range is empty, inverted, or past the end of the stack
    InvalidRange { lo: usize, hi: usize, len: usize },
    /// Push on a capped stack that is at capacity
    Full { capacity: usize },
    /// The stack was closed and holds no more elements
    Closed,
    /// A blocking take gave up waiting
    Timeout,
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::Empty => write!(f, "stack empty"),
            StackError::Frozen => write!(f, "stack is frozen"),
            StackError::DetachedView => write!(f, "view is not attached to a live stack"),
            StackError::KeyNotFound(key) => write!(f, "key not found: {}", key),
            StackError::KeyRequired => write!(f, "keyed perspective requires a key"),
            StackError::BorrowConflict { requested, held } => write!(
                f,
                "borrow conflict: {} access requested over an outstanding {} borrow",
                requested, held
            ),
            StackError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            StackError::OutOfBounds { offset, len } => {
                write!(f, "offset {} out of bounds for {} elements", offset, len)
            }
            StackError::Underflow { needed, len } => {
                write!(f, "stack underflow: needs {} elements, has {}", needed, len)
            }
            StackError::ReadOnly => write!(f, "cannot mutate through a read-only borrow"),
            StackError::InvalidRange { lo, hi, len } => {
                write!(f, "invalid borrow range [{}, {}) over {} elements", lo, hi, len)
            }
            StackError::Full { capacity } => write!(f, "stack full (capacity {})", capacity),
            StackError::Closed => write!(f, "stack closed"),
            StackError::Timeout => write!(f, "take timed out"),
        }
    }
}

impl std::error::Error for StackError {}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(StackError::Empty.to_string(), "stack empty");
        assert_eq!(StackError::Frozen.to_string(), "stack is frozen");
        assert_eq!(
            StackError::Underflow { needed: 3, len: 1 }.to_string(),
            "stack underflow: needs 3 elements, has 1"
        );
        assert_eq!(
            StackError::KeyNotFound(Key::from("a")).to_string(),
            "key not found: \"a\""
        );
        assert_eq!(
            StackError::TypeMismatch {
                expected: ElementType::Int,
                found: ElementType::Str,
            }
            .to_string(),
            "type mismatch: expected Int, found Str"
        );
    }

    #[test]
    fn test_borrow_conflict_display_names_modes() {
        let err = StackError::BorrowConflict {
            requested: OwnershipMode::Borrowed,
            held: OwnershipMode::Mutable,
        };
        let msg = err.to_string();
        assert!(msg.contains("Borrowed"));
        assert!(msg.contains("Mutable"));
    }
}
