//! Borrow scopes
//!
//! A scope lends a contiguous range of an Owned stack to a holder, either
//! read-only (`Borrowed`) or read-write (`Mutable`). The rules are checked
//! when the scope is opened:
//!
//! - any number of `Borrowed` scopes may overlap each other
//! - a `Mutable` scope overlaps nothing else
//!
//! Ranges are logical positions in insertion order, `[lo, hi)`, and are
//! pinned to the elements they covered when the scope opened. Elements
//! pushed later land outside the range; elements removed later simply
//! disappear from it.
//!
//! While a scope is open the owner may not remove or replace an element in
//! its range (`BorrowConflict`). Reads are never blocked.
//!
//! Scopes are RAII guards: dropping one unregisters it exactly once, and any
//! view still bound to it reports `DetachedView` afterwards.
//!
//! ```text
//!   let scope = stack.borrow_range(0..3)?;    // Borrowed, shared
//!   scope.peek()?;
//!   drop(scope);                              // range free again
//!   stack.with_borrow(0..3, Mutable, |s| s.take())?;
//! ```

use crate::error::{Result, StackError};
use crate::perspective::{OwnershipMode, Perspective};
use crate::stack::{Actor, Stack};
use crate::stats::{BORROW_CONFLICTS, BORROWS_GRANTED, bump};
use crate::value::Value;
use crate::view::{ScopeBinding, View};
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct ScopeRecord {
    id: u64,
    lo: u64,
    hi: u64,
    mode: OwnershipMode,
}

impl ScopeRecord {
    fn overlaps(&self, lo: u64, hi: u64) -> bool {
        self.lo < hi && lo < self.hi
    }

    fn covers(&self, seq: u64) -> bool {
        self.lo <= seq && seq < self.hi
    }
}

/// Outstanding scopes of one stack, kept under the stack's lock
#[derive(Debug, Default)]
pub(crate) struct BorrowTracker {
    next_id: u64,
    scopes: Vec<ScopeRecord>,
}

impl BorrowTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub(crate) fn is_live(&self, id: u64) -> bool {
        self.scopes.iter().any(|s| s.id == id)
    }

    /// Register a scope over seqs `[lo, hi)` if no held scope conflicts
    pub(crate) fn acquire(&mut self, lo: u64, hi: u64, mode: OwnershipMode) -> Result<u64> {
        if let Some(held) = self
            .scopes
            .iter()
            .find(|s| s.overlaps(lo, hi) && (mode != OwnershipMode::Borrowed || s.mode != OwnershipMode::Borrowed))
        {
            bump(&BORROW_CONFLICTS);
            return Err(StackError::BorrowConflict {
                requested: mode,
                held: held.mode,
            });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.scopes.push(ScopeRecord { id, lo, hi, mode });
        bump(&BORROWS_GRANTED);
        Ok(id)
    }

    /// Unregister a scope; false if it was already gone
    pub(crate) fn release(&mut self, id: u64) -> bool {
        let before = self.scopes.len();
        self.scopes.retain(|s| s.id != id);
        self.scopes.len() != before
    }

    /// Whether `actor` may remove or replace the element at `seq`
    pub(crate) fn check_write(&self, seq: u64, actor: Actor) -> Result<()> {
        for scope in self.scopes.iter().filter(|s| s.covers(seq)) {
            if matches!(actor, Actor::Scope { id, .. } if id == scope.id) {
                continue;
            }
            bump(&BORROW_CONFLICTS);
            return Err(StackError::BorrowConflict {
                requested: actor.mode(),
                held: scope.mode,
            });
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.scopes.clear();
    }
}

/// An open borrow over a range of a stack
///
/// Holds a view restricted to the range. The view's perspective starts as
/// the stack's default and can be changed through [`view_mut`](Self::view_mut).
pub struct BorrowScope<'a> {
    stack: &'a Stack,
    id: u64,
    mode: OwnershipMode,
    range: Range<usize>,
    view: View,
}

impl<'a> BorrowScope<'a> {
    pub fn mode(&self) -> OwnershipMode {
        self.mode
    }

    /// The logical range requested when the scope opened
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn stack(&self) -> &'a Stack {
        self.stack
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn peek(&self) -> Result<Value> {
        self.view.peek()
    }

    /// Remove the selected element; Borrowed scopes are read-only
    pub fn take(&mut self) -> Result<Value> {
        self.view.pop()
    }

    /// Elements of the range still present
    pub fn len(&self) -> Result<usize> {
        self.view.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Copies of the range's elements in the view's perspective order
    pub fn values(&self) -> Result<Vec<Value>> {
        self.view.values()
    }
}

impl Drop for BorrowScope<'_> {
    fn drop(&mut self) {
        let released = {
            let mut state = self.stack.cell().write();
            let released = state.borrows.release(self.id);
            if state.borrows.is_empty() {
                state.storage.reclaim_tail();
            }
            released
        };
        if released {
            debug!(stack = self.stack.id(), scope = self.id, mode = %self.mode, "borrow released");
        }
        self.view.detach();
    }
}

impl std::fmt::Debug for BorrowScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowScope")
            .field("stack", &self.stack.id())
            .field("mode", &self.mode)
            .field("range", &self.range)
            .finish()
    }
}

impl Stack {
    /// Open a read-only scope over `range`
    pub fn borrow_range(&self, range: Range<usize>) -> Result<BorrowScope<'_>> {
        borrow(range, self, OwnershipMode::Borrowed)
    }

    /// Open an exclusive read-write scope over `range`
    pub fn borrow_range_mut(&self, range: Range<usize>) -> Result<BorrowScope<'_>> {
        borrow(range, self, OwnershipMode::Mutable)
    }

    /// Run `f` inside a scope; the scope closes when `f` returns
    pub fn with_borrow<R>(
        &self,
        range: Range<usize>,
        mode: OwnershipMode,
        f: impl FnOnce(&mut BorrowScope<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut scope = borrow(range, self, mode)?;
        f(&mut scope)
    }
}

/// Open a scope over `range` of `stack`.
///
/// Asking for `Owned` opens an exclusive scope, the same as `Mutable`.
pub fn borrow(range: Range<usize>, stack: &Stack, mode: OwnershipMode) -> Result<BorrowScope<'_>> {
    let mode = match mode {
        OwnershipMode::Owned => OwnershipMode::Mutable,
        other => other,
    };
    let (binding, perspective) = {
        let mut state = stack.cell().write();
        if state.released {
            return Err(StackError::DetachedView);
        }
        let len = state.storage.len();
        let (lo, hi) = state
            .storage
            .seq_range(range.start, range.end)
            .ok_or(StackError::InvalidRange {
                lo: range.start,
                hi: range.end,
                len,
            })?;
        let id = state.borrows.acquire(lo, hi, mode).inspect_err(|_| {
            debug!(stack = stack.id(), lo = range.start, hi = range.end, mode = %mode, "borrow refused");
        })?;
        (ScopeBinding { id, lo, hi, mode }, scope_perspective(state.perspective))
    };
    debug!(stack = stack.id(), scope = binding.id, lo = range.start, hi = range.end, mode = %mode, "borrow granted");
    Ok(BorrowScope {
        stack,
        id: binding.id,
        mode,
        range,
        view: View::scoped(stack, binding, perspective),
    })
}

/// Remove the element the stack's default perspective selects, as its owner
pub fn take(stack: &Stack) -> Result<Value> {
    stack.pop()
}

// Keyed stacks lend their scopes in insertion order
fn scope_perspective(default: Perspective) -> Perspective {
    if default == Perspective::Keyed {
        Perspective::Fifo
    } else {
        default
    }
}
