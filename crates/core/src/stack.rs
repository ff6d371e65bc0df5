//! Stack: typed, perspective-switchable storage
//!
//! A `Stack` owns its elements. Views and borrow scopes refer to it through
//! the shared `StackCell`, which is what the lock protects:
//!
//! ```text
//!   Stack (owner, not Clone) ──Arc──▶ StackCell ◀──Weak── View
//!                                      ├─ element type, comparator, capacity
//!                                      └─ RwLock<StackState>
//!                                           ├─ Storage (slots + indexes)
//!                                           ├─ frozen / released flags
//!                                           └─ BorrowTracker
//! ```
//!
//! Dropping the `Stack` releases the storage: the state is marked released,
//! the elements are dropped and every view still pointing at the cell reports
//! `DetachedView` from then on.
//!
//! ## Locking
//!
//! Every operation takes the cell lock once and never holds it while calling
//! into another stack. Reads take the read lock and only upgrade when an
//! index has to be built first. Displaced values are dropped after the lock
//! is released, since a `Value::Stack` drop locks its own cell.
//!
//! A poisoned lock is recovered rather than propagated: the state is only
//! modified through methods that leave it consistent at every return.

use crate::borrow::BorrowTracker;
use crate::error::{Result, StackError};
use crate::perspective::{OwnershipMode, Perspective};
use crate::stats::{
    FROZEN_REJECTIONS, PEEKS, POPS, PUSHES, STACKS_CREATED, STACKS_RELEASED, bump,
};
use crate::storage::{CompareFn, Selector, Storage, Window};
use crate::value::{ElementType, Key, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Shared priority comparator
pub type Comparator = Arc<CompareFn>;

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct StackState {
    pub(crate) released: bool,
    pub(crate) frozen: bool,
    pub(crate) perspective: Perspective,
    pub(crate) storage: Storage,
    pub(crate) borrows: BorrowTracker,
}

/// Who is performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Actor {
    /// The owner, or an unscoped view
    Direct,
    /// A view bound to a borrow scope
    Scope { id: u64, mode: OwnershipMode },
}

impl Actor {
    pub(crate) fn mode(self) -> OwnershipMode {
        match self {
            Actor::Direct => OwnershipMode::Owned,
            Actor::Scope { mode, .. } => mode,
        }
    }
}

/// Actor plus the part of the stack it may see
#[derive(Debug, Clone, Copy)]
pub(crate) struct Access {
    pub(crate) actor: Actor,
    pub(crate) window: Window,
}

impl Access {
    pub(crate) const DIRECT: Access = Access {
        actor: Actor::Direct,
        window: Window::All,
    };
}

pub(crate) struct StackCell {
    pub(crate) id: u64,
    element_type: ElementType,
    capacity: Option<usize>,
    comparator: Comparator,
    state: RwLock<StackState>,
}

impl StackCell {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StackState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StackState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn cmp(&self) -> &CompareFn {
        &*self.comparator
    }

    fn check_access(state: &StackState, actor: Actor) -> Result<()> {
        if state.released {
            return Err(StackError::DetachedView);
        }
        if let Actor::Scope { id, .. } = actor {
            if !state.borrows.is_live(id) {
                return Err(StackError::DetachedView);
            }
        }
        Ok(())
    }

    pub(crate) fn check_writable(state: &StackState, actor: Actor) -> Result<()> {
        Self::check_access(state, actor)?;
        if !actor.mode().can_mutate() {
            return Err(StackError::ReadOnly);
        }
        if state.frozen {
            bump(&FROZEN_REJECTIONS);
            return Err(StackError::Frozen);
        }
        Ok(())
    }

    /// Read the selected element and its key
    pub(crate) fn peek_entry(
        &self,
        selector: Selector<'_>,
        access: Access,
    ) -> Result<(Value, Option<Key>)> {
        bump(&PEEKS);
        {
            let state = self.read();
            Self::check_access(&state, access.actor)?;
            if state.storage.is_ready(&selector) {
                return Self::entry(&state, &selector, access.window, self.cmp());
            }
        }
        let mut state = self.write();
        Self::check_access(&state, access.actor)?;
        state.storage.prepare(&selector, self.cmp());
        Self::entry(&state, &selector, access.window, self.cmp())
    }

    fn entry(
        state: &StackState,
        selector: &Selector<'_>,
        window: Window,
        cmp: &CompareFn,
    ) -> Result<(Value, Option<Key>)> {
        let idx = state.storage.locate(selector, window, cmp)?;
        let slot = state.storage.slot(idx).ok_or(StackError::Empty)?;
        Ok((slot.value.clone(), slot.key.clone()))
    }

    /// Remove the selected element
    pub(crate) fn pop_entry(
        &self,
        selector: Selector<'_>,
        access: Access,
    ) -> Result<(Value, Option<Key>)> {
        let slot = {
            let mut state = self.write();
            Self::check_writable(&state, access.actor)?;
            let cmp = self.cmp();
            state.storage.prepare(&selector, cmp);
            let idx = state.storage.locate(&selector, access.window, cmp)?;
            let seq = state.storage.seq_of(idx);
            state.borrows.check_write(seq, access.actor)?;
            let slot = state.storage.remove(idx, cmp).ok_or(StackError::Empty)?;
            if state.borrows.is_empty() {
                state.storage.reclaim_tail();
                state.storage.compact_interior(cmp, false);
            }
            slot
        };
        bump(&POPS);
        Ok((slot.value, slot.key))
    }

    /// Append, or replace in place when `key` is already present.
    ///
    /// An unkeyed push is refused under the Keyed perspective: `perspective`,
    /// or the stack's default when None, read under the same lock as the push.
    pub(crate) fn push_entry(
        &self,
        value: Value,
        key: Option<Key>,
        perspective: Option<Perspective>,
        access: Access,
    ) -> Result<()> {
        let found = value.element_type();
        if found != self.element_type {
            return Err(StackError::TypeMismatch {
                expected: self.element_type,
                found,
            });
        }
        let displaced = {
            let mut state = self.write();
            Self::check_writable(&state, access.actor)?;
            if key.is_none() && perspective.unwrap_or(state.perspective) == Perspective::Keyed {
                return Err(StackError::KeyRequired);
            }
            let cmp = self.cmp();
            let existing_seq = match &key {
                Some(k) => state.storage.seq_for_key(k),
                None => None,
            };
            let existing =
                existing_seq.and_then(|seq| state.storage.index_of(seq).map(|idx| (seq, idx)));
            match existing {
                Some((seq, idx)) => {
                    state.borrows.check_write(seq, access.actor)?;
                    state.storage.replace(idx, value, cmp)
                }
                None => {
                    if let Some(capacity) = self.capacity {
                        if state.storage.len() >= capacity {
                            return Err(StackError::Full { capacity });
                        }
                    }
                    state.storage.push(value, key, cmp);
                    None
                }
            }
        };
        drop(displaced);
        bump(&PUSHES);
        Ok(())
    }

    /// Elements a traversal in `perspective` would visit
    pub(crate) fn traversal_len(&self, perspective: Perspective, access: Access) -> Result<usize> {
        let state = self.read();
        Self::check_access(&state, access.actor)?;
        Ok(state.storage.traversal_len(perspective, access.window))
    }

    /// Seqs of the elements from `skip` on, in traversal order
    pub(crate) fn traversal_seqs(
        &self,
        perspective: Perspective,
        access: Access,
        skip: usize,
    ) -> Result<Vec<u64>> {
        let state = self.read();
        Self::check_access(&state, access.actor)?;
        let order = state.storage.ordered(perspective, access.window, self.cmp());
        Ok(order
            .into_iter()
            .skip(skip)
            .map(|idx| state.storage.seq_of(idx))
            .collect())
    }

    /// Copies of every element in traversal order
    pub(crate) fn entries(
        &self,
        perspective: Perspective,
        access: Access,
    ) -> Result<Vec<(Value, Option<Key>)>> {
        let state = self.read();
        Self::check_access(&state, access.actor)?;
        let order = state.storage.ordered(perspective, access.window, self.cmp());
        Ok(order
            .into_iter()
            .filter_map(|idx| state.storage.slot(idx))
            .map(|slot| (slot.value.clone(), slot.key.clone()))
            .collect())
    }

    pub(crate) fn is_released(&self) -> bool {
        self.read().released
    }
}

/// Builder for stacks with a custom comparator or a capacity bound
pub struct StackBuilder {
    element_type: ElementType,
    perspective: Perspective,
    comparator: Option<Comparator>,
    capacity: Option<usize>,
}

impl StackBuilder {
    /// Default perspective for unqualified operations
    pub fn perspective(mut self, perspective: Perspective) -> Self {
        self.perspective = perspective;
        self
    }

    /// Ordering used by the Max and Min perspectives
    pub fn comparator<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(compare));
        self
    }

    /// Maximum number of live elements; pushes beyond it fail with `Full`
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Stack {
        let id = NEXT_STACK_ID.fetch_add(1, AtomicOrdering::Relaxed);
        let comparator: Comparator = match self.comparator {
            Some(compare) => compare,
            None => Arc::new(|a: &Value, b: &Value| a.compare(b)),
        };
        let cell = StackCell {
            id,
            element_type: self.element_type,
            capacity: self.capacity,
            comparator,
            state: RwLock::new(StackState {
                released: false,
                frozen: false,
                perspective: self.perspective,
                storage: Storage::with_capacity(self.capacity.unwrap_or(0).min(1024)),
                borrows: BorrowTracker::new(),
            }),
        };
        bump(&STACKS_CREATED);
        debug!(
            stack = id,
            element_type = %self.element_type,
            perspective = %self.perspective,
            "stack created"
        );
        Stack {
            cell: Arc::new(cell),
        }
    }
}

/// Stack: the owner of a typed element sequence
///
/// Unqualified operations (`push`, `pop`, `peek`) follow the stack's default
/// perspective. Use a [`View`](crate::View) for an independent cursor with a
/// different perspective.
pub struct Stack {
    cell: Arc<StackCell>,
}

impl Stack {
    /// Create an empty, Owned stack
    pub fn new(element_type: ElementType, perspective: Perspective) -> Self {
        Self::builder(element_type).perspective(perspective).build()
    }

    pub fn builder(element_type: ElementType) -> StackBuilder {
        StackBuilder {
            element_type,
            perspective: Perspective::default(),
            comparator: None,
            capacity: None,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<StackCell> {
        &self.cell
    }

    /// Process-unique identifier
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn element_type(&self) -> ElementType {
        self.cell.element_type
    }

    pub fn capacity(&self) -> Option<usize> {
        self.cell.capacity
    }

    /// A constructed stack is always the owner of its storage
    pub fn mode(&self) -> OwnershipMode {
        OwnershipMode::Owned
    }

    pub fn perspective(&self) -> Perspective {
        self.cell.read().perspective
    }

    /// Change the default perspective; the physical layout is untouched
    pub fn set_perspective(&self, perspective: Perspective) {
        let mut state = self.cell.write();
        if state.perspective != perspective {
            debug!(stack = self.cell.id, from = %state.perspective, to = %perspective, "perspective changed");
            state.perspective = perspective;
        }
    }

    pub fn len(&self) -> usize {
        self.cell.read().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append at the physical tail
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.cell.push_entry(value.into(), None, None, Access::DIRECT)
    }

    /// Append under `key`, or replace the value already stored under it
    pub fn push_keyed(&self, value: impl Into<Value>, key: impl Into<Key>) -> Result<()> {
        self.cell
            .push_entry(value.into(), Some(key.into()), None, Access::DIRECT)
    }

    /// Remove the element the default perspective selects
    pub fn pop(&self) -> Result<Value> {
        let perspective = self.perspective();
        self.cell
            .pop_entry(Selector::Nth(perspective, 0), Access::DIRECT)
            .map(|(value, _)| value)
    }

    /// Remove the element stored under `key`
    pub fn pop_key(&self, key: &Key) -> Result<Value> {
        self.cell
            .pop_entry(Selector::Key(key), Access::DIRECT)
            .map(|(value, _)| value)
    }

    /// Read the element the default perspective selects
    pub fn peek(&self) -> Result<Value> {
        let perspective = self.perspective();
        self.cell
            .peek_entry(Selector::Nth(perspective, 0), Access::DIRECT)
            .map(|(value, _)| value)
    }

    /// Read the element stored under `key`
    pub fn peek_key(&self, key: &Key) -> Result<Value> {
        self.cell
            .peek_entry(Selector::Key(key), Access::DIRECT)
            .map(|(value, _)| value)
    }

    /// Read the element `offset` steps into the default perspective's order
    pub fn peek_at(&self, offset: usize) -> Result<Value> {
        let perspective = self.perspective();
        self.cell
            .peek_entry(Selector::Walk(perspective, offset), Access::DIRECT)
            .map(|(value, _)| value)
            .map_err(|e| self.out_of_bounds(e, offset))
    }

    /// Remove the element `offset` steps into the default perspective's order
    pub fn pop_at(&self, offset: usize) -> Result<Value> {
        let perspective = self.perspective();
        self.cell
            .pop_entry(Selector::Walk(perspective, offset), Access::DIRECT)
            .map(|(value, _)| value)
            .map_err(|e| self.out_of_bounds(e, offset))
    }

    fn out_of_bounds(&self, err: StackError, offset: usize) -> StackError {
        match err {
            StackError::Empty if offset > 0 => StackError::OutOfBounds {
                offset,
                len: self.len(),
            },
            other => other,
        }
    }

    /// Make the stack read-only and compact its storage
    pub fn freeze(&self) {
        let mut state = self.cell.write();
        if state.frozen {
            return;
        }
        state.frozen = true;
        if state.borrows.is_empty() {
            state.storage.compact_interior(self.cell.cmp(), true);
        }
        debug!(stack = self.cell.id, len = state.storage.len(), "stack frozen");
    }

    /// Make a frozen stack mutable again
    pub fn thaw(&self) {
        let mut state = self.cell.write();
        if state.frozen {
            state.frozen = false;
            debug!(stack = self.cell.id, "stack thawed");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.cell.read().frozen
    }

    /// Copies of all elements in physical (insertion) order
    pub fn snapshot(&self) -> Vec<Value> {
        self.cell
            .entries(Perspective::Fifo, Access::DIRECT)
            .map(|entries| entries.into_iter().map(|(value, _)| value).collect())
            .unwrap_or_default()
    }

    /// Copies of all keyed elements in insertion order
    pub fn keyed_snapshot(&self) -> Vec<(Key, Value)> {
        self.cell
            .entries(Perspective::Keyed, Access::DIRECT)
            .map(|entries| {
                entries
                    .into_iter()
                    .filter_map(|(value, key)| key.map(|k| (k, value)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Destroy the stack now; views pointing at it become detached
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let drained = {
            let mut state = self.cell.write();
            state.released = true;
            state.borrows.clear();
            std::mem::take(&mut state.storage)
        };
        bump(&STACKS_RELEASED);
        debug!(stack = self.cell.id, elements = drained.len(), "stack released");
        drop(drained);
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.read();
        f.debug_struct("Stack")
            .field("id", &self.cell.id)
            .field("element_type", &self.cell.element_type)
            .field("perspective", &state.perspective)
            .field("len", &state.storage.len())
            .field("frozen", &state.frozen)
            .finish()
    }
}
