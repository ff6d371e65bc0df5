//! Views: independent cursors over a stack
//!
//! A view never owns the stack it looks at. It holds a weak reference, its
//! own perspective and a cursor, so several views can walk the same stack in
//! different orders without affecting each other or the stack's default
//! perspective.
//!
//! ```text
//!   stack:   [ 10 | 20 | 30 ]
//!   lifo view, cursor 0  ->  30
//!   fifo view, cursor 1  ->  20
//! ```
//!
//! The cursor is a logical offset into the perspective's order. `pop`
//! removes the element at the cursor and leaves the cursor where it is, so
//! the next element slides under it.
//!
//! Once the stack is dropped (or the borrow scope a view is bound to ends),
//! every operation reports `DetachedView`. Re-attaching resets the cursor.

use crate::error::{Result, StackError};
use crate::perspective::{OwnershipMode, Perspective};
use crate::stack::{Access, Actor, Stack, StackCell};
use crate::storage::{Selector, Window};
use crate::value::{ElementType, Key, Value};
use std::fmt;
use std::sync::{Arc, Weak};

/// Ties a view to an open borrow scope
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeBinding {
    pub(crate) id: u64,
    pub(crate) lo: u64,
    pub(crate) hi: u64,
    pub(crate) mode: OwnershipMode,
}

/// View: a perspective and a cursor over someone else's stack
#[derive(Clone)]
pub struct View {
    target: Option<Weak<StackCell>>,
    perspective: Perspective,
    cursor: usize,
    scope: Option<ScopeBinding>,
}

impl View {
    /// An unattached view
    pub fn new(perspective: Perspective) -> Self {
        Self {
            target: None,
            perspective,
            cursor: 0,
            scope: None,
        }
    }

    /// A view already attached to `stack`
    pub fn on(stack: &Stack, perspective: Perspective) -> Self {
        let mut view = Self::new(perspective);
        view.attach(stack);
        view
    }

    pub(crate) fn scoped(stack: &Stack, binding: ScopeBinding, perspective: Perspective) -> Self {
        Self {
            target: Some(Arc::downgrade(stack.cell())),
            perspective,
            cursor: 0,
            scope: Some(binding),
        }
    }

    pub(crate) fn with_cursor(mut self, cursor: usize) -> Self {
        self.cursor = cursor;
        self
    }

    /// Point at `stack` with the cursor at the start
    pub fn attach(&mut self, stack: &Stack) {
        self.target = Some(Arc::downgrade(stack.cell()));
        self.scope = None;
        self.cursor = 0;
    }

    pub fn detach(&mut self) {
        self.target = None;
        self.scope = None;
        self.cursor = 0;
    }

    /// Whether operations would reach a live stack
    pub fn is_attached(&self) -> bool {
        self.resolve().is_ok()
    }

    /// Whether this view points at `stack`
    pub fn is_attached_to(&self, stack: &Stack) -> bool {
        self.target
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(stack.cell())))
            && self.is_attached()
    }

    /// The stack this view reads, if it is still alive
    pub fn stack(&self) -> Option<StackRef> {
        self.resolve().ok().map(|(cell, _)| StackRef { cell })
    }

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    /// Switch perspective; the cursor goes back to the start
    pub fn set_perspective(&mut self, perspective: Perspective) {
        self.perspective = perspective;
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Owned for plain views, the scope's mode for scoped ones
    pub fn mode(&self) -> OwnershipMode {
        self.scope
            .map(|binding| binding.mode)
            .unwrap_or(OwnershipMode::Owned)
    }

    fn resolve(&self) -> Result<(Arc<StackCell>, Access)> {
        let cell = self
            .target
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(StackError::DetachedView)?;
        let access = match self.scope {
            Some(binding) => Access {
                actor: Actor::Scope {
                    id: binding.id,
                    mode: binding.mode,
                },
                window: Window::Seqs {
                    lo: binding.lo,
                    hi: binding.hi,
                },
            },
            None => Access::DIRECT,
        };
        {
            let state = cell.read();
            let scope_gone = matches!(access.actor, Actor::Scope { id, .. } if !state.borrows.is_live(id));
            if state.released || scope_gone {
                return Err(StackError::DetachedView);
            }
        }
        Ok((cell, access))
    }

    /// Read the element at the cursor
    pub fn peek(&self) -> Result<Value> {
        let (cell, access) = self.resolve()?;
        cell.peek_entry(Selector::Nth(self.perspective, self.cursor), access)
            .map(|(value, _)| value)
    }

    /// Read the element stored under `key`
    pub fn peek_key(&self, key: &Key) -> Result<Value> {
        let (cell, access) = self.resolve()?;
        cell.peek_entry(Selector::Key(key), access)
            .map(|(value, _)| value)
    }

    /// Remove the element at the cursor
    pub fn pop(&self) -> Result<Value> {
        let (cell, access) = self.resolve()?;
        cell.pop_entry(Selector::Nth(self.perspective, self.cursor), access)
            .map(|(value, _)| value)
    }

    /// Remove the element stored under `key`
    pub fn pop_key(&self, key: &Key) -> Result<Value> {
        let (cell, access) = self.resolve()?;
        cell.pop_entry(Selector::Key(key), access)
            .map(|(value, _)| value)
    }

    /// Append to the viewed stack
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let (cell, access) = self.resolve()?;
        cell.push_entry(value.into(), None, Some(self.perspective), access)
    }

    /// Append under `key`, or replace the value already stored under it
    pub fn push_keyed(&self, value: impl Into<Value>, key: impl Into<Key>) -> Result<()> {
        let (cell, access) = self.resolve()?;
        cell.push_entry(value.into(), Some(key.into()), Some(self.perspective), access)
    }

    /// Move the cursor one element further without removing anything
    pub fn advance(&mut self) -> Result<()> {
        if self.remaining()? == 0 {
            return Err(StackError::Empty);
        }
        self.cursor += 1;
        Ok(())
    }

    /// Elements from the cursor to the end of the perspective's order
    pub fn remaining(&self) -> Result<usize> {
        let (cell, access) = self.resolve()?;
        let total = cell.traversal_len(self.perspective, access)?;
        Ok(total.saturating_sub(self.cursor))
    }

    /// Live elements visible to this view, regardless of the cursor
    pub fn len(&self) -> Result<usize> {
        let (cell, access) = self.resolve()?;
        cell.traversal_len(Perspective::Fifo, access)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Copies of the elements from the cursor on, in perspective order
    pub fn values(&self) -> Result<Vec<Value>> {
        let (cell, access) = self.resolve()?;
        let entries = cell.entries(self.perspective, access)?;
        Ok(entries
            .into_iter()
            .skip(self.cursor)
            .map(|(value, _)| value)
            .collect())
    }

    /// Lazy traversal from the cursor; each step advances the cursor.
    ///
    /// The order is fixed when the first element is read: elements pushed
    /// afterwards are not visited, and elements removed meanwhile are
    /// skipped. A traversal that pushes into the stack it walks still ends.
    pub fn iter(&mut self) -> ViewIter<'_> {
        ViewIter {
            view: self,
            order: None,
            next: 0,
            done: false,
        }
    }

    /// Push `transform(v)` into `dest` for every element from the cursor on.
    ///
    /// Keys travel with their values. Returns the number of elements pushed.
    pub fn walk<F>(&mut self, transform: F, dest: &Stack) -> Result<usize>
    where
        F: FnMut(Value) -> Value,
    {
        self.walk_where(transform, dest, |_| true)
    }

    /// Like [`walk`](Self::walk), skipping source elements `filter` rejects
    pub fn walk_where<F, P>(&mut self, mut transform: F, dest: &Stack, mut filter: P) -> Result<usize>
    where
        F: FnMut(Value) -> Value,
        P: FnMut(&Value) -> bool,
    {
        let mut pushed = 0;
        let mut steps = self.iter();
        while let Some(entry) = steps.next_entry() {
            let (value, key) = entry?;
            if !filter(&value) {
                continue;
            }
            push_into(dest, transform(value), key)?;
            pushed += 1;
        }
        Ok(pushed)
    }

    /// Walk with a fallible transform.
    ///
    /// With an error stack (element type `Str`), failures are recorded there
    /// as messages and the walk continues; without one the first failure
    /// ends the walk.
    pub fn try_walk<F>(&mut self, mut transform: F, dest: &Stack, errors: Option<&Stack>) -> Result<usize>
    where
        F: FnMut(Value) -> Result<Value>,
    {
        if let Some(errors) = errors {
            if errors.element_type() != ElementType::Str {
                return Err(StackError::TypeMismatch {
                    expected: ElementType::Str,
                    found: errors.element_type(),
                });
            }
        }
        let mut pushed = 0;
        let mut steps = self.iter();
        while let Some(entry) = steps.next_entry() {
            let (value, key) = entry?;
            match transform(value) {
                Ok(out) => {
                    push_into(dest, out, key)?;
                    pushed += 1;
                }
                Err(err) => match errors {
                    Some(errors) => errors.push(err.to_string())?,
                    None => return Err(err),
                },
            }
        }
        Ok(pushed)
    }
}

fn push_into(dest: &Stack, value: Value, key: Option<Key>) -> Result<()> {
    match key {
        Some(key) => dest.push_keyed(value, key),
        None => dest.push(value),
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("perspective", &self.perspective)
            .field("cursor", &self.cursor)
            .field("mode", &self.mode())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Traversal of a view; see [`View::iter`]
pub struct ViewIter<'v> {
    view: &'v mut View,
    order: Option<Vec<u64>>,
    next: usize,
    done: bool,
}

impl ViewIter<'_> {
    fn fail(&mut self, err: StackError) -> Option<Result<(Value, Option<Key>)>> {
        self.done = true;
        Some(Err(err))
    }

    fn next_entry(&mut self) -> Option<Result<(Value, Option<Key>)>> {
        if self.done {
            return None;
        }
        let (cell, access) = match self.view.resolve() {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(e),
        };
        if self.order.is_none() {
            match cell.traversal_seqs(self.view.perspective, access, self.view.cursor) {
                Ok(order) => self.order = Some(order),
                Err(e) => return self.fail(e),
            }
        }
        while let Some(seq) = self.order.as_ref().and_then(|o| o.get(self.next)).copied() {
            self.next += 1;
            match cell.peek_entry(Selector::Seq(seq), access) {
                Ok(entry) => {
                    self.view.cursor += 1;
                    return Some(Ok(entry));
                }
                // Removed since the order was taken
                Err(StackError::Empty) => continue,
                Err(e) => return self.fail(e),
            }
        }
        self.done = true;
        None
    }
}

impl Iterator for ViewIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|entry| entry.map(|(value, _)| value))
    }
}

impl std::iter::FusedIterator for ViewIter<'_> {}

/// A view's handle on its stack, for inspection
///
/// Keeps only the emptied shell alive if the stack is dropped meanwhile.
#[derive(Clone)]
pub struct StackRef {
    cell: Arc<StackCell>,
}

impl StackRef {
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn element_type(&self) -> ElementType {
        self.cell.element_type()
    }

    pub fn len(&self) -> usize {
        self.cell.read().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_frozen(&self) -> bool {
        self.cell.read().frozen
    }

    pub fn is_released(&self) -> bool {
        self.cell.is_released()
    }

    /// Whether this is `stack`
    pub fn is(&self, stack: &Stack) -> bool {
        Arc::ptr_eq(&self.cell, stack.cell())
    }
}

impl fmt::Debug for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRef").field("id", &self.cell.id).finish()
    }
}
