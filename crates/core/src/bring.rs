//! Bring: move one element from one stack to another
//!
//! `dest.bring(&source, key)` removes the element the source's default
//! perspective selects, converts it to the destination's element type and
//! stores it on the destination. Both locks are held for the whole transfer
//! and every check runs before anything moves, so either both stacks change
//! or neither does.
//!
//! ```text
//!   source [1 2 3]  (LIFO)          dest ["a"]  (Str)
//!              └──── 3 ── convert ──▶ ["a" "3"]
//! ```
//!
//! Locks are taken in stack id order, so two transfers in opposite
//! directions cannot deadlock. Bringing from a stack to itself takes its
//! lock once.

use crate::error::{Result, StackError};
use crate::perspective::Perspective;
use crate::stack::{Actor, Stack, StackCell, StackState};
use crate::stats::{TRANSFERS, bump};
use crate::storage::{Selector, Window};
use crate::value::{Key, Value};
use std::sync::{Arc, RwLockWriteGuard};
use tracing::debug;

/// The source element, validated but still in place
struct Outgoing {
    seq: u64,
    value: Value,
    key: Option<Key>,
}

/// Where the converted value lands on the destination
enum Landing {
    Append,
    Replace(u64),
}

impl Stack {
    /// Move the element `source` would pop onto this stack.
    ///
    /// The value is converted to this stack's element type; a value that
    /// does not convert fails with `TypeMismatch` and leaves both stacks
    /// untouched. The element is stored under `key`, or under the key it
    /// had on the source when `key` is None. A Keyed destination refuses a
    /// transfer that ends up with no key.
    pub fn bring(&self, source: &Stack, key: Option<Key>) -> Result<()> {
        let dest = self.cell();
        let src = source.cell();
        let displaced = if Arc::ptr_eq(dest, src) {
            let mut state = dest.write();
            transfer_within(dest, &mut state, key)?
        } else {
            let (mut from, mut to) = lock_in_order(src, dest);
            transfer_across(src, &mut from, dest, &mut to, key)?
        };
        drop(displaced);
        bump(&TRANSFERS);
        debug!(from = source.id(), to = self.id(), "element brought");
        Ok(())
    }
}

fn lock_in_order<'a>(
    src: &'a StackCell,
    dest: &'a StackCell,
) -> (
    RwLockWriteGuard<'a, StackState>,
    RwLockWriteGuard<'a, StackState>,
) {
    if src.id < dest.id {
        let from = src.write();
        let to = dest.write();
        (from, to)
    } else {
        let to = dest.write();
        let from = src.write();
        (from, to)
    }
}

fn transfer_across(
    src: &StackCell,
    from: &mut StackState,
    dest: &StackCell,
    to: &mut StackState,
    key: Option<Key>,
) -> Result<Vec<Value>> {
    let out = select_outgoing(src, from)?;
    let value = out.value.convert_to(dest.element_type())?;
    let key = key.or(out.key);
    let landing = plan_landing(dest, to, key.as_ref(), None)?;

    let removed = remove_outgoing(src, from, out.seq);
    settle(src, from);
    let replaced = land(dest, to, landing, value, key);
    Ok(removed.into_iter().chain(replaced).collect())
}

fn transfer_within(cell: &StackCell, state: &mut StackState, key: Option<Key>) -> Result<Vec<Value>> {
    let out = select_outgoing(cell, state)?;
    let key = key.or(out.key);
    let landing = plan_landing(cell, state, key.as_ref(), Some(out.seq))?;

    let removed = remove_outgoing(cell, state, out.seq);
    let replaced = land(cell, state, landing, out.value, key);
    settle(cell, state);
    Ok(removed.into_iter().chain(replaced).collect())
}

fn select_outgoing(cell: &StackCell, state: &mut StackState) -> Result<Outgoing> {
    StackCell::check_writable(state, Actor::Direct)?;
    let selector = match state.perspective {
        Perspective::Keyed => Selector::Walk(Perspective::Keyed, 0),
        p => Selector::Nth(p, 0),
    };
    let cmp = cell.cmp();
    state.storage.prepare(&selector, cmp);
    let idx = state.storage.locate(&selector, Window::All, cmp)?;
    let seq = state.storage.seq_of(idx);
    state.borrows.check_write(seq, Actor::Direct)?;
    let slot = state.storage.slot(idx).ok_or(StackError::Empty)?;
    Ok(Outgoing {
        seq,
        value: slot.value.clone(),
        key: slot.key.clone(),
    })
}

// `vacated` is the source seq when source and destination are one stack
fn plan_landing(
    cell: &StackCell,
    state: &mut StackState,
    key: Option<&Key>,
    vacated: Option<u64>,
) -> Result<Landing> {
    StackCell::check_writable(state, Actor::Direct)?;
    if key.is_none() && state.perspective == Perspective::Keyed {
        return Err(StackError::KeyRequired);
    }
    let existing = match key {
        Some(k) => state.storage.seq_for_key(k),
        None => None,
    };
    let existing = existing
        .filter(|&seq| Some(seq) != vacated)
        .filter(|&seq| state.storage.index_of(seq).is_some());
    if let Some(seq) = existing {
        state.borrows.check_write(seq, Actor::Direct)?;
        return Ok(Landing::Replace(seq));
    }
    if let Some(capacity) = cell.capacity() {
        let len = state.storage.len() - usize::from(vacated.is_some());
        if len >= capacity {
            return Err(StackError::Full { capacity });
        }
    }
    Ok(Landing::Append)
}

fn remove_outgoing(cell: &StackCell, state: &mut StackState, seq: u64) -> Option<Value> {
    let idx = state.storage.index_of(seq)?;
    state.storage.remove(idx, cell.cmp()).map(|slot| slot.value)
}

fn land(
    cell: &StackCell,
    state: &mut StackState,
    landing: Landing,
    value: Value,
    key: Option<Key>,
) -> Option<Value> {
    let cmp = cell.cmp();
    let target = match landing {
        Landing::Replace(seq) => state.storage.index_of(seq),
        Landing::Append => None,
    };
    match target {
        Some(idx) => state.storage.replace(idx, value, cmp),
        None => {
            state.storage.push(value, key, cmp);
            None
        }
    }
}

fn settle(cell: &StackCell, state: &mut StackState) {
    if state.borrows.is_empty() {
        state.storage.reclaim_tail();
        state.storage.compact_interior(cell.cmp(), false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ElementType;
    use std::thread;

    fn ints(perspective: Perspective, values: &[i64]) -> Stack {
        let stack = Stack::new(ElementType::Int, perspective);
        for &v in values {
            stack.push(v).unwrap();
        }
        stack
    }

    fn int_values(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int(v)).collect()
    }

    #[test]
    fn test_bring_takes_what_source_would_pop() {
        let dest = ints(Perspective::Lifo, &[]);

        let lifo = ints(Perspective::Lifo, &[1, 2, 3]);
        dest.bring(&lifo, None).unwrap();
        assert_eq!(lifo.snapshot(), int_values(&[1, 2]));

        let fifo = ints(Perspective::Fifo, &[7, 8, 9]);
        dest.bring(&fifo, None).unwrap();
        assert_eq!(fifo.snapshot(), int_values(&[8, 9]));

        let max = ints(Perspective::Max, &[4, 40, 5]);
        dest.bring(&max, None).unwrap();
        assert_eq!(max.snapshot(), int_values(&[4, 5]));

        assert_eq!(dest.snapshot(), int_values(&[3, 7, 40]));
    }

    #[test]
    fn test_bring_converts_to_destination_type() {
        let source = ints(Perspective::Lifo, &[12]);
        let dest = Stack::new(ElementType::Str, Perspective::Lifo);
        dest.bring(&source, None).unwrap();
        assert_eq!(dest.pop().unwrap(), Value::from("12"));
        assert!(source.is_empty());

        let words = Stack::new(ElementType::Str, Perspective::Lifo);
        words.push("2.5").unwrap();
        let floats = Stack::new(ElementType::Float, Perspective::Lifo);
        floats.bring(&words, None).unwrap();
        assert_eq!(floats.pop().unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_failed_conversion_leaves_both_stacks_untouched() {
        let source = Stack::new(ElementType::Str, Perspective::Lifo);
        source.push("ten").unwrap();
        let dest = ints(Perspective::Lifo, &[1]);

        assert_eq!(
            dest.bring(&source, None),
            Err(StackError::TypeMismatch {
                expected: ElementType::Int,
                found: ElementType::Str,
            })
        );
        assert_eq!(source.snapshot(), vec![Value::from("ten")]);
        assert_eq!(dest.snapshot(), int_values(&[1]));
    }

    #[test]
    fn test_keyed_destination_needs_a_key() {
        let source = ints(Perspective::Lifo, &[5, 6]);
        let dest = Stack::new(ElementType::Int, Perspective::Keyed);

        assert_eq!(dest.bring(&source, None), Err(StackError::KeyRequired));
        assert_eq!(source.len(), 2);

        dest.bring(&source, Some(Key::from("six"))).unwrap();
        assert_eq!(dest.peek_key(&Key::from("six")).unwrap(), Value::Int(6));

        // A second transfer under the same key replaces in place
        dest.bring(&source, Some(Key::from("six"))).unwrap();
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.peek_key(&Key::from("six")).unwrap(), Value::Int(5));
        assert!(source.is_empty());
    }

    #[test]
    fn test_source_key_travels_with_element() {
        let source = Stack::new(ElementType::Int, Perspective::Keyed);
        source.push_keyed(1, "one").unwrap();
        source.push_keyed(2, "two").unwrap();
        let dest = Stack::new(ElementType::Str, Perspective::Keyed);

        dest.bring(&source, None).unwrap();
        assert_eq!(dest.keyed_snapshot(), vec![(Key::from("one"), Value::from("1"))]);
        assert_eq!(source.keyed_snapshot(), vec![(Key::from("two"), Value::Int(2))]);
    }

    #[test]
    fn test_bring_within_one_stack() {
        let fifo = ints(Perspective::Fifo, &[1, 2, 3]);
        fifo.bring(&fifo, None).unwrap();
        assert_eq!(fifo.snapshot(), int_values(&[2, 3, 1]));

        let lifo = ints(Perspective::Lifo, &[1, 2, 3]);
        lifo.bring(&lifo, None).unwrap();
        assert_eq!(lifo.snapshot(), int_values(&[1, 2, 3]));

        let capped = Stack::builder(ElementType::Int)
            .perspective(Perspective::Fifo)
            .capacity(2)
            .build();
        capped.push(1).unwrap();
        capped.push(2).unwrap();
        capped.bring(&capped, None).unwrap();
        assert_eq!(capped.snapshot(), int_values(&[2, 1]));
    }

    #[test]
    fn test_refusals_leave_source_intact() {
        let source = ints(Perspective::Lifo, &[1]);

        let full = Stack::builder(ElementType::Int).capacity(1).build();
        full.push(9).unwrap();
        assert_eq!(full.bring(&source, None), Err(StackError::Full { capacity: 1 }));

        let frozen = ints(Perspective::Lifo, &[]);
        frozen.freeze();
        assert_eq!(frozen.bring(&source, None), Err(StackError::Frozen));

        let empty = ints(Perspective::Lifo, &[]);
        assert_eq!(frozen.bring(&empty, None), Err(StackError::Frozen));
        let dest = ints(Perspective::Lifo, &[]);
        assert_eq!(dest.bring(&empty, None), Err(StackError::Empty));

        assert_eq!(source.snapshot(), int_values(&[1]));
    }

    #[test]
    fn test_borrowed_source_element_is_not_moved() {
        let source = ints(Perspective::Lifo, &[1, 2]);
        let dest = ints(Perspective::Lifo, &[]);
        let scope = source.borrow_range(1..2).unwrap();

        assert!(matches!(
            dest.bring(&source, None),
            Err(StackError::BorrowConflict { .. })
        ));
        assert!(dest.is_empty());
        drop(scope);

        dest.bring(&source, None).unwrap();
        assert_eq!(dest.snapshot(), int_values(&[2]));
    }

    #[test]
    fn test_opposite_transfers_do_not_deadlock() {
        let left = Arc::new(ints(Perspective::Fifo, &(0..200).collect::<Vec<_>>()));
        let right = Arc::new(ints(Perspective::Fifo, &(200..400).collect::<Vec<_>>()));

        let handles: Vec<_> = [(left.clone(), right.clone()), (right.clone(), left.clone())]
            .into_iter()
            .map(|(from, to)| {
                thread::spawn(move || {
                    for _ in 0..1000 {
                        match to.bring(&from, None) {
                            Ok(()) | Err(StackError::Empty) => {}
                            Err(e) => panic!("unexpected transfer error: {}", e),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut all: Vec<i64> = left
            .snapshot()
            .into_iter()
            .chain(right.snapshot())
            .filter_map(|v| v.as_int())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..400).collect::<Vec<_>>());
    }
}
