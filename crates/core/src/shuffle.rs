//! Stack-shuffling words
//!
//! The classic words rearrange the newest elements (the physical tail),
//! whatever the stack's default perspective is:
//!
//! ```text
//!   dup   a       -> a a
//!   swap  a b     -> b a
//!   over  a b     -> a b a
//!   rot   a b c   -> b c a
//!   nip   a b     -> b
//!   tuck  a b     -> b a b
//! ```
//!
//! Each word takes the stack lock once. A stack with too few elements
//! fails with `Underflow` and is left as it was.
//!
//! Values move between slots while keys stay with their slots. Words that
//! grow the stack append unkeyed copies, so they are refused under the
//! Keyed perspective.

use crate::error::{Result, StackError};
use crate::perspective::Perspective;
use crate::stack::{Actor, Stack, StackCell, StackState};
use crate::stats::{POPS, PUSHES, bump};
use crate::storage::{Selector, Window};
use crate::value::Value;
use tracing::trace;

impl Stack {
    /// Duplicate the newest value: ( a -- a a )
    pub fn dup(&self) -> Result<()> {
        self.shuffle("dup", 1, |top| {
            let a = top[0].clone();
            top.push(a);
        })
    }

    /// Swap the two newest values: ( a b -- b a )
    pub fn swap(&self) -> Result<()> {
        self.shuffle("swap", 2, |top| top.swap(0, 1))
    }

    /// Copy the second value to the top: ( a b -- a b a )
    pub fn over(&self) -> Result<()> {
        self.shuffle("over", 2, |top| {
            let a = top[0].clone();
            top.push(a);
        })
    }

    /// Rotate the three newest values: ( a b c -- b c a )
    pub fn rot(&self) -> Result<()> {
        self.shuffle("rot", 3, |top| top.rotate_left(1))
    }

    /// Copy the top value below the second: ( a b -- b a b )
    pub fn tuck(&self) -> Result<()> {
        self.shuffle("tuck", 2, |top| {
            top.swap(0, 1);
            let b = top[0].clone();
            top.push(b);
        })
    }

    /// Remove the second value: ( a b -- b )
    ///
    /// Removes the slot holding `a`; `b` keeps its slot and key.
    pub fn nip(&self) -> Result<()> {
        let cell = self.cell();
        let removed = {
            let mut state = cell.write();
            StackCell::check_writable(&state, Actor::Direct)?;
            let seqs = top_seqs(cell, &state, 2)?;
            state.borrows.check_write(seqs[0], Actor::Direct)?;
            let cmp = cell.cmp();
            let removed = match state.storage.index_of(seqs[0]) {
                Some(idx) => state.storage.remove(idx, cmp),
                None => None,
            };
            if state.borrows.is_empty() {
                state.storage.reclaim_tail();
                state.storage.compact_interior(cmp, false);
            }
            removed
        };
        drop(removed);
        bump(&POPS);
        trace!(stack = self.id(), word = "nip", "shuffled");
        Ok(())
    }

    // Rewrite the newest `needed` values, oldest first; extra values are appended
    fn shuffle<F>(&self, word: &'static str, needed: usize, rearrange: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Value>),
    {
        let cell = self.cell();
        let (displaced, appended) = {
            let mut state = cell.write();
            StackCell::check_writable(&state, Actor::Direct)?;
            let seqs = top_seqs(cell, &state, needed)?;
            for &seq in &seqs {
                state.borrows.check_write(seq, Actor::Direct)?;
            }
            let mut values: Vec<Value> = seqs
                .iter()
                .filter_map(|&seq| state.storage.index_of(seq))
                .filter_map(|idx| state.storage.slot(idx))
                .map(|slot| slot.value.clone())
                .collect();
            rearrange(&mut values);

            let appended = values.len().saturating_sub(seqs.len());
            if appended > 0 {
                if state.perspective == Perspective::Keyed {
                    return Err(StackError::KeyRequired);
                }
                if let Some(capacity) = cell.capacity() {
                    if state.storage.len() + appended > capacity {
                        return Err(StackError::Full { capacity });
                    }
                }
            }

            let cmp = cell.cmp();
            let mut values = values.into_iter();
            let mut displaced = Vec::with_capacity(seqs.len());
            for (&seq, value) in seqs.iter().zip(values.by_ref()) {
                if let Some(idx) = state.storage.index_of(seq) {
                    displaced.extend(state.storage.replace(idx, value, cmp));
                }
            }
            for value in values {
                state.storage.push(value, None, cmp);
            }
            (displaced, appended)
        };
        drop(displaced);
        for _ in 0..appended {
            bump(&PUSHES);
        }
        trace!(stack = self.id(), word, "shuffled");
        Ok(())
    }
}

/// Seqs of the newest `needed` elements, oldest first
fn top_seqs(cell: &StackCell, state: &StackState, needed: usize) -> Result<Vec<u64>> {
    let len = state.storage.len();
    if len < needed {
        return Err(StackError::Underflow { needed, len });
    }
    let cmp = cell.cmp();
    let mut seqs = (0..needed)
        .map(|n| {
            state
                .storage
                .locate(&Selector::Nth(Perspective::Lifo, n), Window::All, cmp)
                .map(|idx| state.storage.seq_of(idx))
        })
        .collect::<Result<Vec<_>>>()?;
    seqs.reverse();
    Ok(seqs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ElementType, Key};
    use std::sync::Arc;
    use std::thread;

    fn ints(values: &[i64]) -> Stack {
        let stack = Stack::new(ElementType::Int, Perspective::Lifo);
        for &v in values {
            stack.push(v).unwrap();
        }
        stack
    }

    fn contents(stack: &Stack) -> Vec<i64> {
        stack.snapshot().iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn test_words_rearrange_newest_elements() {
        let cases: Vec<(&str, fn(&Stack) -> Result<()>, Vec<i64>)> = vec![
            ("dup", Stack::dup, vec![1, 2, 3, 3]),
            ("swap", Stack::swap, vec![1, 3, 2]),
            ("over", Stack::over, vec![1, 2, 3, 2]),
            ("rot", Stack::rot, vec![2, 3, 1]),
            ("nip", Stack::nip, vec![1, 3]),
            ("tuck", Stack::tuck, vec![1, 3, 2, 3]),
        ];
        for (word, apply, expected) in cases {
            let stack = ints(&[1, 2, 3]);
            apply(&stack).unwrap();
            assert_eq!(contents(&stack), expected, "{}", word);
        }
    }

    #[test]
    fn test_underflow_leaves_stack_alone() {
        let stack = ints(&[7]);
        assert_eq!(stack.swap(), Err(StackError::Underflow { needed: 2, len: 1 }));
        assert_eq!(stack.rot(), Err(StackError::Underflow { needed: 3, len: 1 }));
        assert_eq!(stack.nip(), Err(StackError::Underflow { needed: 2, len: 1 }));
        assert_eq!(contents(&stack), vec![7]);

        let empty = ints(&[]);
        assert_eq!(empty.dup(), Err(StackError::Underflow { needed: 1, len: 0 }));
    }

    #[test]
    fn test_words_follow_tail_under_any_perspective() {
        let stack = ints(&[1, 2, 3]);
        stack.set_perspective(Perspective::Fifo);
        stack.swap().unwrap();
        assert_eq!(contents(&stack), vec![1, 3, 2]);
        assert_eq!(stack.pop().unwrap(), Value::Int(1));
    }

    #[test]
    fn test_words_skip_removed_elements() {
        let stack = ints(&[1, 4, 2, 3]);
        stack.set_perspective(Perspective::Max);
        assert_eq!(stack.pop().unwrap(), Value::Int(4));
        stack.swap().unwrap();
        assert_eq!(contents(&stack), vec![1, 3, 2]);
        assert_eq!(stack.pop().unwrap(), Value::Int(3));
    }

    #[test]
    fn test_frozen_and_capped_stacks_refuse() {
        let frozen = ints(&[1, 2]);
        frozen.freeze();
        assert_eq!(frozen.swap(), Err(StackError::Frozen));
        assert_eq!(frozen.nip(), Err(StackError::Frozen));

        let capped = Stack::builder(ElementType::Int).capacity(2).build();
        capped.push(1).unwrap();
        capped.push(2).unwrap();
        assert_eq!(capped.over(), Err(StackError::Full { capacity: 2 }));
        capped.swap().unwrap();
        assert_eq!(contents(&capped), vec![2, 1]);
    }

    #[test]
    fn test_keys_stay_with_slots() {
        let stack = Stack::new(ElementType::Int, Perspective::Keyed);
        stack.push_keyed(1, "a").unwrap();
        stack.push_keyed(2, "b").unwrap();

        assert_eq!(stack.dup(), Err(StackError::KeyRequired));
        stack.swap().unwrap();
        assert_eq!(stack.peek_key(&Key::from("a")).unwrap(), Value::Int(2));
        assert_eq!(stack.peek_key(&Key::from("b")).unwrap(), Value::Int(1));

        stack.nip().unwrap();
        assert_eq!(stack.keyed_snapshot(), vec![(Key::from("b"), Value::Int(1))]);
    }

    #[test]
    fn test_borrowed_elements_are_not_shuffled() {
        let stack = ints(&[1, 2, 3]);
        let scope = stack.borrow_range(1..2).unwrap();
        assert!(matches!(stack.swap(), Err(StackError::BorrowConflict { .. })));
        assert!(matches!(stack.nip(), Err(StackError::BorrowConflict { .. })));
        drop(scope);
        assert_eq!(contents(&stack), vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_rot_never_loses_values() {
        let stack = Arc::new(ints(&[1, 2, 3]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stack = stack.clone();
                thread::spawn(move || {
                    for _ in 0..300 {
                        stack.rot().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // 1200 rotations of three elements is a whole number of turns
        assert_eq!(contents(&stack), vec![1, 2, 3]);
    }
}
