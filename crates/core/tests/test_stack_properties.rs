//! End-to-end behavior of stacks, views and borrow scopes through the
//! public API only.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use ual_core::{
    ElementType, Key, OwnershipMode, Perspective, Stack, StackError, Value, View, borrow,
    crosstack,
};

fn stack_of(values: &[i64]) -> Stack {
    let stack = Stack::new(ElementType::Int, Perspective::Lifo);
    for &v in values {
        stack.push(v).unwrap();
    }
    stack
}

#[test]
fn test_lifo_view_peeks_newest() {
    let stack = stack_of(&[10, 20, 30]);
    let view = View::on(&stack, Perspective::Lifo);
    assert_eq!(view.peek().unwrap(), Value::Int(30));
}

#[test]
fn test_fifo_view_advances_oldest_first() {
    let stack = stack_of(&[10, 20, 30]);
    let mut view = View::on(&stack, Perspective::Fifo);
    assert_eq!(view.peek().unwrap(), Value::Int(10));
    view.advance().unwrap();
    assert_eq!(view.peek().unwrap(), Value::Int(20));
    view.advance().unwrap();
    assert_eq!(view.peek().unwrap(), Value::Int(30));
}

#[test]
fn test_cursors_are_independent() {
    let stack = stack_of(&[10, 20, 30]);
    let lifo = View::on(&stack, Perspective::Lifo);
    let mut fifo = View::on(&stack, Perspective::Fifo);
    assert_eq!(lifo.peek().unwrap(), Value::Int(30));
    assert_eq!(fifo.peek().unwrap(), Value::Int(10));
    fifo.advance().unwrap();
    fifo.advance().unwrap();
    assert_eq!(fifo.peek().unwrap(), Value::Int(30));
    assert_eq!(lifo.peek().unwrap(), Value::Int(30));
}

#[test]
fn test_remaining_counts_down() {
    let stack = stack_of(&[1, 2, 3]);
    let mut view = View::on(&stack, Perspective::Fifo);
    assert_eq!(view.remaining().unwrap(), 3);
    view.advance().unwrap();
    assert_eq!(view.remaining().unwrap(), 2);
    view.advance().unwrap();
    view.advance().unwrap();
    assert_eq!(view.remaining().unwrap(), 0);
}

#[test]
fn test_keyed_access() {
    let stack = Stack::new(ElementType::Int, Perspective::Keyed);
    stack.push_keyed(100, "a").unwrap();
    stack.push_keyed(200, "b").unwrap();
    stack.push_keyed(300, "c").unwrap();

    let view = View::on(&stack, Perspective::Keyed);
    assert_eq!(view.peek_key(&Key::from("b")).unwrap(), Value::Int(200));
    assert_eq!(view.pop_key(&Key::from("a")).unwrap(), Value::Int(100));
    assert_eq!(
        view.peek_key(&Key::from("a")),
        Err(StackError::KeyNotFound(Key::from("a")))
    );
    assert_eq!(stack.len(), 2);
}

#[test]
fn test_work_stealing_fixed_interleaving() {
    let stack = stack_of(&[1, 2, 3, 4, 5]);
    let owner = View::on(&stack, Perspective::Lifo);
    let thief = View::on(&stack, Perspective::Fifo);

    assert_eq!(owner.pop().unwrap(), Value::Int(5));
    assert_eq!(thief.pop().unwrap(), Value::Int(1));
    assert_eq!(owner.pop().unwrap(), Value::Int(4));
    assert_eq!(thief.pop().unwrap(), Value::Int(2));
    assert_eq!(stack.len(), 1);

    assert_eq!(thief.pop().unwrap(), Value::Int(3));
    assert_eq!(owner.pop(), Err(StackError::Empty));
    assert_eq!(thief.pop(), Err(StackError::Empty));
}

#[test]
fn test_work_stealing_threads_deliver_each_value_once() {
    const N: i64 = 2_000;
    let stack = stack_of(&(1..=N).collect::<Vec<_>>());
    let delivered = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for perspective in [Perspective::Lifo, Perspective::Fifo, Perspective::Fifo, Perspective::Lifo] {
            let view = View::on(&stack, perspective);
            let delivered = &delivered;
            scope.spawn(move || {
                let mut mine = Vec::new();
                loop {
                    match view.pop() {
                        Ok(value) => mine.push(value.as_int().unwrap()),
                        Err(StackError::Empty) => break,
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
                delivered.lock().unwrap().extend(mine);
            });
        }
    });

    let delivered = delivered.into_inner().unwrap();
    assert_eq!(delivered.len(), N as usize);
    let unique: HashSet<i64> = delivered.iter().copied().collect();
    assert_eq!(unique.len(), N as usize);
    assert!(stack.is_empty());
}

#[test]
fn test_frozen_stack_reads_but_refuses_pops() {
    let stack = stack_of(&[10, 20]);
    stack.freeze();
    let view = View::on(&stack, Perspective::Fifo);
    assert_eq!(view.peek().unwrap(), Value::Int(10));
    assert_eq!(view.pop(), Err(StackError::Frozen));
    assert_eq!(stack.len(), 2);
}

#[test]
fn test_freeze_stops_every_later_mutation() {
    let stack = stack_of(&(0..100).collect::<Vec<_>>());
    let frozen = AtomicBool::new(false);
    let wrong_answers = AtomicUsize::new(0);

    let len_at_freeze = thread::scope(|scope| {
        for t in 0..4 {
            let (stack, frozen, wrong_answers) = (&stack, &frozen, &wrong_answers);
            scope.spawn(move || {
                loop {
                    // Read the flag first: a true here means freeze() already returned
                    let after_freeze = frozen.load(Ordering::SeqCst);
                    let outcome = if t % 2 == 0 {
                        stack.push(t).map(|_| ())
                    } else {
                        stack.pop().map(|_| ())
                    };
                    if after_freeze {
                        if outcome != Err(StackError::Frozen) {
                            wrong_answers.fetch_add(1, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            });
        }
        thread::sleep(Duration::from_millis(10));
        stack.freeze();
        frozen.store(true, Ordering::SeqCst);
        stack.len()
    });

    assert_eq!(wrong_answers.into_inner(), 0);
    assert!(stack.is_frozen());
    assert_eq!(stack.len(), len_at_freeze);
    assert_eq!(stack.push(1), Err(StackError::Frozen));
    assert_eq!(stack.pop(), Err(StackError::Frozen));
}

#[test]
fn test_owner_push_after_scope_drains_its_range() {
    let stack = stack_of(&[1, 2, 3, 4]);
    let mut scope = stack.borrow_range_mut(2..4).unwrap();
    assert_eq!(scope.take().unwrap(), Value::Int(4));
    assert_eq!(scope.take().unwrap(), Value::Int(3));

    // New elements land past the scope's range, so the owner can remove them
    // and the scope cannot see them
    stack.push(5).unwrap();
    stack.push(6).unwrap();
    assert_eq!(scope.len().unwrap(), 0);
    assert_eq!(scope.take(), Err(StackError::Empty));
    assert_eq!(stack.pop().unwrap(), Value::Int(6));
    assert_eq!(stack.pop().unwrap(), Value::Int(5));
    assert_eq!(stack.pop().unwrap(), Value::Int(2));

    drop(scope);
    stack.push(7).unwrap();
    assert_eq!(stack.snapshot(), vec![Value::Int(1), Value::Int(7)]);
}

#[test]
fn test_reattach_resets_cursor() {
    let a = stack_of(&[10, 20]);
    let b = stack_of(&[100, 200]);
    let mut view = View::on(&a, Perspective::Fifo);
    assert_eq!(view.peek().unwrap(), Value::Int(10));
    view.advance().unwrap();
    view.attach(&b);
    assert_eq!(view.cursor(), 0);
    assert_eq!(view.peek().unwrap(), Value::Int(100));
}

#[test]
fn test_mutable_borrow_excludes_overlaps() {
    let stack = stack_of(&[1, 2, 3, 4, 5]);
    let held = borrow(0..3, &stack, OwnershipMode::Mutable).unwrap();

    for (range, mode) in [
        (2..4, OwnershipMode::Borrowed),
        (0..1, OwnershipMode::Borrowed),
        (1..2, OwnershipMode::Mutable),
        (0..5, OwnershipMode::Mutable),
    ] {
        assert_eq!(
            borrow(range.clone(), &stack, mode).unwrap_err(),
            StackError::BorrowConflict {
                requested: mode,
                held: OwnershipMode::Mutable,
            },
            "range {:?} as {}",
            range,
            mode
        );
    }

    assert!(borrow(3..5, &stack, OwnershipMode::Borrowed).is_ok());
    assert!(borrow(3..4, &stack, OwnershipMode::Mutable).is_ok());
    drop(held);
    assert!(borrow(0..3, &stack, OwnershipMode::Borrowed).is_ok());
}

#[test]
fn test_concurrent_borrow_requests_grant_one_mutable() {
    let stack = stack_of(&[1, 2, 3]);
    let granted = Mutex::new(0usize);
    let barrier = std::sync::Barrier::new(8);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                barrier.wait();
                if let Ok(scope_guard) = stack.borrow_range_mut(0..3) {
                    *granted.lock().unwrap() += 1;
                    // Hold the scope until every thread has tried
                    thread::sleep(std::time::Duration::from_millis(150));
                    drop(scope_guard);
                }
            });
        }
    });

    assert_eq!(granted.into_inner().unwrap(), 1);
}

#[test]
fn test_view_of_dropped_stack_is_detached() {
    let view = {
        let stack = stack_of(&[1]);
        View::on(&stack, Perspective::Lifo)
    };
    assert_eq!(view.peek(), Err(StackError::DetachedView));
    assert_eq!(view.pop(), Err(StackError::DetachedView));
    assert!(!view.is_attached());
}

#[test]
fn test_priority_views_over_shared_stack() {
    let stack = stack_of(&[4, 8, 1, 6]);
    let max = View::on(&stack, Perspective::Max);
    let min = View::on(&stack, Perspective::Min);
    assert_eq!(max.pop().unwrap(), Value::Int(8));
    assert_eq!(min.pop().unwrap(), Value::Int(1));
    assert_eq!(max.peek().unwrap(), Value::Int(6));
    assert_eq!(min.peek().unwrap(), Value::Int(4));
    // Removal through the LIFO default must be seen by both indexes
    assert_eq!(stack.pop().unwrap(), Value::Int(6));
    assert_eq!(max.peek().unwrap(), Value::Int(4));
}

#[test]
fn test_crosstack_level_across_members() {
    let outer = crosstack::from_members(
        [stack_of(&[1, 2, 3]), stack_of(&[10, 20, 30])],
        Perspective::Fifo,
    )
    .unwrap();
    let top = crosstack::level(&outer, 0).unwrap();
    assert_eq!(top.values().unwrap(), vec![Value::Int(3), Value::Int(30)]);
    let bottom = crosstack::level_with(&outer, 0, Some(Perspective::Fifo)).unwrap();
    let sum = bottom
        .reduce(0, |acc, v| acc + v.as_int().unwrap_or(0))
        .unwrap();
    assert_eq!(sum, 11);
}
