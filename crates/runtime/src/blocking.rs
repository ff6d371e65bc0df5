//! Blocking stack: a stack used as a message queue between threads
//!
//! Producers `push`; consumers `take`, which waits until an element is
//! available instead of failing with `Empty`. Which element a take returns
//! is decided by the wrapped stack's perspective (FIFO for a queue, LIFO
//! for a stack of pending work, Max/Min for a priority queue).
//!
//! ## Shutdown
//!
//! `close()` wakes every waiter. Elements already queued are still handed
//! out; once the stack is empty, takes (`try_take` included) fail with
//! `Closed`, and so do pushes.
//!
//! ## Blocking
//!
//! Waiting uses May's `Mutex` and `Condvar`. A take called from a coroutine
//! parks only that coroutine and the worker thread moves on to other
//! coroutines; called from a plain thread it parks the thread.
//!
//! Only `push` wakes waiters. Elements pushed straight onto `stack()` are
//! seen by the next take but do not end a wait already in progress.

use may::sync::{Condvar, Mutex, MutexGuard};
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use tracing::debug;
use ual_core::{ElementType, Perspective, Result, Stack, StackError, Value};

pub struct BlockingStack {
    stack: Stack,
    closed: Mutex<bool>,
    ready: Condvar,
}

impl BlockingStack {
    pub fn new(element_type: ElementType, perspective: Perspective) -> Self {
        Self::from_stack(Stack::new(element_type, perspective))
    }

    /// Wrap an existing stack; elements already on it can be taken
    pub fn from_stack(stack: Stack) -> Self {
        Self {
            stack,
            closed: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    /// The wrapped stack, for inspection and freezing.
    ///
    /// Pushing through it bypasses `close` and wakes nobody.
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an element and wake one waiting consumer
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let closed = self.lock();
        if *closed {
            return Err(StackError::Closed);
        }
        self.stack.push(value)?;
        // Notify under the lock so a consumer between its check and its wait
        // cannot miss this element
        self.ready.notify_one();
        drop(closed);
        Ok(())
    }

    /// Take an element if one is available right now
    pub fn try_take(&self) -> Result<Value> {
        let closed = self.lock();
        match self.stack.pop() {
            Err(StackError::Empty) if *closed => Err(StackError::Closed),
            other => other,
        }
    }

    /// Take an element, waiting as long as it takes
    pub fn take(&self) -> Result<Value> {
        let mut closed = self.lock();
        loop {
            match self.stack.pop() {
                Err(StackError::Empty) => {}
                other => return other,
            }
            if *closed {
                return Err(StackError::Closed);
            }
            closed = self
                .ready
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take an element, giving up with `Timeout` after `timeout`
    pub fn take_timeout(&self, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let mut closed = self.lock();
        loop {
            match self.stack.pop() {
                Err(StackError::Empty) => {}
                other => return other,
            }
            if *closed {
                return Err(StackError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StackError::Timeout);
            }
            let (guard, _) = self
                .ready
                .wait_timeout(closed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            closed = guard;
        }
    }

    /// Stop accepting elements and wake every waiter
    pub fn close(&self) {
        let mut closed = self.lock();
        if !*closed {
            *closed = true;
            debug!(stack = self.stack.id(), remaining = self.stack.len(), "blocking stack closed");
        }
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.lock()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime_config;
    use may::coroutine;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_returns_queued_in_perspective_order() {
        let queue = BlockingStack::new(ElementType::Int, Perspective::Fifo);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.take().unwrap(), Value::Int(1));
        assert_eq!(queue.take().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_take_waits_for_producer() {
        let queue = Arc::new(BlockingStack::new(ElementType::Int, Perspective::Fifo));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_take_timeout_expires() {
        let queue = BlockingStack::new(ElementType::Int, Perspective::Fifo);
        let started = Instant::now();
        assert_eq!(
            queue.take_timeout(Duration::from_millis(30)),
            Err(StackError::Timeout)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_drains_then_fails() {
        let queue = BlockingStack::new(ElementType::Int, Perspective::Lifo);
        queue.push(1).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.push(2), Err(StackError::Closed));
        assert_eq!(queue.take().unwrap(), Value::Int(1));
        assert_eq!(queue.take(), Err(StackError::Closed));
        assert_eq!(queue.try_take(), Err(StackError::Closed));
    }

    #[test]
    fn test_try_take_before_and_after_close() {
        let queue = BlockingStack::new(ElementType::Int, Perspective::Fifo);
        assert_eq!(queue.try_take(), Err(StackError::Empty));
        queue.push(5).unwrap();
        queue.close();
        assert_eq!(queue.try_take().unwrap(), Value::Int(5));
        assert_eq!(queue.try_take(), Err(StackError::Closed));
    }

    #[test]
    fn test_coroutine_take_parks_only_the_coroutine() {
        crate::worksteal::init_scheduler();
        let consumers = runtime_config().workers + 2;
        let queue = Arc::new(BlockingStack::new(ElementType::Int, Perspective::Fifo));

        // More waiting consumers than worker threads: if a take held its
        // thread, the producer coroutine would never be scheduled
        let waiting: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                unsafe { coroutine::spawn(move || queue.take()) }
            })
            .collect();
        let producer = {
            let queue = Arc::clone(&queue);
            unsafe {
                coroutine::spawn(move || {
                    for i in 0..consumers as i64 {
                        queue.push(i).unwrap();
                    }
                })
            }
        };
        producer.join().unwrap();

        let mut got: Vec<i64> = waiting
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().as_int().unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..consumers as i64).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_wakes_waiters() {
        let queue = Arc::new(BlockingStack::new(ElementType::Int, Perspective::Fifo));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.take())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queue.close();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(StackError::Closed));
        }
    }

    #[test]
    fn test_frozen_stack_errors_propagate() {
        let queue = BlockingStack::new(ElementType::Int, Perspective::Fifo);
        queue.push(1).unwrap();
        queue.stack().freeze();
        assert_eq!(queue.take(), Err(StackError::Frozen));
    }
}
