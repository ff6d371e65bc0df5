//! Engine-wide counters
//!
//! Lock-free atomic counters updated on the hot path with a single relaxed
//! increment each. They are only read when a report or diagnostic is
//! requested, so a snapshot may be slightly inconsistent under concurrent
//! updates.
//!
//! Useful readings:
//! - Live stacks: `stacks_created - stacks_released`
//! - Contention on shared ranges: `borrow_conflicts` vs `borrows_granted`
//! - Writers hitting frozen data: `frozen_rejections`

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) static STACKS_CREATED: AtomicU64 = AtomicU64::new(0);
pub(crate) static STACKS_RELEASED: AtomicU64 = AtomicU64::new(0);
pub(crate) static PUSHES: AtomicU64 = AtomicU64::new(0);
pub(crate) static POPS: AtomicU64 = AtomicU64::new(0);
pub(crate) static PEEKS: AtomicU64 = AtomicU64::new(0);
pub(crate) static FROZEN_REJECTIONS: AtomicU64 = AtomicU64::new(0);
pub(crate) static BORROWS_GRANTED: AtomicU64 = AtomicU64::new(0);
pub(crate) static BORROW_CONFLICTS: AtomicU64 = AtomicU64::new(0);
pub(crate) static COMPACTIONS: AtomicU64 = AtomicU64::new(0);
pub(crate) static TRANSFERS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub stacks_created: u64,
    pub stacks_released: u64,
    pub pushes: u64,
    pub pops: u64,
    pub peeks: u64,
    pub frozen_rejections: u64,
    pub borrows_granted: u64,
    pub borrow_conflicts: u64,
    pub compactions: u64,
    pub transfers: u64,
}

impl EngineStats {
    /// Stacks created but not yet released
    pub fn live_stacks(&self) -> u64 {
        self.stacks_created.saturating_sub(self.stacks_released)
    }
}

/// Read all counters
pub fn snapshot() -> EngineStats {
    EngineStats {
        stacks_created: STACKS_CREATED.load(Ordering::Relaxed),
        stacks_released: STACKS_RELEASED.load(Ordering::Relaxed),
        pushes: PUSHES.load(Ordering::Relaxed),
        pops: POPS.load(Ordering::Relaxed),
        peeks: PEEKS.load(Ordering::Relaxed),
        frozen_rejections: FROZEN_REJECTIONS.load(Ordering::Relaxed),
        borrows_granted: BORROWS_GRANTED.load(Ordering::Relaxed),
        borrow_conflicts: BORROW_CONFLICTS.load(Ordering::Relaxed),
        compactions: COMPACTIONS.load(Ordering::Relaxed),
        transfers: TRANSFERS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElementType, Perspective, Stack, Value};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_counters_track_stack_lifecycle() {
        let before = snapshot();
        {
            let stack = Stack::new(ElementType::Int, Perspective::Lifo);
            stack.push(Value::Int(1)).unwrap();
            stack.push(Value::Int(2)).unwrap();
            stack.pop().unwrap();
            stack.freeze();
            assert!(stack.pop().is_err());
        }
        let after = snapshot();

        assert!(after.stacks_created > before.stacks_created);
        assert!(after.stacks_released > before.stacks_released);
        assert!(after.pushes >= before.pushes + 2);
        assert!(after.pops > before.pops);
        assert!(after.frozen_rejections > before.frozen_rejections);
    }

    #[test]
    fn test_live_stacks_saturates() {
        let stats = EngineStats {
            stacks_created: 1,
            stacks_released: 3,
            ..Default::default()
        };
        assert_eq!(stats.live_stacks(), 0);
    }
}
