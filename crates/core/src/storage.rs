//! Physical storage for a stack
//!
//! One insertion-ordered sequence of slots serves every perspective. A slot
//! removed from the middle (keyed or priority removal, or a pop through a
//! scoped view) becomes a tombstone; removals at either end move the
//! `head`/tail boundaries instead of shifting the array.
//!
//! ## Slot Layout
//!
//! ```text
//!  slots:  [ dead | dead | v3 | dead | v5 | v6 ]
//!                         ^head             ^tail (len - 1)
//!  seq(i) = base_seq + i
//! ```
//!
//! Every slot has a sequence number that never changes while it is alive.
//! The key index, both priority heaps and outstanding borrow ranges refer to
//! slots by sequence number, so head compaction (which only bumps
//! `base_seq`) leaves them all valid. Interior compaction renumbers and
//! rebuilds the indexes, so the owner only runs it when no borrow is
//! outstanding.
//!
//! A new slot never takes a seq below `next_seq`, even after dead slots
//! were dropped from the tail; the gap is padded with tombstones instead.
//! A borrow range may still name a removed tail seq, so `next_seq` only
//! falls back to the physical tail through `reclaim_tail`, which the owner
//! calls once no borrow is outstanding.
//!
//! ## Auxiliary Indexes
//!
//! - Key index: `Key -> seq`, built the first time a keyed operation runs.
//! - Priority heaps: binary heaps of seqs, one per direction (Max, Min),
//!   built the first time that perspective selects. Each slot records its
//!   position in each heap, so removal through any perspective updates the
//!   heaps in O(log n) and they never hold stale entries.

use crate::config::engine_config;
use crate::error::{Result, StackError};
use crate::perspective::Perspective;
use crate::stats::{COMPACTIONS, bump};
use crate::value::{Key, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Comparator used by the Max/Min perspectives
pub type CompareFn = dyn Fn(&Value, &Value) -> Ordering + Send + Sync;

const MAX_HEAP: usize = 0;
const MIN_HEAP: usize = 1;
const NOT_IN_HEAP: usize = usize::MAX;

pub(crate) struct Slot {
    pub(crate) value: Value,
    pub(crate) key: Option<Key>,
    heap_pos: [usize; 2],
}

/// Restricts selection to a range of sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Window {
    All,
    Seqs { lo: u64, hi: u64 },
}

/// What a read or remove is looking for
#[derive(Debug, Clone, Copy)]
pub(crate) enum Selector<'k> {
    /// The n-th element in perspective order; Keyed needs a key
    Nth(Perspective, usize),
    /// The n-th element of a traversal; Keyed walks keyed slots in insertion order
    Walk(Perspective, usize),
    /// The element stored under a key
    Key(&'k Key),
    /// The element with this sequence number, if still present
    Seq(u64),
}

#[derive(Default)]
pub(crate) struct Storage {
    slots: Vec<Option<Slot>>,
    head: usize,
    base_seq: u64,
    next_seq: u64,
    live: usize,
    keyed: usize,
    key_index: Option<HashMap<Key, u64>>,
    heaps: [Option<Vec<u64>>; 2],
}

impl Storage {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn seq_of(&self, idx: usize) -> u64 {
        self.base_seq + idx as u64
    }

    fn offset_of(&self, seq: u64) -> Option<usize> {
        let offset = seq.checked_sub(self.base_seq)?;
        usize::try_from(offset).ok()
    }

    /// Index of a live slot by sequence number
    pub(crate) fn index_of(&self, seq: u64) -> Option<usize> {
        let idx = self.offset_of(seq)?;
        match self.slots.get(idx) {
            Some(Some(_)) => Some(idx),
            _ => None,
        }
    }

    pub(crate) fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn interior_dead(&self) -> usize {
        self.slots.len() - self.head - self.live
    }

    // Physical index bounds [start, end) of a window
    fn bounds(&self, window: Window) -> (usize, usize) {
        match window {
            Window::All => (self.head, self.slots.len()),
            Window::Seqs { lo, hi } => {
                let clamp = |seq: u64| match seq.checked_sub(self.base_seq) {
                    None => 0,
                    Some(off) => usize::try_from(off)
                        .unwrap_or(usize::MAX)
                        .min(self.slots.len()),
                };
                let start = clamp(lo).max(self.head);
                let end = clamp(hi).max(start);
                (start, end)
            }
        }
    }

    pub(crate) fn contains(&self, window: Window, idx: usize) -> bool {
        let (start, end) = self.bounds(window);
        idx >= start && idx < end
    }

    fn forward(&self, window: Window) -> impl DoubleEndedIterator<Item = usize> + '_ {
        let (start, end) = self.bounds(window);
        (start..end).filter(move |&i| self.slots[i].is_some())
    }

    fn forward_keyed(&self, window: Window) -> impl Iterator<Item = usize> + '_ {
        self.forward(window)
            .filter(move |&i| matches!(&self.slots[i], Some(slot) if slot.key.is_some()))
    }

    /// Live elements in a window
    pub(crate) fn count(&self, window: Window) -> usize {
        match window {
            Window::All => self.live,
            _ => self.forward(window).count(),
        }
    }

    /// Seq range covering logical positions `[lo, hi)` in insertion order
    pub(crate) fn seq_range(&self, lo: usize, hi: usize) -> Option<(u64, u64)> {
        if lo >= hi || hi > self.live {
            return None;
        }
        let first = self.forward(Window::All).nth(lo)?;
        let last = self.forward(Window::All).nth(hi - 1)?;
        Some((self.seq_of(first), self.seq_of(last) + 1))
    }

    /// Elements a traversal in this perspective would visit
    pub(crate) fn traversal_len(&self, perspective: Perspective, window: Window) -> usize {
        match (perspective, window) {
            (Perspective::Keyed, Window::All) => self.keyed,
            (Perspective::Keyed, _) => self.forward_keyed(window).count(),
            _ => self.count(window),
        }
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Whether `locate` can answer without first building an index
    pub(crate) fn is_ready(&self, selector: &Selector<'_>) -> bool {
        match selector {
            Selector::Key(_) => self.key_index.is_some(),
            Selector::Nth(p, _) | Selector::Walk(p, _) if p.is_priority() => {
                self.heaps[heap_slot(*p)].is_some()
            }
            _ => true,
        }
    }

    /// Build whatever index the selector needs
    pub(crate) fn prepare(&mut self, selector: &Selector<'_>, cmp: &CompareFn) {
        match selector {
            Selector::Key(_) => self.ensure_key_index(),
            Selector::Nth(p, _) | Selector::Walk(p, _) if p.is_priority() => {
                self.ensure_heap(heap_slot(*p), cmp)
            }
            _ => {}
        }
    }

    /// Physical index of the selected element
    pub(crate) fn locate(
        &self,
        selector: &Selector<'_>,
        window: Window,
        cmp: &CompareFn,
    ) -> Result<usize> {
        match *selector {
            Selector::Key(key) => {
                let seq = match &self.key_index {
                    Some(index) => index.get(key).copied(),
                    None => self.scan_key(key),
                };
                seq.and_then(|s| self.index_of(s))
                    .filter(|&idx| self.contains(window, idx))
                    .ok_or_else(|| StackError::KeyNotFound(key.clone()))
            }
            Selector::Seq(seq) => self
                .index_of(seq)
                .filter(|&idx| self.contains(window, idx))
                .ok_or(StackError::Empty),
            Selector::Nth(Perspective::Keyed, _) => Err(StackError::KeyRequired),
            Selector::Walk(Perspective::Keyed, n) => {
                self.forward_keyed(window).nth(n).ok_or(StackError::Empty)
            }
            Selector::Nth(p, n) | Selector::Walk(p, n) => {
                self.nth(p, window, n, cmp).ok_or(StackError::Empty)
            }
        }
    }

    fn nth(&self, p: Perspective, window: Window, n: usize, cmp: &CompareFn) -> Option<usize> {
        match p {
            Perspective::Fifo | Perspective::Lifo => {
                if window == Window::All && self.interior_dead() == 0 {
                    if n >= self.live {
                        return None;
                    }
                    return Some(if p == Perspective::Fifo {
                        self.head + n
                    } else {
                        self.slots.len() - 1 - n
                    });
                }
                if p == Perspective::Fifo {
                    self.forward(window).nth(n)
                } else {
                    self.forward(window).rev().nth(n)
                }
            }
            Perspective::Max | Perspective::Min => {
                let which = heap_slot(p);
                match &self.heaps[which] {
                    Some(heap) if n == 0 && window == Window::All => {
                        heap.first().and_then(|&seq| self.index_of(seq))
                    }
                    Some(heap) => self.heap_nth(heap, which, window, n, cmp),
                    None => self.ranked(window, which, cmp).get(n).copied(),
                }
            }
            Perspective::Keyed => self.forward_keyed(window).nth(n),
        }
    }

    // Whether the element at `a` comes out of heap `which` before the one at `b`
    fn ranks_before(&self, which: usize, a: u64, b: u64, cmp: &CompareFn) -> bool {
        let value = |seq: u64| self.index_of(seq).and_then(|idx| self.slot(idx)).map(|s| &s.value);
        let (Some(va), Some(vb)) = (value(a), value(b)) else {
            return a < b;
        };
        let o = cmp(va, vb);
        let o = if which == MAX_HEAP { o } else { o.reverse() };
        match o {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a < b,
        }
    }

    // The n-th element of the heap's order inside `window`.
    //
    // Walks the heap best-first with a frontier of heap positions, so it
    // costs O((n + skipped) log n) instead of ranking the whole range.
    fn heap_nth(
        &self,
        heap: &[u64],
        which: usize,
        window: Window,
        n: usize,
        cmp: &CompareFn,
    ) -> Option<usize> {
        let before = |a: usize, b: usize| self.ranks_before(which, heap[a], heap[b], cmp);
        let mut frontier = Frontier::default();
        if !heap.is_empty() {
            frontier.push(0, &before);
        }
        let mut seen = 0;
        while let Some(pos) = frontier.pop(&before) {
            if let Some(idx) = self.index_of(heap[pos]) {
                if self.contains(window, idx) {
                    if seen == n {
                        return Some(idx);
                    }
                    seen += 1;
                }
            }
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < heap.len() {
                    frontier.push(child, &before);
                }
            }
        }
        None
    }

    // Stable sort keeps insertion order among equal elements
    fn ranked(&self, window: Window, which: usize, cmp: &CompareFn) -> Vec<usize> {
        let mut order: Vec<usize> = self.forward(window).collect();
        order.sort_by(|&a, &b| {
            let (Some(sa), Some(sb)) = (self.slot(a), self.slot(b)) else {
                return Ordering::Equal;
            };
            let o = cmp(&sa.value, &sb.value);
            if which == MAX_HEAP { o.reverse() } else { o }
        });
        order
    }

    /// All live indices in traversal order
    pub(crate) fn ordered(&self, p: Perspective, window: Window, cmp: &CompareFn) -> Vec<usize> {
        match p {
            Perspective::Fifo => self.forward(window).collect(),
            Perspective::Lifo => self.forward(window).rev().collect(),
            Perspective::Max | Perspective::Min => self.ranked(window, heap_slot(p), cmp),
            Perspective::Keyed => self.forward_keyed(window).collect(),
        }
    }

    fn scan_key(&self, key: &Key) -> Option<u64> {
        self.forward(Window::All)
            .find(|&i| matches!(&self.slots[i], Some(slot) if slot.key.as_ref() == Some(key)))
            .map(|i| self.seq_of(i))
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    pub(crate) fn ensure_key_index(&mut self) {
        if self.key_index.is_some() {
            return;
        }
        let mut index = HashMap::with_capacity(self.keyed);
        for i in self.head..self.slots.len() {
            if let Some(Slot { key: Some(k), .. }) = &self.slots[i] {
                index.insert(k.clone(), self.base_seq + i as u64);
            }
        }
        trace!(keys = index.len(), "key index built");
        self.key_index = Some(index);
    }

    /// Seq stored under a key (builds the key index)
    pub(crate) fn seq_for_key(&mut self, key: &Key) -> Option<u64> {
        self.ensure_key_index();
        self.key_index.as_ref().and_then(|index| index.get(key).copied())
    }

    fn ensure_heap(&mut self, which: usize, cmp: &CompareFn) {
        if self.heaps[which].is_some() {
            return;
        }
        let mut heap: Vec<u64> = Vec::with_capacity(self.live);
        for i in self.head..self.slots.len() {
            if let Some(slot) = self.slots[i].as_mut() {
                slot.heap_pos[which] = heap.len();
                heap.push(self.base_seq + i as u64);
            }
        }
        let mut heap_ref = HeapRef {
            heap: &mut heap,
            slots: &mut self.slots,
            base_seq: self.base_seq,
            which,
            cmp,
        };
        for pos in (0..heap_ref.heap.len() / 2).rev() {
            heap_ref.sift_down(pos);
        }
        trace!(entries = heap.len(), which, "priority index built");
        self.heaps[which] = Some(heap);
    }

    fn heap_ref<'a>(&'a mut self, which: usize, cmp: &'a CompareFn) -> Option<HeapRef<'a>> {
        let heap = self.heaps[which].as_mut()?;
        Some(HeapRef {
            heap,
            slots: &mut self.slots,
            base_seq: self.base_seq,
            which,
            cmp,
        })
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append at the physical tail, returning the new slot's seq
    pub(crate) fn push(&mut self, value: Value, key: Option<Key>, cmp: &CompareFn) -> u64 {
        let seq = self.next_seq.max(self.seq_of(self.slots.len()));
        if self.slots.is_empty() {
            self.base_seq = seq;
            self.head = 0;
        } else {
            while self.seq_of(self.slots.len()) < seq {
                self.slots.push(None);
            }
        }
        self.next_seq = seq + 1;
        if let Some(k) = &key {
            self.keyed += 1;
            if let Some(index) = self.key_index.as_mut() {
                index.insert(k.clone(), seq);
            }
        }
        self.slots.push(Some(Slot {
            value,
            key,
            heap_pos: [NOT_IN_HEAP; 2],
        }));
        self.live += 1;
        for which in [MAX_HEAP, MIN_HEAP] {
            if let Some(mut heap) = self.heap_ref(which, cmp) {
                heap.insert(seq);
            }
        }
        seq
    }

    /// Replace a live slot's value in place, returning the old value
    pub(crate) fn replace(&mut self, idx: usize, value: Value, cmp: &CompareFn) -> Option<Value> {
        let slot = self.slots.get_mut(idx)?.as_mut()?;
        let old = std::mem::replace(&mut slot.value, value);
        let positions = slot.heap_pos;
        for which in [MAX_HEAP, MIN_HEAP] {
            let pos = positions[which];
            if let Some(mut heap) = self.heap_ref(which, cmp) {
                if pos != NOT_IN_HEAP {
                    heap.restore(pos);
                }
            }
        }
        Some(old)
    }

    /// Remove a live slot
    pub(crate) fn remove(&mut self, idx: usize, cmp: &CompareFn) -> Option<Slot> {
        let positions = self.slots.get(idx)?.as_ref()?.heap_pos;
        for which in [MAX_HEAP, MIN_HEAP] {
            let pos = positions[which];
            if let Some(mut heap) = self.heap_ref(which, cmp) {
                if pos != NOT_IN_HEAP {
                    heap.remove(pos);
                }
            }
        }

        let seq = self.seq_of(idx);
        let slot = self.slots[idx].take()?;
        self.live -= 1;
        if let Some(k) = &slot.key {
            self.keyed -= 1;
            if let Some(index) = self.key_index.as_mut() {
                if index.get(k) == Some(&seq) {
                    index.remove(k);
                }
            }
        }
        self.trim();
        Some(slot)
    }

    // Move the head past dead slots, drop dead slots at the tail
    fn trim(&mut self) {
        while self.head < self.slots.len() && self.slots[self.head].is_none() {
            self.head += 1;
        }
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        if self.head >= self.slots.len() {
            self.slots.clear();
            self.head = 0;
            return;
        }
        let min = engine_config().compact_min;
        if self.head >= min && self.head * 2 >= self.slots.len() {
            self.slots.drain(..self.head);
            self.base_seq += self.head as u64;
            trace!(reclaimed = self.head, "head compacted");
            self.head = 0;
            bump(&COMPACTIONS);
        }
    }

    /// Let the next push reuse seqs of dead tail slots.
    ///
    /// Only sound while no borrow range refers to seqs.
    pub(crate) fn reclaim_tail(&mut self) {
        let tail = self.seq_of(self.slots.len());
        if self.next_seq > tail {
            self.next_seq = tail;
        }
    }

    /// Rebuild without interior tombstones when they pass the configured ratio.
    ///
    /// Renumbers every slot: callers must not hold seqs across this call.
    pub(crate) fn compact_interior(&mut self, cmp: &CompareFn, force: bool) -> bool {
        let dead = self.interior_dead();
        if dead == 0 {
            return false;
        }
        let config = engine_config();
        if !force && (dead < config.compact_min || dead * 100 < config.tombstone_ratio * self.slots.len()) {
            return false;
        }

        let old_len = self.slots.len();
        let rebuild_heaps = [self.heaps[MAX_HEAP].is_some(), self.heaps[MIN_HEAP].is_some()];
        let had_key_index = self.key_index.is_some();

        let mut slots: Vec<Option<Slot>> = Vec::with_capacity(self.live);
        for mut slot in self.slots.drain(..).flatten() {
            slot.heap_pos = [NOT_IN_HEAP; 2];
            slots.push(Some(slot));
        }
        self.slots = slots;
        self.base_seq = self.next_seq.max(self.base_seq + old_len as u64);
        self.next_seq = self.seq_of(self.slots.len());
        self.head = 0;
        self.key_index = None;
        self.heaps = [None, None];

        if had_key_index {
            self.ensure_key_index();
        }
        for (which, rebuild) in rebuild_heaps.into_iter().enumerate() {
            if rebuild {
                self.ensure_heap(which, cmp);
            }
        }
        trace!(reclaimed = dead, "interior compacted");
        bump(&COMPACTIONS);
        true
    }
}

/// Min-first binary heap of heap positions, ordered by a caller's `before`
#[derive(Default)]
struct Frontier {
    items: Vec<usize>,
}

impl Frontier {
    fn push(&mut self, pos: usize, before: &impl Fn(usize, usize) -> bool) {
        self.items.push(pos);
        let mut i = self.items.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if !before(self.items[i], self.items[parent]) {
                break;
            }
            self.items.swap(i, parent);
            i = parent;
        }
    }

    fn pop(&mut self, before: &impl Fn(usize, usize) -> bool) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let top = self.items.swap_remove(0);
        let mut i = 0;
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut best = i;
            if left < self.items.len() && before(self.items[left], self.items[best]) {
                best = left;
            }
            if right < self.items.len() && before(self.items[right], self.items[best]) {
                best = right;
            }
            if best == i {
                return Some(top);
            }
            self.items.swap(i, best);
            i = best;
        }
    }
}

fn heap_slot(p: Perspective) -> usize {
    if p == Perspective::Min { MIN_HEAP } else { MAX_HEAP }
}

/// Borrowed view of one priority heap together with the slots it orders
struct HeapRef<'a> {
    heap: &'a mut Vec<u64>,
    slots: &'a mut Vec<Option<Slot>>,
    base_seq: u64,
    which: usize,
    cmp: &'a CompareFn,
}

impl HeapRef<'_> {
    fn slot_mut(&mut self, seq: u64) -> Option<&mut Slot> {
        let idx = usize::try_from(seq.checked_sub(self.base_seq)?).ok()?;
        self.slots.get_mut(idx)?.as_mut()
    }

    fn value(&self, seq: u64) -> Option<&Value> {
        let idx = usize::try_from(seq.checked_sub(self.base_seq)?).ok()?;
        self.slots.get(idx)?.as_ref().map(|slot| &slot.value)
    }

    // Whether `a` belongs above `b`; ties go to the earlier insertion
    fn precedes(&self, a: u64, b: u64) -> bool {
        let (Some(va), Some(vb)) = (self.value(a), self.value(b)) else {
            return a < b;
        };
        let o = (self.cmp)(va, vb);
        let o = if self.which == MAX_HEAP { o } else { o.reverse() };
        match o {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a < b,
        }
    }

    fn set(&mut self, pos: usize, seq: u64) {
        self.heap[pos] = seq;
        let which = self.which;
        if let Some(slot) = self.slot_mut(seq) {
            slot.heap_pos[which] = pos;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        let (sa, sb) = (self.heap[a], self.heap[b]);
        self.set(a, sb);
        self.set(b, sa);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.precedes(self.heap[pos], self.heap[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < self.heap.len() && self.precedes(self.heap[left], self.heap[best]) {
                best = left;
            }
            if right < self.heap.len() && self.precedes(self.heap[right], self.heap[best]) {
                best = right;
            }
            if best == pos {
                return;
            }
            self.swap(pos, best);
            pos = best;
        }
    }

    fn insert(&mut self, seq: u64) {
        let pos = self.heap.len();
        self.heap.push(seq);
        self.set(pos, seq);
        self.sift_up(pos);
    }

    fn restore(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn remove(&mut self, pos: usize) {
        let removed = self.heap[pos];
        let which = self.which;
        if let Some(slot) = self.slot_mut(removed) {
            slot.heap_pos[which] = NOT_IN_HEAP;
        }
        let Some(last) = self.heap.pop() else {
            return;
        };
        if pos < self.heap.len() {
            self.set(pos, last);
            self.restore(pos);
        }
    }
}
