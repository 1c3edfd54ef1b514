use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// High bit marks a slot as unpublished or mid-swap; readers spin or give
/// up, never read through it.
const MOVING: u32 = 1 << 31;

const DEFAULT_SPIN_CEILING: u32 = 4096;

#[inline]
fn pack(key: u32, index: u32) -> u64 {
    (u64::from(key) << 32) | u64::from(index)
}

#[inline]
fn unpack(entry: u64) -> (u32, u32) {
    ((entry >> 32) as u32, entry as u32)
}

/// Fixed-capacity binary min-heap over packed (key, index) entries with
/// lock-free concurrent insertion.
///
/// `push` reserves the next leaf with a fetch-add, publishes the entry,
/// then restores heap order by CAS-tagged parent/child swaps (bubble-up).
/// A bubble-up that exhausts its spin budget gives up and leaves the entry
/// where it landed; the next exclusive `pop_min` repairs the ordering
/// before extracting, so contention can delay ordering but never lose an
/// entry.
///
/// Slot values are ids into `entries`. Every slot permanently holds an id:
/// occupied slots hold it untagged, vacant slots park a free id under the
/// MOVING tag, which is how a push finds a free entry without a free list.
///
/// Extraction requires `&mut self`: one consumer at a time, with producers
/// quiesced. That matches the engine's single-flight discipline.
pub struct AtomicHeap {
    slots: Vec<AtomicU32>,
    /// Entry payloads, rewritten only while their id is parked.
    entries: Vec<AtomicU64>,
    len: AtomicU32,
    /// Bubble-ups that gave up under contention since the last repair.
    abandoned: AtomicU32,
    spin_ceiling: u32,
    capacity: usize,
}

impl AtomicHeap {
    pub fn new(capacity: usize) -> Self {
        Self::with_spin_ceiling(capacity, DEFAULT_SPIN_CEILING)
    }

    pub fn with_spin_ceiling(capacity: usize, spin_ceiling: u32) -> Self {
        // Ids must fit below the MOVING tag bit.
        let capacity = capacity.min((MOVING - 1) as usize);
        let slots = (0..capacity)
            .map(|id| AtomicU32::new(id as u32 | MOVING))
            .collect();
        let mut entries = Vec::new();
        entries.resize_with(capacity, || AtomicU64::new(0));
        Self {
            slots,
            entries,
            len: AtomicU32::new(0),
            abandoned: AtomicU32::new(0),
            spin_ceiling,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        (self.len.load(Ordering::Acquire) as usize).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts an entry. Returns false when the heap is at capacity; the
    /// working set is bounded, not grown.
    pub fn push(&self, key: u32, index: u32) -> bool {
        let position = self.len.fetch_add(1, Ordering::AcqRel) as usize;
        if position >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        // The reserved slot is parked (tagged) and owned by this push alone
        // until the publishing store below clears the tag.
        let id = self.slots[position].load(Ordering::Acquire) & !MOVING;
        self.entries[id as usize].store(pack(key, index), Ordering::Release);
        self.slots[position].store(id, Ordering::Release);
        self.bubble_up(position);
        true
    }

    fn entry_of(&self, id: u32) -> u64 {
        self.entries[id as usize].load(Ordering::Acquire)
    }

    /// Tags a slot as MOVING. Returns the untagged id it held, or None if
    /// the spin budget ran out.
    fn lock_slot(&self, position: usize) -> Option<u32> {
        let slot = &self.slots[position];
        let mut iters = 0u32;
        loop {
            let current = slot.load(Ordering::Acquire);
            if current & MOVING == 0
                && slot
                    .compare_exchange_weak(
                        current,
                        current | MOVING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                return Some(current);
            }
            iters += 1;
            if iters >= self.spin_ceiling {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    fn unlock_slot(&self, position: usize, id: u32) {
        self.slots[position].store(id, Ordering::Release);
    }

    fn bubble_up(&self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            // Lock order is parent before child (lower index first), the
            // same order every bubble-up uses, so chains cannot deadlock.
            let parent_id = match self.lock_slot(parent) {
                Some(id) => id,
                None => {
                    self.abandoned.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            let child_id = match self.lock_slot(position) {
                Some(id) => id,
                None => {
                    self.unlock_slot(parent, parent_id);
                    self.abandoned.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            if self.entry_of(child_id) < self.entry_of(parent_id) {
                self.unlock_slot(parent, child_id);
                self.unlock_slot(position, parent_id);
                position = parent;
            } else {
                self.unlock_slot(parent, parent_id);
                self.unlock_slot(position, child_id);
                return;
            }
        }
    }

    /// Removes and returns the minimum (key, index). Exclusive access: the
    /// heap repairs any contention-delayed ordering first, then extracts
    /// with a plain sift-down.
    pub fn pop_min(&mut self) -> Option<(u32, u32)> {
        let n = (*self.len.get_mut() as usize).min(self.capacity);
        if n == 0 {
            *self.len.get_mut() = 0;
            return None;
        }

        if *self.abandoned.get_mut() > 0 {
            self.rebuild(n);
            *self.abandoned.get_mut() = 0;
        }

        let root_id = self.slot_id(0);
        let result = unpack(self.entry_of(root_id));

        let last = n - 1;
        let last_id = self.slot_id(last);
        // Park the freed id at the vacated slot for a later push to claim.
        self.slots[last].store(root_id | MOVING, Ordering::Relaxed);
        *self.len.get_mut() = last as u32;

        if last > 0 {
            self.slots[0].store(last_id, Ordering::Relaxed);
            self.sift_down(0, last);
        }

        Some(result)
    }

    /// Drains the heap in key order.
    pub fn drain_sorted(&mut self) -> Vec<(u32, u32)> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_min() {
            out.push(entry);
        }
        out
    }

    fn slot_id(&self, position: usize) -> u32 {
        // A panicked pusher may have left a stale tag; exclusive access
        // makes it safe to strip.
        self.slots[position].load(Ordering::Relaxed) & !MOVING
    }

    fn rebuild(&mut self, n: usize) {
        for position in (0..n / 2).rev() {
            self.sift_down(position, n);
        }
    }

    fn sift_down(&self, mut position: usize, n: usize) {
        loop {
            let left = 2 * position + 1;
            if left >= n {
                return;
            }
            let right = left + 1;
            let mut smallest = position;
            let mut smallest_entry = self.entry_of(self.slot_id(position));
            let left_entry = self.entry_of(self.slot_id(left));
            if left_entry < smallest_entry {
                smallest = left;
                smallest_entry = left_entry;
            }
            if right < n && self.entry_of(self.slot_id(right)) < smallest_entry {
                smallest = right;
            }
            if smallest == position {
                return;
            }
            let a = self.slot_id(position);
            let b = self.slot_id(smallest);
            self.slots[position].store(b, Ordering::Relaxed);
            self.slots[smallest].store(a, Ordering::Relaxed);
            position = smallest;
        }
    }
}

impl std::fmt::Debug for AtomicHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicHeap")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_push_pop_orders_by_key() {
        let mut heap = AtomicHeap::new(16);
        for (key, index) in [(5u32, 0u32), (1, 1), (9, 2), (3, 3), (7, 4)] {
            assert!(heap.push(key, index));
        }
        let drained = heap.drain_sorted();
        let keys: Vec<u32> = drained.iter().map(|&(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert!(heap.is_empty());
    }

    #[test]
    fn push_past_capacity_is_rejected() {
        let heap = AtomicHeap::new(4);
        for i in 0..4 {
            assert!(heap.push(i, i));
        }
        assert!(!heap.push(99, 99));
        assert_eq!(heap.len(), 4);
        assert_eq!(heap.capacity(), 4);
    }

    #[test]
    fn interleaved_push_and_pop_reuses_freed_entries() {
        let mut heap = AtomicHeap::new(4);
        assert!(heap.push(0, 10));
        assert!(heap.push(1, 11));
        assert_eq!(heap.pop_min(), Some((0, 10)));
        assert!(heap.push(2, 12));
        assert!(heap.push(3, 13));
        assert!(heap.push(4, 14));
        assert!(!heap.push(5, 15));
        assert_eq!(
            heap.drain_sorted(),
            vec![(1, 11), (2, 12), (3, 13), (4, 14)]
        );
    }

    #[test]
    fn concurrent_pushes_drain_fully_sorted() {
        let threads = 8usize;
        let per_thread = 2000usize;
        let heap = AtomicHeap::new(threads * per_thread);

        std::thread::scope(|scope| {
            for t in 0..threads {
                let heap = &heap;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        let key = ((i * 31 + t * 17) % 50_000) as u32;
                        assert!(heap.push(key, (t * per_thread + i) as u32));
                    }
                });
            }
        });

        let mut heap = heap;
        assert_eq!(heap.len(), threads * per_thread);
        let drained = heap.drain_sorted();
        assert_eq!(drained.len(), threads * per_thread);
        for w in drained.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }

        let mut seen = vec![false; threads * per_thread];
        for &(_, index) in &drained {
            assert!(!seen[index as usize]);
            seen[index as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn heavy_contention_with_tiny_spin_budget_loses_nothing() {
        let threads = 8usize;
        let per_thread = 500usize;
        // Spin budget this small makes bubble-ups give up constantly; the
        // repair pass on extraction must still produce a full sorted drain.
        let heap = AtomicHeap::with_spin_ceiling(threads * per_thread, 2);

        std::thread::scope(|scope| {
            for t in 0..threads {
                let heap = &heap;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        assert!(heap.push((per_thread - i) as u32, (t * per_thread + i) as u32));
                    }
                });
            }
        });

        let mut heap = heap;
        let drained = heap.drain_sorted();
        assert_eq!(drained.len(), threads * per_thread);
        for w in drained.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
    }
}
