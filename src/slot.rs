// SPDX-License-Identifier: EPL-2.0 OR GPL-2.0-or-later
// ---------------------------------------------------------------------------
//! This pub(crate) module defines [SlotAllocator], which assigns and
//! optionally recycles the `u32` slot indices used to address the
//! derivative vector.
//!
//! Link to [parent module](super)
// ---------------------------------------------------------------------------
//
use crate::Slot;
//
// SlotAllocator
/// Assigns fresh slots and, when `reuse` is enabled, recycles released
/// ones; see spec.md §4.2.
///
/// Invariants (checked with `debug_assert!` in `#[cfg(test)]` builds via
/// [SlotAllocator::check_invariants]): the free ranges are non-empty,
/// pairwise disjoint and sorted by `lo`; every live slot lies outside
/// every free range.
pub(crate) struct SlotAllocator {
    watermark: Slot,
    reuse: bool,
    // sorted, disjoint, half-open ranges of free slots.
    free: Vec<(Slot, Slot)>,
}
//
impl SlotAllocator {
    //
    // SlotAllocator::new
    pub(crate) fn new(reuse: bool) -> Self {
        Self { watermark: 0, reuse, free: Vec::new() }
    }
    //
    // SlotAllocator.watermark
    /// One past the highest slot ever handed out by this allocator.
    pub(crate) fn watermark(&self) -> Slot {
        self.watermark
    }
    //
    // SlotAllocator.register_variable
    /// Returns a fresh slot, preferring the first free range when reuse
    /// is enabled.
    pub(crate) fn register_variable(&mut self) -> Slot {
        if self.reuse {
            if let Some(&(lo, hi)) = self.free.first() {
                let slot = lo;
                if lo + 1 == hi {
                    self.free.remove(0);
                } else {
                    self.free[0].0 = lo + 1;
                }
                return slot;
            }
        }
        let slot = self.watermark;
        self.watermark += 1;
        slot
    }
    //
    // SlotAllocator.unregister_variable
    /// Releases `slot`. With reuse disabled this only shrinks the
    /// watermark when `slot` is the most-recently-allocated one;
    /// otherwise it is a no-op (the engine simply never reuses it).
    pub(crate) fn unregister_variable(&mut self, slot: Slot) {
        if !self.reuse {
            if slot + 1 == self.watermark {
                self.watermark -= 1;
            }
            return;
        }
        if slot + 1 == self.watermark {
            self.watermark -= 1;
            // absorb a now-trailing free range into the watermark.
            while let Some(&(lo, hi)) = self.free.last() {
                if hi == self.watermark {
                    self.watermark = lo;
                    self.free.pop();
                } else {
                    break;
                }
            }
            return;
        }
        // find where slot would sort among the free ranges.
        let pos = self.free.partition_point(|&(lo, _hi)| lo <= slot);
        // pos-1 is the only range that could have hi == slot (start-extend);
        // pos is the only range that could have lo == slot+1 (end-extend).
        let extend_prev = pos > 0 && self.free[pos - 1].1 == slot;
        let extend_next = pos < self.free.len() && self.free[pos].0 == slot + 1;
        match (extend_prev, extend_next) {
            (true, true) => {
                self.free[pos - 1].1 = self.free[pos].1;
                self.free.remove(pos);
            }
            (true, false) => {
                self.free[pos - 1].1 = slot + 1;
            }
            (false, true) => {
                self.free[pos].0 = slot;
            }
            (false, false) => {
                self.free.insert(pos, (slot, slot + 1));
            }
        }
    }
    //
    // SlotAllocator.truncate_to
    /// Drops every free range whose start is `>= watermark` and clamps
    /// the watermark itself; used when a sub-recording rolls the tape
    /// back to a saved boundary.
    pub(crate) fn truncate_to(&mut self, watermark: Slot) {
        self.free.retain(|&(lo, _hi)| lo < watermark);
        if let Some(last) = self.free.last_mut() {
            if last.1 > watermark {
                last.1 = watermark;
            }
        }
        self.watermark = watermark;
    }
    //
    // SlotAllocator.reuse_enabled
    pub(crate) fn reuse_enabled(&self) -> bool {
        self.reuse
    }
    //
    // SlotAllocator.free_ranges_count
    /// Number of disjoint free ranges currently tracked; exposed for
    /// [crate::tape::Tape::debug_counts].
    pub(crate) fn free_ranges_count(&self) -> usize {
        self.free.len()
    }
    //
    // SlotAllocator.drop_free_ranges_at_or_above
    /// Drops (or clips) free ranges at or beyond `bound`, without
    /// touching the watermark; used by `reset_to`, which rolls back
    /// statements and operations within a recording but must not shrink
    /// slots still held by live variables.
    pub(crate) fn drop_free_ranges_at_or_above(&mut self, bound: Slot) {
        self.free.retain(|&(lo, _hi)| lo < bound);
        if let Some(last) = self.free.last_mut() {
            if last.1 > bound {
                last.1 = bound;
            }
        }
    }
    //
    // SlotAllocator.num_free
    #[cfg(test)]
    pub(crate) fn num_free(&self) -> Slot {
        self.free.iter().map(|&(lo, hi)| hi - lo).sum()
    }
    //
    // SlotAllocator.check_invariants
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut prev_hi: Option<Slot> = None;
        for &(lo, hi) in &self.free {
            assert!(lo < hi, "free range must be non-empty");
            if let Some(p) = prev_hi {
                assert!(p < lo, "free ranges must be sorted and disjoint");
            }
            prev_hi = Some(hi);
            assert!(hi <= self.watermark, "free range must lie below the watermark");
        }
    }
}
//
#[cfg(test)]
mod tests {
    use super::*;
    //
    #[test]
    fn without_reuse_only_shrinks_from_the_end() {
        let mut a = SlotAllocator::new(false);
        let s0 = a.register_variable();
        let s1 = a.register_variable();
        let s2 = a.register_variable();
        assert_eq!((s0, s1, s2), (0, 1, 2));
        a.unregister_variable(s0); // middle-ish, ignored without reuse
        assert_eq!(a.watermark(), 3);
        a.unregister_variable(s2); // at the end, shrinks
        assert_eq!(a.watermark(), 2);
    }
    //
    #[test]
    fn reuse_recycles_and_merges_ranges() {
        let mut a = SlotAllocator::new(true);
        let slots: Vec<Slot> = (0..5).map(|_| a.register_variable()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
        a.unregister_variable(1);
        a.unregister_variable(3);
        a.check_invariants();
        assert_eq!(a.num_free(), 2);
        a.unregister_variable(2); // joins {1} and {3} into {1,2,3}
        a.check_invariants();
        assert_eq!(a.num_free(), 3);
        let reused = a.register_variable();
        assert_eq!(reused, 1);
        a.check_invariants();
    }
    //
    #[test]
    fn release_at_the_end_shrinks_watermark_and_absorbs_trailing_range() {
        let mut a = SlotAllocator::new(true);
        for _ in 0..4 {
            a.register_variable();
        }
        a.unregister_variable(2);
        a.unregister_variable(3); // now free = {2,3}, watermark should drop to 2
        a.check_invariants();
        assert_eq!(a.watermark(), 2);
        assert_eq!(a.num_free(), 0);
    }
    //
    #[test]
    fn truncate_to_drops_ranges_beyond_the_new_watermark() {
        let mut a = SlotAllocator::new(true);
        for _ in 0..10 {
            a.register_variable();
        }
        a.unregister_variable(2);
        a.unregister_variable(7);
        a.truncate_to(5);
        a.check_invariants();
        assert_eq!(a.watermark(), 5);
        assert_eq!(a.num_free(), 1);
    }
}
