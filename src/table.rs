//! The bucket table and placement engine behind [`HopMap`].
//!
//! This is hopscotch hashing with the neighborhood bitmap of the original
//! scheme replaced by a doubly linked chain per home bucket. Every occupied
//! bucket records which home it belongs to plus two delta links to the
//! previous and next occupant of the same home, and every home bucket records
//! the delta to the first member of its chain. A lookup hashes to the home,
//! follows `first`, and walks `next` links; it touches at most one chain,
//! whose members all live within `neighborhood` slots of the home. Because the
//! chain is delta-encoded rather than bitmap-encoded, the neighborhood can
//! grow past any fixed word width, which is what lets the table absorb
//! degenerate hash functions by growing the neighborhood instead of looping
//! on resize.
//!
//! The table stores no keys or values. Buckets hold `slotmap` handles into an
//! external entry store, and key equality is resolved through a predicate
//! supplied per call. Displacement during insertion therefore moves one
//! handle and a few indices per hop, never user data, and handles held by
//! callers stay valid across any amount of shuffling.
//!
//! Insertion probes linearly from the home for an empty bucket. If the empty
//! bucket lands outside the neighborhood, it is hopped backward: scanning
//! back from just below the empty slot, the first occupant whose own home is
//! within reach of the empty slot is moved forward into it, and its old
//! bucket becomes the new empty slot. Scanning nearest-first is load-bearing,
//! not a heuristic: the chosen occupant is the highest movable index below
//! the empty slot, so any same-home successor it has must already sit beyond
//! the empty slot. Chains stay sorted by bucket index across a hop and the
//! relink stays O(1).
//!
//! When probing or hopping fails, [`HopTable::rebuild`] re-places every live
//! entry into a fresh table with three times the capacity, three times the
//! neighborhood, or both, retrying with larger dimensions until placement
//! succeeds. The candidate table is built out of place and only swapped in
//! when every entry has been installed, so allocation failure leaves the
//! previous table untouched.
//!
//! [`HopMap`]: crate::HopMap

use slotmap::DefaultKey;

use crate::map::Error;

/// Initial neighborhood size and initial capacity.
pub(crate) const MIN_NEIGHBORHOOD: usize = 4;

/// Capacity multiplier applied when a rebuild grows the table.
const GROW_CAPACITY: usize = 3;

/// Neighborhood multiplier applied when a rebuild widens the neighborhood.
const GROW_NEIGHBORHOOD: usize = 3;

/// One slot of placement metadata.
///
/// `slot`, `home`, `next`, and `prev` describe the entry residing in this
/// bucket; `first` describes this bucket's role as a home and survives the
/// resident coming and going. `home` is meaningful only while `slot` is
/// `Some`. All deltas are positive offsets: `first` is measured forward from
/// the home bucket, `next` forward and `prev` backward from the member,
/// which works because every chain is kept sorted by bucket index.
#[derive(Clone, Copy, Default)]
struct Bucket {
    slot: Option<DefaultKey>,
    home: usize,
    first: Option<usize>,
    next: Option<usize>,
    prev: Option<usize>,
}

#[derive(Clone)]
pub(crate) struct HopTable {
    buckets: Vec<Bucket>,
    neighborhood: usize,
}

impl HopTable {
    pub(crate) fn new() -> Self {
        Self {
            buckets: vec![Bucket::default(); MIN_NEIGHBORHOOD],
            neighborhood: MIN_NEIGHBORHOOD,
        }
    }

    fn with_dims(capacity: usize, neighborhood: usize) -> Result<Self, Error> {
        debug_assert!(capacity >= neighborhood);
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        buckets.resize(capacity, Bucket::default());
        Ok(Self {
            buckets,
            neighborhood,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Drops every placement and shrinks back to the initial dimensions.
    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    fn home_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Walks the chain rooted at `hash`'s home bucket and returns the bucket
    /// index and handle of the first member for which `is_match` holds.
    pub(crate) fn find(
        &self,
        hash: u64,
        mut is_match: impl FnMut(DefaultKey) -> bool,
    ) -> Option<(usize, DefaultKey)> {
        let home = self.home_of(hash);
        let mut at = home + self.buckets[home].first?;
        loop {
            if let Some(slot) = self.buckets[at].slot {
                if is_match(slot) {
                    return Some((at, slot));
                }
            }
            at += self.buckets[at].next?;
        }
    }

    /// Places an already-stored entry, displacing neighbors as needed.
    ///
    /// Returns `false` when no empty bucket is reachable, meaning the caller
    /// must [`rebuild`](Self::rebuild) and retry. The table is left
    /// consistent either way; completed hops are real placements, not a
    /// transaction to roll back.
    pub(crate) fn place(&mut self, slot: DefaultKey, hash: u64) -> bool {
        let capacity = self.buckets.len();
        let home = self.home_of(hash);

        let mut free = home;
        while free < capacity && self.buckets[free].slot.is_some() {
            free += 1;
        }
        if free == capacity {
            return false;
        }

        while free - home >= self.neighborhood {
            let Some(movable) = self.movable_into(free) else {
                return false;
            };
            self.relocate(movable, free);
            free = movable;
        }

        self.install(slot, home, free);
        true
    }

    /// Scans backward from `free` for the nearest occupant that may hop
    /// forward into it without leaving its own neighborhood.
    fn movable_into(&self, free: usize) -> Option<usize> {
        let floor = free.saturating_sub(self.neighborhood - 1);
        (floor..free).rev().find(|&index| {
            let bucket = &self.buckets[index];
            bucket.slot.is_some() && free - bucket.home < self.neighborhood
        })
    }

    /// Moves the occupant of `from` into the empty bucket `to`, relinking its
    /// chain around the new position.
    fn relocate(&mut self, from: usize, to: usize) {
        let Bucket {
            slot,
            home,
            next,
            prev,
            ..
        } = self.buckets[from];

        match prev {
            Some(delta) => {
                let before = from - delta;
                self.buckets[before].next = Some(to - before);
                self.buckets[to].prev = Some(to - before);
            }
            None => {
                // Chain head; the home keeps pointing at this entry.
                self.buckets[home].first = Some(to - home);
                self.buckets[to].prev = None;
            }
        }
        match next {
            Some(delta) => {
                // The successor sits beyond `to`: it shares this entry's home,
                // so were it below `to` the backward scan would have chosen it.
                let after = from + delta;
                debug_assert!(after > to);
                self.buckets[after].prev = Some(after - to);
                self.buckets[to].next = Some(after - to);
            }
            None => self.buckets[to].next = None,
        }

        self.buckets[to].slot = slot;
        self.buckets[to].home = home;
        self.clear_resident(from);
    }

    /// Writes a new resident into the empty bucket `at` and splices it into
    /// its home's chain, keeping the chain sorted by bucket index.
    fn install(&mut self, slot: DefaultKey, home: usize, at: usize) {
        self.buckets[at].slot = Some(slot);
        self.buckets[at].home = home;

        match self.buckets[home].first {
            None => {
                self.buckets[at].prev = None;
                self.buckets[at].next = None;
                self.buckets[home].first = Some(at - home);
            }
            Some(delta) if home + delta > at => {
                let head = home + delta;
                self.buckets[head].prev = Some(head - at);
                self.buckets[at].next = Some(head - at);
                self.buckets[at].prev = None;
                self.buckets[home].first = Some(at - home);
            }
            Some(delta) => {
                let mut before = home + delta;
                while let Some(step) = self.buckets[before].next {
                    if before + step > at {
                        break;
                    }
                    before += step;
                }
                match self.buckets[before].next {
                    Some(step) => {
                        let after = before + step;
                        self.buckets[after].prev = Some(after - at);
                        self.buckets[at].next = Some(after - at);
                    }
                    None => self.buckets[at].next = None,
                }
                self.buckets[at].prev = Some(at - before);
                self.buckets[before].next = Some(at - before);
            }
        }
    }

    /// Splices the occupant of `at` out of its chain and empties the bucket.
    /// The handle it carried is gone afterwards; remove the entry from the
    /// store after calling this, not before.
    pub(crate) fn unlink(&mut self, at: usize) {
        let Bucket {
            home, next, prev, ..
        } = self.buckets[at];

        match (prev, next) {
            (Some(before_delta), Some(after_delta)) => {
                let before = at - before_delta;
                let after = at + after_delta;
                self.buckets[before].next = Some(after - before);
                self.buckets[after].prev = Some(after - before);
            }
            (Some(before_delta), None) => {
                self.buckets[at - before_delta].next = None;
            }
            (None, Some(after_delta)) => {
                let after = at + after_delta;
                self.buckets[home].first = Some(after - home);
                self.buckets[after].prev = None;
            }
            (None, None) => {
                self.buckets[home].first = None;
            }
        }
        self.clear_resident(at);
    }

    fn clear_resident(&mut self, at: usize) {
        let bucket = &mut self.buckets[at];
        bucket.slot = None;
        bucket.next = None;
        bucket.prev = None;
    }

    /// Re-places every live entry into a larger table.
    ///
    /// Applies the growth policy until a candidate admits all entries: more
    /// capacity when the table is simply out of room, a wider neighborhood
    /// when hopping starved, and both when the neighborhood is already a
    /// large fraction of the table. Each candidate is populated out of place
    /// and swapped in only on success.
    pub(crate) fn rebuild(&mut self, live: &[(DefaultKey, u64)]) -> Result<(), Error> {
        let mut capacity = self.buckets.len();
        let mut neighborhood = self.neighborhood;

        if live.len() >= capacity {
            capacity *= GROW_CAPACITY;
            if self.adopt(capacity, neighborhood, live)? {
                return Ok(());
            }
        }
        loop {
            if neighborhood * GROW_NEIGHBORHOOD >= capacity || live.len() >= capacity {
                capacity *= GROW_CAPACITY;
            }
            neighborhood *= GROW_NEIGHBORHOOD;
            if self.adopt(capacity, neighborhood, live)? {
                return Ok(());
            }
        }
    }

    /// Builds a candidate table with the given dimensions and installs it if
    /// every entry places. `Ok(false)` means placement starved and the caller
    /// should grow further; the current table is untouched.
    fn adopt(
        &mut self,
        capacity: usize,
        neighborhood: usize,
        live: &[(DefaultKey, u64)],
    ) -> Result<bool, Error> {
        let mut candidate = Self::with_dims(capacity, neighborhood)?;
        for &(slot, hash) in live {
            if !candidate.place(slot, hash) {
                return Ok(false);
            }
        }
        *self = candidate;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    /// Drives the table the way the map does, with hashes standing in for
    /// whole entries.
    struct Harness {
        table: HopTable,
        store: SlotMap<DefaultKey, u64>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                table: HopTable::new(),
                store: SlotMap::with_key(),
            }
        }

        fn insert(&mut self, hash: u64) -> DefaultKey {
            let slot = self.store.insert(hash);
            if !self.table.place(slot, hash) {
                let live: Vec<_> = self.store.iter().map(|(k, &h)| (k, h)).collect();
                self.table.rebuild(&live).unwrap();
            }
            slot
        }

        fn remove(&mut self, slot: DefaultKey) {
            let hash = self.store[slot];
            let (index, _) = self.table.find(hash, |k| k == slot).expect("entry placed");
            self.table.unlink(index);
            self.store.remove(slot);
        }

        fn assert_found(&self, slot: DefaultKey, hash: u64) {
            let found = self.table.find(hash, |k| k == slot);
            assert_eq!(found.map(|(_, k)| k), Some(slot));
        }

        /// Checks the structural invariants: every occupant within its
        /// neighborhood, chains sorted and symmetric, and a bijection between
        /// live store entries and occupied buckets.
        fn check(&self) {
            let table = &self.table;
            let capacity = table.buckets.len();
            assert!(capacity >= table.neighborhood);

            let mut residents = std::collections::HashSet::new();
            for (index, bucket) in table.buckets.iter().enumerate() {
                let Some(slot) = bucket.slot else { continue };
                let hash = self.store[slot];
                assert_eq!(
                    bucket.home,
                    (hash % capacity as u64) as usize,
                    "bucket {index} records the wrong home"
                );
                assert!(
                    index >= bucket.home && index - bucket.home < table.neighborhood,
                    "bucket {index} is outside its neighborhood (home {})",
                    bucket.home
                );
                assert!(residents.insert(slot), "handle placed twice");
            }
            assert_eq!(residents.len(), self.store.len());

            let mut chained = 0usize;
            for home in 0..capacity {
                let Some(first) = table.buckets[home].first else {
                    continue;
                };
                let mut at = home + first;
                assert!(table.buckets[at].prev.is_none(), "chain head has a prev");
                loop {
                    chained += 1;
                    assert!(table.buckets[at].slot.is_some(), "chain visits empty bucket");
                    assert_eq!(table.buckets[at].home, home, "chain crosses homes");
                    let Some(step) = table.buckets[at].next else {
                        break;
                    };
                    assert!(step > 0);
                    assert_eq!(
                        table.buckets[at + step].prev,
                        Some(step),
                        "asymmetric chain link at {at}"
                    );
                    at += step;
                }
            }
            assert_eq!(chained, residents.len(), "chains miss some occupants");
        }
    }

    #[test]
    fn starts_at_minimum_dimensions() {
        let table = HopTable::new();
        assert_eq!(table.capacity(), MIN_NEIGHBORHOOD);
        assert_eq!(table.neighborhood, MIN_NEIGHBORHOOD);
    }

    #[test]
    fn find_on_empty_home_is_none() {
        let harness = Harness::new();
        assert!(harness.table.find(0, |_| true).is_none());
        assert!(harness.table.find(3, |_| true).is_none());
    }

    #[test]
    fn distinct_homes_place_directly() {
        let mut harness = Harness::new();
        let slots: Vec<_> = (0..4u64).map(|h| (harness.insert(h), h)).collect();
        harness.check();
        for (slot, hash) in slots {
            harness.assert_found(slot, hash);
        }
    }

    #[test]
    fn colliding_hashes_share_one_chain() {
        let mut harness = Harness::new();
        let slots: Vec<_> = (0..20).map(|_| harness.insert(7)).collect();
        harness.check();
        for slot in slots {
            harness.assert_found(slot, 7);
        }
        // A chain walk with a never-matching predicate exhausts the chain.
        assert!(harness.table.find(7, |_| false).is_none());
    }

    #[test]
    fn mismatched_key_in_populated_chain_is_none() {
        let mut harness = Harness::new();
        let present = harness.insert(5);
        let absent = harness.insert(6);
        harness.remove(absent);
        assert!(harness.table.find(5, |k| k == absent).is_none());
        harness.assert_found(present, 5);
    }

    #[test]
    fn unlink_head_middle_and_tail() {
        let mut harness = Harness::new();
        let slots: Vec<_> = (0..9).map(|_| harness.insert(2)).collect();
        harness.check();

        // Chain members sit at increasing indices; head first, then a middle
        // member, then the tail, re-checking invariants after each splice.
        harness.remove(slots[0]);
        harness.check();
        harness.remove(slots[4]);
        harness.check();
        harness.remove(slots[8]);
        harness.check();

        for &slot in &slots[1..4] {
            harness.assert_found(slot, 2);
        }
        for &slot in &slots[5..8] {
            harness.assert_found(slot, 2);
        }
    }

    #[test]
    fn unlink_last_member_clears_home() {
        let mut harness = Harness::new();
        let slot = harness.insert(1);
        harness.remove(slot);
        harness.check();
        assert!(harness.table.find(1, |_| true).is_none());
    }

    #[test]
    fn displacement_hops_keep_chains_sorted() {
        let mut harness = Harness::new();
        // Saturate low homes so later inserts must probe past their
        // neighborhood and hop the free bucket backward.
        for round in 0..6 {
            for home in 0..5u64 {
                harness.insert(home);
                if round % 2 == 0 {
                    harness.insert(home * 31 + 7);
                }
            }
            harness.check();
        }
    }

    #[test]
    fn degenerate_hash_grows_capacity_and_neighborhood() {
        let mut harness = Harness::new();
        let slots: Vec<_> = (0..100).map(|_| harness.insert(0)).collect();
        harness.check();

        // Everything homes at bucket zero, so the neighborhood must have
        // stretched to cover at least one hundred slots.
        assert!(harness.table.neighborhood >= 100);
        assert!(harness.table.capacity() >= 100);
        for slot in slots {
            harness.assert_found(slot, 0);
        }
    }

    #[test]
    fn growth_keeps_capacity_at_least_neighborhood() {
        let mut harness = Harness::new();
        for i in 0..300u64 {
            harness.insert(i % 11);
        }
        harness.check();
        assert!(harness.table.capacity() >= harness.table.neighborhood);
    }

    #[test]
    fn churn_preserves_invariants() {
        let mut harness = Harness::new();
        let mut live = Vec::new();
        for i in 0..400u64 {
            // A deliberately clumpy distribution: many collisions, homes
            // clustered at the low edge of the table.
            live.push((harness.insert(i * 37 % 101), i * 37 % 101));
            if i % 3 == 0 {
                let (slot, _) = live.swap_remove((i as usize * 7) % live.len());
                harness.remove(slot);
            }
            if i % 50 == 0 {
                harness.check();
            }
        }
        harness.check();
        for (slot, hash) in live {
            harness.assert_found(slot, hash);
        }
    }

    #[test]
    fn reinsert_after_remove_reuses_space() {
        let mut harness = Harness::new();
        let first: Vec<_> = (0..30).map(|_| harness.insert(3)).collect();
        let capacity_after_fill = harness.table.capacity();
        for slot in first {
            harness.remove(slot);
        }
        // Removal never shrinks; the next wave fits without another rebuild.
        let second: Vec<_> = (0..30).map(|_| harness.insert(3)).collect();
        assert_eq!(harness.table.capacity(), capacity_after_fill);
        harness.check();
        for slot in second {
            harness.assert_found(slot, 3);
        }
    }

    #[test]
    fn clear_restores_initial_dimensions() {
        let mut harness = Harness::new();
        for _ in 0..50 {
            harness.insert(9);
        }
        assert!(harness.table.capacity() > MIN_NEIGHBORHOOD);

        harness.store.clear();
        harness.table.clear();
        assert_eq!(harness.table.capacity(), MIN_NEIGHBORHOOD);
        assert_eq!(harness.table.neighborhood, MIN_NEIGHBORHOOD);
        harness.check();

        let slot = harness.insert(9);
        harness.assert_found(slot, 9);
    }

    #[test]
    fn rebuild_reinstalls_every_entry() {
        let mut harness = Harness::new();
        let slots: Vec<_> = (0..40u64)
            .map(|h| (harness.insert(h * 13 % 17), h * 13 % 17))
            .collect();
        // Force one more rebuild by hand and make sure nothing is lost.
        let live: Vec<_> = harness.store.iter().map(|(k, &h)| (k, h)).collect();
        harness.table.rebuild(&live).unwrap();
        harness.check();
        for (slot, hash) in slots {
            harness.assert_found(slot, hash);
        }
    }
}
