// Faulty-member retention list.
//
// Same ring-buffer shape as the gossip queue, parameterized by R (max
// list-request observations) instead of B, but bucket membership is
// tracked directly in a parallel `observation_counts` array rather than
// through a second bucket-boundary structure: promotion is triggered by
// observing a full-list sync, not by transmission, and every live entry
// advances together on each observation, so there is no per-entry subset
// to track separately from the count itself. Only the first half of
// buckets are exposed to `for_each`, the rest retained to block
// re-admission without re-propagating the tombstone.

use crate::address::Address;
use crate::membership::Member;
use std::collections::HashMap;
use std::collections::VecDeque;

pub struct FaultyList {
    ring: VecDeque<Option<Member>>,
    /// Observation count parallel to `ring`; `observation_counts[i]`
    /// applies only while `ring[i]` is `Some`.
    observation_counts: Vec<usize>,
    index_of: HashMap<Address, usize>,
    max_observation_count: usize,
}

impl FaultyList {
    pub fn new(max_observation_count: usize, pre_allocate: usize) -> Self {
        let r = max_observation_count.max(1);
        FaultyList {
            ring: VecDeque::with_capacity(pre_allocate),
            observation_counts: Vec::with_capacity(pre_allocate),
            index_of: HashMap::new(),
            max_observation_count: r,
        }
    }

    pub fn len(&self) -> usize {
        self.index_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_of.is_empty()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.index_of.contains_key(&address)
    }

    pub fn get(&self, address: Address) -> Option<&Member> {
        self.index_of.get(&address).and_then(|&idx| self.ring[idx].as_ref())
    }

    /// Insert a new tombstone into bucket 0. If the address is already
    /// present, its entry is left in place, bucket unchanged — there is no
    /// incarnation-based replacement rule here.
    pub fn insert(&mut self, member: Member) {
        if self.index_of.contains_key(&member.address) {
            return;
        }
        let idx = self.ring.len();
        self.index_of.insert(member.address, idx);
        self.ring.push_back(Some(member));
        self.observation_counts.push(0);
    }

    pub fn remove(&mut self, address: Address) -> Option<Member> {
        let idx = self.index_of.remove(&address)?;
        self.ring[idx].take()
    }

    /// Advance every live entry by one observation. Entries that reach the
    /// observation ceiling are evicted in place; holes left behind (here
    /// and by `remove`) are reclaimed by an occasional amortized
    /// compaction rather than after every call.
    pub fn list_request_observed(&mut self) {
        self.advance_observation_counts();
        if self.ring.len() > (self.index_of.len() * 2).max(16) {
            self.compact_holes();
        }
    }

    fn advance_observation_counts(&mut self) {
        let r = self.max_observation_count;
        for (idx, entry) in self.ring.iter_mut().enumerate() {
            if let Some(member) = entry {
                if self.observation_counts[idx] + 1 >= r {
                    self.index_of.remove(&member.address);
                    *entry = None;
                }
            }
        }
        for count in self.observation_counts.iter_mut() {
            *count = (*count + 1).min(r);
        }
    }

    /// Drop every hole (evicted or removed slot), regardless of position,
    /// keeping `observation_counts` in lockstep with `ring`.
    fn compact_holes(&mut self) {
        let mut kept_ring = VecDeque::with_capacity(self.ring.len());
        let mut kept_counts = Vec::with_capacity(self.observation_counts.len());
        for (entry, count) in self.ring.drain(..).zip(self.observation_counts.drain(..)) {
            if entry.is_some() {
                kept_ring.push_back(entry);
                kept_counts.push(count);
            }
        }
        self.ring = kept_ring;
        self.observation_counts = kept_counts;
        self.index_of.clear();
        for (idx, entry) in self.ring.iter().enumerate() {
            if let Some(member) = entry {
                self.index_of.insert(member.address, idx);
            }
        }
    }

    /// Yield only tombstones in buckets `[0, R/2)`: recently confirmed
    /// faults that are still safe to advertise in a full-list reply.
    /// Deeper entries are retained to block re-admission but hidden here.
    pub fn for_each(&self) -> impl Iterator<Item = &Member> + '_ {
        let visible_cutoff = self.max_observation_count / 2;
        self.ring.iter().enumerate().filter_map(move |(idx, entry)| {
            let member = entry.as_ref()?;
            let count = self.observation_counts.get(idx).copied().unwrap_or(0);
            if count < visible_cutoff {
                Some(member)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MemberState;
    use crate::numeric::IncarnationNumber;

    fn addr(s: &str) -> Address {
        Address::new(s.parse().unwrap()).unwrap()
    }

    fn tombstone(a: &str) -> Member {
        Member {
            address: addr(a),
            state: MemberState::Faulty,
            incarnation: IncarnationNumber(1),
            suspicion_period_counter: 0,
        }
    }

    #[test]
    fn visible_window_is_first_half_of_buckets() {
        let mut list = FaultyList::new(8, 8);
        list.insert(tombstone("10.0.0.1:1"));
        assert_eq!(list.for_each().count(), 1);
    }

    #[test]
    fn entries_hidden_after_passing_visibility_cutoff() {
        let mut list = FaultyList::new(4, 8);
        list.insert(tombstone("10.0.0.1:1"));
        for _ in 0..2 {
            list.list_request_observed();
        }
        assert_eq!(list.for_each().count(), 0);
        assert!(list.contains(addr("10.0.0.1:1")));
    }

    #[test]
    fn entries_evicted_after_r_observations() {
        let mut list = FaultyList::new(3, 8);
        list.insert(tombstone("10.0.0.1:1"));
        for _ in 0..3 {
            list.list_request_observed();
        }
        assert!(!list.contains(addr("10.0.0.1:1")));
        assert!(list.is_empty());
    }
}
