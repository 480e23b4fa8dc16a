// Member state and the alive-members table.
//
// `AliveTable` is an ordered sequence keyed by address: binary-search
// lookup, ordered iteration, and index-based random access (the picker
// needs the last one).

use crate::address::Address;
use crate::error::{Result, SwimError};
use crate::numeric::IncarnationNumber;
use serde::{Deserialize, Serialize};

/// A member's failure-detection state. `None` is a placeholder tag used
/// only to detect uninitialized decode values; it is never constructed by
/// the protocol engine and never appears on the wire as a distinct tag
/// value (callers decoding `ListResponse` entries get `Alive`/`Suspect`/
/// `Faulty` only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemberState {
    Alive = 0,
    Suspect = 1,
    Faulty = 2,
    None = 3,
}

impl MemberState {
    pub fn from_wire_tag(tag: u8) -> Result<MemberState> {
        match tag {
            0 => Ok(MemberState::Alive),
            1 => Ok(MemberState::Suspect),
            2 => Ok(MemberState::Faulty),
            3 => Ok(MemberState::None),
            other => Err(SwimError::InvalidMessageType(other)),
        }
    }
}

/// A single entry in the alive-members table.
///
/// `suspicion_period_counter` counts full protocol periods spent in
/// `Suspect` and is not wire-encoded — it is purely local bookkeeping
/// driving promotion to `Faulty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub address: Address,
    pub state: MemberState,
    pub incarnation: IncarnationNumber,
    pub suspicion_period_counter: u32,
}

impl Member {
    pub fn alive(address: Address, incarnation: IncarnationNumber) -> Self {
        Member { address, state: MemberState::Alive, incarnation, suspicion_period_counter: 0 }
    }
}

/// Ordered sequence of members sorted by address. No two entries share an
/// address; the local member is never present in its own table.
#[derive(Debug, Clone, Default)]
pub struct AliveTable {
    members: Vec<Member>,
}

impl AliveTable {
    pub fn new() -> Self {
        AliveTable { members: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn search(&self, address: Address) -> std::result::Result<usize, usize> {
        self.members.binary_search_by_key(&address, |m| m.address)
    }

    /// Insert a member, maintaining sort order. Overwrites any existing
    /// entry for the same address.
    pub fn insert(&mut self, member: Member) {
        match self.search(member.address) {
            Ok(idx) => self.members[idx] = member,
            Err(idx) => self.members.insert(idx, member),
        }
    }

    pub fn remove(&mut self, address: Address) -> Option<Member> {
        match self.search(address) {
            Ok(idx) => Some(self.members.remove(idx)),
            Err(_) => None,
        }
    }

    pub fn get(&self, address: Address) -> Option<&Member> {
        self.search(address).ok().map(|idx| &self.members[idx])
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut Member> {
        match self.search(address) {
            Ok(idx) => Some(&mut self.members[idx]),
            Err(_) => None,
        }
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Member> {
        self.members.get(index)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.search(address).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }
}
