// The protocol engine (the "List"): drives the per-period failure-
// detection state machine and incoming-message dispatch.
//
// Single mutual-exclusion region guarding all engine state —
// `parking_lot::Mutex` rather than an async-aware lock, since every
// critical section here runs to completion without an internal await
// (network I/O happens outside the lock). One dispatch match drives all
// nine wire-message shapes against this state.

use crate::address::Address;
use crate::config::MembershipConfig;
use crate::error::{Result, SwimError};
use crate::faulty::FaultyList;
use crate::gossip::GossipQueue;
use crate::membership::{AliveTable, Member, MemberState};
use crate::numeric::{IncarnationNumber, SequenceNumber};
use crate::picker;
use crate::rtt::RoundTripTracker;
use crate::stats;
use crate::transport::{ReliableTransport, UnreliableTransport};
use crate::wire::{ListMember, Message};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Recently-sent sequence numbers we still accept an ack for. Matching is
/// by equality within this window, never monotonic comparison — the
/// sequence counter wraps at 2^16.
const SEQUENCE_RECENCY_WINDOW: usize = 64;

struct PendingDirectPing {
    address: Address,
    seq: SequenceNumber,
    sent_at: Instant,
}

struct EngineState {
    incarnation: IncarnationNumber,
    seq_counter: SequenceNumber,
    alive: AliveTable,
    faulty: FaultyList,
    gossip: GossipQueue,
    pending_indirect_ack: std::collections::HashMap<SequenceNumber, Address>,
    direct_ping_target: Option<PendingDirectPing>,
    rtt: RoundTripTracker,
    recent_outgoing_seqs: std::collections::VecDeque<SequenceNumber>,
}

impl EngineState {
    fn record_outgoing_seq(&mut self, seq: SequenceNumber) {
        if self.recent_outgoing_seqs.len() == SEQUENCE_RECENCY_WINDOW {
            self.recent_outgoing_seqs.pop_front();
        }
        self.recent_outgoing_seqs.push_back(seq);
    }
}

/// Drives the SWIM failure-detection and gossip-dissemination protocol for
/// a single local member. Owns no I/O directly — `direct_ping`,
/// `indirect_ping`, `list_request`, and `dispatch_datagram` all delegate
/// sends/receives to the injected transports.
pub struct Engine {
    self_address: Address,
    config: MembershipConfig,
    state: Mutex<EngineState>,
    unreliable: Arc<dyn UnreliableTransport>,
    reliable: Arc<dyn ReliableTransport>,
}

impl Engine {
    pub fn new(
        self_address: Address,
        config: MembershipConfig,
        unreliable: Arc<dyn UnreliableTransport>,
        reliable: Arc<dyn ReliableTransport>,
    ) -> Result<Self> {
        let mut alive = AliveTable::new();
        for addr in config.bootstrap_addresses()? {
            if addr != self_address {
                alive.insert(Member::alive(addr, IncarnationNumber::ZERO));
            }
        }
        let n = alive.len() + 1;
        let b = stats::suspicion_timeout_periods(n, config.safety_factor).max(1) as usize;
        let state = EngineState {
            incarnation: IncarnationNumber::ZERO,
            seq_counter: SequenceNumber::default(),
            alive,
            faulty: FaultyList::new(
                config.faulty_max_list_request_count,
                config.faulty_pre_allocation_count,
            ),
            gossip: GossipQueue::new(b, config.gossip_pre_allocation_count),
            pending_indirect_ack: std::collections::HashMap::new(),
            direct_ping_target: None,
            rtt: RoundTripTracker::new(
                config.direct_ping_timeout,
                config.direct_ping_timeout,
                config.direct_ping_timeout_max,
            ),
            recent_outgoing_seqs: std::collections::VecDeque::with_capacity(SEQUENCE_RECENCY_WINDOW),
        };
        Ok(Engine { self_address, config, state: Mutex::new(state), unreliable, reliable })
    }

    /// The current dynamically-adjusted direct-ping timeout.
    pub fn direct_ping_timeout(&self) -> Duration {
        self.state.lock().rtt.direct_ping_timeout()
    }

    /// Snapshot of the currently-alive members, for external consumers.
    pub fn members(&self) -> Vec<Member> {
        self.state.lock().alive.iter().copied().collect()
    }

    fn cluster_size(state: &EngineState) -> usize {
        state.alive.len() + 1
    }

    fn refresh_gossip_bucket_count(&self, state: &mut EngineState) {
        let n = Self::cluster_size(state);
        let b = stats::suspicion_timeout_periods(n, self.config.safety_factor).max(1) as usize;
        state.gossip.set_max_transmission_count(b);
    }

    /// Pack `primary` messages first, then piggyback entries from the
    /// gossip queue (in iteration order) until `cap` is reached. Returns
    /// the encoded datagram and the number of piggybacked entries, so the
    /// caller can `mark_transmitted` after releasing the lock-held borrow.
    fn build_datagram(state: &EngineState, cap: usize, primary: &[Message]) -> (BytesMut, usize) {
        let mut buf = BytesMut::new();
        for m in primary {
            m.append_to_buffer(&mut buf);
        }
        let mut piggybacked = 0;
        for entry in state.gossip.iterate() {
            let mut probe = BytesMut::new();
            entry.message.append_to_buffer(&mut probe);
            if buf.len() + probe.len() > cap {
                break;
            }
            buf.extend_from_slice(&probe);
            piggybacked += 1;
        }
        (buf, piggybacked)
    }

    /// Phase 1: if no target is pending this period, pick one alive peer
    /// at random (excluding self) and send it a `DirectPing`, piggybacking
    /// pending gossip. Suspect/Faulty gossip about the target is
    /// prioritized so it rides the very first datagram.
    pub async fn direct_ping(&self) -> Result<()> {
        let (target, datagram) = {
            let mut state = self.state.lock();
            if state.direct_ping_target.is_some() {
                return Ok(());
            }
            if state.alive.is_empty() {
                return Err(SwimError::NoTargetAvailable);
            }
            let picked = picker::pick(&mut rand::rng(), &state.alive, 1);
            let Some(target) = picked.into_iter().next() else {
                return Err(SwimError::NoTargetAvailable);
            };

            let seq = state.seq_counter.next();
            state.seq_counter = seq;
            state.record_outgoing_seq(seq);
            state.direct_ping_target = Some(PendingDirectPing { address: target, seq, sent_at: Instant::now() });

            state.gossip.prioritize(target);
            let primary = vec![Message::DirectPing { source: self.self_address, seq }];
            let (datagram, piggybacked) =
                Self::build_datagram(&state, self.config.max_datagram_length_send, &primary);
            // mark_transmitted in the same lock scope that built the
            // datagram, like indirect_ping/on_direct_ping: otherwise a
            // dispatch_datagram in between could mutate the gossip queue's
            // iteration order and mark_transmitted would advance the wrong
            // entries relative to what was actually sent.
            if piggybacked > 0 {
                state.gossip.mark_transmitted(piggybacked);
            }
            (target, datagram)
        };

        if let Err(e) = self.unreliable.send(target, &datagram).await {
            tracing::warn!(error = %e, target = %target, "direct ping send failed");
        }
        Ok(())
    }

    /// Phase 2: for a direct-ping target whose ack hasn't arrived within
    /// the dynamic timeout, enlist `IndirectPingMemberCount` relays.
    pub async fn indirect_ping(&self) -> Result<()> {
        let timeout = self.direct_ping_timeout();
        let (_target, relays, datagrams) = {
            let mut state = self.state.lock();
            let Some(pending) = &state.direct_ping_target else {
                return Ok(());
            };
            if pending.sent_at.elapsed() < timeout {
                return Ok(());
            }
            let target = pending.address;

            let relays = picker::pick_without(
                &mut rand::rng(),
                &state.alive,
                target,
                self.config.indirect_ping_member_count,
            );

            let mut datagrams = Vec::with_capacity(relays.len());
            let mut total_piggybacked = 0;
            for relay in &relays {
                let indirect_seq = state.seq_counter.next();
                state.seq_counter = indirect_seq;
                state.record_outgoing_seq(indirect_seq);
                state.pending_indirect_ack.insert(indirect_seq, target);
                let primary = vec![Message::IndirectPing { source: self.self_address, destination: target, seq: indirect_seq }];
                let (datagram, piggybacked) =
                    Self::build_datagram(&state, self.config.max_datagram_length_send, &primary);
                total_piggybacked += piggybacked;
                datagrams.push((*relay, datagram));
            }
            if total_piggybacked > 0 {
                state.gossip.mark_transmitted(total_piggybacked);
            }
            (target, relays, datagrams)
        };

        if relays.is_empty() {
            return Ok(());
        }
        for (relay, datagram) in datagrams {
            if let Err(e) = self.unreliable.send(relay, &datagram).await {
                tracing::warn!(error = %e, relay = %relay, "indirect ping send failed");
            }
        }
        Ok(())
    }

    /// Phase 3: targets still unacked become Suspect; existing Suspects
    /// advance their period counter and promote to Faulty once the
    /// SafetyFactor-scaled threshold is reached. Recomputes the gossip
    /// queue's bucket count from the (possibly changed) cluster size.
    pub async fn end_of_protocol_period(&self) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(pending) = state.direct_ping_target.take() {
            if let Some(member) = state.alive.get(pending.address).copied() {
                let incarnation = member.incarnation;
                state.gossip.add(Message::Suspect {
                    source: self.self_address,
                    destination: pending.address,
                    incarnation,
                });
                if let Some(m) = state.alive.get_mut(pending.address) {
                    m.state = MemberState::Suspect;
                    m.suspicion_period_counter = 0;
                }
            }
        }

        let n = Self::cluster_size(&state);
        let threshold = stats::suspicion_timeout_periods(n, self.config.safety_factor);

        let suspects: Vec<Address> = state
            .alive
            .iter()
            .filter(|m| m.state == MemberState::Suspect)
            .map(|m| m.address)
            .collect();

        for addr in suspects {
            let member = *state.alive.get(addr).unwrap();
            let next_counter = member.suspicion_period_counter + 1;
            if next_counter >= threshold {
                state.gossip.add(Message::Faulty {
                    source: self.self_address,
                    destination: addr,
                    incarnation: member.incarnation,
                });
                state.alive.remove(addr);
                state.faulty.insert(Member {
                    address: addr,
                    state: MemberState::Faulty,
                    incarnation: member.incarnation,
                    suspicion_period_counter: 0,
                });
            } else if let Some(m) = state.alive.get_mut(addr) {
                m.suspicion_period_counter = next_counter;
            }
        }

        self.refresh_gossip_bucket_count(&mut state);
        Ok(())
    }

    /// Full-list sync: ask every alive peer for their view over the
    /// reliable transport. `list_request_observed` is only recorded on the
    /// receiving end (`on_list_request`, `on_list_response`) per the
    /// dispatch table — initiating a round does not itself observe one.
    pub async fn list_request(&self) -> Result<()> {
        let targets: Vec<Address> = {
            let state = self.state.lock();
            state.alive.iter().map(|m| m.address).collect()
        };

        for target in targets {
            let request = Message::ListRequest { source: self.self_address };
            let mut req_buf = BytesMut::new();
            request.append_to_buffer(&mut req_buf);
            if let Err(e) = self.reliable.send(target, &req_buf).await {
                tracing::warn!(error = %e, target = %target, "list request send failed");
            }
        }
        Ok(())
    }

    fn full_member_snapshot(state: &EngineState) -> Vec<ListMember> {
        let mut members: Vec<ListMember> = state
            .alive
            .iter()
            .map(|m| ListMember { address: m.address, state: m.state, incarnation: m.incarnation })
            .collect();
        members.extend(state.faulty.for_each().map(|m| ListMember {
            address: m.address,
            state: MemberState::Faulty,
            incarnation: m.incarnation,
        }));
        members
    }

    /// Decode and dispatch every message in an inbound datagram. A decode
    /// failure discards only that message; prior messages from the same
    /// datagram have already been applied.
    pub async fn dispatch_datagram(&self, buf: BytesMut) -> Result<()> {
        for message in crate::wire::decode_all(buf) {
            self.dispatch_message(message).await?;
        }
        Ok(())
    }

    async fn dispatch_message(&self, message: Message) -> Result<()> {
        match message {
            Message::DirectPing { source, seq } => self.on_direct_ping(source, seq).await,
            Message::DirectAck { source, seq } => self.on_direct_ack(source, seq).await,
            Message::IndirectPing { source, destination, seq } => {
                self.on_indirect_ping(source, destination, seq).await
            }
            Message::IndirectAck { seq, .. } => {
                self.on_indirect_ack(seq);
                Ok(())
            }
            Message::Suspect { source, destination, incarnation } => {
                self.on_suspect(source, destination, incarnation);
                Ok(())
            }
            Message::Alive { destination, incarnation } => {
                self.on_alive(destination, incarnation);
                Ok(())
            }
            Message::Faulty { source, destination, incarnation } => {
                self.on_faulty(source, destination, incarnation);
                Ok(())
            }
            Message::ListRequest { source } => self.on_list_request(source).await,
            Message::ListResponse { members, .. } => {
                self.on_list_response(members);
                Ok(())
            }
        }
    }

    /// Learn of a previously-unknown peer that contacted us directly. No
    /// explicit join message exists among the nine wire shapes, so
    /// admitting the pinger opportunistically, the way a fresh bootstrap
    /// peer would be admitted, is what makes join propagation converge at
    /// all.
    fn learn_peer_if_unknown(state: &mut EngineState, self_address: Address, peer: Address) {
        if peer == self_address {
            return;
        }
        if state.alive.get(peer).is_none() && state.faulty.get(peer).is_none() {
            let member = Member::alive(peer, IncarnationNumber::ZERO);
            state.alive.insert(member);
            state.gossip.add(Message::Alive { destination: peer, incarnation: IncarnationNumber::ZERO });
        }
    }

    async fn on_direct_ping(&self, source: Address, seq: SequenceNumber) -> Result<()> {
        let datagram = {
            let mut state = self.state.lock();
            Self::learn_peer_if_unknown(&mut state, self.self_address, source);
            state.gossip.prioritize(source);
            let primary = vec![Message::DirectAck { source: self.self_address, seq }];
            let (datagram, piggybacked) =
                Self::build_datagram(&state, self.config.max_datagram_length_send, &primary);
            if piggybacked > 0 {
                state.gossip.mark_transmitted(piggybacked);
            }
            datagram
        };
        if let Err(e) = self.unreliable.send(source, &datagram).await {
            tracing::warn!(error = %e, source = %source, "direct ack send failed");
        }
        Ok(())
    }

    /// A `DirectAck` either resolves our own pending direct ping, or — if
    /// we are acting as a relay for someone else's `IndirectPing` — is the
    /// probed target's response to our relayed `DirectPing`, which we must
    /// turn into an `IndirectAck` back to the original requester.
    async fn on_direct_ack(&self, source: Address, seq: SequenceNumber) -> Result<()> {
        let mut alive_refutation = None;
        let mut relay_forward = None;
        {
            let mut state = self.state.lock();

            if let Some(requester) = state.pending_indirect_ack.remove(&seq) {
                relay_forward = Some(requester);
            }

            let matched = state
                .direct_ping_target
                .as_ref()
                .map(|p| p.address == source && p.seq == seq)
                .unwrap_or(false);
            if matched {
                let pending = state.direct_ping_target.take().unwrap();
                state.rtt.observe_direct(pending.sent_at.elapsed());

                if let Some(member) = state.alive.get_mut(source) {
                    if member.state == MemberState::Suspect {
                        member.state = MemberState::Alive;
                        member.suspicion_period_counter = 0;
                        alive_refutation = Some((source, member.incarnation));
                    }
                }
            }
        }
        if let Some((addr, incarnation)) = alive_refutation {
            self.state.lock().gossip.add(Message::Alive { destination: addr, incarnation });
        }
        if let Some(requester) = relay_forward {
            let mut buf = BytesMut::new();
            Message::IndirectAck { source: self.self_address, seq }.append_to_buffer(&mut buf);
            if let Err(e) = self.unreliable.send(requester, &buf).await {
                tracing::warn!(error = %e, requester = %requester, "forwarded indirect ack send failed");
            }
        }
        Ok(())
    }

    async fn on_indirect_ping(&self, source: Address, destination: Address, seq: SequenceNumber) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.pending_indirect_ack.insert(seq, source);
        }
        let mut buf = BytesMut::new();
        Message::DirectPing { source: self.self_address, seq }.append_to_buffer(&mut buf);
        if let Err(e) = self.unreliable.send(destination, &buf).await {
            tracing::warn!(error = %e, destination = %destination, "relayed direct ping send failed");
        }
        Ok(())
    }

    /// The relay's forwarded confirmation that our direct-ping target is
    /// alive after all; clears the pending target so `end_of_protocol_period`
    /// doesn't suspect it, and refutes suspicion if it was already raised.
    fn on_indirect_ack(&self, seq: SequenceNumber) {
        let mut alive_refutation = None;
        {
            let mut state = self.state.lock();
            let Some(target) = state.pending_indirect_ack.remove(&seq) else {
                return;
            };

            if state.direct_ping_target.as_ref().map(|p| p.address == target).unwrap_or(false) {
                if let Some(pending) = state.direct_ping_target.take() {
                    state.rtt.observe_indirect(pending.sent_at.elapsed());
                }
            }

            if let Some(member) = state.alive.get_mut(target) {
                if member.state == MemberState::Suspect {
                    member.state = MemberState::Alive;
                    member.suspicion_period_counter = 0;
                    alive_refutation = Some((target, member.incarnation));
                }
            }
        }
        if let Some((addr, incarnation)) = alive_refutation {
            self.state.lock().gossip.add(Message::Alive { destination: addr, incarnation });
        }
    }

    fn on_suspect(&self, source: Address, destination: Address, incarnation: IncarnationNumber) {
        let mut state = self.state.lock();
        if destination == self.self_address {
            if incarnation.circular_ge(state.incarnation) {
                state.incarnation = incarnation.next();
                let new_incarnation = state.incarnation;
                state.gossip.add(Message::Alive { destination: self.self_address, incarnation: new_incarnation });
            }
            return;
        }

        let Some(member) = state.alive.get(destination).copied() else {
            return;
        };
        if !admits_update(member.incarnation, incarnation, MemberState::Suspect, member.state) {
            return;
        }
        if let Some(m) = state.alive.get_mut(destination) {
            m.state = MemberState::Suspect;
            m.incarnation = incarnation;
            m.suspicion_period_counter = 0;
        }
        state.gossip.add(Message::Suspect { source, destination, incarnation });
    }

    fn on_alive(&self, destination: Address, incarnation: IncarnationNumber) {
        let mut state = self.state.lock();

        if let Some(tombstone) = state.faulty.get(destination).copied() {
            if incarnation.circular_gt(tombstone.incarnation) {
                state.faulty.remove(destination);
                state.alive.insert(Member::alive(destination, incarnation));
                state.gossip.add(Message::Alive { destination, incarnation });
            }
            return;
        }

        let Some(member) = state.alive.get(destination).copied() else {
            if destination != self.self_address {
                state.alive.insert(Member::alive(destination, incarnation));
                state.gossip.add(Message::Alive { destination, incarnation });
            }
            return;
        };
        if incarnation.circular_gt(member.incarnation) {
            if let Some(m) = state.alive.get_mut(destination) {
                m.state = MemberState::Alive;
                m.incarnation = incarnation;
                m.suspicion_period_counter = 0;
            }
            state.gossip.add(Message::Alive { destination, incarnation });
        }
    }

    fn on_faulty(&self, source: Address, destination: Address, incarnation: IncarnationNumber) {
        let mut state = self.state.lock();
        if destination == self.self_address {
            if incarnation.circular_ge(state.incarnation) {
                state.incarnation = incarnation.next();
                let new_incarnation = state.incarnation;
                state.gossip.add(Message::Alive { destination: self.self_address, incarnation: new_incarnation });
            }
            return;
        }

        let Some(member) = state.alive.get(destination).copied() else {
            return;
        };
        if incarnation.circular_ge(member.incarnation) {
            state.alive.remove(destination);
            state.faulty.insert(Member {
                address: destination,
                state: MemberState::Faulty,
                incarnation,
                suspicion_period_counter: 0,
            });
            state.gossip.add(Message::Faulty { source, destination, incarnation });
        }
    }

    async fn on_list_request(&self, source: Address) -> Result<()> {
        let (response, _) = {
            let mut state = self.state.lock();
            let members = Self::full_member_snapshot(&state);
            state.faulty.list_request_observed();
            (Message::ListResponse { source: self.self_address, members }, ())
        };
        let mut buf = BytesMut::new();
        response.append_to_buffer(&mut buf);
        if let Err(e) = self.reliable.send(source, &buf).await {
            tracing::warn!(error = %e, source = %source, "list response send failed");
        }
        Ok(())
    }

    fn on_list_response(&self, members: Vec<ListMember>) {
        let mut state = self.state.lock();
        for entry in members {
            if entry.address == self.self_address {
                continue;
            }
            match entry.state {
                MemberState::Faulty => {
                    let already_tombstoned = state.faulty.get(entry.address).is_some();
                    if !already_tombstoned {
                        let current = state.alive.get(entry.address).map(|m| m.incarnation);
                        let admits = current
                            .map(|inc| entry.incarnation.circular_ge(inc))
                            .unwrap_or(true);
                        if admits {
                            state.alive.remove(entry.address);
                            state.faulty.insert(Member {
                                address: entry.address,
                                state: MemberState::Faulty,
                                incarnation: entry.incarnation,
                                suspicion_period_counter: 0,
                            });
                        }
                    }
                }
                MemberState::Suspect => {
                    let current = state.alive.get(entry.address).copied();
                    let admits = current
                        .map(|m| admits_update(m.incarnation, entry.incarnation, MemberState::Suspect, m.state))
                        .unwrap_or(true);
                    if admits {
                        if let Some(m) = state.alive.get_mut(entry.address) {
                            m.state = MemberState::Suspect;
                            m.incarnation = entry.incarnation;
                            m.suspicion_period_counter = 0;
                        } else {
                            let mut member = Member::alive(entry.address, entry.incarnation);
                            member.state = MemberState::Suspect;
                            state.alive.insert(member);
                        }
                    }
                }
                MemberState::Alive => {
                    if let Some(tombstone) = state.faulty.get(entry.address).copied() {
                        if entry.incarnation.circular_gt(tombstone.incarnation) {
                            state.faulty.remove(entry.address);
                            state.alive.insert(Member::alive(entry.address, entry.incarnation));
                        }
                        continue;
                    }
                    match state.alive.get(entry.address).copied() {
                        Some(m) if entry.incarnation.circular_gt(m.incarnation) => {
                            if let Some(m) = state.alive.get_mut(entry.address) {
                                m.state = MemberState::Alive;
                                m.incarnation = entry.incarnation;
                                m.suspicion_period_counter = 0;
                            }
                        }
                        None => state.alive.insert(Member::alive(entry.address, entry.incarnation)),
                        _ => {}
                    }
                }
                MemberState::None => {}
            }
        }
        state.faulty.list_request_observed();
    }

    /// Graceful departure: emit a final `Faulty{self,self,incarnation}` so
    /// peers stop waiting on us, rather than having to time us out.
    pub async fn shutdown(&self) -> Result<()> {
        let (datagram, targets) = {
            let state = self.state.lock();
            let message = Message::Faulty {
                source: self.self_address,
                destination: self.self_address,
                incarnation: state.incarnation,
            };
            let mut buf = BytesMut::new();
            message.append_to_buffer(&mut buf);
            let targets: Vec<Address> = state.alive.iter().map(|m| m.address).collect();
            (buf, targets)
        };
        for target in targets {
            if let Err(e) = self.unreliable.send(target, &datagram).await {
                tracing::debug!(error = %e, target = %target, "shutdown notification send failed");
            }
        }
        Ok(())
    }
}

/// Shared precedence rule: admit an incoming `(incarnation, state)` pair
/// against the existing member's `(incarnation, state)`, mirroring the
/// gossip queue's own replacement rule.
fn admits_update(
    existing_incarnation: IncarnationNumber,
    new_incarnation: IncarnationNumber,
    new_state: MemberState,
    existing_state: MemberState,
) -> bool {
    if new_incarnation.circular_lt(existing_incarnation) {
        false
    } else if new_incarnation == existing_incarnation {
        state_rank(new_state) > state_rank(existing_state)
    } else {
        true
    }
}

fn state_rank(state: MemberState) -> u8 {
    match state {
        MemberState::Alive => 0,
        MemberState::Suspect => 1,
        MemberState::Faulty => 2,
        MemberState::None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct InMemoryTransport {
        sent: StdMutex<Vec<(Address, Vec<u8>)>>,
    }

    impl InMemoryTransport {
        fn new() -> Self {
            InMemoryTransport { sent: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl UnreliableTransport for InMemoryTransport {
        async fn send(&self, address: Address, buffer: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push((address, buffer.to_vec()));
            Ok(())
        }

        async fn recv(&self, _buf: &mut [u8]) -> Result<(usize, Address)> {
            Err(SwimError::NoTargetAvailable)
        }

        fn local_addr(&self) -> Result<Address> {
            Address::new("127.0.0.1:9".parse().unwrap())
        }
    }

    #[async_trait]
    impl ReliableTransport for InMemoryTransport {
        async fn send(&self, address: Address, buffer: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push((address, buffer.to_vec()));
            Ok(())
        }
    }

    fn addr(s: &str) -> Address {
        Address::new(s.parse().unwrap()).unwrap()
    }

    fn test_engine(bootstrap: Vec<&str>) -> Engine {
        let mut config = MembershipConfig::default();
        config.advertised_address = "10.0.0.1:7946".parse().unwrap();
        config.bootstrap_members = bootstrap.iter().map(|s| s.parse().unwrap()).collect();
        let unreliable: Arc<dyn UnreliableTransport> = Arc::new(InMemoryTransport::new());
        let reliable: Arc<dyn ReliableTransport> = Arc::new(InMemoryTransport::new());
        Engine::new(addr("10.0.0.1:7946"), config, unreliable, reliable).unwrap()
    }

    fn test_engine_with_unreliable(bootstrap: Vec<&str>) -> (Engine, Arc<InMemoryTransport>) {
        let mut config = MembershipConfig::default();
        config.advertised_address = "10.0.0.1:7946".parse().unwrap();
        config.bootstrap_members = bootstrap.iter().map(|s| s.parse().unwrap()).collect();
        let unreliable = Arc::new(InMemoryTransport::new());
        let reliable: Arc<dyn ReliableTransport> = Arc::new(InMemoryTransport::new());
        let engine = Engine::new(addr("10.0.0.1:7946"), config, unreliable.clone(), reliable).unwrap();
        (engine, unreliable)
    }

    #[tokio::test]
    async fn direct_ping_picks_a_bootstrap_target() {
        let engine = test_engine(vec!["10.0.0.2:7946"]);
        engine.direct_ping().await.unwrap();
        assert_eq!(engine.members().len(), 1);
    }

    #[tokio::test]
    async fn direct_ping_with_no_peers_fails_with_no_target_available() {
        let engine = test_engine(vec![]);
        let err = engine.direct_ping().await.unwrap_err();
        assert!(matches!(err, SwimError::NoTargetAvailable));
    }

    #[tokio::test]
    async fn suspect_about_self_bumps_incarnation_and_queues_alive() {
        let engine = test_engine(vec!["10.0.0.2:7946"]);
        engine.on_suspect(addr("10.0.0.2:7946"), addr("10.0.0.1:7946"), IncarnationNumber::ZERO);
        assert_eq!(engine.state.lock().incarnation, IncarnationNumber(1));
    }

    #[tokio::test]
    async fn faulty_about_member_removes_from_alive_and_tombstones() {
        let engine = test_engine(vec!["10.0.0.2:7946"]);
        engine.on_faulty(addr("10.0.0.3:7946"), addr("10.0.0.2:7946"), IncarnationNumber::ZERO);
        assert!(engine.members().is_empty());
        assert!(engine.state.lock().faulty.contains(addr("10.0.0.2:7946")));
    }

    #[tokio::test]
    async fn alive_with_higher_incarnation_resurrects_faulty_member() {
        let engine = test_engine(vec![]);
        engine.on_faulty(addr("10.0.0.9:1"), addr("10.0.0.2:7946"), IncarnationNumber(1));
        engine.on_alive(addr("10.0.0.2:7946"), IncarnationNumber(2));
        assert!(!engine.state.lock().faulty.contains(addr("10.0.0.2:7946")));
        assert_eq!(engine.members().len(), 1);
    }

    #[tokio::test]
    async fn end_of_period_suspects_unacked_target_then_promotes_after_threshold() {
        let engine = test_engine(vec!["10.0.0.2:7946"]);
        engine.direct_ping().await.unwrap();
        engine.end_of_protocol_period().await.unwrap();
        {
            let state = engine.state.lock();
            let member = state.alive.get(addr("10.0.0.2:7946")).unwrap();
            assert_eq!(member.state, MemberState::Suspect);
        }
        // Drive enough periods to cross the SafetyFactor * ceil(log2(N))
        // threshold for a 2-member cluster (ceil(log2(2)) = 1, default
        // SafetyFactor = 3).
        for _ in 0..5 {
            engine.end_of_protocol_period().await.unwrap();
        }
        assert!(engine.members().is_empty());
        assert!(engine.state.lock().faulty.contains(addr("10.0.0.2:7946")));
    }

    #[tokio::test]
    async fn relay_forwards_target_ack_as_indirect_ack_to_requester() {
        let (engine, unreliable) = test_engine_with_unreliable(vec![]);
        let requester = addr("10.0.0.5:7946");
        let target = addr("10.0.0.6:7946");
        let seq = SequenceNumber(42);

        engine.on_indirect_ping(requester, target, seq).await.unwrap();
        unreliable.sent.lock().unwrap().clear();

        engine.on_direct_ack(target, seq).await.unwrap();

        let sent = unreliable.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, requester);
        let mut buf = bytes::BytesMut::from(&sent[0].1[..]);
        let decoded = Message::from_buffer(&mut buf).unwrap();
        assert_eq!(decoded, Message::IndirectAck { source: addr("10.0.0.1:7946"), seq });
    }

    #[tokio::test]
    async fn indirect_ack_resolves_pending_direct_ping_and_refutes_suspicion() {
        let engine = test_engine(vec!["10.0.0.2:7946"]);
        engine.direct_ping().await.unwrap();

        let target = addr("10.0.0.2:7946");
        let seq = { engine.state.lock().direct_ping_target.as_ref().unwrap().seq };
        {
            let mut state = engine.state.lock();
            if let Some(m) = state.alive.get_mut(target) {
                m.state = MemberState::Suspect;
            }
            state.pending_indirect_ack.insert(seq, target);
        }

        engine.on_indirect_ack(seq);

        let state = engine.state.lock();
        assert!(state.direct_ping_target.is_none());
        assert_eq!(state.alive.get(target).unwrap().state, MemberState::Alive);
    }

    #[test]
    fn admits_update_follows_precedence_rule() {
        assert!(!admits_update(
            IncarnationNumber(5),
            IncarnationNumber(4),
            MemberState::Suspect,
            MemberState::Alive
        ));
        assert!(admits_update(
            IncarnationNumber(4),
            IncarnationNumber(4),
            MemberState::Suspect,
            MemberState::Alive
        ));
        assert!(!admits_update(
            IncarnationNumber(4),
            IncarnationNumber(4),
            MemberState::Alive,
            MemberState::Suspect
        ));
        assert!(admits_update(
            IncarnationNumber(4),
            IncarnationNumber(6),
            MemberState::Alive,
            MemberState::Faulty
        ));
    }

}
