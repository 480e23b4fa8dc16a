// Binary wire codec for the nine SWIM message shapes.
//
// Every buffer begins with a single-byte type tag followed by type-specific
// fields. All multi-byte integers are little-endian; addresses use their
// fixed 18-byte shape (`Address::to_wire_bytes`/`from_wire_bytes`), driven
// through `bytes::{Buf, BufMut, BytesMut}` with an explicit per-variant
// byte layout.

use crate::address::{Address, ADDRESS_WIRE_LEN};
use crate::error::{Result, SwimError};
use crate::membership::MemberState;
use crate::numeric::{IncarnationNumber, SequenceNumber};
use bytes::{Buf, BufMut, BytesMut};

const TAG_DIRECT_PING: u8 = 1;
const TAG_DIRECT_ACK: u8 = 2;
const TAG_INDIRECT_PING: u8 = 3;
const TAG_INDIRECT_ACK: u8 = 4;
const TAG_SUSPECT: u8 = 5;
const TAG_ALIVE: u8 = 6;
const TAG_FAULTY: u8 = 7;
const TAG_LIST_REQUEST: u8 = 8;
const TAG_LIST_RESPONSE: u8 = 9;

/// A single membership record as carried in a `ListResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListMember {
    pub address: Address,
    pub state: MemberState,
    pub incarnation: IncarnationNumber,
}

/// The nine wire message shapes. `Suspect`, `Alive`, and `Faulty` are the
/// gossip-eligible subset that may be piggybacked on pings/acks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    DirectPing {
        source: Address,
        seq: SequenceNumber,
    },
    DirectAck {
        source: Address,
        seq: SequenceNumber,
    },
    IndirectPing {
        source: Address,
        destination: Address,
        seq: SequenceNumber,
    },
    IndirectAck {
        source: Address,
        seq: SequenceNumber,
    },
    Suspect {
        source: Address,
        destination: Address,
        incarnation: IncarnationNumber,
    },
    Alive {
        destination: Address,
        incarnation: IncarnationNumber,
    },
    Faulty {
        source: Address,
        destination: Address,
        incarnation: IncarnationNumber,
    },
    ListRequest {
        source: Address,
    },
    ListResponse {
        source: Address,
        members: Vec<ListMember>,
    },
}

impl Message {
    /// True for the subset that may be stored in the gossip queue and
    /// piggybacked on outgoing datagrams.
    pub fn is_gossip_eligible(&self) -> bool {
        matches!(self, Message::Suspect { .. } | Message::Alive { .. } | Message::Faulty { .. })
    }

    /// The address this gossip entry is keyed (deduplicated) on. Only
    /// meaningful for gossip-eligible variants.
    pub fn gossip_key(&self) -> Option<Address> {
        match self {
            Message::Suspect { destination, .. } => Some(*destination),
            Message::Alive { destination, .. } => Some(*destination),
            Message::Faulty { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    pub fn incarnation(&self) -> Option<IncarnationNumber> {
        match self {
            Message::Suspect { incarnation, .. }
            | Message::Alive { incarnation, .. }
            | Message::Faulty { incarnation, .. } => Some(*incarnation),
            _ => None,
        }
    }

    /// Append this message's wire encoding to `buf`, returning the number
    /// of bytes written.
    pub fn append_to_buffer(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        match self {
            Message::DirectPing { source, seq } => {
                buf.put_u8(TAG_DIRECT_PING);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_u16_le(seq.0);
            }
            Message::DirectAck { source, seq } => {
                buf.put_u8(TAG_DIRECT_ACK);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_u16_le(seq.0);
            }
            Message::IndirectPing { source, destination, seq } => {
                buf.put_u8(TAG_INDIRECT_PING);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_slice(&destination.to_wire_bytes());
                buf.put_u16_le(seq.0);
            }
            Message::IndirectAck { source, seq } => {
                buf.put_u8(TAG_INDIRECT_ACK);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_u16_le(seq.0);
            }
            Message::Suspect { source, destination, incarnation } => {
                buf.put_u8(TAG_SUSPECT);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_slice(&destination.to_wire_bytes());
                buf.put_u16_le(incarnation.0);
            }
            Message::Alive { destination, incarnation } => {
                buf.put_u8(TAG_ALIVE);
                buf.put_slice(&destination.to_wire_bytes());
                buf.put_u16_le(incarnation.0);
            }
            Message::Faulty { source, destination, incarnation } => {
                buf.put_u8(TAG_FAULTY);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_slice(&destination.to_wire_bytes());
                buf.put_u16_le(incarnation.0);
            }
            Message::ListRequest { source } => {
                buf.put_u8(TAG_LIST_REQUEST);
                buf.put_slice(&source.to_wire_bytes());
            }
            Message::ListResponse { source, members } => {
                buf.put_u8(TAG_LIST_RESPONSE);
                buf.put_slice(&source.to_wire_bytes());
                buf.put_u32_le(members.len() as u32);
                for m in members {
                    buf.put_slice(&m.address.to_wire_bytes());
                    buf.put_u8(m.state as u8);
                    buf.put_u16_le(m.incarnation.0);
                }
            }
        }
        buf.len() - start
    }

    /// Parse one message from the front of `buf`, advancing it past the
    /// bytes consumed. A type-tag mismatch, truncated buffer, or
    /// out-of-range count is a decode failure and leaves `buf` unchanged.
    pub fn from_buffer(buf: &mut BytesMut) -> Result<Message> {
        if buf.is_empty() {
            return Err(SwimError::BufferTooSmall("empty buffer, expected tag byte".into()));
        }
        let tag = buf[0];
        let needed = match tag {
            TAG_DIRECT_PING | TAG_DIRECT_ACK | TAG_INDIRECT_ACK => 1 + ADDRESS_WIRE_LEN + 2,
            TAG_INDIRECT_PING => 1 + ADDRESS_WIRE_LEN * 2 + 2,
            TAG_SUSPECT | TAG_FAULTY => 1 + ADDRESS_WIRE_LEN * 2 + 2,
            TAG_ALIVE => 1 + ADDRESS_WIRE_LEN + 2,
            TAG_LIST_REQUEST => 1 + ADDRESS_WIRE_LEN,
            TAG_LIST_RESPONSE => 1 + ADDRESS_WIRE_LEN + 4,
            other => return Err(SwimError::InvalidMessageType(other)),
        };
        if buf.len() < needed {
            return Err(SwimError::BufferTooSmall(format!(
                "message tag {} requires at least {} bytes, got {}",
                tag,
                needed,
                buf.len()
            )));
        }

        let mut cursor = &buf[..];
        cursor.advance(1);

        let message = match tag {
            TAG_DIRECT_PING => {
                let source = read_address(&mut cursor)?;
                let seq = SequenceNumber(cursor.get_u16_le());
                Message::DirectPing { source, seq }
            }
            TAG_DIRECT_ACK => {
                let source = read_address(&mut cursor)?;
                let seq = SequenceNumber(cursor.get_u16_le());
                Message::DirectAck { source, seq }
            }
            TAG_INDIRECT_PING => {
                let source = read_address(&mut cursor)?;
                let destination = read_address(&mut cursor)?;
                let seq = SequenceNumber(cursor.get_u16_le());
                Message::IndirectPing { source, destination, seq }
            }
            TAG_INDIRECT_ACK => {
                let source = read_address(&mut cursor)?;
                let seq = SequenceNumber(cursor.get_u16_le());
                Message::IndirectAck { source, seq }
            }
            TAG_SUSPECT => {
                let source = read_address(&mut cursor)?;
                let destination = read_address(&mut cursor)?;
                let incarnation = IncarnationNumber(cursor.get_u16_le());
                Message::Suspect { source, destination, incarnation }
            }
            TAG_ALIVE => {
                let destination = read_address(&mut cursor)?;
                let incarnation = IncarnationNumber(cursor.get_u16_le());
                Message::Alive { destination, incarnation }
            }
            TAG_FAULTY => {
                let source = read_address(&mut cursor)?;
                let destination = read_address(&mut cursor)?;
                let incarnation = IncarnationNumber(cursor.get_u16_le());
                Message::Faulty { source, destination, incarnation }
            }
            TAG_LIST_REQUEST => {
                let source = read_address(&mut cursor)?;
                Message::ListRequest { source }
            }
            TAG_LIST_RESPONSE => {
                let source = read_address(&mut cursor)?;
                let count = cursor.get_u32_le();
                let entry_len = ADDRESS_WIRE_LEN + 1 + 2;
                let remaining_needed = count as usize * entry_len;
                if cursor.remaining() < remaining_needed {
                    return Err(SwimError::CountOutOfRange(format!(
                        "list response declares {} members but only {} bytes remain",
                        count,
                        cursor.remaining()
                    )));
                }
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let address = read_address(&mut cursor)?;
                    let state = MemberState::from_wire_tag(cursor.get_u8())?;
                    let incarnation = IncarnationNumber(cursor.get_u16_le());
                    members.push(ListMember { address, state, incarnation });
                }
                Message::ListResponse { source, members }
            }
            other => return Err(SwimError::InvalidMessageType(other)),
        };

        let consumed = needed
            + match tag {
                TAG_LIST_RESPONSE => {
                    if let Message::ListResponse { ref members, .. } = message {
                        members.len() * (ADDRESS_WIRE_LEN + 1 + 2)
                    } else {
                        0
                    }
                }
                _ => 0,
            };
        buf.advance(consumed);
        Ok(message)
    }
}

fn read_address(cursor: &mut &[u8]) -> Result<Address> {
    let addr = Address::from_wire_bytes(&cursor[..ADDRESS_WIRE_LEN])?;
    cursor.advance(ADDRESS_WIRE_LEN);
    Ok(addr)
}

/// Decode every message packed back-to-back in a piggyback datagram.
/// Decoding stops at the first failure; messages already parsed from the
/// same datagram are still returned (a malformed trailing entry does not
/// invalidate the ones before it).
pub fn decode_all(mut buf: BytesMut) -> Vec<Message> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        match Message::from_buffer(&mut buf) {
            Ok(m) => out.push(m),
            Err(e) => {
                tracing::debug!(error = %e, "discarding remainder of datagram after decode failure");
                break;
            }
        }
    }
    out
}
