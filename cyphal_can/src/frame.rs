//! The 29-bit extended CAN identifier codec and the per-frame tail byte.
//!
//! Layout of the identifier, most significant bit first (bit 28) to least
//! significant (bit 0):
//!
//! ```text
//! message:  [prio:3][svc=0][anon:1][rsvd=0][11][subject:13][rsvd=0][source:7]
//! service:  [prio:3][svc=1][req/resp:1][rsvd=0][service:9][destination:7][source:7]
//! ```
//!
//! The two bits forced to `11` immediately below the message/service
//! discriminator exist to keep a Cyphal/CAN v1 message identifier from
//! colliding with identifiers used by the historical v0 framing.

use core::convert::TryFrom;
use cyphal_core::{NodeId, PortId, Priority, ServiceId, SubjectId, TransferId};

/// Only the low 29 bits of a `u32` are a valid extended CAN identifier.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

const OFFSET_PRIORITY: u32 = 26;
pub(crate) const OFFSET_SERVICE_ID: u32 = 14;
pub(crate) const OFFSET_DESTINATION: u32 = 7;
pub(crate) const OFFSET_SUBJECT_ID: u32 = 8;
const OFFSET_SOURCE: u32 = 0;

pub(crate) const FLAG_SERVICE_NOT_MESSAGE: u32 = 1 << 25;
const FLAG_ANONYMOUS_OR_REQUEST: u32 = 1 << 24;
pub(crate) const FLAG_RESERVED_23: u32 = 1 << 23;
pub(crate) const FLAG_RESERVED_07: u32 = 1 << 7;
/// The two bits forced high in every message identifier's id-field.
const MESSAGE_ID_FIELD_PREFIX: u32 = 0b11 << 21;

const MASK_PRIORITY: u32 = 0b111;
pub(crate) const MASK_SERVICE_ID: u32 = 0x1FF;
pub(crate) const MASK_SUBJECT_ID: u32 = 0x1FFF;
pub(crate) const MASK_NODE_ID: u32 = 0x7F;

/// The transfer kind and port-specific fields decoded from a CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Message { anonymous: bool, subject: SubjectId },
    Request { service: ServiceId, destination: NodeId },
    Response { service: ServiceId, destination: NodeId },
}

impl IdKind {
    pub fn port_id(&self) -> PortId {
        match *self {
            IdKind::Message { subject, .. } => PortId::Subject(subject),
            IdKind::Request { service, .. } | IdKind::Response { service, .. } => {
                PortId::Service(service)
            }
        }
    }
}

/// A fully decoded CAN identifier.
///
/// The 7-bit source field is always present and always a well-formed
/// [`NodeId`] value, anonymous or not — anonymity is signaled purely by the
/// `anonymous` flag in [`IdKind::Message`]; for an anonymous message the
/// field holds a pseudo-random discriminator rather than a real node
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanId {
    pub priority: Priority,
    pub kind: IdKind,
    pub source: Option<NodeId>,
}

impl CanId {
    /// Encodes the identifier for an outgoing message. `source` is `None`
    /// for an anonymous publication, in which case the low 7 bits are left
    /// at zero here — callers that need a real pseudo-id discriminator
    /// should call [`CanId::for_anonymous_message`] instead.
    pub fn for_message(priority: Priority, subject: SubjectId, source: Option<NodeId>) -> u32 {
        match source {
            Some(source) => {
                let mut id = (priority.to_u8() as u32) << OFFSET_PRIORITY;
                id |= MESSAGE_ID_FIELD_PREFIX;
                id |= (subject.to_u16() as u32 & MASK_SUBJECT_ID) << OFFSET_SUBJECT_ID;
                id |= source.to_u8() as u32 & MASK_NODE_ID;
                id
            }
            None => Self::for_anonymous_message(priority, subject, 0),
        }
    }

    /// Encodes the identifier for an outgoing anonymous message. `pseudo_id`
    /// is the low-7-bit discriminator (CRC-16 of the payload, masked) that
    /// stands in for a source node ID.
    pub fn for_anonymous_message(priority: Priority, subject: SubjectId, pseudo_id: u8) -> u32 {
        let mut id = (priority.to_u8() as u32) << OFFSET_PRIORITY;
        id |= MESSAGE_ID_FIELD_PREFIX;
        id |= FLAG_ANONYMOUS_OR_REQUEST;
        id |= (subject.to_u16() as u32 & MASK_SUBJECT_ID) << OFFSET_SUBJECT_ID;
        id |= pseudo_id as u32 & MASK_NODE_ID;
        id
    }

    /// Encodes the identifier for an outgoing service request.
    pub fn for_request(
        priority: Priority,
        service: ServiceId,
        destination: NodeId,
        source: NodeId,
    ) -> u32 {
        Self::for_service(priority, service, destination, source, true)
    }

    /// Encodes the identifier for an outgoing service response.
    pub fn for_response(
        priority: Priority,
        service: ServiceId,
        destination: NodeId,
        source: NodeId,
    ) -> u32 {
        Self::for_service(priority, service, destination, source, false)
    }

    fn for_service(
        priority: Priority,
        service: ServiceId,
        destination: NodeId,
        source: NodeId,
        request: bool,
    ) -> u32 {
        let mut id = (priority.to_u8() as u32) << OFFSET_PRIORITY;
        id |= FLAG_SERVICE_NOT_MESSAGE;
        if request {
            id |= FLAG_ANONYMOUS_OR_REQUEST;
        }
        id |= (service.to_u16() as u32 & MASK_SERVICE_ID) << OFFSET_SERVICE_ID;
        id |= (destination.to_u8() as u32 & MASK_NODE_ID) << OFFSET_DESTINATION;
        id |= source.to_u8() as u32 & MASK_NODE_ID;
        id
    }

    /// Parses and validates a raw extended CAN identifier per the validity
    /// rules of the transport. Returns `None` for anything malformed; a
    /// malformed identifier is never an error, only a frame to be silently
    /// discarded (see the crate's top-level error handling notes).
    pub fn parse(raw: u32) -> Option<CanId> {
        if raw & !EXTENDED_ID_MASK != 0 {
            return None;
        }
        let priority = Priority::from_u8(((raw >> OFFSET_PRIORITY) & MASK_PRIORITY) as u8)?;
        let is_service = raw & FLAG_SERVICE_NOT_MESSAGE != 0;
        let anon_or_req = raw & FLAG_ANONYMOUS_OR_REQUEST != 0;
        let reserved_23 = raw & FLAG_RESERVED_23 != 0;
        if reserved_23 {
            return None;
        }

        let source_bits = (raw & MASK_NODE_ID) as u8;
        let source = NodeId::try_from(source_bits).ok();

        if is_service {
            let reserved_07 = false; // not applicable to services; bit 7 is part of destination
            let _ = reserved_07;
            let service = ServiceId::try_from(((raw >> OFFSET_SERVICE_ID) & MASK_SERVICE_ID) as u16).ok()?;
            let destination_bits = ((raw >> OFFSET_DESTINATION) & MASK_NODE_ID) as u8;
            let destination = NodeId::try_from(destination_bits).ok()?;
            let source = source?; // services never use an anonymous source
            if source == destination {
                return None;
            }
            let kind = if anon_or_req {
                IdKind::Request { service, destination }
            } else {
                IdKind::Response { service, destination }
            };
            Some(CanId { priority, kind, source: Some(source) })
        } else {
            if raw & FLAG_RESERVED_07 != 0 {
                return None;
            }
            if raw & MESSAGE_ID_FIELD_PREFIX != MESSAGE_ID_FIELD_PREFIX {
                return None;
            }
            let subject = SubjectId::try_from(((raw >> OFFSET_SUBJECT_ID) & MASK_SUBJECT_ID) as u16).ok()?;
            let anonymous = anon_or_req;
            // The low 7 bits of an anonymous message are a pseudo-random
            // discriminator, not a node identity; `source` is `None`
            // regardless of what those bits happen to contain. For a
            // non-anonymous message the bits are always a well-formed
            // 7-bit NodeId (0..=127), so `source` is always `Some` here.
            let source = if anonymous { None } else { Some(source?) };
            Some(CanId {
                priority,
                kind: IdKind::Message { anonymous, subject },
                source,
            })
        }
    }
}

/// The initial value of the alternating toggle bit, per the first frame of
/// every transfer.
pub const INITIAL_TOGGLE: bool = true;

/// The last byte of every frame's payload: start/end-of-transfer flags, the
/// alternating toggle bit, and the transfer ID modulo 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailByte {
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    pub transfer_id: TransferId,
}

impl TailByte {
    const SOT_MASK: u8 = 0x80;
    const EOT_MASK: u8 = 0x40;
    const TOGGLE_MASK: u8 = 0x20;
    const TID_MASK: u8 = 0x1F;

    pub const fn new(
        start_of_transfer: bool,
        end_of_transfer: bool,
        toggle: bool,
        transfer_id: TransferId,
    ) -> Self {
        TailByte {
            start_of_transfer,
            end_of_transfer,
            toggle,
            transfer_id,
        }
    }

    pub const fn parse(byte: u8) -> Self {
        TailByte {
            start_of_transfer: byte & Self::SOT_MASK != 0,
            end_of_transfer: byte & Self::EOT_MASK != 0,
            toggle: byte & Self::TOGGLE_MASK != 0,
            transfer_id: TransferId::from_truncating(byte & Self::TID_MASK),
        }
    }

    pub const fn to_u8(self) -> u8 {
        let mut byte = self.transfer_id.to_u8() & Self::TID_MASK;
        if self.start_of_transfer {
            byte |= Self::SOT_MASK;
        }
        if self.end_of_transfer {
            byte |= Self::EOT_MASK;
        }
        if self.toggle {
            byte |= Self::TOGGLE_MASK;
        }
        byte
    }
}

/// A CAN frame as handed to the reception entry point: a raw extended
/// identifier and the data field, tail byte included. Driver glue is
/// responsible for producing this from whatever representation the
/// underlying CAN peripheral or socket API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub id: u32,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(id: u32, payload: &'a [u8]) -> Self {
        Frame { id, payload }
    }
}
