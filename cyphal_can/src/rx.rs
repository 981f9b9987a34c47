//! Parsing and validating a raw CAN frame into the model the reassembly
//! state machine consumes.
//!
//! [`frame::CanId`] and [`frame::TailByte`] decode the two halves of a wire
//! frame independently; this module adds the cross-field validity rules that
//! only make sense once both halves and the payload length are known
//! together (full-utilization of non-last frames, the toggle's initial
//! value, anonymous transfers being single-frame only).

use cyphal_core::time::Instant;
use cyphal_core::transfer::TransferMetadata;
use cyphal_core::{NodeId, PortId, Priority, TransferId, TransferKind};
use defmt_or_log::trace;

use crate::frame::{CanId, IdKind, TailByte, INITIAL_TOGGLE};

/// The minimum payload a non-last frame of a multi-frame transfer must
/// carry, regardless of the configured MTU: a non-last frame always uses
/// its presentation-layer MTU fully, and the smallest MTU is classic CAN's
/// 8 bytes minus one tail byte.
const NON_LAST_FRAME_PAYLOAD_MIN: usize = 7;

/// A fully decoded and validated incoming frame: the CAN-ID fields, the tail
/// byte, and the payload with its tail byte already stripped.
pub(crate) struct RxFrameModel<'a, I> {
    pub timestamp: I,
    pub priority: Priority,
    pub kind: TransferKind,
    pub port_id: PortId,
    pub source: Option<NodeId>,
    pub destination: Option<NodeId>,
    pub tail: TailByte,
    pub payload: &'a [u8],
}

impl<'a, I: Instant> RxFrameModel<'a, I> {
    /// Parses and validates `raw_id`/`data` per §4.4's reception rules.
    /// Returns `None` for anything malformed — a malformed frame is always
    /// silently discarded, never an error.
    pub fn parse(timestamp: I, raw_id: u32, data: &'a [u8]) -> Option<Self> {
        if data.is_empty() {
            trace!("discarding frame with empty data field");
            return None;
        }
        let can_id = match CanId::parse(raw_id) {
            Some(can_id) => can_id,
            None => {
                trace!("discarding frame with malformed identifier {}", raw_id);
                return None;
            }
        };
        let (payload, tail_byte) = data.split_at(data.len() - 1);
        let tail = TailByte::parse(tail_byte[0]);

        if tail.start_of_transfer && tail.toggle != INITIAL_TOGGLE {
            trace!("discarding frame: start-of-transfer with non-initial toggle");
            return None;
        }
        let single_frame = tail.start_of_transfer && tail.end_of_transfer;
        let anonymous = matches!(can_id.kind, IdKind::Message { anonymous: true, .. });
        if anonymous && !single_frame {
            trace!("discarding frame: anonymous message spans more than one frame");
            return None;
        }
        if !tail.end_of_transfer && payload.len() < NON_LAST_FRAME_PAYLOAD_MIN {
            trace!("discarding frame: non-last frame underfills its MTU");
            return None;
        }
        if payload.is_empty() && !single_frame {
            trace!("discarding frame: empty payload on a non-single frame");
            return None;
        }

        let (kind, destination) = match can_id.kind {
            IdKind::Message { .. } => (TransferKind::Message, None),
            IdKind::Request { destination, .. } => (TransferKind::Request, Some(destination)),
            IdKind::Response { destination, .. } => (TransferKind::Response, Some(destination)),
        };

        Some(RxFrameModel {
            timestamp,
            priority: can_id.priority,
            kind,
            port_id: can_id.kind.port_id(),
            source: can_id.source,
            destination,
            tail,
            payload,
        })
    }

    pub fn transfer_id(&self) -> TransferId {
        self.tail.transfer_id
    }

    pub fn metadata(&self) -> TransferMetadata {
        TransferMetadata {
            priority: self.priority,
            kind: self.kind,
            port_id: self.port_id,
            remote_node_id: self.source,
            transfer_id: self.tail.transfer_id,
        }
    }
}
