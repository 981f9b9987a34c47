//! Per-(subscription, source node) reassembly state.
//!
//! A session exists only for a non-anonymous remote node that has sent at
//! least one start-of-transfer frame matching a live subscription; it is
//! created lazily on that first frame and lives until the subscription
//! itself is torn down. Anonymous messages never reach this state machine —
//! they are stateless and handled directly by the accept path.

use alloc::vec::Vec;
use cyphal_core::time::Instant;
use cyphal_core::transfer::TransferMetadata;
use cyphal_core::{NodeId, OutOfMemoryError, Priority, TransferId};
use defmt_or_log::{debug, trace};

use crate::crc::TransferCrc;
use crate::frame::INITIAL_TOGGLE;
use crate::memory::MemoryResource;
use crate::rx::RxFrameModel;

/// The two trailing bytes of a multi-frame transfer's payload are a CRC,
/// never exposed to the application.
const CRC_SIZE_BYTES: usize = 2;

/// A transfer delivered to the application: metadata plus the reassembled
/// payload with the trailing CRC (if any) already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxTransfer<I> {
    pub timestamp: I,
    pub metadata: TransferMetadata,
    pub payload: Vec<u8>,
}

/// Per-source reassembly state for one subscription.
pub(crate) struct Session<I> {
    transfer_timestamp: I,
    /// The payload size observed so far, before the implicit extent
    /// truncation, CRC included. Zero means no reassembly in progress.
    total_payload_size: usize,
    /// Lazily allocated on the first byte actually written; sized to the
    /// subscription's extent and never reallocated for the life of the
    /// session.
    payload: Option<Vec<u8>>,
    /// Bytes written into `payload` so far (i.e. after truncation to extent).
    payload_size: usize,
    crc: TransferCrc,
    transfer_id: TransferId,
    redundant_iface_index: u8,
    toggle: bool,
}

impl<I: Instant> Session<I> {
    /// Creates a session directly from the frame that is starting it. The
    /// caller has already established that this frame is a start-of-transfer
    /// with no existing session for its source.
    pub fn new(frame: &RxFrameModel<'_, I>, redundant_iface_index: u8) -> Self {
        Session {
            transfer_timestamp: frame.timestamp,
            total_payload_size: 0,
            payload: None,
            payload_size: 0,
            crc: TransferCrc::new(),
            transfer_id: frame.transfer_id(),
            redundant_iface_index,
            toggle: INITIAL_TOGGLE,
        }
    }

    /// Resynchronizes the session against a new frame before the usual
    /// accept/reject check, restarting the reassembly in place when the
    /// frame's circumstances (new transfer ID, interface takeover, TID
    /// timeout) call for it. Does not touch the payload buffer itself —
    /// only a true restart (see [`Self::restart`]) releases it.
    fn synchronize(&mut self, frame: &RxFrameModel<'_, I>, redundant_iface_index: u8, timeout: I::Duration) {
        let same_transport = self.redundant_iface_index == redundant_iface_index;
        let tid_match = self.transfer_id == frame.transfer_id();
        let tid_new = self.transfer_id.forward_distance(frame.transfer_id()) > 1;
        let tid_timeout = frame
            .timestamp
            .duration_since(self.transfer_timestamp)
            .map_or(false, |elapsed| elapsed > timeout);
        let idle = self.total_payload_size == 0;

        let restartable = (same_transport && tid_new)
            || (same_transport && tid_timeout)
            || (tid_timeout && tid_new)
            || (tid_timeout && tid_match && idle);

        if frame.tail.start_of_transfer && restartable {
            if tid_timeout {
                debug!("restarting reassembly session: transfer-ID timeout elapsed");
            } else if !same_transport {
                debug!("restarting reassembly session: redundant interface takeover");
            } else {
                debug!("restarting reassembly session: new transfer ID observed");
            }
            self.total_payload_size = 0;
            self.payload_size = 0; // the buffer, if any, is kept for reuse
            self.crc = TransferCrc::new();
            self.transfer_id = frame.transfer_id();
            self.toggle = INITIAL_TOGGLE;
            self.redundant_iface_index = redundant_iface_index;
        }
    }

    /// Drops the reassembly buffer and advances past the current transfer
    /// ID, ready for the next transfer. Called after every successful
    /// delivery, every CRC failure at end-of-transfer, and every OOM.
    fn restart(&mut self) {
        self.payload = None;
        self.total_payload_size = 0;
        self.payload_size = 0;
        self.crc = TransferCrc::new();
        self.transfer_id = self.transfer_id.increment();
        self.toggle = INITIAL_TOGGLE;
    }

    fn write_payload(
        &mut self,
        extent: usize,
        payload: &[u8],
        memory: &mut impl MemoryResource,
    ) -> Result<(), OutOfMemoryError> {
        self.total_payload_size += payload.len();
        if self.payload.is_none() && extent > 0 {
            self.payload = Some(memory.alloc_bytes(extent)?);
        }
        if let Some(buffer) = self.payload.as_mut() {
            let mut bytes_to_copy = payload.len();
            if self.payload_size + bytes_to_copy > extent {
                bytes_to_copy = extent - self.payload_size;
            }
            let start = self.payload_size;
            buffer[start..start + bytes_to_copy].copy_from_slice(&payload[..bytes_to_copy]);
            self.payload_size += bytes_to_copy;
        }
        Ok(())
    }

    fn accept_frame(
        &mut self,
        frame: &RxFrameModel<'_, I>,
        extent: usize,
        memory: &mut impl MemoryResource,
    ) -> Result<Option<RxTransfer<I>>, OutOfMemoryError> {
        if frame.tail.start_of_transfer {
            self.transfer_timestamp = frame.timestamp;
        }
        let single_frame = frame.tail.start_of_transfer && frame.tail.end_of_transfer;
        if !single_frame {
            self.crc.digest(frame.payload);
        }

        if let Err(err) = self.write_payload(extent, frame.payload, memory) {
            self.restart();
            return Err(err);
        }

        let mut delivered = None;
        if frame.tail.end_of_transfer {
            if single_frame || self.crc.is_residue_ok() {
                let truncated_amount = self.total_payload_size - self.payload_size;
                let mut payload = self.payload.take().unwrap_or_default();
                payload.truncate(self.payload_size);
                if !single_frame && CRC_SIZE_BYTES > truncated_amount {
                    let trim = CRC_SIZE_BYTES - truncated_amount;
                    let new_len = payload.len() - trim;
                    payload.truncate(new_len);
                }
                delivered = Some(RxTransfer {
                    timestamp: self.transfer_timestamp,
                    metadata: frame.metadata(),
                    payload,
                });
            } else {
                debug!("discarding transfer: CRC residue check failed");
            }
            self.restart();
        } else {
            self.toggle = !self.toggle;
        }
        Ok(delivered)
    }

    /// Runs one incoming frame through the full session state machine:
    /// resynchronize, then accept or silently reject, then (on
    /// end-of-transfer) deliver or discard.
    pub fn update(
        &mut self,
        frame: &RxFrameModel<'_, I>,
        redundant_iface_index: u8,
        transfer_id_timeout: I::Duration,
        extent: usize,
        memory: &mut impl MemoryResource,
    ) -> Result<Option<RxTransfer<I>>, OutOfMemoryError> {
        self.synchronize(frame, redundant_iface_index, transfer_id_timeout);

        let correct_iface = self.redundant_iface_index == redundant_iface_index;
        let correct_toggle = frame.tail.toggle == self.toggle;
        let correct_tid = frame.transfer_id() == self.transfer_id;
        let correct_start = if frame.tail.start_of_transfer {
            self.total_payload_size == 0
        } else {
            self.total_payload_size > 0
        };

        if correct_iface && correct_toggle && correct_tid && correct_start {
            self.accept_frame(frame, extent, memory)
        } else {
            trace!("discarding frame: session resynchronization check failed");
            Ok(None)
        }
    }
}
