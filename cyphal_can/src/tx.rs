//! The transmit queue: a priority- and deadline-indexed holding area for
//! outgoing frames, with deterministic ordering and bounded capacity.
//!
//! Two views over the same set of pending frames are kept live at once — one
//! ordered by CAN-ID (so the next frame to place on the bus is always the
//! tree minimum) and one ordered by deadline (so expired transfers can be
//! found and dropped without scanning the whole queue). Both are realized as
//! [`crate::tree::Tree`] instances keyed on `(primary key, sequence number)`
//! tuples: the sequence number is a per-queue counter that only ever
//! increases, so two frames that tie on CAN-ID or on deadline still compare
//! distinctly, with the later-enqueued one always sorting after the earlier
//! one (first-in, first-out among ties). This reuses the generic tree
//! unmodified — its `find_or_insert_with` only treats an exact key match as
//! "already present", and composite keys built this way are never equal.
//!
//! Frame payload buffers and the small per-item bookkeeping (which transfer
//! a frame belongs to, and its position in both trees) live in a private
//! slab with stable handles, separate from the trees' own internal arena.
//! This matters because [`crate::tree::Tree::remove`] swaps key/value
//! *content* between two of its own slots when splicing out a node with two
//! children — perfectly fine for values that are meaningless outside the
//! tree, but fatal for a handle another data structure has cached and
//! expects to keep denoting the same logical item.

use alloc::vec::Vec;
use cyphal_core::time::Instant;
use cyphal_core::transfer::TransferMetadata;
use cyphal_core::{NodeId, OutOfMemoryError, PortId, TransferId, TransferKind};
use defmt_or_log::debug;
use fallible_collections::FallibleVec;

use crate::crc::TransferCrc;
use crate::dlc;
use crate::error::CanardError;
use crate::frame::{CanId, Frame, TailByte, INITIAL_TOGGLE};
use crate::memory::MemoryResource;
use crate::tree::Tree;

type Handle = u32;

struct TxItem<I> {
    can_id: u32,
    priority_seq: u64,
    deadline: I,
    deadline_seq: u64,
    payload: Vec<u8>,
    /// The next frame of the same transfer, if any, by slab handle. Used to
    /// drop a whole multi-frame transfer together on expiry or on transmit
    /// failure, rather than leaving a truncated remainder behind.
    next_in_transfer: Option<Handle>,
}

/// One pending frame, as handed back by [`TxQueue::peek`]: a view into the
/// queue without taking ownership.
#[derive(Debug, Clone, Copy)]
pub struct TxFrameRef<'a, I> {
    pub frame: Frame<'a>,
    pub deadline: I,
}

/// One frame popped out of the queue, owning its payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxQueueItem<I> {
    pub id: u32,
    pub payload: Vec<u8>,
    pub deadline: I,
}

impl<I> TxQueueItem<I> {
    pub fn frame(&self) -> Frame<'_> {
        Frame::new(self.id, &self.payload)
    }

    /// Releases the frame's payload buffer. The buffer is freed automatically
    /// when `self` drops regardless; this method exists only so that callers
    /// can follow the same explicit push/pop/free lifecycle the reference
    /// implementation uses.
    pub fn free(self) {}
}

/// Running counts of frames the queue has dropped, reported alongside its
/// normal push/pop/poll operations rather than folded into a single
/// "dropped" total, so a caller can tell an expired deadline apart from a
/// transmit failure reported by its frame handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxQueueStatistics {
    /// Number of frames currently queued.
    pub frame_count: usize,
    /// Frames dropped because their transfer's deadline passed before they
    /// could be sent.
    pub frames_expired: u64,
    /// Frames (and the rest of their transfer) dropped because the frame
    /// handler passed to [`TxQueue::poll`] reported a transmit failure.
    pub frames_failed: u64,
}

/// A priority- and deadline-ordered queue of outgoing CAN frames.
pub struct TxQueue<I: Instant> {
    capacity: usize,
    mtu: usize,
    size: usize,
    items: Vec<Option<TxItem<I>>>,
    free: Vec<Handle>,
    /// Keyed by `(CAN-ID, insertion sequence)`, ascending: the tree minimum
    /// is always the next frame due on the bus.
    priority_tree: Tree<(u32, u64), Handle>,
    /// Keyed by `(deadline, insertion sequence)`, ascending.
    deadline_tree: Tree<(I, u64), Handle>,
    next_seq: u64,
    frames_expired: u64,
    frames_failed: u64,
}

impl<I: Instant> TxQueue<I> {
    /// Creates an empty queue that holds at most `capacity` frames, each no
    /// larger than `mtu` bytes of payload (rounded up to the nearest valid
    /// DLC length, and floored at classic CAN's 8 bytes).
    pub fn new(capacity: usize, mtu: usize) -> Self {
        TxQueue {
            capacity,
            mtu: dlc::normalize_queue_mtu(mtu),
            size: 0,
            items: Vec::new(),
            free: Vec::new(),
            priority_tree: Tree::new(),
            deadline_tree: Tree::new(),
            next_seq: 0,
            frames_expired: 0,
            frames_failed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn statistics(&self) -> TxQueueStatistics {
        TxQueueStatistics {
            frame_count: self.size,
            frames_expired: self.frames_expired,
            frames_failed: self.frames_failed,
        }
    }

    fn presentation_mtu(&self) -> usize {
        self.mtu - 1
    }

    /// Splits a transfer's payload into one or more frames and enqueues them,
    /// expiring any transfers past their deadline first if `now` is given.
    /// Returns the number of frames enqueued.
    pub fn push(
        &mut self,
        local_node_id: Option<NodeId>,
        deadline: I,
        metadata: &TransferMetadata,
        payload: &[u8],
        now: Option<I>,
        memory: &mut impl MemoryResource,
    ) -> Result<u32, CanardError> {
        if let Some(now) = now {
            self.frames_expired += self.expire(now) as u64;
        }

        let pl_mtu = self.presentation_mtu();
        let can_id = Self::make_can_id(local_node_id, metadata, payload, pl_mtu)?;

        if payload.len() <= pl_mtu {
            self.push_single_frame(can_id, deadline, metadata.transfer_id, payload, memory)
        } else {
            self.push_multi_frame(can_id, deadline, metadata.transfer_id, payload, memory)
        }
    }

    fn make_can_id(
        local_node_id: Option<NodeId>,
        metadata: &TransferMetadata,
        payload: &[u8],
        pl_mtu: usize,
    ) -> Result<u32, CanardError> {
        match metadata.port_id {
            PortId::Subject(subject) => {
                if metadata.kind != TransferKind::Message || metadata.remote_node_id.is_some() {
                    return Err(CanardError::InvalidValue);
                }
                match local_node_id {
                    Some(source) => Ok(CanId::for_message(metadata.priority, subject, Some(source))),
                    None => {
                        if payload.len() > pl_mtu {
                            // An anonymous transfer cannot span more than one
                            // frame: there is no node ID to key a reassembly
                            // session on.
                            return Err(CanardError::InvalidValue);
                        }
                        let pseudo_id = (crate::crc::crc_add(crate::crc::INITIAL, payload) & 0x7F) as u8;
                        Ok(CanId::for_anonymous_message(metadata.priority, subject, pseudo_id))
                    }
                }
            }
            PortId::Service(service) => {
                if metadata.kind == TransferKind::Message {
                    return Err(CanardError::InvalidValue);
                }
                let destination = metadata.remote_node_id.ok_or(CanardError::InvalidValue)?;
                let source = local_node_id.ok_or(CanardError::InvalidValue)?;
                Ok(match metadata.kind {
                    TransferKind::Request => CanId::for_request(metadata.priority, service, destination, source),
                    TransferKind::Response => CanId::for_response(metadata.priority, service, destination, source),
                    TransferKind::Message => unreachable!("message kind handled above"),
                })
            }
        }
    }

    fn push_single_frame(
        &mut self,
        can_id: u32,
        deadline: I,
        transfer_id: TransferId,
        payload: &[u8],
        memory: &mut impl MemoryResource,
    ) -> Result<u32, CanardError> {
        if self.size + 1 > self.capacity {
            return Err(CanardError::OutOfMemory);
        }
        let frame_len = dlc::round_frame_payload_size_up(payload.len() + 1);
        let mut buf = memory.alloc_bytes(frame_len)?;
        buf[..payload.len()].copy_from_slice(payload);
        buf[frame_len - 1] = TailByte::new(true, true, INITIAL_TOGGLE, transfer_id).to_u8();

        self.insert_item(can_id, deadline, buf, None)?;
        self.size += 1;
        Ok(1)
    }

    fn push_multi_frame(
        &mut self,
        can_id: u32,
        deadline: I,
        transfer_id: TransferId,
        payload: &[u8],
        memory: &mut impl MemoryResource,
    ) -> Result<u32, CanardError> {
        let pl_mtu = self.presentation_mtu();
        let payload_size_with_crc = payload.len() + 2;
        let num_frames = (payload_size_with_crc + pl_mtu - 1) / pl_mtu;
        if self.size + num_frames > self.capacity {
            return Err(CanardError::OutOfMemory);
        }

        let mut crc = TransferCrc::new();
        crc.digest(payload);

        let mut handles: Vec<Handle> = Vec::new();
        let _ = FallibleVec::try_reserve(&mut handles, num_frames);

        let mut offset = 0usize;
        let mut toggle = INITIAL_TOGGLE;
        let mut prev_handle: Option<Handle> = None;

        let build: Result<(), CanardError> = (|| {
            while offset < payload_size_with_crc {
                let remaining = payload_size_with_crc - offset;
                let frame_payload_with_tail = if remaining < pl_mtu {
                    dlc::round_frame_payload_size_up(remaining + 1)
                } else {
                    pl_mtu + 1
                };
                let frame_payload_size = frame_payload_with_tail - 1;
                let mut buf = memory.alloc_bytes(frame_payload_with_tail)?;

                let mut frame_offset = 0usize;
                if offset < payload.len() {
                    let move_size = (payload.len() - offset).min(frame_payload_size);
                    buf[..move_size].copy_from_slice(&payload[offset..offset + move_size]);
                    frame_offset += move_size;
                    offset += move_size;
                }
                if offset >= payload.len() {
                    // Padding bytes (already zero from the zero-filled
                    // allocation) are folded into the CRC one at a time, then
                    // the two CRC bytes themselves are written out.
                    while frame_offset + 2 < frame_payload_size {
                        crc.digest_byte(0);
                        frame_offset += 1;
                    }
                    if frame_offset < frame_payload_size && offset == payload.len() {
                        buf[frame_offset] = crc.bytes()[0];
                        frame_offset += 1;
                        offset += 1;
                    }
                    if frame_offset < frame_payload_size && offset > payload.len() {
                        buf[frame_offset] = crc.bytes()[1];
                        frame_offset += 1;
                        offset += 1;
                    }
                }

                let is_first = prev_handle.is_none();
                let is_last = offset >= payload_size_with_crc;
                buf[frame_payload_size] = TailByte::new(is_first, is_last, toggle, transfer_id).to_u8();
                toggle = !toggle;

                let handle = self.insert_item(can_id, deadline, buf, None)?;
                if let Some(prev) = prev_handle {
                    self.item_mut(prev).next_in_transfer = Some(handle);
                }
                prev_handle = Some(handle);
                handles.push(handle);
            }
            Ok(())
        })();

        match build {
            Ok(()) => {
                self.size += handles.len();
                Ok(handles.len() as u32)
            }
            Err(err) => {
                // Atomic rollback: the queue must be left exactly as it was
                // before this call, so undo every frame already linked in.
                for handle in handles {
                    self.drop_item(handle);
                }
                Err(err)
            }
        }
    }

    fn insert_item(
        &mut self,
        can_id: u32,
        deadline: I,
        payload: Vec<u8>,
        next_in_transfer: Option<Handle>,
    ) -> Result<Handle, OutOfMemoryError> {
        let priority_seq = self.next_seq;
        self.next_seq += 1;
        let deadline_seq = self.next_seq;
        self.next_seq += 1;

        let handle = self.alloc_item(TxItem {
            can_id,
            priority_seq,
            deadline,
            deadline_seq,
            payload,
            next_in_transfer,
        })?;

        if let Err(err) = self.priority_tree.find_or_insert_with((can_id, priority_seq), || handle) {
            self.dealloc_item(handle);
            return Err(err);
        }
        if let Err(err) = self
            .deadline_tree
            .find_or_insert_with((deadline, deadline_seq), || handle)
        {
            let p_index = self
                .priority_tree
                .find(&(can_id, priority_seq))
                .expect("just inserted");
            self.priority_tree.remove(p_index);
            self.dealloc_item(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Looks at the next frame due on the bus without removing it.
    pub fn peek(&self) -> Option<TxFrameRef<'_, I>> {
        let p_index = self.priority_tree.min()?;
        let &(id, _) = self.priority_tree.key(p_index);
        let handle = *self.priority_tree.get(p_index);
        let item = self.item(handle);
        Some(TxFrameRef {
            frame: Frame::new(id, &item.payload),
            deadline: item.deadline,
        })
    }

    /// Removes and returns the next frame due on the bus.
    pub fn pop(&mut self) -> Option<TxQueueItem<I>> {
        let p_index = self.priority_tree.min()?;
        let &(id, _) = self.priority_tree.key(p_index);
        let handle = *self.priority_tree.get(p_index);
        let item = self.drop_item(handle);
        self.size -= 1;
        Some(TxQueueItem {
            id,
            payload: item.payload,
            deadline: item.deadline,
        })
    }

    /// Drops every frame of the transfer that `handle` belongs to, following
    /// `next_in_transfer`. Returns the number of frames dropped.
    fn drop_transfer(&mut self, handle: Handle) -> usize {
        let mut count = 0;
        let mut current = Some(handle);
        while let Some(h) = current {
            let next = self.item(h).next_in_transfer;
            self.drop_item(h);
            self.size -= 1;
            count += 1;
            current = next;
        }
        count
    }

    /// Removes every transfer whose deadline is strictly before `now`.
    /// Returns the number of frames dropped.
    pub fn expire(&mut self, now: I) -> usize {
        let mut count = 0;
        loop {
            let d_index = match self.deadline_tree.min() {
                Some(index) => index,
                None => break,
            };
            let &(deadline, _) = self.deadline_tree.key(d_index);
            if deadline >= now {
                break;
            }
            let handle = *self.deadline_tree.get(d_index);
            let dropped = self.drop_transfer(handle);
            debug!("expiring {} frame(s) of a transfer past its deadline", dropped);
            count += dropped;
        }
        count
    }

    /// Flushes expired transfers (if `now` is given), then hands the next
    /// due frame to `handler`. `handler` returns a positive value on a
    /// successful transmit (the frame is popped and freed), zero to mean "try
    /// again later" (the frame stays queued, untouched), or a negative value
    /// on transmit failure (the whole transfer the frame belongs to is
    /// dropped and counted against `frames_failed`).
    ///
    /// Returns the same tri-state the handler reported, or `0` if the queue
    /// was empty.
    pub fn poll<F>(&mut self, now: Option<I>, mut handler: F) -> i8
    where
        F: FnMut(TxFrameRef<'_, I>) -> i8,
    {
        if let Some(now) = now {
            self.frames_expired += self.expire(now) as u64;
        }

        let outcome = match self.peek() {
            Some(frame) => handler(frame),
            None => return 0,
        };

        if outcome > 0 {
            if let Some(item) = self.pop() {
                item.free();
            }
            1
        } else if outcome < 0 {
            let p_index = self.priority_tree.min().expect("poll just peeked a frame");
            let handle = *self.priority_tree.get(p_index);
            let dropped = self.drop_transfer(handle);
            debug!("dropping {} frame(s) of a transfer: handler reported transmit failure", dropped);
            self.frames_failed += dropped as u64;
            -1
        } else {
            0
        }
    }

    /// Removes an item from both trees and the slab, given only its handle.
    /// Used by every removal path (pop, transfer drop on expiry/failure, and
    /// multi-frame push rollback) so that none of them need to carry a
    /// tree index across an intervening tree mutation — see the module-level
    /// note on why stashing a raw `Tree` index would be unsound here.
    fn drop_item(&mut self, handle: Handle) -> TxItem<I> {
        let data = self.item(handle);
        let priority_key = (data.can_id, data.priority_seq);
        let deadline_key = (data.deadline, data.deadline_seq);
        if let Some(p_index) = self.priority_tree.find(&priority_key) {
            self.priority_tree.remove(p_index);
        }
        if let Some(d_index) = self.deadline_tree.find(&deadline_key) {
            self.deadline_tree.remove(d_index);
        }
        self.dealloc_item(handle)
    }

    fn alloc_item(&mut self, data: TxItem<I>) -> Result<Handle, OutOfMemoryError> {
        if let Some(handle) = self.free.pop() {
            self.items[handle as usize] = Some(data);
            Ok(handle)
        } else {
            FallibleVec::try_push(&mut self.items, Some(data))?;
            Ok((self.items.len() - 1) as Handle)
        }
    }

    fn dealloc_item(&mut self, handle: Handle) -> TxItem<I> {
        let data = self.items[handle as usize].take().expect("double free of tx item handle");
        let _ = FallibleVec::try_push(&mut self.free, handle);
        data
    }

    fn item(&self, handle: Handle) -> &TxItem<I> {
        self.items[handle as usize].as_ref().expect("dangling tx item handle")
    }

    fn item_mut(&mut self, handle: Handle) -> &mut TxItem<I> {
        self.items[handle as usize].as_mut().expect("dangling tx item handle")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::GlobalMemoryResource;
    use core::convert::TryFrom;
    use cyphal_core::{Priority, SubjectId};

    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
    struct TestInstant(u64);
    impl Instant for TestInstant {
        type Duration = u64;
        fn checked_add(self, duration: u64) -> Option<Self> {
            self.0.checked_add(duration).map(TestInstant)
        }
        fn duration_since(self, earlier: Self) -> Option<u64> {
            self.0.checked_sub(earlier.0)
        }
    }

    fn message_metadata(subject: u16) -> TransferMetadata {
        TransferMetadata {
            priority: Priority::Nominal,
            kind: TransferKind::Message,
            port_id: PortId::Subject(SubjectId::try_from(subject).unwrap()),
            remote_node_id: None,
            transfer_id: TransferId::from_truncating(0),
        }
    }

    #[test]
    fn single_frame_push_then_pop_round_trips_payload() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(9u8).unwrap();
        let n = queue
            .push(
                Some(source),
                TestInstant(1_000),
                &message_metadata(7),
                &[1, 2, 3],
                None,
                &mut memory,
            )
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(queue.len(), 1);

        let item = queue.pop().unwrap();
        assert_eq!(item.payload.len(), 4);
        assert_eq!(&item.payload[..3], &[1, 2, 3]);
        assert_eq!(item.payload[3] & 0xC0, 0xC0); // SOT and EOT both set
        assert!(queue.is_empty());
    }

    #[test]
    fn multi_frame_push_chains_and_sets_toggle() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(9u8).unwrap();
        let payload: Vec<u8> = (0u8..10).collect();
        let n = queue
            .push(
                Some(source),
                TestInstant(1_000),
                &message_metadata(7),
                &payload,
                None,
                &mut memory,
            )
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(queue.len(), 2);

        let first = queue.pop().unwrap();
        let tail = first.payload[first.payload.len() - 1];
        assert_eq!(tail & 0xC0, 0x80); // SOT set, EOT clear
        let second = queue.pop().unwrap();
        let tail2 = second.payload[second.payload.len() - 1];
        assert_eq!(tail2 & 0xC0, 0x40); // SOT clear, EOT set
        assert_ne!(tail & 0x20, tail2 & 0x20); // toggle alternates
        assert!(queue.is_empty());
    }

    #[test]
    fn priority_tree_orders_by_can_id_then_fifo() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        // Same subject, same priority: the two pushes tie on CAN-ID, so FIFO
        // order decides which comes out first.
        queue
            .push(Some(source), TestInstant(10), &message_metadata(3), &[1], None, &mut memory)
            .unwrap();
        queue
            .push(Some(source), TestInstant(10), &message_metadata(3), &[2], None, &mut memory)
            .unwrap();

        let first = queue.pop().unwrap();
        assert_eq!(first.payload[0], 1);
        let second = queue.pop().unwrap();
        assert_eq!(second.payload[0], 2);
    }

    #[test]
    fn push_rejects_anonymous_multi_frame_message() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let payload: Vec<u8> = (0u8..20).collect();
        let result = queue.push(None, TestInstant(0), &message_metadata(7), &payload, None, &mut memory);
        assert_eq!(result, Err(CanardError::InvalidValue));
        assert!(queue.is_empty());
    }

    #[test]
    fn push_fails_when_capacity_exhausted() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(1, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        queue
            .push(Some(source), TestInstant(0), &message_metadata(1), &[1], None, &mut memory)
            .unwrap();
        let result = queue.push(Some(source), TestInstant(0), &message_metadata(2), &[2], None, &mut memory);
        assert_eq!(result, Err(CanardError::OutOfMemory));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn multi_frame_push_rolls_back_entirely_on_mid_chain_capacity_failure() {
        // Capacity for only one frame, but the payload needs two.
        let mut queue: TxQueue<TestInstant> = TxQueue::new(1, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        let payload: Vec<u8> = (0u8..10).collect();
        let result = queue.push(Some(source), TestInstant(0), &message_metadata(1), &payload, None, &mut memory);
        assert_eq!(result, Err(CanardError::OutOfMemory));
        assert!(queue.is_empty());
    }

    #[test]
    fn expire_drops_whole_transfers_past_their_deadline() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        let payload: Vec<u8> = (0u8..10).collect(); // two frames
        queue
            .push(Some(source), TestInstant(100), &message_metadata(1), &payload, None, &mut memory)
            .unwrap();
        queue
            .push(Some(source), TestInstant(500), &message_metadata(2), &[1], None, &mut memory)
            .unwrap();
        assert_eq!(queue.len(), 3);

        let dropped = queue.expire(TestInstant(200));
        assert_eq!(dropped, 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.statistics().frame_count, 1);
    }

    #[test]
    fn poll_on_failure_drops_the_whole_transfer_and_counts_it() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        let payload: Vec<u8> = (0u8..10).collect(); // two frames
        queue
            .push(Some(source), TestInstant(100), &message_metadata(1), &payload, None, &mut memory)
            .unwrap();

        let outcome = queue.poll(None, |_frame| -1);
        assert_eq!(outcome, -1);
        assert!(queue.is_empty());
        assert_eq!(queue.statistics().frames_failed, 2);
    }

    #[test]
    fn poll_on_success_pops_one_frame_at_a_time() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        let payload: Vec<u8> = (0u8..10).collect(); // two frames
        queue
            .push(Some(source), TestInstant(100), &message_metadata(1), &payload, None, &mut memory)
            .unwrap();

        assert_eq!(queue.poll(None, |_frame| 1), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll(None, |_frame| 1), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn poll_on_retry_leaves_the_frame_queued() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(1u8).unwrap();
        queue
            .push(Some(source), TestInstant(0), &message_metadata(1), &[9], None, &mut memory)
            .unwrap();

        assert_eq!(queue.poll(None, |_frame| 0), 0);
        assert_eq!(queue.len(), 1);
    }

    /// Boundary scenario 1: anonymous single-frame message. Priority=Nominal,
    /// subject-ID=0b0110011001100, payload=01 02 03, no local node ID, MTU=8.
    #[test]
    fn anonymous_single_frame_message_matches_worked_example() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let payload = [0x01u8, 0x02, 0x03];
        let metadata = message_metadata(0b0110011001100);
        let n = queue
            .push(None, TestInstant(0), &metadata, &payload, None, &mut memory)
            .unwrap();
        assert_eq!(n, 1);

        let item = queue.pop().unwrap();
        let expected_pseudo_id = (crate::crc::crc_add(crate::crc::INITIAL, &payload) & 0x7F) as u32;
        let expected_id = CanId::for_anonymous_message(
            Priority::Nominal,
            SubjectId::try_from(0b0110011001100u16).unwrap(),
            expected_pseudo_id as u8,
        );
        assert_eq!(item.id, expected_id);
        assert_eq!(&item.payload[..3], &payload);
        assert_eq!(item.payload[item.payload.len() - 1], 0b1110_0000);
    }

    /// Boundary scenario 2: broadcast message across 3 frames on classic CAN.
    /// Priority=Nominal, subject-ID=7509, local node-ID=42, MTU=8. A 15-byte
    /// payload (17 bytes once the CRC is appended) is exactly what splits
    /// into the specification's worked frame lengths 8, 8, 4 at a
    /// presentation-layer MTU of 7: tails `0b101_TT`, `0b000_TT`, `0b011_TT`
    /// with the toggle alternating 1, 0, 1.
    #[test]
    fn broadcast_message_splits_into_three_frames_per_worked_example() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let source = NodeId::try_from(42u8).unwrap();
        let payload: Vec<u8> = (0u8..15).collect();
        let metadata = TransferMetadata {
            priority: Priority::Nominal,
            kind: TransferKind::Message,
            port_id: PortId::Subject(SubjectId::try_from(7509u16).unwrap()),
            remote_node_id: None,
            transfer_id: TransferId::from_truncating(0b00100),
        };
        let n = queue
            .push(Some(source), TestInstant(0), &metadata, &payload, None, &mut memory)
            .unwrap();
        assert_eq!(n, 3);

        let f1 = queue.pop().unwrap();
        let f2 = queue.pop().unwrap();
        let f3 = queue.pop().unwrap();
        assert_eq!(f1.payload.len(), 8);
        assert_eq!(f2.payload.len(), 8);
        assert_eq!(f3.payload.len(), 4);

        let tail1 = f1.payload[f1.payload.len() - 1];
        let tail2 = f2.payload[f2.payload.len() - 1];
        let tail3 = f3.payload[f3.payload.len() - 1];
        assert_eq!(tail1 & 0xE0, 0b1010_0000);
        assert_eq!(tail2 & 0xE0, 0b0000_0000);
        assert_eq!(tail3 & 0xE0, 0b0110_0000);
        assert_eq!(tail1 & 0x1F, 0b00100);
        assert_eq!(tail2 & 0x1F, 0b00100);
        assert_eq!(tail3 & 0x1F, 0b00100);

        // Frames 1 and 2 are entirely user payload (7 bytes each); frame 3
        // carries the 15th payload byte followed by the two CRC bytes.
        assert_eq!(&f1.payload[..7], &payload[0..7]);
        assert_eq!(&f2.payload[..7], &payload[7..14]);
        let mut crc = TransferCrc::new();
        crc.digest(&payload);
        let crc_bytes = crc.bytes();
        assert_eq!(f3.payload[0], payload[14]);
        assert_eq!(f3.payload[1], crc_bytes[0]);
        assert_eq!(f3.payload[2], crc_bytes[1]);
    }

    /// Boundary scenario 4: pushing a service request with no local node ID
    /// is rejected outright and leaves the queue untouched.
    #[test]
    fn anonymous_service_request_is_rejected() {
        let mut queue: TxQueue<TestInstant> = TxQueue::new(10, 8);
        let mut memory = GlobalMemoryResource;
        let destination = NodeId::try_from(26u8).unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Immediate,
            kind: TransferKind::Request,
            port_id: PortId::Service(cyphal_core::ServiceId::try_from(0b000110011u16).unwrap()),
            remote_node_id: Some(destination),
            transfer_id: TransferId::from_truncating(4),
        };
        let result = queue.push(None, TestInstant(0), &metadata, &[1, 2, 3], None, &mut memory);
        assert_eq!(result, Err(CanardError::InvalidValue));
        assert!(queue.is_empty());
    }
}
