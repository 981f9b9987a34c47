//! The receive-side entry point: subscription management and frame
//! acceptance, tying the CAN-ID codec, the per-port subscription trees, and
//! the reassembly state machine together.

use cyphal_core::time::Instant;
use cyphal_core::{NodeId, PortId, TransferKind};
use defmt_or_log::{debug, trace};

use crate::frame::{Frame, EXTENDED_ID_MASK};
use crate::memory::MemoryResource;
use crate::rx::RxFrameModel;
use crate::session::{RxTransfer, Session};
use crate::subscription::Subscription;
use crate::tree::Tree;

/// The public-facing view of a subscription's configuration, returned by
/// [`Instance::get_subscription`]. The reassembly sessions themselves stay
/// private to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionInfo<I: Instant> {
    pub extent: usize,
    pub transfer_id_timeout: I::Duration,
}

/// One node's view of the bus: its own node ID (if any), and every active
/// subscription, indexed by transfer kind and port ID.
pub struct Instance<I: Instant> {
    local_node_id: Option<NodeId>,
    message_subs: Tree<u16, Subscription<I>>,
    request_subs: Tree<u16, Subscription<I>>,
    response_subs: Tree<u16, Subscription<I>>,
}

impl<I: Instant> Instance<I> {
    pub fn new(local_node_id: Option<NodeId>) -> Self {
        Instance {
            local_node_id,
            message_subs: Tree::new(),
            request_subs: Tree::new(),
            response_subs: Tree::new(),
        }
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    pub fn set_local_node_id(&mut self, node_id: NodeId) {
        self.local_node_id = Some(node_id);
    }

    fn tree_for(&self, kind: TransferKind) -> &Tree<u16, Subscription<I>> {
        match kind {
            TransferKind::Message => &self.message_subs,
            TransferKind::Request => &self.request_subs,
            TransferKind::Response => &self.response_subs,
        }
    }

    fn tree_for_mut(&mut self, kind: TransferKind) -> &mut Tree<u16, Subscription<I>> {
        match kind {
            TransferKind::Message => &mut self.message_subs,
            TransferKind::Request => &mut self.request_subs,
            TransferKind::Response => &mut self.response_subs,
        }
    }

    /// Subscribes to `port_id` for transfers of the given `kind`. Any
    /// existing subscription on the same (kind, port) is torn down first, so
    /// widening or narrowing `extent` never leaves a stale, too-small buffer
    /// half-reused. Returns `true` if this created a new subscription,
    /// `false` if it replaced an existing one.
    pub fn subscribe(
        &mut self,
        kind: TransferKind,
        port_id: PortId,
        extent: usize,
        transfer_id_timeout: I::Duration,
    ) -> Result<bool, cyphal_core::OutOfMemoryError> {
        let replaced = self.unsubscribe(kind, port_id);
        if replaced {
            debug!("replacing existing subscription on port {}", port_id.value());
        }
        let subscription = Subscription::new(extent, transfer_id_timeout);
        let tree = self.tree_for_mut(kind);
        tree.find_or_insert_with(port_id.value(), || subscription)?;
        Ok(!replaced)
    }

    /// Removes the subscription on (kind, port), if any. Returns `true` if
    /// one was present.
    pub fn unsubscribe(&mut self, kind: TransferKind, port_id: PortId) -> bool {
        let tree = self.tree_for_mut(kind);
        match tree.find(&port_id.value()) {
            Some(index) => {
                tree.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn get_subscription(&self, kind: TransferKind, port_id: PortId) -> Option<SubscriptionInfo<I>> {
        let tree = self.tree_for(kind);
        let index = tree.find(&port_id.value())?;
        let sub = tree.get(index);
        Some(SubscriptionInfo {
            extent: sub.extent,
            transfer_id_timeout: sub.transfer_id_timeout,
        })
    }

    /// Runs an incoming frame through destination filtering, subscription
    /// lookup, and reassembly. Returns `Ok(None)` for anything not delivered
    /// — an unrecognized port, a frame not addressed to this node, a
    /// malformed frame, or one more frame of a transfer still being
    /// assembled — and never treats any of those as an error. The only error
    /// this can report is running out of memory while allocating a session
    /// or a payload buffer.
    pub fn rx_accept(
        &mut self,
        timestamp: I,
        frame: Frame<'_>,
        redundant_iface_index: u8,
        memory: &mut impl MemoryResource,
    ) -> Result<Option<RxTransfer<I>>, cyphal_core::OutOfMemoryError> {
        if frame.id & !EXTENDED_ID_MASK != 0 {
            return Ok(None);
        }
        let model = match RxFrameModel::<I>::parse(timestamp, frame.id, frame.payload) {
            Some(model) => model,
            None => return Ok(None),
        };
        if let Some(destination) = model.destination {
            if Some(destination) != self.local_node_id {
                trace!("discarding frame: not addressed to this node");
                return Ok(None);
            }
        }

        let key = model.port_id.value();
        let tree = self.tree_for_mut(model.kind);
        let index = match tree.find(&key) {
            Some(index) => index,
            None => {
                trace!("discarding frame: no subscription on port {}", key);
                return Ok(None);
            }
        };
        let sub = tree.get_mut(index);

        match model.source {
            None => {
                // Anonymous transfers are always single-frame and stateless:
                // deliver directly, truncated to the subscription's extent.
                let extent = sub.extent.min(model.payload.len());
                let mut buffer = memory.alloc_bytes(extent)?;
                buffer.copy_from_slice(&model.payload[..extent]);
                Ok(Some(RxTransfer {
                    timestamp,
                    metadata: model.metadata(),
                    payload: buffer,
                }))
            }
            Some(source) => {
                if sub.session(source).is_none() {
                    if !model.tail.start_of_transfer {
                        // A non-start frame with no session to join is a
                        // stale fragment of a transfer we never saw begin.
                        trace!("discarding frame: non-start fragment with no session to join");
                        return Ok(None);
                    }
                    *sub.session_mut(source) = Some(Session::new(&model, redundant_iface_index));
                }
                let session = sub
                    .session_mut(source)
                    .as_mut()
                    .expect("created immediately above if absent");
                session.update(&model, redundant_iface_index, sub.transfer_id_timeout, sub.extent, memory)
            }
        }
    }
}
