//! Transfer metadata: the information that accompanies a transfer's payload
//! and distinguishes it from every other transfer sharing the bus.

use crate::{NodeId, PortId, Priority, TransferId, TransferKind};

/// The full metadata of a transfer, independent of its payload.
///
/// For an outgoing message, `remote_node_id` is `None`. For an outgoing
/// service request or response, it is the destination node. For an incoming
/// non-anonymous transfer, it is the source node that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferMetadata {
    pub priority: Priority,
    pub kind: TransferKind,
    pub port_id: PortId,
    pub remote_node_id: Option<NodeId>,
    pub transfer_id: TransferId,
}
