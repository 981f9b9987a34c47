//! Cyphal/CAN (CAN 2.0B and CAN FD) transport codec.
//!
//! This crate implements the transport layer described by the Cyphal/CAN
//! specification: splitting an outgoing transfer into CAN frames and
//! prioritizing them for transmission, and reassembling incoming frames back
//! into transfers. It does not talk to any particular CAN peripheral or
//! socket API; callers hand frames in and take frames out through
//! [`Instance::rx_accept`] and [`TxQueue`].
//!
//! - [`Instance`] is the receive side: subscription management and frame
//!   acceptance.
//! - [`TxQueue`] is the transmit side: a priority- and deadline-ordered
//!   queue of outgoing frames.
//! - [`Filter`] computes CAN hardware acceptance filters for a node's
//!   subscriptions.
#![no_std]

extern crate alloc;

mod crc;
mod dlc;
pub mod error;
mod filter;
mod frame;
mod instance;
mod memory;
mod rx;
mod session;
mod subscription;
mod tree;
mod tx;

pub use error::CanardError;
pub use filter::Filter;
pub use frame::Frame;
pub use instance::{Instance, SubscriptionInfo};
pub use memory::{GlobalMemoryResource, MemoryResource};
pub use session::RxTransfer;
pub use tx::{TxFrameRef, TxQueue, TxQueueItem, TxQueueStatistics};

pub use cyphal_core::time::Instant;
pub use cyphal_core::transfer::TransferMetadata;
pub use cyphal_core::{
    InvalidValueError, NodeId, OutOfMemoryError, PortId, Priority, ServiceId, SubjectId,
    TransferId, TransferKind,
};
