//! Common definitions shared by the Cyphal/CAN transport codec: node, port and
//! transfer identifiers, priority levels, and the generic timestamp trait used
//! to keep the transport logic independent of any particular clock source.
#![no_std]

extern crate alloc;

pub mod time;
pub mod transfer;

use core::convert::TryFrom;
use core::fmt;

/// A node does not have enough memory to complete an operation.
///
/// Corresponds to the single out-of-memory condition that the transport codec
/// can report; every other anomaly (malformed input, protocol violations) is
/// handled by silently discarding the offending frame or transfer instead of
/// returning an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemoryError;

impl fmt::Display for OutOfMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of memory")
    }
}

impl From<fallible_collections::TryReserveError> for OutOfMemoryError {
    fn from(_: fallible_collections::TryReserveError) -> Self {
        OutOfMemoryError
    }
}

/// An argument was outside the range the API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidValueError;

impl fmt::Display for InvalidValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid argument")
    }
}

/// The identifier of a node on the bus, in the range 0..=127.
///
/// A frame whose source or destination field carries no valid node ID (an
/// anonymous message, or a message with no destination) is represented at the
/// API boundary as `Option<NodeId>` rather than as a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// The largest valid node ID.
    pub const MAX: NodeId = NodeId(127);

    /// Creates a node ID, truncating the input to the valid 7-bit range.
    pub const fn from_truncating(value: u8) -> Self {
        NodeId(value & 0x7f)
    }

    /// Returns the numeric value of this node ID.
    pub const fn to_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidValueError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(NodeId(value))
        } else {
            Err(InvalidValueError)
        }
    }
}

/// A message subject ID, in the range 0..=8191.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(u16);

impl SubjectId {
    pub const MAX: SubjectId = SubjectId(8191);
    pub const BIT_LENGTH: u32 = 13;

    pub const fn to_u16(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for SubjectId {
    type Error = InvalidValueError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(SubjectId(value))
        } else {
            Err(InvalidValueError)
        }
    }
}

/// A service ID, in the range 0..=511. Shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(u16);

impl ServiceId {
    pub const MAX: ServiceId = ServiceId(511);
    pub const BIT_LENGTH: u32 = 9;

    pub const fn to_u16(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for ServiceId {
    type Error = InvalidValueError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(ServiceId(value))
        } else {
            Err(InvalidValueError)
        }
    }
}

/// A subject ID or service ID, used where the transport does not care which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortId {
    Subject(SubjectId),
    Service(ServiceId),
}

impl PortId {
    /// Returns the numeric value, in the namespace appropriate to its kind.
    pub const fn value(self) -> u16 {
        match self {
            PortId::Subject(s) => s.0,
            PortId::Service(s) => s.0,
        }
    }
}

/// The transfer priority level. Lower numeric value arbitrates higher on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    Nominal = 4,
    Low = 5,
    Slow = 6,
    Optional = 7,
}

impl Priority {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            7 => Priority::Optional,
            _ => return None,
        })
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Nominal
    }
}

/// A transfer kind: message (publish/subscribe) or one of the two halves of a
/// service exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Message,
    Request,
    Response,
}

/// A 5-bit transfer ID, incremented (mod 32) by the sender for every transfer
/// sent on a given session and used by the receiver to detect duplicates,
/// reordering, and loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(u8);

impl TransferId {
    pub const MAX: u8 = 31;
    const MODULO: u8 = 32;

    pub const fn const_default() -> Self {
        TransferId(0)
    }

    pub const fn from_truncating(value: u8) -> Self {
        TransferId(value % Self::MODULO)
    }

    pub const fn to_u8(self) -> u8 {
        self.0
    }

    /// Returns the next transfer ID in sequence, wrapping from 31 back to 0.
    #[must_use]
    pub const fn increment(self) -> Self {
        TransferId((self.0 + 1) % Self::MODULO)
    }

    /// Forward (monotonic, wraparound-aware) distance from `self` to `other`,
    /// i.e. how many increments of `self` are needed to reach `other`.
    ///
    /// Used to decide whether an incoming frame continues, restarts, or is a
    /// stale duplicate of the session's current transfer.
    pub const fn forward_distance(self, other: Self) -> u8 {
        other.0.wrapping_sub(self.0) % Self::MODULO
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::const_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transfer_id_forward_distance_wraps_modulo_32() {
        let a = TransferId::from_truncating(31);
        let b = TransferId::const_default();
        assert_eq!(a.forward_distance(b), 1);
        assert_eq!(b.forward_distance(a), 31);
        assert_eq!(a.forward_distance(a), 0);
    }

    #[test]
    fn transfer_id_increment_wraps_from_31_to_0() {
        let max = TransferId::from_truncating(TransferId::MAX);
        assert_eq!(max.increment(), TransferId::const_default());
    }

    #[test]
    fn node_id_rejects_out_of_range_values() {
        assert!(NodeId::try_from(127u8).is_ok());
        assert!(NodeId::try_from(128u8).is_err());
    }

    #[test]
    fn subject_and_service_id_enforce_their_own_maxima() {
        assert!(SubjectId::try_from(8191u16).is_ok());
        assert!(SubjectId::try_from(8192u16).is_err());
        assert!(ServiceId::try_from(511u16).is_ok());
        assert!(ServiceId::try_from(512u16).is_err());
    }

    #[test]
    fn priority_round_trips_through_its_numeric_value() {
        for value in 0u8..=7 {
            let priority = Priority::from_u8(value).expect("0..=7 are all valid priorities");
            assert_eq!(priority.to_u8(), value);
        }
        assert!(Priority::from_u8(8).is_none());
    }
}
