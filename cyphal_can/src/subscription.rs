//! A live subscription: the receive-side counterpart of a TX queue, holding
//! one reassembly [`Session`] per possible source node.

use cyphal_core::time::Instant;
use cyphal_core::NodeId;

use crate::session::Session;

/// One slot per possible 7-bit node ID; anonymous sources never reach a
/// session, so there is no slot for them.
const SESSIONS_PER_SUBSCRIPTION: usize = NodeId::MAX.to_u8() as usize + 1;

/// A subscription to a subject or service port.
///
/// Sessions are allocated lazily, the first time a matching source's
/// start-of-transfer frame arrives; an idle subscription with no traffic yet
/// holds no session buffers at all beyond the (always-present) slot array.
/// That slot array is always exactly `NODE_ID_MAX + 1` entries — a compile-
/// time constant, not a caller-configurable size — so it is a `heapless::Vec`
/// embedded directly in the subscription rather than a heap-allocated `Vec`:
/// no allocation, and no possibility of running out of memory, just to hold
/// the table itself.
pub(crate) struct Subscription<I: Instant> {
    pub extent: usize,
    pub transfer_id_timeout: I::Duration,
    sessions: heapless::Vec<Option<Session<I>>, SESSIONS_PER_SUBSCRIPTION>,
}

impl<I: Instant> Subscription<I> {
    pub fn new(extent: usize, transfer_id_timeout: I::Duration) -> Self {
        let mut sessions = heapless::Vec::new();
        for _ in 0..SESSIONS_PER_SUBSCRIPTION {
            // The table's capacity is exactly `SESSIONS_PER_SUBSCRIPTION`, so
            // this push can never fail.
            let _ = sessions.push(None);
        }
        Subscription {
            extent,
            transfer_id_timeout,
            sessions,
        }
    }

    pub fn session(&self, source: NodeId) -> &Option<Session<I>> {
        &self.sessions[source.to_u8() as usize]
    }

    pub fn session_mut(&mut self, source: NodeId) -> &mut Option<Session<I>> {
        &mut self.sessions[source.to_u8() as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

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

    #[test]
    fn fresh_subscription_has_no_sessions() {
        use core::convert::TryFrom;
        let sub = Subscription::<TestInstant>::new(63, 2_000_000);
        for node in 0u8..=NodeId::MAX.to_u8() {
            let node = NodeId::try_from(node).unwrap();
            assert!(sub.session(node).is_none());
        }
    }
}
