//! Interface onto the ordered point-to-point transport.
//!
//! Demand and supply messages flow over per-lane topics. Delivery is
//! ordered within one `(peer, topic)` pair; the supply-driven protocol
//! relies on that ordering for flow control. Handler registration and
//! dispatch live in the transport itself; the demander only sends.

use crate::error::TransportError;
use crate::rebalance::messages::DemandMessage;
use crate::types::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A transport topic. One topic exists per demand lane; supplier and
/// demander derive it independently from the lane index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub u16);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rebalance-{}", self.0)
    }
}

/// Topic for the given demand lane.
pub fn rebalance_topic(lane: usize) -> Topic {
    Topic(lane as u16)
}

/// Ordered point-to-point message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `msg` to `node` over `topic`, preserving per-topic order.
    ///
    /// Fails with [`TransportError::NodeLeft`] when the peer is gone
    /// from the topology, which callers treat differently from
    /// transient send failures.
    async fn send_ordered(
        &self,
        node: NodeId,
        topic: Topic,
        msg: DemandMessage,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}
