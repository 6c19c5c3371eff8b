//! Partition rebalancing: the demander side.
//!
//! When the cluster topology changes, the exchange layer computes which
//! partitions this node must acquire and from whom, and hands the result
//! to the per-cache [`Demander`] as an [`AssignmentBatch`]. The demander
//! drives the multi-round demand/supply protocol until every partition
//! is received and owned, or the round is overtaken by a newer topology.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        exchange layer                        │
//! │          topology change → AssignmentBatch (per cache)       │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ add_assignments
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Demander                            │
//! │  ┌────────────────┐   demand lanes    ┌────────────────────┐ │
//! │  │ RebalanceFuture│◄──────────────────┤ handle_supply_msg  │ │
//! │  │  remaining /   │   (one ordered    │  apply entries,    │ │
//! │  │  missed per    │    topic per      │  own partitions,   │ │
//! │  │  supplier      │    lane)          │  ack next batch    │ │
//! │  └────────────────┘                   └────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ last partition settles
//!                               ▼
//!          clean → resend partition map   missed → dummy exchange
//! ```
//!
//! Ordering across caches (a cache rebalancing only after its
//! dependencies) is enforced by the [`OrderingGate`]; deferred
//! assignments are re-triggered by the single-slot [`RetryTimer`];
//! the [`DemandLock`] lets external collaborators quiesce entry
//! application.

pub mod assignments;
pub mod context;
pub mod demand_lock;
pub mod demander;
pub mod future;
pub mod messages;
pub mod ordering;
pub mod timer;

pub use assignments::AssignmentBatch;
pub use context::CacheContext;
pub use demand_lock::DemandLock;
pub use demander::{Demander, PreloadFilter, RebalanceTask};
pub use future::{RebalanceFuture, RebalanceResult};
pub use messages::{fmt_partitions, CacheEntry, DemandMessage, SupplyMessage};
pub use ordering::{CacheRegistry, NoopCacheRegistry, OrderingGate};
pub use timer::RetryTimer;
