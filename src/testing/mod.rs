//! Testing utilities for the rebalancing core.
//!
//! Every collaborator the core consumes has an in-memory mock in
//! [`mocks`]: affinity, partition store, transport, exchange manager,
//! event sink and cache registry. The mocks are exported so embedders
//! can drive the demander in their own tests without a cluster.
//!
//! The end-to-end scenarios (happy path, multi-lane, supplier failure,
//! stale rounds, ordered rebalancing, deferred assignments) live in
//! `demander_tests` and run entirely in-process.

pub mod mocks;

mod demander_tests;

pub use mocks::{
    MapCacheRegistry, MockAffinity, MockExchange, MockPartition, MockTopology,
    RecordingEventSink, RecordingTransport, SentDemand,
};
