//! End-to-end scenarios for the demander.
//!
//! Each test wires a demander to in-memory collaborators and drives the
//! demand/supply protocol by hand: assignments go in through
//! `add_assignments`, supply batches through `handle_supply_message`,
//! and the assertions check the observable outputs — messages sent,
//! partitions owned, events emitted, exchange rounds forced, and the
//! future's terminal result.

#[cfg(test)]
mod tests {
    use crate::config::{RebalanceConfig, RebalanceMode};
    use crate::events::RebalanceEventKind;
    use crate::exchange::ExchangeRef;
    use crate::rebalance::assignments::AssignmentBatch;
    use crate::rebalance::context::CacheContext;
    use crate::rebalance::demand_lock::DemandLock;
    use crate::rebalance::demander::Demander;
    use crate::rebalance::future::{RebalanceFuture, RebalanceResult};
    use crate::rebalance::messages::{CacheEntry, SupplyMessage};
    use crate::testing::mocks::{
        MapCacheRegistry, MockAffinity, MockExchange, MockTopology, RecordingEventSink,
        RecordingTransport,
    };
    use crate::types::{DiscoveryEvent, DiscoveryEventKind, PartitionId, TopologyVersion};
    use std::sync::Arc;
    use std::time::Duration;

    /// One demander wired to in-memory collaborators.
    struct DemanderFixture {
        affinity: Arc<MockAffinity>,
        topology: Arc<MockTopology>,
        transport: Arc<RecordingTransport>,
        exchange: Arc<MockExchange>,
        events: Arc<RecordingEventSink>,
        registry: Arc<MapCacheRegistry>,
        demander: Arc<Demander>,
    }

    impl DemanderFixture {
        fn new(
            config: RebalanceConfig,
            version: TopologyVersion,
            local: impl IntoIterator<Item = PartitionId>,
        ) -> Self {
            let affinity = Arc::new(MockAffinity::new(version, local));
            let topology = Arc::new(MockTopology::new());
            let transport = Arc::new(RecordingTransport::new());
            let exchange = Arc::new(MockExchange::new());
            let events = Arc::new(RecordingEventSink::new());
            let registry = Arc::new(MapCacheRegistry::new());

            let ctx = Arc::new(CacheContext::new(
                config,
                affinity.clone(),
                topology.clone(),
                transport.clone(),
                exchange.clone(),
                events.clone(),
            ));
            let demander = Arc::new(
                Demander::new(ctx, registry.clone(), Arc::new(DemandLock::new())).unwrap(),
            );

            Self {
                affinity,
                topology,
                transport,
                exchange,
                events,
                registry,
                demander,
            }
        }

        fn batch(&self, version: TopologyVersion) -> AssignmentBatch {
            AssignmentBatch::new(ExchangeRef::new(
                version,
                DiscoveryEvent::new(99, DiscoveryEventKind::Joined, 1_000),
            ))
        }
    }

    fn config(lanes: usize) -> RebalanceConfig {
        RebalanceConfig::new("customers", 1).with_thread_pool_size(lanes)
    }

    fn entry(key: &[u8], version: u64) -> CacheEntry {
        CacheEntry::new(key.to_vec(), b"value".to_vec(), version)
    }

    #[tokio::test]
    async fn test_happy_path_single_supplier_single_lane() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1, 2]);

        let batch = fx.batch(top).assign(1, [0, 1, 2]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let demands = fx.transport.demands();
        assert_eq!(demands.len(), 1);
        assert_eq!(demands[0].node, 1);
        assert_eq!(demands[0].msg.partitions.len(), 3);

        let seq = fx.demander.sync_future().update_seq();

        // First batch: partition 0 complete, partition 1 started.
        let msg1 = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_entries(1, vec![entry(b"k1a", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg1).await;

        assert!(!fx.demander.sync_future().is_done());
        assert_eq!(fx.transport.ack_count(), 1);
        assert_eq!(fx.topology.owned(), vec![0]);

        // Second batch finishes the remaining partitions.
        let msg2 = SupplyMessage::new(1, top, seq)
            .with_entries(1, vec![entry(b"k1b", 1)])
            .with_entries(2, vec![entry(b"k2", 1)])
            .with_last([1, 2]);
        fx.demander.handle_supply_message(0, 1, msg2).await;

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));
        assert_eq!(fut.wait().await, RebalanceResult::Succeeded);

        let mut owned = fx.topology.owned();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 1, 2]);

        assert_eq!(fx.events.count(RebalanceEventKind::ObjectLoaded), 4);
        assert_eq!(fx.events.count(RebalanceEventKind::PartitionLoaded), 3);
        assert_eq!(fx.events.count(RebalanceEventKind::Stopped), 1);

        // Clean completion: no dummy exchange, partition map resent.
        assert_eq!(fx.exchange.dummy_exchange_count(), 0);
        assert_eq!(fx.exchange.resend_count(), 1);

        // Completion settles the round; no trailing ack for the final batch.
        assert_eq!(fx.transport.ack_count(), 1);
    }

    #[tokio::test]
    async fn test_two_suppliers_two_lanes() {
        let top = TopologyVersion::new(7, 0);
        let fx = DemanderFixture::new(config(2), top, [0, 1, 2, 3, 4, 5]);

        let batch = fx.batch(top).assign(1, [0, 1, 2, 3]).assign(2, [4, 5]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        // Lanes carry partitions by parity: two per supplier here.
        let demands = fx.transport.demands();
        assert_eq!(demands.len(), 4);
        for demand in &demands {
            for &p in &demand.msg.partitions {
                assert_eq!(usize::from(p) % 2, usize::from(demand.topic.0));
            }
        }

        let seq = fx.demander.sync_future().update_seq();
        let supplies = [
            (0usize, 1, vec![0u16, 2]),
            (1usize, 1, vec![1, 3]),
            (0usize, 2, vec![4]),
            (1usize, 2, vec![5]),
        ];
        for (lane, supplier, parts) in supplies {
            let mut msg = SupplyMessage::new(1, top, seq).with_last(parts.iter().copied());
            for &p in &parts {
                msg = msg.with_entries(p, vec![entry(format!("k{p}").as_bytes(), 1)]);
            }
            fx.demander.handle_supply_message(lane, supplier, msg).await;
        }

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));

        let mut owned = fx.topology.owned();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 1, 2, 3, 4, 5]);

        // Events counted once per partition.
        assert_eq!(fx.events.count(RebalanceEventKind::PartitionLoaded), 6);
        assert_eq!(fx.events.count(RebalanceEventKind::ObjectLoaded), 6);
        assert_eq!(fx.exchange.dummy_exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_supplier_leaves_mid_transfer() {
        let top = TopologyVersion::new(3, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1, 2, 3]);

        let batch = fx.batch(top).assign(1, [0, 1]).assign(2, [2, 3]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();

        // N1 delivers partition 0, then disconnects before the ack goes out.
        fx.transport.depart(1);
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let fut = fx.demander.sync_future();
        assert!(!fut.is_done());
        assert_eq!(fut.missed_partitions(), [1].into_iter().collect());

        // N2 completes normally.
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(2, vec![entry(b"k2", 1)])
            .with_entries(3, vec![entry(b"k3", 1)])
            .with_last([2, 3]);
        fx.demander.handle_supply_message(0, 2, msg).await;

        assert_eq!(fut.result(), Some(RebalanceResult::Missed));
        assert_eq!(fut.missed_partitions(), [1].into_iter().collect());
        assert_eq!(fx.exchange.dummy_exchange_count(), 1);

        let mut owned = fx.topology.owned();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_supply_is_dropped() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1, 2]);

        let batch = fx.batch(top).assign(1, [0, 1, 2]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let events_before = fx.events.events().len();

        // Wrong sequence: dropped without any state change.
        let stale = SupplyMessage::new(1, top, 999)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, stale).await;

        let fut = fx.demander.sync_future();
        assert!(!fut.is_done());
        assert_eq!(fut.remaining_suppliers(), 1);
        assert_eq!(fx.transport.ack_count(), 0);
        assert_eq!(fx.events.events().len(), events_before);
        assert!(fx.topology.owned().is_empty());
        assert!(fx.topology.partition(0).is_empty());
    }

    #[tokio::test]
    async fn test_ordered_rebalancing_waits_for_dependency() {
        let top = TopologyVersion::new(4, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        // The "accounts" cache has not finished rebalancing yet.
        let accounts = Arc::new(RebalanceFuture::new_initial());
        fx.registry.insert("accounts", accounts.clone());

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx
            .demander
            .add_assignments(batch, false, vec!["accounts".to_owned()])
            .unwrap();
        let handle = {
            let demander = fx.demander.clone();
            tokio::spawn(async move { demander.run(task).await })
        };

        tokio::task::yield_now().await;
        assert!(fx.transport.sent().is_empty());

        accounts.force_complete(RebalanceResult::Succeeded);
        assert!(handle.await.unwrap());
        assert_eq!(fx.transport.demands().len(), 1);
    }

    #[tokio::test]
    async fn test_ordered_rebalancing_dependency_failure_cancels() {
        let top = TopologyVersion::new(4, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let accounts = Arc::new(RebalanceFuture::new_initial());
        accounts.force_complete(RebalanceResult::Missed);
        fx.registry.insert("accounts", accounts);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx
            .demander
            .add_assignments(batch, false, vec!["accounts".to_owned()])
            .unwrap();

        // The dependency failed: our round is cancelled before any
        // demand message goes out.
        assert!(!fx.demander.run(task).await);
        assert!(fx.demander.sync_future().is_done());
        assert!(fx.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_assignment_forces_exchange_after_delay() {
        let top = TopologyVersion::new(2, 0);
        let fx = DemanderFixture::new(
            config(1).with_delay(Duration::from_millis(1_000)),
            top,
            [0],
        );

        let batch = fx.batch(top).assign(1, [0]);
        assert!(fx.demander.add_assignments(batch, false, vec![]).is_none());

        // Nothing happens inside the window.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.exchange.preload_exchange_count(), 0);
        assert!(fx.transport.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fx.exchange.preload_exchange_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_preload_cancels_timer() {
        let top = TopologyVersion::new(2, 0);
        let fx = DemanderFixture::new(
            config(1).with_delay(Duration::from_millis(1_000)),
            top,
            [0],
        );

        let batch = fx.batch(top).assign(1, [0]);
        assert!(fx.demander.add_assignments(batch, false, vec![]).is_none());

        // Forcing within the window triggers the exchange immediately
        // and disarms the timer.
        fx.demander.force_preload();
        assert_eq!(fx.exchange.preload_exchange_count(), 1);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(fx.exchange.preload_exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_forced_assignment_bypasses_delay() {
        let top = TopologyVersion::new(2, 0);
        let fx = DemanderFixture::new(
            config(1).with_delay(Duration::from_millis(1_000)),
            top,
            [0],
        );

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, true, vec![]).unwrap();
        assert!(fx.demander.run(task).await);
        assert_eq!(fx.transport.demands().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_assignment_completes_immediately() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, []);

        let batch = fx.batch(top);
        assert!(fx.demander.add_assignments(batch, false, vec![]).is_none());

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));
        assert!(fx.transport.sent().is_empty());
        assert!(fx.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_stale_assignment_is_cancelled() {
        // Affinity has already moved past the batch's version.
        let fx = DemanderFixture::new(config(1), TopologyVersion::new(6, 0), [0]);

        let batch = fx.batch(TopologyVersion::new(5, 0)).assign(1, [0]);
        assert!(fx.demander.add_assignments(batch, false, vec![]).is_none());

        assert!(fx.demander.sync_future().is_done());
        assert!(fx.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_pending_exchange_skips_round() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);
        fx.exchange.set_pending(true);

        let batch = fx.batch(top).assign(1, [0]);
        assert!(fx.demander.add_assignments(batch, false, vec![]).is_none());
        assert!(fx.demander.sync_future().is_done());
        assert!(fx.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missed_only_supply_forces_dummy_exchange() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1]);

        let batch = fx.batch(top).assign(1, [0, 1]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq).with_missed([0, 1]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Missed));
        assert_eq!(fut.missed_partitions(), [0, 1].into_iter().collect());
        assert_eq!(fx.exchange.dummy_exchange_count(), 1);
        assert_eq!(fx.exchange.resend_count(), 0);
    }

    #[tokio::test]
    async fn test_class_error_cancels_supplier() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_class_error("undeployed value type");
        fx.demander.handle_supply_message(0, 1, msg).await;

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Missed));
        assert_eq!(fut.missed_partitions(), [0].into_iter().collect());
        assert!(fx.topology.partition(0).is_empty());
        assert_eq!(fx.exchange.dummy_exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_topology_change_cancels_in_flight_round() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        fx.affinity.advance_epoch();

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        // Cancelled silently: nothing applied, a newer round takes over.
        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));
        assert!(fx.topology.partition(0).is_empty());
        assert!(fx.topology.owned().is_empty());
        assert_eq!(fx.transport.ack_count(), 0);
    }

    #[tokio::test]
    async fn test_double_apply_is_idempotent() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1]);

        let batch = fx.batch(top).assign(1, [0, 1]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 3)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg.clone()).await;

        let snapshot = fx.topology.partition(0).snapshot();
        assert_eq!(fx.topology.owned(), vec![0]);

        // Same batch again: the partition is no longer moving, so the
        // second application leaves the store untouched.
        fx.demander.handle_supply_message(0, 1, msg).await;

        assert_eq!(fx.topology.partition(0).snapshot(), snapshot);
        assert_eq!(fx.topology.owned(), vec![0]);
        assert!(!fx.demander.sync_future().is_done());
    }

    #[tokio::test]
    async fn test_newer_local_write_wins() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let part = fx.topology.partition(0);
        part.put_local(b"hot".to_vec(), b"local".to_vec(), 10);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(
                0,
                vec![
                    CacheEntry::new(b"hot".to_vec(), b"stale".to_vec(), 5),
                    CacheEntry::new(b"cold".to_vec(), b"fresh".to_vec(), 20),
                ],
            )
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        // The older supplied value was rejected, the new key installed.
        assert_eq!(part.get(b"hot"), Some((b"local".to_vec(), 10)));
        assert_eq!(part.get(b"cold"), Some((b"fresh".to_vec(), 20)));
        assert_eq!(fx.events.count(RebalanceEventKind::ObjectLoaded), 1);
    }

    #[tokio::test]
    async fn test_invalid_partition_skips_rest_of_batch() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);
        fx.topology.partition(0).set_invalid(true);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1), entry(b"k1", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        // The batch was abandoned but the partition still settled.
        assert!(fx.topology.partition(0).is_empty());
        assert_eq!(
            fx.demander.sync_future().result(),
            Some(RebalanceResult::Succeeded)
        );
        assert_eq!(fx.topology.partition(0).reservation_count(), 0);
        assert_eq!(fx.topology.partition(0).lock_depth(), 0);
    }

    #[tokio::test]
    async fn test_install_failure_cancels_supplier_and_releases() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);
        fx.topology.partition(0).set_fail_install(true);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Missed));
        assert_eq!(fx.exchange.dummy_exchange_count(), 1);
        assert_eq!(fx.topology.partition(0).reservation_count(), 0);
        assert_eq!(fx.topology.partition(0).lock_depth(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_abandons_round() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(2), top, [0, 1]);
        fx.transport.depart(1);

        let batch = fx.batch(top).assign(1, [0, 1]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        // First lane send failed; the second lane was never attempted.
        assert!(fx.transport.sent().is_empty());
        assert!(fx.demander.sync_future().is_done());
    }

    #[tokio::test]
    async fn test_update_seq_is_unique_per_round() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let batch = fx.batch(top).assign(1, [0]);
        let task1 = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        let fut1 = task1.future().clone();
        assert!(fx.demander.run(task1).await);

        let batch = fx.batch(top).assign(1, [0]);
        let task2 = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        let fut2 = task2.future().clone();

        assert_eq!(fut1.update_seq(), 1);
        assert_eq!(fut2.update_seq(), 2);

        // The superseded round was cancelled on replacement.
        assert!(fut1.is_done());
        assert!(!fut2.is_done());
    }

    #[tokio::test]
    async fn test_initial_future_inherits_first_round_result() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let initial = fx.demander.sync_future();
        assert!(initial.is_initial());
        assert!(!initial.is_done());

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        assert_eq!(initial.result(), Some(RebalanceResult::Succeeded));
    }

    #[tokio::test]
    async fn test_disabled_mode_completes_initial_future() {
        let fx = DemanderFixture::new(
            config(1).with_mode(RebalanceMode::None),
            TopologyVersion::new(1, 0),
            [0],
        );

        let fut = fx.demander.sync_future();
        assert!(fut.is_initial());
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));
    }

    #[tokio::test]
    async fn test_non_local_partition_is_settled_without_applying() {
        let top = TopologyVersion::new(5, 0);
        // Partition 1 is assigned but no longer local when supply arrives.
        let fx = DemanderFixture::new(config(1), top, [0]);

        let batch = fx.batch(top).assign(1, [0, 1]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_entries(1, vec![entry(b"k1", 1)])
            .with_last([0, 1]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let fut = fx.demander.sync_future();
        assert_eq!(fut.result(), Some(RebalanceResult::Succeeded));
        assert_eq!(fx.topology.owned(), vec![0]);
        assert!(fx.topology.partition(1).is_empty());
    }

    #[tokio::test]
    async fn test_on_topology_changed_cancels_current_round() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let fut = fx.demander.sync_future();
        assert!(!fut.is_done());

        fx.demander.on_topology_changed(top.next_epoch());
        assert!(fut.is_done());
    }

    #[tokio::test]
    async fn test_metrics_track_round_progress() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0, 1]);

        let batch = fx.batch(top).assign(1, [0, 1]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"k0", 1)])
            .with_entries(1, vec![entry(b"k1", 1)])
            .with_last([0, 1]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let snap = fx.demander.metrics().snapshot();
        assert_eq!(snap.rounds_started, 1);
        assert_eq!(snap.rounds_completed, 1);
        assert_eq!(snap.partitions_loaded, 2);
        assert_eq!(snap.entries_loaded, 2);
        assert_eq!(snap.suppliers_remaining, 0);
    }

    #[tokio::test]
    async fn test_preload_filter_skips_entries() {
        let top = TopologyVersion::new(5, 0);
        let fx = DemanderFixture::new(config(1), top, [0]);

        fx.demander
            .set_preload_filter(Box::new(|entry: &CacheEntry| entry.key != b"skip"));

        let batch = fx.batch(top).assign(1, [0]);
        let task = fx.demander.add_assignments(batch, false, vec![]).unwrap();
        assert!(fx.demander.run(task).await);

        let seq = fx.demander.sync_future().update_seq();
        let msg = SupplyMessage::new(1, top, seq)
            .with_entries(0, vec![entry(b"skip", 1), entry(b"keep", 1)])
            .with_last([0]);
        fx.demander.handle_supply_message(0, 1, msg).await;

        let part = fx.topology.partition(0);
        assert!(part.get(b"skip").is_none());
        assert!(part.get(b"keep").is_some());
    }
}
