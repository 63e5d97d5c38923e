//! Simulation tests for the node sync core.
//!
//! Each test wires the real engines over the in-memory store and a real hub
//! with channel-backed connections, runs one control-plane operation, and
//! asserts on the concrete messages the node agents would receive.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use orris_domain::{
    derive_node_forward_password, derive_user_password, Node, Plan, PlanFeatures, PlanType,
    Protocol, ResourceGroup, ResourceType, Subscription, SubscriptionStatus,
};
use orris_sync::{
    ChangeType, ConfigSyncEngine, DeactivationNotifier, EventPublisher, Hub, HubStatusEvent,
    MemoryStore, NodeConnection, QuotaCache, QuotaEnforcer, RemoteChangeHandler,
    SubscriptionChangeEvent, SubscriptionChangeHandler, SubscriptionChangeKind,
    SubscriptionRecord, SubscriptionSyncData, SubscriptionSyncEngine, SyncEnvelope, SyncError,
    SyncPayload, TrafficCache, TrafficDelta, VersionOracle, NODE_FORWARDING_SID,
};

const SECRET: &str = "simulation-hmac-secret";
const GIB: u64 = 1024 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPublisher {
    subscription_events: Mutex<Vec<SubscriptionChangeEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_subscription_change(
        &self,
        event: &SubscriptionChangeEvent,
    ) -> Result<(), SyncError> {
        self.subscription_events.lock().push(event.clone());
        Ok(())
    }

    async fn publish_hub_status(&self, _event: &HubStatusEvent) -> Result<(), SyncError> {
        Ok(())
    }
}

struct FixedTrafficCache {
    recent: u64,
}

#[async_trait]
impl TrafficCache for FixedTrafficCache {
    async fn batch_increment(&self, _entries: &[TrafficDelta]) -> Result<(), SyncError> {
        Ok(())
    }
    async fn recent_traffic(&self, _subscription_id: u64) -> Result<u64, SyncError> {
        Ok(self.recent)
    }
}

#[derive(Default)]
struct RecordingQuotaCache {
    flags: Mutex<Vec<(u64, bool)>>,
}

#[async_trait]
impl QuotaCache for RecordingQuotaCache {
    async fn set_suspended(
        &self,
        subscription_id: u64,
        suspended: bool,
    ) -> Result<(), SyncError> {
        self.flags.lock().push((subscription_id, suspended));
        Ok(())
    }
}

struct Cluster {
    store: Arc<MemoryStore>,
    hub: Arc<Hub>,
    publisher: Arc<RecordingPublisher>,
    config_sync: Arc<ConfigSyncEngine>,
    subscription_sync: Arc<SubscriptionSyncEngine>,
}

fn cluster() -> Cluster {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let hub = Arc::new(Hub::new("cp-sim".to_string(), publisher.clone()));
    let oracle = Arc::new(VersionOracle::new());
    let config_sync = Arc::new(ConfigSyncEngine::new(
        hub.clone(),
        store.clone(),
        oracle.clone(),
    ));
    let subscription_sync = Arc::new(SubscriptionSyncEngine::new(
        hub.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        publisher.clone(),
        SECRET.to_string(),
    ));
    Cluster {
        store,
        hub,
        publisher,
        config_sync,
        subscription_sync,
    }
}

fn shadowsocks_node(id: u64, sid: &str, token_hash: &str) -> Node {
    Node {
        id,
        sid: sid.to_string(),
        name: format!("node-{id}"),
        address: format!("198.51.100.{id}"),
        port: 8388,
        protocol: Protocol::Shadowsocks,
        encryption_method: Some("aes-256-gcm".to_string()),
        token_hash: token_hash.to_string(),
        route_config: None,
        dns_config: None,
    }
}

fn subscription(id: u64, plan_id: u64, uuid: Uuid) -> Subscription {
    Subscription {
        id,
        sid: format!("s_{id}"),
        name: format!("user-{id}"),
        plan_id,
        uuid,
        expire_at: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
        status: SubscriptionStatus::Active,
        resource_type: ResourceType::Node,
    }
}

fn node_plan(id: u64, device_limit: i64, traffic_limit_bytes: u64) -> Plan {
    Plan {
        id,
        name: format!("plan-{id}"),
        plan_type: PlanType::Node,
        features: PlanFeatures {
            device_limit,
            speed_limit: 0,
            traffic_limit_bytes,
            unlimited_traffic: false,
        },
    }
}

fn group(id: u64, plan_ids: Vec<u64>, node_ids: Vec<u64>) -> ResourceGroup {
    ResourceGroup {
        id,
        name: format!("group-{id}"),
        is_active: true,
        plan_ids,
        node_ids,
    }
}

async fn connect(hub: &Hub, node: &Node) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(16);
    hub.register(NodeConnection {
        node_id: node.id,
        node_sid: node.sid.clone(),
        node_name: node.name.clone(),
        agent_id: format!("agent-{}", node.id),
        sender: tx,
    })
    .await;
    rx
}

fn recv_subscription_sync(rx: &mut mpsc::Receiver<Vec<u8>>) -> SubscriptionSyncData {
    let bytes = rx.try_recv().expect("expected an outbound message");
    let envelope: SyncEnvelope = serde_json::from_slice(&bytes).unwrap();
    match envelope.data {
        SyncPayload::Subscription(data) => data,
        SyncPayload::Config(_) => panic!("expected subscription sync payload"),
    }
}

// ---------------------------------------------------------------------------
// Node reconnect full sync returns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_node_reconnect_full_sync_returns() {
    let c = cluster();
    let node = shadowsocks_node(7, "n_aaa", "T7");
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(group(10, vec![1], vec![7]));

    let u11 = Uuid::from_u128(0x11);
    let u12 = Uuid::from_u128(0x12);
    c.store.add_subscription(subscription(11, 1, u11));
    c.store.add_subscription(subscription(12, 1, u12));

    let mut rx = connect(&c.hub, &node).await;
    c.subscription_sync.sync_on_connect(7).await.unwrap();

    let data = recv_subscription_sync(&mut rx);
    assert_eq!(data.change_type, ChangeType::Added);
    assert_eq!(data.subscriptions.len(), 3);

    let records: Vec<&SubscriptionRecord> = data.subscriptions.iter().collect();
    assert_eq!(records[0].subscription_sid, "s_11");
    assert_eq!(
        records[0].password,
        derive_user_password(&u11, SECRET, "aes-256-gcm")
    );
    assert_eq!(records[0].device_limit, 3);
    assert_eq!(records[0].expire_time, 2_000_000_000);

    assert_eq!(records[1].subscription_sid, "s_12");
    assert_eq!(
        records[1].password,
        derive_user_password(&u12, SECRET, "aes-256-gcm")
    );
    assert_eq!(records[1].device_limit, 3);

    // The synthetic node-forwarding record always trails the user records.
    assert_eq!(records[2].subscription_sid, NODE_FORWARDING_SID);
    assert_eq!(
        records[2].password,
        derive_node_forward_password("T7", "aes-256-gcm")
    );
    assert_eq!(records[2].name, "node-forward-n_aaa");
    assert_eq!(records[2].device_limit, 0);
    assert_eq!(records[2].expire_time, 0);
}

#[tokio::test]
async fn simulate_full_sync_skips_forward_record_for_vmess() {
    let c = cluster();
    let mut node = shadowsocks_node(8, "n_bbb", "T8");
    node.protocol = Protocol::Vmess;
    node.encryption_method = None;
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 2, 0));
    c.store.add_group(group(10, vec![1], vec![8]));
    c.store
        .add_subscription(subscription(21, 1, Uuid::from_u128(0x21)));

    let mut rx = connect(&c.hub, &node).await;
    c.subscription_sync.sync_on_connect(8).await.unwrap();

    let data = recv_subscription_sync(&mut rx);
    assert_eq!(data.subscriptions.len(), 1);
    assert_eq!(data.subscriptions[0].subscription_sid, "s_21");
}

// ---------------------------------------------------------------------------
// Activation fan-out returns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_activation_fan_out_returns() {
    let c = cluster();
    let node5 = shadowsocks_node(5, "n_5", "T5");
    let node6 = shadowsocks_node(6, "n_6", "T6");
    let node7 = shadowsocks_node(7, "n_7", "T7");
    c.store.add_node(node5.clone());
    c.store.add_node(node6);
    c.store.add_node(node7.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(group(10, vec![1], vec![5, 6, 7]));

    let sub = subscription(42, 1, Uuid::from_u128(0x42));
    c.store.add_subscription(sub.clone());

    // Nodes 5 and 7 online; node 6 stays offline.
    let mut rx5 = connect(&c.hub, &node5).await;
    let mut rx7 = connect(&c.hub, &node7).await;

    c.subscription_sync
        .notify_subscription_activation(&sub)
        .await
        .unwrap();

    // Exactly one bus publish, change_type=activation.
    let events = c.publisher.subscription_events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subscription_id, 42);
    assert_eq!(events[0].change_type, SubscriptionChangeKind::Activation);

    // One added message per online recipient, none for the offline node.
    for rx in [&mut rx5, &mut rx7] {
        let data = recv_subscription_sync(rx);
        assert_eq!(data.change_type, ChangeType::Added);
        assert_eq!(data.subscriptions.len(), 1);
        assert_eq!(data.subscriptions[0].subscription_sid, "s_42");
    }
    assert!(rx5.try_recv().is_err(), "exactly one message per node");
    assert!(rx7.try_recv().is_err());
}

#[tokio::test]
async fn simulate_fan_out_skips_inactive_groups_returns() {
    let c = cluster();
    let node5 = shadowsocks_node(5, "n_5", "T5");
    c.store.add_node(node5.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(ResourceGroup {
        id: 10,
        name: "dormant".to_string(),
        is_active: false,
        plan_ids: vec![1],
        node_ids: vec![5],
    });

    let sub = subscription(42, 1, Uuid::from_u128(0x42));
    c.store.add_subscription(sub.clone());
    let mut rx5 = connect(&c.hub, &node5).await;

    c.subscription_sync
        .notify_subscription_activation(&sub)
        .await
        .unwrap();

    // The event still goes out; no node receives a message.
    assert_eq!(c.publisher.subscription_events.lock().len(), 1);
    assert!(rx5.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Quota suspension returns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_quota_suspension_returns() {
    let c = cluster();
    let node = shadowsocks_node(5, "n_5", "T5");
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 3, 10 * GIB));
    c.store.add_group(group(10, vec![1], vec![5]));

    let sub = subscription(42, 1, Uuid::from_u128(0x42));
    c.store.add_subscription(sub.clone());
    c.store.set_historical_traffic(42, 4 * GIB);

    let mut rx = connect(&c.hub, &node).await;

    let quota_cache = Arc::new(RecordingQuotaCache::default());
    let notifier: Arc<dyn DeactivationNotifier> = c.subscription_sync.clone();
    let enforcer = QuotaEnforcer::new(
        c.store.clone(),
        c.store.clone(),
        c.store.clone(),
        Arc::new(FixedTrafficCache { recent: 7 * GIB }),
        quota_cache.clone(),
        notifier,
    );

    enforcer.check_and_enforce(42).await.unwrap();

    // 7 GiB recent + 4 GiB historical > 10 GiB limit.
    assert_eq!(
        c.store.subscription_status(42),
        Some(SubscriptionStatus::Suspended)
    );
    assert!(c
        .store
        .status_reason(42)
        .unwrap()
        .contains(&(11 * GIB).to_string()));
    assert_eq!(*quota_cache.flags.lock(), vec![(42, true)]);

    // Deactivation reached the serving node as a removal.
    let data = recv_subscription_sync(&mut rx);
    assert_eq!(data.change_type, ChangeType::Removed);
    assert_eq!(data.subscriptions[0].subscription_sid, "s_42");

    // The suspension event was published for peer instances.
    let events = c.publisher.subscription_events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change_type, SubscriptionChangeKind::Deactivation);
}

// ---------------------------------------------------------------------------
// Plan feature change returns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_plan_feature_change_resyncs_device_limit_returns() {
    let c = cluster();
    let node = shadowsocks_node(7, "n_aaa", "T7");
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(group(10, vec![1], vec![7]));
    c.store
        .add_subscription(subscription(11, 1, Uuid::from_u128(0x11)));

    let mut rx = connect(&c.hub, &node).await;
    c.subscription_sync.sync_on_connect(7).await.unwrap();
    let before = recv_subscription_sync(&mut rx);
    assert_eq!(before.subscriptions[0].device_limit, 3);

    // Admin raises the device limit from 3 to 5; no per-subscription edits.
    c.store.add_plan(node_plan(1, 5, 0));
    c.subscription_sync
        .notify_plan_features_changed(1)
        .await
        .unwrap();

    let after = recv_subscription_sync(&mut rx);
    assert_eq!(after.change_type, ChangeType::Added);
    assert_eq!(after.subscriptions[0].subscription_sid, "s_11");
    assert_eq!(after.subscriptions[0].device_limit, 5);
}

// ---------------------------------------------------------------------------
// Bus redelivery idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_remote_event_redelivery_is_idempotent() {
    let c = cluster();
    let node = shadowsocks_node(5, "n_5", "T5");
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(group(10, vec![1], vec![5]));
    let sub = subscription(42, 1, Uuid::from_u128(0x42));
    c.store.add_subscription(sub.clone());

    let mut rx = connect(&c.hub, &node).await;
    let handler = RemoteChangeHandler::new(c.store.clone(), c.subscription_sync.clone());

    let event = SubscriptionChangeEvent {
        subscription_id: 42,
        subscription_sid: "s_42".to_string(),
        change_type: SubscriptionChangeKind::Update,
        timestamp: 1_700_000_000,
    };
    handler.handle(event.clone()).await;
    handler.handle(event).await;

    // Redelivery recomputes from the repository: two identical updates.
    let first = recv_subscription_sync(&mut rx);
    let second = recv_subscription_sync(&mut rx);
    assert_eq!(first.change_type, ChangeType::Updated);
    assert_eq!(second.change_type, ChangeType::Updated);
    assert_eq!(first.subscriptions, second.subscriptions);

    // Handlers never re-publish to the bus.
    assert!(c.publisher.subscription_events.lock().is_empty());
}

// ---------------------------------------------------------------------------
// Full sync then change notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_full_sync_then_change_returns_post_change_state() {
    let c = cluster();
    let node = shadowsocks_node(7, "n_aaa", "T7");
    c.store.add_node(node.clone());
    c.store.add_plan(node_plan(1, 3, 0));
    c.store.add_group(group(10, vec![1], vec![7]));
    let sub = subscription(11, 1, Uuid::from_u128(0x11));
    c.store.add_subscription(sub.clone());

    let mut rx = connect(&c.hub, &node).await;

    // Full config sync (version 1) then full subscription sync on connect.
    c.config_sync.full_sync_to_node(7).await.unwrap();
    c.subscription_sync.sync_on_connect(7).await.unwrap();

    let config_bytes = rx.try_recv().unwrap();
    let envelope: SyncEnvelope = serde_json::from_slice(&config_bytes).unwrap();
    match envelope.data {
        SyncPayload::Config(data) => {
            assert!(data.full_sync);
            assert_eq!(data.version, 1);
            assert!(data.config.peers.is_empty());
        }
        SyncPayload::Subscription(_) => panic!("expected config sync first"),
    }
    let initial = recv_subscription_sync(&mut rx);
    assert_eq!(initial.change_type, ChangeType::Added);

    // A subsequent update lands after the full sync, carrying final state.
    let mut updated = sub.clone();
    updated.expire_at = Utc.timestamp_opt(2_100_000_000, 0).unwrap();
    c.store.add_subscription(updated.clone());
    c.subscription_sync
        .notify_subscription_update(&updated)
        .await
        .unwrap();

    let change = recv_subscription_sync(&mut rx);
    assert_eq!(change.change_type, ChangeType::Updated);
    assert_eq!(change.subscriptions[0].expire_time, 2_100_000_000);
}
