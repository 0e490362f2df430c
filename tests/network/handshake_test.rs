// Discovery and Handshake Tests

use crate::support::{eventually, node, trusted_pair, RawPeer};
use meshwallet::network::{
    DeviceInfo, MemoryHub, NetworkConfig, NetworkError, P2PMessage, Payload, PeerState, Transport,
    TransportEvent,
};
use meshwallet::tx::TransactionBuilder;
use std::time::Duration;

#[tokio::test]
async fn test_announce_leads_to_mutual_trust() {
    let (_hub, a, b) = trusted_pair(NetworkConfig::new()).await;

    let seen_by_a = a.network.peer(&b.address()).await.unwrap();
    assert_eq!(seen_by_a.state(), PeerState::Trusted);
    assert_eq!(seen_by_a.version(), Some("1.0"));
    assert!(seen_by_a.agreement_key().is_some());
    assert_eq!(seen_by_a.transport(), "memory");
    assert_eq!(seen_by_a.link(), "b");

    assert_eq!(a.network.get_connected_peers().await.len(), 1);
    assert_eq!(b.network.get_connected_peers().await.len(), 1);
}

#[tokio::test]
async fn test_device_info_travels_with_discovery() {
    let hub = MemoryHub::new();
    let a = node(
        &hub,
        "a",
        NetworkConfig::new().with_device(DeviceInfo::new("field-phone", "android")),
    );
    let b = node(&hub, "b", NetworkConfig::new());
    hub.set_distance("a", "b", 12.5);
    b.network.start().await.unwrap();
    a.network.start().await.unwrap();
    a.network.announce().await.unwrap();

    let a_id = a.address();
    eventually!(b.network.peer(&a_id).await.is_some_and(|p| p.is_trusted()));

    let peer = b.network.peer(&a_id).await.unwrap();
    assert_eq!(peer.device().unwrap().name, "field-phone");
    assert_eq!(peer.distance(), Some(12.5));
}

#[tokio::test]
async fn test_incompatible_version_not_trusted() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a", NetworkConfig::new());
    let mut future = NetworkConfig::new();
    future.protocol_version = "2.0".to_string();
    let b = node(&hub, "b", future);
    a.network.start().await.unwrap();
    b.network.start().await.unwrap();
    a.network.announce().await.unwrap();

    let a_id = a.address();
    eventually!(b.network.peer(&a_id).await.is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        b.network.peer(&a_id).await.unwrap().state(),
        PeerState::Handshaking
    );
    // B's own announcement reached A, but B refused A's handshake too
    assert!(!a
        .network
        .peer(&b.address())
        .await
        .is_some_and(|p| p.is_trusted()));
    assert!(a.network.get_connected_peers().await.is_empty());
}

#[tokio::test]
async fn test_manual_handshake_is_answered() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a", NetworkConfig::new());
    let mut raw = RawPeer::attach(&hub, "c").await;
    a.network.start().await.unwrap();

    let frame = raw.handshake(&a.address(), false).to_bytes().unwrap();
    raw.transport.open("a").await.unwrap().try_send(frame).unwrap();

    // Skip the startup announcement; the reply handshake follows
    let reply = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), raw.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        if let TransportEvent::Frame { bytes, .. } = event {
            let message = P2PMessage::from_bytes(&bytes).unwrap();
            if let Payload::Handshake(handshake) = message.payload {
                assert_eq!(message.from, a.address());
                break handshake;
            }
        }
    };
    assert!(reply.reply);
    assert!(a
        .network
        .peer(&raw.keypair.address())
        .await
        .unwrap()
        .is_trusted());
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a", NetworkConfig::new());

    assert!(matches!(a.network.stop().await, Err(NetworkError::NotRunning)));
    a.network.start().await.unwrap();
    assert!(a.network.is_running().await);
    assert!(matches!(
        a.network.start().await,
        Err(NetworkError::AlreadyRunning)
    ));
    a.network.stop().await.unwrap();
    assert!(!a.network.is_running().await);
    assert!(!hub.is_registered("a"));
}

#[tokio::test]
async fn test_invalid_config_refused() {
    let hub = MemoryHub::new();
    let config = NetworkConfig::new()
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_staleness_window(Duration::from_secs(30));
    let a = node(&hub, "a", config);
    assert!(matches!(
        a.network.start().await,
        Err(NetworkError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_disconnect_then_sweep_evicts() {
    let config = NetworkConfig::new().with_staleness_window(Duration::from_secs(60));
    let (_hub, a, b) = trusted_pair(config).await;
    let b_id = b.address();

    b.network.stop().await.unwrap();
    eventually!(a.network.get_connected_peers().await.is_empty());

    // Still known until it has been silent past the window
    assert!(a.network.sweep().await.is_empty());
    assert!(a.network.peer(&b_id).await.is_some());

    let later = meshwallet::clock::now_millis() + 61_000;
    assert_eq!(a.network.sweep_at(later).await, vec![b_id.clone()]);
    assert!(a.network.peer(&b_id).await.is_none());
    assert!(a.network.get_peers().await.is_empty());
}

#[tokio::test]
async fn test_connected_but_silent_peer_swept() {
    let hub = MemoryHub::new();
    let config = NetworkConfig::new()
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(50))
        .with_staleness_window(Duration::from_millis(300));
    let a = node(&hub, "a", config);
    let raw = RawPeer::attach(&hub, "c").await;
    a.network.start().await.unwrap();

    let frame = raw.handshake(&a.address(), false).to_bytes().unwrap();
    raw.transport.open("a").await.unwrap().try_send(frame).unwrap();
    let c_id = raw.keypair.address();
    eventually!(a.network.peer(&c_id).await.is_some_and(|p| p.is_trusted()));
    assert_eq!(a.network.get_connected_peers().await.len(), 1);

    // c stays attached to the hub but never answers a heartbeat
    eventually!(a.network.peer(&c_id).await.is_none());
    assert!(hub.is_registered("c"));
    assert!(a.network.get_connected_peers().await.is_empty());
}

#[tokio::test]
async fn test_trusted_peer_reconnects_after_restart() {
    let (_hub, a, b) = trusted_pair(NetworkConfig::new()).await;
    let b_id = b.address();

    b.network.stop().await.unwrap();
    eventually!(a.network.get_connected_peers().await.is_empty());
    assert_eq!(
        a.network.peer(&b_id).await.unwrap().state(),
        PeerState::Trusted
    );

    b.network.start().await.unwrap();
    b.network.announce().await.unwrap();
    eventually!(a.network.get_connected_peers().await.len() == 1);
    eventually!(b.network.get_connected_peers().await.len() == 1);

    let tx = TransactionBuilder::new()
        .sender(&a.keypair)
        .recipient(b_id.clone())
        .amount(12)
        .build()
        .unwrap();
    a.network.try_send_transaction(&b_id, &tx).await.unwrap();
    eventually!(b.queue.get(tx.id()).unwrap().is_some());
}
