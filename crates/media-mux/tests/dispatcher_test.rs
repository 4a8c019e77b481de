//! MediaDispatcher over real loopback sockets

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use rvoip_media_mux::stun::{verify_fingerprint, verify_message_integrity, StunAttributeType, StunClass};
use rvoip_media_mux::{
    AssociationId, AssociationIdWidth, DispatcherState, Error, IdlePruner, MediaDispatcher, ProtectionProfile,
    SrtpPolicy, StunMessage, UdpForwarder,
};

use common::{
    eventually, loopback_config, peer, recv_within, sample_keys, EchoKeyServer, RecordingTunnel, TunnelCall,
    RECV_TIMEOUT, SILENCE,
};

const DTLS_RECORD: [u8; 2] = [0x14, 0x00];
const SRTP_PACKET: [u8; 4] = [0x80, 0x60, 0x00, 0x01];

/// Make the dispatcher learn a peer without triggering any reply
async fn register(dispatcher: &MediaDispatcher, socket: &UdpSocket, expected: usize) {
    let target = dispatcher.local_addr().unwrap();
    socket.send_to(&[0x02], target).await.unwrap();
    assert!(eventually(|| dispatcher.registry().len() >= expected).await);
}

#[tokio::test]
async fn test_dtls_echo_through_key_server() {
    let server = EchoKeyServer::start().await;
    let forwarder = UdpForwarder::connect(server.addr).await.unwrap();
    let dispatcher = MediaDispatcher::new(loopback_config(), Arc::new(forwarder.clone())).unwrap();
    forwarder.set_distributor(Arc::new(dispatcher.clone()));
    assert_ok!(dispatcher.listen(0).await);
    let target = dispatcher.local_addr().unwrap();

    let (peer_a, addr_a) = peer().await;
    let (peer_b, addr_b) = peer().await;

    for (socket, addr) in [
        (&peer_a, addr_a),
        (&peer_a, addr_a),
        (&peer_b, addr_b),
        (&peer_b, addr_b),
        (&peer_a, addr_a),
        (&peer_b, addr_b),
        (&peer_a, addr_a),
    ] {
        socket.send_to(&DTLS_RECORD, target).await.unwrap();
        let reply = recv_within(socket, RECV_TIMEOUT).await.expect("echoed record");
        assert_eq!(reply, vec![0x14, 0x00, 0x01], "reply for {}", addr);
    }

    let registry = dispatcher.registry();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.address_of(&AssociationId::derive(&addr_a, AssociationIdWidth::Wide)),
        Some(addr_a)
    );
    assert_eq!(
        registry.address_of(&AssociationId::derive(&addr_b, AssociationIdWidth::Wide)),
        Some(addr_b)
    );
    drop(registry);

    dispatcher.stop().await;
    forwarder.stop().await;
}

#[tokio::test]
async fn test_stun_binding_round_trip() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let config = loopback_config().with_software("media-mux-test");
    let dispatcher = MediaDispatcher::new(config, tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, addr) = peer().await;
    let request = StunMessage::binding_request();
    socket
        .send_to(&request.encode().unwrap(), dispatcher.local_addr().unwrap())
        .await
        .unwrap();

    let raw = recv_within(&socket, RECV_TIMEOUT).await.expect("binding response");
    let reply = StunMessage::decode(&raw).unwrap();

    assert_eq!(reply.class, StunClass::SuccessResponse);
    assert_eq!(reply.transaction_id, request.transaction_id);
    let mapped = reply
        .get_attribute(StunAttributeType::XorMappedAddress)
        .unwrap()
        .get_xor_mapped_address(&reply.transaction_id)
        .unwrap();
    assert_eq!(mapped, addr);

    assert!(verify_fingerprint(&raw));
    assert!(verify_message_integrity(&raw, dispatcher.ice_password().as_bytes()));
    assert!(!verify_message_integrity(&raw, b"not-the-password"));

    // The STUN sender is registered like any other peer
    assert!(dispatcher.registry().contains(&AssociationId::derive(&addr, AssociationIdWidth::Wide)));

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_stun_indication_gets_no_reply() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, _) = peer().await;
    let indication = StunMessage::new(StunClass::Indication, rvoip_media_mux::stun::StunMethod::Binding);
    socket
        .send_to(&indication.encode().unwrap(), dispatcher.local_addr().unwrap())
        .await
        .unwrap();

    assert!(recv_within(&socket, SILENCE).await.is_none());
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_client_hello_offers_profiles() {
    let (tunnel, mut calls) = RecordingTunnel::new();
    let profiles = vec![ProtectionProfile::Aes128CmSha1_80, ProtectionProfile::AeadAes128Gcm];
    let config = loopback_config().with_protection_profiles(profiles.clone());
    let dispatcher = MediaDispatcher::new(config, tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, addr) = peer().await;
    let id = AssociationId::derive(&addr, AssociationIdWidth::Wide);
    let target = dispatcher.local_addr().unwrap();

    let mut hello = vec![0u8; 32];
    hello[0] = 0x16;
    hello[13] = 0x01;
    socket.send_to(&hello, target).await.unwrap();
    socket.send_to(&DTLS_RECORD, target).await.unwrap();

    let first = timeout(RECV_TIMEOUT, calls.recv()).await.unwrap().unwrap();
    assert_eq!(first, TunnelCall::ClientHello(id, Bytes::from(hello), profiles));

    let second = timeout(RECV_TIMEOUT, calls.recv()).await.unwrap().unwrap();
    assert_eq!(second, TunnelCall::Send(id, Bytes::from_static(&DTLS_RECORD)));

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_srtp_broadcast_excludes_sender() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (peer_a, _) = peer().await;
    let (peer_b, _) = peer().await;
    let (peer_c, _) = peer().await;
    register(&dispatcher, &peer_a, 1).await;
    register(&dispatcher, &peer_b, 2).await;
    register(&dispatcher, &peer_c, 3).await;

    peer_a
        .send_to(&SRTP_PACKET, dispatcher.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(recv_within(&peer_b, RECV_TIMEOUT).await, Some(SRTP_PACKET.to_vec()));
    assert_eq!(recv_within(&peer_c, RECV_TIMEOUT).await, Some(SRTP_PACKET.to_vec()));
    assert!(recv_within(&peer_a, SILENCE).await.is_none());

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_srtp_unicast_returns_to_association() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let config = loopback_config().with_srtp_policy(SrtpPolicy::Unicast);
    let dispatcher = MediaDispatcher::new(config, tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (peer_a, _) = peer().await;
    let (peer_b, _) = peer().await;
    register(&dispatcher, &peer_b, 1).await;

    peer_a
        .send_to(&SRTP_PACKET, dispatcher.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(recv_within(&peer_a, RECV_TIMEOUT).await, Some(SRTP_PACKET.to_vec()));
    assert!(recv_within(&peer_b, SILENCE).await.is_none());

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_send_with_keys_stores_keys() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, addr) = peer().await;
    register(&dispatcher, &socket, 1).await;
    let id = AssociationId::derive(&addr, AssociationIdWidth::Wide);

    let record = Bytes::from_static(&[0x16, 0xfe, 0xfd, 0x00]);
    assert_ok!(
        dispatcher
            .send_with_keys(id, record.clone(), ProtectionProfile::AeadAes128Gcm, sample_keys())
            .await
    );
    assert_eq!(recv_within(&socket, RECV_TIMEOUT).await, Some(record.to_vec()));

    let registry = dispatcher.registry();
    let negotiated = registry.keys_of(&id).expect("keys stored");
    assert_eq!(negotiated.profile, ProtectionProfile::AeadAes128Gcm);
    assert_eq!(negotiated.keys, sample_keys());
    drop(registry);

    // A rejected payload leaves the stored keys alone
    assert_err!(
        dispatcher
            .send_with_keys(id, Bytes::from_static(&SRTP_PACKET), ProtectionProfile::Aes128CmSha1_32, sample_keys())
            .await
    );
    assert_eq!(
        dispatcher.registry().keys_of(&id).map(|k| k.profile),
        Some(ProtectionProfile::AeadAes128Gcm)
    );

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_send_unknown_client_writes_nothing() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, addr) = peer().await;
    let id = AssociationId::derive(&addr, AssociationIdWidth::Wide);

    let err = assert_err!(dispatcher.send(id, Bytes::from_static(&DTLS_RECORD)).await);
    assert!(matches!(err, Error::UnknownClient(_)));
    assert!(recv_within(&socket, SILENCE).await.is_none());

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_narrow_ids() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let config = loopback_config().with_association_id_width(AssociationIdWidth::Narrow);
    let dispatcher = MediaDispatcher::new(config, tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);

    let (socket, addr) = peer().await;
    register(&dispatcher, &socket, 1).await;

    let id = AssociationId::derive(&addr, AssociationIdWidth::Narrow);
    assert!(id.as_bytes()[2..].iter().all(|&b| b == 0));
    assert_ok!(dispatcher.send(id, Bytes::from_static(&DTLS_RECORD)).await);
    assert_eq!(recv_within(&socket, RECV_TIMEOUT).await, Some(DTLS_RECORD.to_vec()));

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_idle_pruner_forgets_silent_peers() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel)
        .unwrap()
        .with_maintenance(Arc::new(IdlePruner::new(Duration::from_millis(50))));
    assert_ok!(dispatcher.listen(0).await);

    let (socket, _) = peer().await;
    register(&dispatcher, &socket, 1).await;

    assert!(eventually(|| dispatcher.registry().is_empty()).await);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_stop_closes_socket() {
    let (tunnel, _calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);
    let local = dispatcher.local_addr().unwrap();

    let (socket, addr) = peer().await;
    register(&dispatcher, &socket, 1).await;
    let id = AssociationId::derive(&addr, AssociationIdWidth::Wide);

    timeout(Duration::from_secs(2), dispatcher.stop()).await.unwrap();
    timeout(Duration::from_secs(2), dispatcher.stop()).await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    // The port is free again once the socket is closed
    let rebound = UdpSocket::bind(local).await;
    assert!(rebound.is_ok());

    let err = assert_err!(dispatcher.send(id, Bytes::from_static(&DTLS_RECORD)).await);
    assert!(matches!(err, Error::NotListening));
}

#[tokio::test]
async fn test_no_processing_after_stop() {
    let (tunnel, mut calls) = RecordingTunnel::new();
    let dispatcher = MediaDispatcher::new(loopback_config(), tunnel).unwrap();
    assert_ok!(dispatcher.listen(0).await);
    let local = dispatcher.local_addr().unwrap();

    dispatcher.stop().await;

    let (socket, _) = peer().await;
    let _ = socket.send_to(&DTLS_RECORD, local).await;

    assert!(timeout(SILENCE, calls.recv()).await.is_err());
    assert!(dispatcher.registry().is_empty());
}
