// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::panic)]

use legator_protocol::{OutputChunk, OutputStream, Signer};

use super::*;

fn chunk(request_id: &str, seq: u64, is_final: bool) -> OutputChunk {
    OutputChunk {
        request_id: request_id.to_owned(),
        stream: OutputStream::Stdout,
        data: format!("line {seq}"),
        seq,
        is_final,
        exit_code: if is_final { Some(0) } else { None },
    }
}

#[tokio::test]
async fn send_to_unknown_probe_is_not_connected() {
    let (hub, _rx) = Hub::new(None);
    let outcome = hub.send_to("ghost", MessageType::Command, &serde_json::json!({})).await;
    assert!(matches!(outcome, SendOutcome::NotConnected));
}

#[tokio::test]
async fn send_to_queues_frames_in_order() {
    let (hub, _lifecycle) = Hub::new(None);
    let (_conn, mut outbound) = hub.connect("p1").await;

    for i in 0..3 {
        let outcome = hub
            .send_to("p1", MessageType::Command, &serde_json::json!({ "seq": i }))
            .await;
        assert!(outcome.is_ok());
    }

    for i in 0..3 {
        let env = outbound.recv().await.unwrap();
        assert_eq!(env.payload["seq"], i);
    }
}

#[tokio::test]
async fn envelopes_are_signed_when_a_key_is_configured() {
    let signer = Signer::new(&[9u8; 32]).unwrap();
    let verifier = Signer::new(&[9u8; 32]).unwrap();
    let (hub, _lifecycle) = Hub::new(Some(signer));
    let (_conn, mut outbound) = hub.connect("p1").await;

    hub.send_to("p1", MessageType::PolicyUpdate, &serde_json::json!({"level": "observe"})).await;
    let env = outbound.recv().await.unwrap();
    assert!(env.signature.is_some());
    assert!(verifier.verify(&env));
}

#[tokio::test]
async fn connect_fires_connected_transition_once() {
    let (hub, mut lifecycle) = Hub::new(None);
    let (_conn, _outbound) = hub.connect("p1").await;

    match lifecycle.recv().await.unwrap() {
        SessionTransition::Connected { probe_id, reconnect } => {
            assert_eq!(probe_id, "p1");
            assert!(!reconnect);
        }
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[tokio::test]
async fn new_session_replaces_old_without_disconnect() {
    let (hub, mut lifecycle) = Hub::new(None);
    let (old_conn, _old_outbound) = hub.connect("p1").await;
    let (_new_conn, mut new_outbound) = hub.connect("p1").await;

    // Old session was cancelled; its eventual disconnect is generation-gated.
    assert!(old_conn.cancel.is_cancelled());
    hub.disconnect(&old_conn).await;
    assert!(hub.is_connected("p1").await);

    // Frames flow to the new session only.
    hub.send_to("p1", MessageType::Command, &serde_json::json!({"x": 1})).await;
    assert!(new_outbound.recv().await.is_some());

    // Transitions: Connected(false), Connected(reconnect=true), nothing else.
    let first = lifecycle.recv().await.unwrap();
    assert!(matches!(first, SessionTransition::Connected { reconnect: false, .. }));
    let second = lifecycle.recv().await.unwrap();
    assert!(matches!(second, SessionTransition::Connected { reconnect: true, .. }));
    assert!(lifecycle.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_fires_exactly_once() {
    let (hub, mut lifecycle) = Hub::new(None);
    let (conn, _outbound) = hub.connect("p1").await;
    let _ = lifecycle.recv().await;

    hub.disconnect(&conn).await;
    hub.disconnect(&conn).await;

    assert!(matches!(
        lifecycle.recv().await.unwrap(),
        SessionTransition::Disconnected { .. }
    ));
    assert!(lifecycle.try_recv().is_err());
    assert!(!hub.is_connected("p1").await);
}

#[tokio::test]
async fn chunk_fanout_reaches_all_subscribers_until_final() {
    let (hub, _lifecycle) = Hub::new(None);
    let streams = hub.streams();
    let mut sub_a = streams.subscribe("req-1", 16);
    let mut sub_b = streams.subscribe("req-1", 16);
    assert_eq!(streams.subscriber_count("req-1"), 2);

    streams.dispatch(&chunk("req-1", 0, false));
    streams.dispatch(&chunk("req-1", 1, true));

    for sub in [&mut sub_a, &mut sub_b] {
        let first = sub.rx.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        let last = sub.rx.recv().await.unwrap();
        assert!(last.is_final);
    }

    // Final chunk tore the registry entry down.
    assert_eq!(streams.subscriber_count("req-1"), 0);
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    let (hub, _lifecycle) = Hub::new(None);
    let streams = hub.streams();
    let sub = streams.subscribe("req-1", 16);
    drop(sub);
    assert_eq!(streams.subscriber_count("req-1"), 0);
}

#[tokio::test]
async fn full_outbound_queue_is_a_transport_error() {
    let (hub, _lifecycle) = Hub::new(None);
    // Keep the receiver but never drain it.
    let (_conn, _outbound) = hub.connect("p1").await;

    let mut saw_error = false;
    for _ in 0..200 {
        if let SendOutcome::TransportErr(msg) =
            hub.send_to("p1", MessageType::Command, &serde_json::json!({})).await
        {
            assert!(msg.contains("full"));
            saw_error = true;
            break;
        }
    }
    assert!(saw_error);
}
