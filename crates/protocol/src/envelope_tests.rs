// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;

#[test]
fn envelope_round_trips_through_json() {
    let hb = Heartbeat {
        probe_id: "p1".to_owned(),
        uptime: 120,
        load: [0.5, 0.4, 0.3],
        mem_used: 512,
        mem_total: 1024,
        disk_used: 10,
        disk_total: 100,
    };
    let env = Envelope::new(MessageType::Heartbeat, &hb).unwrap();
    let json = serde_json::to_string(&env).unwrap();
    let back: Envelope = serde_json::from_str(&json).unwrap();

    assert_eq!(back.id, env.id);
    assert_eq!(back.msg_type, MessageType::Heartbeat);
    let parsed: Heartbeat = back.parse_payload().unwrap();
    assert_eq!(parsed.probe_id, "p1");
    assert_eq!(parsed.mem_total, 1024);
}

#[test]
fn message_type_uses_snake_case_on_the_wire() {
    let json = serde_json::to_string(&MessageType::CommandResult).unwrap();
    assert_eq!(json, "\"command_result\"");
    let json = serde_json::to_string(&MessageType::OutputChunk).unwrap();
    assert_eq!(json, "\"output_chunk\"");
}

#[test]
fn output_chunk_final_field_is_renamed() {
    let chunk = OutputChunk {
        request_id: "req-1".to_owned(),
        stream: OutputStream::Stdout,
        data: "hello".to_owned(),
        seq: 3,
        is_final: true,
        exit_code: Some(0),
    };
    let value = serde_json::to_value(&chunk).unwrap();
    assert_eq!(value["final"], true);
    assert_eq!(value["stream"], "stdout");

    let back: OutputChunk = serde_json::from_value(value).unwrap();
    assert!(back.is_final);
    assert_eq!(back.exit_code, Some(0));
}

#[test]
fn canonical_bytes_exclude_signature() {
    let mut env = Envelope::new(MessageType::Heartbeat, &serde_json::json!({"a": 1})).unwrap();
    let unsigned = env.canonical_bytes().unwrap();
    env.signature = Some("sig".to_owned());
    let signed = env.canonical_bytes().unwrap();
    assert_eq!(unsigned, signed);
}

#[test]
fn canonical_bytes_are_stable_across_payload_key_order() {
    // serde_json sorts object keys, so two insert orders canonicalise equal.
    let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
    let mut env_a = Envelope::new(MessageType::Command, &a).unwrap();
    let mut env_b = Envelope::new(MessageType::Command, &b).unwrap();
    env_b.id = env_a.id.clone();
    env_b.timestamp = env_a.timestamp;
    env_a.payload = a;
    env_b.payload = b;

    assert_eq!(env_a.canonical_bytes().unwrap(), env_b.canonical_bytes().unwrap());
}

#[test]
fn command_request_defaults_optional_fields() {
    let parsed: CommandRequest =
        serde_json::from_str(r#"{"request_id":"r1","command":"ls","level":"observe"}"#).unwrap();
    assert!(parsed.args.is_empty());
    assert_eq!(parsed.timeout, 0);
    assert!(!parsed.stream);
}
