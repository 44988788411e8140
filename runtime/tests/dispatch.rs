//! Integration tests for the dispatcher-facing join node
//!
//! Drives [`JoinNode`] the way a message dispatcher would: one call per
//! inbound JSON message, from several tasks at once.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use correlate_core::config::CorrelateConfig;
use correlate_core::join::Aggregator;
use correlate_core::{Duration, JoinError};
use correlate_runtime::node::JsonAggregator;
use correlate_runtime::{DispatchError, InboundMessage, JoinNode};
use correlate_testing::{init_test_tracing, ManualClock};
use serde_json::{json, Value};
use std::sync::Arc;

const CONFIG: &str = r#"
[join]
expected_topics = ["quote", "inventory", "pricing"]
group_timeout_secs = 60
"#;

fn node_from_toml() -> JoinNode {
    let config = CorrelateConfig::from_toml_str(CONFIG).unwrap();
    JoinNode::from_config(&config.join).unwrap()
}

#[tokio::test]
async fn test_concurrent_fragments_complete_exactly_once() {
    init_test_tracing();
    let node = node_from_toml();
    let topics = ["pricing", "quote", "inventory"];

    let mut tasks = Vec::new();
    for id in 0..50 {
        for (i, topic) in topics.iter().enumerate() {
            let node = node.clone();
            let message = json!({"_msgid": format!("req-{id}"), "topic": topic, "payload": i});
            tasks.push(tokio::spawn(async move { node.handle(message) }));
        }
    }

    let mut completed = Vec::new();
    for task in tasks {
        if let Some(payloads) = task.await.unwrap().unwrap() {
            completed.push(payloads);
        }
    }

    assert_eq!(completed.len(), 50);
    for payloads in completed {
        // quote, inventory, pricing
        assert_eq!(payloads, vec![json!(1), json!(2), json!(0)]);
    }
    let join = node.aggregator().unwrap();
    assert_eq!(join.pending_groups(), 0);
}

#[tokio::test]
async fn test_run_after_join_completes() {
    let node = node_from_toml();

    for (topic, payload) in [("quote", json!({"qty": 3})), ("pricing", json!({"unit": 4}))] {
        let result = node
            .run(json!({"_msgid": "r1", "topic": topic, "payload": payload}), |_| -> anyhow::Result<()> {
                panic!("work must wait for the full join")
            })
            .unwrap();
        assert!(result.is_none());
    }

    let total = node
        .run(
            json!({"_msgid": "r1", "topic": "inventory", "payload": {"in_stock": true}}),
            |payloads| {
                let qty = payloads[0]["qty"].as_i64().unwrap_or_default();
                let unit = payloads[2]["unit"].as_i64().unwrap_or_default();
                anyhow::ensure!(payloads[1]["in_stock"] == Value::Bool(true), "out of stock");
                Ok(qty * unit)
            },
        )
        .unwrap();
    assert_eq!(total, Some(12));
}

#[tokio::test]
async fn test_timed_out_group_restarts_on_late_fragment() {
    let clock = ManualClock::starting_at_test_epoch();
    let join: JsonAggregator<ManualClock> = Aggregator::new(["left".to_string(), "right".to_string()])
        .unwrap()
        .with_group_timeout(Duration::seconds(10))
        .with_clock(clock.clone());
    let node = JoinNode::new(Arc::new(join));

    let first = node.submit(InboundMessage::new("m", "left", json!("stale"))).unwrap();
    assert!(first.is_none());

    clock.advance(Duration::seconds(11));

    // The stale group is gone; this fragment starts a new one
    let second = node.submit(InboundMessage::new("m", "right", json!("R"))).unwrap();
    assert!(second.is_none());

    let ready = node.submit(InboundMessage::new("m", "left", json!("L"))).unwrap();
    assert_eq!(ready, Some(vec![json!("L"), json!("R")]));
}

#[tokio::test]
async fn test_strict_node_from_env_rejects_unknown_topic() {
    let config = CorrelateConfig::from_lookup(|name| match name {
        "CORRELATE_EXPECTED_TOPICS" => Some("a,b".to_string()),
        "CORRELATE_STRICT_TOPICS" => Some("true".to_string()),
        _ => None,
    })
    .unwrap();
    let node = JoinNode::from_config(&config.join).unwrap();

    let err = node
        .handle(json!({"_msgid": "x", "topic": "z", "payload": null}))
        .unwrap_err();
    match err {
        DispatchError::Join(JoinError::UnexpectedTopic { correlation_id, topic }) => {
            assert_eq!(correlation_id, "\"x\"");
            assert_eq!(topic, "\"z\"");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing was recorded for the rejected fragment
    assert_eq!(node.aggregator().unwrap().pending_groups(), 0);
}
