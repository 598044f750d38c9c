mod common;

use common::{
    BASE_TS, ack_message, event_message, eventually, harness, harness_with, status_message,
};
use domain::{
    CommandPayload, CommandState, Device, DeviceStatus, DoorState, EventKind, Intent, KeyMutation,
};
use domophone_bus::BusMessage;
use domophone_control::ControlError;
use domophone_protocol::MessageType;
use domophone_reconcile::ReconcileOutcome;
use domophone_storage::PersistenceSink;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

const ADDR: &str = "AA:BB:CC";

fn keys_of(device: &Device) -> BTreeSet<String> {
    device.keys().keys().cloned().collect()
}

fn set(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn add_keys(apartment: u32, keys: &[&str]) -> Intent {
    Intent::new(
        ADDR,
        CommandPayload::AddKeys {
            apartment,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        },
        "admin",
    )
}

fn remove_keys(apartment: u32, keys: &[&str]) -> Intent {
    Intent::new(
        ADDR,
        CommandPayload::RemoveKeys {
            apartment,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        },
        "admin",
    )
}

#[tokio::test]
async fn first_status_creates_device_and_status_log() {
    let h = harness();
    let outcome = h
        .reconciler
        .on_message(status_message(
            ADDR,
            1,
            json!({ "status": "online", "door": "closed", "keys": [] }),
        ))
        .await;
    assert_eq!(outcome, ReconcileOutcome::StatusApplied);

    let device = h.registry.get(ADDR).expect("device created");
    assert_eq!(device.status, DeviceStatus::Online);
    assert_eq!(device.door, DoorState::Closed);
    assert!(device.keys().is_empty());
    assert_eq!(device.last_sequence, Some(1));

    let logs = h.sink.status_logs.list_status_logs(0).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].device_address, ADDR);
    assert_eq!(logs[0].sequence, Some(1));
    let stored = h.sink.devices.load_all_devices().await.expect("devices");
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn replayed_and_older_status_reports_are_dropped() {
    let h = harness();
    let report = status_message(ADDR, 5, json!({ "status": "online", "door": "open" }));
    h.reconciler.on_message(report.clone()).await;
    let once = h.registry.get(ADDR).expect("device");

    let replay = h.reconciler.on_message(report).await;
    assert_eq!(replay, ReconcileOutcome::Duplicate);
    let older = h
        .reconciler
        .on_message(status_message(ADDR, 4, json!({ "status": "offline" })))
        .await;
    assert_eq!(older, ReconcileOutcome::Stale);

    assert_eq!(h.registry.get(ADDR), Some(once));
    let logs = h.sink.status_logs.list_status_logs(0).await.expect("logs");
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn timestamp_only_messages_use_timestamp_watermark_and_fingerprint() {
    let h = harness();
    let payload = |ts: i64, status: &str| {
        json!({ "device_address": ADDR, "type": "status", "ts": ts, "payload": { "status": status } })
            .to_string()
            .into_bytes()
    };
    let topic = format!("status/{ADDR}");
    let first = BusMessage::new(topic.clone(), payload(BASE_TS, "online"));
    assert_eq!(
        h.reconciler.on_message(first.clone()).await,
        ReconcileOutcome::StatusApplied
    );
    assert_eq!(
        h.reconciler.on_message(first).await,
        ReconcileOutcome::Duplicate
    );
    assert_eq!(
        h.reconciler
            .on_message(BusMessage::new(topic.clone(), payload(BASE_TS - 1, "offline")))
            .await,
        ReconcileOutcome::Stale
    );
    assert_eq!(
        h.reconciler
            .on_message(BusMessage::new(topic, payload(BASE_TS, "offline")))
            .await,
        ReconcileOutcome::StatusApplied
    );
    assert_eq!(h.registry.get(ADDR).map(|d| d.status), Some(DeviceStatus::Offline));
}

#[tokio::test]
async fn reported_keys_seed_only_the_first_report() {
    let h = harness();
    h.reconciler
        .on_message(status_message(
            ADDR,
            1,
            json!({ "status": "online", "keys": { "1": ["A"] } }),
        ))
        .await;
    h.reconciler
        .on_message(status_message(
            ADDR,
            2,
            json!({ "status": "online", "keys": { "1": ["Z"] } }),
        ))
        .await;

    let device = h.registry.get(ADDR).expect("device");
    assert_eq!(keys_of(&device), set(&["A"]));
    let logs = h.sink.status_logs.list_status_logs(0).await.expect("logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "key_set_drift");
    assert_eq!(logs[0].keys.get(&1), Some(&vec!["Z".to_string()]));
}

#[tokio::test]
async fn key_ack_before_first_report_is_not_overwritten_by_reported_keys() {
    let h = harness();
    h.seed(Device::new(ADDR, "DP-200", "Entrance"));
    let handle = h.dispatcher.submit(add_keys(12, &["K1"])).await.expect("submitted");
    let outcome = h
        .reconciler
        .on_message(ack_message(ADDR, handle.command_id(), true))
        .await;
    assert_eq!(outcome, ReconcileOutcome::AckApplied);
    assert_eq!(keys_of(&h.registry.get(ADDR).expect("device")), set(&["K1"]));

    let outcome = h
        .reconciler
        .on_message(status_message(
            ADDR,
            1,
            json!({ "status": "online", "door": "closed", "keys": [] }),
        ))
        .await;
    assert_eq!(outcome, ReconcileOutcome::StatusApplied);

    let device = h.registry.get(ADDR).expect("device");
    assert_eq!(device.status, DeviceStatus::Online);
    assert_eq!(keys_of(&device), set(&["K1"]));
    let stored = h.sink.devices.load_all_devices().await.expect("devices");
    assert_eq!(keys_of(&stored[0]), set(&["K1"]));
    let logs = h.sink.status_logs.list_status_logs(0).await.expect("logs");
    assert_eq!(logs[0].message, "key_set_drift");
}

#[tokio::test]
async fn add_then_remove_keys_through_the_bus() {
    let h = harness();
    h.seed(Device::new(ADDR, "DP-200", "Entrance"));
    h.wire_bus_with_peer().await;

    let handle = h
        .dispatcher
        .submit(add_keys(12, &["K1", "K2"]))
        .await
        .expect("submitted");
    let record = handle.wait().await.expect("acknowledged");
    assert_eq!(record.state, CommandState::Acknowledged);
    let registry = h.registry.clone();
    assert!(
        eventually(|| registry
            .get(ADDR)
            .is_some_and(|d| keys_of(&d) == set(&["K1", "K2"])))
        .await
    );
    let device = h.registry.get(ADDR).expect("device");
    assert!(device.apartments().get(&12).is_some_and(|k| k.len() == 2));

    let handle = h
        .dispatcher
        .submit(remove_keys(12, &["K1"]))
        .await
        .expect("submitted");
    handle.wait().await.expect("acknowledged");
    assert!(
        eventually(|| registry
            .get(ADDR)
            .is_some_and(|d| keys_of(&d) == set(&["K2"])))
        .await
    );
}

#[tokio::test]
async fn key_acks_commute() {
    let mut results = Vec::new();
    for reversed in [false, true] {
        let h = harness();
        let mut device = Device::new(ADDR, "m", "l");
        device.apply_key_mutation(&KeyMutation::Add {
            apartment: 1,
            keys: vec!["A".to_string()],
        });
        h.seed(device);

        let add = h.dispatcher.submit(add_keys(1, &["B"])).await.expect("add");
        let remove = h
            .dispatcher
            .submit(remove_keys(1, &["A"]))
            .await
            .expect("remove");
        let mut order = vec![add.command_id().to_string(), remove.command_id().to_string()];
        if reversed {
            order.reverse();
        }
        for command_id in order {
            let outcome = h
                .reconciler
                .on_message(ack_message(ADDR, &command_id, true))
                .await;
            assert_eq!(outcome, ReconcileOutcome::AckApplied);
        }
        results.push(keys_of(&h.registry.get(ADDR).expect("device")));
    }
    assert_eq!(results[0], set(&["B"]));
    assert_eq!(results[0], results[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_key_acks_lose_no_update() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));

    let mut command_ids = Vec::new();
    for i in 0..100 {
        let key = format!("K{i}");
        let handle = h
            .dispatcher
            .submit(add_keys(1 + i % 5, &[key.as_str()]))
            .await
            .expect("submitted");
        command_ids.push(handle.command_id().to_string());
    }

    let mut tasks = Vec::new();
    for command_id in command_ids {
        let reconciler = h.reconciler.clone();
        tasks.push(tokio::spawn(async move {
            reconciler
                .on_message(ack_message(ADDR, &command_id, true))
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("join"), ReconcileOutcome::AckApplied);
    }
    let device = h.registry.get(ADDR).expect("device");
    assert_eq!(device.keys().len(), 100);
    assert_eq!(device.apartments().values().map(|k| k.len()).sum::<usize>(), 100);
}

#[tokio::test]
async fn replayed_ack_is_ignored() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));
    let handle = h.dispatcher.submit(add_keys(3, &["K1"])).await.expect("submitted");
    let ack = ack_message(ADDR, handle.command_id(), true);

    assert_eq!(
        h.reconciler.on_message(ack.clone()).await,
        ReconcileOutcome::AckApplied
    );
    let once = h.registry.get(ADDR);
    assert_eq!(
        h.reconciler.on_message(ack).await,
        ReconcileOutcome::AckIgnored
    );
    assert_eq!(h.registry.get(ADDR), once);
    assert_eq!(
        h.reconciler
            .on_message(ack_message(ADDR, "unknown-command", true))
            .await,
        ReconcileOutcome::AckIgnored
    );
}

#[tokio::test]
async fn late_ack_after_timeout_changes_nothing() {
    let h = harness_with(PersistenceSink::in_memory(), Duration::from_millis(50));
    h.seed(Device::new(ADDR, "m", "l"));
    let handle = h.dispatcher.submit(add_keys(3, &["K1"])).await.expect("submitted");
    let command_id = handle.command_id().to_string();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ControlError::CommandTimedOut(_)));

    let outcome = h
        .reconciler
        .on_message(ack_message(ADDR, &command_id, true))
        .await;
    assert_eq!(outcome, ReconcileOutcome::AckIgnored);
    assert!(h.registry.get(ADDR).is_some_and(|d| d.keys().is_empty()));
    let status = h.dispatcher.status(&command_id).await.expect("status");
    assert_eq!(status.record.state, CommandState::TimedOut);
}

#[tokio::test]
async fn rejected_ack_applies_no_change() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));
    let handle = h
        .dispatcher
        .submit(Intent::new(ADDR, CommandPayload::MakeUnactive, "admin"))
        .await
        .expect("submitted");
    let outcome = h
        .reconciler
        .on_message(ack_message(ADDR, handle.command_id(), false))
        .await;
    assert_eq!(outcome, ReconcileOutcome::AckRejected);
    assert!(h.registry.get(ADDR).is_some_and(|d| d.active));
}

#[tokio::test]
async fn make_unactive_ack_deactivates_device() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));
    let handle = h
        .dispatcher
        .submit(Intent::new(ADDR, CommandPayload::MakeUnactive, "admin"))
        .await
        .expect("submitted");
    h.reconciler
        .on_message(ack_message(ADDR, handle.command_id(), true))
        .await;

    let err = h
        .dispatcher
        .submit(Intent::new(ADDR, CommandPayload::OpenDoor, "admin"))
        .await
        .err()
        .expect("inactive");
    assert!(matches!(err, ControlError::DeviceInactive(_)));
}

#[tokio::test]
async fn events_are_logged_and_only_door_events_change_state() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));

    let outcome = h
        .reconciler
        .on_message(event_message(
            ADDR,
            MessageType::KeyEvent,
            1,
            json!({ "key_id": "K9", "apartment": 4 }),
        ))
        .await;
    assert_eq!(outcome, ReconcileOutcome::EventRecorded);
    assert!(h.registry.get(ADDR).is_some_and(|d| d.keys().is_empty()));

    h.reconciler
        .on_message(event_message(
            ADDR,
            MessageType::DoorEvent,
            2,
            json!({ "event": "door_opened" }),
        ))
        .await;
    assert_eq!(h.registry.get(ADDR).map(|d| d.door), Some(DoorState::Open));

    h.reconciler
        .on_message(event_message(ADDR, MessageType::CallEvent, 3, json!({ "flat_number": 12 })))
        .await;
    let events = h.sink.events.list_events(0).await.expect("events");
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Call, EventKind::DoorOpened, EventKind::KeyUsed]);
    assert_eq!(events[2].key_id.as_deref(), Some("K9"));
}

#[tokio::test]
async fn legacy_payloads_are_classified_by_topic() {
    let h = harness();
    let status = json!({
        "mac": ADDR,
        "status": true,
        "door_status": "open",
        "model": "DP-100",
        "adress": "Main st. 1"
    });
    let outcome = h
        .reconciler
        .on_message(BusMessage::new(
            format!("status/{ADDR}"),
            status.to_string().into_bytes(),
        ))
        .await;
    assert_eq!(outcome, ReconcileOutcome::StatusApplied);
    let device = h.registry.get(ADDR).expect("device");
    assert_eq!(device.status, DeviceStatus::Online);
    assert_eq!(device.door, DoorState::Open);
    assert_eq!(device.location, "Main st. 1");

    let event = BusMessage::new(
        format!("events/{ADDR}"),
        json!({ "event": "key_used", "key": 42, "flat": 7, "ts": 1_700_000_100 })
            .to_string()
            .into_bytes(),
    );
    assert_eq!(
        h.reconciler.on_message(event.clone()).await,
        ReconcileOutcome::EventRecorded
    );
    assert_eq!(
        h.reconciler.on_message(event).await,
        ReconcileOutcome::Duplicate
    );
    let events = h.sink.events.list_events(0).await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key_id.as_deref(), Some("42"));
    assert_eq!(events[0].ts_ms, 1_700_000_100_000);
}

#[tokio::test]
async fn malformed_message_does_not_block_the_stream() {
    let h = harness();
    let garbage = BusMessage::new(format!("status/{ADDR}"), b"{not json".to_vec());
    assert_eq!(
        h.reconciler.on_message(garbage).await,
        ReconcileOutcome::ProtocolError
    );
    let mismatch = BusMessage::new(
        format!("status/{ADDR}"),
        json!({ "device_address": "OTHER", "type": "status", "payload": { "status": "online" } })
            .to_string()
            .into_bytes(),
    );
    assert_eq!(
        h.reconciler.on_message(mismatch).await,
        ReconcileOutcome::ProtocolError
    );
    assert_eq!(
        h.reconciler
            .on_message(status_message(ADDR, 1, json!({ "status": "online" })))
            .await,
        ReconcileOutcome::StatusApplied
    );
}

#[tokio::test]
async fn command_loopback_is_ignored() {
    let h = harness();
    h.seed(Device::new(ADDR, "m", "l"));
    h.dispatcher
        .submit(Intent::new(ADDR, CommandPayload::OpenDoor, "admin"))
        .await
        .expect("submitted");
    let published = h.bus.published_to(&format!("commands/{ADDR}"));
    let loopback = BusMessage::new(format!("events/{ADDR}"), published[0].payload.clone());
    assert_eq!(
        h.reconciler.on_message(loopback).await,
        ReconcileOutcome::Ignored
    );
}
