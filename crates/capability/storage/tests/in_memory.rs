use domain::{
    CommandPayload, CommandRecord, CommandState, Device, DeviceEvent, DeviceStatus, DoorState,
    EventKind, StatusLog,
};
use domophone_storage::PersistenceSink;
use std::collections::BTreeMap;

fn event(id: &str, ts_ms: i64) -> DeviceEvent {
    DeviceEvent {
        event_id: id.to_string(),
        device_address: "AA:BB:CC".to_string(),
        kind: EventKind::KeyUsed,
        apartment: Some(12),
        key_id: Some("K1".to_string()),
        ts_ms,
    }
}

fn command(id: &str, issued_at_ms: i64) -> CommandRecord {
    CommandRecord {
        command_id: id.to_string(),
        device_address: "AA:BB:CC".to_string(),
        payload: CommandPayload::OpenDoor,
        state: CommandState::Pending,
        issued_by: "admin".to_string(),
        issued_at_ms,
        deadline_ms: issued_at_ms + 10_000,
        resolved_at_ms: None,
        cancelled: false,
    }
}

#[tokio::test]
async fn device_save_overwrites_and_loads_sorted() {
    let sink = PersistenceSink::in_memory();
    let mut device = Device::new("BB", "m1", "loc");
    sink.devices.save_device(&device).await.expect("save");
    sink.devices
        .save_device(&Device::new("AA", "m0", "loc"))
        .await
        .expect("save");
    device.status = DeviceStatus::Online;
    sink.devices.save_device(&device).await.expect("save again");

    let devices = sink.devices.load_all_devices().await.expect("load");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].address, "AA");
    assert_eq!(devices[1].status, DeviceStatus::Online);
}

#[tokio::test]
async fn event_append_is_idempotent_by_id() {
    let sink = PersistenceSink::in_memory();
    sink.events.append_event(&event("e-1", 10)).await.expect("append");
    sink.events.append_event(&event("e-1", 10)).await.expect("replay");
    sink.events.append_event(&event("e-2", 20)).await.expect("append");

    let events = sink.events.list_events(0).await.expect("list");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, "e-2");

    let limited = sink.events.list_events(1).await.expect("list");
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn status_logs_are_listed_newest_first() {
    let sink = PersistenceSink::in_memory();
    for (id, at) in [("l-1", 100), ("l-2", 300), ("l-3", 200)] {
        sink.status_logs
            .append_status_log(&StatusLog {
                log_id: id.to_string(),
                device_address: "AA".to_string(),
                logged_at_ms: at,
                sequence: None,
                status: DeviceStatus::Online,
                door: DoorState::Closed,
                keys: BTreeMap::new(),
                message: String::new(),
            })
            .await
            .expect("append");
    }
    let logs = sink.status_logs.list_status_logs(2).await.expect("list");
    let ids: Vec<&str> = logs.iter().map(|log| log.log_id.as_str()).collect();
    assert_eq!(ids, vec!["l-2", "l-3"]);
}

#[tokio::test]
async fn command_save_updates_terminal_state() {
    let sink = PersistenceSink::in_memory();
    let mut record = command("c-1", 1_000);
    sink.commands.save_command(&record).await.expect("save");
    record.state = CommandState::Acknowledged;
    record.resolved_at_ms = Some(1_500);
    sink.commands.save_command(&record).await.expect("update");
    sink.commands
        .save_command(&command("c-2", 2_000))
        .await
        .expect("save");

    let found = sink
        .commands
        .find_command("c-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(found.state, CommandState::Acknowledged);

    record.state = CommandState::Pending;
    sink.commands.save_command(&record).await.expect("stale save");
    let found = sink.commands.find_command("c-1").await.expect("find");
    assert_eq!(found.map(|r| r.state), Some(CommandState::Acknowledged));
    let listed = sink.commands.list_commands(10).await.expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].command_id, "c-2");
    assert!(sink.commands.find_command("missing").await.expect("find").is_none());
}

#[tokio::test]
async fn older_device_snapshot_never_overwrites_newer() {
    let sink = PersistenceSink::in_memory();
    let mut older = Device::new("AA", "m", "loc");
    older.revision = 3;
    let mut newer = older.clone();
    newer.revision = 4;
    newer.status = DeviceStatus::Online;

    sink.devices.save_device(&newer).await.expect("save newer");
    sink.devices.save_device(&older).await.expect("late older save");
    let devices = sink.devices.load_all_devices().await.expect("load");
    assert_eq!(devices[0].revision, 4);
    assert_eq!(devices[0].status, DeviceStatus::Online);

    // 同一版本重复写入仍然生效
    sink.devices.save_device(&newer).await.expect("resave");
    assert_eq!(sink.devices.load_all_devices().await.expect("load").len(), 1);
}

#[tokio::test]
async fn expire_pending_times_out_only_overdue_records() {
    let sink = PersistenceSink::in_memory();
    let overdue = command("c-overdue", 1_000);
    let open = command("c-open", 50_000);
    let mut done = command("c-done", 500);
    done.state = CommandState::Acknowledged;
    done.resolved_at_ms = Some(600);
    for record in [&overdue, &open, &done] {
        sink.commands.save_command(record).await.expect("save");
    }

    let expired = sink
        .commands
        .expire_pending(20_000, 30_000)
        .await
        .expect("expire");
    assert_eq!(expired, 1);

    let found = sink
        .commands
        .find_command("c-overdue")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(found.state, CommandState::TimedOut);
    assert_eq!(found.resolved_at_ms, Some(30_000));
    let open = sink.commands.find_command("c-open").await.expect("find");
    assert_eq!(open.map(|r| r.state), Some(CommandState::Pending));
    let done = sink.commands.find_command("c-done").await.expect("find");
    assert_eq!(done.map(|r| r.resolved_at_ms), Some(Some(600)));
}

#[tokio::test]
async fn cancelled_flag_is_stored_with_pending_record() {
    let sink = PersistenceSink::in_memory();
    let mut record = command("c-1", 1_000);
    sink.commands.save_command(&record).await.expect("save");
    record.cancelled = true;
    sink.commands.save_command(&record).await.expect("cancel");
    let found = sink.commands.find_command("c-1").await.expect("find");
    assert_eq!(found.map(|r| r.cancelled), Some(true));
}
