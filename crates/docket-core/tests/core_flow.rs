use chrono::{Duration, NaiveDate, TimeZone, Utc};
use docket_core::datastore::{
    CollectionKind, DataStore, import_snapshot, read_bundle_file, write_bundle,
};
use docket_core::datetime::Clock;
use docket_core::deadline::{Urgency, task_deadline_status};
use docket_core::state::{SequentialIds, TaskBoard};
use docket_core::task::{Deadline, Group, Priority, Task, TaskDraft, ViewState};
use tempfile::tempdir;

fn clock() -> Clock {
    // 10:00 on 2024-06-10 in civil time.
    Clock::fixed(
        Utc.with_ymd_and_hms(2024, 6, 10, 3, 0, 0)
            .single()
            .expect("valid now"),
    )
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn seeded_board() -> TaskBoard<SequentialIds> {
    let mut board = TaskBoard::with_ids(clock(), SequentialIds::default());
    let work = board.create_group("Work").expect("create group");
    let home = board.create_group("Home").expect("create group");
    board
        .create_task(
            TaskDraft::new("Inbox zero", work.id).with_deadline(Deadline::Date(date(2024, 6, 14))),
        )
        .expect("create task");
    let pickup = Utc
        .with_ymd_and_hms(2024, 6, 11, 12, 0, 0)
        .single()
        .expect("valid instant");
    board
        .create_task(
            TaskDraft::new("Groceries", home.id)
                .with_priority(Priority::Low)
                .with_link("https://example.com/list")
                .with_deadline(Deadline::At(pickup)),
        )
        .expect("create task");
    let done = board
        .create_task(TaskDraft::new("Taxes", home.id).with_priority(Priority::Urgent))
        .expect("create task");
    board.toggle_task(done.id).expect("complete");
    board
}

#[test]
fn urgent_report_due_in_two_days_is_near_and_first() {
    let mut board = seeded_board();
    let work = board
        .find_group_by_name("work")
        .map(|group| group.id)
        .expect("work group");
    let due = board.clock().today() + Duration::days(2);

    let report = board
        .create_task(
            TaskDraft::new("Report", work)
                .with_priority(Priority::Urgent)
                .with_deadline(Deadline::Date(due)),
        )
        .expect("create report");

    let status = task_deadline_status(&report, board.clock()).expect("has deadline");
    assert_eq!(status.urgency, Urgency::Near);
    assert_eq!(status.days_until, 2);

    let view = board.view();
    assert_eq!(view.incomplete.first().map(|t| t.id), Some(report.id));
    assert_eq!(view.completed.len(), 1);
}

#[test]
fn cascade_delete_keeps_board_consistent() {
    let mut board = seeded_board();
    let home = board
        .find_group_by_name("HOME")
        .map(|group| group.id)
        .expect("home group");
    board.set_selected_group(Some(home));

    let removal = board.delete_group(home).expect("delete group");
    assert_eq!(removal.removed_tasks.len(), 2);
    assert!(removal.filter_cleared);

    let snapshot = board.snapshot();
    snapshot.validate().expect("board stays importable");
    assert!(
        snapshot
            .tasks
            .iter()
            .all(|task| snapshot.groups.iter().any(|g| g.id == task.group_id))
    );
    assert!(snapshot.tasks.iter().all(Task::completion_is_consistent));
}

#[test]
fn datastore_roundtrip() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    assert!(store.load_snapshot().tasks.is_empty());

    let board = seeded_board();
    store.save_snapshot(&board.snapshot());

    let tasks: Vec<Task> = store.load(CollectionKind::Tasks).expect("load tasks");
    let groups: Vec<Group> = store.load(CollectionKind::Groups).expect("load groups");
    assert_eq!(tasks, board.tasks());
    assert_eq!(groups, board.groups());

    let restored = TaskBoard::from_collections(clock(), tasks, groups);
    assert_eq!(restored.snapshot(), board.snapshot());
}

#[test]
fn export_then_import_reproduces_collections() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let board = seeded_board();
    store.save_snapshot(&board.snapshot());

    let bundle = store.export_snapshot(clock().now_utc());
    assert_eq!(bundle.version, "1.0");
    let bytes = serde_json::to_vec(&bundle).expect("serialize bundle");
    let snapshot = import_snapshot(&bytes).expect("import bundle");
    assert_eq!(snapshot, board.snapshot());
    assert!(
        snapshot
            .tasks
            .iter()
            .any(|task| matches!(task.deadline, Some(Deadline::Date(_))))
    );
    assert!(
        snapshot
            .tasks
            .iter()
            .any(|task| matches!(task.deadline, Some(Deadline::At(_))))
    );

    let path = temp.path().join("backup.json");
    write_bundle(&path, &bundle).expect("write bundle");
    let from_file = read_bundle_file(&path).expect("read bundle");
    assert_eq!(from_file, board.snapshot());

    let raw: serde_json::Value =
        serde_json::from_slice(&fs_read(&path)).expect("bundle is JSON");
    assert!(raw.get("exportedAt").is_some());
    assert!(raw["tasks"][0].get("createdAt").is_some());
}

#[test]
fn failed_import_leaves_board_untouched() {
    let mut board = seeded_board();
    let before = board.snapshot();

    let err = import_snapshot(br#"{"tasks": {}, "groups": []}"#).expect_err("bad shape");
    assert!(err.to_string().contains("tasks"), "{err}");

    let mut bad = before.clone();
    bad.tasks[0].completed = true;
    bad.tasks[0].completed_at = None;
    assert!(board.import(bad).is_err());
    assert_eq!(board.snapshot(), before);

    board
        .import(seeded_board().snapshot())
        .expect("valid import");
}

#[test]
fn unreadable_collections_fall_back_to_empty() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    std::fs::write(&store.tasks_path, "{ not json").expect("corrupt tasks");

    let tasks: Vec<Task> = store.load_or_default(CollectionKind::Tasks);
    assert!(tasks.is_empty());
    assert!(store.load::<Task>(CollectionKind::Tasks).is_err());
}

#[test]
fn deadline_instants_persist_as_rfc3339() {
    let mut board = seeded_board();
    let work = board
        .find_group_by_name("Work")
        .map(|group| group.id)
        .expect("work group");
    let at = Utc
        .with_ymd_and_hms(2024, 6, 20, 9, 30, 0)
        .single()
        .expect("valid instant");
    board
        .create_task(TaskDraft::new("Call", work).with_deadline(Deadline::At(at)))
        .expect("create task");
    board
        .create_task(TaskDraft::new("Pay", work).with_deadline(Deadline::Date(date(2024, 6, 21))))
        .expect("create task");

    let json = serde_json::to_value(board.tasks()).expect("serialize");
    let deadlines: Vec<&str> = json
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|task| task.get("deadline").and_then(|d| d.as_str()))
        .collect();
    assert_eq!(
        deadlines,
        [
            "2024-06-14",
            "2024-06-11T12:00:00Z",
            "2024-06-20T09:30:00Z",
            "2024-06-21"
        ]
    );
}

#[test]
fn degraded_storage_loads_as_an_importable_board() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let board = seeded_board();
    store.save_snapshot(&board.snapshot());

    // Home is gone and the Work task claims completion without a time.
    let work: Vec<&Group> = board.groups().iter().filter(|g| g.name == "Work").collect();
    std::fs::write(
        &store.groups_path,
        serde_json::to_vec(&work).expect("serialize groups"),
    )
    .expect("write groups");
    let mut raw: serde_json::Value =
        serde_json::from_slice(&fs_read(&store.tasks_path)).expect("tasks are JSON");
    raw[0]["completed"] = serde_json::Value::Bool(true);
    std::fs::write(&store.tasks_path, raw.to_string()).expect("write tasks");

    let snapshot = store.load_snapshot();
    snapshot.validate().expect("repaired on load");
    assert_eq!(snapshot.groups.len(), 1);
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.tasks[0].title, "Inbox zero");
    assert!(!snapshot.tasks[0].completed);

    let restored = TaskBoard::from_collections(clock(), snapshot.tasks, snapshot.groups);
    store.save_snapshot(&restored.snapshot());
    let bytes = serde_json::to_vec(&store.export_snapshot(clock().now_utc()))
        .expect("serialize bundle");
    let reimported = import_snapshot(&bytes).expect("own export imports");
    assert_eq!(reimported, restored.snapshot());

    std::fs::write(&store.groups_path, "{oops").expect("corrupt groups");
    let emptied = store.load_snapshot();
    assert!(emptied.groups.is_empty() && emptied.tasks.is_empty());
}

#[test]
fn failed_writes_leave_the_board_working() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    std::fs::remove_dir_all(&store.data_dir).expect("remove data dir");

    let mut board = seeded_board();
    let work = board.find_group_by_name("Work").map(|group| group.id);
    board.set_selected_group(work);
    store.save_snapshot(&board.snapshot());
    store.save_view_state(&board.view_state());
    assert!(!store.tasks_path.exists());
    assert!(!store.view_path.exists());

    let home = board
        .find_group_by_name("Home")
        .map(|group| group.id)
        .expect("home group");
    board
        .create_task(TaskDraft::new("After the failure", home))
        .expect("board still accepts changes");
    assert_eq!(board.tasks().len(), 4);
    assert!(store.load_snapshot().tasks.is_empty());
}

#[test]
fn view_state_round_trips_through_the_store() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    assert_eq!(store.load_view_state(), ViewState::default());

    let mut board = seeded_board();
    let home = board.find_group_by_name("Home").map(|group| group.id);
    board.set_selected_group(home);
    board.set_search_query("groc");
    store.save_view_state(&board.view_state());

    let raw: serde_json::Value =
        serde_json::from_slice(&fs_read(&store.view_path)).expect("view is JSON");
    assert_eq!(raw["searchQuery"], "groc");

    let mut restored =
        TaskBoard::from_collections(clock(), board.tasks().to_vec(), board.groups().to_vec());
    restored.restore_view(store.load_view_state());
    assert_eq!(restored.view_state(), board.view_state());
    assert_eq!(restored.view().len(), 1);

    std::fs::write(&store.view_path, "not json").expect("corrupt view");
    assert_eq!(store.load_view_state(), ViewState::default());
}

fn fs_read(path: &std::path::Path) -> Vec<u8> {
    std::fs::read(path).expect("read file")
}
