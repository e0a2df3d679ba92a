//! Restore ordering, strategies, cancellation and failure handling

use fieldsnap::restore::StrategyKind;
use fieldsnap::snapshot::TableData;
use fieldsnap::{
    ApplyMode, BackupLayoutManager, CancellationToken, MemorySink, ProgressEvent, Projection,
    Record, RecordSink, RestoreConfig, RestoreOrchestrator, RestoreStatus, RestoreStrategy,
    Result, Selection, SnapError, Snapshot,
};
use serde_json::json;
use tempfile::TempDir;

fn field_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::new("5.0.0");
    // Deliberately out of dependency order
    snapshot.set_table(
        "checkups",
        vec![
            Record::new("k1").with("client_id", "c1"),
            Record::new("k2").with("client_id", "c2"),
        ],
    );
    snapshot.set_table(
        "clients",
        vec![
            Record::new("c1").with("name", "Ada").with("facility_id", "f1"),
            Record::new("c2").with("name", "Grace").with("facility_id", "f1"),
        ],
    );
    snapshot.set_table("facilities", vec![Record::new("f1").with("name", "North")]);
    snapshot
}

fn orchestrator(sink: MemorySink) -> RestoreOrchestrator<MemorySink> {
    RestoreOrchestrator::new(sink, &RestoreConfig::default())
}

/// Fails on one table, records everything it accepted
struct FailingSink {
    fail_on: &'static str,
    inner: MemorySink,
}

impl RecordSink for FailingSink {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()> {
        if table == self.fail_on {
            return Err(SnapError::Sink(format!("constraint violation in {}", table)));
        }
        self.inner.apply(table, records, mode)
    }
}

/// Cancels the shared token as soon as a given table lands
struct CancellingSink {
    after: &'static str,
    token: CancellationToken,
    inner: MemorySink,
}

impl RecordSink for CancellingSink {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()> {
        self.inner.apply(table, records, mode)?;
        if table == self.after {
            self.token.cancel();
        }
        Ok(())
    }
}

#[test]
fn test_tables_apply_in_dependency_order() {
    let mut restore = orchestrator(MemorySink::new());
    let mut events = Vec::new();
    let report = restore.restore(
        &field_snapshot(),
        &RestoreStrategy::ReplaceAll,
        &mut |e| events.push(e),
    );

    assert_eq!(report.status(), RestoreStatus::Completed);
    assert_eq!(report.applied_tables, vec!["facilities", "clients", "checkups"]);
    assert_eq!(report.operation.processed_records, 5);
    assert_eq!(report.operation.total_records, 5);

    let calls: Vec<&str> = restore.sink().calls().iter().map(|c| c.0.as_str()).collect();
    assert_eq!(calls, vec!["facilities", "clients", "checkups"]);

    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::InProgress {
                processed_count, ..
            } => Some(*processed_count),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 3, 5]);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Completed { count: 5, .. })
    ));
}

#[test]
fn test_unknown_tables_go_last_with_warning() {
    let mut snapshot = field_snapshot();
    snapshot.set_table("audit_log", vec![Record::new("a1")]);
    snapshot.tables.rotate_right(1);

    let mut restore = orchestrator(MemorySink::new());
    let report = restore.restore(&snapshot, &RestoreStrategy::Merge, &mut |_| {});

    assert_eq!(report.applied_tables.last().map(String::as_str), Some("audit_log"));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("audit_log"));
}

#[test]
fn test_replace_all_clears_but_leaves_absent_tables() {
    let sink = MemorySink::new()
        .with_table("clients", vec![Record::new("stale")])
        .with_table("photos", vec![Record::new("p1")]);
    let mut restore = orchestrator(sink);

    restore
        .restore(&field_snapshot(), &RestoreStrategy::ReplaceAll, &mut |_| {})
        .into_result()
        .unwrap();

    let sink = restore.into_sink();
    assert!(sink.record("clients", "stale").is_none());
    assert_eq!(sink.table("clients").len(), 2);
    // Not in the snapshot, untouched
    assert_eq!(sink.table("photos").len(), 1);
    assert!(sink.calls().iter().all(|c| c.1 == ApplyMode::Replace));
}

#[test]
fn test_merge_preserves_unmatched_records() {
    let sink = MemorySink::new().with_table(
        "clients",
        vec![
            Record::new("c1").with("name", "Old Ada"),
            Record::new("c9").with("name", "Local only"),
        ],
    );
    let mut restore = orchestrator(sink);
    let report = restore.restore(&field_snapshot(), &RestoreStrategy::Merge, &mut |_| {});
    assert_eq!(report.operation.strategy, StrategyKind::Merge);

    let sink = restore.into_sink();
    let clients = sink.table("clients");
    assert_eq!(clients.len(), 3);
    assert_eq!(sink.record("clients", "c1").unwrap().get("name").unwrap(), "Ada");
    assert!(sink.record("clients", "c9").is_some());
}

#[test]
fn test_selective_touches_only_selected() {
    let sink = MemorySink::new().with_table("clients", vec![Record::new("c2").with("name", "Mine")]);
    let mut restore = orchestrator(sink);
    let strategy = RestoreStrategy::Selective(Selection::records("clients", ["c1"]));

    let report = restore.restore(&field_snapshot(), &strategy, &mut |_| {});

    assert_eq!(report.status(), RestoreStatus::Completed);
    assert_eq!(report.applied_tables, vec!["clients"]);
    assert_eq!(report.skipped_tables, vec!["facilities", "checkups"]);
    assert_eq!(report.operation.total_records, 1);

    let sink = restore.into_sink();
    assert_eq!(sink.calls().len(), 1);
    assert_eq!(sink.record("clients", "c2").unwrap().get("name").unwrap(), "Mine");
    assert!(sink.record("clients", "c1").is_some());
}

#[test]
fn test_sink_failure_keeps_applied_tables() {
    let sink = FailingSink {
        fail_on: "clients",
        inner: MemorySink::new(),
    };
    let mut restore = RestoreOrchestrator::new(sink, &RestoreConfig::default());
    let mut events = Vec::new();
    let report = restore.restore(
        &field_snapshot(),
        &RestoreStrategy::ReplaceAll,
        &mut |e| events.push(e),
    );

    assert_eq!(report.status(), RestoreStatus::Error);
    assert_eq!(report.applied_tables, vec!["facilities"]);
    assert_eq!(report.failed_table.as_deref(), Some("clients"));
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));

    // No rollback
    assert_eq!(restore.sink().inner.table("facilities").len(), 1);

    match report.into_result() {
        Err(SnapError::RestoreFailed {
            table,
            applied_tables,
            ..
        }) => {
            assert_eq!(table, "clients");
            assert_eq!(applied_tables, vec!["facilities".to_string()]);
        }
        other => panic!("expected RestoreFailed, got {:?}", other),
    }
}

#[test]
fn test_cancellation_at_table_boundary() {
    let token = CancellationToken::new();
    let sink = CancellingSink {
        after: "facilities",
        token: token.clone(),
        inner: MemorySink::new(),
    };
    let mut restore =
        RestoreOrchestrator::new(sink, &RestoreConfig::default()).with_cancellation(token);

    let mut events = Vec::new();
    let report = restore.restore(
        &field_snapshot(),
        &RestoreStrategy::ReplaceAll,
        &mut |e| events.push(e),
    );

    assert_eq!(report.status(), RestoreStatus::Cancelled);
    assert_eq!(report.applied_tables, vec!["facilities"]);
    assert_eq!(restore.sink().inner.calls().len(), 1);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(report.into_result(), Err(SnapError::Cancelled)));
}

#[test]
fn test_restore_from_backup_directory() {
    let temp = TempDir::new().unwrap();
    let layout = BackupLayoutManager::new(temp.path());
    let canonical = layout.create(&field_snapshot()).unwrap();

    let mut restore = orchestrator(MemorySink::new());
    let report = restore
        .restore_from(
            &layout,
            canonical.parent().unwrap(),
            &RestoreStrategy::ReplaceAll,
            &mut |_| {},
        )
        .unwrap();
    assert_eq!(report.status(), RestoreStatus::Completed);
    assert_eq!(restore.sink().table("checkups").len(), 2);

    let mut events = Vec::new();
    let missing = restore.restore_from(
        &layout,
        &temp.path().join("backup_missing"),
        &RestoreStrategy::Merge,
        &mut |e| events.push(e),
    );
    assert!(matches!(missing, Err(SnapError::NotFound(_))));
    assert!(matches!(events.as_slice(), [ProgressEvent::Error { .. }]));
}

#[test]
fn test_partial_backup_directory_is_refused() {
    let temp = TempDir::new().unwrap();
    let layout = BackupLayoutManager::new(temp.path());
    let canonical = layout.create(&field_snapshot()).unwrap();
    let dir = canonical.parent().unwrap().to_path_buf();

    // Only the record-less projections are left behind
    std::fs::remove_file(dir.join(layout.file_name(Projection::Full))).unwrap();
    std::fs::remove_file(dir.join(layout.file_name(Projection::Database))).unwrap();

    let sink = MemorySink::new().with_table("clients", vec![Record::new("c7").with("name", "Local")]);
    let mut restore = orchestrator(sink);
    let mut events = Vec::new();
    let report = restore
        .restore_from(&layout, &dir, &RestoreStrategy::ReplaceAll, &mut |e| events.push(e))
        .unwrap();

    assert_eq!(report.status(), RestoreStatus::Error);
    assert!(report.applied_tables.is_empty());
    assert!(report.error.as_deref().unwrap().contains("projection"));
    assert!(matches!(events.as_slice(), [ProgressEvent::Error { .. }]));

    // Live data untouched
    assert!(restore.sink().calls().is_empty());
    assert!(restore.sink().record("clients", "c7").is_some());
    assert!(matches!(report.into_result(), Err(SnapError::RestoreFailed { .. })));
}

#[test]
fn test_settings_follow_the_strategy() {
    let mut snapshot = field_snapshot();
    snapshot.settings.insert("theme".to_string(), json!("dark"));
    snapshot.settings.insert("sync_interval".to_string(), json!(15));
    let live = || {
        MemorySink::new()
            .with_setting("theme", "light")
            .with_setting("device_only", true)
    };

    let mut merge = orchestrator(live());
    let report = merge.restore(&snapshot, &RestoreStrategy::Merge, &mut |_| {});
    assert_eq!(report.status(), RestoreStatus::Completed);
    assert!(report.settings_restored);
    assert!(report.warnings.is_empty());
    let settings = merge.sink().settings();
    assert_eq!(settings["theme"], json!("dark"));
    assert_eq!(settings["sync_interval"], json!(15));
    assert_eq!(settings["device_only"], json!(true));

    let mut replace = orchestrator(live());
    let report = replace.restore(&snapshot, &RestoreStrategy::ReplaceAll, &mut |_| {});
    assert!(report.settings_restored);
    assert_eq!(replace.sink().settings().len(), 2);
    assert!(!replace.sink().settings().contains_key("device_only"));

    let mut selective = orchestrator(live());
    let strategy = RestoreStrategy::Selective(Selection::tables(["clients"]));
    let report = selective.restore(&snapshot, &strategy, &mut |_| {});
    assert!(!report.settings_restored);
    assert_eq!(report.warnings, vec!["selective restore left 2 settings untouched"]);
    assert_eq!(selective.sink().settings()["theme"], json!("light"));
}

#[test]
fn test_settings_without_a_settings_sink_are_reported() {
    let mut snapshot = field_snapshot();
    snapshot.settings.insert("theme".to_string(), json!("dark"));
    let sink = FailingSink {
        fail_on: "none",
        inner: MemorySink::new(),
    };
    let mut restore = RestoreOrchestrator::new(sink, &RestoreConfig::default());

    let report = restore.restore(&snapshot, &RestoreStrategy::Merge, &mut |_| {});

    assert_eq!(report.status(), RestoreStatus::Completed);
    assert!(!report.settings_restored);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("1 settings not restored"));
}

#[test]
fn test_repeated_tables_are_merged() {
    let mut snapshot = field_snapshot();
    snapshot.tables.push(TableData {
        name: "clients".to_string(),
        records: vec![Record::new("c3").with("name", "Linus")],
    });

    let mut restore = orchestrator(MemorySink::new());
    let report = restore.restore(&snapshot, &RestoreStrategy::ReplaceAll, &mut |_| {});

    assert_eq!(report.status(), RestoreStatus::Completed);
    assert_eq!(report.applied_tables, vec!["facilities", "clients", "checkups"]);
    assert_eq!(report.operation.total_records, 6);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("clients appears more than once"));

    let sink = restore.into_sink();
    assert_eq!(sink.calls().len(), 3);
    assert_eq!(sink.table("clients").len(), 3);
    assert!(sink.record("clients", "c3").is_some());
}
