//! Restore orchestration
//!
//! A restore walks the snapshot's tables in a fixed dependency order and hands
//! each one to a [`RecordSink`]. The sink owns persistence; the orchestrator
//! owns ordering, strategy, progress and the operation state machine:
//!
//! ```text
//! Idle -> InProgress -> Completed
//!                    -> Error
//!                    -> Cancelled
//! ```
//!
//! Tables applied before a failure stay applied. The report lists them so the
//! caller can decide what to do.

use crate::config::RestoreConfig;
use crate::error::{Result, SnapError};
use crate::layout::BackupLayoutManager;
use crate::progress::{CancellationToken, ProgressEvent, ProgressReporter};
use crate::snapshot::{Record, Serializer, Snapshot};
use crate::store::FileStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a sink should combine incoming records with what it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Clear the table, then insert
    Replace,
    /// Insert or overwrite by id, keep everything else
    Upsert,
}

/// Destination of restored records
pub trait RecordSink {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()>;

    /// Persist the snapshot's settings
    ///
    /// Returns `Ok(false)` when the sink keeps no settings, which the restore
    /// reports as a warning.
    fn apply_settings(
        &mut self,
        settings: &BTreeMap<String, Value>,
        mode: ApplyMode,
    ) -> Result<bool> {
        let _ = (settings, mode);
        Ok(false)
    }
}

impl<T: RecordSink + ?Sized> RecordSink for &mut T {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()> {
        (**self).apply(table, records, mode)
    }

    fn apply_settings(
        &mut self,
        settings: &BTreeMap<String, Value>,
        mode: ApplyMode,
    ) -> Result<bool> {
        (**self).apply_settings(settings, mode)
    }
}

impl<T: RecordSink + ?Sized> RecordSink for Box<T> {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()> {
        (**self).apply(table, records, mode)
    }

    fn apply_settings(
        &mut self,
        settings: &BTreeMap<String, Value>,
        mode: ApplyMode,
    ) -> Result<bool> {
        (**self).apply_settings(settings, mode)
    }
}

/// In-memory record store
///
/// Records keep insertion order; an upsert overwrites in place.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, Vec<Record>>,
    settings: BTreeMap<String, Value>,
    calls: Vec<(String, ApplyMode, usize)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with existing records
    pub fn with_table(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.tables.insert(name.into(), records);
        self
    }

    pub fn table(&self, name: &str) -> &[Record] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&self, table: &str, id: &str) -> Option<&Record> {
        self.table(table).iter().find(|r| r.id == id)
    }

    pub fn settings(&self) -> &BTreeMap<String, Value> {
        &self.settings
    }

    /// Seed settings
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// `(table, mode, record count)` for every apply call, in order
    pub fn calls(&self) -> &[(String, ApplyMode, usize)] {
        &self.calls
    }
}

impl RecordSink for MemorySink {
    fn apply(&mut self, table: &str, records: &[Record], mode: ApplyMode) -> Result<()> {
        self.calls.push((table.to_string(), mode, records.len()));
        let existing = self.tables.entry(table.to_string()).or_default();

        match mode {
            ApplyMode::Replace => *existing = records.to_vec(),
            ApplyMode::Upsert => {
                for record in records {
                    match existing.iter_mut().find(|r| r.id == record.id) {
                        Some(slot) => *slot = record.clone(),
                        None => existing.push(record.clone()),
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_settings(
        &mut self,
        settings: &BTreeMap<String, Value>,
        mode: ApplyMode,
    ) -> Result<bool> {
        if mode == ApplyMode::Replace {
            self.settings.clear();
        }
        self.settings
            .extend(settings.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(true)
    }
}

/// `failed_table` of a restore that failed while applying settings
pub const SETTINGS_SECTION: &str = "settings";

type Predicate = dyn Fn(&str, &Record) -> bool + Send + Sync;

/// Caller-supplied record filter for selective restores
#[derive(Clone)]
pub struct Selection {
    predicate: Arc<Predicate>,
}

impl Selection {
    /// Select records for which `predicate(table, record)` holds
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str, &Record) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Every record of the named tables
    pub fn tables<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        Self::new(move |table, _| names.contains(table))
    }

    /// The records of one table with the given ids
    pub fn records<I, T>(table: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let table = table.into();
        let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
        Self::new(move |t, record| t == table && ids.contains(&record.id))
    }

    pub fn matches(&self, table: &str, record: &Record) -> bool {
        (self.predicate)(table, record)
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Selection(..)")
    }
}

/// How snapshot records are combined with the live data
#[derive(Debug, Clone)]
pub enum RestoreStrategy {
    /// Each snapshot table replaces the live table
    ReplaceAll,
    /// Upsert by id; live records missing from the snapshot survive
    Merge,
    /// Upsert only the selected records
    Selective(Selection),
}

impl RestoreStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            RestoreStrategy::ReplaceAll => StrategyKind::ReplaceAll,
            RestoreStrategy::Merge => StrategyKind::Merge,
            RestoreStrategy::Selective(_) => StrategyKind::Selective,
        }
    }

    fn mode(&self) -> ApplyMode {
        match self {
            RestoreStrategy::ReplaceAll => ApplyMode::Replace,
            RestoreStrategy::Merge | RestoreStrategy::Selective(_) => ApplyMode::Upsert,
        }
    }
}

/// Serializable name of a [`RestoreStrategy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ReplaceAll,
    Merge,
    Selective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl RestoreStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RestoreStatus::Completed | RestoreStatus::Error | RestoreStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: RestoreStatus) -> bool {
        use RestoreStatus::*;
        matches!(
            (self, next),
            (Idle, InProgress)
                | (Idle, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Error)
                | (InProgress, Cancelled)
        )
    }
}

/// Live state of one restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOperation {
    pub strategy: StrategyKind,
    pub status: RestoreStatus,
    pub current_table: Option<String>,
    pub processed_records: usize,
    pub total_records: usize,
}

impl RestoreOperation {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            status: RestoreStatus::Idle,
            current_table: None,
            processed_records: 0,
            total_records: 0,
        }
    }

    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn transition(&mut self, next: RestoreStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SnapError::InvalidInput(format!(
                "restore cannot go from {:?} to {:?}",
                self.status, next
            )));
        }
        debug!("restore {:?} -> {:?}", self.status, next);
        self.status = next;
        Ok(())
    }
}

/// Final outcome of a restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub operation: RestoreOperation,

    /// Tables the sink accepted, in application order
    pub applied_tables: Vec<String>,

    /// Tables with nothing selected, left untouched
    pub skipped_tables: Vec<String>,

    pub failed_table: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,

    /// The sink accepted the snapshot's settings
    #[serde(default)]
    pub settings_restored: bool,
}

impl RestoreReport {
    pub fn status(&self) -> RestoreStatus {
        self.operation.status
    }

    /// `Ok` only for a completed restore
    pub fn into_result(self) -> Result<RestoreReport> {
        match self.operation.status {
            RestoreStatus::Completed => Ok(self),
            RestoreStatus::Cancelled => Err(SnapError::Cancelled),
            status => Err(SnapError::RestoreFailed {
                table: self.failed_table.unwrap_or_default(),
                applied_tables: self.applied_tables,
                message: self
                    .error
                    .unwrap_or_else(|| format!("restore ended in state {:?}", status)),
            }),
        }
    }
}

/// Applies snapshots to a [`RecordSink`] in dependency order
pub struct RestoreOrchestrator<K: RecordSink> {
    sink: K,
    table_order: Vec<String>,
    cancel: CancellationToken,
}

impl<K: RecordSink> RestoreOrchestrator<K> {
    pub fn new(sink: K, config: &RestoreConfig) -> Self {
        Self {
            sink,
            table_order: config.table_order.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an external token, checked between tables
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Load a backup through `layout` and restore it
    ///
    /// A load failure is returned as `Err` after an `Error` event; once the
    /// snapshot is loaded the outcome is carried by the report.
    pub fn restore_from<S, Z>(
        &mut self,
        layout: &BackupLayoutManager<S, Z>,
        path: &Path,
        strategy: &RestoreStrategy,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<RestoreReport>
    where
        S: FileStore,
        Z: Serializer,
    {
        let snapshot = match layout.load(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("cannot load backup {}: {}", path.display(), e);
                ProgressReporter::new(progress).fail(e.to_string());
                return Err(e);
            }
        };
        Ok(self.restore(&snapshot, strategy, progress))
    }

    /// Apply `snapshot` with `strategy`
    pub fn restore(
        &mut self,
        snapshot: &Snapshot,
        strategy: &RestoreStrategy,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> RestoreReport {
        let mut reporter = ProgressReporter::new(progress);
        let mut report = RestoreReport {
            operation: RestoreOperation::new(strategy.kind()),
            applied_tables: Vec::new(),
            skipped_tables: Vec::new(),
            failed_table: None,
            error: None,
            warnings: Vec::new(),
            settings_restored: false,
        };

        let projection = snapshot.metadata.projection;
        if !projection.carries_records() {
            // Hollowed tables would wipe live data under ReplaceAll
            let message = format!(
                "snapshot {} is a {:?} projection without table records",
                snapshot.id(),
                projection
            );
            error!("{}", message);
            set_status(&mut report.operation, RestoreStatus::InProgress);
            set_status(&mut report.operation, RestoreStatus::Error);
            report.error = Some(message.clone());
            reporter.fail(message);
            return report;
        }

        let plan = self.plan(snapshot, strategy, &mut report.warnings);
        report.operation.total_records = plan.iter().map(|(_, records)| records.len()).sum();
        set_status(&mut report.operation, RestoreStatus::InProgress);

        info!(
            "restoring snapshot {} ({:?}, {} tables, {} records)",
            snapshot.id(),
            strategy.kind(),
            plan.len(),
            report.operation.total_records
        );

        let mode = strategy.mode();
        for (table, records) in plan {
            if self.cancel.is_cancelled() {
                warn!(
                    "restore cancelled after {} tables",
                    report.applied_tables.len()
                );
                set_status(&mut report.operation, RestoreStatus::Cancelled);
                reporter.fail("restore cancelled");
                return report;
            }

            if matches!(strategy, RestoreStrategy::Selective(_)) && records.is_empty() {
                debug!("nothing selected in {}, left untouched", table);
                report.skipped_tables.push(table.to_string());
                continue;
            }

            report.operation.current_table = Some(table.to_string());
            if let Err(e) = self.sink.apply(table, &records, mode) {
                error!("restore failed at table {}: {}", table, e);
                report.failed_table = Some(table.to_string());
                report.error = Some(e.to_string());
                set_status(&mut report.operation, RestoreStatus::Error);
                reporter.fail(format!("table {}: {}", table, e));
                return report;
            }

            report.operation.processed_records += records.len();
            report.applied_tables.push(table.to_string());
            reporter.advance(
                report.operation.processed_records,
                report.operation.total_records,
                table,
            );
        }

        report.operation.current_table = None;
        if !snapshot.settings.is_empty() {
            if let Err(e) = self.restore_settings(snapshot, strategy, &mut report) {
                error!("restore failed at settings: {}", e);
                report.failed_table = Some(SETTINGS_SECTION.to_string());
                report.error = Some(e.to_string());
                set_status(&mut report.operation, RestoreStatus::Error);
                reporter.fail(format!("{}: {}", SETTINGS_SECTION, e));
                return report;
            }
        }

        set_status(&mut report.operation, RestoreStatus::Completed);
        info!(
            "restored {} records across {} tables",
            report.operation.processed_records,
            report.applied_tables.len()
        );
        reporter.complete(report.operation.processed_records, 0, None);
        report
    }

    fn restore_settings(
        &mut self,
        snapshot: &Snapshot,
        strategy: &RestoreStrategy,
        report: &mut RestoreReport,
    ) -> Result<()> {
        let count = snapshot.settings.len();
        if matches!(strategy, RestoreStrategy::Selective(_)) {
            report
                .warnings
                .push(format!("selective restore left {} settings untouched", count));
            return Ok(());
        }

        if self.sink.apply_settings(&snapshot.settings, strategy.mode())? {
            debug!("restored {} settings", count);
            report.settings_restored = true;
        } else {
            let message = format!("sink keeps no settings; {} settings not restored", count);
            warn!("{}", message);
            report.warnings.push(message);
        }
        Ok(())
    }

    /// Tables in application order, with the records each one will receive
    ///
    /// Repeated table names are merged into their first occurrence.
    fn plan<'s>(
        &self,
        snapshot: &'s Snapshot,
        strategy: &RestoreStrategy,
        warnings: &mut Vec<String>,
    ) -> Vec<(&'s str, Vec<Record>)> {
        let mut tables: Vec<(&str, Vec<Record>)> = Vec::with_capacity(snapshot.tables.len());
        for table in &snapshot.tables {
            match tables.iter_mut().find(|(name, _)| *name == table.name) {
                Some((_, records)) => {
                    let message = format!(
                        "table {} appears more than once; {} records merged into the first",
                        table.name,
                        table.records.len()
                    );
                    warn!("{}", message);
                    warnings.push(message);
                    records.extend(table.records.iter().cloned());
                }
                None => tables.push((table.name.as_str(), table.records.clone())),
            }
        }

        let mut ordered = Vec::with_capacity(tables.len());
        for name in &self.table_order {
            if let Some(index) = tables.iter().position(|(table, _)| table == name) {
                ordered.push(tables.remove(index));
            }
        }
        for (name, records) in tables {
            let message = format!(
                "table {} is not in the restore order; applied after ordered tables",
                name
            );
            warn!("{}", message);
            warnings.push(message);
            ordered.push((name, records));
        }

        if let RestoreStrategy::Selective(selection) = strategy {
            for (name, records) in &mut ordered {
                let table = *name;
                records.retain(|r| selection.matches(table, r));
            }
        }
        ordered
    }
}

fn set_status(operation: &mut RestoreOperation, next: RestoreStatus) {
    if let Err(e) = operation.transition(next) {
        warn!("{}", e);
    }
}
