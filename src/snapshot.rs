//! Snapshot schema and serializer
//!
//! A [`Snapshot`] is one logical capture of the dataset. Records are opaque
//! JSON documents keyed by `id`; the engine never interprets their fields.
//! The same schema serves all four projections written by the layout
//! manager, so any projection file deserializes on its own.

use crate::error::{Result, SnapError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Snapshot schema version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

/// One record, identified by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// One table of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub name: String,

    #[serde(default)]
    pub records: Vec<Record>,
}

/// Which view of a snapshot a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Identity and counts only
    Metadata,
    /// Tables without settings
    Database,
    /// Settings without table records
    Settings,
    #[default]
    Full,
}

impl Projection {
    pub const ALL: [Projection; 4] = [
        Projection::Metadata,
        Projection::Database,
        Projection::Settings,
        Projection::Full,
    ];

    /// File stem used in a backup directory
    pub fn file_stem(self) -> &'static str {
        match self {
            Projection::Metadata => "backup_metadata",
            Projection::Database => "backup_database",
            Projection::Settings => "backup_settings",
            Projection::Full => "backup_full",
        }
    }

    /// Whether table records survive this projection
    pub fn carries_records(self) -> bool {
        matches!(self, Projection::Database | Projection::Full)
    }

    pub fn carries_settings(self) -> bool {
        matches!(self, Projection::Settings | Projection::Full)
    }
}

/// Snapshot identity and summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: String,

    pub created_at: DateTime<Utc>,

    pub app_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Records per table at capture time
    #[serde(default)]
    pub record_counts: BTreeMap<String, usize>,

    /// View held by the file this was read from
    #[serde(default)]
    pub projection: Projection,
}

/// One dataset capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    pub metadata: SnapshotMetadata,

    /// Tables in capture order
    #[serde(default)]
    pub tables: Vec<TableData>,

    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Empty snapshot with a fresh id and the current time
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            metadata: SnapshotMetadata {
                id: uuid::Uuid::new_v4().simple().to_string(),
                created_at: Utc::now(),
                app_version: app_version.into(),
                device: None,
                description: None,
                record_counts: BTreeMap::new(),
                projection: Projection::Full,
            },
            tables: Vec::new(),
            settings: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Add a table, replacing any table of the same name
    pub fn set_table(&mut self, name: impl Into<String>, records: Vec<Record>) {
        let name = name.into();
        match self.tables.iter_mut().find(|t| t.name == name) {
            Some(table) => table.records = records,
            None => self.tables.push(TableData { name, records }),
        }
        self.refresh_counts();
    }

    pub fn table(&self, name: &str) -> Option<&TableData> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn total_records(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }

    /// Recompute `metadata.record_counts` from the tables
    pub fn refresh_counts(&mut self) {
        self.metadata.record_counts = self
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.records.len()))
            .collect();
    }

    /// Record counts, falling back to the metadata for hollowed projections
    pub fn record_counts(&self) -> BTreeMap<String, usize> {
        match self.metadata.projection {
            Projection::Full | Projection::Database => self
                .tables
                .iter()
                .map(|t| (t.name.clone(), t.records.len()))
                .collect(),
            Projection::Metadata | Projection::Settings => self.metadata.record_counts.clone(),
        }
    }

    /// Hollow out the sections not carried by `projection`
    ///
    /// Table names survive in every projection; only records and settings
    /// are emptied.
    pub fn project(&self, projection: Projection) -> Snapshot {
        let mut view = self.clone();
        view.metadata.projection = projection;

        let keep_records = projection.carries_records();
        let keep_settings = projection.carries_settings();

        if !keep_records {
            for table in &mut view.tables {
                table.records.clear();
            }
        }
        if !keep_settings {
            view.settings.clear();
        }
        view
    }
}

/// Snapshot <-> bytes
pub trait Serializer: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &str;

    fn serialize(&self, snapshot: &Snapshot) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Snapshot>;
}

/// JSON serializer
#[derive(Debug, Clone, Copy)]
pub struct JsonSerializer {
    pub pretty: bool,
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn extension(&self) -> &str {
        "json"
    }

    fn serialize(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(snapshot)?
        } else {
            serde_json::to_vec(snapshot)?
        };
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Snapshot> {
        serde_json::from_slice(bytes)
            .map_err(|e| SnapError::Corrupt(format!("malformed snapshot: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new("3.4.1");
        snapshot.set_table(
            "clients",
            vec![
                Record::new("c1").with("name", "Ada"),
                Record::new("c2").with("name", "Grace"),
            ],
        );
        snapshot.set_table("checkups", vec![Record::new("k1").with("client_id", "c1")]);
        snapshot
            .settings
            .insert("units".to_string(), json!("metric"));
        snapshot
    }

    #[test]
    fn test_record_fields_flatten() {
        let record = Record::new("c1").with("name", "Ada").with("visits", 3);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": "c1", "name": "Ada", "visits": 3}));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_set_table_replaces_and_counts() {
        let mut snapshot = sample();
        snapshot.set_table("clients", vec![Record::new("c9")]);
        assert_eq!(snapshot.tables.len(), 2);
        assert_eq!(snapshot.metadata.record_counts["clients"], 1);
        assert_eq!(snapshot.total_records(), 2);
    }

    #[test]
    fn test_projections_hollow_sections() {
        let snapshot = sample();

        let metadata = snapshot.project(Projection::Metadata);
        assert_eq!(metadata.tables.len(), 2);
        assert_eq!(metadata.total_records(), 0);
        assert!(metadata.settings.is_empty());
        assert_eq!(metadata.record_counts()["clients"], 2);

        let database = snapshot.project(Projection::Database);
        assert_eq!(database.total_records(), 3);
        assert!(database.settings.is_empty());

        let settings = snapshot.project(Projection::Settings);
        assert_eq!(settings.total_records(), 0);
        assert_eq!(settings.settings.len(), 1);

        let full = snapshot.project(Projection::Full);
        assert_eq!(full, snapshot);
    }

    #[test]
    fn test_json_roundtrip_every_projection() {
        let serializer = JsonSerializer::default();
        let snapshot = sample();
        for projection in Projection::ALL {
            let view = snapshot.project(projection);
            let bytes = serializer.serialize(&view).unwrap();
            assert_eq!(serializer.deserialize(&bytes).unwrap(), view);
        }
    }

    #[test]
    fn test_malformed_is_corrupt() {
        let err = JsonSerializer::default().deserialize(b"{not json").unwrap_err();
        assert!(matches!(err, SnapError::Corrupt(_)));
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let snapshot = JsonSerializer::default()
            .deserialize(
                br#"{"metadata": {"id": "x", "created_at": "2026-01-05T10:00:00Z", "app_version": "1.0"}}"#,
            )
            .unwrap();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(snapshot.tables.is_empty());
        assert_eq!(snapshot.metadata.projection, Projection::Full);
    }
}
