//! Multi-projection backup layout
//!
//! Each backup is one directory under the backups root:
//!
//! ```text
//! backups/
//! └── backup_<id>_<YYYYmmdd_HHMMSS>/
//!     ├── backup_metadata.json   identity and record counts
//!     ├── backup_database.json   tables, no settings
//!     ├── backup_settings.json   settings, no records
//!     ├── backup_full.json       everything (canonical)
//!     └── INFO.txt               human-readable summary, never parsed
//! ```

use crate::error::{Result, SnapError};
use crate::snapshot::{JsonSerializer, Projection, Serializer, Snapshot};
use crate::store::{FileStore, FsStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of every backup directory name
pub const BACKUP_DIR_PREFIX: &str = "backup_";

/// Human-readable summary file
pub const INFO_FILE: &str = "INFO.txt";

/// Stem of the generic fallback file accepted by `load`
pub const FALLBACK_STEM: &str = "backup";

/// Ordering for [`BackupLayoutManager::list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
    LargestFirst,
    SmallestFirst,
}

/// Display metadata for one backup directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: String,
    pub dir: PathBuf,
    pub canonical_file: PathBuf,
    pub created_at: DateTime<Utc>,
    pub app_version: String,

    /// Bytes on disk across the directory's files
    pub size_bytes: u64,

    pub record_counts: BTreeMap<String, usize>,
    pub total_records: usize,
}

/// Result of [`BackupLayoutManager::list`]
#[derive(Debug, Clone, Default)]
pub struct BackupListing {
    pub backups: Vec<BackupSummary>,

    /// Directories that could not be read, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Result of a best-effort delete
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl DeleteReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Saves, discovers, loads and deletes backups under one root
pub struct BackupLayoutManager<S: FileStore = FsStore, Z: Serializer = JsonSerializer> {
    root: PathBuf,
    store: S,
    serializer: Z,
}

impl BackupLayoutManager<FsStore, JsonSerializer> {
    /// Filesystem layout with JSON projections
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self::with_parts(root, FsStore, JsonSerializer::default())
    }
}

impl<S: FileStore, Z: Serializer> BackupLayoutManager<S, Z> {
    pub fn with_parts<P: Into<PathBuf>>(root: P, store: S, serializer: Z) -> Self {
        Self {
            root: root.into(),
            store,
            serializer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// File name of a projection
    pub fn file_name(&self, projection: Projection) -> String {
        format!("{}.{}", projection.file_stem(), self.serializer.extension())
    }

    /// Directory name for a snapshot: `backup_<id>_<YYYYmmdd_HHMMSS>`
    pub fn dir_name(snapshot: &Snapshot) -> String {
        format!(
            "{}{}_{}",
            BACKUP_DIR_PREFIX,
            snapshot.metadata.id,
            snapshot.metadata.created_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write all projections and the summary into `dest_dir`
    ///
    /// Returns the path of the canonical (full) file.
    pub fn save(&self, snapshot: &Snapshot, dest_dir: &Path) -> Result<PathBuf> {
        self.store.create_dir_all(dest_dir)?;

        let mut snapshot = snapshot.clone();
        snapshot.refresh_counts();

        for projection in Projection::ALL {
            let bytes = self.serializer.serialize(&snapshot.project(projection))?;
            let path = dest_dir.join(self.file_name(projection));
            self.store.write(&path, &bytes)?;
            debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        }

        let info_path = dest_dir.join(INFO_FILE);
        self.store
            .write(&info_path, self.render_info(&snapshot).as_bytes())?;

        let canonical = dest_dir.join(self.file_name(Projection::Full));
        info!(
            "saved snapshot {} ({} records) to {}",
            snapshot.metadata.id,
            snapshot.total_records(),
            dest_dir.display()
        );
        Ok(canonical)
    }

    /// Save into a new directory under the root
    ///
    /// Returns the path of the canonical file.
    pub fn create(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let dir = self.root.join(Self::dir_name(snapshot));
        if self.store.exists(&dir) {
            return Err(SnapError::InvalidInput(format!(
                "backup directory {} already exists",
                dir.display()
            )));
        }
        self.save(snapshot, &dir)
    }

    /// Load a snapshot from a file or a backup directory
    pub fn load(&self, path: &Path) -> Result<Snapshot> {
        let file = if self.store.is_dir(path) {
            self.resolve_canonical(path)?
        } else if self.store.exists(path) {
            path.to_path_buf()
        } else {
            return Err(SnapError::NotFound(path.display().to_string()));
        };

        let bytes = self.store.read(&file)?;
        self.serializer.deserialize(&bytes).map_err(|e| match e {
            SnapError::Corrupt(msg) => SnapError::Corrupt(format!("{}: {}", file.display(), msg)),
            other => other,
        })
    }

    /// Pick the file `load` reads from a backup directory
    ///
    /// Priority: full snapshot, data-only snapshot, generic `backup.<ext>`,
    /// then the first file by name carrying the serializer's extension.
    pub fn resolve_canonical(&self, dir: &Path) -> Result<PathBuf> {
        let extension = self.serializer.extension();
        let candidates = [
            self.file_name(Projection::Full),
            self.file_name(Projection::Database),
            format!("{}.{}", FALLBACK_STEM, extension),
        ];

        for name in &candidates {
            let path = dir.join(name);
            if self.store.exists(&path) && !self.store.is_dir(&path) {
                return Ok(path);
            }
        }

        for child in self.store.list_dir(dir)? {
            let matches = child
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if matches && !self.store.is_dir(&child) {
                debug!("falling back to {}", child.display());
                return Ok(child);
            }
        }

        Err(SnapError::NotFound(format!(
            "no snapshot file in {}",
            dir.display()
        )))
    }

    /// Enumerate backups under the root
    ///
    /// Only directories named `backup_*` are considered. One whose canonical
    /// file cannot be parsed is logged and left out; the listing still
    /// succeeds.
    pub fn list(&self, order: SortOrder) -> Result<BackupListing> {
        let mut listing = BackupListing::default();
        if !self.store.is_dir(&self.root) {
            return Ok(listing);
        }

        for dir in self.store.list_dir(&self.root)? {
            let is_backup = dir
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(BACKUP_DIR_PREFIX));
            if !is_backup || !self.store.is_dir(&dir) {
                continue;
            }
            match self.summarize(&dir) {
                Ok(summary) => listing.backups.push(summary),
                Err(e) => {
                    warn!("skipping unreadable backup {}: {}", dir.display(), e);
                    listing.skipped.push((dir, e.to_string()));
                }
            }
        }

        sort_summaries(&mut listing.backups, order);
        Ok(listing)
    }

    fn summarize(&self, dir: &Path) -> Result<BackupSummary> {
        let canonical_file = self.resolve_canonical(dir)?;
        let snapshot = self.load(&canonical_file)?;

        let mut size_bytes = 0;
        for child in self.store.list_dir(dir)? {
            if !self.store.is_dir(&child) {
                size_bytes += self.store.size(&child)?;
            }
        }

        let record_counts = snapshot.record_counts();
        let total_records = record_counts.values().sum();
        Ok(BackupSummary {
            id: snapshot.metadata.id,
            dir: dir.to_path_buf(),
            canonical_file,
            created_at: snapshot.metadata.created_at,
            app_version: snapshot.metadata.app_version,
            size_bytes,
            record_counts,
            total_records,
        })
    }

    /// Backup directories whose name starts with `backup_<id>`
    pub fn find(&self, id: &str) -> Result<Vec<PathBuf>> {
        if id.trim().is_empty() {
            return Err(SnapError::InvalidInput("backup id is empty".to_string()));
        }
        if !self.store.is_dir(&self.root) {
            return Ok(Vec::new());
        }

        let prefix = format!("{}{}", BACKUP_DIR_PREFIX, id);
        Ok(self
            .store
            .list_dir(&self.root)?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
            })
            .filter(|p| self.store.is_dir(p))
            .collect())
    }

    /// Remove every backup whose directory matches `id`
    ///
    /// No match is `NotFound`. Matches are removed independently; failures
    /// are reported alongside the deleted count rather than aborting.
    pub fn delete(&self, id: &str) -> Result<DeleteReport> {
        let matches = self.find(id)?;
        if matches.is_empty() {
            return Err(SnapError::NotFound(format!("no backup matching {}", id)));
        }
        Ok(self.remove_dirs(matches))
    }

    /// Keep the newest `keep` backups and remove the rest
    pub fn prune(&self, keep: usize) -> Result<DeleteReport> {
        let listing = self.list(SortOrder::NewestFirst)?;
        let stale: Vec<PathBuf> = listing
            .backups
            .into_iter()
            .skip(keep)
            .map(|b| b.dir)
            .collect();
        if !stale.is_empty() {
            info!("pruning {} backups beyond the newest {}", stale.len(), keep);
        }
        Ok(self.remove_dirs(stale))
    }

    fn remove_dirs(&self, dirs: Vec<PathBuf>) -> DeleteReport {
        let mut report = DeleteReport::default();
        for dir in dirs {
            match self.store.remove_dir_all(&dir) {
                Ok(()) => {
                    info!("deleted backup {}", dir.display());
                    report.deleted.push(dir);
                }
                Err(e) => {
                    warn!("failed to delete {}: {}", dir.display(), e);
                    report.failures.push((dir, e.to_string()));
                }
            }
        }
        report
    }

    fn render_info(&self, snapshot: &Snapshot) -> String {
        let meta = &snapshot.metadata;
        let mut out = String::new();

        let _ = writeln!(out, "Field data backup");
        let _ = writeln!(out, "=================");
        let _ = writeln!(out, "ID:          {}", meta.id);
        let _ = writeln!(
            out,
            "Created:     {}",
            meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "App version: {}", meta.app_version);
        if let Some(device) = &meta.device {
            let _ = writeln!(out, "Device:      {}", device);
        }
        if let Some(description) = &meta.description {
            let _ = writeln!(out, "Description: {}", description);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Records ({} total):", snapshot.total_records());
        for table in &snapshot.tables {
            let _ = writeln!(out, "  {:<16} {}", table.name, table.records.len());
        }
        let _ = writeln!(out, "Settings:    {}", snapshot.settings.len());

        let _ = writeln!(out);
        let _ = writeln!(out, "Files:");
        for projection in Projection::ALL {
            let _ = writeln!(out, "  {}", self.file_name(projection));
        }
        out
    }
}

fn sort_summaries(backups: &mut [BackupSummary], order: SortOrder) {
    match order {
        SortOrder::NewestFirst => backups.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::OldestFirst => backups.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::LargestFirst => backups.sort_by(|a, b| {
            b.size_bytes.cmp(&a.size_bytes).then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::SmallestFirst => backups.sort_by(|a, b| {
            a.size_bytes.cmp(&b.size_bytes).then_with(|| a.id.cmp(&b.id))
        }),
    }
}
