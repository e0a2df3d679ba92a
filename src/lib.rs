//! fieldsnap: backup and archive integrity engine for field-data apps
//!
//! This library captures an application's records and media into verifiable
//! backups and restores them safely:
//! - ZIP archives with an embedded SHA-256 manifest (`MANIFEST.txt`)
//! - Integrity validation of extracted trees and archives
//! - Multi-projection backup directories with discovery, pruning and deletion
//! - Ordered, strategy-driven restore into a caller-supplied record sink
//! - A uniform progress protocol with cancellation
//!
//! # Example
//!
//! ```no_run
//! use fieldsnap::{ArchiveBuilder, ArchiveExtractor, ArchiveSource};
//!
//! // Bundle two photos under their checkup id
//! let items = vec![
//!     ArchiveSource::grouped("checkup-17", "photos/front.jpg"),
//!     ArchiveSource::grouped("checkup-17", "photos/back.jpg"),
//! ];
//! let report = ArchiveBuilder::default().build(&items, "media.zip", &mut |_| {})?;
//! assert_eq!(report.count(), report.manifest.len());
//!
//! // Extract and verify against the embedded manifest
//! let extracted = ArchiveExtractor::default().extract("media.zip", "restored", &mut |_| {})?;
//! assert!(extracted.verification.map_or(false, |v| v.is_valid()));
//! # Ok::<(), fieldsnap::SnapError>(())
//! ```

// Core modules
pub mod archive;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod integrity;
pub mod layout;
pub mod manifest;
pub mod progress;
pub mod restore;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use archive::{
    ArchiveBuilder, ArchiveEntry, ArchiveExtractor, ArchiveSource, BuildReport, CompressionMethod,
    ExtractReport, ExtractedFile, SkipReason, SkippedItem,
};
pub use cleanup::{schedule_removal, CleanupHandle, CleanupOutcome};
pub use config::{ArchiveConfig, EngineConfig, RestoreConfig, ValidationConfig};
pub use error::{Result, SnapError};
pub use integrity::{IntegrityValidator, ValidationResult};
pub use layout::{BackupLayoutManager, BackupListing, BackupSummary, DeleteReport, SortOrder};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_FILE};
pub use progress::{progress_channel, CancellationToken, ProgressEvent, ProgressStream};
pub use restore::{
    ApplyMode, MemorySink, RecordSink, RestoreOrchestrator, RestoreReport, RestoreStatus,
    RestoreStrategy, Selection,
};
pub use snapshot::{JsonSerializer, Projection, Record, Serializer, Snapshot};
pub use store::{FileStore, FsStore};
