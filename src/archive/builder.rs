use crate::archive::entry::{entry_name_problem, normalize_path, ArchiveEntry, ArchiveSource};
use crate::archive::stream::{copy_hashed, CopyError};
use crate::config::ArchiveConfig;
use crate::error::{Result, SnapError};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::progress::{progress_channel, CancellationToken, ProgressEvent, ProgressReporter, ProgressStream};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Why a source item was left out of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Zero-length source
    Empty,
    /// Source larger than `max_entry_size`
    TooLarge { size: u64, limit: u64 },
    /// The archive already holds `max_total_size` bytes
    TotalLimitReached,
    /// Entry name cannot be written safely
    InvalidName { detail: String },
    /// Another item already used this entry name
    Duplicate,
    /// Source could not be opened or read
    Unreadable { detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "empty file"),
            SkipReason::TooLarge { size, limit } => {
                write!(f, "{} bytes exceeds the {} byte entry limit", size, limit)
            }
            SkipReason::TotalLimitReached => write!(f, "archive size limit reached"),
            SkipReason::InvalidName { detail } => write!(f, "invalid name: {}", detail),
            SkipReason::Duplicate => write!(f, "duplicate entry name"),
            SkipReason::Unreadable { detail } => write!(f, "unreadable: {}", detail),
        }
    }
}

/// A source item that did not make it into the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub entry_path: String,
    pub source_path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of a completed build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub output_path: PathBuf,

    /// Accepted entries in build order
    pub entries: Vec<ArchiveEntry>,

    /// Items left out, with the reason
    pub skipped: Vec<SkippedItem>,

    /// Uncompressed bytes written across all entries
    pub total_bytes: u64,

    /// Whether the total size cap stopped the build early
    pub truncated: bool,

    /// The manifest written as the last entry
    pub manifest: Manifest,
}

impl BuildReport {
    fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            entries: Vec::new(),
            skipped: Vec::new(),
            total_bytes: 0,
            truncated: false,
            manifest: Manifest::new(),
        }
    }

    /// Number of entries written, manifest excluded
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether any item was left out
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// One line per skipped item
    pub fn warnings(&self) -> Vec<String> {
        self.skipped
            .iter()
            .map(|s| format!("skipped {}: {}", s.entry_path, s.reason))
            .collect()
    }

    fn skip(&mut self, item: &ArchiveSource, entry_path: &str, reason: SkipReason) {
        self.skipped.push(SkippedItem {
            entry_path: entry_path.to_string(),
            source_path: item.source_path.clone(),
            reason,
        });
    }
}

enum ItemOutcome {
    Written(ArchiveEntry),
    Skipped(SkipReason),
}

/// Streams source files into a ZIP archive with a trailing manifest
///
/// Each source is read once; the same buffer feeds the compressed entry and
/// the SHA-256 digest recorded in the manifest.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    config: ArchiveConfig,
    cancel: Option<CancellationToken>,
}

impl ArchiveBuilder {
    /// A zero `buffer_size` is raised to one byte
    pub fn new(mut config: ArchiveConfig) -> Self {
        config.buffer_size = config.buffer_size.max(1);
        Self {
            config,
            cancel: None,
        }
    }

    /// Check this token between entries
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Build `output` from `items`
    ///
    /// Per-item problems are recorded in the report and never fail the
    /// build. A failure of the output stream itself aborts, removes the
    /// partial output and returns the error; the terminal `Error` event is
    /// emitted first.
    pub fn build<P: AsRef<Path>>(
        &self,
        items: &[ArchiveSource],
        output: P,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<BuildReport> {
        let output = output.as_ref();
        let mut reporter = ProgressReporter::new(progress);

        if items.is_empty() {
            debug!("no items to archive for {}", output.display());
            reporter.complete(0, 0, Some(output.to_path_buf()));
            return Ok(BuildReport::new(output));
        }

        info!(
            "building archive {} from {} items",
            output.display(),
            items.len()
        );

        match self.write_archive(items, output, &mut reporter) {
            Ok(report) => {
                info!(
                    "archive {} complete: {} entries, {} bytes, {} skipped",
                    output.display(),
                    report.count(),
                    report.total_bytes,
                    report.skipped.len()
                );
                reporter.complete(
                    report.count(),
                    report.total_bytes,
                    Some(output.to_path_buf()),
                );
                Ok(report)
            }
            Err(e) => {
                error!("archive {} failed: {}", output.display(), e);
                discard_partial(output);
                reporter.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Run [`build`](Self::build) on a worker thread
    ///
    /// Builds that target different outputs share nothing and may run side by
    /// side.
    pub fn spawn(
        self,
        items: Vec<ArchiveSource>,
        output: PathBuf,
    ) -> (ProgressStream, JoinHandle<Result<BuildReport>>) {
        let (sender, stream) = progress_channel();
        let handle = std::thread::spawn(move || {
            let mut sink = |event: ProgressEvent| sender.send(event);
            self.build(&items, &output, &mut sink)
        });
        (stream, handle)
    }

    fn write_archive(
        &self,
        items: &[ArchiveSource],
        output: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<BuildReport> {
        let file = File::create(output).map_err(|e| SnapError::at_path(output, e))?;
        let mut zip = ZipWriter::new(BufWriter::new(file));

        let total = items.len();
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut seen = HashSet::new();
        let mut report = BuildReport::new(output);

        for (index, item) in items.iter().enumerate() {
            if self.is_cancelled() {
                warn!("archive build cancelled after {} items", index);
                return Err(SnapError::Cancelled);
            }

            let entry_path = normalize_path(&item.entry_path);

            if report.total_bytes > self.config.max_total_size {
                warn!(
                    "archive size limit of {} bytes reached, {} items left out",
                    self.config.max_total_size,
                    total - index
                );
                for rest in &items[index..] {
                    let name = normalize_path(&rest.entry_path);
                    report.skip(rest, &name, SkipReason::TotalLimitReached);
                }
                report.truncated = true;
                break;
            }

            match self.add_item(&mut zip, item, &entry_path, &seen, &mut buffer)? {
                ItemOutcome::Written(entry) => {
                    debug!(
                        "archived {} ({} bytes, {})",
                        entry.entry_path, entry.source_size, entry.content_hash
                    );
                    seen.insert(entry.entry_path.clone());
                    report.total_bytes += entry.source_size;
                    report.entries.push(entry);
                }
                ItemOutcome::Skipped(reason) => {
                    warn!("skipping {}: {}", entry_path, reason);
                    report.skip(item, &entry_path, reason);
                }
            }

            reporter.advance(index + 1, total, entry_path);
        }

        let mut manifest = Manifest::with_build_header(report.entries.len());
        manifest.extend(report.entries.iter().map(|entry| {
            (
                entry.entry_path.as_str(),
                entry.content_hash.as_str(),
                Some(entry.source_size),
            )
        }))?;
        zip.start_file(
            MANIFEST_FILE,
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated),
        )?;
        zip.write_all(manifest.render().as_bytes())?;
        report.manifest = manifest;

        let writer = zip.finish()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(report)
    }

    fn add_item(
        &self,
        zip: &mut ZipWriter<BufWriter<File>>,
        item: &ArchiveSource,
        entry_path: &str,
        seen: &HashSet<String>,
        buffer: &mut [u8],
    ) -> Result<ItemOutcome> {
        if let Some(problem) = entry_name_problem(entry_path) {
            return Ok(ItemOutcome::Skipped(SkipReason::InvalidName {
                detail: problem.to_string(),
            }));
        }
        if seen.contains(entry_path) {
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }

        let size = match fs::metadata(&item.source_path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Ok(ItemOutcome::Skipped(SkipReason::Unreadable {
                    detail: "not a regular file".to_string(),
                }))
            }
            Err(e) => return Ok(ItemOutcome::Skipped(unreadable(&item.source_path, e))),
        };

        if size == 0 {
            return Ok(ItemOutcome::Skipped(SkipReason::Empty));
        }
        if size > self.config.max_entry_size {
            return Ok(ItemOutcome::Skipped(SkipReason::TooLarge {
                size,
                limit: self.config.max_entry_size,
            }));
        }

        let mut source = match File::open(&item.source_path) {
            Ok(file) => file,
            Err(e) => return Ok(ItemOutcome::Skipped(unreadable(&item.source_path, e))),
        };

        let method = self
            .config
            .compression
            .choose_for_entry(entry_path, self.config.store_precompressed);
        let options = SimpleFileOptions::default()
            .compression_method(method.to_zip())
            .large_file(size >= u32::MAX as u64);

        zip.start_file(entry_path, options)?;

        match copy_hashed(&mut source, zip, buffer) {
            Ok((written, content_hash)) => Ok(ItemOutcome::Written(ArchiveEntry {
                entry_path: entry_path.to_string(),
                source_size: written,
                content_hash,
                compression_method: method,
            })),
            Err(CopyError::Read(e)) => {
                // Drop the half-written entry so the container stays consistent
                zip.abort_file()?;
                Ok(ItemOutcome::Skipped(unreadable(&item.source_path, e)))
            }
            Err(CopyError::Write(e)) => Err(SnapError::Io(e)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

fn unreadable(path: &Path, err: io::Error) -> SkipReason {
    SkipReason::Unreadable {
        detail: format!("{}: {}", path.display(), err),
    }
}

fn discard_partial(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => debug!("removed partial archive {}", output.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "could not remove partial archive {}: {}",
            output.display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;

    fn small_config() -> ArchiveConfig {
        ArchiveConfig {
            buffer_size: 16,
            max_entry_size: 1024,
            max_total_size: 4096,
            ..ArchiveConfig::default()
        }
    }

    #[test]
    fn test_empty_input_completes_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("empty.zip");
        let mut events = Vec::new();

        let report = ArchiveBuilder::new(small_config())
            .build(&[], &output, &mut |e| events.push(e))
            .unwrap();

        assert_eq!(report.count(), 0);
        assert!(!output.exists());
        assert_eq!(
            events,
            vec![ProgressEvent::Completed {
                count: 0,
                total_bytes: 0,
                output_path: Some(output.clone()),
            }]
        );
    }

    #[test]
    fn test_skip_reasons_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        let empty = dir.path().join("empty.txt");
        let big = dir.path().join("big.bin");
        std::fs::write(&good, b"payload").unwrap();
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&big, vec![1u8; 2048]).unwrap();

        let items = vec![
            ArchiveSource::flat(&good),
            ArchiveSource::flat(&empty),
            ArchiveSource::flat(&big),
            ArchiveSource::new(&good, "good.txt"),
            ArchiveSource::new(&good, "../escape.txt"),
            ArchiveSource::flat(dir.path().join("missing.txt")),
        ];

        let output = dir.path().join("out.zip");
        let report = ArchiveBuilder::new(small_config())
            .build(&items, &output, &mut |_| {})
            .unwrap();

        assert_eq!(report.count(), 1);
        assert_eq!(report.skipped.len(), 5);
        assert_eq!(report.skipped[0].reason, SkipReason::Empty);
        assert!(matches!(report.skipped[1].reason, SkipReason::TooLarge { size: 2048, .. }));
        assert_eq!(report.skipped[2].reason, SkipReason::Duplicate);
        assert!(matches!(report.skipped[3].reason, SkipReason::InvalidName { .. }));
        assert!(matches!(report.skipped[4].reason, SkipReason::Unreadable { .. }));
        assert_eq!(report.warnings().len(), 5);
    }

    #[test]
    fn test_total_limit_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut items = Vec::new();
        for i in 0..6 {
            let path = dir.path().join(format!("f{}.bin", i));
            std::fs::write(&path, vec![i as u8; 1000]).unwrap();
            items.push(ArchiveSource::flat(path));
        }

        let config = ArchiveConfig {
            max_entry_size: 1000,
            max_total_size: 2500,
            ..small_config()
        };
        let output = dir.path().join("out.zip");
        let report = ArchiveBuilder::new(config)
            .build(&items, &output, &mut |_| {})
            .unwrap();

        // 1000, 2000, 3000 > 2500: the third entry crosses the cap, the rest wait
        assert_eq!(report.count(), 3);
        assert!(report.truncated);
        assert_eq!(report.skipped.len(), 3);
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::TotalLimitReached));
        assert_eq!(report.manifest.len(), 3);
    }

    #[test]
    fn test_cancelled_build_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let output = dir.path().join("out.zip");
        let mut events = Vec::new();
        let result = ArchiveBuilder::new(small_config())
            .with_cancellation(token)
            .build(&[ArchiveSource::flat(&path)], &output, &mut |e| events.push(e));

        assert!(matches!(result, Err(SnapError::Cancelled)));
        assert!(!output.exists());
        assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
    }

    #[test]
    fn test_unwritable_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let output = dir.path().join("no-such-dir").join("out.zip");
        let mut events = Vec::new();
        let result = ArchiveBuilder::new(small_config())
            .build(&[ArchiveSource::flat(&path)], &output, &mut |e| events.push(e));

        assert!(result.is_err());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Error { .. }));
    }

    #[test]
    fn test_zero_buffer_still_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"seventeen bytes!!").unwrap();

        let config = ArchiveConfig {
            buffer_size: 0,
            ..small_config()
        };
        let builder = ArchiveBuilder::new(config);
        assert_eq!(builder.config().buffer_size, 1);

        let report = builder
            .build(&[ArchiveSource::flat(&path)], dir.path().join("out.zip"), &mut |_| {})
            .unwrap();
        assert_eq!(report.entries[0].source_size, 17);
        assert_eq!(
            report.entries[0].content_hash,
            crate::archive::stream::hash_reader(&mut &b"seventeen bytes!!"[..], &mut [0u8; 8])
                .unwrap()
                .1
        );
    }
}
