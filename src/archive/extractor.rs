use crate::archive::stream::{copy_hashed, copy_plain, CopyError};
use crate::config::{ArchiveConfig, ValidationConfig};
use crate::error::{Result, SnapError};
use crate::integrity::{check_observations, is_payload_entry, Observation, ValidationResult};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::progress::{CancellationToken, ProgressEvent, ProgressReporter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

/// One file written by an extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub entry_path: String,
    pub path: PathBuf,
    pub size: u64,

    /// Recomputed SHA-256, when verification is on
    pub sha256: Option<String>,
}

/// Outcome of a completed extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractReport {
    pub dest_root: PathBuf,

    /// Payload files written, manifest excluded
    pub files: Vec<ExtractedFile>,

    /// `(entry path, reason)` for entries that were not written
    pub skipped: Vec<(String, String)>,

    pub total_bytes: u64,

    /// The embedded manifest, if present and well-formed
    pub manifest: Option<Manifest>,

    /// Hash check against the manifest, when verification is on
    pub verification: Option<ValidationResult>,

    pub warnings: Vec<String>,
}

impl ExtractReport {
    fn new(dest_root: &Path) -> Self {
        Self {
            dest_root: dest_root.to_path_buf(),
            files: Vec::new(),
            skipped: Vec::new(),
            total_bytes: 0,
            manifest: None,
            verification: None,
            warnings: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Streams archive entries back to a destination tree
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    config: ArchiveConfig,
    validation: ValidationConfig,
    cancel: Option<CancellationToken>,
}

impl ArchiveExtractor {
    /// A zero `buffer_size` is raised to one byte
    pub fn new(mut config: ArchiveConfig) -> Self {
        config.buffer_size = config.buffer_size.max(1);
        Self {
            config,
            validation: ValidationConfig::default(),
            cancel: None,
        }
    }

    /// Thresholds used when checking extracted hashes against the manifest
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Check this token between entries
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Header-only scan: number of payload entries (no directories, no manifest)
    pub fn count_entries<P: AsRef<Path>>(archive: P) -> Result<usize> {
        let zip = open_archive(archive.as_ref())?;
        Ok(zip.file_names().filter(|n| is_payload_entry(n)).count())
    }

    /// Extract `archive` under `dest_root`
    pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        archive: P,
        dest_root: Q,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<ExtractReport> {
        let archive = archive.as_ref();
        let dest_root = dest_root.as_ref();
        let mut reporter = ProgressReporter::new(progress);

        info!(
            "extracting {} into {}",
            archive.display(),
            dest_root.display()
        );

        match self.extract_entries(archive, dest_root, &mut reporter) {
            Ok(report) => {
                info!(
                    "extracted {} files ({} bytes) from {}, {} skipped",
                    report.count(),
                    report.total_bytes,
                    archive.display(),
                    report.skipped.len()
                );
                reporter.complete(
                    report.count(),
                    report.total_bytes,
                    Some(dest_root.to_path_buf()),
                );
                Ok(report)
            }
            Err(e) => {
                error!("extraction of {} failed: {}", archive.display(), e);
                reporter.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn extract_entries(
        &self,
        archive: &Path,
        dest_root: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<ExtractReport> {
        let mut zip = open_archive(archive)?;

        // Pass 1: fix the progress denominator from the central directory
        let total = zip.file_names().filter(|n| is_payload_entry(n)).count();
        debug!("{} payload entries in {}", total, archive.display());

        fs::create_dir_all(dest_root).map_err(|e| SnapError::at_path(dest_root, e))?;

        let verify = self.config.verify_on_extract;
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut report = ExtractReport::new(dest_root);
        let mut observed = BTreeMap::new();
        let mut processed = 0usize;

        // Pass 2: stream entries to disk
        for index in 0..zip.len() {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                warn!("extraction cancelled after {} entries", processed);
                return Err(SnapError::Cancelled);
            }

            let label = zip
                .name_for_index(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));
            let is_manifest = label == MANIFEST_FILE;

            let mut entry = match zip.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("cannot read entry {}: {}", label, e);
                    if is_payload_entry(&label) {
                        observed.insert(label.clone(), Observation::Unreadable(e.to_string()));
                        report.skipped.push((label.clone(), e.to_string()));
                        processed += 1;
                        reporter.advance(processed, total, label);
                    }
                    continue;
                }
            };

            if entry.is_dir() {
                continue;
            }

            let relative = match entry.enclosed_name() {
                Some(path) => path.to_path_buf(),
                None => {
                    warn!("entry {} would escape the destination, skipped", label);
                    report
                        .skipped
                        .push((label.clone(), "path escapes destination".to_string()));
                    if !is_manifest {
                        processed += 1;
                        reporter.advance(processed, total, label);
                    }
                    continue;
                }
            };

            let target = dest_root.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| SnapError::at_path(parent, e))?;
            }

            let file = File::create(&target).map_err(|e| SnapError::at_path(&target, e))?;
            let mut writer = BufWriter::new(file);

            let copied = if verify || is_manifest {
                copy_hashed(&mut entry, &mut writer, &mut buffer).map(|(n, h)| (n, Some(h)))
            } else {
                copy_plain(&mut entry, &mut writer, &mut buffer).map(|n| (n, None))
            };

            match copied {
                Ok((size, sha256)) => {
                    writer.flush().map_err(|e| SnapError::at_path(&target, e))?;
                    if is_manifest {
                        drop(writer);
                        report.manifest = read_manifest(&target, &mut report.warnings);
                        continue;
                    }

                    if let Some(hash) = &sha256 {
                        observed.insert(
                            label.clone(),
                            Observation::Present {
                                size,
                                sha256: hash.clone(),
                            },
                        );
                    }
                    report.total_bytes += size;
                    report.files.push(ExtractedFile {
                        entry_path: label.clone(),
                        path: target,
                        size,
                        sha256,
                    });
                }
                Err(CopyError::Read(e)) => {
                    warn!("entry {} is corrupt: {}", label, e);
                    drop(writer);
                    remove_partial(&target);
                    report.skipped.push((label.clone(), format!("corrupt entry: {}", e)));
                    if is_manifest {
                        report
                            .warnings
                            .push(format!("{} is unreadable: {}", MANIFEST_FILE, e));
                        continue;
                    }
                    observed.insert(label.clone(), Observation::Unreadable(e.to_string()));
                }
                Err(CopyError::Write(e)) => return Err(SnapError::at_path(&target, e)),
            }

            processed += 1;
            reporter.advance(processed, total, label);
        }

        if verify {
            match &report.manifest {
                Some(manifest) => {
                    let result = check_observations(manifest, observed, &self.validation);
                    if !result.is_valid() {
                        warn!(
                            "{} failed verification: {:?}",
                            archive.display(),
                            result.errors
                        );
                    }
                    report.verification = Some(result);
                }
                None => report
                    .warnings
                    .push(format!("no usable {}; hashes not verified", MANIFEST_FILE)),
            }
        }

        report.warnings.extend(
            report
                .skipped
                .iter()
                .map(|(name, reason)| format!("skipped {}: {}", name, reason)),
        );

        Ok(report)
    }
}

fn open_archive(archive: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SnapError::NotFound(archive.display().to_string())
        } else {
            SnapError::at_path(archive, e)
        }
    })?;

    ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
        zip::result::ZipError::Io(io) => SnapError::at_path(archive, io),
        other => SnapError::Corrupt(format!("{}: {}", archive.display(), other)),
    })
}

fn read_manifest(path: &Path, warnings: &mut Vec<String>) -> Option<Manifest> {
    let parsed = fs::read_to_string(path)
        .map_err(SnapError::from)
        .and_then(|text| Manifest::parse(&text));
    match parsed {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!("{} is not a valid manifest: {}", path.display(), e);
            warnings.push(format!("{} is malformed: {}", MANIFEST_FILE, e));
            None
        }
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("could not remove partial file {}: {}", path.display(), e);
        }
    }
}
