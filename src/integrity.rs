//! Manifest-driven integrity validation
//!
//! The validator compares an expected manifest against a live source: a
//! directory tree reached through a [`FileStore`], an archive on disk, or a set
//! of hashes computed during extraction. Per expected entry:
//!
//! | observation                     | outcome                        |
//! |---------------------------------|--------------------------------|
//! | absent                          | error `missing: <name>`        |
//! | size differs from a known size  | warning only                   |
//! | hash differs                    | error `invalid hash: <name>`   |
//! | hash matches                    | counts as validated            |
//!
//! After the per-entry pass, a result whose validated share falls below
//! `min_valid_ratio` gets one summary warning. That warning is a confidence
//! signal and never changes validity: `is_valid()` only looks at errors.

use crate::archive::relative_path_problem;
use crate::archive::stream::hash_reader;
use crate::config::{ValidationConfig, DEFAULT_BUFFER_SIZE};
use crate::error::{Result, SnapError};
use crate::manifest::{Manifest, ManifestEntry, MANIFEST_FILE};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::{FileStore, FsStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Entries whose hash matched
    pub validated_count: usize,

    /// Entries listed in the manifest
    pub expected_count: usize,
}

impl ValidationResult {
    /// True iff there are no errors; warnings never affect validity
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Share of expected entries that validated, 1.0 for an empty manifest
    pub fn valid_ratio(&self) -> f64 {
        if self.expected_count == 0 {
            1.0
        } else {
            self.validated_count as f64 / self.expected_count as f64
        }
    }
}

/// What was found for one expected entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Missing,
    Present { size: u64, sha256: String },
    Unreadable(String),
}

/// Accumulates per-entry outcomes into a [`ValidationResult`]
#[derive(Debug)]
pub struct ValidationPass {
    result: ValidationResult,
    min_valid_ratio: f64,
}

impl ValidationPass {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            result: ValidationResult::default(),
            min_valid_ratio: config.min_valid_ratio,
        }
    }

    /// Classify one expected entry
    pub fn record(&mut self, expected: &ManifestEntry, observation: Observation) {
        self.result.expected_count += 1;
        let name = &expected.path;

        match observation {
            Observation::Missing => {
                self.result.errors.push(format!("missing: {}", name));
            }
            Observation::Unreadable(detail) => {
                self.result
                    .errors
                    .push(format!("unreadable: {}: {}", name, detail));
            }
            Observation::Present { size, sha256 } => {
                if let Some(expected_size) = expected.size {
                    if expected_size != size {
                        self.result.warnings.push(format!(
                            "size mismatch: {} (expected {} bytes, found {})",
                            name, expected_size, size
                        ));
                    }
                }
                if sha256.eq_ignore_ascii_case(&expected.sha256) {
                    self.result.validated_count += 1;
                } else {
                    self.result.errors.push(format!("invalid hash: {}", name));
                }
            }
        }
    }

    /// Add a warning not tied to an expected entry
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.result.warnings.push(warning.into());
    }

    /// Apply the aggregate confidence rule and return the result
    pub fn finish(mut self) -> ValidationResult {
        let result = &mut self.result;
        if result.expected_count > 0 && result.valid_ratio() < self.min_valid_ratio {
            result.warnings.push(format!(
                "only {} of {} entries validated ({:.1}%), below the {:.1}% confidence threshold",
                result.validated_count,
                result.expected_count,
                result.valid_ratio() * 100.0,
                self.min_valid_ratio * 100.0
            ));
        }
        self.result
    }
}

/// Checks live content against a manifest
pub struct IntegrityValidator<S: FileStore = FsStore> {
    store: S,
    config: ValidationConfig,
    buffer_size: usize,
}

impl IntegrityValidator<FsStore> {
    /// Validator over the local filesystem
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_store(FsStore, config)
    }
}

impl<S: FileStore> IntegrityValidator<S> {
    pub fn with_store(store: S, config: ValidationConfig) -> Self {
        Self {
            store,
            config,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the hashing buffer
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Validate the tree under `root` against `manifest`
    ///
    /// Reports one `InProgress` per expected entry and completes with the
    /// validated count and the number of bytes hashed. An entry whose path
    /// would leave `root` is never opened and counts as unreadable.
    pub fn validate(
        &self,
        manifest: &Manifest,
        root: &Path,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> ValidationResult {
        let mut reporter = ProgressReporter::new(progress);
        let mut pass = ValidationPass::new(&self.config);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut bytes_hashed = 0u64;
        let total = manifest.len();

        info!("validating {} entries under {}", total, root.display());

        for (index, expected) in manifest.entries.iter().enumerate() {
            let observation = match relative_path_problem(&expected.path) {
                Some(problem) => {
                    warn!("not reading {} under {}: {}", expected.path, root.display(), problem);
                    Observation::Unreadable(problem.to_string())
                }
                None => self.observe(&root.join(&expected.path), &mut buffer),
            };
            if let Observation::Present { size, .. } = &observation {
                bytes_hashed += size;
            }
            debug!("{}: {:?}", expected.path, observation);
            pass.record(expected, observation);
            reporter.advance(index + 1, total, expected.path.clone());
        }

        let result = pass.finish();
        log_outcome(root, &result);
        reporter.complete(
            result.validated_count,
            bytes_hashed,
            Some(root.to_path_buf()),
        );
        result
    }

    fn observe(&self, path: &Path, buffer: &mut [u8]) -> Observation {
        if !self.store.exists(path) || self.store.is_dir(path) {
            return Observation::Missing;
        }

        let mut reader = match self.store.open_read(path) {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Observation::Missing,
            Err(e) => return Observation::Unreadable(e.to_string()),
        };

        match hash_reader(&mut reader, buffer) {
            Ok((size, sha256)) => Observation::Present { size, sha256 },
            Err(e) => Observation::Unreadable(e.to_string()),
        }
    }

    /// Re-hash every entry of an archive against its embedded manifest
    ///
    /// Nothing is written to disk. Entries present in the archive but absent
    /// from the manifest produce warnings.
    pub fn verify_archive(
        &self,
        archive: &Path,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<ValidationResult> {
        let mut reporter = ProgressReporter::new(progress);
        match self.verify_archive_inner(archive, &mut reporter) {
            Ok((result, bytes)) => {
                log_outcome(archive, &result);
                reporter.complete(
                    result.validated_count,
                    bytes,
                    Some(archive.to_path_buf()),
                );
                Ok(result)
            }
            Err(e) => {
                warn!("cannot verify {}: {}", archive.display(), e);
                reporter.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn verify_archive_inner(
        &self,
        archive: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<(ValidationResult, u64)> {
        let file = File::open(archive).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SnapError::NotFound(archive.display().to_string())
            } else {
                SnapError::at_path(archive, e)
            }
        })?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

        let manifest = {
            let mut entry = zip.by_name(MANIFEST_FILE).map_err(|_| {
                SnapError::NotFound(format!("{} in {}", MANIFEST_FILE, archive.display()))
            })?;
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| SnapError::Corrupt(format!("{}: {}", MANIFEST_FILE, e)))?;
            Manifest::parse(&text)?
        };

        let total = zip
            .file_names()
            .filter(|name| is_payload_entry(name))
            .count();
        let mut computed = BTreeMap::new();
        let mut buffer = vec![0u8; self.buffer_size];
        let mut bytes = 0u64;
        let mut processed = 0usize;

        for index in 0..zip.len() {
            let label = zip
                .name_for_index(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));
            if !is_payload_entry(&label) {
                continue;
            }

            let observation = match zip.by_index(index) {
                Ok(mut entry) => match hash_reader(&mut entry, &mut buffer) {
                    Ok((size, sha256)) => {
                        bytes += size;
                        Observation::Present { size, sha256 }
                    }
                    Err(e) => Observation::Unreadable(e.to_string()),
                },
                Err(e) => Observation::Unreadable(e.to_string()),
            };
            processed += 1;
            reporter.advance(processed, total, label.clone());
            computed.insert(label, observation);
        }

        Ok((check_observations(&manifest, computed, &self.config), bytes))
    }
}

/// Compare observations keyed by entry path against `manifest`
///
/// Keys absent from `observed` count as missing; keys not listed in the
/// manifest become warnings.
pub fn check_observations(
    manifest: &Manifest,
    mut observed: BTreeMap<String, Observation>,
    config: &ValidationConfig,
) -> ValidationResult {
    let mut pass = ValidationPass::new(config);
    let listed: HashSet<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();

    for expected in &manifest.entries {
        let observation = observed
            .remove(&expected.path)
            .unwrap_or(Observation::Missing);
        pass.record(expected, observation);
    }

    for extra in observed.keys().filter(|k| !listed.contains(k.as_str())) {
        pass.warn(format!("not in manifest: {}", extra));
    }

    pass.finish()
}

/// Entries counted as payload: files other than the manifest
pub(crate) fn is_payload_entry(name: &str) -> bool {
    !name.ends_with('/') && name != MANIFEST_FILE
}

fn log_outcome(target: &Path, result: &ValidationResult) {
    if result.is_valid() {
        info!(
            "{}: {}/{} entries valid, {} warnings",
            target.display(),
            result.validated_count,
            result.expected_count,
            result.warnings.len()
        );
    } else {
        warn!(
            "{}: {} errors, {}/{} entries valid",
            target.display(),
            result.errors.len(),
            result.validated_count,
            result.expected_count
        );
    }
}

/// Convenience for callers holding a path list rather than a manifest
pub fn manifest_from_paths<I>(entries: I) -> Result<Manifest>
where
    I: IntoIterator<Item = (PathBuf, String, Option<u64>)>,
{
    let mut manifest = Manifest::new();
    manifest.extend(
        entries
            .into_iter()
            .map(|(path, sha256, size)| (path.to_string_lossy().replace('\\', "/"), sha256, size)),
    )?;
    Ok(manifest)
}
