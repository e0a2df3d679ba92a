//! Archive manifest
//!
//! Every archive carries exactly one reserved entry, `MANIFEST.txt`, written
//! last. It maps each archived entry to the SHA-256 of its content:
//!
//! ```text
//! # fieldsnap manifest v1
//! # created: 2026-03-02T08:00:00Z
//! # entries: 2
//! client-17/front.jpg=9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! client-17/signature.png=60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752
//! ```
//!
//! Lines starting with `#` are comments, so no entry name may start with one. The manifest is rebuilt from scratch
//! on every build; it is never merged with an older one.

use crate::error::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reserved entry name
pub const MANIFEST_FILE: &str = "MANIFEST.txt";

/// Manifest text format version, written into the header
pub const MANIFEST_VERSION: u32 = 1;

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Entry path in the archive
    pub path: String,

    /// SHA-256 of the entry content, lowercase hex
    pub sha256: String,

    /// Uncompressed size, when known (not stored in the text form)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Ordered `path -> hash` map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Header comment lines, without the leading `#`
    #[serde(default)]
    pub comments: Vec<String>,

    /// Entries in build order
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header comment
    pub fn add_comment(&mut self, comment: impl Into<String>) {
        self.comments.push(comment.into());
    }

    /// Append an entry with an already computed hash
    ///
    /// Fails on malformed hashes and duplicate paths.
    pub fn push(
        &mut self,
        path: impl Into<String>,
        sha256: impl Into<String>,
        size: Option<u64>,
    ) -> Result<()> {
        let entry = checked_entry(path.into(), sha256.into(), size)?;
        if self.get(&entry.path).is_some() {
            return Err(SnapError::InvalidManifest(format!(
                "duplicate entry {}",
                entry.path
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Append many entries with one duplicate check across the batch
    ///
    /// Nothing is appended if any entry is rejected.
    pub fn extend<I, P, H>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, H, Option<u64>)>,
        P: Into<String>,
        H: Into<String>,
    {
        let mut seen: HashSet<String> = self.entries.iter().map(|e| e.path.clone()).collect();
        let mut batch = Vec::new();
        for (path, sha256, size) in entries {
            let entry = checked_entry(path.into(), sha256.into(), size)?;
            if !seen.insert(entry.path.clone()) {
                return Err(SnapError::InvalidManifest(format!(
                    "duplicate entry {}",
                    entry.path
                )));
            }
            batch.push(entry);
        }
        self.entries.extend(batch);
        Ok(())
    }

    /// Look up an entry by path
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the text form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str("# ");
            out.push_str(comment);
            out.push('\n');
        }
        for entry in &self.entries {
            out.push_str(&entry.path);
            out.push('=');
            out.push_str(&entry.sha256);
            out.push('\n');
        }
        out
    }

    /// Parse the text form
    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest = Manifest::new();
        let mut seen = HashSet::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                manifest.comments.push(comment.trim().to_string());
                continue;
            }

            // Hashes never contain '=', so split on the last one
            let (path, hash) = line.rsplit_once('=').ok_or_else(|| {
                SnapError::InvalidManifest(format!("line {}: expected name=hash", index + 1))
            })?;
            let hash = hash.trim();
            if path.is_empty() {
                return Err(SnapError::InvalidManifest(format!(
                    "line {}: empty entry name",
                    index + 1
                )));
            }
            if !is_sha256_hex(hash) {
                return Err(SnapError::InvalidManifest(format!(
                    "line {}: hash for {} is not 64 hex characters",
                    index + 1,
                    path
                )));
            }
            if !seen.insert(path.to_string()) {
                return Err(SnapError::InvalidManifest(format!(
                    "line {}: duplicate entry {}",
                    index + 1,
                    path
                )));
            }

            manifest.entries.push(ManifestEntry {
                path: path.to_string(),
                sha256: hash.to_ascii_lowercase(),
                size: None,
            });
        }

        Ok(manifest)
    }

    /// Standard header written by the archive builder
    pub(crate) fn with_build_header(entry_count: usize) -> Self {
        let mut manifest = Manifest::new();
        manifest.add_comment(format!("fieldsnap manifest v{}", MANIFEST_VERSION));
        manifest.add_comment(format!(
            "created: {}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
        manifest.add_comment(format!("entries: {}", entry_count));
        manifest
    }
}

/// Why `path` cannot appear as a manifest line, if it cannot
pub(crate) fn manifest_path_problem(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        return Some("empty entry name");
    }
    if path.contains(['\n', '\r']) {
        return Some("entry name contains a line break");
    }
    if path.starts_with('#') {
        return Some("entry name starts with the manifest comment marker '#'");
    }
    None
}

fn checked_entry(path: String, sha256: String, size: Option<u64>) -> Result<ManifestEntry> {
    if let Some(problem) = manifest_path_problem(&path) {
        return Err(SnapError::InvalidManifest(format!("{:?}: {}", path, problem)));
    }
    let sha256 = sha256.to_ascii_lowercase();
    if !is_sha256_hex(&sha256) {
        return Err(SnapError::InvalidManifest(format!(
            "hash for {} is not 64 hex characters",
            path
        )));
    }
    Ok(ManifestEntry { path, sha256, size })
}

/// Whether `s` is a 64-character hex SHA-256 digest
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
