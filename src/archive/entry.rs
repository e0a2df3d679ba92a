use crate::manifest::{manifest_path_problem, MANIFEST_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Compression methods supported for archive entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Zstd,
}

impl CompressionMethod {
    /// Pick the method for one entry
    ///
    /// Already-compressed formats gain nothing from a second pass, so they are
    /// stored when `store_precompressed` is set.
    pub fn choose_for_entry(self, entry_path: &str, store_precompressed: bool) -> Self {
        if store_precompressed && is_precompressed(entry_path) {
            return Self::Stored;
        }
        self
    }

    pub(crate) fn to_zip(self) -> zip::CompressionMethod {
        match self {
            Self::Stored => zip::CompressionMethod::Stored,
            Self::Deflated => zip::CompressionMethod::Deflated,
            Self::Zstd => zip::CompressionMethod::Zstd,
        }
    }
}

fn is_precompressed(entry_path: &str) -> bool {
    let extension = entry_path.rsplit('.').next().unwrap_or("").to_lowercase();
    matches!(
        extension.as_str(),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "mp3" | "mp4" | "zip" | "gz" | "bz2"
            | "7z" | "zst"
    )
}

/// One payload written to an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Container-relative path
    pub entry_path: String,

    /// Uncompressed size
    pub source_size: u64,

    /// SHA-256 of the bytes written, lowercase hex
    pub content_hash: String,

    pub compression_method: CompressionMethod,
}

/// One item to archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub source_path: PathBuf,
    pub entry_path: String,
}

impl ArchiveSource {
    pub fn new(source_path: impl Into<PathBuf>, entry_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            entry_path: entry_path.into(),
        }
    }

    /// Flat entry named after the file itself
    pub fn flat(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(source_path, name)
    }

    /// Entry named `<group_id>/<file name>`
    pub fn grouped(group_id: &str, source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(source_path, grouped_name(group_id, &name))
    }

    /// Walk a payload directory
    ///
    /// Files directly under `root` become flat entries, files below a
    /// subdirectory become `<group>/<relative path>`. Order is sorted by name
    /// so repeated builds of the same tree are identical.
    pub fn collect<P: AsRef<Path>>(root: P) -> crate::Result<Vec<ArchiveSource>> {
        let root = root.as_ref();
        let mut sources = Vec::new();

        for entry in walkdir::WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                match e.into_io_error() {
                    Some(io) => crate::SnapError::at_path(path, io),
                    None => crate::SnapError::InvalidInput(format!(
                        "filesystem loop at {}",
                        path.display()
                    )),
                }
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or_else(|_| entry.path());
            let name = normalize_path(&relative.to_string_lossy());
            sources.push(ArchiveSource::new(entry.path(), name));
        }

        Ok(sources)
    }
}

/// `<group_id>/<file_name>`
pub fn grouped_name(group_id: &str, file_name: &str) -> String {
    format!("{}/{}", normalize_path(group_id).trim_matches('/'), file_name)
}

/// Normalize path to forward slashes (cross-platform compatibility)
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Why an entry name cannot be written
pub(crate) fn entry_name_problem(name: &str) -> Option<&'static str> {
    if let Some(problem) = manifest_path_problem(name) {
        return Some(problem);
    }
    if name == MANIFEST_FILE {
        return Some("reserved entry name");
    }
    relative_path_problem(name)
}

/// Why `name` cannot be joined under a root directory
pub(crate) fn relative_path_problem(name: &str) -> Option<&'static str> {
    if name.starts_with('/') || name.ends_with('/') {
        return Some("entry name must be relative and name a file");
    }
    if name.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Some("entry name contains empty, '.' or '..' components");
    }
    let components = Path::new(name).components();
    for component in components {
        match component {
            Component::Prefix(_) => return Some("entry name carries a drive prefix"),
            Component::RootDir | Component::ParentDir => {
                return Some("entry name escapes its root")
            }
            _ => {}
        }
    }
    None
}
