//! Byte-stream file store consumed by the validator and the layout manager

use crate::error::{Result, SnapError};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Narrow file access interface
pub trait FileStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Size in bytes of a file
    fn size(&self, path: &Path) -> Result<u64>;

    /// Open a file for streaming reads
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Read a whole file
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open_read(path)?
            .read_to_end(&mut data)
            .map_err(|e| SnapError::at_path(path, e))?;
        Ok(data)
    }

    /// Replace a file's content
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Direct children of a directory, sorted by name
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

impl<S: FileStore + ?Sized> FileStore for &S {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }

    fn size(&self, path: &Path) -> Result<u64> {
        (**self).size(path)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        (**self).open_read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        (**self).write(path, data)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        (**self).list_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (**self).create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        (**self).remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        (**self).remove_dir_all(path)
    }
}

/// Local filesystem store
///
/// Writes go through a temporary file in the target directory and are
/// renamed into place, so a reader never sees a half-written file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

fn map_io(path: &Path, err: io::Error) -> SnapError {
    if err.kind() == io::ErrorKind::NotFound {
        SnapError::NotFound(path.display().to_string())
    } else {
        SnapError::at_path(path, err)
    }
}

impl FileStore for FsStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn size(&self, path: &Path) -> Result<u64> {
        fs::metadata(path).map(|m| m.len()).map_err(|e| map_io(path, e))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| map_io(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| map_io(parent, e))?;
        temp.write_all(data).map_err(|e| SnapError::at_path(path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SnapError::at_path(path, e))?;
        temp.persist(path)
            .map_err(|e| SnapError::at_path(path, e.error))?;
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| map_io(path, e))? {
            let entry = entry.map_err(|e| SnapError::at_path(path, e))?;
            children.push(entry.path());
        }
        children.sort();
        Ok(children)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| SnapError::at_path(path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| map_io(path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).map_err(|e| map_io(path, e))
    }
}
