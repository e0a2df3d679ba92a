#![no_main]

use fieldsnap::ArchiveExtractor;
use libfuzzer_sys::fuzz_target;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fuzz_target!(|data: &[u8]| {
    // Smaller than an end-of-central-directory record
    if data.len() < 22 {
        return;
    }

    let mut archive = match NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return,
    };
    if archive.write_all(data).is_err() || archive.flush().is_err() {
        return;
    }

    let dest = match TempDir::new() {
        Ok(d) => d,
        Err(_) => return,
    };

    // Errors are expected for malformed input; panics and escapes are not
    let _ = ArchiveExtractor::count_entries(archive.path());
    if let Ok(report) = ArchiveExtractor::default().extract(archive.path(), dest.path(), &mut |_| {}) {
        for file in &report.files {
            assert!(file.path.starts_with(dest.path()));
        }
    }
});
