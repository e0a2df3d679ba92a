/// Basic example: bundle media into a verified archive and extract it again
///
/// Run with: cargo run --example basic
use anyhow::Result;
use fieldsnap::{ArchiveBuilder, ArchiveExtractor, ArchiveSource, ProgressEvent};
use std::fs;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== fieldsnap Basic Example ===\n");

    let workdir = tempfile::tempdir()?;
    let media = workdir.path().join("media");
    fs::create_dir_all(&media)?;

    // Some payload files
    fs::write(media.join("front.jpg"), b"\xff\xd8\xff pretend jpeg data")?;
    fs::write(media.join("signature.png"), b"\x89PNG pretend signature")?;
    fs::write(media.join("notes.txt"), "Visit went well.\n".repeat(50))?;

    println!("1. Building archive...");
    let items = vec![
        ArchiveSource::grouped("checkup-001", media.join("front.jpg")),
        ArchiveSource::grouped("checkup-001", media.join("signature.png")),
        ArchiveSource::flat(media.join("notes.txt")),
    ];
    let archive = workdir.path().join("checkup-001.zip");
    let report = ArchiveBuilder::default().build(&items, &archive, &mut print_progress)?;
    println!(
        "   ✓ {} entries, {} bytes, {} skipped",
        report.count(),
        report.total_bytes,
        report.skipped.len()
    );
    for entry in &report.entries {
        println!("     {} {}", &entry.content_hash[..12], entry.entry_path);
    }

    println!("\n2. Extracting...");
    let out = workdir.path().join("restored");
    let extracted = ArchiveExtractor::default().extract(&archive, &out, &mut print_progress)?;
    match &extracted.verification {
        Some(v) if v.is_valid() => println!(
            "   ✓ {} files verified against the manifest",
            v.validated_count
        ),
        Some(v) => println!("   ✗ verification errors: {:?}", v.errors),
        None => println!("   - not verified"),
    }

    println!("\n✓ Example complete!");
    Ok(())
}

fn print_progress(event: ProgressEvent) {
    if let ProgressEvent::InProgress {
        processed_count,
        total_count,
        current_item,
        ..
    } = event
    {
        println!("   [{}/{}] {}", processed_count, total_count, current_item);
    }
}
