/// Backup layout example: save snapshots, list them, prune old ones
///
/// Run with: cargo run --example backup
use anyhow::Result;
use fieldsnap::{BackupLayoutManager, Record, Snapshot, SortOrder};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== fieldsnap Backup Example ===\n");

    let workdir = tempfile::tempdir()?;
    let layout = BackupLayoutManager::new(workdir.path().join("backups"));

    println!("1. Saving three backups...");
    for round in 1..=3 {
        let mut snapshot = Snapshot::new(env!("CARGO_PKG_VERSION"));
        snapshot.metadata.description = Some(format!("round {}", round));
        snapshot.metadata.created_at += chrono::Duration::seconds(round);
        snapshot.set_table("facilities", vec![Record::new("f1").with("name", "North")]);
        snapshot.set_table(
            "clients",
            (0..round * 10)
                .map(|i| Record::new(format!("c{}", i)).with("facility_id", "f1"))
                .collect(),
        );
        let path = layout.create(&snapshot)?;
        println!("   ✓ {}", path.display());
    }

    println!("\n2. Listing (largest first)...");
    let listing = layout.list(SortOrder::LargestFirst)?;
    for backup in &listing.backups {
        println!(
            "   {} {} records, {} bytes, created {}",
            backup.id,
            backup.total_records,
            backup.size_bytes,
            backup.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n3. Pruning to the newest backup...");
    let pruned = layout.prune(1)?;
    println!("   ✓ removed {}", pruned.deleted_count());

    println!("\n✓ Example complete!");
    Ok(())
}
