/// Restore example: merge a backup into an in-memory store
///
/// Run with: cargo run --example restore
use anyhow::Result;
use fieldsnap::{
    BackupLayoutManager, EngineConfig, MemorySink, ProgressEvent, Record, RestoreOrchestrator,
    RestoreStrategy, Selection, Snapshot,
};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[restore]
table_order = ["facilities", "clients", "checkups"]
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== fieldsnap Restore Example ===\n");

    let config = EngineConfig::from_toml_str(CONFIG)?;
    let workdir = tempfile::tempdir()?;
    let layout = BackupLayoutManager::new(workdir.path());

    let mut snapshot = Snapshot::new(env!("CARGO_PKG_VERSION"));
    snapshot.set_table("checkups", vec![Record::new("k1").with("client_id", "c1")]);
    snapshot.set_table("clients", vec![Record::new("c1").with("name", "Ada")]);
    snapshot.set_table("facilities", vec![Record::new("f1").with("name", "North")]);
    let backup = layout.create(&snapshot)?;

    // Live data that only exists on this device
    let sink = MemorySink::new().with_table("clients", vec![Record::new("c7").with("name", "Local")]);
    let mut orchestrator = RestoreOrchestrator::new(sink, &config.restore);

    println!("1. Merging backup...");
    let report = orchestrator
        .restore_from(&layout, &backup, &RestoreStrategy::Merge, &mut print_progress)?
        .into_result()?;
    println!("   ✓ applied {:?}", report.applied_tables);
    println!("   clients now: {}", orchestrator.sink().table("clients").len());

    println!("\n2. Selective restore of one checkup...");
    let strategy = RestoreStrategy::Selective(Selection::records("checkups", ["k1"]));
    let report = orchestrator.restore(&snapshot, &strategy, &mut print_progress);
    println!(
        "   {:?}: applied {:?}, untouched {:?}",
        report.status(),
        report.applied_tables,
        report.skipped_tables
    );

    println!("\n✓ Example complete!");
    Ok(())
}

fn print_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::InProgress {
            current_item,
            fraction,
            ..
        } => println!("   {:>5.1}% {}", fraction * 100.0, current_item),
        ProgressEvent::Error { message } => println!("   ✗ {}", message),
        ProgressEvent::Completed { count, .. } => println!("   done: {} records", count),
    }
}
