//! Progress protocol guarantees across operations

use fieldsnap::{
    ArchiveBuilder, ArchiveExtractor, ArchiveSource, CancellationToken, ProgressEvent, SnapError,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn sources(dir: &Path, count: usize) -> Vec<ArchiveSource> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("item{:02}.dat", i));
            fs::write(&path, vec![b'x'; 100 + i]).unwrap();
            ArchiveSource::flat(path)
        })
        .collect()
}

fn assert_well_formed(events: &[ProgressEvent]) {
    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![events.len() - 1], "exactly one terminal event, last");

    let mut last = 0;
    for event in events {
        if let ProgressEvent::InProgress {
            processed_count,
            total_count,
            fraction,
            ..
        } = event
        {
            assert!(*processed_count >= last);
            assert!(*processed_count <= *total_count);
            assert!((0.0..=1.0).contains(fraction));
            last = *processed_count;
        }
    }
}

#[test]
fn test_build_and_extract_streams_are_well_formed() {
    let temp = TempDir::new().unwrap();
    let items = sources(temp.path(), 12);
    let archive = temp.path().join("p.zip");

    let mut build_events = Vec::new();
    ArchiveBuilder::default()
        .build(&items, &archive, &mut |e| build_events.push(e))
        .unwrap();
    assert_well_formed(&build_events);
    assert_eq!(build_events.len(), 13);

    let mut extract_events = Vec::new();
    ArchiveExtractor::default()
        .extract(&archive, temp.path().join("out"), &mut |e| {
            extract_events.push(e)
        })
        .unwrap();
    assert_well_formed(&extract_events);
}

#[test]
fn test_cancelled_build_ends_with_error() {
    let temp = TempDir::new().unwrap();
    let items = sources(temp.path(), 5);
    let archive = temp.path().join("cancelled.zip");

    let token = CancellationToken::new();
    let trigger = token.clone();
    let mut events = Vec::new();
    let result = ArchiveBuilder::default()
        .with_cancellation(token)
        .build(&items, &archive, &mut |e| {
            if matches!(e, ProgressEvent::InProgress { processed_count: 2, .. }) {
                trigger.cancel();
            }
            events.push(e);
        });

    assert!(matches!(result, Err(SnapError::Cancelled)));
    assert_well_formed(&events);
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
    assert!(!archive.exists());
}

#[test]
fn test_spawned_build_stream_ends_after_terminal_event() {
    let temp = TempDir::new().unwrap();
    let items = sources(temp.path(), 4);

    let (stream, handle) = ArchiveBuilder::default().spawn(items, temp.path().join("s.zip"));
    let events: Vec<ProgressEvent> = stream.collect();
    let report = handle.join().unwrap().unwrap();

    assert_well_formed(&events);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Completed { count, .. }) if *count == report.count()
    ));
}

#[test]
fn test_event_wire_shape() {
    let event = ProgressEvent::InProgress {
        processed_count: 1,
        total_count: 4,
        current_item: "c-1/photo.jpg".to_string(),
        fraction: 0.25,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "in_progress");
    assert_eq!(value["processed_count"], 1);

    let done = serde_json::to_value(ProgressEvent::Completed {
        count: 4,
        total_bytes: 10,
        output_path: None,
    })
    .unwrap();
    assert_eq!(done["type"], "completed");
    assert!(done.get("output_path").is_none());
}
