//! Full sync, incremental sync and metadata commit behavior.

mod common;

use bridge_traits::{ChangeKind, WatchEventKind};
use common::*;
use core_runtime::events::{CoreEvent, ErrorCategory, SyncEvent};
use core_sync::{ChangeDescriptor, FileMetadataRecord, MetadataCommit};

#[tokio::test]
async fn test_full_sync_downloads_and_mirrors_missing_files() {
    let mut h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    let cloud = MemoryProvider::new();
    nas.put("photos/cat.jpg", "meow", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.add_provider("cloud", cloud.clone()).await.unwrap();

    let report = h.engine.full_sync().await.unwrap();

    assert_eq!(report.remote_applied, 1);
    assert!(report.failed_providers.is_empty());
    assert_eq!(h.read("photos/cat.jpg").as_deref(), Some("meow"));
    assert_eq!(cloud.content("photos/cat.jpg").as_deref(), Some("meow"));
    assert!(nas.uploads().is_empty());

    let record = h.engine.metadata().get("photos/cat.jpg").await.unwrap();
    assert_eq!(record.content_hash, hash_of("meow"));
    assert_eq!(record.last_sync_at, NOW_MILLIS);

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Sync(SyncEvent::FileDownloaded { provider, path, size: 4 })
            if provider == "nas" && path == "photos/cat.jpg"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Sync(SyncEvent::Progress { phase, .. }) if phase == "fullSync"
    )));
}

#[tokio::test]
async fn test_full_sync_skips_provider_whose_listing_fails() {
    let mut h = Harness::new(quiet_config());
    let broken = MemoryProvider::new();
    broken.set_fail_listing(true);
    let nas = MemoryProvider::new();
    nas.put("a.txt", "alpha", NOW_MILLIS);
    h.engine.add_provider("broken", broken.clone()).await.unwrap();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    let report = h.engine.full_sync().await.unwrap();

    assert_eq!(report.failed_providers, vec!["broken".to_string()]);
    assert_eq!(h.read("a.txt").as_deref(), Some("alpha"));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        CoreEvent::Sync(SyncEvent::Error { category: ErrorCategory::Provider, provider: Some(p), .. })
            if p == "broken"
    )));
}

#[tokio::test]
async fn test_downloaded_file_is_not_uploaded_back() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    nas.put("song.flac", "la la la", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    h.engine.full_sync().await.unwrap();

    // The watcher reports the file the download just wrote.
    h.engine
        .enqueue(ChangeDescriptor::local("song.flac", ChangeKind::Created, NOW_MILLIS))
        .await;
    assert_eq!(h.engine.drain_pending().await, 1);
    assert!(nas.uploads().is_empty());
}

#[tokio::test]
async fn test_incremental_sync_drains_local_then_polls_remote() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    h.write("local.txt", "from here");
    h.engine
        .enqueue(ChangeDescriptor::local("local.txt", ChangeKind::Created, NOW_MILLIS))
        .await;
    nas.put("remote.txt", "from there", NOW_MILLIS);
    nas.push_change("remote.txt", ChangeKind::Created);

    let report = h.engine.incremental_sync().await.unwrap();

    assert_eq!(report.local_processed, 1);
    assert_eq!(report.remote_applied, 1);
    assert_eq!(nas.content("local.txt").as_deref(), Some("from here"));
    assert_eq!(h.read("remote.txt").as_deref(), Some("from there"));
}

#[tokio::test]
async fn test_remote_delete_removes_unchanged_local_copy() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    let cloud = MemoryProvider::new();
    nas.put("old.txt", "stale", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.add_provider("cloud", cloud.clone()).await.unwrap();
    h.engine.full_sync().await.unwrap();
    assert!(h.read("old.txt").is_some());

    nas.remove("old.txt");
    nas.push_change("old.txt", ChangeKind::Deleted);
    h.engine.incremental_sync().await.unwrap();

    assert!(h.read("old.txt").is_none());
    assert!(h.engine.metadata().get("old.txt").await.is_none());
    assert!(cloud.calls().contains(&Call::Delete("old.txt".to_string())));
}

#[tokio::test]
async fn test_remote_delete_keeps_locally_modified_copy() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    nas.put("draft.txt", "v1", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.full_sync().await.unwrap();

    h.write("draft.txt", "v2 with local edits");
    nas.remove("draft.txt");
    nas.push_change("draft.txt", ChangeKind::Deleted);
    h.engine.incremental_sync().await.unwrap();

    assert_eq!(h.read("draft.txt").as_deref(), Some("v2 with local edits"));
    assert_eq!(h.engine.status().await.queued, 1);

    // The kept copy goes back up on the next drain.
    h.engine.drain_pending().await;
    assert_eq!(nas.content("draft.txt").as_deref(), Some("v2 with local edits"));
}

#[tokio::test]
async fn test_remote_directory_changes_apply_locally() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    nas.push_change("albums", ChangeKind::DirCreated);
    h.engine.incremental_sync().await.unwrap();
    assert!(h.path("albums").is_dir());
    assert!(h.engine.metadata().get("albums").await.unwrap().is_directory);

    nas.push_change("albums", ChangeKind::DirDeleted);
    h.engine.incremental_sync().await.unwrap();
    assert!(!h.path("albums").exists());
    assert!(h.engine.metadata().get("albums").await.is_none());
}

#[tokio::test]
async fn test_remote_directory_delete_keeps_untracked_content() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    nas.push_change("work", ChangeKind::DirCreated);
    h.engine.incremental_sync().await.unwrap();

    h.write("work/unsynced.txt", "mine");
    nas.push_change("work", ChangeKind::DirDeleted);
    h.engine.incremental_sync().await.unwrap();

    assert_eq!(h.read("work/unsynced.txt").as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_local_delete_and_directory_creation_propagate() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    h.write("gone.txt", "soon deleted");
    h.engine
        .enqueue(ChangeDescriptor::local("gone.txt", ChangeKind::Created, NOW_MILLIS))
        .await;
    h.engine.drain_pending().await;

    std::fs::remove_file(h.path("gone.txt")).unwrap();
    std::fs::create_dir_all(h.path("new-dir")).unwrap();
    h.engine
        .enqueue(ChangeDescriptor::local("gone.txt", ChangeKind::Deleted, NOW_MILLIS))
        .await;
    h.engine
        .enqueue(ChangeDescriptor::local("new-dir", ChangeKind::DirCreated, NOW_MILLIS))
        .await;
    assert_eq!(h.engine.drain_pending().await, 2);

    assert!(nas.content("gone.txt").is_none());
    assert!(nas.has_folder("new-dir"));
    assert!(h.engine.metadata().get("gone.txt").await.is_none());
}

#[tokio::test]
async fn test_require_all_providers_leaves_metadata_on_partial_failure() {
    let h = Harness::new(quiet_config().with_metadata_commit(MetadataCommit::RequireAllProviders));
    let ok = MemoryProvider::new();
    let flaky = MemoryProvider::failing_uploads();
    h.engine.add_provider("ok", ok.clone()).await.unwrap();
    h.engine.add_provider("flaky", flaky.clone()).await.unwrap();

    h.write("x.bin", "payload");
    h.engine
        .enqueue(ChangeDescriptor::local("x.bin", ChangeKind::Created, NOW_MILLIS))
        .await;
    h.engine.drain_pending().await;
    assert!(h.engine.metadata().get("x.bin").await.is_none());

    // Once the flaky provider recovers the change is retried in full.
    flaky.set_fail_uploads(false);
    h.engine
        .enqueue(ChangeDescriptor::local("x.bin", ChangeKind::Modified, NOW_MILLIS))
        .await;
    h.engine.drain_pending().await;
    assert!(h.engine.metadata().get("x.bin").await.is_some());
    assert_eq!(flaky.content("x.bin").as_deref(), Some("payload"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metadata_survives_restart_and_offline_edits_are_found() {
    let config = quiet_config().with_scan_local_on_start(true);
    let mut h = Harness::new(config.clone());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.start().await.unwrap();

    h.write("keep.txt", "stable");
    h.write("edit.txt", "before");
    h.notify(WatchEventKind::Created, "keep.txt");
    h.notify(WatchEventKind::Created, "edit.txt");
    h.wait_for(|e| matches!(e, CoreEvent::Sync(SyncEvent::Success { path, .. }) if path == "keep.txt"))
        .await;
    h.wait_for(|e| matches!(e, CoreEvent::Sync(SyncEvent::Success { path, .. }) if path == "edit.txt"))
        .await;
    h.engine.stop().await.unwrap();

    // Edited while nothing was running.
    h.write("edit.txt", "after");

    let Harness { dir, root, .. } = h;
    let h = Harness::with_root(dir, root, config.with_scan_local_on_start(false));
    let nas2 = MemoryProvider::new();
    h.engine.add_provider("nas", nas2.clone()).await.unwrap();
    h.engine.start().await.unwrap();
    assert_eq!(h.engine.status().await.tracked_entries, 2);
    h.engine.stop().await.unwrap();
    assert!(nas2.uploads().is_empty());

    let Harness { dir, root, .. } = h;
    let h = Harness::with_root(dir, root, quiet_config().with_scan_local_on_start(true));
    let nas3 = MemoryProvider::new();
    h.engine.add_provider("nas", nas3.clone()).await.unwrap();
    h.engine.start().await.unwrap();
    h.engine.drain_pending().await;
    h.engine.stop().await.unwrap();

    assert_eq!(nas3.uploads(), vec!["edit.txt".to_string()]);
}

#[tokio::test]
async fn test_entries_deleted_while_stopped_are_deleted_remotely() {
    let config = quiet_config().with_scan_local_on_start(true);
    let h = Harness::new(config.clone());
    let nas = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.start().await.unwrap();

    h.write("gone.txt", "old");
    h.write("kept.txt", "kept");
    std::fs::create_dir_all(h.path("olddir")).unwrap();
    for (path, kind) in [
        ("gone.txt", ChangeKind::Created),
        ("kept.txt", ChangeKind::Created),
        ("olddir", ChangeKind::DirCreated),
    ] {
        h.engine
            .enqueue(ChangeDescriptor::local(path, kind, NOW_MILLIS))
            .await;
    }
    h.engine.drain_pending().await;
    h.engine.stop().await.unwrap();
    assert_eq!(nas.content("gone.txt").as_deref(), Some("old"));
    assert!(nas.has_folder("olddir"));

    // Removed while nothing was running.
    std::fs::remove_file(h.path("gone.txt")).unwrap();
    std::fs::remove_dir(h.path("olddir")).unwrap();

    let Harness { dir, root, .. } = h;
    let h = Harness::with_root(dir, root, config);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    let before = nas.calls().len();
    h.engine.start().await.unwrap();
    h.engine.full_sync().await.unwrap();
    h.engine.stop().await.unwrap();

    let calls = nas.calls()[before..].to_vec();
    assert!(calls.contains(&Call::Delete("gone.txt".to_string())));
    assert!(calls.contains(&Call::DeleteFolder("olddir".to_string())));
    assert!(!calls.iter().any(|call| matches!(call, Call::Download(_))));
    assert!(h.read("gone.txt").is_none());
    assert!(!h.path("olddir").exists());
    assert_eq!(h.read("kept.txt").as_deref(), Some("kept"));
    assert!(nas.content("gone.txt").is_none());
    assert!(h.engine.metadata().get("gone.txt").await.is_none());
    assert!(h.engine.metadata().get("olddir").await.is_none());
    assert!(h.engine.metadata().get("kept.txt").await.is_some());
}

#[tokio::test]
async fn test_metadata_dir_and_backups_are_never_synced() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    nas.put(".sync/metadata.json", "{}", NOW_MILLIS);
    nas.put("notes.txt.backup.1699999999", "old", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    let report = h.engine.full_sync().await.unwrap();

    assert_eq!(report.remote_applied, 0);
    assert!(h.read("notes.txt.backup.1699999999").is_none());
    assert!(h
        .engine
        .metadata()
        .get(".sync/metadata.json")
        .await
        .is_none());
}

#[tokio::test]
async fn test_existing_record_is_refreshed_when_content_matches() {
    let h = Harness::new(quiet_config());
    let local = h.write("match.txt", "same bytes");
    h.engine
        .metadata()
        .upsert(
            "match.txt",
            FileMetadataRecord::file("stale-hash", 1, mtime_millis(&local), 0),
        )
        .await;
    let nas = MemoryProvider::new();
    nas.put("match.txt", "same bytes", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();

    h.engine.full_sync().await.unwrap();

    let record = h.engine.metadata().get("match.txt").await.unwrap();
    assert_eq!(record.content_hash, hash_of("same bytes"));
    assert_eq!(record.size, 10);
}

#[tokio::test]
async fn test_upload_then_download_preserves_content_hash() {
    let source = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    source.engine.add_provider("nas", nas.clone()).await.unwrap();
    source.write("deep/nested/data.bin", "round and round");
    source
        .engine
        .enqueue(ChangeDescriptor::local(
            "deep/nested/data.bin",
            ChangeKind::Created,
            NOW_MILLIS,
        ))
        .await;
    source.engine.drain_pending().await;

    let replica = Harness::new(quiet_config());
    replica.engine.add_provider("nas", nas.clone()).await.unwrap();
    replica.engine.full_sync().await.unwrap();

    let uploaded = source.engine.metadata().get("deep/nested/data.bin").await.unwrap();
    let downloaded = replica.engine.metadata().get("deep/nested/data.bin").await.unwrap();
    assert_eq!(uploaded.content_hash, downloaded.content_hash);
    assert_eq!(
        replica.read("deep/nested/data.bin").as_deref(),
        Some("round and round")
    );
}

#[tokio::test]
async fn test_repeated_incremental_sync_makes_no_extra_calls() {
    let h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    let cloud = MemoryProvider::new();
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.add_provider("cloud", cloud.clone()).await.unwrap();

    h.write("a.txt", "alpha");
    h.engine
        .enqueue(ChangeDescriptor::local("a.txt", ChangeKind::Created, NOW_MILLIS))
        .await;
    nas.put("b.txt", "beta", NOW_MILLIS);
    nas.push_change("b.txt", ChangeKind::Created);
    h.engine.incremental_sync().await.unwrap();

    let (nas_calls, cloud_calls) = (nas.calls().len(), cloud.calls().len());
    h.engine.incremental_sync().await.unwrap();
    h.engine.incremental_sync().await.unwrap();

    assert_eq!(nas.calls().len(), nas_calls);
    assert_eq!(cloud.calls().len(), cloud_calls);
}

fn rejected_paths(events: &[CoreEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Sync(SyncEvent::Error {
                category: ErrorCategory::Provider,
                path: Some(path),
                message,
                ..
            }) if message.starts_with("rejected remote path") => Some(path.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_full_sync_rejects_paths_outside_sync_root() {
    let mut h = Harness::new(quiet_config());
    let nas = MemoryProvider::new();
    nas.put("../escaped.txt", "outside", NOW_MILLIS);
    nas.put("a/../../b", "outside", NOW_MILLIS);
    nas.put("", "nameless", NOW_MILLIS);
    nas.put("inside.txt", "fine", NOW_MILLIS);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.start().await.unwrap();

    h.engine.full_sync().await.unwrap();

    let mut rejected = rejected_paths(&h.drain_events());
    rejected.sort();
    assert_eq!(rejected, vec!["", "../escaped.txt", "a/../../b"]);
    assert!(!h.dir.path().join("escaped.txt").exists());
    assert!(!h.dir.path().join("b").exists());
    assert!(h.path(".sync").is_dir());
    assert_eq!(h.read("inside.txt").as_deref(), Some("fine"));
    assert_eq!(h.engine.status().await.tracked_entries, 1);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_incremental_sync_rejects_paths_outside_sync_root() {
    let mut h = Harness::new(quiet_config());
    let sibling = h.dir.path().join("sibling");
    std::fs::create_dir_all(&sibling).unwrap();
    std::fs::write(sibling.join("keep.txt"), "untouched").unwrap();

    let nas = MemoryProvider::new();
    nas.put("a/../../b", "outside", NOW_MILLIS);
    nas.push_change("a/../../b", ChangeKind::Created);
    nas.push_change("..", ChangeKind::DirDeleted);
    nas.push_change("", ChangeKind::DirDeleted);
    nas.push_change("../sibling", ChangeKind::DirDeleted);
    h.engine.add_provider("nas", nas.clone()).await.unwrap();
    h.engine.start().await.unwrap();
    h.write("local.txt", "still here");

    h.engine.incremental_sync().await.unwrap();

    let mut rejected = rejected_paths(&h.drain_events());
    rejected.sort();
    assert_eq!(rejected, vec!["", "..", "../sibling", "a/../../b"]);
    assert!(!h.dir.path().join("b").exists());
    assert_eq!(
        std::fs::read_to_string(sibling.join("keep.txt")).unwrap(),
        "untouched"
    );
    assert!(h.root.is_dir());
    assert!(h.path(".sync").is_dir());
    assert_eq!(h.read("local.txt").as_deref(), Some("still here"));

    h.engine.stop().await.unwrap();
}
