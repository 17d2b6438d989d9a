//! Error handling and edge case tests.

use crossbeam_channel::bounded;
use koma_store::{
    DirHandle, Directory, FsDirectory, MemoryDirectory, OpenOutcome, Payload, Permission,
    Project, ProjectConfig, ProjectError, SaveOutcome, Shot, MANIFEST_FILENAME,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn test_project(dir: &TempDir, cache: &str) -> Project {
    Project::new(ProjectConfig {
        cache_path: dir.path().join(cache),
        ..Default::default()
    })
    .unwrap()
}

fn shot(tag: &str) -> Shot {
    Shot::new(
        Payload::new(format!("{tag} jpg").into_bytes()),
        Payload::new(format!("{tag} lv").into_bytes()),
    )
}

/// A saved project in `dir`, with a raw file on frame 0.
fn saved_directory(dir: &TempDir) -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new("saved"));
    let project = test_project(dir, "cache-saved").with_local(directory.clone());
    project.set_shot(0, 0, shot("a").with_raw(Payload::from(&b"raw"[..])));
    project.set_shot(1, 0, shot("b"));
    project.save().unwrap();
    directory
}

// --- Open Errors ---

#[test]
fn test_open_permission_denied_leaves_document() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache");
    project.set_shot(3, 0, shot("keep"));

    let denied = Arc::new(MemoryDirectory::with_permission("locked", Permission::Denied));
    let result = project.open(Some(denied));

    assert!(matches!(result, Err(ProjectError::PermissionDenied(_))));
    assert_eq!(project.shot(3, 0), Some(shot("keep")));
    assert!(project.directory().is_none());
}

#[test]
fn test_open_prompt_accepted() {
    let dir = TempDir::new().unwrap();
    let saved = saved_directory(&dir);
    saved.set_permission(Permission::Prompt { accept: true });

    let project = test_project(&dir, "cache");
    assert_eq!(project.open(Some(saved)).unwrap(), OpenOutcome::Opened);
    assert_eq!(project.duration(), 2);
}

#[test]
fn test_open_without_picker() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache");

    assert!(matches!(project.open(None), Err(ProjectError::NoDirectoryBound)));
    assert!(!project.is_opening());
}

#[test]
fn test_missing_raw_degrades() {
    let dir = TempDir::new().unwrap();
    let saved = saved_directory(&dir);
    saved.remove_entry("Untitled_layer=0_0000.dng").unwrap();

    let project = test_project(&dir, "cache");
    project.open(Some(saved)).unwrap();

    let shot = project.shot(0, 0).unwrap();
    assert!(shot.raw.is_none());
    assert_eq!(shot.jpg.bytes(), b"a jpg");
}

#[test]
fn test_missing_jpg_fails_and_leaves_document() {
    let dir = TempDir::new().unwrap();
    let saved = saved_directory(&dir);
    saved.remove_entry("Untitled_layer=0_0001.jpg").unwrap();

    let project = test_project(&dir, "cache");
    project.set_shot(0, 0, shot("keep"));

    let err = project.open(Some(saved)).unwrap_err();
    match err {
        ProjectError::NotFound { directory, filename } => {
            assert_eq!(directory, "saved");
            assert_eq!(filename, "Untitled_layer=0_0001.jpg");
        }
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert_eq!(project.shot(0, 0), Some(shot("keep")));
    assert_eq!(project.duration(), 1);
}

#[test]
fn test_missing_manifest() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache");

    let err = project.open(Some(Arc::new(MemoryDirectory::new("empty")))).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_corrupt_manifest() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(MemoryDirectory::new("broken"));
    broken.write_file(MANIFEST_FILENAME, b"{\"komas\": [").unwrap();

    let project = test_project(&dir, "cache");
    let result = project.open(Some(broken));
    assert!(matches!(result, Err(ProjectError::Deserialization(_))));
}

#[test]
fn test_newer_format_version_rejected() {
    let dir = TempDir::new().unwrap();
    let future = Arc::new(MemoryDirectory::new("future"));
    future
        .write_file(MANIFEST_FILENAME, br#"{"formatVersion": 2, "name": "next"}"#)
        .unwrap();

    let project = test_project(&dir, "cache");
    let result = project.open(Some(future));
    assert!(matches!(result, Err(ProjectError::InvalidFormat(_))));
    assert_eq!(project.name(), "Untitled");
}

#[test]
fn test_old_manifest_takes_defaults() {
    let dir = TempDir::new().unwrap();
    let old = Arc::new(MemoryDirectory::new("old"));
    old.write_file(
        MANIFEST_FILENAME,
        br#"{"name": "old", "fps": 8, "komas": [{"shots": []}, {"shots": []}], "captureShot": null}"#,
    )
    .unwrap();

    let project = test_project(&dir, "cache");
    project.open(Some(old)).unwrap();

    assert_eq!(project.name(), "old");
    assert_eq!(project.duration(), 2);
    project.with_document(|doc| {
        assert_eq!(doc.fps, 8);
        assert_eq!(doc.layers.len(), 2);
        assert_eq!(doc.capture_shot.frame, 0);
        assert_eq!(doc.camera_configs["iso"], 100);
    });
}

#[test]
fn test_fractional_onionskin_opens() {
    let dir = TempDir::new().unwrap();
    let saved = Arc::new(MemoryDirectory::new("onion"));
    saved
        .write_file(
            MANIFEST_FILENAME,
            br#"{"name": "p", "onionskin": -0.5, "komas": []}"#,
        )
        .unwrap();

    let project = test_project(&dir, "cache");
    project.open(Some(saved)).unwrap();

    project.with_document(|doc| assert_eq!(doc.onionskin, -0.5));
}

#[test]
fn test_null_koma_entries_open_as_empty() {
    let dir = TempDir::new().unwrap();
    let saved = Arc::new(MemoryDirectory::new("holes"));
    saved.write_file("p_layer=0_0001.jpg", b"jpg").unwrap();
    saved.write_file("p_layer=0_lv_0001.jpg", b"lv").unwrap();
    saved
        .write_file(
            MANIFEST_FILENAME,
            br#"{
                "name": "p",
                "komas": [
                    null,
                    {"shots": [{
                        "jpg": {"$type": "blob", "filename": "p_layer=0_0001.jpg"},
                        "lv": {"$type": "blob", "filename": "p_layer=0_lv_0001.jpg"}
                    }]}
                ]
            }"#,
        )
        .unwrap();

    let project = test_project(&dir, "cache");
    project.open(Some(saved)).unwrap();

    assert_eq!(project.duration(), 2);
    assert!(project.shot(0, 0).is_none());
    assert_eq!(project.layer_count(0), 0);
    assert_eq!(project.shot(1, 0).unwrap().jpg.bytes(), b"jpg");
}

#[test]
fn test_failed_open_keeps_blob_mappings() {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(MemoryDirectory::new("local"));
    let project = test_project(&dir, "cache").with_local(local.clone());
    project.set_shot(0, 0, shot("a"));
    project.save().unwrap();

    let broken = saved_directory(&dir);
    broken.remove_entry("Untitled_layer=0_0001.jpg").unwrap();
    assert!(project.open(Some(broken)).unwrap_err().is_not_found());

    let SaveOutcome::Saved(report) = project.save().unwrap() else {
        panic!("Expected Saved");
    };
    assert_eq!(report.blobs_written, 0);
    assert_eq!(report.blobs_skipped, 2);
    assert!(project.directory().unwrap().is_same_entry(&*local));
}

// --- Concurrency Guards ---

#[test]
fn test_concurrent_open_is_rejected() {
    let dir = TempDir::new().unwrap();
    let saved: DirHandle = saved_directory(&dir);
    let (entered_tx, entered) = bounded::<()>(1);
    let (release, release_rx) = bounded::<()>(1);

    let picked = saved.clone();
    let project = Arc::new(test_project(&dir, "cache").with_picker(
        move || -> koma_store::Result<DirHandle> {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(picked.clone())
        },
    ));

    let opener = {
        let project = Arc::clone(&project);
        thread::spawn(move || project.open(None))
    };
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(project.is_opening());
    assert_eq!(project.open(Some(saved)).unwrap(), OpenOutcome::AlreadyOpening);
    assert_eq!(project.save().unwrap(), SaveOutcome::Skipped);

    release.send(()).unwrap();
    assert_eq!(opener.join().unwrap().unwrap(), OpenOutcome::Opened);
    assert!(!project.is_opening());
    assert_eq!(project.duration(), 2);
}

// --- Save Errors ---

#[test]
fn test_save_unbound_without_picker() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache");
    project.set_shot(0, 0, shot("a"));

    assert!(matches!(project.save(), Err(ProjectError::NoDirectoryBound)));
    assert!(!project.is_saving());
    assert!(project.has_unsaved_changes());
}

#[test]
fn test_save_as_cancelled() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache").with_picker(|| -> koma_store::Result<DirHandle> {
        Err(ProjectError::PermissionDenied("picker".into()))
    });

    let err = project.save_as().unwrap_err();
    assert!(err.is_cancellation());
    assert!(project.directory().is_none());
}

#[test]
fn test_save_to_revoked_directory() {
    let dir = TempDir::new().unwrap();
    let fs_dir = dir.path().join("project");
    let directory: DirHandle = Arc::new(FsDirectory::create(&fs_dir).unwrap());
    let project = test_project(&dir, "cache").with_local(directory);
    project.set_shot(0, 0, shot("a"));

    std::fs::remove_dir_all(&fs_dir).unwrap();

    assert!(project.save().is_err());
    // The coalescer is released after a failure
    assert!(!project.is_saving());
}

#[test]
fn test_invalid_filename_rejected() {
    let dir = TempDir::new().unwrap();
    let directory = FsDirectory::create(dir.path().join("project")).unwrap();

    let result = directory.write_file("../escape.jpg", b"nope");
    assert!(matches!(result, Err(ProjectError::InvalidFilename(_))));
}

#[test]
fn test_out_of_range_reads_are_not_errors() {
    let dir = TempDir::new().unwrap();
    let project = test_project(&dir, "cache");

    assert!(project.shot(100, 100).is_none());
    assert_eq!(project.layer_count(100), 0);
    assert!(!project.undo());
    assert!(!project.redo());
}
