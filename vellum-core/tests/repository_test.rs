//! Integration tests exercising a working copy end to end on disk.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vellum_core::commit;
use vellum_core::repository::{Repository, DEFAULT_BRANCH, META_DIR};
use vellum_core::{Error, ObjectKind};

fn work_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init_work_tree(dir.path(), DEFAULT_BRANCH).unwrap();
    (dir, repo)
}

#[test]
fn stage_and_commit_single_file() {
    let (dir, repo) = work_repo();
    fs::write(dir.path().join("foo.txt"), "hello").unwrap();
    let blob = repo.stage(Path::new("foo.txt")).unwrap();
    let tip = repo.commit("first").unwrap();

    let record = commit::load(repo.store(), tip).unwrap();
    assert_eq!(record.message, "first");
    assert_eq!(record.manifest.len(), 1);
    assert_eq!(record.manifest[0].path, "foo.txt");
    assert_eq!(record.manifest[0].id, blob);

    // The blob round-trips byte for byte.
    let (kind, payload) = repo.store().get(blob).unwrap();
    assert_eq!(kind, ObjectKind::Blob);
    assert_eq!(payload, b"hello");
}

#[test]
fn identical_content_is_stored_once() {
    let (dir, repo) = work_repo();
    fs::write(dir.path().join("a.txt"), "same content").unwrap();
    fs::write(dir.path().join("b.txt"), "same content").unwrap();
    let a = repo.stage(Path::new("a.txt")).unwrap();
    let b = repo.stage(Path::new("b.txt")).unwrap();
    assert_eq!(a, b);
    assert_eq!(repo.store().list().unwrap().len(), 1);
    assert_eq!(repo.staged().unwrap().len(), 2);
}

#[test]
fn commit_history_walks_oldest_to_newest() {
    let (dir, repo) = work_repo();

    fs::write(dir.path().join("f.txt"), "v1").unwrap();
    repo.stage(Path::new("f.txt")).unwrap();
    let c1 = repo.commit("one").unwrap();

    fs::write(dir.path().join("f.txt"), "v2").unwrap();
    repo.stage(Path::new("f.txt")).unwrap();
    let c2 = repo.commit("two").unwrap();

    fs::write(dir.path().join("f.txt"), "v3").unwrap();
    repo.stage(Path::new("f.txt")).unwrap();
    let c3 = repo.commit("three").unwrap();

    let walk = commit::ancestors_until(repo.store(), c3, None).unwrap();
    assert_eq!(walk.commits, vec![c1, c2, c3]);

    let walk = commit::ancestors_until(repo.store(), c3, Some(c3)).unwrap();
    assert!(walk.commits.is_empty());
}

#[test]
fn commit_messages_are_flattened_to_one_line() {
    let (dir, repo) = work_repo();
    fs::write(dir.path().join("f.txt"), "x").unwrap();
    repo.stage(Path::new("f.txt")).unwrap();
    let tip = repo.commit("summary\n\nlong body").unwrap();
    let record = commit::load(repo.store(), tip).unwrap();
    assert_eq!(record.message, "summary  long body");
}

#[test]
fn open_work_tree_requires_a_repository() {
    let dir = TempDir::new().unwrap();
    let err = Repository::open_work_tree(dir.path()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn reopened_repository_sees_prior_state() {
    let (dir, repo) = work_repo();
    fs::write(dir.path().join("keep.txt"), "kept").unwrap();
    repo.stage(Path::new("keep.txt")).unwrap();
    let tip = repo.commit("persisted").unwrap();
    drop(repo);

    let reopened = Repository::open_work_tree(dir.path()).unwrap();
    assert_eq!(reopened.current_tip().unwrap(), Some(tip));
    assert!(dir.path().join(META_DIR).join("objects").is_dir());
    let log = reopened.log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1.message, "persisted");
}
