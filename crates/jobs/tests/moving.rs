mod common;

use common::{context, run, selection, skip_errors, text};
use tandem_jobs::{JobKind, JobState};
use tandem_vfs::backend::{MemoryBackend, Op};
use tandem_vfs::error::ErrorKind;

fn move_to(store: &MemoryBackend, folder: &str) -> JobKind {
    JobKind::Move {
        destination: store.node(folder),
    }
}

#[tokio::test]
async fn test_native_rename() {
    let store = MemoryBackend::with_files("t", [("src/a.txt", "alpha"), ("src/tree/b.txt", "beta")]);
    store.add_dir("dst");
    let report = run(move_to(&store, "dst"), selection(&store, &["src/a.txt", "src/tree"]), context(&[&store], skip_errors())).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(store.calls(Op::Rename), ["/src/a.txt", "/src/tree"]);
    assert!(store.calls(Op::OpenRead).is_empty());
    assert_eq!(text(&store, "dst/a.txt").as_deref(), Some("alpha"));
    assert_eq!(text(&store, "dst/tree/b.txt").as_deref(), Some("beta"));
    assert_eq!(store.paths(), ["/dst", "/dst/a.txt", "/dst/tree", "/dst/tree/b.txt", "/src"]);
}

#[tokio::test]
async fn test_copy_then_delete_without_native_move() {
    let store = MemoryBackend::with_files("t", [("src/tree/a.txt", "a"), ("src/tree/b.txt", "b")]).with_native_move(false);
    store.add_dir("dst");
    let report = run(move_to(&store, "dst"), selection(&store, &["src/tree"]), context(&[&store], skip_errors())).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.files_done, 2);
    assert!(store.calls(Op::Rename).is_empty());
    assert_eq!(store.calls(Op::Delete), ["/src/tree/a.txt", "/src/tree/b.txt", "/src/tree"]);
    assert_eq!(text(&store, "dst/tree/a.txt").as_deref(), Some("a"));
    assert!(!store.contains("src/tree"));
}

#[tokio::test]
async fn test_merge_into_existing_folder() {
    let store = MemoryBackend::with_files("t", [("src/tree/a.txt", "a"), ("dst/tree/b.txt", "b")]);
    let report = run(move_to(&store, "dst"), selection(&store, &["src/tree"]), context(&[&store], skip_errors())).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(store.calls(Op::Rename), ["/src/tree/a.txt"]);
    assert!(store.contains("dst/tree/a.txt"));
    assert!(store.contains("dst/tree/b.txt"));
    assert!(!store.contains("src/tree"));
}

#[tokio::test]
async fn test_failed_copy_keeps_source() {
    let store = MemoryBackend::with_files("t", [("src/tree/a.txt", "a"), ("src/tree/b.txt", "b")]).with_native_move(false);
    store.add_dir("dst");
    store.fail(Op::OpenWrite, "dst/tree/b.txt", ErrorKind::PermissionDenied("mem://t/dst/tree/b.txt".to_string()));
    let report = run(move_to(&store, "dst"), selection(&store, &["src/tree"]), context(&[&store], skip_errors())).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.files_skipped, 1);
    assert!(!store.contains("src/tree/a.txt"));
    assert!(store.contains("src/tree/b.txt"));
    assert!(store.contains("src/tree"));
}

#[tokio::test]
async fn test_move_between_stores() {
    let left = MemoryBackend::with_files("left", [("a.txt", "alpha")]);
    let right = MemoryBackend::new("right");
    let report = run(
        JobKind::Move {
            destination: right.node(""),
        },
        selection(&left, &["a.txt"]),
        context(&[&left, &right], skip_errors()),
    )
    .await;

    assert_eq!(report.state, JobState::Completed);
    assert!(left.calls(Op::Rename).is_empty());
    assert!(!left.contains("a.txt"));
    assert_eq!(text(&right, "a.txt").as_deref(), Some("alpha"));
}
