mod common;

use common::{Closed, Gated, context, registry, run, selection, skip_errors, start, text, wait_for_event};
use std::time::Duration;
use tandem_jobs::error::ErrorKind;
use tandem_jobs::{
    ConflictDecision, EventKind, Job, JobContext, JobKind, JobOptions, JobReport, JobState, PolicyChannel, Scheduler,
};
use tandem_vfs::backend::{MemoryBackend, Op};
use tandem_vfs::error::ErrorKind as VfsErrorKind;

fn fixture() -> MemoryBackend {
    MemoryBackend::with_files(
        "t",
        [
            ("src/a.txt", "the first file"),
            ("src/b.txt", "the second file"),
            ("src/deep/c.txt", "the third file"),
            ("dst/a.txt", "stale"),
        ],
    )
}

const MEMBERS: &[&str] = &["src/a.txt", "src/b.txt", "src/deep"];

fn copy_to(store: &MemoryBackend) -> JobKind {
    JobKind::Copy {
        destination: store.node("dst"),
    }
}

fn counts(report: &JobReport) -> (JobState, u64, u64, u64, u64) {
    (report.state, report.bytes_done, report.files_done, report.files_skipped, report.files_errored)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_and_resume_reach_the_same_result() {
    let baseline_store = fixture();
    let channel = PolicyChannel::default().on_conflict(ConflictDecision::Overwrite);
    let baseline = run(
        copy_to(&baseline_store),
        selection(&baseline_store, MEMBERS),
        context(&[&baseline_store], channel),
    )
    .await;
    assert_eq!(baseline.state, JobState::Completed);

    let store = fixture();
    let gate = Gated::new(ConflictDecision::Overwrite);
    let job = Job::new(
        copy_to(&store),
        selection(&store, MEMBERS),
        JobContext::new(registry(&[&store]), gate.clone()),
    );
    let mut events = job.events().unwrap();
    job.start().unwrap();

    gate.asked.notified().await;
    job.pause();
    gate.release.notify_one();
    wait_for_event(&mut events, |event| event.kind == EventKind::StateChanged(JobState::Paused)).await;
    assert_eq!(job.state(), JobState::Paused);
    let paused_at = job.snapshot();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job.snapshot(), paused_at);

    job.resume();
    let report = job.await_terminal_state().await;
    assert_eq!(counts(&report), counts(&baseline));
    assert_eq!(baseline_store.paths(), store.paths());
    assert_eq!(text(&store, "dst/a.txt").as_deref(), Some("the first file"));
    assert_eq!(text(&store, "dst/deep/c.txt"), text(&baseline_store, "dst/deep/c.txt"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_in_the_middle_of_a_file() {
    let content: Vec<u8> = (0..64u8).collect();
    let store = MemoryBackend::with_files("t", [("src/big.bin", content.clone())]);
    store.add_dir("dst");
    let gate = store.hold_reads("src/big.bin", 16);
    let options = JobOptions {
        buffer_size: 8,
        compute_totals: false,
    };
    let job = Job::new(
        copy_to(&store),
        selection(&store, &["src/big.bin"]),
        context(&[&store], skip_errors()).with_options(options),
    );
    let mut events = job.events().unwrap();
    job.start().unwrap();

    gate.reached().await;
    job.pause();
    gate.open();
    wait_for_event(&mut events, |event| event.kind == EventKind::StateChanged(JobState::Paused)).await;
    assert_eq!(job.state(), JobState::Paused);
    let paused_at = job.snapshot();
    assert_eq!(paused_at.bytes_done, 24);
    assert_eq!(paused_at.files_done, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job.snapshot(), paused_at);
    assert_eq!(store.read("dst/big.bin").map(|data| data.len()), Some(24));

    job.resume();
    let report = job.await_terminal_state().await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.bytes_done, 64);
    assert_eq!(report.files_done, 1);
    assert_eq!(store.read("dst/big.bin"), Some(content));
    assert_eq!(store.calls(Op::OpenRead), ["/src/big.bin"]);
}

#[tokio::test]
async fn test_cancel_wakes_a_pending_decision() {
    let store = fixture();
    let gate = Gated::new(ConflictDecision::Overwrite);
    let job = start(
        copy_to(&store),
        selection(&store, &["src/a.txt", "src/b.txt"]),
        JobContext::new(registry(&[&store]), gate.clone()),
    );
    gate.asked.notified().await;
    job.cancel();

    let report = job.await_terminal_state().await;
    assert_eq!(report.state, JobState::Interrupted);
    assert_eq!(text(&store, "dst/a.txt").as_deref(), Some("stale"));
    assert!(!store.contains("dst/b.txt"));
}

#[tokio::test]
async fn test_closed_channel_fails_the_job() {
    let store = fixture();
    let report = run(
        JobKind::Copy {
            destination: store.node("dst"),
        },
        selection(&store, &["src/a.txt"]),
        context(&[&store], Closed),
    )
    .await;

    assert_eq!(report.state, JobState::Failed);
    assert!(report.failure.unwrap().contains("decision channel closed"));
}

#[tokio::test]
async fn test_fatal_fault_fails_the_job() {
    let store = fixture();
    store.fail(Op::OpenRead, "src/b.txt", VfsErrorKind::ConcurrentAccessUnsupported("mem://t/src/b.txt".to_string()));
    let report = run(
        JobKind::Copy {
            destination: store.node("dst"),
        },
        selection(&store, &["src/b.txt", "src/deep"]),
        context(&[&store], skip_errors()),
    )
    .await;

    assert_eq!(report.state, JobState::Failed);
    assert!(!store.contains("dst/deep"));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let store = fixture();
    let job = Job::new(JobKind::Delete, selection(&store, &["src"]), context(&[&store], skip_errors()));
    job.cancel();
    job.start().unwrap();

    let report = job.await_terminal_state().await;
    assert_eq!(report.state, JobState::Interrupted);
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn test_start_only_once() {
    let store = fixture();
    let job = start(JobKind::Delete, selection(&store, &["src/a.txt"]), context(&[&store], skip_errors()));
    let err = job.start().unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyStarted(_)));
    assert_eq!(job.await_terminal_state().await.state, JobState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_bounds_running_jobs() {
    let store = fixture();
    let scheduler = Scheduler::new(1);
    let gate = Gated::new(ConflictDecision::Skip);
    let first = start(
        copy_to(&store),
        selection(&store, &["src/a.txt"]),
        JobContext::new(registry(&[&store]), gate.clone()).with_scheduler(scheduler.clone()),
    );
    gate.asked.notified().await;

    let second = start(
        JobKind::Delete,
        selection(&store, &["src/deep"]),
        context(&[&store], skip_errors()).with_scheduler(scheduler.clone()),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.state(), JobState::Created);
    assert!(store.contains("src/deep/c.txt"));

    gate.release.notify_one();
    assert_eq!(first.await_terminal_state().await.state, JobState::Completed);
    assert_eq!(second.await_terminal_state().await.state, JobState::Completed);
    assert!(!store.contains("src/deep"));
    assert_eq!(scheduler.available(), 1);
}

#[tokio::test]
async fn test_events_and_change_tracking() {
    let store = fixture();
    let job = Job::new(
        JobKind::Delete,
        selection(&store, &["src/deep/c.txt"]),
        context(&[&store], skip_errors()),
    );
    let mut events = job.events().unwrap();
    assert!(job.events().is_none());
    job.start().unwrap();
    let report = job.await_terminal_state().await;

    let mut kinds = Vec::new();
    while let Some(event) = events.recv().await {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&EventKind::StateChanged(JobState::Running)));
    assert!(kinds.contains(&EventKind::FileStarted(store.address("src/deep/c.txt"))));
    assert_eq!(kinds.last(), Some(&EventKind::Finished(report)));

    assert!(job.has_changed(&store.address("")));
    assert!(job.has_changed(&store.address("src/deep")));
    assert!(job.has_changed(&store.address("src")));
    assert!(!job.has_changed(&store.address("dst")));
}

#[tokio::test]
async fn test_unknown_progress_without_totals() {
    let store = fixture();
    let job = start(JobKind::Delete, selection(&store, &["src"]), context(&[&store], skip_errors()));
    job.await_terminal_state().await;
    let progress = job.snapshot();
    assert_eq!(progress.bytes_total, None);
    assert_eq!(progress.files_total, None);
    assert_eq!(progress.files_done, 3);
    assert!(progress.current_path.is_none());
}
