use nodegate_consistency::{
    ConsistencyTracker, StalenessCheck, SweepReport, TrackerConfig, WaitOutcome, WriteKind,
};
use nodegate_kernel::ManualClock;
use std::sync::Arc;
use std::time::Duration;

fn manual_tracker(window_ms: u64) -> (Arc<ConsistencyTracker>, Arc<ManualClock>) {
    let clock = ManualClock::shared();
    let tracker = ConsistencyTracker::with_clock(
        TrackerConfig {
            stale_window: Duration::from_millis(window_ms),
        },
        clock.clone(),
    );
    (Arc::new(tracker), clock)
}

#[test]
fn read_right_after_write_is_stale_until_window_elapses() {
    let (tracker, clock) = manual_tracker(1_000);
    let version = tracker.record_write("node-1", WriteKind::Update, None);
    assert_eq!(version, 1);

    let check = tracker.would_read_be_stale("node-1");
    assert!(check.stale);
    assert_eq!(check.version, Some(1));
    assert_eq!(check.wait, Some(Duration::from_millis(1_000)));

    clock.advance(Duration::from_millis(999));
    assert!(tracker.would_read_be_stale("node-1").stale);

    clock.advance(Duration::from_millis(1));
    assert_eq!(tracker.would_read_be_stale("node-1"), StalenessCheck::FRESH);
}

#[test]
fn newer_write_supersedes_older_window() {
    let (tracker, clock) = manual_tracker(1_000);
    assert_eq!(tracker.record_write("n", WriteKind::Create, None), 1);
    clock.advance(Duration::from_millis(600));
    assert_eq!(tracker.record_write("n", WriteKind::Update, None), 2);
    clock.advance(Duration::from_millis(500));

    // The first write alone would have expired by now.
    let check = tracker.would_read_be_stale("n");
    assert!(check.stale);
    assert_eq!(check.version, Some(2));
    assert_eq!(check.wait, Some(Duration::from_millis(500)));

    let record = tracker.write_record("n").expect("latest record");
    assert_eq!(record.operation, WriteKind::Update);
    assert_eq!(tracker.stats().active_writes, 1);
}

#[test]
fn versions_increase_strictly_across_keys() {
    let (tracker, _clock) = manual_tracker(1_000);
    let keys = ["a", "b", "a", "c", "b", "a"];
    let versions: Vec<u64> = keys
        .iter()
        .map(|key| tracker.record_write(*key, WriteKind::Update, None))
        .collect();

    assert!(versions.windows(2).all(|pair| pair[0] < pair[1]), "{versions:?}");
    assert_eq!(tracker.current_version(), 6);
}

#[test]
fn sweep_removes_entries_that_are_never_read_again() {
    let (tracker, clock) = manual_tracker(1_000);
    tracker.record_write("cold", WriteKind::Create, None);
    clock.advance(Duration::from_millis(2_000));
    tracker.record_write("warm", WriteKind::Create, None);

    clock.advance(Duration::from_millis(1_000));
    assert_eq!(tracker.sweep_expired(), SweepReport::default(), "exactly 3× is kept");

    clock.advance(Duration::from_millis(1));
    assert_eq!(
        tracker.sweep_expired(),
        SweepReport {
            writes_removed: 1,
            locks_removed: 1,
        }
    );
    assert!(tracker.write_record("cold").is_none());
    assert!(!tracker.has_lock("cold"));
    assert!(tracker.write_record("warm").is_some());
    assert!(tracker.has_lock("warm"));
}

#[test]
fn sweep_reclaims_write_records_left_by_lazy_lock_release() {
    let (tracker, clock) = manual_tracker(1_000);
    tracker.record_write("node-1", WriteKind::Update, None);
    clock.advance(Duration::from_millis(1_500));
    assert!(!tracker.would_read_be_stale("node-1").stale);

    clock.advance(Duration::from_millis(2_000));
    assert_eq!(
        tracker.sweep_expired(),
        SweepReport {
            writes_removed: 1,
            locks_removed: 0,
        }
    );
    assert_eq!(tracker.stats().active_writes, 0);
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_bounds_memory() {
    let tracker = Arc::new(ConsistencyTracker::new(TrackerConfig {
        stale_window: Duration::from_millis(1_000),
    }));
    tracker.record_write("node-1", WriteKind::Delete, None);
    let sweeper = tracker.start_sweeper(Duration::from_millis(30_000));

    tokio::time::sleep(Duration::from_millis(30_001)).await;
    tokio::task::yield_now().await;
    let stats = tracker.stats();
    assert_eq!(stats.active_writes, 0);
    assert_eq!(stats.active_locks, 0);
    sweeper.stop();
}

#[tokio::test(start_paused = true)]
async fn wait_polls_across_a_superseding_write() {
    let tracker = Arc::new(ConsistencyTracker::new(TrackerConfig::default()));
    tracker.record_write("node-1", WriteKind::Create, None);

    let writer = Arc::clone(&tracker);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        writer.record_write("node-1", WriteKind::Update, None);
    });

    // First window would close at 1000ms; the second write pushes it to 1500ms.
    let outcome = tracker
        .wait_for_consistency("node-1", Duration::from_millis(2_000))
        .await;
    assert_eq!(
        outcome,
        WaitOutcome::Consistent {
            waited: Duration::from_millis(1_500),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn wait_on_untouched_entity_returns_immediately() {
    let tracker = ConsistencyTracker::default();
    let outcome = tracker
        .wait_for_consistency("nobody", Duration::from_millis(2_000))
        .await;
    assert_eq!(
        outcome,
        WaitOutcome::Consistent {
            waited: Duration::ZERO,
        }
    );
}
