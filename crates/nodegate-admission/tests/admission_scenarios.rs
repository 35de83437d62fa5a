//! Scenario tests for the admission limiter: capacity, FIFO handoff,
//! timeouts, resets, and stress signalling.

use nodegate_admission::{AdmissionError, AdmissionLimiter, LimiterConfig, SlotHandle};
use nodegate_kernel::ManualClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn limiter(max_slots: usize, timeout_ms: u64) -> Arc<AdmissionLimiter> {
    Arc::new(AdmissionLimiter::new(LimiterConfig {
        max_slots,
        slot_timeout: Duration::from_millis(timeout_ms),
    }))
}

fn spawn_acquire(limiter: &Arc<AdmissionLimiter>) -> JoinHandle<Result<SlotHandle, AdmissionError>> {
    let limiter = Arc::clone(limiter);
    tokio::spawn(async move { limiter.acquire().await })
}

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn third_acquire_times_out_when_two_slots_are_held() {
    let limiter = limiter(2, 200);
    let start = tokio::time::Instant::now();

    let (first, second, third) = tokio::join!(limiter.acquire(), limiter.acquire(), async {
        let outcome = limiter.acquire().await;
        (outcome, start.elapsed())
    });

    first.expect("first slot is immediate");
    second.expect("second slot is immediate");
    let (outcome, waited) = third;
    let err = outcome.expect_err("third request must time out");
    assert!(
        matches!(
            err,
            AdmissionError::Timeout {
                active: 2,
                max_slots: 2,
                queue_length: 0,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(waited >= Duration::from_millis(200), "waited {waited:?}");
    assert!(waited < Duration::from_millis(210), "waited {waited:?}");

    let stats = limiter.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.active, 2);
}

#[tokio::test(start_paused = true)]
async fn queued_requests_are_served_in_fifo_order() {
    let limiter = limiter(1, 5_000);
    let held = limiter.acquire().await.expect("slot");

    let first = spawn_acquire(&limiter);
    settle().await;
    let second = spawn_acquire(&limiter);
    settle().await;
    assert_eq!(limiter.stats().queue_length, 2);

    assert!(limiter.release(&held));
    settle().await;
    assert!(first.is_finished(), "head of queue is served first");
    assert!(!second.is_finished(), "tail keeps waiting");

    let first_slot = first.await.expect("task").expect("first granted");
    assert!(limiter.release(&first_slot));
    let second_slot = second.await.expect("task").expect("second granted");
    assert!(limiter.release(&second_slot));

    let stats = limiter.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.created, 3);
    assert_eq!(stats.destroyed, 3);
}

#[tokio::test(start_paused = true)]
async fn release_hands_slot_to_waiter_without_dipping_active() {
    let limiter = limiter(2, 5_000);
    let a = limiter.acquire().await.expect("slot a");
    let _b = limiter.acquire().await.expect("slot b");

    let waiter = spawn_acquire(&limiter);
    settle().await;
    assert_eq!(limiter.stats().queue_length, 1);

    assert!(limiter.release(&a));
    let stats = limiter.stats();
    assert_eq!(stats.active, 2, "handoff happens inside release");
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.created, 3);
    assert_eq!(stats.destroyed, 1);
    assert_eq!(stats.max_used, 2);

    waiter.await.expect("task").expect("waiter granted");
}

#[tokio::test(start_paused = true)]
async fn timeout_restores_waiting_count() {
    let limiter = limiter(1, 300);
    let _held = limiter.acquire().await.expect("slot");
    let before = limiter.stats().waiting;

    let waiter = spawn_acquire(&limiter);
    settle().await;
    assert_eq!(limiter.stats().waiting, before + 1);

    let err = waiter.await.expect("task").expect_err("times out");
    assert_eq!(err.kind(), "timeout");
    assert_eq!(limiter.stats().waiting, before);
}

#[tokio::test]
async fn grant_wins_over_a_timer_that_fires_after_servicing() {
    let clock = ManualClock::shared();
    let limiter = Arc::new(AdmissionLimiter::with_clock(
        LimiterConfig {
            max_slots: 1,
            slot_timeout: Duration::from_millis(100),
        },
        clock.clone(),
    ));
    let held = limiter.acquire().await.expect("slot");
    let waiter = spawn_acquire(&limiter);
    settle().await;

    // Timer is now due, but the waiter has not run yet.
    clock.advance(Duration::from_millis(150));
    assert!(limiter.release(&held));

    let granted = waiter.await.expect("task").expect("handoff wins");
    assert_eq!(limiter.stats().active, 1);
    assert!(limiter.release(&granted));
}

#[tokio::test(start_paused = true)]
async fn emergency_reset_rejects_queue_and_zeroes_active() {
    let limiter = limiter(1, 5_000);
    let held = limiter.acquire().await.expect("slot");
    let first = spawn_acquire(&limiter);
    let second = spawn_acquire(&limiter);
    settle().await;
    assert_eq!(limiter.stats().queue_length, 2);

    limiter.emergency_reset();

    for waiter in [first, second] {
        let err = waiter.await.expect("task").expect_err("reset rejects");
        assert_eq!(err, AdmissionError::EmergencyReset);
    }
    let stats = limiter.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.created, 1, "historical counters survive a reset");

    assert!(!limiter.release(&held), "pre-reset handles are forgotten");
    assert_eq!(limiter.stats().active, 0);
}

#[tokio::test]
async fn stress_trips_only_above_ninety_percent() {
    let limiter = limiter(10, 1_000);
    let mut held = Vec::new();
    for _ in 0..9 {
        held.push(limiter.acquire().await.expect("slot"));
    }
    let stats = limiter.stats();
    assert_eq!(stats.utilization_percent, 90.0);
    assert!(!limiter.stress().stressed);

    held.push(limiter.acquire().await.expect("tenth slot is admitted"));
    let report = limiter.stress();
    assert!(report.stressed);
    assert!(
        report
            .reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("utilization 100.0%")),
        "reason: {:?}",
        report.reason
    );
}

#[tokio::test]
async fn with_admission_sheds_load_without_running_the_operation() {
    let limiter = limiter(1, 1_000);
    let _held = limiter.acquire().await.expect("slot");

    let mut ran = false;
    let result: Result<(), AdmissionError> = limiter
        .with_admission("shed-me", || {
            ran = true;
            async { Ok(()) }
        })
        .await;

    let err = result.expect_err("stressed pool rejects");
    assert!(matches!(err, AdmissionError::StressRejection { .. }));
    assert!(!ran);
    assert_eq!(limiter.stats().queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn active_count_stays_within_bounds_across_mixed_traffic() {
    let limiter = limiter(3, 50);
    let mut held: Vec<SlotHandle> = Vec::new();
    let mut waiters = Vec::new();

    for step in 0..60usize {
        match step % 5 {
            0 | 1 | 2 => waiters.push(spawn_acquire(&limiter)),
            3 => {
                if let Some(handle) = held.pop() {
                    limiter.release(&handle);
                    // A second release must never push the count negative.
                    limiter.release(&handle);
                }
            }
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
        settle().await;

        let mut still_waiting = Vec::new();
        for waiter in waiters.drain(..) {
            if waiter.is_finished() {
                if let Ok(handle) = waiter.await.expect("task") {
                    held.push(handle);
                }
            } else {
                still_waiting.push(waiter);
            }
        }
        waiters = still_waiting;

        let stats = limiter.stats();
        assert!(stats.active <= stats.max_slots, "step {step}: {stats:?}");
        assert_eq!(stats.active, held.len(), "step {step}: {stats:?}");
    }
}
