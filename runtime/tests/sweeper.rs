//! Integration tests for the background group sweeper
//!
//! Groups are aged with a manual clock; the sweeper itself runs on the real
//! tokio timer with a short period.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use correlate_core::environment::Clock;
use correlate_core::join::{Aggregator, JoinOutcome};
use correlate_core::{DateTime, Duration, Utc};
use correlate_runtime::Sweeper;
use correlate_testing::ManualClock;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio_test::assert_ok;

const PERIOD: StdDuration = StdDuration::from_millis(10);
const WAIT: StdDuration = StdDuration::from_secs(5);

fn aggregator(clock: &ManualClock) -> Arc<Aggregator<u64, &'static str, u32, ManualClock>> {
    Arc::new(
        Aggregator::new(["a", "b", "c"])
            .unwrap()
            .with_group_timeout(Duration::seconds(30))
            .with_clock(clock.clone()),
    )
}

#[tokio::test]
async fn test_sweeper_reports_expired_groups() {
    let clock = ManualClock::starting_at_test_epoch();
    let join = aggregator(&clock);

    join.submit(1, "a", 1).unwrap();
    join.submit(1, "c", 3).unwrap();
    let created_at = clock.now();
    clock.advance(Duration::seconds(31));

    let (handle, mut expired) = Sweeper::spawn(Arc::clone(&join), PERIOD);

    let group = tokio::time::timeout(WAIT, expired.recv())
        .await
        .expect("sweeper reported in time")
        .expect("channel open");
    assert_eq!(group.correlation_id, 1);
    assert_eq!(group.created_at, created_at);
    assert_eq!(group.missing_topics, vec!["b"]);
    assert_eq!(join.pending_groups(), 0);

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_sweeper_keeps_live_groups() {
    let clock = ManualClock::starting_at_test_epoch();
    let join = aggregator(&clock);

    join.submit(1, "a", 1).unwrap();
    clock.advance(Duration::seconds(20));
    join.submit(2, "a", 1).unwrap();
    clock.advance(Duration::seconds(15));

    let (handle, mut expired) = Sweeper::spawn(Arc::clone(&join), PERIOD);

    let group = tokio::time::timeout(WAIT, expired.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.correlation_id, 1);
    assert_eq!(join.pending_groups(), 1);

    // The surviving group can still complete
    join.submit(2, "b", 2).unwrap();
    let outcome = join.submit(2, "c", 3).unwrap();
    assert!(matches!(outcome, JoinOutcome::Ready(ref payloads) if payloads == &[1, 2, 3]));

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_shutdown_stops_the_task() {
    let clock = ManualClock::starting_at_test_epoch();
    let join = aggregator(&clock);

    let (handle, mut expired) = Sweeper::spawn(join, PERIOD);
    assert!(!handle.is_finished());
    assert_ok!(handle.shutdown().await);

    // The task owned the sender; once it exits the channel closes
    assert!(expired.recv().await.is_none());
}

#[tokio::test]
async fn test_sweeping_continues_without_receiver() {
    let clock = ManualClock::starting_at_test_epoch();
    let join = aggregator(&clock);

    join.submit(9, "a", 1).unwrap();
    clock.advance(Duration::seconds(31));

    let (handle, expired) = Sweeper::spawn(Arc::clone(&join), PERIOD);
    drop(expired);

    // Several sweeps with nowhere to send the report
    tokio::time::sleep(PERIOD * 5).await;
    assert!(!handle.is_finished());

    assert_ok!(handle.shutdown().await);
}

/// Moves forward by `step` every time it is read
struct TickingClock {
    time: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut time = self.time.lock().unwrap();
        let now = *time;
        *time += self.step;
        now
    }
}

#[tokio::test]
async fn test_group_expiring_between_sweeps_is_still_reported() {
    let start = correlate_testing::test_epoch();
    let clock = TickingClock {
        time: Mutex::new(start),
        step: Duration::seconds(10),
    };
    let join = Arc::new(
        Aggregator::<u64, &'static str, u32>::new(["a", "b"])
            .unwrap()
            .with_group_timeout(Duration::seconds(10))
            .with_clock(clock),
    );

    // Expires after the first sweep has looked at it but before the
    // pending-groups gauge is sampled
    join.submit(7, "a", 1).unwrap();

    let (handle, mut expired) = Sweeper::spawn(Arc::clone(&join), PERIOD);

    let group = tokio::time::timeout(WAIT, expired.recv())
        .await
        .expect("expired group reported")
        .unwrap();
    assert_eq!(group.correlation_id, 7);
    assert_eq!(group.created_at, start);
    assert_eq!(group.missing_topics, vec!["b"]);

    assert_ok!(handle.shutdown().await);
}
