use crate::{SchedulerConfig, SchedulerError, TimeScheduler};
use std::time::Duration;

fn capped_scheduler(max_pending: usize) -> TimeScheduler {
    let config = SchedulerConfig::builder()
        .tick_duration(Duration::from_millis(10))
        .slot_count(100)
        .worker_count(1)
        .max_pending(max_pending)
        .build()
        .unwrap();
    TimeScheduler::start(config)
}

#[tokio::test]
async fn test_pending_cap_rejects_fast() {
    let scheduler = std::sync::Arc::new(capped_scheduler(5));

    // 6 个线程并发提交，名额计数的 CAS 必须精确收敛
    // (Six threads submit concurrently; the admission CAS must converge exactly)
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let scheduler = std::sync::Arc::clone(&scheduler);
            std::thread::spawn(move || {
                scheduler.delay(format!("cap-{}", i), Duration::from_secs(5), || async {})
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => accepted += 1,
            Err(SchedulerError::CapacityExhausted { max_pending }) => {
                assert_eq!(max_pending, 5);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    // 恰好 K 个接纳、1 个拒绝 (Exactly K acceptances and one rejection)
    assert_eq!(accepted, 5);
    assert_eq!(rejected, 1);
}

#[tokio::test]
async fn test_cancel_releases_admission_slot() {
    let scheduler = capped_scheduler(1);

    let timeout = scheduler
        .delay("first", Duration::from_secs(5), || async {})
        .unwrap();
    assert!(scheduler
        .delay("second", Duration::from_secs(5), || async {})
        .is_err());

    assert!(timeout.cancel());
    // 取消释放名额后再次提交成功
    // (After cancellation releases the slot, submission succeeds again)
    assert!(scheduler
        .delay("third", Duration::from_secs(5), || async {})
        .is_ok());
}

#[tokio::test]
async fn test_closed_scheduler_rejects_submissions() {
    let scheduler = capped_scheduler(0);
    scheduler.close();
    assert!(!scheduler.is_started());

    let result = scheduler.delay("late", Duration::from_millis(10), || async {});
    assert!(matches!(result, Err(SchedulerError::Closed)));

    // close 幂等 (close is idempotent)
    scheduler.close();
}
