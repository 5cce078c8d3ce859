use crate::{SchedulerConfig, TimeScheduler};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn small_scheduler() -> TimeScheduler {
    let config = SchedulerConfig::builder()
        .tick_duration(Duration::from_millis(10))
        .slot_count(100)
        .worker_count(2)
        .build()
        .unwrap();
    TimeScheduler::start(config)
}

#[tokio::test]
async fn test_cancel_before_fire() {
    let scheduler = small_scheduler();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = Arc::clone(&counter);

    let timeout = scheduler
        .delay("cancelled", Duration::from_millis(100), move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    // 第一次取消生效，第二次为空操作
    // (First cancel takes effect, second is a no-op)
    assert!(timeout.cancel());
    assert!(!timeout.cancel());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(timeout.is_cancelled());
    assert!(!timeout.is_expired());
}

#[tokio::test]
async fn test_cancel_after_fire_is_noop() {
    let scheduler = small_scheduler();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = Arc::clone(&counter);

    let timeout = scheduler
        .delay("fired", Duration::from_millis(20), move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!timeout.cancel());
    assert!(timeout.is_expired());
}

#[tokio::test]
async fn test_concurrent_cancel_succeeds_exactly_once() {
    let scheduler = small_scheduler();
    let timeout = Arc::new(
        scheduler
            .delay("contended", Duration::from_secs(5), || async {})
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let timeout = Arc::clone(&timeout);
        handles.push(std::thread::spawn(move || timeout.cancel()));
    }
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_at_most_once_under_racing_cancel() {
    // 执行与取消竞争：每个任务恰好一方获胜，计数必须对得上
    // (Execution races cancellation: exactly one side wins per task and the
    // counts must reconcile)
    let scheduler = small_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    let mut timeouts = Vec::new();
    for i in 0..100 {
        let counter_clone = Arc::clone(&counter);
        let timeout = scheduler
            .delay(format!("race-{}", i), Duration::from_millis(25), move || {
                let counter = Arc::clone(&counter_clone);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        timeouts.push(timeout);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cancelled = timeouts.iter().filter(|t| t.cancel()).count() as u32;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 100 - cancelled);
}
