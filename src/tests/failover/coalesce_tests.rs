use super::support::{manager_with_retry, resolver, FakeConnection, FakePolicy};
use crate::db::{
    AccessMode, DbAddress, DbCandidate, DbConnection, DbConnectionSupervisor, LiveDatabase,
};
use std::sync::Arc;
use std::time::Duration;

fn old_address() -> DbAddress {
    DbAddress::parse("mysql", "host-a:3306")
}

fn candidate_to(old: &DbAddress, target: &str) -> DbCandidate {
    DbCandidate::new(
        AccessMode::ReadWrite,
        old.clone(),
        Some(LiveDatabase::new(target, vec![target.to_string()])),
        resolver(),
    )
}

#[tokio::test]
async fn test_burst_coalesces_to_newest_target() {
    // 较宽的重试窗口保证第二个请求在任务执行前到达
    // (A wide retry window guarantees the second request lands before the
    // task runs)
    let (_scheduler, manager) = manager_with_retry(
        Arc::new(FakePolicy::default()),
        Duration::from_millis(100),
        Duration::from_millis(200),
    );

    let conn = FakeConnection::new(vec![]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    manager.failover(
        conn.clone() as Arc<dyn DbConnection>,
        candidate_to(&old, "host-b:3306"),
    );
    manager.failover(
        conn.clone() as Arc<dyn DbConnection>,
        candidate_to(&old, "host-c:3306"),
    );

    tokio::time::sleep(Duration::from_millis(600)).await;

    // 合并后总共恰好一次执行，作用于最新目标，中间目标被丢弃
    // (Exactly one execution total after coalescing, acting on the newest
    // target; the intermediate one is discarded)
    assert_eq!(conn.redirect_targets(), vec!["host-c:3306".to_string()]);

    let newest = DbAddress::parse("mysql", "host-c:3306");
    assert_eq!(manager.connection_count_at(&old), 0);
    assert_eq!(manager.connection_count_at(&newest), 1);
    assert_eq!(
        manager.get_failover(&old).unwrap().new_address(),
        &newest
    );
}

#[tokio::test]
async fn test_finished_task_makes_room_for_a_new_one() {
    let (_scheduler, manager) = manager_with_retry(
        Arc::new(FakePolicy::default()),
        Duration::from_millis(10),
        Duration::from_millis(30),
    );

    let conn = FakeConnection::new(vec![]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    manager.failover(
        conn.clone() as Arc<dyn DbConnection>,
        candidate_to(&old, "host-b:3306"),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(conn.redirect_targets(), vec!["host-b:3306".to_string()]);

    // 第一个任务完成让位后，对新地址的请求创建新任务
    // (After the first task finishes and makes room, a request against the
    // new address creates a fresh task)
    let moved = DbAddress::parse("mysql", "host-b:3306");
    manager.failover(
        conn.clone() as Arc<dyn DbConnection>,
        candidate_to(&moved, "host-d:3306"),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        conn.redirect_targets(),
        vec!["host-b:3306".to_string(), "host-d:3306".to_string()]
    );
    let final_address = DbAddress::parse("mysql", "host-d:3306");
    assert_eq!(manager.connection_count_at(&final_address), 1);
}
