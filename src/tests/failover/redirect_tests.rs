use super::support::{fast_manager, resolver, FakeConnection, FakePolicy};
use crate::db::{
    AccessMode, DbAddress, DbCandidate, DbConnection, DbConnectionSupervisor, DbFailover,
    FailoverOutcome, LiveDatabase,
};
use std::sync::Arc;
use std::time::Duration;

fn old_address() -> DbAddress {
    DbAddress::parse("mysql", "host-a:3306")
}

#[tokio::test]
async fn test_failed_then_success_retries_and_moves_registry() {
    let policy = FakePolicy::with_write(LiveDatabase::new(
        "host-b:3306",
        vec!["host-b:3306".into()],
    ));
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![FailoverOutcome::Failed, FailoverOutcome::Success]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    let candidate = manager.get_candidate(old.clone(), AccessMode::ReadWrite, resolver());
    assert!(candidate.redirected());
    manager.failover(conn.clone() as Arc<dyn DbConnection>, candidate);

    tokio::time::sleep(Duration::from_millis(500)).await;

    // 第一次失败触发重试，第二次成功：恰好两次重定向调用
    // (First call fails and triggers a retry, second succeeds: exactly two
    // redirect invocations)
    assert_eq!(
        conn.redirect_targets(),
        vec!["host-b:3306".to_string(), "host-b:3306".to_string()]
    );

    let new = DbAddress::parse("mysql", "host-b:3306");
    assert_eq!(manager.connection_count_at(&old), 0);
    assert_eq!(manager.connection_count_at(&new), 1);

    let published = manager.get_failover(&old).unwrap();
    assert_eq!(published.new_address(), &new);
    assert!(published.is_redirected());
}

#[tokio::test]
async fn test_discard_removes_tracking_and_publishes() {
    let policy = FakePolicy::with_write(LiveDatabase::new(
        "host-b:3306",
        vec!["host-b:3306".into()],
    ));
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![FailoverOutcome::Discard]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    let candidate = manager.get_candidate(old.clone(), AccessMode::ReadWrite, resolver());
    manager.failover(conn.clone() as Arc<dyn DbConnection>, candidate);

    tokio::time::sleep(Duration::from_millis(300)).await;

    // 连接被整体移出跟踪，但映射照常发布给其他等待者
    // (The connection drops out of tracking entirely, yet the mapping is
    // still published for other waiters)
    assert_eq!(manager.connection_count_at(&old), 0);
    assert!(manager.get_failover(&old).is_some());
}

#[tokio::test]
async fn test_none_outcome_leaves_registry_untouched() {
    let policy = FakePolicy::with_write(LiveDatabase::new(
        "host-b:3306",
        vec!["host-b:3306".into()],
    ));
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![FailoverOutcome::None]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    let candidate = manager.get_candidate(old.clone(), AccessMode::ReadWrite, resolver());
    manager.failover(conn.clone() as Arc<dyn DbConnection>, candidate);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(conn.redirect_targets().len(), 1);
    assert_eq!(manager.connection_count_at(&old), 1);
    assert!(manager.get_failover(&old).is_none());
}

#[tokio::test]
async fn test_missing_policy_degrades_to_noop() {
    let policy = Arc::new(FakePolicy::default());
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    // 策略尚未加载：候选不要求重定向，不调度任何任务
    // (Policy not yet loaded: the candidate requires no redirect and no task
    // is scheduled)
    let candidate = manager.get_candidate(old.clone(), AccessMode::ReadWrite, resolver());
    assert!(!candidate.redirected());
    assert_eq!(candidate.new_address(), &old);
    manager.failover(conn.clone() as Arc<dyn DbConnection>, candidate);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(conn.redirect_targets().is_empty());
}

#[tokio::test]
async fn test_stale_redirect_is_discarded_silently() {
    let policy = Arc::new(FakePolicy::default());
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![]);
    let old = old_address();
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    // 该边登记的旧地址已不再持有此连接：因无关而成功，不触碰连接
    // (The edge's recorded old address no longer holds this connection:
    // success by irrelevance, the connection is never touched)
    let ghost = DbAddress::parse("mysql", "host-ghost:3306");
    let candidate = DbCandidate::new(
        AccessMode::ReadWrite,
        ghost.clone(),
        Some(LiveDatabase::new("host-c:3306", vec!["host-c:3306".into()])),
        resolver(),
    );
    assert!(candidate.redirected());
    manager.failover(conn.clone() as Arc<dyn DbConnection>, candidate);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(conn.redirect_targets().is_empty());
    assert_eq!(manager.connection_count_at(&old), 1);
    assert!(manager.get_failover(&ghost).is_none());
}

#[tokio::test]
async fn test_failover_all_rescans_tracked_connections() {
    let policy = FakePolicy::with_write(LiveDatabase::new(
        "host-b:3306",
        vec!["host-b:3306".into()],
    ));
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let conn = FakeConnection::new(vec![]);
    let old = old_address();
    conn.set_state(DbFailover::new(
        AccessMode::ReadWrite,
        old.clone(),
        old.clone(),
        resolver(),
    ));
    manager.add_connection(conn.clone() as Arc<dyn DbConnection>, old.clone());

    manager.failover_all();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(conn.redirect_targets(), vec!["host-b:3306".to_string()]);
    let new = DbAddress::parse("mysql", "host-b:3306");
    assert_eq!(manager.connection_count_at(&new), 1);
}

#[tokio::test]
async fn test_read_only_candidate_uses_read_policy() {
    let policy = Arc::new(FakePolicy::default());
    policy.set_read(LiveDatabase::new(
        "replica-1:3306",
        vec!["replica-1:3306".into()],
    ));
    let (_scheduler, manager) = fast_manager(Arc::clone(&policy));

    let candidate = manager.get_candidate(old_address(), AccessMode::ReadOnly, resolver());
    assert!(candidate.redirected());
    assert_eq!(candidate.new_address().address(), "replica-1:3306");

    // None 模式不参与故障转移 (Mode None never takes part in failover)
    let candidate = manager.get_candidate(old_address(), AccessMode::None, resolver());
    assert!(!candidate.redirected());
}
