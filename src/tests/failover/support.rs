// Shared fakes for the failover tests
//
// 故障转移测试共用的伪实现

use crate::config::{FailoverConfig, SchedulerConfig};
use crate::db::{
    AddressResolver, ConnectionId, DbConnection, DbFailover, FailoverOutcome, LiveDatabase,
    PolicySupplier,
};
use crate::failover::DbConnectionManager;
use crate::scheduler::TimeScheduler;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 记录每次重定向调用并按脚本返回结果的伪连接
/// (Fake connection recording every redirect call and answering from a
/// scripted outcome list)
pub(crate) struct FakeConnection {
    id: ConnectionId,
    outcomes: Mutex<VecDeque<FailoverOutcome>>,
    redirects: Mutex<Vec<String>>,
    closed: AtomicBool,
    state: Mutex<Option<DbFailover>>,
}

impl FakeConnection {
    pub(crate) fn new(outcomes: Vec<FailoverOutcome>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            outcomes: Mutex::new(outcomes.into()),
            redirects: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            state: Mutex::new(None),
        })
    }

    pub(crate) fn set_state(&self, failover: DbFailover) {
        *self.state.lock() = Some(failover);
    }

    /// 已观察到的重定向目标地址 (Observed redirect target addresses)
    pub(crate) fn redirect_targets(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl DbConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn failover_state(&self) -> Option<DbFailover> {
        self.state.lock().clone()
    }

    fn redirect(&self, target: &crate::db::DbAddress) -> FailoverOutcome {
        self.redirects.lock().push(target.address().to_string());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(FailoverOutcome::Success)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 可变的伪策略快照 (Mutable fake policy snapshot)
#[derive(Default)]
pub(crate) struct FakePolicy {
    write: Mutex<Option<LiveDatabase>>,
    read: Mutex<Option<LiveDatabase>>,
}

impl FakePolicy {
    pub(crate) fn with_write(database: LiveDatabase) -> Arc<Self> {
        let policy = Arc::new(Self::default());
        *policy.write.lock() = Some(database);
        policy
    }

    pub(crate) fn set_read(&self, database: LiveDatabase) {
        *self.read.lock() = Some(database);
    }
}

impl PolicySupplier for FakePolicy {
    fn write_database(&self, _db_type: &str) -> Option<LiveDatabase> {
        self.write.lock().clone()
    }

    fn read_database(&self, _db_type: &str) -> Option<LiveDatabase> {
        self.read.lock().clone()
    }
}

pub(crate) fn resolver() -> AddressResolver {
    Arc::new(|live: &LiveDatabase| live.address.clone())
}

/// Build a manager on a fast scheduler with the given retry window.
///
/// 在快速调度器上构建给定重试区间的管理器。
pub(crate) fn manager_with_retry(
    policy: Arc<FakePolicy>,
    retry_min: Duration,
    retry_max: Duration,
) -> (Arc<TimeScheduler>, Arc<DbConnectionManager>) {
    let scheduler = Arc::new(TimeScheduler::start(
        SchedulerConfig::builder()
            .tick_duration(Duration::from_millis(10))
            .slot_count(100)
            .worker_count(1)
            .build()
            .unwrap(),
    ));
    let config = FailoverConfig::builder()
        .retry_min_delay(retry_min)
        .retry_max_delay(retry_max)
        .build()
        .unwrap();
    let manager = DbConnectionManager::new(Arc::clone(&scheduler), policy, config);
    (scheduler, manager)
}

pub(crate) fn fast_manager(
    policy: Arc<FakePolicy>,
) -> (Arc<TimeScheduler>, Arc<DbConnectionManager>) {
    manager_with_retry(
        policy,
        Duration::from_millis(10),
        Duration::from_millis(30),
    )
}
