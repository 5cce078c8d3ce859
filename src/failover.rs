//! 故障转移编排模块 (Failover Orchestration Module)
//!
//! `DbConnectionManager` 跟踪按地址分组的活动连接，对照最新路由策略
//! 计算重定向目标，并通过调度器驱动每连接的重定向任务。
//! 并发的重定向请求被合并进单个在途任务，始终作用于最新目标。
//! (`DbConnectionManager` tracks live connections grouped by address,
//! computes redirect targets against the latest routing policy, and drives
//! per-connection redirect tasks through the scheduler. Concurrent redirect
//! requests coalesce into a single in-flight task that always acts on the
//! most recent target.)

use crate::config::FailoverConfig;
use crate::db::{
    AccessMode, AddressResolver, ConnectionId, DbAddress, DbCandidate, DbConnection,
    DbConnectionSupervisor, DbFailover, FailoverOutcome, PolicySupplier,
};
use crate::scheduler::TimeScheduler;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mutable interior of a redirect task: the pending target queue and the
/// finished flag. The per-task lock is fine-grained and never held across
/// calls into other components.
///
/// 重定向任务的可变内部：待处理目标队列与完成标志。
/// 每任务锁为细粒度锁，绝不跨组件调用持有。
struct TaskInner {
    queue: Vec<DbFailover>,
    finished: bool,
}

/// The single in-flight redirect task for one connection. Targets pushed
/// while the task is pending are coalesced; at run time only the newest one
/// is applied and the rest are discarded.
///
/// 某连接唯一的在途重定向任务。任务未决期间推入的目标被合并；
/// 执行时只应用最新的一个，其余被丢弃。
struct FailoverTask {
    connection: Arc<dyn DbConnection>,
    inner: Mutex<TaskInner>,
}

impl FailoverTask {
    fn new(connection: Arc<dyn DbConnection>, failover: DbFailover) -> Self {
        Self {
            connection,
            inner: Mutex::new(TaskInner {
                queue: vec![failover],
                finished: false,
            }),
        }
    }

    /// Append a target to the pending queue. Fails when the task already
    /// finished — the caller must then create a fresh task instead.
    ///
    /// 向待处理队列追加目标。任务已完成时失败 ——
    /// 调用方此时必须改为创建新任务。
    fn push_target(&self, failover: DbFailover) -> bool {
        let mut inner = self.inner.lock();
        if inner.finished {
            return false;
        }
        inner.queue.push(failover);
        true
    }

    /// Snapshot the newest target and clear the queue.
    ///
    /// 取出最新目标快照并清空队列。
    fn take_latest(&self) -> Option<DbFailover> {
        let mut inner = self.inner.lock();
        let latest = inner.queue.pop();
        inner.queue.clear();
        latest
    }

    /// Mark the task finished iff no new target arrived during the run.
    /// Returns whether the task finished.
    ///
    /// 当且仅当执行期间没有新目标到达时将任务标记为完成。
    /// 返回任务是否已完成。
    fn finish_if_drained(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.queue.is_empty() {
            inner.finished = true;
        }
        inner.finished
    }
}

/// 数据库连接故障转移管理器 (Database connection failover manager)
///
/// # 并发模型 (Concurrency Model)
/// - `tasks` 是每连接重定向串行化的唯一同步点：任意时刻每连接
///   至多一个在途任务。
///   (`tasks` is the sole synchronization point for per-connection redirect
///   serialization: at most one in-flight task per connection at any time.)
/// - 对同一连接的并发请求要么加入现有任务的队列，要么在旧任务
///   恰好完成的罕见竞争下于同一把锁内替换为新任务。
///   (Concurrent requests for the same connection either join the existing
///   task's queue or, in the rare race where the old task just finished,
///   replace it with a fresh one under the same lock.)
/// - 重定向失败以带抖动的退避无限重试；永久不可达的目标永远重试，
///   倾向通过重试获得可用性而非放弃。
///   (Redirect failures retry indefinitely with jittered backoff; a
///   permanently unreachable target retries forever, favoring availability
///   through retry over giving up.)
pub struct DbConnectionManager {
    self_ref: Weak<DbConnectionManager>,
    scheduler: Arc<TimeScheduler>,
    policy: Arc<dyn PolicySupplier>,
    config: FailoverConfig,
    /// 按当前解析地址分组的活动连接
    /// (Live connections grouped by their current resolved address)
    connections: Mutex<FxHashMap<DbAddress, FxHashMap<ConnectionId, Arc<dyn DbConnection>>>>,
    /// 每个原始地址最近发布的重定向，后写者胜
    /// (Latest published redirect per original address, last writer wins)
    failovers: Mutex<FxHashMap<String, DbFailover>>,
    /// 每连接至多一个在途重定向任务
    /// (At most one in-flight redirect task per connection)
    tasks: Mutex<FxHashMap<ConnectionId, Arc<FailoverTask>>>,
}

impl DbConnectionManager {
    pub fn new(
        scheduler: Arc<TimeScheduler>,
        policy: Arc<dyn PolicySupplier>,
        config: FailoverConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            scheduler,
            policy,
            config,
            connections: Mutex::new(FxHashMap::default()),
            failovers: Mutex::new(FxHashMap::default()),
            tasks: Mutex::new(FxHashMap::default()),
        })
    }

    /// 带抖动的重试延迟 (Jittered retry delay)
    fn retry_delay(&self) -> Duration {
        let min = self.config.retry_min_delay.as_millis() as u64;
        let max = self.config.retry_max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// 连接当前是否登记在某地址桶下
    /// (Whether the connection is currently registered under an address)
    fn is_tracked_at(&self, id: ConnectionId, address: &DbAddress) -> bool {
        self.connections
            .lock()
            .get(address)
            .map_or(false, |bucket| bucket.contains_key(&id))
    }

    /// Register the redirect task for a connection, coalescing into an
    /// existing one when present. A task that finished between its last run
    /// and its removal from the map is replaced under the same lock, so at
    /// most one live task per connection ever exists.
    ///
    /// 为连接登记重定向任务，已有任务时合并进去。在最后一次执行与
    /// 从表中移除之间恰好完成的任务会在同一把锁下被替换，
    /// 因此每连接永远至多存在一个存活任务。
    fn add_task(&self, connection: Arc<dyn DbConnection>, failover: DbFailover) {
        if connection.is_closed() {
            return;
        }
        let created = {
            let mut tasks = self.tasks.lock();
            match tasks.entry(connection.id()) {
                Entry::Occupied(mut entry) => {
                    if entry.get().push_target(failover.clone()) {
                        debug!(
                            connection = connection.id().as_u64(),
                            target = %failover.new_address(),
                            "redirect target coalesced into pending task"
                        );
                        return;
                    }
                    // Finished task lost the removal race; replace it.
                    // 已完成的任务输掉了移除竞争；直接替换。
                    let task = Arc::new(FailoverTask::new(Arc::clone(&connection), failover));
                    entry.insert(Arc::clone(&task));
                    task
                }
                Entry::Vacant(entry) => {
                    let task = Arc::new(FailoverTask::new(Arc::clone(&connection), failover));
                    entry.insert(Arc::clone(&task));
                    task
                }
            }
        };
        self.schedule_task(created);
    }

    /// Schedule one run of a redirect task after a jittered delay.
    ///
    /// 在带抖动的延迟后调度重定向任务的一次执行。
    fn schedule_task(&self, task: Arc<FailoverTask>) {
        let connection_id = task.connection.id();
        let manager = self.self_ref.clone();
        let task_for_run = Arc::clone(&task);
        let result = self.scheduler.delay(
            format!("db-failover-{}", connection_id.as_u64()),
            self.retry_delay(),
            move || {
                let manager = manager.clone();
                let task = Arc::clone(&task_for_run);
                async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.run_task(task);
                    }
                }
            },
        );
        if let Err(err) = result {
            // Scheduler rejected the submission; drop the task so a later
            // trigger can start over instead of wedging on a dead entry.
            // 调度器拒绝了提交；丢弃任务，使后续触发能重新开始，
            // 而非卡死在失效条目上。
            warn!(connection = connection_id.as_u64(), %err, "failover task not scheduled");
            let mut inner = task.inner.lock();
            inner.queue.clear();
            inner.finished = true;
            drop(inner);
            self.remove_task(&task);
        }
    }

    /// One run of a redirect task: apply the newest queued target, branch on
    /// the outcome, then either finish or go another round.
    ///
    /// 重定向任务的一次执行：应用队列中最新的目标，按结果分支，
    /// 然后完成或进入下一轮。
    fn run_task(&self, task: Arc<FailoverTask>) {
        let connection = Arc::clone(&task.connection);
        let Some(failover) = task.take_latest() else {
            self.remove_task(&task);
            return;
        };

        // Staleness guard: the connection already moved away from the
        // address this edge was recorded against. Success by irrelevance.
        // 失效保护：连接已离开本条边登记时的地址。视为因无关而成功。
        if !self.is_tracked_at(connection.id(), failover.old_address()) {
            debug!(
                connection = connection.id().as_u64(),
                old = %failover.old_address(),
                "stale redirect discarded, connection already moved"
            );
            self.complete_task(&task);
            return;
        }

        match connection.redirect(failover.new_address()) {
            FailoverOutcome::Success => {
                info!(
                    connection = connection.id().as_u64(),
                    old = %failover.old_address(),
                    new = %failover.new_address(),
                    "connection redirected"
                );
                self.move_connection(&connection, &failover);
                self.publish(failover);
            }
            FailoverOutcome::Failed => {
                warn!(
                    connection = connection.id().as_u64(),
                    target = %failover.new_address(),
                    "redirect failed, retrying with backoff"
                );
                // Re-queue the edge and keep the task in-flight; newer
                // targets pushed meanwhile win over it at the next run.
                // 将该边重新入队并保持任务在途；期间推入的更新目标
                // 在下一轮执行时优先于它。
                task.push_target(failover);
                self.schedule_task(task);
                return;
            }
            FailoverOutcome::Discard => {
                debug!(
                    connection = connection.id().as_u64(),
                    "connection tearing down, tracking removed"
                );
                self.remove_connection(connection.id(), failover.old_address());
                self.publish(failover);
            }
            FailoverOutcome::None => {}
        }

        self.complete_task(&task);
    }

    /// Completion: finish the task unless new targets arrived during the
    /// run, in which case it goes another round.
    ///
    /// 完成处理：任务完成并让位，除非执行期间有新目标到达，
    /// 此时进入下一轮。
    fn complete_task(&self, task: &Arc<FailoverTask>) {
        if task.finish_if_drained() {
            self.remove_task(task);
        } else {
            self.schedule_task(Arc::clone(task));
        }
    }

    /// Identity-checked removal: a finished task may already have been
    /// replaced in the map by a fresh one, which must survive.
    ///
    /// 校验同一性的移除：已完成的任务可能已被新任务替换，
    /// 新任务必须保留。
    fn remove_task(&self, task: &Arc<FailoverTask>) {
        let mut tasks = self.tasks.lock();
        if let Some(current) = tasks.get(&task.connection.id()) {
            if Arc::ptr_eq(current, task) {
                tasks.remove(&task.connection.id());
            }
        }
    }

    /// 将连接的登记从旧地址桶迁移到新地址桶，并防范并发关闭
    /// (Move the connection's registry entry from the old bucket to the new
    /// one, guarding against a concurrent close)
    fn move_connection(&self, connection: &Arc<dyn DbConnection>, failover: &DbFailover) {
        let mut connections = self.connections.lock();
        let (removed, emptied) = match connections.get_mut(failover.old_address()) {
            Some(bucket) => (bucket.remove(&connection.id()), bucket.is_empty()),
            None => (None, false),
        };
        if emptied {
            connections.remove(failover.old_address());
        }
        if removed.is_none() || connection.is_closed() {
            return;
        }
        connections
            .entry(failover.new_address().clone())
            .or_default()
            .insert(connection.id(), Arc::clone(connection));
    }

    /// 发布最新的重定向映射，后写者胜
    /// (Publish the latest redirect mapping, last writer wins)
    fn publish(&self, failover: DbFailover) {
        self.failovers
            .lock()
            .insert(failover.old_address().address().to_string(), failover);
    }

    #[cfg(test)]
    pub(crate) fn connection_count_at(&self, address: &DbAddress) -> usize {
        self.connections
            .lock()
            .get(address)
            .map_or(0, |bucket| bucket.len())
    }
}

impl DbConnectionSupervisor for DbConnectionManager {
    fn get_candidate(
        &self,
        address: DbAddress,
        access_mode: AccessMode,
        resolver: AddressResolver,
    ) -> DbCandidate {
        let database = match access_mode {
            AccessMode::ReadWrite => self.policy.write_database(address.db_type()),
            AccessMode::ReadOnly => self.policy.read_database(address.db_type()),
            AccessMode::None => None,
        };
        DbCandidate::new(access_mode, address, database, resolver)
    }

    fn add_connection(&self, connection: Arc<dyn DbConnection>, address: DbAddress) {
        self.connections
            .lock()
            .entry(address)
            .or_default()
            .insert(connection.id(), connection);
    }

    fn remove_connection(&self, connection_id: ConnectionId, address: &DbAddress) {
        let mut connections = self.connections.lock();
        let emptied = match connections.get_mut(address) {
            Some(bucket) => {
                bucket.remove(&connection_id);
                bucket.is_empty()
            }
            None => false,
        };
        if emptied {
            connections.remove(address);
        }
    }

    fn failover(&self, connection: Arc<dyn DbConnection>, candidate: DbCandidate) {
        if !candidate.redirected() {
            return;
        }
        self.add_task(connection, candidate.into_failover());
    }

    fn failover_all(&self) {
        // Snapshot first; candidate computation and task registration must
        // not run under the registry lock.
        // 先取快照；候选计算与任务登记不得在注册表锁内进行。
        let snapshot: Vec<(DbAddress, Vec<Arc<dyn DbConnection>>)> = self
            .connections
            .lock()
            .iter()
            .map(|(address, bucket)| (address.clone(), bucket.values().cloned().collect()))
            .collect();

        for (address, bucket) in snapshot {
            for connection in bucket {
                let Some(state) = connection.failover_state() else {
                    continue;
                };
                if state.access_mode() == AccessMode::None {
                    continue;
                }
                let candidate = self.get_candidate(
                    address.clone(),
                    state.access_mode(),
                    Arc::clone(state.resolver()),
                );
                if candidate.redirected() {
                    self.failover(connection, candidate);
                }
            }
        }
    }

    fn get_failover(&self, address: &DbAddress) -> Option<DbFailover> {
        self.failovers.lock().get(address.address()).cloned()
    }
}
