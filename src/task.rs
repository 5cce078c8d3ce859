//! 任务模块 (Task Module)
//!
//! 定义调度器的任务表示：任务 ID、回调包装器、原子状态机以及取消句柄。
//! (Defines the scheduler's task representation: task id, callback wrapper,
//! atomic state machine, and the cancellation handle)

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Global unique task ID generator
///
/// 全局唯一任务 ID 生成器
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Work state constants: INIT is the only non-terminal state
///
/// 任务状态常量：INIT 是唯一的非终止状态
pub(crate) const WORK_INIT: u8 = 0;
pub(crate) const WORK_CANCELLED: u8 = 1;
pub(crate) const WORK_EXPIRED: u8 = 2;

/// Unique identifier for scheduled work
///
/// 调度任务唯一标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Generate a new unique task ID (internal use)
    ///
    /// 生成一个新的唯一任务 ID (内部使用)
    #[inline]
    pub(crate) fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value of the task ID
    ///
    /// 获取任务 ID 的数值
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Work state machine: INIT → {CANCELLED, EXPIRED}, both terminal,
/// transitioned exactly once via compare-and-swap. This guarantees a task is
/// never both cancelled and run, and that racing `cancel()` against execution
/// from arbitrary threads is safe.
///
/// 任务状态机：INIT → {CANCELLED, EXPIRED}，两者均为终止状态，
/// 通过 CAS 恰好转移一次。保证任务不会既被取消又被执行，
/// 任意线程并发取消与执行的竞争是安全的。
#[derive(Debug)]
pub struct WorkState(AtomicU8);

impl WorkState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(WORK_INIT))
    }

    /// INIT → CANCELLED；返回是否由本次调用完成转移
    /// (INIT → CANCELLED; returns whether this call performed the transition)
    #[inline]
    pub(crate) fn try_cancel(&self) -> bool {
        self.0
            .compare_exchange(WORK_INIT, WORK_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// INIT → EXPIRED；返回是否由本次调用完成转移
    /// (INIT → EXPIRED; returns whether this call performed the transition)
    #[inline]
    pub(crate) fn try_expire(&self) -> bool {
        self.0
            .compare_exchange(WORK_INIT, WORK_EXPIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == WORK_CANCELLED
    }

    #[inline]
    pub(crate) fn is_expired(&self) -> bool {
        self.0.load(Ordering::Acquire) == WORK_EXPIRED
    }
}

/// Task Callback Trait
///
/// Types implementing this trait can be used as scheduled task bodies.
/// The callback may be invoked multiple times (periodic scheduling), so it
/// takes `&self`.
///
/// 实现此特性的类型可以作为调度任务体。回调可能被多次调用（周期调度），
/// 因此以 `&self` 接收。
pub trait TaskCallback: Send + Sync + 'static {
    /// Execute the callback, returns a Future
    ///
    /// 执行回调函数，返回一个 Future
    fn call(&self) -> BoxFuture<'static, ()>;
}

/// Implement TaskCallback for Fn() -> Future closures
///
/// 为 Fn() -> Future 闭包实现 TaskCallback
impl<F, Fut> TaskCallback for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self) -> BoxFuture<'static, ()> {
        Box::pin(self())
    }
}

/// Callback wrapper for standardized callback creation and management
///
/// 回调包装器，用于标准化回调创建和管理
///
/// # Examples (示例)
///
/// ```
/// use tidewheel::TaskFn;
///
/// let callback = TaskFn::new(|| async {
///     println!("task fired");
/// });
/// ```
#[derive(Clone)]
pub struct TaskFn {
    callback: Arc<dyn TaskCallback>,
}

impl TaskFn {
    /// Create a new callback wrapper
    ///
    /// 创建一个新的回调包装器
    #[inline]
    pub fn new(callback: impl TaskCallback) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Wrap an already shared callback
    ///
    /// 包装一个已共享的回调
    #[inline]
    pub(crate) fn from_arc(callback: Arc<dyn TaskCallback>) -> Self {
        Self { callback }
    }

    /// Call the callback function
    ///
    /// 调用回调函数
    #[inline]
    pub(crate) fn call(&self) -> BoxFuture<'static, ()> {
        self.callback.call()
    }
}

/// Scheduler-internal wrapper around a submitted task: the name, the absolute
/// deadline in milliseconds since the scheduler epoch, the shared state cell,
/// and the callback. A `TimeWork` lives in at most one slot at any instant;
/// between the flying queue and the wheel it is owned by exactly one queue.
///
/// 调度器内部的任务包装：名称、相对调度器纪元的绝对毫秒截止时间、
/// 共享状态单元与回调。任意时刻一个 `TimeWork` 至多位于一个槽中；
/// 在 flying 队列与时间轮之间流转时恰好被一个队列持有。
pub(crate) struct TimeWork {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) deadline_ms: i64,
    pub(crate) state: Arc<WorkState>,
    pub(crate) callback: TaskFn,
}

impl TimeWork {
    pub(crate) fn new(name: String, deadline_ms: i64, callback: TaskFn) -> Self {
        Self {
            id: TaskId::new(),
            name,
            deadline_ms,
            state: Arc::new(WorkState::new()),
            callback,
        }
    }
}

/// Cancellation handle returned by `add`/`delay`.
///
/// `cancel()` is safe from any thread at any time, idempotent, and races
/// correctly against concurrent execution: exactly one of {run,
/// cancel-with-effect} wins. The handle is intentionally not `Clone` so a
/// timer has a single cancelling owner.
///
/// `add`/`delay` 返回的取消句柄。
///
/// `cancel()` 可在任意线程任意时刻调用，幂等，并与并发执行正确竞争：
/// {执行, 有效取消} 恰好一个获胜。句柄有意不实现 `Clone`，
/// 使每个定时任务只有一个取消所有者。
pub struct Timeout {
    pub(crate) id: TaskId,
    pub(crate) state: Arc<WorkState>,
    pub(crate) pending: Arc<AtomicUsize>,
    pub(crate) cancels: mpsc::UnboundedSender<TaskId>,
}

impl Timeout {
    /// Cancel the task.
    ///
    /// # Returns
    /// `true` exactly once, on the call that performs the INIT → CANCELLED
    /// transition; `false` on every other call (already cancelled or already
    /// executed).
    ///
    /// 取消任务。
    ///
    /// # 返回值
    /// 完成 INIT → CANCELLED 转移的那一次调用返回 `true`；
    /// 其余调用（已取消或已执行）返回 `false`。
    pub fn cancel(&self) -> bool {
        if self.state.try_cancel() {
            // Release the admission slot and let the boss reclaim the bucket
            // 释放接纳名额，并让 boss 回收槽位存储
            self.pending.fetch_sub(1, Ordering::AcqRel);
            let _ = self.cancels.send(self.id);
            true
        } else {
            false
        }
    }

    /// 任务是否已被取消 (Whether the task has been cancelled)
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// 任务是否已被执行 (Whether the task has been executed)
    pub fn is_expired(&self) -> bool {
        self.state.is_expired()
    }

    /// 任务 ID (Task ID)
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}
