//! 调度器模块 (Scheduler Module)
//!
//! `TimeScheduler` 是面向调用方的定时器：一个独占推进时间轮的 boss 循环，
//! 加上一组只执行已到期任务的 worker。该拆分保证慢回调永远不会拖慢
//! tick 推进或新任务接纳。
//! (`TimeScheduler` is the public-facing timer: one boss loop that
//! exclusively mutates the wheel, plus a pool of workers that only execute
//! already-expired work. The split guarantees slow callbacks never delay
//! tick advancement or new-task admission.)

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::task::{TaskCallback, TaskFn, TaskId, TimeWork, Timeout};
use crate::wheel::{ReadyQueue, TimeWheel};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Scheduler state shared between the public handle, the boss loop, the
/// workers, and outstanding `Timeout` handles.
///
/// 公共句柄、boss 循环、worker 与未决 `Timeout` 句柄之间共享的调度器状态。
pub(crate) struct Shared {
    config: SchedulerConfig,
    epoch: Instant,
    tick_ms: i64,
    flying_tx: mpsc::UnboundedSender<TimeWork>,
    cancels_tx: mpsc::UnboundedSender<TaskId>,
    pending: Arc<AtomicUsize>,
    started: AtomicBool,
    shutdown: Notify,
}

impl Shared {
    /// 自调度器纪元起的毫秒数 (Milliseconds since the scheduler epoch)
    #[inline]
    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Admission + submission. Floors the deadline to at least one tick from
    /// now so a task can never target the unrepresentable current tick, and
    /// rejects fast when the pending cap would be exceeded.
    ///
    /// 接纳与提交。将截止时间下限抬升到距当前至少一个 tick，
    /// 使任务不可能落在无法表示的当前 tick；超过在途上限时快速拒绝。
    fn submit(
        self: &Arc<Self>,
        name: String,
        deadline_ms: i64,
        callback: TaskFn,
    ) -> Result<Timeout, SchedulerError> {
        if !self.is_started() {
            return Err(SchedulerError::Closed);
        }

        let max_pending = self.config.max_pending;
        if max_pending > 0 {
            let admitted = self
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                    if pending >= max_pending {
                        None
                    } else {
                        Some(pending + 1)
                    }
                })
                .is_ok();
            if !admitted {
                debug!(task = %name, max_pending, "task rejected: pending cap reached");
                return Err(SchedulerError::CapacityExhausted { max_pending });
            }
        } else {
            self.pending.fetch_add(1, Ordering::AcqRel);
        }

        let deadline_ms = deadline_ms.max(self.now_ms() + self.tick_ms);
        let work = TimeWork::new(name, deadline_ms, callback);
        let timeout = Timeout {
            id: work.id,
            state: Arc::clone(&work.state),
            pending: Arc::clone(&self.pending),
            cancels: self.cancels_tx.clone(),
        };

        if self.flying_tx.send(work).is_err() {
            // Boss is gone: roll back the admission and report closed.
            // boss 已退出：回滚接纳并报告已关闭。
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedulerError::Closed);
        }
        Ok(timeout)
    }
}

/// 分层时间轮调度器 (Hierarchical timing-wheel scheduler)
///
/// # 线程模型 (Threading Model)
/// - 恰好一个 boss 协程独占时间轮与槽的可变访问（单写者，无锁结构）。
///   (Exactly one boss task owns all wheel/slot mutation — single writer,
///   lock-free structures.)
/// - 生产者只向无锁队列 `flying`/`cancels` 投递，或对任务状态做 CAS。
///   (Producers only push onto the `flying`/`cancels` queues or CAS a task
///   state.)
/// - worker 只从 `working` 队列取已到期任务并执行。
///   (Workers only pop already-expired work from the `working` queue.)
///
/// # 示例 (Examples)
/// ```no_run
/// use tidewheel::{SchedulerConfig, TimeScheduler};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let scheduler = TimeScheduler::start(SchedulerConfig::default());
///     let timeout = scheduler
///         .delay("hello", Duration::from_millis(100), || async {
///             println!("fired");
///         })
///         .unwrap();
///     tokio::time::sleep(Duration::from_millis(200)).await;
///     assert!(timeout.is_expired());
///     scheduler.close();
/// }
/// ```
pub struct TimeScheduler {
    shared: Arc<Shared>,
}

impl TimeScheduler {
    /// Start the scheduler: spawn the boss loop and the worker pool.
    /// Must be called inside a tokio runtime.
    ///
    /// 启动调度器：派生 boss 循环与 worker 池。必须在 tokio 运行时内调用。
    pub fn start(config: SchedulerConfig) -> Self {
        let (flying_tx, flying_rx) = mpsc::unbounded_channel();
        let (cancels_tx, cancels_rx) = mpsc::unbounded_channel();
        let (working_tx, working_rx) = mpsc::channel(config.working_channel_capacity);

        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            tick_ms: config.tick_duration.as_millis() as i64,
            flying_tx,
            cancels_tx,
            pending: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(true),
            shutdown: Notify::new(),
            config,
        });

        let working_rx = Arc::new(tokio::sync::Mutex::new(working_rx));
        for index in 0..shared.config.worker_count {
            let shared = Arc::clone(&shared);
            let working_rx = Arc::clone(&working_rx);
            tokio::spawn(async move {
                Self::worker_loop(index, shared, working_rx).await;
            });
        }

        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                Self::boss_loop(shared, flying_rx, cancels_rx, working_tx).await;
            });
        }

        info!(
            tick = ?shared.config.tick_duration,
            slots = shared.config.slot_count,
            workers = shared.config.worker_count,
            "time scheduler started"
        );
        Self { shared }
    }

    /// Schedule a task for an absolute deadline. The effective deadline is
    /// floored to at least one tick from now; a deadline already in the past
    /// therefore still executes (via the immediate dispatch path) instead of
    /// being lost.
    ///
    /// 以绝对截止时间调度任务。生效截止时间被抬升到距当前至少一个 tick；
    /// 已经过去的截止时间仍会执行（走立即派发路径）而不会丢失。
    pub fn add<F, Fut>(
        &self,
        name: impl Into<String>,
        deadline: Instant,
        f: F,
    ) -> Result<Timeout, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline_ms = deadline
            .saturating_duration_since(self.shared.epoch)
            .as_millis() as i64;
        self.shared
            .submit(name.into(), deadline_ms, TaskFn::new(f))
    }

    /// Schedule a task after a relative delay, floored to one tick.
    ///
    /// 以相对延迟调度任务，下限为一个 tick。
    pub fn delay<F, Fut>(
        &self,
        name: impl Into<String>,
        delay: Duration,
        f: F,
    ) -> Result<Timeout, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline_ms = self.shared.now_ms() + delay.as_millis() as i64;
        self.shared
            .submit(name.into(), deadline_ms, TaskFn::new(f))
    }

    /// Self-rescheduling periodic task: after each run it re-delays itself by
    /// `interval + random(0..=jitter)` for as long as the scheduler is
    /// started. The jittered re-delay is the building block the failover
    /// subsystem uses for retry backoff.
    ///
    /// 自重调度的周期任务：每次执行后按 `interval + random(0..=jitter)`
    /// 重新延迟，直到调度器关闭。带抖动的重延迟正是故障转移子系统
    /// 用作重试退避的基础构件。
    pub fn schedule<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        jitter: Duration,
        f: F,
    ) -> Result<Timeout, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_while(name, interval, jitter, f, || true)
    }

    /// `schedule` 的带条件变体：条件返回 `false` 时停止重调度。
    /// (Conditional variant of `schedule`: rescheduling stops once the
    /// condition returns `false`.)
    pub fn schedule_while<F, Fut, C>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        jitter: Duration,
        f: F,
        condition: C,
    ) -> Result<Timeout, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: Fn() -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let periodic: Arc<PeriodicWork> = Arc::new_cyclic(|self_ref| PeriodicWork {
            self_ref: self_ref.clone(),
            scheduler: Arc::downgrade(&self.shared),
            name: name.clone(),
            interval_ms: interval.as_millis() as i64,
            jitter_ms: jitter.as_millis() as i64,
            inner: TaskFn::new(f),
            condition: Box::new(condition),
        });

        let delay_ms = periodic.next_delay_ms();
        let deadline_ms = self.shared.now_ms() + delay_ms;
        self.shared
            .submit(name, deadline_ms, TaskFn::from_arc(periodic))
    }

    /// 当前在途任务数量 (Current number of pending tasks)
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// 调度器是否处于启动状态 (Whether the scheduler is started)
    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    /// Stop the boss loop and the workers. Idempotent. Pending work is
    /// dropped, not drained: close is a process-shutdown operation.
    ///
    /// 停止 boss 循环与 worker。幂等。未决任务被丢弃而非排空：
    /// close 是进程关闭时的操作。
    pub fn close(&self) {
        if self.shared.started.swap(false, Ordering::AcqRel) {
            self.shared.shutdown.notify_waiters();
            info!("time scheduler closed");
        }
    }

    /// Boss loop: the single writer of the wheel. Each tick it drains
    /// cancellations fully, admits a bounded batch of new submissions, then
    /// flushes every ready slot — re-offering flushed work to the wheel so
    /// coarse-level content cascades into finer slots or reaches the workers.
    ///
    /// boss 循环：时间轮的单一写者。每个 tick 先排空取消队列，
    /// 再接纳有界批量的新提交，然后 flush 所有就绪槽 ——
    /// 将取出的任务重新交给时间轮，使粗层内容级联进细槽或抵达 worker。
    async fn boss_loop(
        shared: Arc<Shared>,
        mut flying_rx: mpsc::UnboundedReceiver<TimeWork>,
        mut cancels_rx: mpsc::UnboundedReceiver<TaskId>,
        working_tx: mpsc::Sender<TimeWork>,
    ) {
        let mut wheel = TimeWheel::new(shared.tick_ms, shared.config.slot_count, shared.now_ms());
        let mut ready = ReadyQueue::new();

        let mut interval = tokio::time::interval(shared.config.tick_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // notify_waiters stores no permit; a close that lands
                    // while the boss is mid-tick is caught here instead.
                    // notify_waiters 不保存许可；boss 处理 tick 期间发生的
                    // close 在此处兜底。
                    if !shared.is_started() {
                        debug!("boss loop shutting down");
                        break;
                    }
                }
                _ = shared.shutdown.notified() => {
                    debug!("boss loop shutting down");
                    break;
                }
            }

            // 1. Drain cancellations fully; removal is a no-op for work that
            //    never reached the wheel.
            // 1. 完全排空取消队列；未入轮的任务移除为空操作。
            while let Ok(id) = cancels_rx.try_recv() {
                let _ = wheel.remove(id);
            }

            // 2. Admit new submissions, bounded per tick.
            // 2. 接纳新提交，每个 tick 限量。
            let mut admitted = 0usize;
            while admitted < shared.config.admission_batch {
                match flying_rx.try_recv() {
                    Ok(work) => {
                        admitted += 1;
                        Self::admit(work, &mut wheel, &mut ready, &working_tx).await;
                    }
                    Err(_) => break,
                }
            }

            // 3. Flush every ready slot at or before the wall clock,
            //    advancing the wheel to each slot's expiration first.
            // 3. Flush 墙钟之前到期的所有就绪槽，先将时间轮推进到
            //    各槽的过期时间。
            let now = shared.now_ms();
            let mut flushed_any = false;
            while let Some(key) = ready.pop_ready(now) {
                flushed_any = true;
                wheel.advance(key.expiration);
                for work in wheel.flush_slot(key) {
                    Self::admit(work, &mut wheel, &mut ready, &working_tx).await;
                }
            }

            // 4. No slot ready: keep wall-clock tracking correct anyway.
            // 4. 无就绪槽：仍保持墙钟跟踪正确。
            if !flushed_any {
                wheel.advance(now);
            }
        }
        // Dropping working_tx here lets the workers observe shutdown.
        // working_tx 在此被丢弃，worker 随之观察到关闭。
    }

    /// Admission logic shared by the flying drain and the flush cascade:
    /// cancelled work is dropped, due work goes straight to the workers,
    /// everything else is (re)bucketed.
    ///
    /// flying 排空与 flush 级联共用的接纳逻辑：已取消的任务被丢弃，
    /// 已到期的任务直接交给 worker，其余（重新）入桶。
    async fn admit(
        work: TimeWork,
        wheel: &mut TimeWheel,
        ready: &mut ReadyQueue,
        working_tx: &mpsc::Sender<TimeWork>,
    ) {
        if work.state.is_cancelled() {
            return;
        }
        if let Some(due) = wheel.add(work, ready) {
            // The working queue applies backpressure to the boss, never to
            // producers.
            // 工作队列的背压作用于 boss，而非生产者。
            let _ = working_tx.send(due).await;
        }
    }

    /// Worker loop: executes already-dequeued work. The INIT → EXPIRED CAS is
    /// the at-most-once gate; a panicking callback is caught and logged so a
    /// worker never dies silently.
    ///
    /// worker 循环：执行已出队的任务。INIT → EXPIRED 的 CAS 是
    /// 至多一次执行的闸门；回调 panic 被捕获并记录，worker 不会悄然死亡。
    async fn worker_loop(
        index: usize,
        shared: Arc<Shared>,
        working_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TimeWork>>>,
    ) {
        loop {
            let work = {
                let mut rx = working_rx.lock().await;
                rx.recv().await
            };
            let Some(work) = work else {
                debug!(worker = index, "worker loop shutting down");
                break;
            };

            if !work.state.try_expire() {
                // Lost the race against cancel(); the canceller already
                // released the admission slot.
                // 输给了 cancel() 的竞争；取消方已释放接纳名额。
                continue;
            }
            shared.pending.fetch_sub(1, Ordering::AcqRel);

            let future = work.callback.call();
            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                warn!(worker = index, task = %work.name, "task panicked, worker continues");
            }
        }
    }
}

impl Drop for TimeScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

/// A periodic task body: runs the user callback, then re-submits itself with
/// a jittered delay while the scheduler is alive and the condition holds.
///
/// 周期任务体：执行用户回调，然后在调度器存活且条件成立期间
/// 以带抖动的延迟重新提交自身。
struct PeriodicWork {
    self_ref: Weak<PeriodicWork>,
    scheduler: Weak<Shared>,
    name: String,
    interval_ms: i64,
    jitter_ms: i64,
    inner: TaskFn,
    condition: Box<dyn Fn() -> bool + Send + Sync>,
}

impl PeriodicWork {
    fn next_delay_ms(&self) -> i64 {
        if self.jitter_ms > 0 {
            self.interval_ms + rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            self.interval_ms
        }
    }
}

impl TaskCallback for PeriodicWork {
    fn call(&self) -> BoxFuture<'static, ()> {
        let this = self.self_ref.upgrade();
        Box::pin(async move {
            let Some(this) = this else { return };
            this.inner.call().await;

            let Some(shared) = this.scheduler.upgrade() else {
                return;
            };
            if !shared.is_started() || !(this.condition)() {
                debug!(task = %this.name, "periodic task stopped");
                return;
            }
            let deadline_ms = shared.now_ms() + this.next_delay_ms();
            let callback = TaskFn::from_arc(Arc::clone(&this) as Arc<dyn TaskCallback>);
            if let Err(err) = shared.submit(this.name.clone(), deadline_ms, callback) {
                debug!(task = %this.name, %err, "periodic reschedule rejected");
            }
        })
    }
}
