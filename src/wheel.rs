use crate::task::{TaskId, TimeWork};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Expiration value of an inactive (empty) slot
///
/// 非活跃（空）槽的过期时间标记
pub(crate) const SLOT_INACTIVE: i64 = -1;

/// Position of a freshly inserted work item inside its slot. `Head` marks the
/// empty → non-empty transition and tells the caller to announce the slot to
/// the ready queue exactly once per fill cycle.
///
/// 新插入任务在槽内的位置。`Head` 标记空 → 非空的转移，
/// 提示调用方在每个填充周期中恰好一次将槽加入就绪队列。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SlotPosition {
    Head,
    Tail,
}

/// A coarse time bucket shared by all work whose target tick falls in the
/// same wheel position during the same revolution.
///
/// Invariant: `expiration == SLOT_INACTIVE` iff the bucket is empty. Slots
/// are allocated once per wheel position and reused forever; a flush resets
/// the bucket instead of reallocating it.
///
/// 同一圈中落在同一轮位的任务共享的粗粒度时间桶。
///
/// 不变式：`expiration == SLOT_INACTIVE` 当且仅当桶为空。
/// 槽在时间轮构造时按轮位分配一次并永久复用；flush 重置桶而非重新分配。
pub(crate) struct TimeSlot {
    pub(crate) expiration: i64,
    works: Vec<TimeWork>,
}

impl TimeSlot {
    fn new() -> Self {
        Self {
            expiration: SLOT_INACTIVE,
            works: Vec::new(),
        }
    }

    /// Append work at the tail; activates the slot on the first insert.
    ///
    /// 尾部追加任务；首次插入时激活槽。
    fn push(&mut self, work: TimeWork, expiration: i64) -> SlotPosition {
        let position = if self.works.is_empty() {
            self.expiration = expiration;
            SlotPosition::Head
        } else {
            SlotPosition::Tail
        };
        self.works.push(work);
        position
    }

    /// Detach the whole bucket as a snapshot and deactivate the slot. The
    /// detach-then-consume ordering lets callers re-insert work into slots
    /// (including this one) while iterating the snapshot.
    ///
    /// 将整个桶作为快照取出并停用槽。先取出再消费的顺序允许调用方
    /// 在迭代快照时把任务重新插入槽（包括本槽）。
    fn flush(&mut self) -> Vec<TimeWork> {
        self.expiration = SLOT_INACTIVE;
        std::mem::take(&mut self.works)
    }

    /// O(1) removal via swap_remove; deactivates the slot when it empties.
    ///
    /// 通过 swap_remove 实现 O(1) 移除；槽清空时停用。
    fn swap_remove(&mut self, index: usize) -> TimeWork {
        let work = self.works.swap_remove(index);
        if self.works.is_empty() {
            self.expiration = SLOT_INACTIVE;
        }
        work
    }

    fn len(&self) -> usize {
        self.works.len()
    }

    fn id_at(&self, index: usize) -> Option<TaskId> {
        self.works.get(index).map(|w| w.id)
    }
}

/// Key of a slot announced to the ready queue: ordered by expiration first so
/// a min-heap pops slots in due order.
///
/// 加入就绪队列的槽键：按过期时间优先排序，使最小堆按到期顺序弹出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SlotKey {
    pub(crate) expiration: i64,
    pub(crate) level: usize,
    pub(crate) slot: usize,
}

/// Delay-ordered queue of ready slots — the signal channel between the wheel
/// and the boss loop.
///
/// 按延迟排序的就绪槽队列 —— 时间轮与 boss 循环之间的信号通道。
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<Reverse<SlotKey>>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, key: SlotKey) {
        self.heap.push(Reverse(key));
    }

    /// Pop the next slot whose expiration is due at `now_ms`, if any.
    ///
    /// 弹出下一个在 `now_ms` 已到期的槽（如有）。
    pub(crate) fn pop_ready(&mut self, now_ms: i64) -> Option<SlotKey> {
        match self.heap.peek() {
            Some(Reverse(key)) if key.expiration <= now_ms => {
                self.heap.pop().map(|Reverse(key)| key)
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Location of a bucketed work item, kept in the wheel's task index for O(1)
/// cancellation removal.
///
/// 已入桶任务的位置，保存在时间轮的任务索引中以支持 O(1) 取消移除。
#[derive(Debug, Clone, Copy)]
struct TaskLocation {
    level: usize,
    slot: usize,
    index: usize,
}

/// One level of the hierarchical wheel: a fixed circular schedule of `ticks`
/// slots of width `tick_ms`.
///
/// Invariant: `now_ms` is always a multiple of `tick_ms` and only moves
/// forward.
///
/// 分层时间轮的一层：`ticks` 个宽度为 `tick_ms` 的槽构成的固定环形日程。
///
/// 不变式：`now_ms` 永远是 `tick_ms` 的整数倍，且只会前进。
struct WheelLevel {
    tick_ms: i64,
    ticks: usize,
    duration_ms: i64,
    now_ms: i64,
    slots: Vec<TimeSlot>,
}

impl WheelLevel {
    fn new(tick_ms: i64, ticks: usize, start_ms: i64) -> Self {
        let mut slots = Vec::with_capacity(ticks);
        for _ in 0..ticks {
            slots.push(TimeSlot::new());
        }
        Self {
            tick_ms,
            ticks,
            duration_ms: tick_ms * ticks as i64,
            now_ms: start_ms - start_ms % tick_ms,
            slots,
        }
    }

    /// Snap `now` to the tick boundary at or below `timestamp`, if at least
    /// one full tick has elapsed at this level's resolution. Coarse levels
    /// re-check the same condition at their own (coarser) tick width, so
    /// advancing the whole hierarchy with one wall-clock timestamp is
    /// correct.
    ///
    /// 若本层分辨率下至少流逝了一个完整 tick，则把 `now` 对齐到
    /// `timestamp` 以下的 tick 边界。粗层以各自更粗的 tick 宽度复查
    /// 同一条件，因此用同一个墙钟时间推进整个层级是正确的。
    fn advance(&mut self, timestamp_ms: i64) {
        if timestamp_ms >= self.now_ms + self.tick_ms {
            self.now_ms = timestamp_ms - timestamp_ms % self.tick_ms;
        }
    }
}

/// Hierarchical timing wheel.
///
/// Levels share the slot count; level N+1 has `tick = level N duration` and
/// is created lazily on the first out-of-range insert, giving an
/// unbounded-range timer from a small fixed amount of memory. Cascading from
/// coarse to fine levels is implicit: when a coarse slot expires and is
/// flushed, the boss re-offers its work to `add()`, which now buckets it into
/// a finer level (or reports it due).
///
/// 分层时间轮。
///
/// 各层共享槽数量；第 N+1 层的 `tick = 第 N 层的 duration`，
/// 在首次越界插入时惰性创建，用少量固定内存覆盖无界延迟范围。
/// 粗层向细层的级联是隐式的：粗槽到期被 flush 后，boss 将其中的任务
/// 重新交给 `add()`，此时会落入更细的层（或报告已到期）。
pub(crate) struct TimeWheel {
    tick_ms: i64,
    ticks: usize,
    levels: Vec<WheelLevel>,
    task_index: FxHashMap<TaskId, TaskLocation>,
}

impl TimeWheel {
    pub(crate) fn new(tick_ms: i64, ticks: usize, start_ms: i64) -> Self {
        Self {
            tick_ms,
            ticks,
            levels: vec![WheelLevel::new(tick_ms, ticks, start_ms)],
            task_index: FxHashMap::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn now_ms(&self) -> i64 {
        self.levels[0].now_ms
    }

    #[cfg(test)]
    pub(crate) fn tick_ms(&self) -> i64 {
        self.tick_ms
    }

    /// Bucket a work item, or give it back when it is already due this tick.
    ///
    /// - `delta < tick` at the finest level: returns `Some(work)` — the
    ///   caller must dispatch it immediately instead of bucketing it.
    /// - `delta < duration` at some level: buckets the work there and, on the
    ///   slot's empty → non-empty transition, announces the slot to `ready`.
    /// - otherwise delegates to the next (lazily created) level; a deadline
    ///   landing exactly on the `duration` boundary goes deeper, never wraps
    ///   (strict `<`).
    ///
    /// 入桶一个任务；若本 tick 已到期则交还。
    ///
    /// - 最细层 `delta < tick`：返回 `Some(work)` —— 调用方必须立即派发
    ///   而非入桶。
    /// - 某层 `delta < duration`：在该层入桶，并在槽空 → 非空转移时
    ///   将槽加入 `ready`。
    /// - 否则委托给（惰性创建的）下一层；恰好落在 `duration` 边界的
    ///   截止时间进入更深层，绝不回绕（严格 `<`）。
    pub(crate) fn add(&mut self, work: TimeWork, ready: &mut ReadyQueue) -> Option<TimeWork> {
        let mut level = 0;
        loop {
            if level == self.levels.len() {
                let prev = &self.levels[level - 1];
                let tick = prev.duration_ms;
                let now = prev.now_ms;
                self.levels.push(WheelLevel::new(tick, self.ticks, now));
            }

            let wheel = &mut self.levels[level];
            if work.deadline_ms < wheel.now_ms + wheel.tick_ms {
                // Only reachable at level 0: a deeper level never sees a
                // deadline below one of its own ticks.
                // 仅在第 0 层可达：深层不会收到小于自身一个 tick 的截止时间。
                return Some(work);
            }

            if work.deadline_ms < wheel.now_ms + wheel.duration_ms {
                let virtual_tick = work.deadline_ms / wheel.tick_ms;
                let slot_index = (virtual_tick % wheel.ticks as i64) as usize;
                let expiration = virtual_tick * wheel.tick_ms;

                let id = work.id;
                let slot = &mut wheel.slots[slot_index];
                let position = slot.push(work, expiration);
                self.task_index.insert(
                    id,
                    TaskLocation {
                        level,
                        slot: slot_index,
                        index: slot.len() - 1,
                    },
                );
                if position == SlotPosition::Head {
                    ready.push(SlotKey {
                        expiration,
                        level,
                        slot: slot_index,
                    });
                }
                return None;
            }

            level += 1;
        }
    }

    /// Advance every level to `timestamp_ms`; each level snaps only when its
    /// own tick boundary is crossed.
    ///
    /// 将所有层推进到 `timestamp_ms`；每层仅在跨过自身 tick 边界时对齐。
    pub(crate) fn advance(&mut self, timestamp_ms: i64) {
        for level in &mut self.levels {
            level.advance(timestamp_ms);
        }
    }

    /// Remove a cancelled work item from whatever slot holds it. No-op when
    /// the item is not bucketed (still flying, already flushed, or already
    /// removed).
    ///
    /// 从持有它的槽中移除被取消的任务。任务未入桶（仍在 flying、
    /// 已被 flush 或已移除）时为空操作。
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<TimeWork> {
        let location = self.task_index.remove(&id)?;
        let slot = &mut self.levels[location.level].slots[location.slot];

        if location.index >= slot.len() || slot.id_at(location.index) != Some(id) {
            // Index went stale (slot flushed and refilled); restore nothing.
            // 索引已失效（槽被 flush 后重新填充）；不做恢复。
            return None;
        }

        let work = slot.swap_remove(location.index);
        if location.index < slot.len() {
            if let Some(swapped_id) = slot.id_at(location.index) {
                if let Some(swapped_location) = self.task_index.get_mut(&swapped_id) {
                    swapped_location.index = location.index;
                }
            }
        }
        debug_assert_eq!(work.id, id);
        Some(work)
    }

    /// Flush the slot a popped `SlotKey` points at. Returns an empty snapshot
    /// when the key is stale (the slot was emptied by cancellation and
    /// possibly refilled for a later revolution).
    ///
    /// Flush 弹出的 `SlotKey` 指向的槽。若键已失效（槽因取消被清空，
    /// 甚至已被后续圈次重新填充）则返回空快照。
    pub(crate) fn flush_slot(&mut self, key: SlotKey) -> Vec<TimeWork> {
        let slot = &mut self.levels[key.level].slots[key.slot];
        if slot.expiration != key.expiration {
            return Vec::new();
        }
        let works = slot.flush();
        for work in &works {
            self.task_index.remove(&work.id);
        }
        works
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.task_index.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn level_count(&self) -> usize {
        self.levels.len()
    }
}
