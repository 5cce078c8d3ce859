//! 配置模块 (Configuration Module)
//!
//! 提供分层的配置结构和 Builder 模式，用于配置调度器与数据库故障转移行为。
//! (Provides hierarchical configuration structure and Builder pattern for
//! configuring the scheduler and the database failover behavior)

use crate::error::SchedulerError;
use std::time::Duration;

/// 调度器配置 (Scheduler Configuration)
///
/// 配置分层时间轮调度器的参数。
/// (Configuration parameters for the hierarchical timing-wheel scheduler)
///
/// # 示例 (Examples)
/// ```no_run
/// use tidewheel::SchedulerConfig;
/// use std::time::Duration;
///
/// // 使用默认配置 (Use default configuration)
/// let config = SchedulerConfig::default();
///
/// // 使用 Builder 自定义配置 (Use Builder to customize configuration)
/// let config = SchedulerConfig::builder()
///     .tick_duration(Duration::from_millis(10))
///     .slot_count(100)
///     .worker_count(1)
///     .max_pending(10_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 每个 tick 的时间长度 (Duration of each tick)
    pub tick_duration: Duration,
    /// 每层时间轮的槽位数量 (Number of slots per wheel level)
    pub slot_count: usize,
    /// 工作协程数量，负责执行到期任务
    /// (Number of worker tasks executing expired work)
    pub worker_count: usize,
    /// 在途任务上限，0 表示不限制
    /// (Pending task cap, 0 means unlimited)
    pub max_pending: usize,
    /// boss 循环每个 tick 最多接纳的新任务数量
    /// (Maximum number of new submissions admitted per boss tick)
    pub admission_batch: usize,
    /// 工作队列容量 (Working queue capacity)
    pub working_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(10),
            slot_count: 512,
            worker_count: 4,
            max_pending: 0,
            admission_batch: 100_000,
            working_channel_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// 创建配置构建器 (Create configuration builder)
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

/// 调度器配置构建器 (Scheduler Configuration Builder)
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    tick_duration: Duration,
    slot_count: usize,
    worker_count: usize,
    max_pending: usize,
    admission_batch: usize,
    working_channel_capacity: usize,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        let config = SchedulerConfig::default();
        Self {
            tick_duration: config.tick_duration,
            slot_count: config.slot_count,
            worker_count: config.worker_count,
            max_pending: config.max_pending,
            admission_batch: config.admission_batch,
            working_channel_capacity: config.working_channel_capacity,
        }
    }
}

impl SchedulerConfigBuilder {
    /// 设置 tick 时长 (Set tick duration)
    pub fn tick_duration(mut self, duration: Duration) -> Self {
        self.tick_duration = duration;
        self
    }

    /// 设置槽位数量 (Set slot count)
    pub fn slot_count(mut self, count: usize) -> Self {
        self.slot_count = count;
        self
    }

    /// 设置工作协程数量 (Set worker count)
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// 设置在途任务上限，0 表示不限制
    /// (Set pending task cap, 0 means unlimited)
    pub fn max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// 设置每个 tick 的接纳批量 (Set admission batch per tick)
    pub fn admission_batch(mut self, batch: usize) -> Self {
        self.admission_batch = batch;
        self
    }

    /// 设置工作队列容量 (Set working queue capacity)
    pub fn working_channel_capacity(mut self, capacity: usize) -> Self {
        self.working_channel_capacity = capacity;
        self
    }

    /// 构建配置并进行验证
    ///      (Build and validate configuration)
    ///
    /// # 返回 (Returns)
    /// - `Ok(SchedulerConfig)`: 配置有效
    ///      (Configuration is valid)
    /// - `Err(SchedulerError)`: 配置验证失败
    ///      (Configuration validation failed)
    ///
    /// # 验证规则 (Validation Rules)
    /// - tick 时长必须大于 0 (Tick duration must be greater than 0)
    /// - 槽位数量必须大于 0 (Slot count must be greater than 0)
    /// - 工作协程数量必须大于 0 (Worker count must be greater than 0)
    /// - 接纳批量必须大于 0 (Admission batch must be greater than 0)
    /// - 工作队列容量必须大于 0 (Working queue capacity must be greater than 0)
    pub fn build(self) -> Result<SchedulerConfig, SchedulerError> {
        if self.tick_duration.is_zero() {
            return Err(SchedulerError::InvalidConfiguration {
                field: "tick_duration".to_string(),
                reason: "tick 时长必须大于 0".to_string(),
            });
        }

        if self.slot_count == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                field: "slot_count".to_string(),
                reason: "槽位数量必须大于 0".to_string(),
            });
        }

        if self.worker_count == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                field: "worker_count".to_string(),
                reason: "工作协程数量必须大于 0".to_string(),
            });
        }

        if self.admission_batch == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                field: "admission_batch".to_string(),
                reason: "接纳批量必须大于 0".to_string(),
            });
        }

        if self.working_channel_capacity == 0 {
            return Err(SchedulerError::InvalidConfiguration {
                field: "working_channel_capacity".to_string(),
                reason: "工作队列容量必须大于 0".to_string(),
            });
        }

        Ok(SchedulerConfig {
            tick_duration: self.tick_duration,
            slot_count: self.slot_count,
            worker_count: self.worker_count,
            max_pending: self.max_pending,
            admission_batch: self.admission_batch,
            working_channel_capacity: self.working_channel_capacity,
        })
    }
}

/// 故障转移配置 (Failover Configuration)
///
/// 配置连接重定向任务的抖动重试区间。
/// (Configures the jittered retry window of connection redirect tasks)
///
/// # 示例 (Examples)
/// ```no_run
/// use tidewheel::FailoverConfig;
/// use std::time::Duration;
///
/// let config = FailoverConfig::builder()
///     .retry_min_delay(Duration::from_millis(50))
///     .retry_max_delay(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// 重试延迟下界 (Lower bound of the retry delay)
    pub retry_min_delay: Duration,
    /// 重试延迟上界 (Upper bound of the retry delay)
    pub retry_max_delay: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_min_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(2000),
        }
    }
}

impl FailoverConfig {
    /// 创建配置构建器 (Create configuration builder)
    pub fn builder() -> FailoverConfigBuilder {
        FailoverConfigBuilder::default()
    }
}

/// 故障转移配置构建器 (Failover Configuration Builder)
#[derive(Debug, Clone)]
pub struct FailoverConfigBuilder {
    retry_min_delay: Duration,
    retry_max_delay: Duration,
}

impl Default for FailoverConfigBuilder {
    fn default() -> Self {
        let config = FailoverConfig::default();
        Self {
            retry_min_delay: config.retry_min_delay,
            retry_max_delay: config.retry_max_delay,
        }
    }
}

impl FailoverConfigBuilder {
    /// 设置重试延迟下界 (Set lower bound of the retry delay)
    pub fn retry_min_delay(mut self, delay: Duration) -> Self {
        self.retry_min_delay = delay;
        self
    }

    /// 设置重试延迟上界 (Set upper bound of the retry delay)
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// 构建配置并进行验证
    ///      (Build and validate configuration)
    ///
    /// # 验证规则 (Validation Rules)
    /// - 重试延迟下界必须大于 0 (Retry delay lower bound must be greater than 0)
    /// - 重试延迟上界必须大于下界 (Retry delay upper bound must exceed the lower bound)
    pub fn build(self) -> Result<FailoverConfig, SchedulerError> {
        if self.retry_min_delay.is_zero() {
            return Err(SchedulerError::InvalidConfiguration {
                field: "retry_min_delay".to_string(),
                reason: "重试延迟下界必须大于 0".to_string(),
            });
        }

        if self.retry_max_delay <= self.retry_min_delay {
            return Err(SchedulerError::InvalidConfiguration {
                field: "retry_max_delay".to_string(),
                reason: format!(
                    "重试延迟上界 ({:?}) 必须大于下界 ({:?})",
                    self.retry_max_delay, self.retry_min_delay
                ),
            });
        }

        Ok(FailoverConfig {
            retry_min_delay: self.retry_min_delay,
            retry_max_delay: self.retry_max_delay,
        })
    }
}

/// 顶层治理配置 (Top-level Governance Configuration)
///
/// 组合调度器与故障转移子配置。
/// (Combines the scheduler and failover sub-configurations)
#[derive(Debug, Clone, Default)]
pub struct GovernanceConfig {
    /// 调度器配置 (Scheduler configuration)
    pub scheduler: SchedulerConfig,
    /// 故障转移配置 (Failover configuration)
    pub failover: FailoverConfig,
}

impl GovernanceConfig {
    /// 创建配置构建器 (Create configuration builder)
    pub fn builder() -> GovernanceConfigBuilder {
        GovernanceConfigBuilder::default()
    }
}

/// 顶层治理配置构建器 (Top-level Governance Configuration Builder)
#[derive(Debug, Default)]
pub struct GovernanceConfigBuilder {
    scheduler_builder: SchedulerConfigBuilder,
    failover_builder: FailoverConfigBuilder,
}

impl GovernanceConfigBuilder {
    /// 设置 tick 时长 (Set tick duration)
    pub fn tick_duration(mut self, duration: Duration) -> Self {
        self.scheduler_builder = self.scheduler_builder.tick_duration(duration);
        self
    }

    /// 设置槽位数量 (Set slot count)
    pub fn slot_count(mut self, count: usize) -> Self {
        self.scheduler_builder = self.scheduler_builder.slot_count(count);
        self
    }

    /// 设置工作协程数量 (Set worker count)
    pub fn worker_count(mut self, count: usize) -> Self {
        self.scheduler_builder = self.scheduler_builder.worker_count(count);
        self
    }

    /// 设置在途任务上限 (Set pending task cap)
    pub fn max_pending(mut self, max: usize) -> Self {
        self.scheduler_builder = self.scheduler_builder.max_pending(max);
        self
    }

    /// 设置重试延迟下界 (Set lower bound of the retry delay)
    pub fn retry_min_delay(mut self, delay: Duration) -> Self {
        self.failover_builder = self.failover_builder.retry_min_delay(delay);
        self
    }

    /// 设置重试延迟上界 (Set upper bound of the retry delay)
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.failover_builder = self.failover_builder.retry_max_delay(delay);
        self
    }

    /// 构建配置并进行验证
    ///      (Build and validate configuration)
    pub fn build(self) -> Result<GovernanceConfig, SchedulerError> {
        Ok(GovernanceConfig {
            scheduler: self.scheduler_builder.build()?,
            failover: self.failover_builder.build()?,
        })
    }
}
