use std::fmt;

/// 调度器错误类型 (Scheduler Error Type)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// 配置验证失败 (Configuration validation failed)
    InvalidConfiguration {
        field: String,
        reason: String,
    },

    /// 在途任务数量达到上限，提交被拒绝
    /// Pending task count reached the cap, submission rejected
    CapacityExhausted {
        max_pending: usize,
    },

    /// 调度器已关闭，不再接受任务
    /// Scheduler is closed and no longer accepts tasks
    Closed,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::InvalidConfiguration { field, reason } => {
                write!(f, "Configuration validation failed ({}): {}", field, reason)
            }
            SchedulerError::CapacityExhausted { max_pending } => {
                write!(f, "Pending task cap reached ({}), submission rejected", max_pending)
            }
            SchedulerError::Closed => {
                write!(f, "Scheduler is closed")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
