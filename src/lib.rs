//! # 分层时间轮调度与数据库故障转移 (Hierarchical Timing-Wheel Scheduling & Database Failover)
//!
//! 基于分层时间轮算法的异步任务调度器，配套一个消费它的数据库连接
//! 故障转移状态机，支持 tokio 运行时。
//! (Async task scheduler based on the hierarchical timing-wheel algorithm,
//! paired with a database connection failover state machine that consumes
//! it, supports the tokio runtime)
//!
//! ## 特性 (Features)
//!
//! - **高性能 (High Performance)**: 时间轮插入、取消移除均为 O(1)，
//!   粗层以惰性级联覆盖无界延迟范围
//!   (O(1) wheel insert and cancellation removal; coarse levels cover an
//!   unbounded delay range via lazy cascading)
//! - **单写者 (Single Writer)**: 恰好一个 boss 协程改写时间轮，
//!   生产者只触碰无锁队列与原子状态
//!   (Exactly one boss task mutates the wheel; producers only touch
//!   lock-free queues and atomic state)
//! - **安全取消 (Safe Cancellation)**: INIT → {CANCELLED, EXPIRED} 的 CAS
//!   状态机保证至多一次执行，任意线程可安全竞争取消
//!   (The INIT → {CANCELLED, EXPIRED} CAS state machine guarantees
//!   at-most-once execution; cancellation races safely from any thread)
//! - **故障转移 (Failover)**: 每连接至多一个在途重定向任务，
//!   并发请求合并且始终收敛到最新目标，失败以抖动退避无限重试
//!   (At most one in-flight redirect task per connection; concurrent
//!   requests coalesce onto the newest target; failures retry indefinitely
//!   with jittered backoff)
//!
//! ## 快速开始 (Quick Start)
//!
//! ```no_run
//! use tidewheel::{SchedulerConfig, TimeScheduler};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let scheduler = TimeScheduler::start(SchedulerConfig::default());
//!
//!     let timeout = scheduler
//!         .delay("greet", Duration::from_millis(100), || async {
//!             println!("fired after 100ms");
//!         })
//!         .unwrap();
//!
//!     // 任何线程都可以安全取消 (Any thread may cancel safely)
//!     let _ = timeout.cancel();
//!
//!     scheduler.close();
//! }
//! ```

mod config;
mod db;
mod error;
mod failover;
mod scheduler;
mod task;
mod wheel;

#[cfg(test)]
mod tests;

// 重新导出公共 API (Re-export public API)
pub use config::{
    FailoverConfig, FailoverConfigBuilder, GovernanceConfig, GovernanceConfigBuilder,
    SchedulerConfig, SchedulerConfigBuilder,
};
pub use db::{
    AccessMode, AddressResolver, ConnectionId, DbAddress, DbCandidate, DbConnection,
    DbConnectionSupervisor, DbFailover, FailoverOutcome, LiveDatabase, PolicySupplier,
};
pub use error::SchedulerError;
pub use failover::DbConnectionManager;
pub use scheduler::TimeScheduler;
pub use task::{TaskCallback, TaskFn, TaskId, Timeout};
