//! 数据库边界模块 (Database Boundary Module)
//!
//! 定义故障转移编排所依赖的值对象与边界契约：集群地址、候选目标、
//! 重定向边，以及由驱动封装层实现的连接接口和由策略层实现的
//! 策略快照接口。
//! (Defines the value objects and boundary contracts the failover
//! orchestration depends on: cluster addresses, resolved candidates,
//! redirect edges, plus the connection trait implemented by driver wrappers
//! and the policy-snapshot trait implemented by the governance layer.)

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 全局唯一连接 ID 生成器 (Global unique connection ID generator)
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked database connection. Registry maps are
/// keyed by id so a connection object never needs `Eq`/`Hash` itself.
///
/// 被跟踪数据库连接的唯一标识符。注册表以 id 为键，
/// 连接对象自身无需实现 `Eq`/`Hash`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// 生成一个新的唯一连接 ID (Generate a new unique connection ID)
    #[inline]
    pub fn new() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 获取连接 ID 的数值 (Get the numeric value of the connection ID)
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// 数据库连接的访问模式 (Access mode of a database connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// 读写（主库） (Read-write, the master database)
    ReadWrite,
    /// 只读（就近副本） (Read-only, the nearest replica)
    ReadOnly,
    /// 不参与故障转移 (Not subject to failover)
    None,
}

/// A database cluster address: the raw connection string plus its parsed
/// `host:port` node list. Value type — equality and hashing go by the raw
/// address string only.
///
/// 数据库集群地址：原始连接串及解析出的 `host:port` 节点列表。
/// 值类型 —— 相等性与哈希仅由原始地址串决定。
#[derive(Debug, Clone)]
pub struct DbAddress {
    db_type: String,
    address: String,
    nodes: Vec<String>,
}

impl DbAddress {
    /// Parse a raw connection string into an address; nodes are the
    /// comma-separated entries with surrounding whitespace trimmed.
    ///
    /// 将原始连接串解析为地址；节点为按逗号分隔并去除首尾空白的条目。
    pub fn parse(db_type: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        let nodes = address
            .split(',')
            .map(|node| node.trim().to_string())
            .filter(|node| !node.is_empty())
            .collect();
        Self {
            db_type: db_type.into(),
            address,
            nodes,
        }
    }

    /// 数据库类型 (Database type)
    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    /// 原始连接串 (Raw connection string)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 解析出的节点列表 (Parsed node list)
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

impl PartialEq for DbAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DbAddress {}

impl Hash for DbAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// A routing-policy resolution result: the database the policy currently
/// designates for some role, with its node list.
///
/// 路由策略的解析结果：策略当前为某角色指定的数据库及其节点列表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDatabase {
    pub address: String,
    pub nodes: Vec<String>,
}

impl LiveDatabase {
    pub fn new(address: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            address: address.into(),
            nodes,
        }
    }
}

/// Resolves a policy database into a concrete connection string for one
/// driver's dialect. Supplied by the driver wrapper, carried through the
/// candidate and the redirect edge so retries resolve consistently.
///
/// 将策略数据库解析为某驱动方言下的具体连接串。由驱动封装层提供，
/// 随候选与重定向边一同传递，使重试解析保持一致。
pub type AddressResolver = Arc<dyn Fn(&LiveDatabase) -> String + Send + Sync>;

/// A computed proposal describing which database node a connection *should*
/// use given current policy. Read-only: computing a candidate never mutates
/// registry state.
///
/// 根据当前策略计算出的连接*应当*使用的数据库节点提案。
/// 只读：计算候选绝不改变注册表状态。
pub struct DbCandidate {
    db_type: String,
    access_mode: AccessMode,
    old_address: DbAddress,
    database: Option<LiveDatabase>,
    new_address: DbAddress,
    resolver: AddressResolver,
    redirected: bool,
}

impl DbCandidate {
    /// Build a candidate from a policy lookup. A missing database (policy
    /// not yet loaded) degrades to `new_address == old_address`, so failover
    /// becomes a no-op instead of an error.
    ///
    /// `redirected` 当且仅当策略给出了数据库且旧节点列表不再被
    /// 新节点列表完全覆盖。
    /// (由策略查询构建候选。数据库缺失（策略尚未加载）退化为
    /// `new_address == old_address`，故障转移降级为空操作而非错误。
    /// `redirected` iff policy yielded a database and the old node list is no
    /// longer fully covered by the new one.)
    pub fn new(
        access_mode: AccessMode,
        old_address: DbAddress,
        database: Option<LiveDatabase>,
        resolver: AddressResolver,
    ) -> Self {
        let db_type = old_address.db_type().to_string();
        let new_address = match &database {
            Some(live) => DbAddress::parse(&db_type, resolver(live)),
            None => old_address.clone(),
        };
        let redirected = match &database {
            Some(live) => !old_address
                .nodes()
                .iter()
                .all(|node| live.nodes.contains(node)),
            None => false,
        };
        Self {
            db_type,
            access_mode,
            old_address,
            database,
            new_address,
            resolver,
            redirected,
        }
    }

    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn old_address(&self) -> &DbAddress {
        &self.old_address
    }

    pub fn new_address(&self) -> &DbAddress {
        &self.new_address
    }

    pub fn database(&self) -> Option<&LiveDatabase> {
        self.database.as_ref()
    }

    /// 是否需要重定向 (Whether a redirect is required)
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    /// 转换为重定向边 (Convert into a redirect edge)
    pub fn into_failover(self) -> DbFailover {
        DbFailover {
            db_type: self.db_type,
            access_mode: self.access_mode,
            old_address: self.old_address,
            new_address: self.new_address,
            resolver: self.resolver,
        }
    }
}

/// One directed redirect edge `old → new` for one connection's access mode.
///
/// 一条针对某连接访问模式的有向重定向边 `old → new`。
#[derive(Clone)]
pub struct DbFailover {
    db_type: String,
    access_mode: AccessMode,
    old_address: DbAddress,
    new_address: DbAddress,
    resolver: AddressResolver,
}

impl DbFailover {
    pub fn new(
        access_mode: AccessMode,
        old_address: DbAddress,
        new_address: DbAddress,
        resolver: AddressResolver,
    ) -> Self {
        Self {
            db_type: old_address.db_type().to_string(),
            access_mode,
            old_address,
            new_address,
            resolver,
        }
    }

    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn old_address(&self) -> &DbAddress {
        &self.old_address
    }

    pub fn new_address(&self) -> &DbAddress {
        &self.new_address
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// 两端地址不同即为重定向 (Redirected iff the two endpoints differ)
    pub fn is_redirected(&self) -> bool {
        self.old_address != self.new_address
    }
}

impl fmt::Debug for DbFailover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbFailover")
            .field("db_type", &self.db_type)
            .field("access_mode", &self.access_mode)
            .field("old_address", &self.old_address)
            .field("new_address", &self.new_address)
            .finish_non_exhaustive()
    }
}

/// Outcome of asking a connection to redirect itself.
///
/// 要求连接自我重定向的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// 重定向完成 (Redirect completed)
    Success,
    /// 重定向失败，应当重试 (Redirect failed, should be retried)
    Failed,
    /// 连接正在销毁，放弃跟踪 (Connection is being torn down, stop tracking)
    Discard,
    /// 已指向正确目标，无需操作 (Already pointing at the right target)
    None,
}

/// A live database connection as seen by the failover orchestration,
/// implemented by driver-specific wrappers.
///
/// 故障转移编排所见的活动数据库连接，由驱动相关的封装层实现。
pub trait DbConnection: Send + Sync + 'static {
    /// 连接的稳定标识 (Stable identity of the connection)
    fn id(&self) -> ConnectionId;

    /// 连接当前持有的重定向状态（如有）
    /// (The redirect state the connection currently holds, if any)
    fn failover_state(&self) -> Option<DbFailover>;

    /// Redirect the live connection to the target address.
    ///
    /// 将活动连接重定向到目标地址。
    fn redirect(&self, target: &DbAddress) -> FailoverOutcome;

    /// 连接是否已关闭 (Whether the connection is closed)
    fn is_closed(&self) -> bool;
}

/// Read-only routing-policy snapshot source.
///
/// 只读的路由策略快照来源。
pub trait PolicySupplier: Send + Sync + 'static {
    /// The current write (master) database for a database type.
    ///
    /// 某数据库类型当前的写（主）库。
    fn write_database(&self, db_type: &str) -> Option<LiveDatabase>;

    /// The nearest read replica for a database type.
    ///
    /// 某数据库类型就近的读副本。
    fn read_database(&self, db_type: &str) -> Option<LiveDatabase>;
}

/// Boundary contract for driver interceptors: candidate computation,
/// connection registration, and failover triggering.
///
/// 面向驱动拦截器的边界契约：候选计算、连接注册与故障转移触发。
pub trait DbConnectionSupervisor: Send + Sync {
    /// Pure policy lookup: which node should a connection at `address` use,
    /// given the current policy snapshot.
    ///
    /// 纯策略查询：给定当前策略快照，位于 `address` 的连接应使用哪个节点。
    fn get_candidate(
        &self,
        address: DbAddress,
        access_mode: AccessMode,
        resolver: AddressResolver,
    ) -> DbCandidate;

    /// 注册一条活动连接 (Register a live connection)
    fn add_connection(&self, connection: Arc<dyn DbConnection>, address: DbAddress);

    /// 注销一条活动连接 (Deregister a live connection)
    fn remove_connection(&self, connection_id: ConnectionId, address: &DbAddress);

    /// Drive one connection toward a candidate's target.
    ///
    /// 驱动一条连接转向候选目标。
    fn failover(&self, connection: Arc<dyn DbConnection>, candidate: DbCandidate);

    /// Re-scan every tracked connection against the latest policy.
    ///
    /// 按最新策略重新扫描所有被跟踪的连接。
    fn failover_all(&self);

    /// Last published redirect for an original address, if any.
    ///
    /// 某原始地址最近发布的重定向（如有）。
    fn get_failover(&self, address: &DbAddress) -> Option<DbFailover>;
}
