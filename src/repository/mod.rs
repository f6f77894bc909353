// ==========================================
// 麻醉科排班引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口, 屏蔽存储细节
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod error;
pub mod memory_repo;
pub mod planning_repo;
pub mod sqlite_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use memory_repo::InMemoryPlanningRepository;
pub use planning_repo::{PlanningRepository, WriteBatch, WriteReceipt};
pub use sqlite_repo::SqlitePlanningRepository;
