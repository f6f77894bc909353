// ==========================================
// 麻醉科排班引擎 - 核心库
// ==========================================
// 技术栈: Rust + tokio + SQLite
// 系统定位: 排班约束评估与模拟 (人工最终决定是否应用)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 规则评估与模拟
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{RuleKindTag, Severity, ShiftKind, SimulationStatus, StaffRole};

// 领域实体
pub use domain::{
    ApplyOptions, ApplyOutcome, CandidateAssignment, ComparisonReport, DateRange, RuleConfig,
    ScenarioParameters, SimulationResult, SimulationScenario, SimulationStatistics, Violation,
    ViolationReport,
};

// 引擎
pub use engine::{EngineDeps, EngineError, EngineResult, PlanningEngine};

// 仓储
pub use repository::{InMemoryPlanningRepository, PlanningRepository, SqlitePlanningRepository};

// API
pub use api::{ApiError, SimulationApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "麻醉科排班约束与模拟引擎";
