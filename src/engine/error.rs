// ==========================================
// 麻醉科排班引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: 所有错误必须带可读原因; 应用冲突必须带完整冲突清单
// ==========================================

use crate::domain::violation::Violation;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 加载期错误 (同步返回) =====
    /// 规则/约束配置格式错误, 整体加载失败
    #[error("规则配置错误 (rule_id={rule_id}): {message}")]
    Configuration { rule_id: String, message: String },

    /// 引擎配置项错误
    #[error("引擎配置错误 (key={key}): {message}")]
    InvalidConfig { key: String, message: String },

    /// 日期区间或排班输入不合法, 任何工作开始前拒绝
    #[error("输入校验失败: {0}")]
    ValidationInput(String),

    // ===== 运行期错误 =====
    /// 分块执行失败, 整次运行 FAILED
    #[error("分块执行失败 (chunk={chunk_index}): {message}")]
    ChunkExecution { chunk_index: usize, message: String },

    #[error("模拟运行超时: {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("cancelled")]
    Cancelled,

    // ===== 应用期错误 =====
    /// 应用前重新校验发现新冲突, 零写入
    #[error("实时排班存在 {} 个新冲突, 应用已中止", conflicts.len())]
    StaleScheduleConflict { conflicts: Vec<Violation> },

    #[error("模拟结果已应用, 不可重复应用: result_id={result_id}")]
    AlreadyApplied { result_id: String },

    // ===== 通用错误 =====
    #[error("资源未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ==========================================
// CheckerRuntimeError - 单个规则检查器的运行期错误
// ==========================================
// 不会越过 evaluate 边界, 由评估器降级为 INFO 违规
#[derive(Error, Debug, Clone, PartialEq)]
#[error("规则 {rule_id} 执行失败: {message}")]
pub struct CheckerRuntimeError {
    pub rule_id: String,
    pub assignment_id: Option<String>,
    pub message: String,
}

impl CheckerRuntimeError {
    pub fn new(
        rule_id: impl Into<String>,
        assignment_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            assignment_id,
            message: message.into(),
        }
    }
}
