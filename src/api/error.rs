// ==========================================
// 麻醉科排班引擎 - API层错误类型
// ==========================================
// 职责: 将引擎/仓储错误转换为调用方可读的错误消息
// 红线: 所有错误信息必须包含显式原因
// ==========================================

use crate::domain::violation::Violation;
use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与配置错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("规则配置错误: {0}")]
    ConfigurationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 模拟与应用错误
    // ==========================================
    #[error("模拟运行失败: {0}")]
    SimulationFailed(String),

    #[error("模拟结果已应用: result_id={0}")]
    AlreadyApplied(String),

    /// 应用前发现新冲突 (附完整冲突清单)
    #[error("实时排班存在新冲突: {} 项", conflicts.len())]
    StaleSchedule { conflicts: Vec<Violation> },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseConnectionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::InvalidInput(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Configuration { rule_id, message } => {
                ApiError::ConfigurationError(format!("{}: {}", rule_id, message))
            }
            EngineError::InvalidConfig { key, message } => {
                ApiError::ConfigurationError(format!("{}: {}", key, message))
            }
            EngineError::ValidationInput(msg) => ApiError::InvalidInput(msg),
            e @ (EngineError::ChunkExecution { .. }
            | EngineError::Timeout { .. }
            | EngineError::Cancelled) => ApiError::SimulationFailed(e.to_string()),
            EngineError::StaleScheduleConflict { conflicts } => ApiError::StaleSchedule { conflicts },
            EngineError::AlreadyApplied { result_id } => ApiError::AlreadyApplied(result_id),
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            EngineError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            EngineError::Repository(e) => e.into(),
            EngineError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidInput(format!("JSON 格式错误: {}", err))
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RuleKindTag, Severity};

    #[test]
    fn test_engine_error_mapping() {
        let conflict = Violation::new(
            "SUP",
            RuleKindTag::SupervisionCapacity,
            Severity::Error,
            vec!["C1".to_string()],
            "超出督导上限",
        );
        let api: ApiError = EngineError::StaleScheduleConflict {
            conflicts: vec![conflict.clone()],
        }
        .into();
        match api {
            ApiError::StaleSchedule { conflicts } => assert_eq!(conflicts, vec![conflict]),
            other => panic!("unexpected: {:?}", other),
        }

        let api: ApiError = EngineError::Cancelled.into();
        assert_eq!(api.to_string(), "模拟运行失败: cancelled");

        let api: ApiError = EngineError::Repository(RepositoryError::LockError("busy".into())).into();
        assert!(matches!(api, ApiError::DatabaseError(_)));
    }
}
