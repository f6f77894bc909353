// ==========================================
// 麻醉科排班引擎 - 模拟事件发布
// ==========================================
// 职责: 定义模拟生命周期事件与通知 trait, 实现依赖倒置
// 说明: Engine 层定义 trait, 外部服务层实现适配器 (推送/消息队列)
// 红线: 通知为即发即弃, 失败只记录日志, 不影响模拟/应用结果
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 模拟事件类型
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationEventKind {
    /// 运行开始 (RUNNING)
    Started,
    /// 分块完成 (第 completed 个 / 共 total 个)
    ChunkCompleted { completed: usize, total: usize },
    /// 运行完成 (COMPLETED)
    Completed { total_violations: u64 },
    /// 运行失败 (FAILED)
    Failed { reason: String },
    /// 结果已应用到实时排班 (APPLIED)
    Applied {
        assignments_created: u64,
        assignments_updated: u64,
    },
}

impl SimulationEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationEventKind::Started => "STARTED",
            SimulationEventKind::ChunkCompleted { .. } => "CHUNK_COMPLETED",
            SimulationEventKind::Completed { .. } => "COMPLETED",
            SimulationEventKind::Failed { .. } => "FAILED",
            SimulationEventKind::Applied { .. } => "APPLIED",
        }
    }
}

/// 模拟事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationEvent {
    pub result_id: String,
    pub scenario_id: String,
    pub kind: SimulationEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl SimulationEvent {
    pub fn new(
        result_id: impl Into<String>,
        scenario_id: impl Into<String>,
        kind: SimulationEventKind,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            result_id: result_id.into(),
            scenario_id: scenario_id.into(),
            kind,
            occurred_at,
        }
    }
}

// ==========================================
// 事件通知 Trait
// ==========================================

/// 模拟事件通知者
///
/// # 实现说明
/// - 实现方不得阻塞调用线程 (引擎不等待通知完成)
/// - 返回的错误仅用于日志
pub trait SimulationNotifier: Send + Sync {
    fn notify(&self, event: SimulationEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作通知者 (单元测试 / 命令行)
#[derive(Debug, Clone, Default)]
pub struct NoOpNotifier;

impl SimulationNotifier for NoOpNotifier {
    fn notify(&self, event: SimulationEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpNotifier: 跳过事件 - result_id={}, kind={}",
            event.result_id,
            event.kind.as_str()
        );
        Ok(())
    }
}

/// 可选的通知者包装
///
/// 简化 Option<Arc<dyn SimulationNotifier>> 的使用
#[derive(Clone)]
pub struct OptionalNotifier {
    inner: Option<Arc<dyn SimulationNotifier>>,
}

impl OptionalNotifier {
    pub fn with_notifier(notifier: Arc<dyn SimulationNotifier>) -> Self {
        Self {
            inner: Some(notifier),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件; 失败只记录 warn
    pub fn publish(&self, event: SimulationEvent) {
        match &self.inner {
            Some(notifier) => {
                let result_id = event.result_id.clone();
                let kind = event.kind.as_str();
                if let Err(e) = notifier.notify(event) {
                    tracing::warn!(result_id = %result_id, kind, error = %e, "事件通知失败");
                }
            }
            None => {
                tracing::debug!(
                    "OptionalNotifier: 未配置通知者, 跳过事件 - result_id={}, kind={}",
                    event.result_id,
                    event.kind.as_str()
                );
            }
        }
    }

    /// 在后台任务中发布, 调用方不等待
    pub fn publish_detached(&self, event: SimulationEvent) {
        if self.inner.is_none() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.publish(event);
        });
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalNotifier {
    fn default() -> Self {
        Self::none()
    }
}
