// ==========================================
// 麻醉科排班引擎 - 排班仓储 Trait
// ==========================================
// 职责: 定义引擎所需的数据访问接口 (不包含业务逻辑)
// 红线: Repository 不含业务规则, 只做数据读写
// 红线: write_assignments 必须整体成功或整体失败
// ==========================================

use crate::domain::assignment::{CandidateAssignment, DateRange, LeaveRecord};
use crate::domain::rule::{RuleConfig, RuleScope};
use crate::domain::supervision::SupervisionConstraint;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ==========================================
// WriteBatch - 一次应用的全部写入
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    /// 目标日期区间 (clear_existing 的作用范围)
    pub range: DateRange,
    /// 为 true 时, 区间内未被本批覆盖的实际排班被删除
    pub clear_existing: bool,
    /// 工作班次 (按 人员+日期+班次 upsert)
    pub assignments: Vec<CandidateAssignment>,
    pub leaves: Vec<LeaveRecord>,
    /// 来源模拟结果 (审计用)
    pub source_result_id: String,
}

/// 写入回执
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
    pub leaves_created: u64,
}

// ==========================================
// PlanningRepository Trait
// ==========================================
// 实现者: InMemoryPlanningRepository / SqlitePlanningRepository
#[async_trait]
pub trait PlanningRepository: Send + Sync {
    /// 读取区间内的候选排班 (模拟输入)
    async fn load_candidate_assignments(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>>;

    /// 读取指定作用范围的规则配置
    async fn load_rules(&self, scope: &RuleScope) -> RepositoryResult<Vec<RuleConfig>>;

    /// 读取扇区督导约束 (未配置返回 None)
    async fn load_supervision_constraints(
        &self,
        sector_id: &str,
    ) -> RepositoryResult<Option<SupervisionConstraint>>;

    /// 事务化写入
    ///
    /// # 返回
    /// - Ok(WriteReceipt): 全部写入成功
    /// - Err: 任何一步失败, 无任何写入生效
    async fn write_assignments(&self, batch: WriteBatch) -> RepositoryResult<WriteReceipt>;

    /// 读取当前实际排班快照 (应用前重新校验)
    async fn load_live_schedule_snapshot(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>>;
}
