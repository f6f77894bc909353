// ==========================================
// 麻醉科排班引擎 - 候选排班投影
// ==========================================
// 职责: 为一个模拟分块生成候选排班集合
// 说明: 投影算法由外部注入 (AssignmentProjector), 引擎内置快照投影
// 红线: 相同场景 + 相同上下文区间 ⇒ 相同输出 (禁止随机)
// ==========================================

use crate::domain::assignment::{CandidateAssignment, DateRange};
use crate::domain::simulation::ScenarioParameters;
use crate::engine::error::EngineResult;
use std::collections::HashSet;
use std::sync::Arc;

/// 候选排班投影 trait
///
/// 在工作线程中同步调用, 实现方必须线程安全且确定
pub trait AssignmentProjector: Send + Sync {
    /// 生成 context 区间内的候选排班
    ///
    /// # 参数
    /// - params: 场景参数 (站点 / 排除人员等过滤条件)
    /// - context: 上下文区间 (场景起始日 ~ 分块结束日)
    fn project(
        &self,
        params: &ScenarioParameters,
        context: &DateRange,
    ) -> EngineResult<Vec<CandidateAssignment>>;
}

// ==========================================
// SnapshotProjector - 基于候选排班快照的投影
// ==========================================
// 快照由运行器在分派前从仓储一次性加载, 各分块只读共享
#[derive(Debug, Clone)]
pub struct SnapshotProjector {
    source: Arc<Vec<CandidateAssignment>>,
}

impl SnapshotProjector {
    pub fn new(source: Vec<CandidateAssignment>) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

impl AssignmentProjector for SnapshotProjector {
    fn project(
        &self,
        params: &ScenarioParameters,
        context: &DateRange,
    ) -> EngineResult<Vec<CandidateAssignment>> {
        let excluded: HashSet<&str> = params.excluded_staff_ids.iter().map(String::as_str).collect();
        let mut projected: Vec<CandidateAssignment> = self
            .source
            .iter()
            .filter(|a| context.contains(a.date))
            .filter(|a| !excluded.contains(a.staff_id.as_str()))
            // 未标注站点的条目视为跨站点, 始终保留
            .filter(|a| match (&params.site_id, &a.site_id) {
                (Some(site), Some(own)) => site == own,
                _ => true,
            })
            .cloned()
            .collect();
        projected.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.staff_id.cmp(&b.staff_id))
                .then_with(|| a.start.cmp(&b.start))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(projected)
    }
}
