// ==========================================
// 麻醉科排班引擎 - 内存仓储实现
// ==========================================
// 职责: 单进程内的 PlanningRepository 实现 (测试与嵌入式场景)
// 红线: write_assignments 先在副本上暂存, 全部成功后整体替换
// ==========================================

use crate::domain::assignment::{CandidateAssignment, DateRange, LeaveRecord};
use crate::domain::rule::{RuleConfig, RuleScope};
use crate::domain::supervision::SupervisionConstraint;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::planning_repo::{PlanningRepository, WriteBatch, WriteReceipt};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    candidates: Vec<CandidateAssignment>,
    live: Vec<CandidateAssignment>,
    leaves: Vec<LeaveRecord>,
    rules: Vec<RuleConfig>,
    supervision: BTreeMap<String, SupervisionConstraint>,
}

// ==========================================
// InMemoryPlanningRepository
// ==========================================
#[derive(Debug, Default)]
pub struct InMemoryPlanningRepository {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    write_calls: AtomicU64,
}

impl InMemoryPlanningRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 数据准备 =====

    pub fn add_candidate_assignments(
        &self,
        assignments: impl IntoIterator<Item = CandidateAssignment>,
    ) -> RepositoryResult<()> {
        self.lock()?.candidates.extend(assignments);
        Ok(())
    }

    pub fn add_live_assignments(
        &self,
        assignments: impl IntoIterator<Item = CandidateAssignment>,
    ) -> RepositoryResult<()> {
        self.lock()?.live.extend(assignments);
        Ok(())
    }

    pub fn add_rule_config(&self, config: RuleConfig) -> RepositoryResult<()> {
        self.lock()?.rules.push(config);
        Ok(())
    }

    pub fn add_supervision_constraint(
        &self,
        constraint: SupervisionConstraint,
    ) -> RepositoryResult<()> {
        self.lock()?
            .supervision
            .insert(constraint.sector_id.clone(), constraint);
        Ok(())
    }

    // ===== 查询 (测试断言用) =====

    pub fn live_assignments(&self) -> RepositoryResult<Vec<CandidateAssignment>> {
        Ok(self.lock()?.live.clone())
    }

    pub fn leaves(&self) -> RepositoryResult<Vec<LeaveRecord>> {
        Ok(self.lock()?.leaves.clone())
    }

    /// 故障注入: 打开后 write_assignments 在暂存完成后失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// write_assignments 被调用的次数 (含失败)
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }
}

/// 在暂存副本上执行一次批量写入
fn stage_batch(staged: &mut MemoryState, batch: &WriteBatch) -> RepositoryResult<WriteReceipt> {
    let mut receipt = WriteReceipt::default();

    let mut batch_keys = HashSet::new();
    for assignment in &batch.assignments {
        if !batch_keys.insert(assignment.schedule_key()) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "批次内排班键重复: staff={}, date={}, shift={}",
                assignment.staff_id, assignment.date, assignment.shift_kind
            )));
        }
    }

    if batch.clear_existing {
        let before = staged.live.len();
        staged.live.retain(|live| {
            !batch.range.contains(live.date) || batch_keys.contains(&live.schedule_key())
        });
        receipt.removed = (before - staged.live.len()) as u64;
    }

    for assignment in &batch.assignments {
        let key = assignment.schedule_key();
        match staged.live.iter_mut().find(|live| live.schedule_key() == key) {
            Some(existing) => {
                *existing = assignment.clone();
                receipt.updated += 1;
            }
            None => {
                staged.live.push(assignment.clone());
                receipt.created += 1;
            }
        }
    }

    for leave in &batch.leaves {
        staged
            .leaves
            .retain(|l| !(l.staff_id == leave.staff_id && l.date == leave.date));
        staged.leaves.push(leave.clone());
        receipt.leaves_created += 1;
    }

    Ok(receipt)
}

fn sorted_in_range(source: &[CandidateAssignment], range: &DateRange) -> Vec<CandidateAssignment> {
    let mut out: Vec<CandidateAssignment> = source
        .iter()
        .filter(|a| range.contains(a.date))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.staff_id.cmp(&b.staff_id))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

#[async_trait]
impl PlanningRepository for InMemoryPlanningRepository {
    async fn load_candidate_assignments(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>> {
        Ok(sorted_in_range(&self.lock()?.candidates, range))
    }

    async fn load_rules(&self, scope: &RuleScope) -> RepositoryResult<Vec<RuleConfig>> {
        Ok(self
            .lock()?
            .rules
            .iter()
            .filter(|r| &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn load_supervision_constraints(
        &self,
        sector_id: &str,
    ) -> RepositoryResult<Option<SupervisionConstraint>> {
        Ok(self.lock()?.supervision.get(sector_id).cloned())
    }

    async fn write_assignments(&self, batch: WriteBatch) -> RepositoryResult<WriteReceipt> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock()?;
        let mut staged = state.clone();
        let receipt = stage_batch(&mut staged, &batch)?;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseTransactionError(format!(
                "注入的写入失败: result_id={}",
                batch.source_result_id
            )));
        }

        *state = staged;
        Ok(receipt)
    }

    async fn load_live_schedule_snapshot(
        &self,
        range: &DateRange,
    ) -> RepositoryResult<Vec<CandidateAssignment>> {
        Ok(sorted_in_range(&self.lock()?.live, range))
    }
}
