// ==========================================
// 麻醉科排班引擎 - 模拟结果应用管道
// ==========================================
// 职责: 将 COMPLETED 结果写入实际排班
// 流程: 状态检查 → 读取实时排班 → 合并 → 重新校验 → 单事务写入
// 红线: 重新校验基于当前实时排班, 不使用模拟时的快照
// 红线: 发现新冲突 ⇒ 整体中止, 零写入 (clear_existing 也不执行)
// 红线: 状态迁移 (APPLIED) 由调用方在写入成功后完成
// ==========================================

use crate::config::engine_config::FatigueConfig;
use crate::domain::assignment::{CandidateAssignment, LeaveRecord, ScheduleKey};
use crate::domain::simulation::{ApplyOptions, ApplyOutcome, ScenarioParameters, SimulationResult};
use crate::domain::types::{Severity, SimulationStatus};
use crate::domain::violation::Violation;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluation::{collect_violations, validate_input, EvaluationContext};
use crate::engine::fatigue::FatigueLedger;
use crate::engine::loader::{load_registry, load_supervision};
use crate::repository::planning_repo::{PlanningRepository, WriteBatch};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 待写入内容 + 写入后的排班全貌 (用于重新校验)
#[derive(Debug, Clone)]
pub struct PreparedApply {
    pub batch: WriteBatch,
    pub resulting_schedule: Vec<CandidateAssignment>,
}

/// 检查结果是否允许应用
pub fn ensure_applicable(result: &SimulationResult) -> EngineResult<()> {
    match result.status {
        SimulationStatus::Completed => Ok(()),
        SimulationStatus::Applied => Err(EngineError::AlreadyApplied {
            result_id: result.id.clone(),
        }),
        other => Err(EngineError::InvalidStateTransition {
            from: other.to_string(),
            to: SimulationStatus::Applied.to_string(),
        }),
    }
}

/// 根据应用选项拆分模拟产出, 并与实时排班合并
///
/// - include_on_call=false: 丢弃 GARDE / ASTREINTE
/// - include_leaves=false: 不写休息/休假记录
/// - clear_existing=false: 保留未被覆盖的实时排班 (同键视为更新)
pub fn prepare(
    result: &SimulationResult,
    options: &ApplyOptions,
    live: Vec<CandidateAssignment>,
) -> PreparedApply {
    let mut planned = Vec::new();
    let mut leaves = Vec::new();
    let mut planned_rest = Vec::new();
    for a in &result.generated_planning_data {
        if a.is_working() {
            if !options.include_on_call && a.shift_kind.is_on_call() {
                continue;
            }
            planned.push(a.clone());
        } else if options.include_leaves {
            if let Some(leave) = LeaveRecord::from_assignment(a, Some(result.scenario_id.clone())) {
                leaves.push(leave);
                planned_rest.push(a.clone());
            }
        }
    }

    let planned_keys: HashSet<ScheduleKey> = planned.iter().map(|a| a.schedule_key()).collect();
    let planned_ids: HashSet<&str> = planned
        .iter()
        .chain(planned_rest.iter())
        .map(|a| a.id.as_str())
        .collect();

    let mut resulting_schedule: Vec<CandidateAssignment> = if options.clear_existing {
        Vec::new()
    } else {
        live.into_iter()
            .filter(|a| !planned_keys.contains(&a.schedule_key()))
            .filter(|a| !planned_ids.contains(a.id.as_str()))
            .collect()
    };
    resulting_schedule.extend(planned.iter().cloned());
    resulting_schedule.extend(planned_rest);

    PreparedApply {
        batch: WriteBatch {
            range: result.date_range,
            clear_existing: options.clear_existing,
            assignments: planned,
            leaves,
            source_result_id: result.id.clone(),
        },
        resulting_schedule,
    }
}

/// 新冲突: 模拟时未出现过的 ERROR 级违规
pub fn fresh_conflicts(current: Vec<Violation>, known: &[Violation]) -> Vec<Violation> {
    let known_keys: HashSet<(String, Vec<String>)> = known.iter().map(|v| v.dedup_key()).collect();
    current
        .into_iter()
        .filter(|v| v.severity == Severity::Error)
        .filter(|v| !known_keys.contains(&v.dedup_key()))
        .collect()
}

// ==========================================
// ApplyPipeline
// ==========================================
pub struct ApplyPipeline {
    repository: Arc<dyn PlanningRepository>,
    fatigue_config: Arc<FatigueConfig>,
}

impl ApplyPipeline {
    pub fn new(repository: Arc<dyn PlanningRepository>, fatigue_config: Arc<FatigueConfig>) -> Self {
        Self {
            repository,
            fatigue_config,
        }
    }

    /// 应用模拟结果 (不修改结果状态)
    ///
    /// # 参数
    /// - result: 必须为 COMPLETED
    /// - params: 该结果所属场景的参数 (规则覆写 / 站点)
    ///
    /// # 返回
    /// - Ok(ApplyOutcome): 已写入
    /// - Err(StaleScheduleConflict): 新冲突清单, 零写入
    /// - Err(AlreadyApplied / InvalidStateTransition): 状态不允许
    #[instrument(skip(self, result, options, params), fields(result_id = %result.id))]
    pub async fn apply(
        &self,
        result: &SimulationResult,
        options: &ApplyOptions,
        params: &ScenarioParameters,
    ) -> EngineResult<ApplyOutcome> {
        ensure_applicable(result)?;

        let live = self
            .repository
            .load_live_schedule_snapshot(&result.date_range)
            .await?;
        let live_count = live.len();
        let prepared = prepare(result, options, live);
        validate_input(&prepared.resulting_schedule)?;

        let schedule = &prepared.resulting_schedule;
        let registry = load_registry(self.repository.as_ref(), schedule, params.site_id.as_deref())
            .await?
            .with_overrides(&params.rule_overrides, &params.included_rule_ids)?;
        let supervision = load_supervision(self.repository.as_ref(), schedule).await?;
        let ledger = FatigueLedger::from_assignments(
            Arc::clone(&self.fatigue_config),
            schedule.iter(),
        );
        let snapshot = ledger.snapshot();
        let ctx = EvaluationContext {
            registry: &registry,
            fatigue: &snapshot,
            supervision: &supervision,
        };
        let current = collect_violations(schedule, ctx);
        let conflicts = fresh_conflicts(current, &result.conflict_alerts);
        if !conflicts.is_empty() {
            warn!(
                conflicts = conflicts.len(),
                live_count,
                "实时排班存在新冲突, 应用中止"
            );
            return Err(EngineError::StaleScheduleConflict { conflicts });
        }

        let receipt = self.repository.write_assignments(prepared.batch).await?;
        info!(
            created = receipt.created,
            updated = receipt.updated,
            removed = receipt.removed,
            leaves = receipt.leaves_created,
            "模拟结果已写入实际排班"
        );
        Ok(ApplyOutcome {
            assignments_created: receipt.created,
            assignments_updated: receipt.updated,
            assignments_removed: receipt.removed,
            leaves_created: receipt.leaves_created,
            conflicts: Vec::new(),
            applied: true,
            message: options.notes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assignment::DateRange;
    use crate::domain::types::{RuleKindTag, ShiftKind, StaffRole};
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeSet;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn entry(id: &str, staff: &str, day: u32, kind: ShiftKind, room: Option<&str>) -> CandidateAssignment {
        CandidateAssignment {
            id: id.to_string(),
            staff_id: staff.to_string(),
            role: StaffRole::Mar,
            date: d(day),
            room_id: room.map(str::to_string),
            sector_id: None,
            site_id: None,
            shift_kind: kind,
            start: d(day).and_hms_opt(8, 0, 0).unwrap(),
            end: d(day).and_hms_opt(18, 0, 0).unwrap(),
        }
    }

    fn completed(data: Vec<CandidateAssignment>) -> SimulationResult {
        let mut result = SimulationResult::pending(
            "R1".to_string(),
            "S1".to_string(),
            DateRange::new(d(2), d(6)),
            Utc::now(),
        );
        result.status = SimulationStatus::Completed;
        result.generated_planning_data = data;
        result
    }

    #[test]
    fn test_prepare_filters_on_call_and_leaves() {
        let result = completed(vec![
            entry("A", "MAR1", 2, ShiftKind::Morning, Some("S1")),
            entry("G", "MAR1", 3, ShiftKind::Garde, None),
            entry("L", "MAR2", 3, ShiftKind::Leave, None),
        ]);
        let options = ApplyOptions {
            include_on_call: false,
            include_leaves: false,
            ..ApplyOptions::default()
        };
        let prepared = prepare(&result, &options, Vec::new());
        assert_eq!(prepared.batch.assignments.len(), 1);
        assert!(prepared.batch.leaves.is_empty());

        let prepared = prepare(&result, &ApplyOptions::default(), Vec::new());
        assert_eq!(prepared.batch.assignments.len(), 2);
        assert_eq!(prepared.batch.leaves.len(), 1);
        assert_eq!(prepared.resulting_schedule.len(), 3);
    }

    #[test]
    fn test_prepare_merges_live_schedule() {
        let result = completed(vec![entry("A", "MAR1", 2, ShiftKind::Morning, Some("S1"))]);
        let live = vec![
            entry("LIVE_A", "MAR1", 2, ShiftKind::Morning, Some("S1")),
            entry("LIVE_B", "MAR2", 2, ShiftKind::Morning, Some("S2")),
        ];
        let prepared = prepare(&result, &ApplyOptions::default(), live.clone());
        let ids: BTreeSet<&str> = prepared
            .resulting_schedule
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, BTreeSet::from(["A", "LIVE_B"]));

        let clear = ApplyOptions {
            clear_existing: true,
            ..ApplyOptions::default()
        };
        let prepared = prepare(&result, &clear, live);
        assert_eq!(prepared.resulting_schedule.len(), 1);
    }

    #[test]
    fn test_fresh_conflicts_ignore_known_and_soft() {
        let known = Violation::new("SUP", RuleKindTag::SupervisionCapacity, Severity::Error, vec!["C".to_string()], "x");
        let fresh = Violation::new("SUP", RuleKindTag::SupervisionCapacity, Severity::Error, vec!["D".to_string()], "y");
        let soft = Violation::new("MAX", RuleKindTag::MaxConsecutive, Severity::Warning, vec!["E".to_string()], "z");
        let conflicts = fresh_conflicts(vec![known.clone(), fresh.clone(), soft], &[known]);
        assert_eq!(conflicts, vec![fresh]);
    }

    #[test]
    fn test_ensure_applicable() {
        let mut result = completed(Vec::new());
        assert!(ensure_applicable(&result).is_ok());
        result.status = SimulationStatus::Applied;
        assert!(matches!(
            ensure_applicable(&result),
            Err(EngineError::AlreadyApplied { .. })
        ));
        result.status = SimulationStatus::Failed;
        assert!(matches!(
            ensure_applicable(&result),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }
}
