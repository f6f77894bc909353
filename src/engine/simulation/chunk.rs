// ==========================================
// 麻醉科排班引擎 - 模拟分块
// ==========================================
// 职责: 分块规划 / 单分块执行 / 分块统计的加性合并
// 红线: 分块之间无共享可变状态; 上下文从场景起始日开始, 只保留锚定在本分块的违规
// 红线: 合并只使用加性/结合的组合子 (求和 / 并集 / 取最大 / 按日期拼接)
// ==========================================

use crate::config::engine_config::FatigueConfig;
use crate::domain::assignment::{CandidateAssignment, DateRange};
use crate::domain::simulation::{
    CoverageTargets, DailyCoverage, FatigueLevelCounts, ScenarioParameters,
    SimulationStatistics, StaffFatigueSummary,
};
use crate::domain::supervision::SupervisionConstraintSet;
use crate::domain::types::{RuleKindTag, ShiftKind};
use crate::domain::violation::{SeverityCounts, Violation};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluation::{collect_violations, validate_input, EvaluationContext};
use crate::engine::fatigue::{equity_score, FatigueLedger};
use crate::engine::projection::AssignmentProjector;
use crate::engine::registry::RuleRegistry;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// 单个分块任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTask {
    pub index: usize,
    /// 本分块负责的日期
    pub range: DateRange,
    /// 评估上下文 (场景起始日 ~ 本分块结束日)
    pub context: DateRange,
}

/// 分块规划: 区间天数超过阈值时按 chunk_days 切分, 否则单分块
pub fn plan_chunks(range: &DateRange, chunk_days: u32, threshold_days: u32) -> Vec<ChunkTask> {
    let pieces = if range.num_days() > i64::from(threshold_days) {
        range.split(chunk_days)
    } else {
        vec![*range]
    };
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| ChunkTask {
            index,
            range: piece,
            context: DateRange::new(range.start_date, piece.end_date),
        })
        .collect()
}

/// 全部分块共享的只读输入
pub struct ChunkJob {
    pub params: Arc<ScenarioParameters>,
    pub registry: Arc<RuleRegistry>,
    pub supervision: Arc<SupervisionConstraintSet>,
    pub fatigue_config: Arc<FatigueConfig>,
    pub coverage: CoverageTargets,
    pub projector: Arc<dyn AssignmentProjector>,
}

/// 单分块输出
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub task: ChunkTask,
    /// 锚定在本分块内的违规
    pub violations: Vec<Violation>,
    /// 落在本分块内的候选排班
    pub assignments: Vec<CandidateAssignment>,
    pub statistics: ChunkStatistics,
}

// ==========================================
// ChunkStatistics - 分块局部统计 (可结合合并)
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStatistics {
    pub total_assignments: u64,
    pub severity_counts: SeverityCounts,
    pub violations_by_kind: BTreeMap<RuleKindTag, u64>,
    pub affected_staff: BTreeSet<String>,
    pub staff_ids: BTreeSet<String>,
    pub daily_coverage: Vec<DailyCoverage>,
    pub coverage_numerator: u64,
    pub coverage_denominator: u64,
    pub fatigue_levels: FatigueLevelCounts,
    pub staff_fatigue: BTreeMap<String, StaffFatigueSummary>,
    pub shift_distribution: BTreeMap<String, BTreeMap<ShiftKind, u64>>,
}

impl ChunkStatistics {
    /// 合并另一分块的统计 (满足结合律与交换律)
    pub fn merge(&mut self, other: &ChunkStatistics) {
        self.total_assignments += other.total_assignments;
        self.severity_counts.merge(&other.severity_counts);
        for (kind, count) in &other.violations_by_kind {
            *self.violations_by_kind.entry(*kind).or_insert(0) += count;
        }
        self.affected_staff.extend(other.affected_staff.iter().cloned());
        self.staff_ids.extend(other.staff_ids.iter().cloned());
        self.daily_coverage.extend(other.daily_coverage.iter().cloned());
        self.daily_coverage.sort_by_key(|c| c.date);
        self.coverage_numerator += other.coverage_numerator;
        self.coverage_denominator += other.coverage_denominator;
        self.fatigue_levels.merge(&other.fatigue_levels);
        for (staff_id, summary) in &other.staff_fatigue {
            match self.staff_fatigue.get_mut(staff_id) {
                Some(existing) => existing.merge(summary),
                None => {
                    self.staff_fatigue.insert(staff_id.clone(), summary.clone());
                }
            }
        }
        for (staff_id, kinds) in &other.shift_distribution {
            let entry = self.shift_distribution.entry(staff_id.clone()).or_default();
            for (kind, count) in kinds {
                *entry.entry(*kind).or_insert(0) += count;
            }
        }
    }

    /// 生成最终统计 (比率与公平性评分只在此处计算一次)
    pub fn finalize(self, fatigue_config: &FatigueConfig) -> SimulationStatistics {
        let overall_coverage_rate = if self.coverage_denominator == 0 {
            1.0
        } else {
            self.coverage_numerator as f64 / self.coverage_denominator as f64
        };
        let final_balances: Vec<f64> = self
            .staff_fatigue
            .values()
            .map(|s| s.final_balance)
            .collect();
        let max_balance = self
            .staff_fatigue
            .values()
            .map(|s| s.peak_balance)
            .fold(0.0_f64, f64::max);

        SimulationStatistics {
            total_assignments: self.total_assignments,
            total_violations: self.severity_counts.total(),
            severity_counts: self.severity_counts,
            violations_by_kind: self.violations_by_kind,
            affected_users_count: self.affected_staff.len() as u64,
            staff_count: self.staff_ids.len() as u64,
            daily_coverage: self.daily_coverage,
            coverage_numerator: self.coverage_numerator,
            coverage_denominator: self.coverage_denominator,
            overall_coverage_rate,
            fatigue_levels: self.fatigue_levels,
            equity_score: equity_score(fatigue_config, &final_balances, max_balance),
            staff_fatigue: self.staff_fatigue,
            shift_distribution: self.shift_distribution,
        }
    }
}

fn chunk_error(task: &ChunkTask, message: impl Into<String>) -> EngineError {
    EngineError::ChunkExecution {
        chunk_index: task.index,
        message: message.into(),
    }
}

/// 执行单个分块 (在工作线程中同步运行)
///
/// # 流程
/// 1. 投影上下文区间的候选排班并校验
/// 2. 基于上下文重建疲劳账本
/// 3. 评估全部规则, 保留锚定在本分块的违规
/// 4. 计算本分块各日的覆盖率 / 疲劳 / 班次分布
pub fn run_chunk(job: &ChunkJob, task: &ChunkTask) -> EngineResult<ChunkOutput> {
    let context_assignments = job
        .projector
        .project(&job.params, &task.context)
        .map_err(|e| chunk_error(task, format!("投影失败: {}", e)))?;
    validate_input(&context_assignments).map_err(|e| chunk_error(task, e.to_string()))?;

    let ledger = FatigueLedger::from_assignments(
        Arc::clone(&job.fatigue_config),
        context_assignments.iter(),
    );
    let snapshot = ledger.snapshot();
    let ctx = EvaluationContext {
        registry: &job.registry,
        fatigue: &snapshot,
        supervision: &job.supervision,
    };
    let all_violations = collect_violations(&context_assignments, ctx);

    let by_id: HashMap<&str, &CandidateAssignment> = context_assignments
        .iter()
        .map(|a| (a.id.as_str(), a))
        .collect();
    let anchor = |v: &Violation| -> Option<NaiveDate> {
        v.affected_assignment_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|a| a.date))
            .max()
    };
    let violations: Vec<Violation> = all_violations
        .into_iter()
        .filter(|v| anchor(v).map_or(false, |date| task.range.contains(date)))
        .collect();

    let mut stats = ChunkStatistics::default();
    for v in &violations {
        stats.severity_counts.record(v.severity);
        *stats.violations_by_kind.entry(v.rule_kind).or_insert(0) += 1;
        for id in &v.affected_assignment_ids {
            if let Some(a) = by_id.get(id.as_str()) {
                stats.affected_staff.insert(a.staff_id.clone());
            }
        }
    }

    let assignments: Vec<CandidateAssignment> = context_assignments
        .iter()
        .filter(|a| task.range.contains(a.date))
        .cloned()
        .collect();

    let mut working_by_day: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    let mut active_days: BTreeSet<(&str, NaiveDate)> = BTreeSet::new();
    for a in &assignments {
        stats.total_assignments += 1;
        stats.staff_ids.insert(a.staff_id.clone());
        *stats
            .shift_distribution
            .entry(a.staff_id.clone())
            .or_default()
            .entry(a.shift_kind)
            .or_insert(0) += 1;
        active_days.insert((a.staff_id.as_str(), a.date));
        if a.is_working() {
            working_by_day
                .entry(a.date)
                .or_default()
                .insert(a.staff_id.as_str());
        }
    }

    for date in task.range.days() {
        let working = working_by_day.get(&date).map_or(0, |s| s.len());
        let required = job.coverage.required_on(date);
        let coverage = DailyCoverage::new(date, u32::try_from(working).unwrap_or(u32::MAX), required);
        stats.coverage_numerator += u64::from(coverage.staffed);
        stats.coverage_denominator += u64::from(coverage.required);
        stats.daily_coverage.push(coverage);
    }

    for (staff_id, date) in &active_days {
        let balance = snapshot.balance_at(staff_id, *date);
        stats.fatigue_levels.record(snapshot.classify(balance));
    }

    for staff_id in &stats.staff_ids {
        let mut summary: Option<StaffFatigueSummary> = None;
        for state in snapshot
            .states_for(staff_id)
            .filter(|s| task.range.contains(s.date))
        {
            let current = summary.get_or_insert(StaffFatigueSummary {
                peak_balance: state.running_balance,
                final_balance: state.running_balance,
                final_date: state.date,
            });
            current.peak_balance = current.peak_balance.max(state.running_balance);
            current.final_balance = state.running_balance;
            current.final_date = state.date;
        }
        if let Some(summary) = summary {
            stats.staff_fatigue.insert(staff_id.clone(), summary);
        }
    }

    Ok(ChunkOutput {
        task: *task,
        violations,
        assignments,
        statistics: stats,
    })
}
