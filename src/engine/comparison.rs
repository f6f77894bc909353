// ==========================================
// 麻醉科排班引擎 - 模拟结果对比
// ==========================================
// 职责: 两个已完成结果的逐项指标差值 + 逐日覆盖率差值
// 红线: 只读计算, 不修改任何结果
// 红线: 两个结果的日期区间必须完全一致
// ==========================================

use crate::domain::simulation::{
    ComparisonReport, DailyCoverageDelta, MetricDelta, SimulationResult, SimulationStatistics,
};
use crate::domain::types::{RuleKindTag, SimulationStatus};
use crate::engine::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// 指标名 (对比报告中的 metric 字段)
pub mod metrics {
    pub const TOTAL_ASSIGNMENTS: &str = "totalAssignments";
    pub const TOTAL_VIOLATIONS: &str = "totalViolations";
    pub const ERROR_COUNT: &str = "errorCount";
    pub const WARNING_COUNT: &str = "warningCount";
    pub const INFO_COUNT: &str = "infoCount";
    pub const AFFECTED_USERS_COUNT: &str = "affectedUsersCount";
    pub const STAFF_COUNT: &str = "staffCount";
    pub const OVERALL_COVERAGE_RATE: &str = "overallCoverageRate";
    pub const EQUITY_SCORE: &str = "equityScore";
    pub const FATIGUE_ALERT_DAYS: &str = "fatigueAlertDays";
    pub const FATIGUE_CRITICAL_DAYS: &str = "fatigueCriticalDays";
}

fn comparable_statistics(result: &SimulationResult) -> EngineResult<&SimulationStatistics> {
    if !matches!(
        result.status,
        SimulationStatus::Completed | SimulationStatus::Applied
    ) {
        return Err(EngineError::ValidationInput(format!(
            "只能对比已完成的模拟结果: {} 当前状态为 {}",
            result.id, result.status
        )));
    }
    result.statistics.as_ref().ok_or_else(|| {
        EngineError::Internal(format!("已完成的模拟结果缺少统计数据: {}", result.id))
    })
}

/// 对比两个模拟结果
///
/// # 参数
/// - a: 基准结果
/// - b: 对照结果 (delta = b - a)
///
/// # 返回
/// - Err(ValidationInput): 任一结果未完成, 或日期区间不一致
pub fn compare(
    a: &SimulationResult,
    b: &SimulationResult,
    generated_at: DateTime<Utc>,
) -> EngineResult<ComparisonReport> {
    let stats_a = comparable_statistics(a)?;
    let stats_b = comparable_statistics(b)?;
    if a.date_range != b.date_range {
        return Err(EngineError::ValidationInput(format!(
            "日期区间不一致, 无法对比: {}~{} vs {}~{}",
            a.date_range.start_date,
            a.date_range.end_date,
            b.date_range.start_date,
            b.date_range.end_date
        )));
    }

    let count = |v: u64| v as f64;
    let mut deltas = vec![
        MetricDelta::new(
            metrics::TOTAL_ASSIGNMENTS,
            count(stats_a.total_assignments),
            count(stats_b.total_assignments),
        ),
        MetricDelta::new(
            metrics::TOTAL_VIOLATIONS,
            count(stats_a.total_violations),
            count(stats_b.total_violations),
        ),
        MetricDelta::new(
            metrics::ERROR_COUNT,
            count(stats_a.severity_counts.error),
            count(stats_b.severity_counts.error),
        ),
        MetricDelta::new(
            metrics::WARNING_COUNT,
            count(stats_a.severity_counts.warning),
            count(stats_b.severity_counts.warning),
        ),
        MetricDelta::new(
            metrics::INFO_COUNT,
            count(stats_a.severity_counts.info),
            count(stats_b.severity_counts.info),
        ),
        MetricDelta::new(
            metrics::AFFECTED_USERS_COUNT,
            count(stats_a.affected_users_count),
            count(stats_b.affected_users_count),
        ),
        MetricDelta::new(
            metrics::STAFF_COUNT,
            count(stats_a.staff_count),
            count(stats_b.staff_count),
        ),
        MetricDelta::new(
            metrics::OVERALL_COVERAGE_RATE,
            stats_a.overall_coverage_rate,
            stats_b.overall_coverage_rate,
        ),
        MetricDelta::new(metrics::EQUITY_SCORE, stats_a.equity_score, stats_b.equity_score),
        MetricDelta::new(
            metrics::FATIGUE_ALERT_DAYS,
            count(stats_a.fatigue_levels.alert),
            count(stats_b.fatigue_levels.alert),
        ),
        MetricDelta::new(
            metrics::FATIGUE_CRITICAL_DAYS,
            count(stats_a.fatigue_levels.critical),
            count(stats_b.fatigue_levels.critical),
        ),
    ];

    // 按规则种类的违规数 (任一侧出现过的种类)
    let mut kinds: BTreeMap<RuleKindTag, (u64, u64)> = BTreeMap::new();
    for (kind, n) in &stats_a.violations_by_kind {
        kinds.entry(*kind).or_default().0 = *n;
    }
    for (kind, n) in &stats_b.violations_by_kind {
        kinds.entry(*kind).or_default().1 = *n;
    }
    for (kind, (na, nb)) in kinds {
        deltas.push(MetricDelta::new(
            format!("violations.{}", kind),
            count(na),
            count(nb),
        ));
    }

    let rates_b: BTreeMap<_, _> = stats_b
        .daily_coverage
        .iter()
        .map(|c| (c.date, c.rate))
        .collect();
    let coverage_deltas = stats_a
        .daily_coverage
        .iter()
        .filter_map(|c| {
            rates_b.get(&c.date).map(|rate_b| DailyCoverageDelta {
                date: c.date,
                rate_a: c.rate,
                rate_b: *rate_b,
                delta: rate_b - c.rate,
            })
        })
        .collect();

    Ok(ComparisonReport {
        result_a_id: a.id.clone(),
        result_b_id: b.id.clone(),
        date_range: a.date_range,
        deltas,
        coverage_deltas,
        generated_at,
    })
}
