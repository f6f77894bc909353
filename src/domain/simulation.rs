// ==========================================
// 麻醉科排班引擎 - 模拟场景与模拟结果
// ==========================================
// 职责: 场景参数 / 模拟结果 / 统计 / 对比报告 / 应用选项与结果
// 红线: 统计只依赖场景日期区间 + 规则配置 + 外部数据, 场景间互不影响
// 红线: APPLIED 结果只写一次
// ==========================================

use crate::domain::assignment::{CandidateAssignment, DateRange};
use crate::domain::rule::RuleOverride;
use crate::domain::types::{FatigueLevel, RuleKindTag, ShiftKind, SimulationStatus};
use crate::domain::violation::{SeverityCounts, Violation};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// CoverageTargets - 每日人员覆盖目标
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoverageTargets {
    #[serde(default = "default_weekday_slots")]
    pub weekday_slots: u32,
    #[serde(default = "default_weekend_slots")]
    pub weekend_slots: u32,
}

fn default_weekday_slots() -> u32 {
    6
}

fn default_weekend_slots() -> u32 {
    2
}

impl Default for CoverageTargets {
    fn default() -> Self {
        Self {
            weekday_slots: default_weekday_slots(),
            weekend_slots: default_weekend_slots(),
        }
    }
}

impl CoverageTargets {
    /// 指定日期所需的在岗人数
    pub fn required_on(&self, date: NaiveDate) -> u32 {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => self.weekend_slots,
            _ => self.weekday_slots,
        }
    }
}

// ==========================================
// ScenarioParameters - 场景参数 (parametersJson)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioParameters {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub rule_overrides: Vec<RuleOverride>,
    /// 仅运行这些规则 (空 = 全部启用规则)
    #[serde(default)]
    pub included_rule_ids: Vec<String>,
    #[serde(default)]
    pub excluded_staff_ids: Vec<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub coverage_targets: Option<CoverageTargets>,
    #[serde(default)]
    pub options: ScenarioOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioOptions {
    /// 场景级分块天数 (覆盖全局配置)
    #[serde(default)]
    pub chunk_days: Option<u32>,
}

impl ScenarioParameters {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            rule_overrides: Vec::new(),
            included_rule_ids: Vec::new(),
            excluded_staff_ids: Vec::new(),
            site_id: None,
            coverage_targets: None,
            options: ScenarioOptions::default(),
        }
    }

    /// 从 JSON 文本解析 (拒绝未知字段)
    pub fn from_json(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("场景参数格式错误: {}", e))
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// 与日期区间无关的结构校验
    pub fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.options.chunk_days {
            return Err("options.chunkDays 必须大于 0".to_string());
        }
        for o in &self.rule_overrides {
            if o.rule_id.trim().is_empty() {
                return Err("ruleOverrides 包含空规则ID".to_string());
            }
        }
        Ok(())
    }
}

// ==========================================
// SimulationScenario - 模拟场景
// ==========================================
// 创建后不可变 (描述等软元数据除外)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationScenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "parametersJson")]
    pub parameters: ScenarioParameters,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// 统计 (可由分块结果加性合并得到)
// ==========================================

/// 单日覆盖率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCoverage {
    pub date: NaiveDate,
    /// 当日在岗的不同人员数 (封顶于需求数)
    pub staffed: u32,
    pub required: u32,
    pub rate: f64,
}

impl DailyCoverage {
    pub fn new(date: NaiveDate, working_staff: u32, required: u32) -> Self {
        let staffed = working_staff.min(required);
        let rate = if required == 0 {
            1.0
        } else {
            f64::from(staffed) / f64::from(required)
        };
        Self {
            date,
            staffed,
            required,
            rate,
        }
    }
}

/// 按疲劳等级统计的 "人·日" 数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatigueLevelCounts {
    pub normal: u64,
    pub alert: u64,
    pub critical: u64,
}

impl FatigueLevelCounts {
    pub fn record(&mut self, level: FatigueLevel) {
        match level {
            FatigueLevel::Normal => self.normal += 1,
            FatigueLevel::Alert => self.alert += 1,
            FatigueLevel::Critical => self.critical += 1,
        }
    }

    pub fn merge(&mut self, other: &FatigueLevelCounts) {
        self.normal += other.normal;
        self.alert += other.alert;
        self.critical += other.critical;
    }
}

/// 单人疲劳摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffFatigueSummary {
    pub peak_balance: f64,
    pub final_balance: f64,
    pub final_date: NaiveDate,
}

impl StaffFatigueSummary {
    /// 合并: 峰值取最大, 期末余额取日期较晚的一方
    pub fn merge(&mut self, other: &StaffFatigueSummary) {
        if other.peak_balance > self.peak_balance {
            self.peak_balance = other.peak_balance;
        }
        if other.final_date > self.final_date {
            self.final_balance = other.final_balance;
            self.final_date = other.final_date;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatistics {
    pub total_assignments: u64,
    pub total_violations: u64,
    pub severity_counts: SeverityCounts,
    pub violations_by_kind: BTreeMap<RuleKindTag, u64>,
    pub affected_users_count: u64,
    pub staff_count: u64,
    pub daily_coverage: Vec<DailyCoverage>,
    pub coverage_numerator: u64,
    pub coverage_denominator: u64,
    pub overall_coverage_rate: f64,
    pub fatigue_levels: FatigueLevelCounts,
    pub staff_fatigue: BTreeMap<String, StaffFatigueSummary>,
    /// 人员 → 班次类型 → 次数
    pub shift_distribution: BTreeMap<String, BTreeMap<ShiftKind, u64>>,
    pub equity_score: f64,
}

// ==========================================
// SimulationResult - 模拟结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub id: String,
    pub scenario_id: String,
    pub status: SimulationStatus,
    pub date_range: DateRange,
    #[serde(default)]
    pub statistics: Option<SimulationStatistics>,
    #[serde(default)]
    pub conflict_alerts: Vec<Violation>,
    #[serde(default)]
    pub generated_planning_data: Vec<CandidateAssignment>,
    #[serde(default)]
    pub comparison_data: Option<ComparisonReport>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub applied_by: Option<String>,
    #[serde(default)]
    pub apply_notes: Option<String>,
}

impl SimulationResult {
    /// 新建 PENDING 结果
    pub fn pending(
        id: String,
        scenario_id: String,
        date_range: DateRange,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            scenario_id,
            status: SimulationStatus::Pending,
            date_range,
            statistics: None,
            conflict_alerts: Vec::new(),
            generated_planning_data: Vec::new(),
            comparison_data: None,
            error_message: None,
            execution_time_ms: None,
            created_at,
            completed_at: None,
            applied_at: None,
            applied_by: None,
            apply_notes: None,
        }
    }

    /// 状态迁移 (非法迁移返回 Err(当前状态))
    pub fn transition(&mut self, next: SimulationStatus) -> Result<(), SimulationStatus> {
        if !self.status.can_transition_to(next) {
            return Err(self.status);
        }
        self.status = next;
        Ok(())
    }
}

// ==========================================
// ComparisonReport - 两个结果的对比
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub metric: String,
    pub value_a: f64,
    pub value_b: f64,
    /// value_b - value_a
    pub delta: f64,
}

impl MetricDelta {
    pub fn new(metric: impl Into<String>, value_a: f64, value_b: f64) -> Self {
        Self {
            metric: metric.into(),
            value_a,
            value_b,
            delta: value_b - value_a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCoverageDelta {
    pub date: NaiveDate,
    pub rate_a: f64,
    pub rate_b: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub result_a_id: String,
    pub result_b_id: String,
    pub date_range: DateRange,
    pub deltas: Vec<MetricDelta>,
    pub coverage_deltas: Vec<DailyCoverageDelta>,
    pub generated_at: DateTime<Utc>,
}

impl ComparisonReport {
    pub fn delta(&self, metric: &str) -> Option<&MetricDelta> {
        self.deltas.iter().find(|d| d.metric == metric)
    }
}

// ==========================================
// ApplyOptions / ApplyOutcome - 应用到实际排班
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplyOptions {
    #[serde(default)]
    pub clear_existing: bool,
    #[serde(default = "default_true")]
    pub include_leaves: bool,
    #[serde(default = "default_true")]
    pub include_on_call: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub applied_by: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            clear_existing: false,
            include_leaves: true,
            include_on_call: true,
            notes: None,
            applied_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub assignments_created: u64,
    pub assignments_updated: u64,
    pub assignments_removed: u64,
    pub leaves_created: u64,
    pub conflicts: Vec<Violation>,
    pub applied: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApplyOutcome {
    /// 因实时排班冲突被拒绝 (零写入)
    pub fn rejected(conflicts: Vec<Violation>, message: impl Into<String>) -> Self {
        Self {
            assignments_created: 0,
            assignments_updated: 0,
            assignments_removed: 0,
            leaves_created: 0,
            conflicts,
            applied: false,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parameters_from_json() {
        let params = ScenarioParameters::from_json(
            r#"{"startDate":"2025-06-01","endDate":"2025-06-14",
                "ruleOverrides":[{"ruleId":"SUP","parameters":{"maxRoomsPerSupervisor":3}}],
                "excludedStaffIds":["S9"],"options":{"chunkDays":7}}"#,
        )
        .unwrap();
        assert_eq!(params.date_range().num_days(), 14);
        assert_eq!(params.rule_overrides.len(), 1);
        assert_eq!(params.options.chunk_days, Some(7));

        let err = ScenarioParameters::from_json(
            r#"{"startDate":"2025-06-01","endDate":"2025-06-14","seed":42}"#,
        )
        .unwrap_err();
        assert!(err.contains("场景参数格式错误"));
    }

    #[test]
    fn test_daily_coverage_caps_and_zero_requirement() {
        let c = DailyCoverage::new(d(2025, 6, 2), 9, 6);
        assert_eq!(c.staffed, 6);
        assert_eq!(c.rate, 1.0);
        let weekend = DailyCoverage::new(d(2025, 6, 1), 0, 0);
        assert_eq!(weekend.rate, 1.0);
        let partial = DailyCoverage::new(d(2025, 6, 3), 3, 6);
        assert_eq!(partial.rate, 0.5);
    }

    #[test]
    fn test_coverage_targets_weekend() {
        let targets = CoverageTargets::default();
        // 2025-06-01 为周日
        assert_eq!(targets.required_on(d(2025, 6, 1)), 2);
        assert_eq!(targets.required_on(d(2025, 6, 2)), 6);
    }

    #[test]
    fn test_fatigue_summary_merge_is_order_independent() {
        let early = StaffFatigueSummary {
            peak_balance: 60.0,
            final_balance: 40.0,
            final_date: d(2025, 6, 7),
        };
        let late = StaffFatigueSummary {
            peak_balance: 45.0,
            final_balance: 45.0,
            final_date: d(2025, 6, 14),
        };
        let mut a = early.clone();
        a.merge(&late);
        let mut b = late.clone();
        b.merge(&early);
        assert_eq!(a, b);
        assert_eq!(a.peak_balance, 60.0);
        assert_eq!(a.final_balance, 45.0);
    }

    #[test]
    fn test_result_transitions() {
        let mut r = SimulationResult::pending(
            "R1".to_string(),
            "SC1".to_string(),
            DateRange::new(d(2025, 6, 1), d(2025, 6, 14)),
            Utc::now(),
        );
        assert!(r.transition(SimulationStatus::Running).is_ok());
        assert!(r.transition(SimulationStatus::Applied).is_err());
        assert!(r.transition(SimulationStatus::Completed).is_ok());
        assert!(r.transition(SimulationStatus::Applied).is_ok());
        assert_eq!(r.transition(SimulationStatus::Applied), Err(SimulationStatus::Applied));
    }
}
