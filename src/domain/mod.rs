// ==========================================
// 麻醉科排班引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、规则与模拟结果
// 红线: 不含数据访问逻辑, 不含引擎逻辑
// ==========================================

pub mod assignment;
pub mod rule;
pub mod simulation;
pub mod supervision;
pub mod types;
pub mod violation;

// 重导出核心类型
pub use assignment::{CandidateAssignment, DateRange, LeaveRecord};
pub use rule::{
    CustomField, CustomOperator, CustomParams, FatigueThresholdParams, IncompatibilityParams,
    MaxConsecutiveParams, RestPeriodParams, Rule, RuleConfig, RuleKind, RuleOverride, RuleScope,
    SupervisionParams,
};
pub use simulation::{
    ApplyOptions, ApplyOutcome, ComparisonReport, CoverageTargets, DailyCoverage,
    DailyCoverageDelta, FatigueLevelCounts, MetricDelta, ScenarioOptions, ScenarioParameters,
    SimulationResult, SimulationScenario, SimulationStatistics, StaffFatigueSummary,
};
pub use supervision::{SupervisionConstraint, SupervisionConstraintSet, SupervisionException};
pub use types::{
    FatigueLevel, Period, RestKind, RuleKindTag, Severity, ShiftKind, SimulationStatus, StaffRole,
};
pub use violation::{SeverityCounts, Violation, ViolationReport};
