// ==========================================
// 麻醉科排班引擎 - 违规与评估报告
// ==========================================
// 红线: 每条违规必须引用已存在的规则ID, 且至少引用一个排班条目
// 红线: 违规由每次评估新生成, 引擎自身不持久化
// ==========================================

use crate::domain::types::{RuleKindTag, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ==========================================
// Violation - 单条违规
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule_id: String,
    pub rule_kind: RuleKindTag,
    pub severity: Severity,
    /// 受影响的排班条目ID (构造时排序去重)
    pub affected_assignment_ids: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn new(
        rule_id: impl Into<String>,
        rule_kind: RuleKindTag,
        severity: Severity,
        affected: impl IntoIterator<Item = String>,
        message: impl Into<String>,
    ) -> Self {
        let mut ids: Vec<String> = affected.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self {
            rule_id: rule_id.into(),
            rule_kind,
            severity,
            affected_assignment_ids: ids,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// 去重键: (规则ID, 受影响条目集合)
    pub fn dedup_key(&self) -> (String, Vec<String>) {
        (self.rule_id.clone(), self.affected_assignment_ids.clone())
    }

    /// 归一化排序: 规则ID → 受影响条目 → 严重度(高在前) → 消息
    pub fn normalized_cmp(&self, other: &Self) -> Ordering {
        self.rule_id
            .cmp(&other.rule_id)
            .then_with(|| self.affected_assignment_ids.cmp(&other.affected_assignment_ids))
            .then_with(|| other.severity.cmp(&self.severity))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// 按归一化顺序排序
pub fn sort_normalized(violations: &mut [Violation]) {
    violations.sort_by(|a, b| a.normalized_cmp(b));
}

// ==========================================
// SeverityCounts - 按严重度计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCounts {
    pub error: u64,
    pub warning: u64,
    pub info: u64,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.error + self.warning + self.info
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.error += other.error;
        self.warning += other.warning;
        self.info += other.info;
    }
}

// ==========================================
// ViolationReport - 评估报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    pub violations: Vec<Violation>,
    pub evaluated_at: DateTime<Utc>,
    /// 当且仅当没有 ERROR 级违规时为 true
    pub is_valid: bool,
}

impl ViolationReport {
    pub fn new(mut violations: Vec<Violation>, evaluated_at: DateTime<Utc>) -> Self {
        sort_normalized(&mut violations);
        let is_valid = !violations.iter().any(|v| v.severity == Severity::Error);
        Self {
            violations,
            evaluated_at,
            is_valid,
        }
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for v in &self.violations {
            counts.record(v.severity);
        }
        counts
    }

    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_ids_sorted_and_unique() {
        let v = Violation::new(
            "R1",
            RuleKindTag::RestPeriod,
            Severity::Error,
            vec!["B".to_string(), "A".to_string(), "B".to_string()],
            "休息不足",
        );
        assert_eq!(v.affected_assignment_ids, vec!["A", "B"]);
    }

    #[test]
    fn test_report_validity() {
        let now = Utc::now();
        let warning = Violation::new(
            "R1",
            RuleKindTag::MaxConsecutive,
            Severity::Warning,
            vec!["A".to_string()],
            "连续工作",
        );
        let report = ViolationReport::new(vec![warning.clone()], now);
        assert!(report.is_valid);

        let error = Violation::new(
            "R2",
            RuleKindTag::RestPeriod,
            Severity::Error,
            vec!["A".to_string()],
            "休息不足",
        );
        let report = ViolationReport::new(vec![error, warning], now);
        assert!(!report.is_valid);
        assert_eq!(report.violations[0].rule_id, "R1");
        assert_eq!(report.severity_counts().error, 1);
        assert_eq!(report.severity_counts().total(), 2);
    }
}
