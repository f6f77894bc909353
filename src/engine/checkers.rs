// ==========================================
// 麻醉科排班引擎 - 规则检查器
// ==========================================
// 职责: 每种规则一个纯函数检查器
// 输入: (规则参数, 作用范围内的排班, 疲劳快照, 督导约束快照)
// 红线: 检查器之间不共享可变状态, 不修改任何输入
// 红线: 每条违规锚定在其最晚的受影响条目上 (因果性), 分块合并依赖此性质
// ==========================================

use crate::domain::assignment::CandidateAssignment;
use crate::domain::rule::{
    CustomField, CustomOperator, CustomParams, FatigueThresholdParams, IncompatibilityParams,
    MaxConsecutiveParams, RestPeriodParams,
};
use crate::domain::types::{FatigueLevel, Period, RuleKindTag};
use crate::domain::violation::Violation;
use crate::engine::error::CheckerRuntimeError;
use crate::engine::fatigue::FatigueSnapshot;
use chrono::{Datelike, Duration, NaiveDate};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// 按人员分组 (保持输入顺序)
fn by_staff<'a>(
    assignments: &[&'a CandidateAssignment],
) -> BTreeMap<&'a str, Vec<&'a CandidateAssignment>> {
    let mut map: BTreeMap<&str, Vec<&CandidateAssignment>> = BTreeMap::new();
    for a in assignments {
        if a.is_working() {
            map.entry(a.staff_id.as_str()).or_default().push(a);
        }
    }
    map
}

/// 按 (人员, 日期) 分组的工作条目
fn working_days<'a>(
    assignments: &[&'a CandidateAssignment],
) -> BTreeMap<(&'a str, NaiveDate), Vec<&'a CandidateAssignment>> {
    let mut map: BTreeMap<(&str, NaiveDate), Vec<&CandidateAssignment>> = BTreeMap::new();
    for a in assignments {
        if a.is_working() {
            map.entry((a.staff_id.as_str(), a.date)).or_default().push(a);
        }
    }
    map
}

fn ids(assignments: &[&CandidateAssignment]) -> Vec<String> {
    assignments.iter().map(|a| a.id.clone()).collect()
}

/// 互斥判定使用的位置: 手术间或扇区
fn location(a: &CandidateAssignment, same_room_only: bool) -> Option<&str> {
    if same_room_only {
        a.room_id.as_deref()
    } else {
        a.sector_id.as_deref()
    }
}

// ==========================================
// REST_PERIOD - 最小休息间隔
// ==========================================
// 同一人员相邻两段工作之间的休息不足 minRestHours
// 同一天内的连续时段视为同一工作日, 仅在 afterShiftKinds 指定时检查
pub fn check_rest_period(
    rule_id: &str,
    params: &RestPeriodParams,
    assignments: &[&CandidateAssignment],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (staff_id, mut shifts) in by_staff(assignments) {
        shifts.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.end.cmp(&b.end))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut last: Option<&CandidateAssignment> = None;
        for next in shifts {
            let Some(prev) = last else {
                last = Some(next);
                continue;
            };
            if next.start < prev.end {
                // 重叠 (同一时段多手术间), 合并为一段
                if next.end > prev.end {
                    last = Some(next);
                }
                continue;
            }

            let filtered = !params.after_shift_kinds.is_empty();
            let applies = if filtered {
                params.after_shift_kinds.contains(&prev.shift_kind)
            } else {
                next.date > prev.date
            };
            let rest_hours = (next.start - prev.end).num_minutes() as f64 / 60.0;
            if applies && rest_hours < params.min_rest_hours {
                violations.push(
                    Violation::new(
                        rule_id,
                        RuleKindTag::RestPeriod,
                        params.severity,
                        vec![prev.id.clone(), next.id.clone()],
                        format!(
                            "{} 在 {} {} 结束后仅休息 {:.1} 小时 (要求 {} 小时)",
                            staff_id, prev.date, prev.shift_kind, rest_hours, params.min_rest_hours
                        ),
                    )
                    .with_suggestion(format!("将 {} 的班次后移或更换人员", next.date)),
                );
            }
            last = Some(next);
        }
    }
    violations
}

// ==========================================
// MAX_CONSECUTIVE - 最大连续工作天数
// ==========================================
// 超出上限的每一天各产生一条违规, 影响该日全部工作条目
pub fn check_max_consecutive(
    rule_id: &str,
    params: &MaxConsecutiveParams,
    assignments: &[&CandidateAssignment],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut streak_staff: Option<&str> = None;
    let mut streak_last: Option<NaiveDate> = None;
    let mut streak: u32 = 0;

    for ((staff_id, date), day_shifts) in working_days(assignments) {
        let continues = streak_staff == Some(staff_id)
            && streak_last.map_or(false, |last| last + Duration::days(1) == date);
        streak = if continues { streak + 1 } else { 1 };
        streak_staff = Some(staff_id);
        streak_last = Some(date);

        if streak > params.max_days {
            violations.push(
                Violation::new(
                    rule_id,
                    RuleKindTag::MaxConsecutive,
                    params.severity,
                    ids(&day_shifts),
                    format!(
                        "{} 在 {} 连续工作第 {} 天 (上限 {} 天)",
                        staff_id, date, streak, params.max_days
                    ),
                )
                .with_suggestion("安排休息日打断连续工作"),
            );
        }
    }
    violations
}

// ==========================================
// INCOMPATIBILITY - 人员互斥
// ==========================================
pub fn check_incompatibility(
    rule_id: &str,
    params: &IncompatibilityParams,
    assignments: &[&CandidateAssignment],
) -> Vec<Violation> {
    let mut slots: BTreeMap<(&str, NaiveDate, Period), Vec<&CandidateAssignment>> = BTreeMap::new();
    for a in assignments {
        if !a.is_working() {
            continue;
        }
        for period in a.periods() {
            slots
                .entry((a.staff_id.as_str(), a.date, *period))
                .or_default()
                .push(a);
        }
    }

    let room_only = params.same_room_only;
    let mut violations = Vec::new();
    for (first, second) in &params.staff_pairs {
        for ((staff_id, date, period), first_shifts) in &slots {
            if *staff_id != first.as_str() {
                continue;
            }
            let Some(second_shifts) = slots.get(&(second.as_str(), *date, *period)) else {
                continue;
            };
            let shared: BTreeSet<&str> = first_shifts
                .iter()
                .filter_map(|a| location(a, room_only))
                .filter(|loc| {
                    second_shifts
                        .iter()
                        .any(|b| location(b, room_only) == Some(*loc))
                })
                .collect();
            if shared.is_empty() {
                continue;
            }
            let affected: Vec<String> = first_shifts
                .iter()
                .chain(second_shifts.iter())
                .filter(|a| location(a, room_only).map_or(false, |loc| shared.contains(loc)))
                .map(|a| a.id.clone())
                .collect();
            violations.push(
                Violation::new(
                    rule_id,
                    RuleKindTag::Incompatibility,
                    params.severity,
                    affected,
                    format!(
                        "{} 与 {} 在 {} {} 同时安排于 {}",
                        first,
                        second,
                        date,
                        period,
                        shared.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                )
                .with_suggestion(format!("将 {} 或 {} 调整到其他位置", first, second)),
            );
        }
    }
    violations
}

// ==========================================
// FATIGUE_THRESHOLD - 疲劳阈值
// ==========================================
// 工作日当天余额达到 ALERT/CRITICAL 即违规
pub fn check_fatigue_threshold(
    rule_id: &str,
    params: &FatigueThresholdParams,
    assignments: &[&CandidateAssignment],
    fatigue: &FatigueSnapshot,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for ((staff_id, date), day_shifts) in working_days(assignments) {
        let balance = fatigue.balance_at(staff_id, date);
        let severity = match fatigue.classify(balance) {
            FatigueLevel::Normal => continue,
            FatigueLevel::Alert => params.alert_severity,
            FatigueLevel::Critical => params.critical_severity,
        };
        violations.push(
            Violation::new(
                rule_id,
                RuleKindTag::FatigueThreshold,
                severity,
                ids(&day_shifts),
                format!(
                    "{} 在 {} 疲劳积分 {:.1} 达到 {} 等级",
                    staff_id,
                    date,
                    balance,
                    fatigue.classify(balance)
                ),
            )
            .with_suggestion("安排休息日或减少值班"),
        );
    }
    violations
}

// ==========================================
// CUSTOM - 自定义条件规则
// ==========================================
// 逐条目判定; 类型不匹配返回 CheckerRuntimeError (仅影响该条目)
pub fn check_custom_assignment(
    rule_id: &str,
    params: &CustomParams,
    assignment: &CandidateAssignment,
) -> Result<Option<Violation>, CheckerRuntimeError> {
    let field_value = custom_field_value(params.field, assignment);
    if field_value.is_null() {
        return Ok(None);
    }
    let matched = apply_operator(params.operator, &field_value, &params.value).map_err(|message| {
        CheckerRuntimeError::new(rule_id, Some(assignment.id.clone()), message)
    })?;
    if !matched {
        return Ok(None);
    }
    let message = params.message.clone().unwrap_or_else(|| {
        format!(
            "{} 的 {:?}={} 满足自定义条件 {:?} {}",
            assignment.id, params.field, field_value, params.operator, params.value
        )
    });
    Ok(Some(Violation::new(
        rule_id,
        RuleKindTag::Custom,
        params.severity,
        vec![assignment.id.clone()],
        message,
    )))
}

fn custom_field_value(field: CustomField, a: &CandidateAssignment) -> JsonValue {
    let optional = |v: &Option<String>| v.clone().map(JsonValue::String).unwrap_or(JsonValue::Null);
    match field {
        CustomField::StaffId => JsonValue::String(a.staff_id.clone()),
        CustomField::Role => JsonValue::String(a.role.as_str().to_string()),
        CustomField::RoomId => optional(&a.room_id),
        CustomField::SectorId => optional(&a.sector_id),
        CustomField::SiteId => optional(&a.site_id),
        CustomField::ShiftKind => JsonValue::String(a.shift_kind.as_str().to_string()),
        CustomField::DurationHours => serde_json::Number::from_f64(a.duration_hours())
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        CustomField::Weekday => JsonValue::from(a.date.weekday().number_from_monday()),
    }
}

fn same_type(a: &JsonValue, b: &JsonValue) -> bool {
    matches!(
        (a, b),
        (JsonValue::String(_), JsonValue::String(_))
            | (JsonValue::Number(_), JsonValue::Number(_))
            | (JsonValue::Bool(_), JsonValue::Bool(_))
    )
}

fn loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn apply_operator(op: CustomOperator, field: &JsonValue, value: &JsonValue) -> Result<bool, String> {
    match op {
        CustomOperator::Equals | CustomOperator::NotEquals => {
            if !same_type(field, value) {
                return Err(format!("无法比较 {} 与 {}: 类型不一致", field, value));
            }
            let eq = loose_eq(field, value);
            Ok(if op == CustomOperator::Equals { eq } else { !eq })
        }
        CustomOperator::GreaterThan | CustomOperator::LessThan => {
            let (Some(x), Some(y)) = (field.as_f64(), value.as_f64()) else {
                return Err(format!("{} 与 {} 不是数值, 无法比较大小", field, value));
            };
            Ok(if op == CustomOperator::GreaterThan { x > y } else { x < y })
        }
        CustomOperator::In => {
            let candidates = value
                .as_array()
                .ok_or_else(|| "IN 运算要求数组".to_string())?;
            Ok(candidates.iter().any(|c| loose_eq(field, c)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::engine_config::FatigueConfig;
    use crate::domain::types::{Severity, ShiftKind, StaffRole};
    use crate::engine::fatigue::FatigueLedger;
    use serde_json::json;
    use std::sync::Arc;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn shift(id: &str, staff: &str, day: u32, kind: ShiftKind, start: u32, end_day: u32, end: u32) -> CandidateAssignment {
        CandidateAssignment {
            id: id.to_string(),
            staff_id: staff.to_string(),
            role: StaffRole::Mar,
            date: d(day),
            room_id: Some(format!("R-{}", id)),
            sector_id: Some("STANDARD".to_string()),
            site_id: None,
            shift_kind: kind,
            start: d(day).and_hms_opt(start, 0, 0).unwrap(),
            end: d(end_day).and_hms_opt(end, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_rest_period_after_night() {
        let night = shift("N", "S1", 2, ShiftKind::Night, 20, 3, 8);
        let next = shift("M", "S1", 3, ShiftKind::Morning, 14, 3, 18);
        let refs = vec![&night, &next];
        let params = RestPeriodParams {
            min_rest_hours: 11.0,
            after_shift_kinds: vec![],
            severity: Severity::Error,
        };
        let violations = check_rest_period("REST", &params, &refs);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].affected_assignment_ids, vec!["M", "N"]);
    }

    #[test]
    fn test_rest_period_ignores_same_day_periods() {
        let morning = shift("AM", "S1", 2, ShiftKind::Morning, 8, 2, 13);
        let afternoon = shift("PM", "S1", 2, ShiftKind::Afternoon, 14, 2, 18);
        let refs = vec![&morning, &afternoon];
        let params = RestPeriodParams {
            min_rest_hours: 11.0,
            after_shift_kinds: vec![],
            severity: Severity::Error,
        };
        assert!(check_rest_period("REST", &params, &refs).is_empty());
    }

    #[test]
    fn test_max_consecutive_flags_each_excess_day() {
        let shifts: Vec<CandidateAssignment> = (1..=8)
            .map(|day| shift(&format!("D{}", day), "S1", day, ShiftKind::FullDay, 8, day, 18))
            .collect();
        let refs: Vec<&CandidateAssignment> = shifts.iter().collect();
        let params = MaxConsecutiveParams {
            max_days: 6,
            severity: Severity::Warning,
        };
        let violations = check_max_consecutive("MAX", &params, &refs);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].affected_assignment_ids, vec!["D7"]);
        assert_eq!(violations[1].affected_assignment_ids, vec!["D8"]);
    }

    #[test]
    fn test_incompatibility_same_sector() {
        let a = shift("A", "S1", 2, ShiftKind::Morning, 8, 2, 13);
        let b = shift("B", "S2", 2, ShiftKind::Morning, 8, 2, 13);
        let c = shift("C", "S2", 3, ShiftKind::Morning, 8, 3, 13);
        let refs = vec![&a, &b, &c];
        let params = IncompatibilityParams {
            staff_pairs: vec![("S1".to_string(), "S2".to_string())],
            same_room_only: false,
            severity: Severity::Warning,
        };
        let violations = check_incompatibility("INC", &params, &refs);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].affected_assignment_ids, vec!["A", "B"]);

        let room_only = IncompatibilityParams {
            same_room_only: true,
            ..params
        };
        assert!(check_incompatibility("INC", &room_only, &refs).is_empty());
    }

    #[test]
    fn test_fatigue_threshold_levels() {
        let shifts: Vec<CandidateAssignment> = (1..=3)
            .map(|day| shift(&format!("G{}", day), "S1", day, ShiftKind::Garde, 8, day, 20))
            .collect();
        let ledger = FatigueLedger::from_assignments(Arc::new(FatigueConfig::default()), &shifts);
        let snapshot = ledger.snapshot();
        let refs: Vec<&CandidateAssignment> = shifts.iter().collect();
        let violations =
            check_fatigue_threshold("FAT", &FatigueThresholdParams::default(), &refs, &snapshot);
        // 30 → NORMAL, 60 → ALERT, 90 → CRITICAL
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].severity, Severity::Warning);
        assert_eq!(violations[1].severity, Severity::Error);
    }

    #[test]
    fn test_custom_predicate_and_type_mismatch() {
        let a = shift("A", "S1", 2, ShiftKind::Garde, 8, 2, 20);
        let long_shift = CustomParams {
            field: CustomField::DurationHours,
            operator: CustomOperator::GreaterThan,
            value: json!(10),
            severity: Severity::Warning,
            message: None,
        };
        let v = check_custom_assignment("CUS", &long_shift, &a).unwrap();
        assert!(v.is_some());

        let broken = CustomParams {
            field: CustomField::StaffId,
            operator: CustomOperator::GreaterThan,
            value: json!(3),
            severity: Severity::Warning,
            message: None,
        };
        let err = check_custom_assignment("CUS", &broken, &a).unwrap_err();
        assert_eq!(err.rule_id, "CUS");
        assert_eq!(err.assignment_id.as_deref(), Some("A"));
    }
}
