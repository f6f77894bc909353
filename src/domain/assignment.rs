// ==========================================
// 麻醉科排班引擎 - 排班条目领域模型
// ==========================================
// 职责: 候选排班 / 日期区间 / 休假记录
// 红线: 候选排班由调用方提供, 引擎只读不改
// ==========================================

use crate::domain::types::{Period, RestKind, ShiftKind, StaffRole};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

// ==========================================
// DateRange - 日期区间 (首尾均包含)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    /// 创建日期区间 (不做业务校验, 业务校验见 validate_span)
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    /// 校验区间: 结束日期必须晚于开始日期, 跨度不得超过 max_span_days
    pub fn validate_span(&self, max_span_days: u32) -> Result<(), String> {
        if self.end_date <= self.start_date {
            return Err(format!(
                "日期区间无效: 结束日期 {} 必须晚于开始日期 {}",
                self.end_date, self.start_date
            ));
        }
        let days = self.num_days();
        if days > i64::from(max_span_days) {
            return Err(format!(
                "日期区间过长: {} 天, 最大允许 {} 天",
                days, max_span_days
            ));
        }
        Ok(())
    }

    /// 区间包含的天数
    pub fn num_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// 按日期顺序遍历区间内每一天
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start_date;
        let count = self.num_days().max(0);
        (0..count).map(move |offset| start + Duration::days(offset))
    }

    /// 按固定天数切分为连续子区间 (最后一个子区间可能更短)
    pub fn split(&self, chunk_days: u32) -> Vec<DateRange> {
        let step = i64::from(chunk_days.max(1));
        let mut chunks = Vec::new();
        let mut cursor = self.start_date;
        while cursor <= self.end_date {
            let chunk_end = (cursor + Duration::days(step - 1)).min(self.end_date);
            chunks.push(DateRange::new(cursor, chunk_end));
            cursor = chunk_end + Duration::days(1);
        }
        chunks
    }
}

/// 实际排班业务唯一键
pub type ScheduleKey = (String, NaiveDate, ShiftKind, Option<String>);

// ==========================================
// CandidateAssignment - 候选排班条目
// ==========================================
// 工作班次与休息标记 (DAY_OFF / HALF_DAY_OFF / LEAVE) 共用此结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateAssignment {
    pub id: String,
    pub staff_id: String,
    #[serde(default)]
    pub role: StaffRole,
    pub date: NaiveDate,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sector_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    pub shift_kind: ShiftKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CandidateAssignment {
    pub fn is_working(&self) -> bool {
        self.shift_kind.is_working()
    }

    pub fn rest_kind(&self) -> Option<RestKind> {
        self.shift_kind.rest_kind()
    }

    pub fn periods(&self) -> &'static [Period] {
        self.shift_kind.periods()
    }

    /// 班次时长 (小时)
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / 60.0
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// 写入实际排班时的业务唯一键 (人员 + 日期 + 班次 + 手术间)
    pub fn schedule_key(&self) -> ScheduleKey {
        (
            self.staff_id.clone(),
            self.date,
            self.shift_kind,
            self.room_id.clone(),
        )
    }

    /// 基础结构校验 (调用方输入)
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("排班条目ID不能为空".to_string());
        }
        if self.staff_id.trim().is_empty() {
            return Err(format!("排班条目 {} 缺少人员ID", self.id));
        }
        if self.end <= self.start {
            return Err(format!(
                "排班条目 {} 的结束时间 {} 必须晚于开始时间 {}",
                self.id, self.end, self.start
            ));
        }
        Ok(())
    }
}

// ==========================================
// LeaveRecord - 休假记录 (应用模拟结果时写入)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRecord {
    pub id: String,
    pub staff_id: String,
    pub date: NaiveDate,
    pub rest_kind: RestKind,
    /// 来源模拟场景 (审计用)
    pub source_scenario_id: Option<String>,
}

impl LeaveRecord {
    /// 从休息类候选条目转换 (工作班次返回 None)
    pub fn from_assignment(
        assignment: &CandidateAssignment,
        source_scenario_id: Option<String>,
    ) -> Option<Self> {
        assignment.rest_kind().map(|rest_kind| LeaveRecord {
            id: assignment.id.clone(),
            staff_id: assignment.staff_id.clone(),
            date: assignment.date,
            rest_kind,
            source_scenario_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_date_range_split_by_week() {
        let range = DateRange::new(d(2025, 6, 1), d(2025, 6, 14));
        let chunks = range.split(7);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], DateRange::new(d(2025, 6, 1), d(2025, 6, 7)));
        assert_eq!(chunks[1], DateRange::new(d(2025, 6, 8), d(2025, 6, 14)));

        let uneven = DateRange::new(d(2025, 6, 1), d(2025, 6, 10)).split(4);
        assert_eq!(uneven.len(), 3);
        assert_eq!(uneven[2].num_days(), 2);
    }

    #[test]
    fn test_date_range_validation() {
        assert!(DateRange::new(d(2025, 6, 2), d(2025, 6, 1))
            .validate_span(90)
            .is_err());
        // 结束日期等于开始日期同样拒绝
        assert!(DateRange::new(d(2025, 6, 1), d(2025, 6, 1))
            .validate_span(90)
            .is_err());
        assert!(DateRange::new(d(2025, 1, 1), d(2025, 6, 1))
            .validate_span(90)
            .is_err());
        assert!(DateRange::new(d(2025, 6, 1), d(2025, 6, 14))
            .validate_span(90)
            .is_ok());
    }

    #[test]
    fn test_assignment_deny_unknown_fields() {
        let json = r#"{
            "id": "A1", "staffId": "S1", "date": "2025-06-02",
            "shiftKind": "MORNING",
            "start": "2025-06-02T08:00:00", "end": "2025-06-02T13:00:00",
            "colour": "red"
        }"#;
        assert!(serde_json::from_str::<CandidateAssignment>(json).is_err());
    }

    #[test]
    fn test_leave_record_from_rest_entry() {
        let rest = CandidateAssignment {
            id: "R1".to_string(),
            staff_id: "S1".to_string(),
            role: StaffRole::Iade,
            date: d(2025, 6, 3),
            room_id: None,
            sector_id: None,
            site_id: None,
            shift_kind: ShiftKind::Leave,
            start: d(2025, 6, 3).and_hms_opt(0, 0, 0).unwrap(),
            end: d(2025, 6, 3).and_hms_opt(23, 59, 0).unwrap(),
        };
        let leave = LeaveRecord::from_assignment(&rest, Some("SC1".to_string())).unwrap();
        assert_eq!(leave.rest_kind, RestKind::Leave);
        assert_eq!(leave.source_scenario_id.as_deref(), Some("SC1"));
    }
}
