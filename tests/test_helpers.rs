// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、排班/规则构造、引擎启动等功能
// ==========================================

#![allow(dead_code)]

use anesthesia_planning::config::EngineConfig;
use anesthesia_planning::domain::{
    CandidateAssignment, RuleConfig, RuleScope, ShiftKind, SimulationResult, SimulationStatus,
    StaffRole, SupervisionConstraint,
};
use anesthesia_planning::engine::{EngineDeps, PlanningEngine};
use anesthesia_planning::repository::{InMemoryPlanningRepository, PlanningRepository};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const SECTOR: &str = "STANDARD";

/// 创建临时测试数据库文件
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是合法 UTF-8")?
        .to_string();
    Ok((temp_file, db_path))
}

/// 2025 年 6 月的某一天 (06-01 为周日)
pub fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

// ==========================================
// 排班构造
// ==========================================

/// 按班次种类给出标准起止时间
pub fn shift(
    id: &str,
    staff: &str,
    day: u32,
    kind: ShiftKind,
    room: Option<&str>,
) -> CandidateAssignment {
    let date = d(day);
    let (start, end) = match kind {
        ShiftKind::Morning => (date.and_hms_opt(8, 0, 0), date.and_hms_opt(13, 0, 0)),
        ShiftKind::Afternoon => (date.and_hms_opt(13, 0, 0), date.and_hms_opt(18, 0, 0)),
        ShiftKind::Night | ShiftKind::Garde | ShiftKind::Astreinte => (
            date.and_hms_opt(18, 0, 0),
            (date + Duration::days(1)).and_hms_opt(8, 0, 0),
        ),
        _ => (date.and_hms_opt(8, 0, 0), date.and_hms_opt(18, 0, 0)),
    };
    CandidateAssignment {
        id: id.to_string(),
        staff_id: staff.to_string(),
        role: StaffRole::Mar,
        date,
        room_id: room.map(str::to_string),
        sector_id: Some(SECTOR.to_string()),
        site_id: None,
        shift_kind: kind,
        start: start.unwrap(),
        end: end.unwrap(),
    }
}

/// 上午班 + 手术间
pub fn morning(id: &str, staff: &str, day: u32, room: &str) -> CandidateAssignment {
    shift(id, staff, day, ShiftKind::Morning, Some(room))
}

pub fn rule(id: &str, kind: anesthesia_planning::RuleKindTag, params: JsonValue) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        kind,
        priority: 0,
        scope: RuleScope::Global,
        active: true,
        revision: 1,
        parameters: params,
    }
}

pub fn supervision_rule() -> RuleConfig {
    rule(
        "SUP",
        anesthesia_planning::RuleKindTag::SupervisionCapacity,
        json!({"maxRoomsPerSupervisor": 2}),
    )
}

pub fn sector_constraint(max: u32) -> SupervisionConstraint {
    SupervisionConstraint {
        sector_id: SECTOR.to_string(),
        max_rooms_per_supervisor: max,
        exceptional_max: None,
        exceptions: Vec::new(),
        cross_sector_allowed: Vec::new(),
    }
}

/// 全部规则种类 (自定义规则除外)
pub fn standard_rules() -> Vec<RuleConfig> {
    use anesthesia_planning::RuleKindTag::*;
    vec![
        supervision_rule(),
        rule("REST", RestPeriod, json!({"minRestHours": 11})),
        rule("MAXC", MaxConsecutive, json!({"maxDays": 6})),
        rule("FATIGUE", FatigueThreshold, json!({})),
        rule(
            "INCOMP",
            Incompatibility,
            json!({"staffPairs": [["MAR4", "MAR5"]], "sameRoomOnly": false}),
        ),
    ]
}

// ==========================================
// 两周排班样例 (06-01 ~ 06-14)
// ==========================================
// - MAR1: 06-03 与 06-10 上午同时督导 A/B/C 三间 (扇区上限 2)
// - MAR2: 14 天连续全天班 (06-07 起超出连续上限)
// - MAR3: 06-05 值班 (至 06-06 08:00) 后紧接 06-06 上午班
// - MAR4/MAR5: 06-12 同扇区互斥
pub fn two_week_roster() -> Vec<CandidateAssignment> {
    let mut roster = Vec::new();
    for day in [3, 10] {
        for room in ["A", "B", "C"] {
            roster.push(morning(&format!("MAR1-{}-{}", day, room), "MAR1", day, room));
        }
    }
    for day in 1..=14 {
        roster.push(shift(
            &format!("MAR2-{}", day),
            "MAR2",
            day,
            ShiftKind::FullDay,
            Some("D"),
        ));
    }
    roster.push(shift("MAR3-G5", "MAR3", 5, ShiftKind::Garde, None));
    roster.push(morning("MAR3-M6", "MAR3", 6, "E"));
    roster.push(shift("MAR3-OFF7", "MAR3", 7, ShiftKind::DayOff, None));
    roster.push(morning("MAR4-12", "MAR4", 12, "F"));
    roster.push(morning("MAR5-12", "MAR5", 12, "G"));
    roster
}

// ==========================================
// 引擎构造
// ==========================================

pub fn memory_repo(
    rules: Vec<RuleConfig>,
    candidates: Vec<CandidateAssignment>,
) -> Arc<InMemoryPlanningRepository> {
    let repo = Arc::new(InMemoryPlanningRepository::new());
    for r in rules {
        repo.add_rule_config(r).unwrap();
    }
    repo.add_supervision_constraint(sector_constraint(2)).unwrap();
    repo.add_candidate_assignments(candidates).unwrap();
    repo
}

pub async fn engine_with(
    repo: Arc<InMemoryPlanningRepository>,
    config: EngineConfig,
) -> PlanningEngine {
    let repository: Arc<dyn PlanningRepository> = repo;
    PlanningEngine::bootstrap(EngineDeps::new(repository, config))
        .await
        .unwrap()
}

/// 轮询直到结果进入终态
pub async fn wait_terminal(engine: &PlanningEngine, result_id: &str) -> SimulationResult {
    for _ in 0..500 {
        let result = engine.get_result(result_id).await.unwrap();
        if matches!(
            result.status,
            SimulationStatus::Completed | SimulationStatus::Failed
        ) {
            return result;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("模拟未在预期时间内结束: {}", result_id);
}
