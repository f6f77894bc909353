// ==========================================
// SQLite 仓储集成测试
// ==========================================
// 职责: 验证 SqlitePlanningRepository 的读写与事务语义
// 场景: 临时数据库文件 → 准备数据 → 读取 / 批量写入 / 引擎全流程
// ==========================================

mod test_helpers;

use anesthesia_planning::config::{config_keys, ConfigManager};
use anesthesia_planning::domain::{
    ApplyOptions, DateRange, LeaveRecord, RestKind, RuleScope, ScenarioParameters, ShiftKind,
};
use anesthesia_planning::engine::{EngineDeps, PlanningEngine};
use anesthesia_planning::repository::{
    PlanningRepository, RepositoryError, SqlitePlanningRepository, WriteBatch,
};
use anesthesia_planning::{RuleKindTag, SimulationStatus};
use serde_json::json;
use std::sync::Arc;
use test_helpers::*;

fn batch(
    assignments: Vec<anesthesia_planning::CandidateAssignment>,
    clear_existing: bool,
) -> WriteBatch {
    WriteBatch {
        range: DateRange::new(d(1), d(14)),
        clear_existing,
        assignments,
        leaves: Vec::new(),
        source_result_id: "R-TEST".to_string(),
    }
}

#[tokio::test]
async fn test_load_candidates_rules_and_constraints() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let repo = SqlitePlanningRepository::new(&db_path).unwrap();

    let inserted = repo.insert_candidate_assignments(&two_week_roster()).unwrap();
    assert_eq!(inserted, two_week_roster().len());
    for config in standard_rules() {
        repo.upsert_rule_config(&config).unwrap();
    }
    let mut sector_rule = rule("SECTOR_MAX", RuleKindTag::MaxConsecutive, json!({"maxDays": 4}));
    sector_rule.scope = RuleScope::Sector(SECTOR.to_string());
    repo.upsert_rule_config(&sector_rule).unwrap();
    repo.upsert_supervision_constraint(&sector_constraint(3)).unwrap();

    let week = repo
        .load_candidate_assignments(&DateRange::new(d(1), d(7)))
        .await
        .unwrap();
    assert!(week.iter().all(|a| a.date <= d(7)));
    assert!(week.windows(2).all(|w| w[0].date <= w[1].date));
    let garde = week.iter().find(|a| a.id == "MAR3-G5").unwrap();
    assert_eq!(garde.shift_kind, ShiftKind::Garde);
    assert_eq!(garde.room_id, None);

    let global = repo.load_rules(&RuleScope::Global).await.unwrap();
    assert_eq!(global.len(), standard_rules().len());
    let sector = repo
        .load_rules(&RuleScope::Sector(SECTOR.to_string()))
        .await
        .unwrap();
    assert_eq!(sector.len(), 1);
    assert_eq!(sector[0].parameters, json!({"maxDays": 4}));

    let constraint = repo.load_supervision_constraints(SECTOR).await.unwrap();
    assert_eq!(constraint.unwrap().max_rooms_per_supervisor, 3);
    assert!(repo
        .load_supervision_constraints("CARDIO")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_write_batch_upserts_and_clears() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let repo = SqlitePlanningRepository::new(&db_path).unwrap();

    let first = vec![morning("A", "MAR1", 2, "A"), morning("B", "MAR1", 2, "B")];
    let receipt = repo.write_assignments(batch(first, false)).await.unwrap();
    assert_eq!((receipt.created, receipt.updated), (2, 0));

    // 同键不同ID ⇒ 更新
    let second = vec![morning("A2", "MAR1", 2, "A")];
    let mut write = batch(second, true);
    write.leaves.push(LeaveRecord {
        id: "L1".to_string(),
        staff_id: "MAR2".to_string(),
        date: d(3),
        rest_kind: RestKind::DayOff,
        source_scenario_id: Some("S1".to_string()),
    });
    let receipt = repo.write_assignments(write).await.unwrap();
    assert_eq!(receipt.created, 0);
    assert_eq!(receipt.updated, 1);
    assert_eq!(receipt.removed, 1);
    assert_eq!(receipt.leaves_created, 1);

    let live = repo
        .load_live_schedule_snapshot(&DateRange::new(d(1), d(14)))
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, "A2");
    assert_eq!(repo.list_leaves().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_batch_writes_nothing() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let repo = SqlitePlanningRepository::new(&db_path).unwrap();
    repo.write_assignments(batch(vec![morning("KEEP", "MAR9", 4, "Z")], false))
        .await
        .unwrap();

    let duplicate = vec![morning("X1", "MAR1", 2, "A"), morning("X2", "MAR1", 2, "A")];
    let err = repo
        .write_assignments(batch(duplicate, true))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

    let live = repo
        .load_live_schedule_snapshot(&DateRange::new(d(1), d(14)))
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, "KEEP");
}

#[tokio::test]
async fn test_engine_end_to_end_over_sqlite() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let repo = Arc::new(SqlitePlanningRepository::new(&db_path).unwrap());
    repo.insert_candidate_assignments(&two_week_roster()).unwrap();
    for config in standard_rules() {
        repo.upsert_rule_config(&config).unwrap();
    }
    repo.upsert_supervision_constraint(&sector_constraint(2)).unwrap();

    let manager = ConfigManager::new(&db_path).unwrap();
    manager.set_config_value(config_keys::CHUNK_DAYS, "3").unwrap();
    let config = manager.load_engine_config().unwrap();
    assert_eq!(config.simulation.chunk_days, 3);

    let repository: Arc<dyn PlanningRepository> = repo.clone();
    let engine = PlanningEngine::bootstrap(EngineDeps::new(repository, config))
        .await
        .unwrap();
    let scenario_id = engine
        .create_scenario("sqlite", None, ScenarioParameters::new(d(1), d(14)), "tester")
        .await
        .unwrap();
    let result = engine.run_scenario_to_completion(&scenario_id).await.unwrap();
    assert_eq!(result.status, SimulationStatus::Completed);
    let stats = result.statistics.as_ref().unwrap();
    assert_eq!(stats.violations_by_kind.get(&RuleKindTag::SupervisionCapacity), Some(&2));
    assert_eq!(stats.total_assignments, two_week_roster().len() as u64);

    // 模拟阶段已知的冲突不阻止应用
    let outcome = engine
        .apply_result(&result.id, ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.leaves_created, 1);

    let live = repo
        .load_live_schedule_snapshot(&DateRange::new(d(1), d(14)))
        .await
        .unwrap();
    assert_eq!(live.len() as u64, outcome.assignments_created);
    assert_eq!(repo.list_leaves().unwrap().len(), 1);
}
