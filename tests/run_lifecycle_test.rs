// ==========================================
// 模拟运行生命周期测试
// ==========================================
// 场景: 慢速投影 + 取消 / 超时 / 投影失败 / 非法区间
// 验证: 终态为 FAILED 且带可读原因, 不出现部分 COMPLETED
// ==========================================

mod test_helpers;

use anesthesia_planning::api::{ApiError, SimulationApi};
use anesthesia_planning::config::EngineConfig;
use anesthesia_planning::domain::{CandidateAssignment, DateRange, ScenarioParameters};
use anesthesia_planning::engine::{
    AssignmentProjector, EngineDeps, EngineError, EngineResult, PlanningEngine, SnapshotProjector,
};
use anesthesia_planning::repository::PlanningRepository;
use anesthesia_planning::SimulationStatus;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;

/// 每次投影前休眠的投影器
struct SlowProjector {
    inner: SnapshotProjector,
    delay: Duration,
}

impl AssignmentProjector for SlowProjector {
    fn project(
        &self,
        params: &ScenarioParameters,
        context: &DateRange,
    ) -> EngineResult<Vec<CandidateAssignment>> {
        std::thread::sleep(self.delay);
        self.inner.project(params, context)
    }
}

/// 投影到指定日期时失败
struct FailingProjector {
    fail_on: chrono::NaiveDate,
}

impl AssignmentProjector for FailingProjector {
    fn project(
        &self,
        _params: &ScenarioParameters,
        context: &DateRange,
    ) -> EngineResult<Vec<CandidateAssignment>> {
        if context.contains(self.fail_on) {
            return Err(EngineError::Internal("投影源不可用".to_string()));
        }
        Ok(Vec::new())
    }
}

async fn engine_with_projector(
    projector: Arc<dyn AssignmentProjector>,
    config: EngineConfig,
) -> PlanningEngine {
    let repository: Arc<dyn PlanningRepository> = memory_repo(standard_rules(), Vec::new());
    PlanningEngine::bootstrap(EngineDeps::new(repository, config).with_projector(projector))
        .await
        .unwrap()
}

fn single_worker(timeout_secs: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.simulation.worker_count = 1;
    config.simulation.run_timeout_secs = timeout_secs;
    config
}

fn daily_chunks() -> ScenarioParameters {
    let mut params = ScenarioParameters::new(d(1), d(14));
    params.options.chunk_days = Some(1);
    params
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_scenario() {
    let projector = Arc::new(SlowProjector {
        inner: SnapshotProjector::new(two_week_roster()),
        delay: Duration::from_millis(200),
    });
    let engine = engine_with_projector(projector, single_worker(60)).await;
    let scenario_id = engine
        .create_scenario("slow", None, daily_chunks(), "tester")
        .await
        .unwrap();

    let result_id = engine.run_scenario(&scenario_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.cancel_run(&result_id).await.unwrap();

    let result = wait_terminal(&engine, &result_id).await;
    assert_eq!(result.status, SimulationStatus::Failed);
    assert_eq!(result.error_message.as_deref(), Some("cancelled"));
    assert!(result.statistics.is_none());
    assert!(result.conflict_alerts.is_empty());
    assert!(result.generated_planning_data.is_empty());

    // 终态之后不可再取消
    assert!(engine.cancel_run(&result_id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_timeout_marks_failed() {
    let projector = Arc::new(SlowProjector {
        inner: SnapshotProjector::new(Vec::new()),
        delay: Duration::from_millis(700),
    });
    let engine = engine_with_projector(projector, single_worker(1)).await;
    let scenario_id = engine
        .create_scenario("timeout", None, daily_chunks(), "tester")
        .await
        .unwrap();

    let result = engine.run_scenario_to_completion(&scenario_id).await.unwrap();
    assert_eq!(result.status, SimulationStatus::Failed);
    let reason = result.error_message.unwrap();
    assert!(reason.contains("超时"), "reason: {}", reason);
    assert!(result.statistics.is_none());
}

#[tokio::test]
async fn test_failing_chunk_fails_whole_run() {
    let projector = Arc::new(FailingProjector { fail_on: d(9) });
    let engine = engine_with_projector(projector, EngineConfig::default()).await;
    let scenario_id = engine
        .create_scenario("broken", None, ScenarioParameters::new(d(1), d(14)), "tester")
        .await
        .unwrap();

    let result = engine.run_scenario_to_completion(&scenario_id).await.unwrap();
    assert_eq!(result.status, SimulationStatus::Failed);
    let reason = result.error_message.unwrap();
    assert!(reason.contains("chunk=1"), "reason: {}", reason);
    assert!(result.statistics.is_none());
}

#[tokio::test]
async fn test_invalid_scenarios_rejected_synchronously() {
    let repository: Arc<dyn PlanningRepository> = memory_repo(standard_rules(), Vec::new());
    let engine = PlanningEngine::bootstrap(EngineDeps::new(repository, EngineConfig::default()))
        .await
        .unwrap();
    let api = SimulationApi::new(engine);

    let err = api
        .create_scenario(
            "reversed",
            r#"{"startDate": "2025-06-14", "endDate": "2025-06-01"}"#,
            "tester",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    let err = api
        .create_scenario("bad", r#"{"startDate": "2025-06-01"}"#, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    let err = api
        .create_scenario(
            "too-long",
            r#"{"startDate": "2025-01-01", "endDate": "2025-12-31"}"#,
            "tester",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    // 覆写引用了不存在的规则: 运行前同步拒绝
    let scenario_id = api
        .create_scenario(
            "unknown-rule",
            r#"{"startDate": "2025-06-01", "endDate": "2025-06-07", "ruleOverrides": [{"ruleId": "NOPE", "active": false}]}"#,
            "tester",
        )
        .await
        .unwrap();
    let err = api.run_scenario(&scenario_id).await.unwrap_err();
    assert!(matches!(err, ApiError::ConfigurationError(_)));

    assert!(matches!(
        api.get_result("missing").await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_malformed_rule_fails_bootstrap() {
    let repo = memory_repo(
        vec![rule(
            "BROKEN",
            anesthesia_planning::RuleKindTag::MaxConsecutive,
            serde_json::json!({"maxDays": "six"}),
        )],
        Vec::new(),
    );
    let repository: Arc<dyn PlanningRepository> = repo;
    let err = PlanningEngine::bootstrap(EngineDeps::new(repository, EngineConfig::default()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Configuration { .. }));
}
