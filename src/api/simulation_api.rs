// ==========================================
// 麻醉科排班引擎 - 模拟 API
// ==========================================
// 职责: 对外暴露场景创建 / 运行 / 查询 / 对比 / 应用 / 直接校验
// 输入: JSON 文本参数 (camelCase)
// 红线: 任何拒绝结果都必须附带可读原因; 应用冲突附带完整冲突清单
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::assignment::CandidateAssignment;
use crate::domain::simulation::{
    ApplyOptions, ApplyOutcome, ComparisonReport, ScenarioParameters, SimulationResult,
};
use crate::domain::violation::ViolationReport;
use crate::engine::error::EngineError;
use crate::engine::orchestrator::PlanningEngine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 创建场景请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScenarioRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: ScenarioParameters,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

fn default_operator() -> String {
    "system".to_string()
}

// ==========================================
// SimulationApi
// ==========================================
#[derive(Clone)]
pub struct SimulationApi {
    engine: PlanningEngine,
}

impl SimulationApi {
    pub fn new(engine: PlanningEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PlanningEngine {
        &self.engine
    }

    /// 创建场景
    ///
    /// # 参数
    /// - parameters_json: {startDate, endDate, ruleOverrides?, ...}
    ///
    /// # 返回
    /// - Ok(scenario_id)
    pub async fn create_scenario(
        &self,
        name: &str,
        parameters_json: &str,
        created_by: &str,
    ) -> ApiResult<String> {
        let parameters = ScenarioParameters::from_json(parameters_json).map_err(ApiError::InvalidInput)?;
        Ok(self
            .engine
            .create_scenario(name, None, parameters, created_by)
            .await?)
    }

    /// 以完整请求体创建场景
    pub async fn create_scenario_from_request(&self, request_json: &str) -> ApiResult<String> {
        let request: CreateScenarioRequest = serde_json::from_str(request_json)?;
        Ok(self
            .engine
            .create_scenario(
                &request.name,
                request.description,
                request.parameters,
                &request.created_by,
            )
            .await?)
    }

    /// 异步运行场景, 返回结果ID
    pub async fn run_scenario(&self, scenario_id: &str) -> ApiResult<String> {
        Ok(self.engine.run_scenario(scenario_id).await?)
    }

    pub async fn get_result(&self, result_id: &str) -> ApiResult<SimulationResult> {
        Ok(self.engine.get_result(result_id).await?)
    }

    pub async fn cancel_run(&self, result_id: &str) -> ApiResult<()> {
        Ok(self.engine.cancel_run(result_id).await?)
    }

    pub async fn compare_results(
        &self,
        result_a_id: &str,
        result_b_id: &str,
    ) -> ApiResult<ComparisonReport> {
        Ok(self.engine.compare_results(result_a_id, result_b_id).await?)
    }

    /// 应用模拟结果
    ///
    /// # 返回
    /// - Ok(ApplyOutcome{applied=true}): 已写入
    /// - Ok(ApplyOutcome{applied=false, conflicts}): 实时排班出现新冲突, 零写入
    /// - Err: 状态不允许 / 重复应用 / 存储失败
    pub async fn apply_result(
        &self,
        result_id: &str,
        options: ApplyOptions,
    ) -> ApiResult<ApplyOutcome> {
        match self.engine.apply_result(result_id, options).await {
            Ok(outcome) => Ok(outcome),
            Err(EngineError::StaleScheduleConflict { conflicts }) => {
                warn!(result_id, conflicts = conflicts.len(), "应用被拒绝: 实时排班存在新冲突");
                let message = format!("实时排班存在 {} 个新冲突, 请处理后重试", conflicts.len());
                Ok(ApplyOutcome::rejected(conflicts, message))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 应用模拟结果 (选项为 JSON: {clearExisting, includeLeaves, includeOnCall, notes})
    pub async fn apply_result_json(
        &self,
        result_id: &str,
        options_json: &str,
    ) -> ApiResult<ApplyOutcome> {
        let options: ApplyOptions = if options_json.trim().is_empty() {
            ApplyOptions::default()
        } else {
            serde_json::from_str(options_json)?
        };
        self.apply_result(result_id, options).await
    }

    /// 直接校验排班集合 (同步, 不经过模拟)
    pub async fn validate_assignments(
        &self,
        assignments: Vec<CandidateAssignment>,
    ) -> ApiResult<ViolationReport> {
        let report = self.engine.validate_assignments(assignments).await?;
        info!(
            violations = report.violations.len(),
            is_valid = report.is_valid,
            "排班校验完成"
        );
        Ok(report)
    }

    pub async fn validate_assignments_json(&self, assignments_json: &str) -> ApiResult<ViolationReport> {
        let assignments: Vec<CandidateAssignment> = serde_json::from_str(assignments_json)?;
        self.validate_assignments(assignments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::engine_config::EngineConfig;
    use crate::domain::rule::{RuleConfig, RuleScope};
    use crate::domain::types::{RuleKindTag, ShiftKind, SimulationStatus, StaffRole};
    use crate::engine::orchestrator::EngineDeps;
    use crate::repository::memory_repo::InMemoryPlanningRepository;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn morning(id: &str, room: &str) -> CandidateAssignment {
        CandidateAssignment {
            id: id.to_string(),
            staff_id: "MAR1".to_string(),
            role: StaffRole::Mar,
            date: d(2),
            room_id: Some(room.to_string()),
            sector_id: Some("STANDARD".to_string()),
            site_id: None,
            shift_kind: ShiftKind::Morning,
            start: d(2).and_hms_opt(8, 0, 0).unwrap(),
            end: d(2).and_hms_opt(13, 0, 0).unwrap(),
        }
    }

    async fn api(candidates: Vec<CandidateAssignment>) -> (SimulationApi, Arc<InMemoryPlanningRepository>) {
        let repo = Arc::new(InMemoryPlanningRepository::new());
        repo.add_rule_config(RuleConfig {
            id: "SUP".to_string(),
            kind: RuleKindTag::SupervisionCapacity,
            priority: 0,
            scope: RuleScope::Global,
            active: true,
            revision: 1,
            parameters: json!({"maxRoomsPerSupervisor": 2}),
        })
        .unwrap();
        repo.add_candidate_assignments(candidates).unwrap();
        let engine = PlanningEngine::bootstrap(EngineDeps::new(repo.clone(), EngineConfig::default()))
            .await
            .unwrap();
        (SimulationApi::new(engine), repo)
    }

    #[tokio::test]
    async fn test_create_scenario_from_request_defaults_operator() {
        let (api, _) = api(Vec::new()).await;
        let id = api
            .create_scenario_from_request(
                r#"{"name": "semaine", "parameters": {"startDate": "2025-06-01", "endDate": "2025-06-07"}}"#,
            )
            .await
            .unwrap();
        let scenario = api.engine().get_scenario(&id).await.unwrap();
        assert_eq!(scenario.created_by, "system");
        assert_eq!(scenario.parameters.date_range().num_days(), 7);

        let err = api
            .create_scenario_from_request(r#"{"name": "x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_validate_assignments_json() {
        let (api, _) = api(Vec::new()).await;
        let raw = serde_json::to_string(&vec![
            morning("A1", "A"),
            morning("B1", "B"),
            morning("C1", "C"),
        ])
        .unwrap();
        let report = api.validate_assignments_json(&raw).await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);

        let err = api.validate_assignments_json("[{\"id\": 1}]").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_apply_result_json_options() {
        let (api, repo) = api(vec![morning("A1", "A"), morning("B1", "B")]).await;
        let scenario_id = api
            .create_scenario(
                "apply",
                r#"{"startDate": "2025-06-01", "endDate": "2025-06-07"}"#,
                "tester",
            )
            .await
            .unwrap();
        let result = api
            .engine()
            .run_scenario_to_completion(&scenario_id)
            .await
            .unwrap();
        assert_eq!(result.status, SimulationStatus::Completed);

        let err = api
            .apply_result_json(&result.id, r#"{"dryRun": true}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let outcome = api
            .apply_result_json(&result.id, r#"{"notes": "json"}"#)
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.assignments_created, 2);
        assert_eq!(repo.live_assignments().unwrap().len(), 2);
    }
}
