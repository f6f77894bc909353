// ==========================================
// 麻醉科排班引擎 - 引擎编排器 (PlanningEngine)
// ==========================================
// 用途: 对外统一入口, 协调 注册表 / 疲劳账本 / 督导校验 / 场景运行 / 对比 / 应用
// ==========================================
// 职责: 场景与结果的内存存储 + 运行生命周期 (启动 / 取消) + 应用互斥
// 红线: 配置错误与输入错误同步返回调用方
// 红线: 运行与应用错误体现为终态 + 可读原因, 不出现静默部分成功
// 红线: 同一时刻只有一个应用在执行
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::domain::assignment::CandidateAssignment;
use crate::domain::simulation::{
    ApplyOptions, ApplyOutcome, ComparisonReport, ScenarioParameters, SimulationResult,
    SimulationScenario,
};
use crate::domain::types::SimulationStatus;
use crate::domain::violation::ViolationReport;
use crate::engine::apply::{ensure_applicable, ApplyPipeline};
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::comparison::compare;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluation::{evaluate, validate_input, EvaluationContext};
use crate::engine::events::{OptionalNotifier, SimulationEvent, SimulationEventKind};
use crate::engine::fatigue::FatigueLedger;
use crate::engine::loader::{load_registry, load_supervision};
use crate::engine::projection::{AssignmentProjector, SnapshotProjector};
use crate::engine::simulation::{RunPlan, ScenarioRunner};
use crate::repository::planning_repo::PlanningRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// EngineDeps - 引擎依赖
// ==========================================
pub struct EngineDeps {
    pub repository: Arc<dyn PlanningRepository>,
    pub config: EngineConfig,
    pub notifier: OptionalNotifier,
    pub clock: Arc<dyn Clock>,
    /// 外部投影算法 (None = 按仓储候选排班快照投影)
    pub projector: Option<Arc<dyn AssignmentProjector>>,
}

impl EngineDeps {
    pub fn new(repository: Arc<dyn PlanningRepository>, config: EngineConfig) -> Self {
        Self {
            repository,
            config,
            notifier: OptionalNotifier::none(),
            clock: Arc::new(SystemClock),
            projector: None,
        }
    }

    pub fn with_notifier(mut self, notifier: OptionalNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_projector(mut self, projector: Arc<dyn AssignmentProjector>) -> Self {
        self.projector = Some(projector);
        self
    }
}

struct EngineInner {
    repository: Arc<dyn PlanningRepository>,
    config: Arc<EngineConfig>,
    runner: ScenarioRunner,
    apply: ApplyPipeline,
    notifier: OptionalNotifier,
    clock: Arc<dyn Clock>,
    projector: Option<Arc<dyn AssignmentProjector>>,
    scenarios: RwLock<HashMap<String, SimulationScenario>>,
    results: RwLock<HashMap<String, SimulationResult>>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    apply_lock: Mutex<()>,
}

// ==========================================
// PlanningEngine - 引擎门面
// ==========================================
#[derive(Clone)]
pub struct PlanningEngine {
    inner: Arc<EngineInner>,
}

impl PlanningEngine {
    /// 启动引擎: 校验配置并预加载全局规则 (非法规则在此处即失败)
    pub async fn bootstrap(deps: EngineDeps) -> EngineResult<Self> {
        deps.config
            .validate()
            .map_err(|message| EngineError::InvalidConfig {
                key: "engine".to_string(),
                message,
            })?;
        let global = load_registry(deps.repository.as_ref(), &[], None).await?;
        info!(global_rules = global.len(), "排班引擎启动");

        let config = Arc::new(deps.config);
        let runner = ScenarioRunner::new(
            Arc::clone(&config),
            deps.notifier.clone(),
            Arc::clone(&deps.clock),
        );
        let apply = ApplyPipeline::new(
            Arc::clone(&deps.repository),
            Arc::new(config.fatigue.clone()),
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                repository: deps.repository,
                config,
                runner,
                apply,
                notifier: deps.notifier,
                clock: deps.clock,
                projector: deps.projector,
                scenarios: RwLock::new(HashMap::new()),
                results: RwLock::new(HashMap::new()),
                cancels: Mutex::new(HashMap::new()),
                apply_lock: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ==========================================
    // 场景
    // ==========================================

    /// 创建模拟场景
    ///
    /// # 返回
    /// - Ok(scenario_id)
    /// - Err(ValidationInput): 日期区间非法
    #[instrument(skip(self, parameters))]
    pub async fn create_scenario(
        &self,
        name: &str,
        description: Option<String>,
        parameters: ScenarioParameters,
        created_by: &str,
    ) -> EngineResult<String> {
        if name.trim().is_empty() {
            return Err(EngineError::ValidationInput("场景名称不能为空".to_string()));
        }
        self.inner.runner.validate_range(&parameters)?;
        let scenario = SimulationScenario {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            parameters,
            created_by: created_by.to_string(),
            created_at: self.inner.clock.now(),
        };
        let id = scenario.id.clone();
        self.inner
            .scenarios
            .write()
            .await
            .insert(id.clone(), scenario);
        info!(scenario_id = %id, "模拟场景已创建");
        Ok(id)
    }

    pub async fn get_scenario(&self, scenario_id: &str) -> EngineResult<SimulationScenario> {
        self.inner
            .scenarios
            .read()
            .await
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("SimulationScenario", scenario_id))
    }

    // ==========================================
    // 运行
    // ==========================================

    /// 异步运行场景, 立即返回结果ID (调用方轮询 get_result)
    #[instrument(skip(self))]
    pub async fn run_scenario(&self, scenario_id: &str) -> EngineResult<String> {
        let (result, plan, cancel) = self.prepare_run(scenario_id).await?;
        let result_id = result.id.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(result, plan, cancel).await;
        });
        Ok(result_id)
    }

    /// 同步运行场景直至终态
    #[instrument(skip(self))]
    pub async fn run_scenario_to_completion(
        &self,
        scenario_id: &str,
    ) -> EngineResult<SimulationResult> {
        let (result, plan, cancel) = self.prepare_run(scenario_id).await?;
        Ok(self.drive(result, plan, cancel).await)
    }

    /// 运行前的同步准备: 校验区间 → 加载候选排班 / 规则 / 督导约束 → 建立 PENDING 结果
    async fn prepare_run(
        &self,
        scenario_id: &str,
    ) -> EngineResult<(SimulationResult, RunPlan, watch::Receiver<bool>)> {
        let scenario = self.get_scenario(scenario_id).await?;
        let params = scenario.parameters;
        let range = self.inner.runner.validate_range(&params)?;

        let repository = self.inner.repository.as_ref();
        let candidates = repository.load_candidate_assignments(&range).await?;
        let registry = load_registry(repository, &candidates, params.site_id.as_deref())
            .await?
            .with_overrides(&params.rule_overrides, &params.included_rule_ids)?;
        let supervision = load_supervision(repository, &candidates).await?;
        let projector: Arc<dyn AssignmentProjector> = match &self.inner.projector {
            Some(projector) => Arc::clone(projector),
            None => Arc::new(SnapshotProjector::new(candidates)),
        };

        let result = SimulationResult::pending(
            Uuid::new_v4().to_string(),
            scenario.id.clone(),
            range,
            self.inner.clock.now(),
        );
        let plan = RunPlan {
            result_id: result.id.clone(),
            scenario_id: scenario.id,
            params: Arc::new(params),
            registry: Arc::new(registry),
            supervision: Arc::new(supervision),
            projector,
        };
        let (tx, rx) = watch::channel(false);
        self.inner
            .cancels
            .lock()
            .await
            .insert(result.id.clone(), tx);
        self.store(result.clone()).await;
        Ok((result, plan, rx))
    }

    /// 推进状态机: RUNNING → 执行 → COMPLETED / FAILED
    async fn drive(
        &self,
        mut result: SimulationResult,
        plan: RunPlan,
        cancel: watch::Receiver<bool>,
    ) -> SimulationResult {
        let runner = &self.inner.runner;
        if let Err(e) = runner.start(&mut result) {
            warn!(result_id = %result.id, error = %e, "无法启动模拟");
            self.inner.cancels.lock().await.remove(&result.id);
            return result;
        }
        self.store(result.clone()).await;

        let started = Instant::now();
        let outcome = runner.execute(&plan, cancel).await;
        runner.finish(&mut result, outcome, started.elapsed());

        self.inner.cancels.lock().await.remove(&result.id);
        self.store(result.clone()).await;
        result
    }

    async fn store(&self, result: SimulationResult) {
        self.inner
            .results
            .write()
            .await
            .insert(result.id.clone(), result);
    }

    pub async fn get_result(&self, result_id: &str) -> EngineResult<SimulationResult> {
        self.inner
            .results
            .read()
            .await
            .get(result_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("SimulationResult", result_id))
    }

    /// 取消运行中的模拟 (结果转为 FAILED, errorMessage = "cancelled")
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, result_id: &str) -> EngineResult<()> {
        let result = self.get_result(result_id).await?;
        let cancels = self.inner.cancels.lock().await;
        let Some(sender) = cancels.get(result_id) else {
            return Err(EngineError::InvalidStateTransition {
                from: result.status.to_string(),
                to: SimulationStatus::Failed.to_string(),
            });
        };
        // 接收端已结束说明运行刚好完成, 取消无效果
        if sender.send(true).is_err() {
            warn!(result_id, "取消信号未送达, 运行已结束");
        } else {
            info!(result_id, "已请求取消模拟");
        }
        Ok(())
    }

    // ==========================================
    // 对比 / 应用
    // ==========================================

    /// 对比两个结果, 报告同时写入结果 B 的 comparison_data
    #[instrument(skip(self))]
    pub async fn compare_results(
        &self,
        result_a_id: &str,
        result_b_id: &str,
    ) -> EngineResult<ComparisonReport> {
        let a = self.get_result(result_a_id).await?;
        let b = self.get_result(result_b_id).await?;
        let report = compare(&a, &b, self.inner.clock.now())?;

        let mut results = self.inner.results.write().await;
        if let Some(stored) = results.get_mut(result_b_id) {
            stored.comparison_data = Some(report.clone());
        }
        Ok(report)
    }

    /// 应用模拟结果到实际排班
    ///
    /// # 返回
    /// - Ok(ApplyOutcome): 已写入, 结果转为 APPLIED
    /// - Err(StaleScheduleConflict): 新冲突清单, 零写入
    /// - Err(AlreadyApplied): 重复应用
    #[instrument(skip(self, options))]
    pub async fn apply_result(
        &self,
        result_id: &str,
        options: ApplyOptions,
    ) -> EngineResult<ApplyOutcome> {
        let _guard = self.inner.apply_lock.lock().await;
        let result = self.get_result(result_id).await?;
        ensure_applicable(&result)?;
        let scenario = self.get_scenario(&result.scenario_id).await?;

        let outcome = self
            .inner
            .apply
            .apply(&result, &options, &scenario.parameters)
            .await?;

        let applied_at = self.inner.clock.now();
        {
            let mut results = self.inner.results.write().await;
            let stored = results
                .get_mut(result_id)
                .ok_or_else(|| EngineError::not_found("SimulationResult", result_id))?;
            stored
                .transition(SimulationStatus::Applied)
                .map_err(|from| EngineError::InvalidStateTransition {
                    from: from.to_string(),
                    to: SimulationStatus::Applied.to_string(),
                })?;
            stored.applied_at = Some(applied_at);
            stored.applied_by = options.applied_by.clone();
            stored.apply_notes = options.notes.clone();
        }
        info!(
            result_id,
            created = outcome.assignments_created,
            updated = outcome.assignments_updated,
            "模拟结果已应用"
        );

        self.inner.notifier.publish_detached(SimulationEvent::new(
            result_id,
            result.scenario_id,
            SimulationEventKind::Applied {
                assignments_created: outcome.assignments_created,
                assignments_updated: outcome.assignments_updated,
            },
            applied_at,
        ));
        Ok(outcome)
    }

    // ==========================================
    // 直接校验
    // ==========================================

    /// 校验调用方提供的排班集合 (不经过模拟)
    #[instrument(skip(self, assignments), fields(count = assignments.len()))]
    pub async fn validate_assignments(
        &self,
        assignments: Vec<CandidateAssignment>,
    ) -> EngineResult<ViolationReport> {
        validate_input(&assignments)?;
        let repository = self.inner.repository.as_ref();
        let registry = load_registry(repository, &assignments, None).await?;
        let supervision = load_supervision(repository, &assignments).await?;
        let fatigue_config = Arc::new(self.inner.config.fatigue.clone());
        let snapshot = FatigueLedger::from_assignments(fatigue_config, assignments.iter()).snapshot();
        let ctx = EvaluationContext {
            registry: &registry,
            fatigue: &snapshot,
            supervision: &supervision,
        };
        Ok(evaluate(&assignments, ctx, self.inner.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{RuleConfig, RuleScope};
    use crate::domain::types::{RuleKindTag, ShiftKind, StaffRole};
    use crate::repository::memory_repo::InMemoryPlanningRepository;
    use chrono::NaiveDate;
    use serde_json::json;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn shift(id: &str, staff: &str, day: u32, room: &str) -> CandidateAssignment {
        CandidateAssignment {
            id: id.to_string(),
            staff_id: staff.to_string(),
            role: StaffRole::Mar,
            date: d(day),
            room_id: Some(room.to_string()),
            sector_id: Some("STANDARD".to_string()),
            site_id: None,
            shift_kind: ShiftKind::Morning,
            start: d(day).and_hms_opt(8, 0, 0).unwrap(),
            end: d(day).and_hms_opt(13, 0, 0).unwrap(),
        }
    }

    async fn engine(repo: Arc<InMemoryPlanningRepository>) -> PlanningEngine {
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
        PlanningEngine::bootstrap(EngineDeps::new(repo, EngineConfig::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_validate_assignments() {
        let repo = Arc::new(InMemoryPlanningRepository::new());
        let engine = engine(repo).await;
        let report = engine
            .validate_assignments(vec![
                shift("A1", "MAR1", 2, "A"),
                shift("B1", "MAR1", 2, "B"),
                shift("C1", "MAR1", 2, "C"),
            ])
            .await
            .unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].affected_assignment_ids, vec!["C1"]);
    }

    #[tokio::test]
    async fn test_create_scenario_rejects_bad_range() {
        let repo = Arc::new(InMemoryPlanningRepository::new());
        let engine = engine(repo).await;
        let err = engine
            .create_scenario("bad", None, ScenarioParameters::new(d(14), d(1)), "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationInput(_)));
    }

    #[tokio::test]
    async fn test_run_and_apply_lifecycle() {
        let repo = Arc::new(InMemoryPlanningRepository::new());
        repo.add_candidate_assignments(vec![shift("A1", "MAR1", 2, "A"), shift("B1", "MAR2", 3, "B")])
            .unwrap();
        let engine = engine(Arc::clone(&repo)).await;
        let scenario_id = engine
            .create_scenario("base", None, ScenarioParameters::new(d(1), d(7)), "tester")
            .await
            .unwrap();

        let result = engine.run_scenario_to_completion(&scenario_id).await.unwrap();
        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(result.generated_planning_data.len(), 2);

        let outcome = engine
            .apply_result(&result.id, ApplyOptions::default())
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.assignments_created, 2);
        assert_eq!(
            engine.get_result(&result.id).await.unwrap().status,
            SimulationStatus::Applied
        );

        let again = engine.apply_result(&result.id, ApplyOptions::default()).await;
        assert!(matches!(again, Err(EngineError::AlreadyApplied { .. })));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let repo = Arc::new(InMemoryPlanningRepository::new());
        let engine = engine(repo).await;
        assert!(matches!(
            engine.get_result("missing").await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(engine.run_scenario("missing").await.is_err());
    }
}
