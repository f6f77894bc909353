// ==========================================
// 麻醉科排班引擎 - 场景运行器
// ==========================================
// 职责: 解析场景 → 分块规划 → 并行执行 → 合并 → 写回结果状态
// 状态机: PENDING → RUNNING → {COMPLETED, FAILED}
// 红线: 从不返回部分合并的 COMPLETED 结果
// 红线: 取消 ⇒ FAILED 且 errorMessage = "cancelled"
// ==========================================

use super::chunk::{plan_chunks, ChunkJob, ChunkStatistics};
use super::scheduler::ChunkScheduler;
use crate::config::engine_config::{EngineConfig, FatigueConfig};
use crate::domain::assignment::{CandidateAssignment, DateRange};
use crate::domain::simulation::{ScenarioParameters, SimulationResult, SimulationStatistics};
use crate::domain::supervision::SupervisionConstraintSet;
use crate::domain::types::SimulationStatus;
use crate::domain::violation::{sort_normalized, Violation};
use crate::engine::clock::Clock;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{OptionalNotifier, SimulationEvent, SimulationEventKind};
use crate::engine::projection::AssignmentProjector;
use crate::engine::registry::RuleRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// 一次运行的全部输入
pub struct RunPlan {
    pub result_id: String,
    pub scenario_id: String,
    pub params: Arc<ScenarioParameters>,
    /// 已应用场景覆写的注册表
    pub registry: Arc<RuleRegistry>,
    pub supervision: Arc<SupervisionConstraintSet>,
    pub projector: Arc<dyn AssignmentProjector>,
}

/// 合并后的运行输出
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub statistics: SimulationStatistics,
    pub conflict_alerts: Vec<Violation>,
    pub generated_planning_data: Vec<CandidateAssignment>,
    pub chunk_count: usize,
}

/// 场景运行器
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<EngineConfig>,
    fatigue_config: Arc<FatigueConfig>,
    notifier: OptionalNotifier,
    clock: Arc<dyn Clock>,
}

impl ScenarioRunner {
    pub fn new(config: Arc<EngineConfig>, notifier: OptionalNotifier, clock: Arc<dyn Clock>) -> Self {
        let fatigue_config = Arc::new(config.fatigue.clone());
        Self {
            config,
            fatigue_config,
            notifier,
            clock,
        }
    }

    /// 校验场景日期区间 (在分派任何分块之前)
    pub fn validate_range(&self, params: &ScenarioParameters) -> EngineResult<DateRange> {
        params.validate().map_err(EngineError::ValidationInput)?;
        let range = params.date_range();
        range
            .validate_span(self.config.simulation.max_span_days)
            .map_err(EngineError::ValidationInput)?;
        Ok(range)
    }

    /// 执行并合并全部分块
    #[instrument(skip(self, plan, cancel), fields(result_id = %plan.result_id))]
    pub async fn execute(
        &self,
        plan: &RunPlan,
        cancel: watch::Receiver<bool>,
    ) -> EngineResult<RunOutput> {
        let range = self.validate_range(&plan.params)?;
        let chunk_days = plan
            .params
            .options
            .chunk_days
            .unwrap_or(self.config.simulation.chunk_days);
        let tasks = plan_chunks(
            &range,
            chunk_days,
            self.config.simulation.chunking_threshold_days,
        );
        let chunk_count = tasks.len();
        info!(
            chunk_count,
            chunk_days,
            start = %range.start_date,
            end = %range.end_date,
            "开始分块模拟"
        );

        let job = Arc::new(ChunkJob {
            params: Arc::clone(&plan.params),
            registry: Arc::clone(&plan.registry),
            supervision: Arc::clone(&plan.supervision),
            fatigue_config: Arc::clone(&self.fatigue_config),
            coverage: plan.params.coverage_targets.unwrap_or(self.config.coverage),
            projector: Arc::clone(&plan.projector),
        });
        let scheduler = ChunkScheduler::new(
            self.config.simulation.effective_worker_count(),
            Duration::from_secs(self.config.simulation.run_timeout_secs),
        );

        let notifier = self.notifier.clone();
        let clock = Arc::clone(&self.clock);
        let (result_id, scenario_id) = (plan.result_id.clone(), plan.scenario_id.clone());
        let outputs = scheduler
            .run(job, tasks, cancel, move |completed, total| {
                notifier.publish(SimulationEvent::new(
                    result_id.clone(),
                    scenario_id.clone(),
                    SimulationEventKind::ChunkCompleted { completed, total },
                    clock.now(),
                ));
            })
            .await?;

        let mut merged = ChunkStatistics::default();
        let mut conflict_alerts = Vec::new();
        let mut generated_planning_data = Vec::new();
        for output in outputs {
            merged.merge(&output.statistics);
            conflict_alerts.extend(output.violations);
            generated_planning_data.extend(output.assignments);
        }
        sort_normalized(&mut conflict_alerts);
        generated_planning_data.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.staff_id.cmp(&b.staff_id))
                .then_with(|| a.start.cmp(&b.start))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(RunOutput {
            statistics: merged.finalize(&self.fatigue_config),
            conflict_alerts,
            generated_planning_data,
            chunk_count,
        })
    }

    /// 完整运行: RUNNING → 执行 → COMPLETED / FAILED
    ///
    /// # 参数
    /// - result: PENDING 状态的结果
    ///
    /// # 返回
    /// - 终态结果 (COMPLETED 或 FAILED)
    pub async fn run(
        &self,
        mut result: SimulationResult,
        plan: &RunPlan,
        cancel: watch::Receiver<bool>,
    ) -> SimulationResult {
        if let Err(e) = self.start(&mut result) {
            warn!(result_id = %result.id, error = %e, "结果状态不允许启动运行");
            return result;
        }
        let started = Instant::now();
        let outcome = self.execute(plan, cancel).await;
        self.finish(&mut result, outcome, started.elapsed());
        result
    }

    /// PENDING → RUNNING, 发布开始事件
    pub fn start(&self, result: &mut SimulationResult) -> EngineResult<()> {
        result
            .transition(SimulationStatus::Running)
            .map_err(|from| EngineError::InvalidStateTransition {
                from: from.to_string(),
                to: SimulationStatus::Running.to_string(),
            })?;
        info!(result_id = %result.id, scenario_id = %result.scenario_id, "模拟开始");
        self.publish(result, SimulationEventKind::Started);
        Ok(())
    }

    /// 将运行结果写回 SimulationResult 并发布事件
    pub fn finish(
        &self,
        result: &mut SimulationResult,
        outcome: EngineResult<RunOutput>,
        elapsed: Duration,
    ) {
        result.execution_time_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        result.completed_at = Some(self.clock.now());
        match outcome {
            Ok(output) if result.transition(SimulationStatus::Completed).is_ok() => {
                let total_violations = output.statistics.total_violations;
                info!(
                    result_id = %result.id,
                    chunks = output.chunk_count,
                    total_violations,
                    elapsed_ms = result.execution_time_ms,
                    "模拟完成"
                );
                result.statistics = Some(output.statistics);
                result.conflict_alerts = output.conflict_alerts;
                result.generated_planning_data = output.generated_planning_data;
                self.publish(result, SimulationEventKind::Completed { total_violations });
            }
            Ok(_) => {
                warn!(result_id = %result.id, status = %result.status, "结果状态不允许完成, 丢弃输出");
            }
            Err(error) => {
                let reason = error.to_string();
                warn!(result_id = %result.id, reason = %reason, "模拟失败");
                if result.transition(SimulationStatus::Failed).is_ok() {
                    result.statistics = None;
                    result.conflict_alerts.clear();
                    result.generated_planning_data.clear();
                    result.error_message = Some(reason.clone());
                    self.publish(result, SimulationEventKind::Failed { reason });
                }
            }
        }
    }

    fn publish(&self, result: &SimulationResult, kind: SimulationEventKind) {
        self.notifier.publish(SimulationEvent::new(
            result.id.clone(),
            result.scenario_id.clone(),
            kind,
            self.clock.now(),
        ));
    }
}
