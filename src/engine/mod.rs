// ==========================================
// 麻醉科排班引擎 - 引擎层
// ==========================================
// 职责: 规则注册 / 约束评估 / 疲劳账本 / 督导校验 / 场景模拟 / 对比 / 应用
// 红线: Engine 不拼 SQL, 所有违规必须输出可读原因
// ==========================================

pub mod apply;
pub mod checkers;
pub mod clock;
pub mod comparison;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod fatigue;
pub mod loader;
pub mod orchestrator;
pub mod projection;
pub mod registry;
pub mod simulation;
pub mod supervision;

// 重导出核心引擎
pub use apply::{ApplyPipeline, PreparedApply};
pub use clock::{Clock, FixedClock, SystemClock};
pub use comparison::compare;
pub use error::{CheckerRuntimeError, EngineError, EngineResult};
pub use evaluation::{collect_violations, evaluate, validate_input, EvaluationContext};
pub use events::{
    NoOpNotifier, OptionalNotifier, SimulationEvent, SimulationEventKind, SimulationNotifier,
};
pub use fatigue::{FatigueLedger, FatigueSnapshot};
pub use orchestrator::{EngineDeps, PlanningEngine};
pub use projection::{AssignmentProjector, SnapshotProjector};
pub use registry::RuleRegistry;
pub use simulation::{ChunkScheduler, RunOutput, RunPlan, ScenarioRunner};
