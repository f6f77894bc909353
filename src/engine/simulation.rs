// ==========================================
// 麻醉科排班引擎 - 场景模拟
// ==========================================
// 红线: 分块结果与切分方式无关 (1 块 / 2 块 / 7 块合并结果一致)
// 红线: 规则注册表与督导约束在并发分块间只读共享
// ==========================================
// 职责: 分块规划 + 有界并行调度 + 结果合并 + 状态机推进
// 输入: 场景参数 + 场景注册表 + 督导约束 + 候选排班投影
// 输出: SimulationResult (COMPLETED / FAILED)
// ==========================================

mod chunk;
mod runner;
mod scheduler;

pub use chunk::{plan_chunks, run_chunk, ChunkJob, ChunkOutput, ChunkStatistics, ChunkTask};
pub use runner::{RunOutput, RunPlan, ScenarioRunner};
pub use scheduler::ChunkScheduler;
