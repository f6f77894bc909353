// ==========================================
// 麻醉科排班引擎 - API 层
// ==========================================
// 职责: 提供业务 API 接口, 供外部服务层调用
// ==========================================

pub mod error;
pub mod simulation_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use simulation_api::{CreateScenarioRequest, SimulationApi};
