// ==========================================
// 麻醉科排班引擎 - 引擎配置结构
// ==========================================
// 职责: 模拟 / 疲劳 / 覆盖目标三段配置, 边界处强类型校验
// 红线: 拒绝未知字段, 校验失败即 ConfigurationError
// ==========================================

use crate::domain::simulation::CoverageTargets;
use crate::domain::types::{RestKind, ShiftKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// SimulationConfig - 模拟运行参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SimulationConfig {
    /// 分块天数 (默认按周)
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
    /// 区间天数超过此值才分块
    #[serde(default = "default_chunking_threshold_days")]
    pub chunking_threshold_days: u32,
    #[serde(default = "default_max_span_days")]
    pub max_span_days: u32,
    /// 0 = 按可用 CPU 并行度
    #[serde(default)]
    pub worker_count: usize,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_chunk_days() -> u32 {
    7
}

fn default_chunking_threshold_days() -> u32 {
    7
}

fn default_max_span_days() -> u32 {
    90
}

fn default_run_timeout_secs() -> u64 {
    120
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chunk_days: default_chunk_days(),
            chunking_threshold_days: default_chunking_threshold_days(),
            max_span_days: default_max_span_days(),
            worker_count: 0,
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl SimulationConfig {
    /// 实际使用的工作线程数
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_days == 0 {
            return Err("simulation.chunkDays 必须大于 0".to_string());
        }
        if self.max_span_days == 0 {
            return Err("simulation.maxSpanDays 必须大于 0".to_string());
        }
        if self.run_timeout_secs == 0 {
            return Err("simulation.runTimeoutSecs 必须大于 0".to_string());
        }
        Ok(())
    }
}

// ==========================================
// FatigueConfig - 疲劳积分配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FatigueConfig {
    /// 班次积分 (未列出的班次为 0)
    #[serde(default = "default_shift_points")]
    pub shift_points: BTreeMap<ShiftKind, f64>,
    /// 休息恢复积分
    #[serde(default = "default_recovery_points")]
    pub recovery_points: BTreeMap<RestKind, f64>,
    /// 同一时段督导两个及以上手术间的附加积分
    #[serde(default = "default_supervision_multiple_points")]
    pub supervision_multiple_points: f64,
    /// 高负荷扇区附加积分 (按扇区ID)
    #[serde(default = "default_sector_points")]
    pub sector_points: BTreeMap<String, f64>,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_weight")]
    pub weight_equity: f64,
    #[serde(default = "default_weight")]
    pub weight_fatigue: f64,
}

fn default_shift_points() -> BTreeMap<ShiftKind, f64> {
    BTreeMap::from([(ShiftKind::Garde, 30.0), (ShiftKind::Astreinte, 10.0)])
}

fn default_recovery_points() -> BTreeMap<RestKind, f64> {
    BTreeMap::from([
        (RestKind::DayOff, 15.0),
        (RestKind::HalfDayOff, 8.0),
        (RestKind::Leave, 15.0),
    ])
}

fn default_supervision_multiple_points() -> f64 {
    15.0
}

fn default_sector_points() -> BTreeMap<String, f64> {
    BTreeMap::from([("PEDIATRIE".to_string(), 10.0)])
}

fn default_alert_threshold() -> f64 {
    50.0
}

fn default_critical_threshold() -> f64 {
    80.0
}

fn default_weight() -> f64 {
    0.5
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            shift_points: default_shift_points(),
            recovery_points: default_recovery_points(),
            supervision_multiple_points: default_supervision_multiple_points(),
            sector_points: default_sector_points(),
            alert_threshold: default_alert_threshold(),
            critical_threshold: default_critical_threshold(),
            weight_equity: default_weight(),
            weight_fatigue: default_weight(),
        }
    }
}

impl FatigueConfig {
    pub fn points_for(&self, shift_kind: ShiftKind) -> f64 {
        self.shift_points.get(&shift_kind).copied().unwrap_or(0.0)
    }

    pub fn recovery_for(&self, rest_kind: RestKind) -> f64 {
        self.recovery_points.get(&rest_kind).copied().unwrap_or(0.0)
    }

    pub fn sector_points_for(&self, sector_id: &str) -> f64 {
        self.sector_points.get(sector_id).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        let all_points = self
            .shift_points
            .values()
            .chain(self.recovery_points.values())
            .chain(self.sector_points.values())
            .chain(std::iter::once(&self.supervision_multiple_points));
        for p in all_points {
            if !p.is_finite() || *p < 0.0 {
                return Err(format!("疲劳积分必须为非负有限数: {}", p));
            }
        }
        if let Some((kind, _)) = self.shift_points.iter().find(|(k, _)| k.is_rest()) {
            return Err(format!("shiftPoints 不能包含休息类型: {}", kind));
        }
        if !(self.alert_threshold > 0.0 && self.alert_threshold < self.critical_threshold) {
            return Err(format!(
                "疲劳阈值无效: alert={} critical={} (要求 0 < alert < critical)",
                self.alert_threshold, self.critical_threshold
            ));
        }
        if self.weight_equity < 0.0 || self.weight_fatigue < 0.0 {
            return Err("equity/fatigue 权重不能为负".to_string());
        }
        Ok(())
    }
}

// ==========================================
// EngineConfig - 引擎总配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub fatigue: FatigueConfig,
    #[serde(default)]
    pub coverage: CoverageTargets,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.simulation.validate()?;
        self.fatigue.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_department_template() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fatigue.points_for(ShiftKind::Garde), 30.0);
        assert_eq!(config.fatigue.points_for(ShiftKind::Astreinte), 10.0);
        assert_eq!(config.fatigue.points_for(ShiftKind::Morning), 0.0);
        assert_eq!(config.fatigue.recovery_for(RestKind::HalfDayOff), 8.0);
        assert_eq!(config.simulation.chunk_days, 7);
        assert_eq!(config.simulation.max_span_days, 90);
        assert!(config.simulation.effective_worker_count() >= 1);
    }

    #[test]
    fn test_fatigue_config_rejects_unknown_fields() {
        let raw = r#"{"alertThreshold": 40, "criticalThreshold": 70, "decayPerDay": 2}"#;
        assert!(serde_json::from_str::<FatigueConfig>(raw).is_err());

        let ok: FatigueConfig =
            serde_json::from_str(r#"{"alertThreshold": 40, "criticalThreshold": 70}"#).unwrap();
        assert_eq!(ok.alert_threshold, 40.0);
        assert_eq!(ok.points_for(ShiftKind::Garde), 30.0);
    }

    #[test]
    fn test_fatigue_thresholds_validated() {
        let mut config = FatigueConfig::default();
        config.alert_threshold = 90.0;
        assert!(config.validate().is_err());

        let mut config = FatigueConfig::default();
        config.shift_points.insert(ShiftKind::DayOff, 5.0);
        assert!(config.validate().is_err());
    }
}
