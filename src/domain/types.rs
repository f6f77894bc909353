// ==========================================
// 麻醉科排班引擎 - 领域类型定义
// ==========================================
// 职责: 规则种类 / 严重度 / 班次 / 休息 / 时段 / 角色 / 疲劳等级 / 模拟状态
// 序列化格式: SCREAMING_SNAKE_CASE (与外部接口一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 违规严重度 (Severity)
// ==========================================
// 顺序: Info < Warning < Error (用于去重时取最高严重度)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,    // 提示
    Warning, // 警告
    Error,   // 错误 (阻断)
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

// ==========================================
// 规则种类标签 (Rule Kind)
// ==========================================
// 仅作为索引键使用; 具体参数见 domain::rule::RuleKind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKindTag {
    RestPeriod,
    MaxConsecutive,
    SupervisionCapacity,
    Incompatibility,
    FatigueThreshold,
    Custom,
}

impl RuleKindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKindTag::RestPeriod => "REST_PERIOD",
            RuleKindTag::MaxConsecutive => "MAX_CONSECUTIVE",
            RuleKindTag::SupervisionCapacity => "SUPERVISION_CAPACITY",
            RuleKindTag::Incompatibility => "INCOMPATIBILITY",
            RuleKindTag::FatigueThreshold => "FATIGUE_THRESHOLD",
            RuleKindTag::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for RuleKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RuleKindTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "REST_PERIOD" => Ok(RuleKindTag::RestPeriod),
            "MAX_CONSECUTIVE" => Ok(RuleKindTag::MaxConsecutive),
            "SUPERVISION_CAPACITY" => Ok(RuleKindTag::SupervisionCapacity),
            "INCOMPATIBILITY" => Ok(RuleKindTag::Incompatibility),
            "FATIGUE_THRESHOLD" => Ok(RuleKindTag::FatigueThreshold),
            "CUSTOM" => Ok(RuleKindTag::Custom),
            other => Err(format!("未知规则种类: {}", other)),
        }
    }
}

// ==========================================
// 时段 (Period)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    Morning,   // 上午
    Afternoon, // 下午
    Night,     // 夜间
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Morning => write!(f, "MORNING"),
            Period::Afternoon => write!(f, "AFTERNOON"),
            Period::Night => write!(f, "NIGHT"),
        }
    }
}

// ==========================================
// 休息类型 (Rest Kind)
// ==========================================
// 疲劳恢复只发生在显式标记为休息的日期
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestKind {
    DayOff,     // 全天休息
    HalfDayOff, // 半天休息
    Leave,      // 休假
}

impl RestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestKind::DayOff => "DAY_OFF",
            RestKind::HalfDayOff => "HALF_DAY_OFF",
            RestKind::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for RestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DAY_OFF" => Ok(RestKind::DayOff),
            "HALF_DAY_OFF" => Ok(RestKind::HalfDayOff),
            "LEAVE" => Ok(RestKind::Leave),
            other => Err(format!("未知休息类型: {}", other)),
        }
    }
}

// ==========================================
// 班次类型 (Shift Kind)
// ==========================================
// 工作班次 + 休息标记共用一个枚举, 与候选排班条目一一对应
// Garde = 院内值班, Astreinte = 院外待命
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftKind {
    Morning,
    Afternoon,
    FullDay,
    Night,
    Garde,
    Astreinte,
    Consultation,
    DayOff,
    HalfDayOff,
    Leave,
}

impl ShiftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftKind::Morning => "MORNING",
            ShiftKind::Afternoon => "AFTERNOON",
            ShiftKind::FullDay => "FULL_DAY",
            ShiftKind::Night => "NIGHT",
            ShiftKind::Garde => "GARDE",
            ShiftKind::Astreinte => "ASTREINTE",
            ShiftKind::Consultation => "CONSULTATION",
            ShiftKind::DayOff => "DAY_OFF",
            ShiftKind::HalfDayOff => "HALF_DAY_OFF",
            ShiftKind::Leave => "LEAVE",
        }
    }

    /// 对应的休息类型 (工作班次返回 None)
    pub fn rest_kind(&self) -> Option<RestKind> {
        match self {
            ShiftKind::DayOff => Some(RestKind::DayOff),
            ShiftKind::HalfDayOff => Some(RestKind::HalfDayOff),
            ShiftKind::Leave => Some(RestKind::Leave),
            _ => None,
        }
    }

    pub fn is_rest(&self) -> bool {
        self.rest_kind().is_some()
    }

    pub fn is_working(&self) -> bool {
        !self.is_rest()
    }

    /// 值班/待命类班次 (应用模拟结果时可选择排除)
    pub fn is_on_call(&self) -> bool {
        matches!(self, ShiftKind::Garde | ShiftKind::Astreinte)
    }

    /// 班次覆盖的时段
    ///
    /// 院外待命不占用手术间时段, 因此不参与同时覆盖检查
    pub fn periods(&self) -> &'static [Period] {
        match self {
            ShiftKind::Morning | ShiftKind::Consultation => &[Period::Morning],
            ShiftKind::Afternoon => &[Period::Afternoon],
            ShiftKind::FullDay => &[Period::Morning, Period::Afternoon],
            ShiftKind::Night => &[Period::Night],
            ShiftKind::Garde => &[Period::Morning, Period::Afternoon, Period::Night],
            ShiftKind::Astreinte
            | ShiftKind::DayOff
            | ShiftKind::HalfDayOff
            | ShiftKind::Leave => &[],
        }
    }
}

impl fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ShiftKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MORNING" => Ok(ShiftKind::Morning),
            "AFTERNOON" => Ok(ShiftKind::Afternoon),
            "FULL_DAY" => Ok(ShiftKind::FullDay),
            "NIGHT" => Ok(ShiftKind::Night),
            "GARDE" => Ok(ShiftKind::Garde),
            "ASTREINTE" => Ok(ShiftKind::Astreinte),
            "CONSULTATION" => Ok(ShiftKind::Consultation),
            "DAY_OFF" => Ok(ShiftKind::DayOff),
            "HALF_DAY_OFF" => Ok(ShiftKind::HalfDayOff),
            "LEAVE" => Ok(ShiftKind::Leave),
            other => Err(format!("未知班次类型: {}", other)),
        }
    }
}

// ==========================================
// 人员角色 (Staff Role)
// ==========================================
// MAR = 麻醉医师 (可同时督导多个手术间), IADE = 麻醉护士
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    #[default]
    Mar,
    Iade,
    Other,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Mar => "MAR",
            StaffRole::Iade => "IADE",
            StaffRole::Other => "OTHER",
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MAR" => Ok(StaffRole::Mar),
            "IADE" => Ok(StaffRole::Iade),
            "OTHER" => Ok(StaffRole::Other),
            other => Err(format!("未知人员角色: {}", other)),
        }
    }
}

// ==========================================
// 疲劳等级 (Fatigue Level)
// ==========================================
// 顺序: Normal < Alert < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FatigueLevel {
    Normal,   // 正常
    Alert,    // 预警
    Critical, // 危险
}

impl fmt::Display for FatigueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatigueLevel::Normal => write!(f, "NORMAL"),
            FatigueLevel::Alert => write!(f, "ALERT"),
            FatigueLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ==========================================
// 模拟结果状态 (Simulation Status)
// ==========================================
// 状态机: PENDING → RUNNING → {COMPLETED, FAILED}; COMPLETED → APPLIED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Applied,
}

impl SimulationStatus {
    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: SimulationStatus) -> bool {
        use SimulationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, Applied)
        )
    }

    /// 终态 (FAILED / APPLIED 不可再变化; COMPLETED 仅可转 APPLIED)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulationStatus::Completed | SimulationStatus::Failed | SimulationStatus::Applied
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Pending => "PENDING",
            SimulationStatus::Running => "RUNNING",
            SimulationStatus::Completed => "COMPLETED",
            SimulationStatus::Failed => "FAILED",
            SimulationStatus::Applied => "APPLIED",
        }
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
