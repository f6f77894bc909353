// ==========================================
// 麻醉科排班引擎 - 规则领域模型
// ==========================================
// 职责: 规则配置信封 + 按种类分型的参数 + 不可变规则值对象
// 红线: 规则加载后不可变, 新修订 = 新 Rule 实例
// ==========================================

use crate::domain::assignment::CandidateAssignment;
use crate::domain::types::{RuleKindTag, Severity, ShiftKind, StaffRole};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// RuleScope - 规则作用范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    #[default]
    Global,
    Site(String),
    Sector(String),
}

impl RuleScope {
    /// 判断排班条目是否落在本作用范围内
    pub fn covers(&self, assignment: &CandidateAssignment) -> bool {
        match self {
            RuleScope::Global => true,
            RuleScope::Site(site_id) => assignment.site_id.as_deref() == Some(site_id.as_str()),
            RuleScope::Sector(sector_id) => {
                assignment.sector_id.as_deref() == Some(sector_id.as_str())
            }
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            RuleScope::Global => "GLOBAL",
            RuleScope::Site(_) => "SITE",
            RuleScope::Sector(_) => "SECTOR",
        }
    }

    pub fn scope_id(&self) -> Option<&str> {
        match self {
            RuleScope::Global => None,
            RuleScope::Site(id) | RuleScope::Sector(id) => Some(id.as_str()),
        }
    }

    /// 从存储格式还原 (type + 可选 id)
    pub fn from_parts(scope_type: &str, scope_id: Option<String>) -> Result<Self, String> {
        match (scope_type.trim().to_uppercase().as_str(), scope_id) {
            ("GLOBAL", _) => Ok(RuleScope::Global),
            ("SITE", Some(id)) => Ok(RuleScope::Site(id)),
            ("SECTOR", Some(id)) => Ok(RuleScope::Sector(id)),
            (other, id) => Err(format!("无效的规则作用范围: type={}, id={:?}", other, id)),
        }
    }
}

// ==========================================
// RuleConfig - 规则配置信封 (外部输入)
// ==========================================
// parameters 在加载时按 kind 解析为强类型参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleConfig {
    pub id: String,
    pub kind: RuleKindTag,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_revision")]
    pub revision: u32,
    #[serde(default = "empty_object")]
    pub parameters: JsonValue,
}

/// 场景级规则覆写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleOverride {
    pub rule_id: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// 浅合并到原参数对象上
    #[serde(default)]
    pub parameters: Option<JsonValue>,
}

fn default_true() -> bool {
    true
}

fn default_revision() -> u32 {
    1
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

fn severity_error() -> Severity {
    Severity::Error
}

fn severity_warning() -> Severity {
    Severity::Warning
}

// ==========================================
// 各种类的强类型参数
// ==========================================

/// 最小休息间隔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RestPeriodParams {
    #[serde(default = "default_min_rest_hours")]
    pub min_rest_hours: f64,
    /// 仅在这些班次之后检查 (空 = 所有工作班次)
    #[serde(default)]
    pub after_shift_kinds: Vec<ShiftKind>,
    #[serde(default = "severity_error")]
    pub severity: Severity,
}

fn default_min_rest_hours() -> f64 {
    11.0
}

/// 最大连续工作天数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MaxConsecutiveParams {
    #[serde(default = "default_max_days")]
    pub max_days: u32,
    #[serde(default = "severity_warning")]
    pub severity: Severity,
}

fn default_max_days() -> u32 {
    6
}

/// 督导容量 (扇区默认值, 扇区约束可覆盖)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupervisionParams {
    pub max_rooms_per_supervisor: u32,
    #[serde(default)]
    pub exceptional_max: Option<u32>,
    #[serde(default = "default_supervisor_roles")]
    pub supervisor_roles: Vec<StaffRole>,
}

fn default_supervisor_roles() -> Vec<StaffRole> {
    vec![StaffRole::Mar]
}

/// 人员互斥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IncompatibilityParams {
    pub staff_pairs: Vec<(String, String)>,
    /// true: 仅同一手术间互斥; false: 同一扇区即互斥
    #[serde(default)]
    pub same_room_only: bool,
    #[serde(default = "severity_warning")]
    pub severity: Severity,
}

/// 疲劳阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FatigueThresholdParams {
    #[serde(default = "severity_warning")]
    pub alert_severity: Severity,
    #[serde(default = "severity_error")]
    pub critical_severity: Severity,
}

impl Default for FatigueThresholdParams {
    fn default() -> Self {
        Self {
            alert_severity: Severity::Warning,
            critical_severity: Severity::Error,
        }
    }
}

/// 自定义规则可引用的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomField {
    StaffId,
    Role,
    RoomId,
    SectorId,
    SiteId,
    ShiftKind,
    DurationHours,
    Weekday,
}

/// 自定义规则比较运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    In,
}

/// 自定义规则: 条件成立即违规
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomParams {
    pub field: CustomField,
    pub operator: CustomOperator,
    pub value: JsonValue,
    #[serde(default = "severity_warning")]
    pub severity: Severity,
    #[serde(default)]
    pub message: Option<String>,
}

// ==========================================
// RuleKind - 规则种类 (带参数的和类型)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    RestPeriod(RestPeriodParams),
    MaxConsecutive(MaxConsecutiveParams),
    SupervisionCapacity(SupervisionParams),
    Incompatibility(IncompatibilityParams),
    FatigueThreshold(FatigueThresholdParams),
    Custom(CustomParams),
}

impl RuleKind {
    /// 按种类解析并校验参数
    pub fn parse(tag: RuleKindTag, parameters: &JsonValue) -> Result<Self, String> {
        let kind = match tag {
            RuleKindTag::RestPeriod => RuleKind::RestPeriod(from_params(parameters)?),
            RuleKindTag::MaxConsecutive => RuleKind::MaxConsecutive(from_params(parameters)?),
            RuleKindTag::SupervisionCapacity => {
                RuleKind::SupervisionCapacity(from_params(parameters)?)
            }
            RuleKindTag::Incompatibility => RuleKind::Incompatibility(from_params(parameters)?),
            RuleKindTag::FatigueThreshold => RuleKind::FatigueThreshold(from_params(parameters)?),
            RuleKindTag::Custom => RuleKind::Custom(from_params(parameters)?),
        };
        kind.validate()?;
        Ok(kind)
    }

    pub fn tag(&self) -> RuleKindTag {
        match self {
            RuleKind::RestPeriod(_) => RuleKindTag::RestPeriod,
            RuleKind::MaxConsecutive(_) => RuleKindTag::MaxConsecutive,
            RuleKind::SupervisionCapacity(_) => RuleKindTag::SupervisionCapacity,
            RuleKind::Incompatibility(_) => RuleKindTag::Incompatibility,
            RuleKind::FatigueThreshold(_) => RuleKindTag::FatigueThreshold,
            RuleKind::Custom(_) => RuleKindTag::Custom,
        }
    }

    /// 参数序列化回 JSON (覆写合并时使用)
    pub fn parameters_json(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            RuleKind::RestPeriod(p) => serde_json::to_value(p),
            RuleKind::MaxConsecutive(p) => serde_json::to_value(p),
            RuleKind::SupervisionCapacity(p) => serde_json::to_value(p),
            RuleKind::Incompatibility(p) => serde_json::to_value(p),
            RuleKind::FatigueThreshold(p) => serde_json::to_value(p),
            RuleKind::Custom(p) => serde_json::to_value(p),
        }
    }

    /// 语义校验 (serde 只保证结构)
    fn validate(&self) -> Result<(), String> {
        match self {
            RuleKind::RestPeriod(p) => {
                if !p.min_rest_hours.is_finite() || p.min_rest_hours <= 0.0 || p.min_rest_hours > 72.0
                {
                    return Err(format!(
                        "minRestHours={} 超出有效范围 (0, 72]",
                        p.min_rest_hours
                    ));
                }
                if p.after_shift_kinds.iter().any(|k| k.is_rest()) {
                    return Err("afterShiftKinds 不能包含休息类型".to_string());
                }
            }
            RuleKind::MaxConsecutive(p) => {
                if p.max_days == 0 {
                    return Err("maxDays 必须大于 0".to_string());
                }
            }
            RuleKind::SupervisionCapacity(p) => {
                if p.max_rooms_per_supervisor == 0 {
                    return Err("maxRoomsPerSupervisor 必须大于 0".to_string());
                }
                if let Some(exceptional) = p.exceptional_max {
                    if exceptional < p.max_rooms_per_supervisor {
                        return Err(format!(
                            "exceptionalMax={} 不能小于 maxRoomsPerSupervisor={}",
                            exceptional, p.max_rooms_per_supervisor
                        ));
                    }
                }
                if p.supervisor_roles.is_empty() {
                    return Err("supervisorRoles 不能为空".to_string());
                }
            }
            RuleKind::Incompatibility(p) => {
                if p.staff_pairs.is_empty() {
                    return Err("staffPairs 不能为空".to_string());
                }
                for (a, b) in &p.staff_pairs {
                    if a.trim().is_empty() || b.trim().is_empty() {
                        return Err("staffPairs 包含空人员ID".to_string());
                    }
                    if a == b {
                        return Err(format!("staffPairs 不能包含自身配对: {}", a));
                    }
                }
            }
            RuleKind::FatigueThreshold(p) => {
                if p.alert_severity > p.critical_severity {
                    return Err("alertSeverity 不能高于 criticalSeverity".to_string());
                }
            }
            RuleKind::Custom(p) => {
                if p.operator == CustomOperator::In && !p.value.is_array() {
                    return Err("IN 运算要求 value 为数组".to_string());
                }
                if p.value.is_null() {
                    return Err("value 不能为空".to_string());
                }
            }
        }
        Ok(())
    }
}

fn from_params<T: serde::de::DeserializeOwned>(parameters: &JsonValue) -> Result<T, String> {
    serde_json::from_value(parameters.clone()).map_err(|e| format!("参数格式错误: {}", e))
}

// ==========================================
// Rule - 规则值对象
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    pub scope: RuleScope,
    pub active: bool,
    pub revision: u32,
    pub kind: RuleKind,
}

impl Rule {
    pub fn tag(&self) -> RuleKindTag {
        self.kind.tag()
    }

    /// 还原为配置信封
    pub fn to_config(&self) -> Result<RuleConfig, serde_json::Error> {
        Ok(RuleConfig {
            id: self.id.clone(),
            kind: self.tag(),
            priority: self.priority,
            scope: self.scope.clone(),
            active: self.active,
            revision: self.revision,
            parameters: self.kind.parameters_json()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_supervision_params() {
        let kind = RuleKind::parse(
            RuleKindTag::SupervisionCapacity,
            &json!({"maxRoomsPerSupervisor": 2, "exceptionalMax": 3}),
        )
        .unwrap();
        match kind {
            RuleKind::SupervisionCapacity(p) => {
                assert_eq!(p.max_rooms_per_supervisor, 2);
                assert_eq!(p.exceptional_max, Some(3));
                assert_eq!(p.supervisor_roles, vec![StaffRole::Mar]);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let err = RuleKind::parse(
            RuleKindTag::RestPeriod,
            &json!({"minRestHours": 11, "minRestMinutes": 30}),
        )
        .unwrap_err();
        assert!(err.contains("参数格式错误"));
    }

    #[test]
    fn test_parse_rejects_semantic_errors() {
        assert!(RuleKind::parse(RuleKindTag::MaxConsecutive, &json!({"maxDays": 0})).is_err());
        assert!(RuleKind::parse(
            RuleKindTag::SupervisionCapacity,
            &json!({"maxRoomsPerSupervisor": 3, "exceptionalMax": 2})
        )
        .is_err());
        assert!(RuleKind::parse(
            RuleKindTag::Incompatibility,
            &json!({"staffPairs": [["S1", "S1"]]})
        )
        .is_err());
        assert!(RuleKind::parse(
            RuleKindTag::Custom,
            &json!({"field": "roomId", "operator": "IN", "value": "R1"})
        )
        .is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let kind = RuleKind::parse(RuleKindTag::RestPeriod, &json!({})).unwrap();
        match kind {
            RuleKind::RestPeriod(p) => {
                assert_eq!(p.min_rest_hours, 11.0);
                assert_eq!(p.severity, Severity::Error);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_scope_serde_round_shape() {
        let scope: RuleScope = serde_json::from_value(json!({"type": "SECTOR", "id": "ORTHO"})).unwrap();
        assert_eq!(scope, RuleScope::Sector("ORTHO".to_string()));
        let global: RuleScope = serde_json::from_value(json!({"type": "GLOBAL"})).unwrap();
        assert_eq!(global, RuleScope::Global);
        assert!(RuleScope::from_parts("SITE", None).is_err());
    }
}
