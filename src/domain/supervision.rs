// ==========================================
// 麻醉科排班引擎 - 督导约束领域模型
// ==========================================
// 职责: 扇区级督导容量约束 (每位督导可同时覆盖的手术间数)
// 红线: 评估期间只读
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 督导例外: 按人员豁免, 或按手术间组合豁免, 或两者同时限定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupervisionException {
    #[serde(default)]
    pub staff_id: Option<String>,
    /// 允许的手术间组合 (空 = 不限手术间)
    #[serde(default)]
    pub rooms: Vec<String>,
}

impl SupervisionException {
    /// 判断 (人员, 手术间集合) 是否命中本例外
    pub fn matches(&self, staff_id: &str, room_set: &BTreeSet<String>) -> bool {
        let staff_ok = self
            .staff_id
            .as_deref()
            .map_or(true, |expected| expected == staff_id);
        let rooms_ok =
            self.rooms.is_empty() || room_set.iter().all(|room| self.rooms.contains(room));
        staff_ok && rooms_ok
    }
}

/// 扇区督导约束
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupervisionConstraint {
    pub sector_id: String,
    pub max_rooms_per_supervisor: u32,
    /// 临时允许的超额上限 (超出常规上限但不超过此值时降级为 WARNING)
    #[serde(default)]
    pub exceptional_max: Option<u32>,
    #[serde(default)]
    pub exceptions: Vec<SupervisionException>,
    /// 允许跨扇区督导的扇区列表
    #[serde(default)]
    pub cross_sector_allowed: Vec<String>,
}

impl SupervisionConstraint {
    pub fn validate(&self) -> Result<(), String> {
        if self.sector_id.trim().is_empty() {
            return Err("督导约束缺少扇区ID".to_string());
        }
        if self.max_rooms_per_supervisor == 0 {
            return Err(format!(
                "扇区 {} 的 maxRoomsPerSupervisor 必须大于 0",
                self.sector_id
            ));
        }
        if let Some(exceptional) = self.exceptional_max {
            if exceptional < self.max_rooms_per_supervisor {
                return Err(format!(
                    "扇区 {} 的 exceptionalMax={} 小于常规上限 {}",
                    self.sector_id, exceptional, self.max_rooms_per_supervisor
                ));
            }
        }
        for exception in &self.exceptions {
            if exception.staff_id.is_none() && exception.rooms.is_empty() {
                return Err(format!(
                    "扇区 {} 存在空例外 (既无人员也无手术间)",
                    self.sector_id
                ));
            }
        }
        Ok(())
    }

    /// 判断是否允许与另一扇区跨扇区督导
    pub fn allows_cross_sector(&self, other_sector: &str) -> bool {
        self.cross_sector_allowed.iter().any(|s| s == other_sector)
    }

    pub fn find_exception(
        &self,
        staff_id: &str,
        room_set: &BTreeSet<String>,
    ) -> Option<&SupervisionException> {
        self.exceptions
            .iter()
            .find(|exception| exception.matches(staff_id, room_set))
    }
}

/// 一次运行内共享的督导约束快照 (按扇区ID索引)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionConstraintSet {
    by_sector: BTreeMap<String, SupervisionConstraint>,
}

impl SupervisionConstraintSet {
    pub fn new(constraints: impl IntoIterator<Item = SupervisionConstraint>) -> Self {
        Self {
            by_sector: constraints
                .into_iter()
                .map(|c| (c.sector_id.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, sector_id: &str) -> Option<&SupervisionConstraint> {
        self.by_sector.get(sector_id)
    }

    /// 两个扇区之间是否允许跨扇区督导 (任一方声明即可)
    pub fn cross_sector_allowed(&self, a: &str, b: &str) -> bool {
        self.get(a).map_or(false, |c| c.allows_cross_sector(b))
            || self.get(b).map_or(false, |c| c.allows_cross_sector(a))
    }

    pub fn len(&self) -> usize {
        self.by_sector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sector.is_empty()
    }
}
