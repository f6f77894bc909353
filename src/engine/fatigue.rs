// ==========================================
// 麻醉科排班引擎 - 疲劳积分账本
// ==========================================
// 职责: 按人员按日累计/恢复疲劳积分, 阈值分级, 公平性评分
// 规则: balance(N) = max(0, balance(N-1) + accrual(N) - recovery(N))
// 红线: 不随时间自动衰减, 只在显式休息日恢复
// 红线: 评估期间只读 (通过 FatigueSnapshot 共享)
// ==========================================

use crate::config::engine_config::FatigueConfig;
use crate::domain::assignment::CandidateAssignment;
use crate::domain::types::{FatigueLevel, Period, RestKind, ShiftKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// 单人单日疲劳状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatigueState {
    pub staff_id: String,
    pub date: NaiveDate,
    pub points_accrued: f64,
    pub points_recovered: f64,
    pub running_balance: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DayEntry {
    accrued: f64,
    recovered: f64,
}

// ==========================================
// FatigueLedger - 可变账本 (仅构建阶段使用)
// ==========================================
#[derive(Debug, Clone)]
pub struct FatigueLedger {
    config: Arc<FatigueConfig>,
    entries: BTreeMap<String, BTreeMap<NaiveDate, DayEntry>>,
}

impl FatigueLedger {
    pub fn new(config: Arc<FatigueConfig>) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }

    /// 按排班集合构建账本
    ///
    /// - 工作班次: 班次积分 + 扇区附加积分 (每人每日每扇区一次)
    /// - 同一时段覆盖两个及以上手术间: 每人每日附加一次督导积分
    /// - 休息条目: 按休息类型恢复
    pub fn from_assignments<'a>(
        config: Arc<FatigueConfig>,
        assignments: impl IntoIterator<Item = &'a CandidateAssignment>,
    ) -> Self {
        let mut ledger = Self::new(config);
        let mut sector_days: BTreeSet<(String, NaiveDate, String)> = BTreeSet::new();
        let mut period_rooms: BTreeMap<(String, NaiveDate, Period), BTreeSet<String>> =
            BTreeMap::new();

        for a in assignments {
            match a.rest_kind() {
                Some(rest_kind) => ledger.recover(&a.staff_id, a.date, rest_kind),
                None => {
                    ledger.accrue(&a.staff_id, a.date, a.shift_kind);
                    if let Some(sector) = &a.sector_id {
                        sector_days.insert((a.staff_id.clone(), a.date, sector.clone()));
                    }
                    if let Some(room) = &a.room_id {
                        for period in a.periods() {
                            period_rooms
                                .entry((a.staff_id.clone(), a.date, *period))
                                .or_default()
                                .insert(room.clone());
                        }
                    }
                }
            }
        }

        for (staff_id, date, sector) in sector_days {
            let points = ledger.config.sector_points_for(&sector);
            ledger.accrue_points(&staff_id, date, points);
        }

        let multi_days: BTreeSet<(String, NaiveDate)> = period_rooms
            .into_iter()
            .filter(|(_, rooms)| rooms.len() >= 2)
            .map(|((staff_id, date, _), _)| (staff_id, date))
            .collect();
        let multi_points = ledger.config.supervision_multiple_points;
        for (staff_id, date) in multi_days {
            ledger.accrue_points(&staff_id, date, multi_points);
        }

        ledger
    }

    fn entry(&mut self, staff_id: &str, date: NaiveDate) -> &mut DayEntry {
        self.entries
            .entry(staff_id.to_string())
            .or_default()
            .entry(date)
            .or_default()
    }

    /// 按班次类型累计积分
    pub fn accrue(&mut self, staff_id: &str, date: NaiveDate, shift_kind: ShiftKind) {
        let points = self.config.points_for(shift_kind);
        self.accrue_points(staff_id, date, points);
    }

    /// 累计任意积分 (负值按 0 处理)
    pub fn accrue_points(&mut self, staff_id: &str, date: NaiveDate, points: f64) {
        let points = points.max(0.0);
        self.entry(staff_id, date).accrued += points;
    }

    /// 按休息类型恢复积分
    pub fn recover(&mut self, staff_id: &str, date: NaiveDate, rest_kind: RestKind) {
        let points = self.config.recovery_for(rest_kind).max(0.0);
        self.entry(staff_id, date).recovered += points;
    }

    /// 截至指定日期 (含) 的余额
    pub fn balance_at(&self, staff_id: &str, date: NaiveDate) -> f64 {
        let Some(days) = self.entries.get(staff_id) else {
            return 0.0;
        };
        days.range(..=date).fold(0.0, |balance, (_, entry)| {
            (balance + entry.accrued - entry.recovered).max(0.0)
        })
    }

    pub fn classify(&self, balance: f64) -> FatigueLevel {
        classify(&self.config, balance)
    }

    /// 冻结为只读快照 (预先计算每日余额)
    pub fn snapshot(&self) -> FatigueSnapshot {
        let mut states = BTreeMap::new();
        for (staff_id, days) in &self.entries {
            let mut balance = 0.0_f64;
            let mut per_day = BTreeMap::new();
            for (date, entry) in days {
                balance = (balance + entry.accrued - entry.recovered).max(0.0);
                per_day.insert(
                    *date,
                    FatigueState {
                        staff_id: staff_id.clone(),
                        date: *date,
                        points_accrued: entry.accrued,
                        points_recovered: entry.recovered,
                        running_balance: balance,
                    },
                );
            }
            states.insert(staff_id.clone(), per_day);
        }
        FatigueSnapshot {
            config: Arc::clone(&self.config),
            states,
        }
    }
}

/// 阈值分级
pub fn classify(config: &FatigueConfig, balance: f64) -> FatigueLevel {
    if balance >= config.critical_threshold {
        FatigueLevel::Critical
    } else if balance >= config.alert_threshold {
        FatigueLevel::Alert
    } else {
        FatigueLevel::Normal
    }
}

/// 公平性评分 = weight_equity * 方差(余额) + weight_fatigue * 最大余额
///
/// 仅用于统计, 不参与违规判定
pub fn equity_score(config: &FatigueConfig, balances: &[f64], max_balance: f64) -> f64 {
    if balances.is_empty() {
        return config.weight_fatigue * max_balance;
    }
    let n = balances.len() as f64;
    let mean = balances.iter().sum::<f64>() / n;
    let variance = balances.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / n;
    config.weight_equity * variance + config.weight_fatigue * max_balance
}

// ==========================================
// FatigueSnapshot - 只读快照 (检查器共享)
// ==========================================
#[derive(Debug, Clone)]
pub struct FatigueSnapshot {
    config: Arc<FatigueConfig>,
    states: BTreeMap<String, BTreeMap<NaiveDate, FatigueState>>,
}

impl FatigueSnapshot {
    /// 空快照 (无任何积分)
    pub fn empty(config: Arc<FatigueConfig>) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
        }
    }

    /// 截至指定日期 (含) 的余额
    pub fn balance_at(&self, staff_id: &str, date: NaiveDate) -> f64 {
        self.states
            .get(staff_id)
            .and_then(|days| days.range(..=date).next_back())
            .map(|(_, state)| state.running_balance)
            .unwrap_or(0.0)
    }

    /// 指定日期的账目 (当日无积分变动返回 None)
    pub fn state_on(&self, staff_id: &str, date: NaiveDate) -> Option<&FatigueState> {
        self.states.get(staff_id).and_then(|days| days.get(&date))
    }

    pub fn classify(&self, balance: f64) -> FatigueLevel {
        classify(&self.config, balance)
    }

    pub fn config(&self) -> &FatigueConfig {
        &self.config
    }

    pub fn staff_ids(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    /// 指定人员的全部每日账目 (按日期升序)
    pub fn states_for(&self, staff_id: &str) -> impl Iterator<Item = &FatigueState> {
        self.states
            .get(staff_id)
            .into_iter()
            .flat_map(|days| days.values())
    }
}
