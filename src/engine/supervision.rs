// ==========================================
// 麻醉科排班引擎 - 督导容量校验器
// ==========================================
// 职责: 按 (督导, 日期, 时段) 分组, 检查同时覆盖的手术间数与跨扇区督导
// 规则: 超出上限 → ERROR (列出超额手术间); 不超过 exceptionalMax → WARNING
// 规则: 命中例外 (人员 / 手术间组合) → 不报
// 规则: 不同扇区未在 crossSectorAllowed 中声明 → 无论数量一律 ERROR
// 作用范围: 只选择分组 (任一条目落在范围内), 不裁剪分组内的手术间
// ==========================================

use crate::domain::assignment::CandidateAssignment;
use crate::domain::rule::{RuleScope, SupervisionParams};
use crate::domain::supervision::{SupervisionConstraint, SupervisionConstraintSet};
use crate::domain::types::{Period, RuleKindTag, Severity};
use crate::domain::violation::Violation;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// 同一督导同一时段覆盖的一个手术间
#[derive(Debug)]
struct RoomCover<'a> {
    room_id: &'a str,
    sector_id: &'a str,
    assignment_ids: Vec<String>,
}

/// 同一督导同一时段的全部覆盖
#[derive(Debug)]
struct SupervisionGroup<'a> {
    staff_id: &'a str,
    date: NaiveDate,
    period: Period,
    /// 按 (开始时间, 手术间ID) 排序, 越靠后优先级越低
    rooms: Vec<RoomCover<'a>>,
    members: Vec<&'a CandidateAssignment>,
}

impl<'a> SupervisionGroup<'a> {
    fn primary_sector(&self) -> &'a str {
        self.rooms.first().map(|r| r.sector_id).unwrap_or("")
    }

    fn all_assignment_ids(&self) -> Vec<String> {
        self.rooms
            .iter()
            .flat_map(|r| r.assignment_ids.iter().cloned())
            .collect()
    }
}

// ==========================================
// SupervisionValidator
// ==========================================
pub struct SupervisionValidator<'a> {
    rule_id: &'a str,
    params: &'a SupervisionParams,
    constraints: &'a SupervisionConstraintSet,
    scope: Option<&'a RuleScope>,
}

impl<'a> SupervisionValidator<'a> {
    pub fn new(
        rule_id: &'a str,
        params: &'a SupervisionParams,
        constraints: &'a SupervisionConstraintSet,
    ) -> Self {
        Self {
            rule_id,
            params,
            constraints,
            scope: None,
        }
    }

    /// 仅检查与作用范围相交的督导分组
    pub fn with_scope(mut self, scope: &'a RuleScope) -> Self {
        self.scope = Some(scope);
        self
    }

    fn in_scope(&self, group: &SupervisionGroup<'_>) -> bool {
        self.scope
            .map_or(true, |scope| group.members.iter().any(|a| scope.covers(a)))
    }

    /// 全量检查: 按主扇区逐一调用 check_coverage
    pub fn check_all(&self, assignments: &[&CandidateAssignment]) -> Vec<Violation> {
        let sectors: BTreeSet<&str> = self
            .group(assignments)
            .iter()
            .filter(|g| self.in_scope(g))
            .map(|g| g.primary_sector())
            .collect();
        sectors
            .into_iter()
            .flat_map(|sector| self.check_coverage(sector, assignments))
            .collect()
    }

    /// 检查主扇区为 sector_id 的所有督导分组
    ///
    /// # 参数
    /// - sector_id: 扇区ID (分组第一个手术间所在扇区)
    /// - assignments: 候选排班 (可包含其他扇区与非督导角色, 内部过滤)
    pub fn check_coverage(
        &self,
        sector_id: &str,
        assignments: &[&CandidateAssignment],
    ) -> Vec<Violation> {
        let fallback = SupervisionConstraint {
            sector_id: sector_id.to_string(),
            max_rooms_per_supervisor: self.params.max_rooms_per_supervisor,
            exceptional_max: self.params.exceptional_max,
            exceptions: Vec::new(),
            cross_sector_allowed: Vec::new(),
        };
        let constraint = self.constraints.get(sector_id).unwrap_or(&fallback);

        self.group(assignments)
            .iter()
            .filter(|g| g.primary_sector() == sector_id && self.in_scope(g))
            .flat_map(|g| self.check_group(g, constraint))
            .collect()
    }

    fn group<'b>(&self, assignments: &[&'b CandidateAssignment]) -> Vec<SupervisionGroup<'b>> {
        let mut buckets: BTreeMap<(&'b str, NaiveDate, Period), Vec<&'b CandidateAssignment>> =
            BTreeMap::new();
        for a in assignments {
            if !a.is_working() || a.room_id.is_none() {
                continue;
            }
            if !self.params.supervisor_roles.contains(&a.role) {
                continue;
            }
            for period in a.periods() {
                buckets
                    .entry((a.staff_id.as_str(), a.date, *period))
                    .or_default()
                    .push(a);
            }
        }

        buckets
            .into_iter()
            .map(|((staff_id, date, period), mut members)| {
                members.sort_by(|x, y| {
                    x.start
                        .cmp(&y.start)
                        .then_with(|| x.room_id.cmp(&y.room_id))
                        .then_with(|| x.id.cmp(&y.id))
                });
                let mut rooms: Vec<RoomCover<'b>> = Vec::new();
                for m in &members {
                    let room_id = m.room_id.as_deref().unwrap_or("");
                    match rooms.iter_mut().find(|r| r.room_id == room_id) {
                        Some(existing) => existing.assignment_ids.push(m.id.clone()),
                        None => rooms.push(RoomCover {
                            room_id,
                            sector_id: m.sector_id.as_deref().unwrap_or(""),
                            assignment_ids: vec![m.id.clone()],
                        }),
                    }
                }
                SupervisionGroup {
                    staff_id,
                    date,
                    period,
                    rooms,
                    members,
                }
            })
            .collect()
    }

    fn check_group(
        &self,
        group: &SupervisionGroup<'_>,
        constraint: &SupervisionConstraint,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let primary = group.primary_sector();

        // 跨扇区: 未声明允许的扇区组合一律违规
        let forbidden: BTreeSet<&str> = group
            .rooms
            .iter()
            .map(|r| r.sector_id)
            .filter(|s| *s != primary && !self.constraints.cross_sector_allowed(primary, s))
            .collect();
        if !forbidden.is_empty() {
            violations.push(
                Violation::new(
                    self.rule_id,
                    RuleKindTag::SupervisionCapacity,
                    Severity::Error,
                    group.all_assignment_ids(),
                    format!(
                        "{} 在 {} {} 跨扇区督导 {} 与 {} 未被允许",
                        group.staff_id,
                        group.date,
                        group.period,
                        primary,
                        forbidden.into_iter().collect::<Vec<_>>().join("/")
                    ),
                )
                .with_suggestion("调整手术间分配或在扇区约束中声明允许的跨扇区组合"),
            );
        }

        // 容量: 只统计本扇区及允许的跨扇区手术间
        let counted: Vec<&RoomCover<'_>> = group
            .rooms
            .iter()
            .filter(|r| {
                r.sector_id == primary || self.constraints.cross_sector_allowed(primary, r.sector_id)
            })
            .collect();
        let count = counted.len() as u32;
        let max = constraint.max_rooms_per_supervisor;
        if count <= max {
            return violations;
        }

        let room_set: BTreeSet<String> = counted.iter().map(|r| r.room_id.to_string()).collect();
        if constraint.find_exception(group.staff_id, &room_set).is_some() {
            return violations;
        }

        let excess = &counted[max as usize..];
        let severity = match constraint.exceptional_max {
            Some(exceptional) if count <= exceptional => Severity::Warning,
            _ => Severity::Error,
        };
        let excess_rooms: Vec<&str> = excess.iter().map(|r| r.room_id).collect();
        violations.push(
            Violation::new(
                self.rule_id,
                RuleKindTag::SupervisionCapacity,
                severity,
                excess.iter().flat_map(|r| r.assignment_ids.iter().cloned()),
                format!(
                    "{} 在 {} {} 同时督导 {} 个手术间 (上限 {}), 超额手术间: {}",
                    group.staff_id,
                    group.date,
                    group.period,
                    count,
                    max,
                    excess_rooms.join(", ")
                ),
            )
            .with_suggestion(format!("为手术间 {} 安排其他督导", excess_rooms.join(", "))),
        );
        violations
    }
}
