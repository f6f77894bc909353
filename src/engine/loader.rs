// ==========================================
// 麻醉科排班引擎 - 评估上下文加载
// ==========================================
// 职责: 按排班涉及的站点/扇区从仓储加载规则配置与督导约束
// 红线: 加载结果为只读快照, 整次运行/应用期间不再变化
// ==========================================

use crate::domain::assignment::CandidateAssignment;
use crate::domain::rule::RuleScope;
use crate::domain::supervision::SupervisionConstraintSet;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::RuleRegistry;
use crate::repository::planning_repo::PlanningRepository;
use std::collections::BTreeSet;
use tracing::debug;

/// 排班涉及的全部规则作用范围 (全局 + 站点 + 扇区)
pub fn scopes_for(assignments: &[CandidateAssignment], site_id: Option<&str>) -> Vec<RuleScope> {
    let mut sites: BTreeSet<&str> = assignments
        .iter()
        .filter_map(|a| a.site_id.as_deref())
        .collect();
    if let Some(site) = site_id {
        sites.insert(site);
    }
    let sectors: BTreeSet<&str> = assignments
        .iter()
        .filter_map(|a| a.sector_id.as_deref())
        .collect();

    let mut scopes = vec![RuleScope::Global];
    scopes.extend(sites.into_iter().map(|s| RuleScope::Site(s.to_string())));
    scopes.extend(sectors.into_iter().map(|s| RuleScope::Sector(s.to_string())));
    scopes
}

/// 加载规则注册表
///
/// # 返回
/// - Err(Configuration): 任一规则配置非法 (整体失败)
pub async fn load_registry(
    repository: &dyn PlanningRepository,
    assignments: &[CandidateAssignment],
    site_id: Option<&str>,
) -> EngineResult<RuleRegistry> {
    let mut configs = Vec::new();
    for scope in scopes_for(assignments, site_id) {
        configs.extend(repository.load_rules(&scope).await?);
    }
    debug!(rule_count = configs.len(), "规则配置已加载");
    RuleRegistry::load(configs)
}

/// 加载排班涉及扇区的督导约束
pub async fn load_supervision(
    repository: &dyn PlanningRepository,
    assignments: &[CandidateAssignment],
) -> EngineResult<SupervisionConstraintSet> {
    let sectors: BTreeSet<&str> = assignments
        .iter()
        .filter_map(|a| a.sector_id.as_deref())
        .collect();
    let mut constraints = Vec::new();
    for sector in sectors {
        if let Some(constraint) = repository.load_supervision_constraints(sector).await? {
            constraint.validate().map_err(|message| EngineError::Configuration {
                rule_id: format!("supervision:{}", sector),
                message,
            })?;
            constraints.push(constraint);
        }
    }
    Ok(SupervisionConstraintSet::new(constraints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::RuleConfig;
    use crate::domain::supervision::SupervisionConstraint;
    use crate::domain::types::{RuleKindTag, ShiftKind, StaffRole};
    use crate::repository::memory_repo::InMemoryPlanningRepository;
    use chrono::NaiveDate;
    use serde_json::json;

    fn assignment(sector: &str, site: &str) -> CandidateAssignment {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        CandidateAssignment {
            id: format!("{}-{}", sector, site),
            staff_id: "MAR1".to_string(),
            role: StaffRole::Mar,
            date,
            room_id: Some("S1".to_string()),
            sector_id: Some(sector.to_string()),
            site_id: Some(site.to_string()),
            shift_kind: ShiftKind::Morning,
            start: date.and_hms_opt(8, 0, 0).unwrap(),
            end: date.and_hms_opt(13, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_scopes_for() {
        let scopes = scopes_for(
            &[assignment("ENDO", "NORD"), assignment("ORTHO", "NORD")],
            Some("SUD"),
        );
        assert_eq!(
            scopes,
            vec![
                RuleScope::Global,
                RuleScope::Site("NORD".to_string()),
                RuleScope::Site("SUD".to_string()),
                RuleScope::Sector("ENDO".to_string()),
                RuleScope::Sector("ORTHO".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_registry_and_supervision() {
        let repo = InMemoryPlanningRepository::new();
        repo.add_rule_config(RuleConfig {
            id: "SUP".to_string(),
            kind: RuleKindTag::SupervisionCapacity,
            priority: 0,
            scope: RuleScope::Global,
            active: true,
            revision: 1,
            parameters: json!({"maxRoomsPerSupervisor": 2}),
        })
        .unwrap();
        repo.add_rule_config(RuleConfig {
            id: "ENDO_MAX".to_string(),
            kind: RuleKindTag::MaxConsecutive,
            priority: 0,
            scope: RuleScope::Sector("ENDO".to_string()),
            active: true,
            revision: 1,
            parameters: json!({}),
        })
        .unwrap();
        repo.add_rule_config(RuleConfig {
            id: "CARDIO_MAX".to_string(),
            kind: RuleKindTag::MaxConsecutive,
            priority: 0,
            scope: RuleScope::Sector("CARDIO".to_string()),
            active: true,
            revision: 1,
            parameters: json!({}),
        })
        .unwrap();
        repo.add_supervision_constraint(SupervisionConstraint {
            sector_id: "ENDO".to_string(),
            max_rooms_per_supervisor: 3,
            exceptional_max: None,
            exceptions: Vec::new(),
            cross_sector_allowed: Vec::new(),
        })
        .unwrap();

        let assignments = vec![assignment("ENDO", "NORD")];
        let registry = load_registry(&repo, &assignments, None).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("CARDIO_MAX").is_none());

        let supervision = load_supervision(&repo, &assignments).await.unwrap();
        assert_eq!(supervision.len(), 1);
        assert_eq!(supervision.get("ENDO").unwrap().max_rooms_per_supervisor, 3);
    }
}
