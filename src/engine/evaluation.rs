// ==========================================
// 麻醉科排班引擎 - 约束评估器
// ==========================================
// 职责: 对候选排班集合运行全部启用规则, 汇总为 ViolationReport
// 流程: 作用范围过滤 → 各种类检查器 → 去重 (规则ID + 受影响集合) → 同种类优先级裁决
// 红线: 降级 INFO 违规不参与优先级裁决
// 红线: 单个检查器失败降级为 INFO 违规, 不阻断其他规则
// 红线: 结果与规则执行顺序、输入顺序无关
// ==========================================

use crate::domain::assignment::CandidateAssignment;
use crate::domain::rule::{Rule, RuleKind};
use crate::domain::supervision::SupervisionConstraintSet;
use crate::domain::types::{RuleKindTag, Severity};
use crate::domain::violation::{sort_normalized, Violation, ViolationReport};
use crate::engine::checkers;
use crate::engine::error::{CheckerRuntimeError, EngineError, EngineResult};
use crate::engine::fatigue::FatigueSnapshot;
use crate::engine::registry::RuleRegistry;
use crate::engine::supervision::SupervisionValidator;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// 评估所需的只读上下文
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub registry: &'a RuleRegistry,
    pub fatigue: &'a FatigueSnapshot,
    pub supervision: &'a SupervisionConstraintSet,
}

/// 输入校验: 条目结构合法且ID唯一
pub fn validate_input(assignments: &[CandidateAssignment]) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for a in assignments {
        a.validate().map_err(EngineError::ValidationInput)?;
        if !seen.insert(a.id.as_str()) {
            return Err(EngineError::ValidationInput(format!(
                "排班条目ID重复: {}",
                a.id
            )));
        }
    }
    Ok(())
}

/// 评估候选排班
///
/// # 参数
/// - assignments: 候选排班 (任意顺序)
/// - ctx: 注册表 + 疲劳快照 + 督导约束
/// - evaluated_at: 报告时间戳
///
/// # 返回
/// - ViolationReport: 违规按归一化顺序排列
pub fn evaluate(
    assignments: &[CandidateAssignment],
    ctx: EvaluationContext<'_>,
    evaluated_at: DateTime<Utc>,
) -> ViolationReport {
    ViolationReport::new(collect_violations(assignments, ctx), evaluated_at)
}

/// 单条规则的输出: 检查器违规与降级违规分开保存
#[derive(Default)]
struct RuleOutcome {
    violations: Vec<Violation>,
    /// 检查器错误转换的 INFO 违规, 不参与优先级裁决
    degraded: Vec<Violation>,
}

/// 运行全部启用规则并完成去重与裁决 (结果已归一化排序)
pub fn collect_violations(
    assignments: &[CandidateAssignment],
    ctx: EvaluationContext<'_>,
) -> Vec<Violation> {
    let mut sorted: Vec<&CandidateAssignment> = assignments.iter().collect();
    sorted.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.staff_id.cmp(&b.staff_id))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut raw = Vec::new();
    let mut degraded = Vec::new();
    for rule in ctx.registry.active_rules() {
        let scoped: Vec<&CandidateAssignment> = sorted
            .iter()
            .copied()
            .filter(|a| rule.scope.covers(a))
            .collect();
        if scoped.is_empty() {
            continue;
        }
        let outcome = run_rule(rule, &sorted, &scoped, ctx);
        debug!(
            rule_id = %rule.id,
            kind = %rule.tag(),
            count = outcome.violations.len(),
            degraded = outcome.degraded.len(),
            "规则检查完成"
        );
        raw.extend(outcome.violations);
        degraded.extend(outcome.degraded);
    }

    let mut resolved = resolve_same_kind_conflicts(dedup_by_rule_and_ids(raw), ctx.registry);
    resolved.extend(dedup_by_rule_and_ids(degraded));
    sort_normalized(&mut resolved);
    resolved
}

/// 运行单条规则; panic 或运行期错误降级为 INFO 违规
fn run_rule(
    rule: &Rule,
    all: &[&CandidateAssignment],
    scoped: &[&CandidateAssignment],
    ctx: EvaluationContext<'_>,
) -> RuleOutcome {
    let outcome = catch_unwind(AssertUnwindSafe(|| dispatch(rule, all, scoped, ctx)));
    match outcome {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "未知错误".to_string());
            let error = CheckerRuntimeError::new(rule.id.clone(), None, message);
            warn!(rule_id = %rule.id, error = %error, "规则检查器异常, 降级为 INFO");
            RuleOutcome {
                violations: Vec::new(),
                degraded: vec![degraded(rule, &error, scoped)],
            }
        }
    }
}

/// 按规则种类穷举分派
///
/// 督导规则接收全部条目, 作用范围只用于选择督导分组
fn dispatch(
    rule: &Rule,
    all: &[&CandidateAssignment],
    scoped: &[&CandidateAssignment],
    ctx: EvaluationContext<'_>,
) -> RuleOutcome {
    let violations = match &rule.kind {
        RuleKind::RestPeriod(p) => checkers::check_rest_period(&rule.id, p, scoped),
        RuleKind::MaxConsecutive(p) => checkers::check_max_consecutive(&rule.id, p, scoped),
        RuleKind::SupervisionCapacity(p) => SupervisionValidator::new(&rule.id, p, ctx.supervision)
            .with_scope(&rule.scope)
            .check_all(all),
        RuleKind::Incompatibility(p) => checkers::check_incompatibility(&rule.id, p, scoped),
        RuleKind::FatigueThreshold(p) => {
            checkers::check_fatigue_threshold(&rule.id, p, scoped, ctx.fatigue)
        }
        RuleKind::Custom(p) => {
            let mut outcome = RuleOutcome::default();
            for a in scoped {
                match checkers::check_custom_assignment(&rule.id, p, a) {
                    Ok(violation) => outcome.violations.extend(violation),
                    Err(error) => {
                        warn!(rule_id = %rule.id, error = %error, "自定义规则执行失败, 降级为 INFO");
                        outcome.degraded.push(degraded(rule, &error, scoped));
                    }
                }
            }
            return outcome;
        }
    };
    RuleOutcome {
        violations,
        degraded: Vec::new(),
    }
}

/// 检查器错误 → INFO 违规 (引用出错条目, 未知时引用全部作用范围内条目)
fn degraded(rule: &Rule, error: &CheckerRuntimeError, scoped: &[&CandidateAssignment]) -> Violation {
    let affected: Vec<String> = match &error.assignment_id {
        Some(id) => vec![id.clone()],
        None => scoped.iter().map(|a| a.id.clone()).collect(),
    };
    Violation::new(
        rule.id.clone(),
        rule.tag(),
        Severity::Info,
        affected,
        format!("规则 {} 执行失败: {}", rule.id, error.message),
    )
}

/// 按 (规则ID, 受影响集合) 去重, 保留最高严重度
fn dedup_by_rule_and_ids(mut raw: Vec<Violation>) -> Vec<Violation> {
    // 归一化排序后, 同键第一条即为最高严重度 (同严重度按消息)
    sort_normalized(&mut raw);
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|v| seen.insert(v.dedup_key()))
        .collect()
}

/// 裁决分组键: (种类, 受影响集合); 自定义规则谓词互不相关, 额外按规则ID区分
fn conflict_key(v: &Violation) -> (RuleKindTag, Vec<String>, Option<String>) {
    let rule_id = match v.rule_kind {
        RuleKindTag::Custom => Some(v.rule_id.clone()),
        _ => None,
    };
    (v.rule_kind, v.affected_assignment_ids.clone(), rule_id)
}

/// 同种类不同规则对同一受影响集合给出不同严重度时, 仅保留优先级最高的规则
fn resolve_same_kind_conflicts(violations: Vec<Violation>, registry: &RuleRegistry) -> Vec<Violation> {
    let mut groups: BTreeMap<(RuleKindTag, Vec<String>, Option<String>), Vec<Violation>> =
        BTreeMap::new();
    for v in violations {
        groups.entry(conflict_key(&v)).or_default().push(v);
    }

    let mut resolved = Vec::new();
    for (_, mut group) in groups {
        let disagree = group.iter().any(|v| v.severity != group[0].severity);
        if !disagree {
            resolved.extend(group);
            continue;
        }
        group.sort_by(|a, b| {
            let pa = registry.get(&a.rule_id).map_or(i32::MIN, |r| r.priority);
            let pb = registry.get(&b.rule_id).map_or(i32::MIN, |r| r.priority);
            pb.cmp(&pa).then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        let winner = group[0].rule_id.clone();
        resolved.extend(group.into_iter().filter(|v| v.rule_id == winner));
    }
    resolved
}
