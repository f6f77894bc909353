// ==========================================
// 麻醉科排班引擎 - 规则注册表
// ==========================================
// 职责: 加载规则配置 → 强类型 Rule; 按种类/作用范围查询; 场景覆写
// 红线: 任一规则非法即整体加载失败, 不产生部分注册表
// 红线: 同种类内按优先级降序 (同优先级按ID) 排列, 保证确定性
// ==========================================

use crate::domain::rule::{Rule, RuleConfig, RuleKind, RuleOverride, RuleScope};
use crate::domain::types::RuleKindTag;
use crate::engine::error::{EngineError, EngineResult};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    /// 已按 (优先级降序, ID 升序) 排好
    rules: Vec<Rule>,
}

fn configuration_error(rule_id: &str, message: impl Into<String>) -> EngineError {
    EngineError::Configuration {
        rule_id: rule_id.to_string(),
        message: message.into(),
    }
}

fn parse_config(config: &RuleConfig) -> EngineResult<Rule> {
    if config.id.trim().is_empty() {
        return Err(configuration_error("<empty>", "规则ID不能为空"));
    }
    let kind = RuleKind::parse(config.kind, &config.parameters)
        .map_err(|message| configuration_error(&config.id, message))?;
    Ok(Rule {
        id: config.id.clone(),
        priority: config.priority,
        scope: config.scope.clone(),
        active: config.active,
        revision: config.revision,
        kind,
    })
}

impl RuleRegistry {
    /// 加载规则配置
    ///
    /// # 返回
    /// - Ok(RuleRegistry): 全部规则合法
    /// - Err(EngineError::Configuration): 第一个非法规则的ID与原因
    pub fn load(configs: Vec<RuleConfig>) -> EngineResult<Self> {
        let mut seen = BTreeSet::new();
        let mut rules = Vec::with_capacity(configs.len());
        for config in &configs {
            if !seen.insert(config.id.clone()) {
                return Err(configuration_error(&config.id, "规则ID重复"));
            }
            rules.push(parse_config(config)?);
        }
        Ok(Self::from_rules(rules))
    }

    fn from_rules(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Self { rules }
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// 全部规则 (已排序)
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.active)
    }

    /// 指定种类的规则, 优先级降序
    pub fn by_kind(&self, kind: RuleKindTag) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.tag() == kind).collect()
    }

    /// 指定作用范围的规则, 优先级降序
    pub fn by_scope(&self, scope: &RuleScope) -> Vec<&Rule> {
        self.rules.iter().filter(|r| &r.scope == scope).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 生成场景专用注册表: 先按 included 过滤, 再应用覆写
    ///
    /// 被覆写的规则产生新修订 (revision + 1), 参数重新校验
    pub fn with_overrides(
        &self,
        overrides: &[RuleOverride],
        included_rule_ids: &[String],
    ) -> EngineResult<Self> {
        for id in included_rule_ids {
            if self.get(id).is_none() {
                return Err(configuration_error(id, "includedRuleIds 引用了不存在的规则"));
            }
        }
        let mut by_id: BTreeMap<String, Rule> = self
            .rules
            .iter()
            .filter(|r| included_rule_ids.is_empty() || included_rule_ids.contains(&r.id))
            .map(|r| (r.id.clone(), r.clone()))
            .collect();

        for o in overrides {
            let Some(base) = by_id.get(&o.rule_id) else {
                if self.get(&o.rule_id).is_some() {
                    // 规则被 includedRuleIds 排除, 覆写无效果
                    continue;
                }
                return Err(configuration_error(&o.rule_id, "覆写引用了不存在的规则"));
            };
            let mut config = base
                .to_config()
                .map_err(|e| configuration_error(&o.rule_id, e.to_string()))?;
            if let Some(active) = o.active {
                config.active = active;
            }
            if let Some(priority) = o.priority {
                config.priority = priority;
            }
            if let Some(patch) = &o.parameters {
                config.parameters = merge_parameters(&config.parameters, patch)
                    .map_err(|message| configuration_error(&o.rule_id, message))?;
            }
            config.revision += 1;
            debug!(rule_id = %o.rule_id, revision = config.revision, "应用场景规则覆写");
            by_id.insert(o.rule_id.clone(), parse_config(&config)?);
        }

        Ok(Self::from_rules(by_id.into_values().collect()))
    }
}

/// 浅合并: patch 的顶层字段覆盖 base
fn merge_parameters(base: &JsonValue, patch: &JsonValue) -> Result<JsonValue, String> {
    let (JsonValue::Object(base_map), JsonValue::Object(patch_map)) = (base, patch) else {
        return Err("覆写参数必须为 JSON 对象".to_string());
    };
    let mut merged = base_map.clone();
    for (key, value) in patch_map {
        merged.insert(key.clone(), value.clone());
    }
    Ok(JsonValue::Object(merged))
}
