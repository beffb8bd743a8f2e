//! Special-case cost rules
//!
//! The few traits whose pricing breaks the generic rules are expressed as
//! named entries in a registry instead of name-string branches inside the
//! merge code. Each rule sees a grant before it lands and may adjust the
//! hero and ledger, or veto the grant outright; cost adjustments are
//! consulted by the traits stage.

use tracing::debug;

use crate::application::catalog::Catalogs;
use crate::domain::document::{int_or, obj, JsonMap};
use crate::domain::entities::TraitCategory;
use crate::domain::CostLedger;

/// Outcome of a rule inspecting a pending grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    Proceed,
    /// Do not create the entry; the rule has already accounted for it.
    Skip,
}

pub struct GrantContext<'a> {
    pub catalogs: &'a Catalogs,
    pub hero: &'a mut JsonMap,
    pub ledger: &'a mut CostLedger,
    /// Build points refunded by rules during this collection run, so the
    /// next run can retract them wholesale.
    pub refunded: &'a mut i64,
}

pub trait SpecialRule: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect a grant before it is merged into the hero record.
    fn on_grant(
        &self,
        _ctx: &mut GrantContext<'_>,
        _category: TraitCategory,
        _name: &str,
    ) -> GrantDecision {
        GrantDecision::Proceed
    }

    /// Flat cost adjustment for a user-selected trait, in the category's
    /// own currency.
    fn cost_adjustment(&self, _hero: &JsonMap, _category: TraitCategory, _name: &str) -> i64 {
        0
    }
}

pub struct SpecialRuleRegistry {
    rules: Vec<Box<dyn SpecialRule>>,
}

impl SpecialRuleRegistry {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Registry with the standard DSA 4.1 rules.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(SpellcasterTierChain {
            tiers: vec![
                "Viertelzauberer".to_string(),
                "Halbzauberer".to_string(),
                "Vollzauberer".to_string(),
            ],
            refund_percent: 30,
        }));
        registry.register(Box::new(SkillDiscount {
            skills: vec!["Balance".to_string(), "Herausragende Balance".to_string()],
            requires: "Standfest".to_string(),
            discount: 4,
        }));
        registry
    }

    pub fn register(&mut self, rule: Box<dyn SpecialRule>) {
        self.rules.push(rule);
    }

    pub fn on_grant(
        &self,
        ctx: &mut GrantContext<'_>,
        category: TraitCategory,
        name: &str,
    ) -> GrantDecision {
        for rule in &self.rules {
            if rule.on_grant(ctx, category, name) == GrantDecision::Skip {
                debug!(rule = rule.name(), trait_name = name, "grant absorbed by special rule");
                return GrantDecision::Skip;
            }
        }
        GrantDecision::Proceed
    }

    pub fn cost_adjustment(&self, hero: &JsonMap, category: TraitCategory, name: &str) -> i64 {
        self.rules
            .iter()
            .map(|rule| rule.cost_adjustment(hero, category, name))
            .sum()
    }
}

impl Default for SpecialRuleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Spellcaster tiers supersede one another. Granting a higher tier removes
/// an owned lower tier and refunds a share of its cost; granting a lower
/// tier while a higher one is owned refunds the lower tier's share instead
/// of creating the entry.
struct SpellcasterTierChain {
    /// Ascending tier order.
    tiers: Vec<String>,
    refund_percent: i64,
}

impl SpellcasterTierChain {
    fn tier_index(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t == name)
    }

    // Tiers may live in the advantage or special-ability catalog.
    fn tier_cost(&self, catalogs: &Catalogs, name: &str) -> i64 {
        catalogs
            .find_any_trait(name)
            .map(|(_, def)| int_or(def, "cost", 0))
            .unwrap_or(0)
    }
}

impl SpecialRule for SpellcasterTierChain {
    fn name(&self) -> &str {
        "spellcaster-tier-chain"
    }

    fn on_grant(
        &self,
        ctx: &mut GrantContext<'_>,
        category: TraitCategory,
        name: &str,
    ) -> GrantDecision {
        if category != TraitCategory::Advantages {
            return GrantDecision::Proceed;
        }
        let Some(granted) = self.tier_index(name) else { return GrantDecision::Proceed };

        let owned: Vec<(usize, String)> = self
            .tiers
            .iter()
            .enumerate()
            .filter(|(index, tier)| {
                *index != granted
                    && obj(ctx.hero, "advantages").is_some_and(|a| a.contains_key(*tier))
            })
            .map(|(index, tier)| (index, tier.clone()))
            .collect();

        for (index, tier) in owned {
            if index < granted {
                // Superseded lower tier: remove and refund its share.
                if let Some(advantages) = ctx.hero.get_mut("advantages").and_then(|v| v.as_object_mut()) {
                    advantages.remove(&tier);
                }
                let refund = self.tier_cost(ctx.catalogs, &tier) * self.refund_percent / 100;
                ctx.ledger.refund(refund);
                *ctx.refunded += refund;
            } else {
                // A higher tier already covers this grant.
                let refund = self.tier_cost(ctx.catalogs, name) * self.refund_percent / 100;
                ctx.ledger.refund(refund);
                *ctx.refunded += refund;
                return GrantDecision::Skip;
            }
        }
        GrantDecision::Proceed
    }
}

/// A skill is cheaper while a prerequisite trait is owned and the skill
/// itself was not forced by a rule source.
struct SkillDiscount {
    skills: Vec<String>,
    requires: String,
    discount: i64,
}

impl SpecialRule for SkillDiscount {
    fn name(&self) -> &str {
        "skill-discount"
    }

    fn cost_adjustment(&self, hero: &JsonMap, category: TraitCategory, name: &str) -> i64 {
        if category != TraitCategory::SpecialAbilities {
            return 0;
        }
        if !self.skills.iter().any(|s| s == name) {
            return 0;
        }
        let steadfast = ["advantages", "special_abilities"]
            .iter()
            .any(|cat| obj(hero, cat).is_some_and(|o| o.contains_key(&self.requires)));
        if steadfast {
            -self.discount
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: serde_json::Value) -> JsonMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn catalogs() -> Catalogs {
        Catalogs {
            advantages: as_map(json!({
                "Viertelzauberer": { "cost": 10 },
                "Halbzauberer": { "cost": 20 },
                "Vollzauberer": { "cost": 30 }
            })),
            ..Default::default()
        }
    }

    #[test]
    fn higher_tier_supersedes_owned_lower_tier() {
        let catalogs = catalogs();
        let registry = SpecialRuleRegistry::standard();
        let mut hero = as_map(json!({ "advantages": { "Viertelzauberer": {} } }));
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let decision = registry.on_grant(
            &mut GrantContext {
                catalogs: &catalogs,
                hero: &mut hero,
                ledger: &mut ledger,
                refunded: &mut refunded,
            },
            TraitCategory::Advantages,
            "Vollzauberer",
        );
        assert_eq!(decision, GrantDecision::Proceed);
        assert!(!obj(&hero, "advantages").unwrap().contains_key("Viertelzauberer"));
        assert_eq!(ledger.remaining(), 113); // 30% of 10
        assert_eq!(refunded, 3);
    }

    #[test]
    fn lower_tier_grant_is_absorbed_by_owned_higher_tier() {
        let catalogs = catalogs();
        let registry = SpecialRuleRegistry::standard();
        let mut hero = as_map(json!({ "advantages": { "Vollzauberer": {} } }));
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let decision = registry.on_grant(
            &mut GrantContext {
                catalogs: &catalogs,
                hero: &mut hero,
                ledger: &mut ledger,
                refunded: &mut refunded,
            },
            TraitCategory::Advantages,
            "Halbzauberer",
        );
        assert_eq!(decision, GrantDecision::Skip);
        assert_eq!(ledger.remaining(), 116); // 30% of 20
    }

    #[test]
    fn balance_discount_requires_steadfast() {
        let registry = SpecialRuleRegistry::standard();
        let hero = as_map(json!({ "advantages": { "Standfest": {} } }));
        assert_eq!(
            registry.cost_adjustment(&hero, TraitCategory::SpecialAbilities, "Balance"),
            -4
        );
        let without = JsonMap::new();
        assert_eq!(
            registry.cost_adjustment(&without, TraitCategory::SpecialAbilities, "Balance"),
            0
        );
    }
}
