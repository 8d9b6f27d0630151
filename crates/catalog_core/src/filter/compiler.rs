//! Rule-to-predicate compiler.
//!
//! Splits a rule set into scalar filters (evaluated directly against
//! top-level product attributes) and rules that need full evaluation over
//! variants, properties or other taxons' classification.

use crate::filter::{FilterField, FilterOperator};
use crate::model::rule::{TaxonRule, TaxonRuleId};
use std::fmt::{Display, Formatter};

/// One scalar predicate on a product attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub rule_uuid: TaxonRuleId,
    pub field: FilterField,
    pub operator: FilterOperator,
    pub value: String,
}

impl Display for QueryFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.field.as_str(),
            self.operator.as_str(),
            self.value
        )
    }
}

/// Outcome of compiling one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCompilation {
    Filter(QueryFilter),
    RequiresFullEvaluation,
}

/// Compiles one rule, or flags it for full evaluation.
pub fn compile_rule(rule: &TaxonRule) -> RuleCompilation {
    match rule.kind().filter_field() {
        Some(field) => RuleCompilation::Filter(QueryFilter {
            rule_uuid: rule.uuid(),
            field,
            operator: rule.match_policy().filter_operator(),
            value: rule.value().to_string(),
        }),
        None => RuleCompilation::RequiresFullEvaluation,
    }
}

/// Compiled form of a whole rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledRuleSet {
    pub filters: Vec<QueryFilter>,
    pub requires_full_evaluation: Vec<TaxonRuleId>,
}

impl CompiledRuleSet {
    /// True when every rule became a scalar filter.
    pub fn is_fully_compiled(&self) -> bool {
        self.requires_full_evaluation.is_empty()
    }
}

/// Compiles every rule, preserving input order in both tiers.
pub fn compile_rule_set<'a>(rules: impl IntoIterator<Item = &'a TaxonRule>) -> CompiledRuleSet {
    let mut compiled = CompiledRuleSet::default();
    for rule in rules {
        match compile_rule(rule) {
            RuleCompilation::Filter(filter) => compiled.filters.push(filter),
            RuleCompilation::RequiresFullEvaluation => {
                compiled.requires_full_evaluation.push(rule.uuid())
            }
        }
    }
    compiled
}
