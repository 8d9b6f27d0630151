//! Scalar query filter vocabulary for taxon rules.
//!
//! # Responsibility
//! - Map rule types onto top-level product fields.
//! - Map match policies onto filter operator tokens.
//!
//! # Invariants
//! - Token lookups are total: unknown input never panics or errors.
//! - Unmapped match policies fall back to `=`.

pub mod compiler;

use crate::model::rule::MatchPolicy;

pub use compiler::{compile_rule, compile_rule_set, CompiledRuleSet, QueryFilter, RuleCompilation};

/// Top-level product attribute a scalar filter can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Name,
    Description,
    Status,
    IsDigital,
}

impl FilterField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Status => "status",
            Self::IsDigital => "is_digital",
        }
    }
}

/// Scalar comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    StartsWith,
    EndsWith,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
            Self::Contains => "*",
            Self::StartsWith => "^",
            Self::EndsWith => "$",
        }
    }
}

/// Resolves a raw rule type token to its scalar field.
///
/// Recognizes `product_name`, `product_description`, `product_status` and
/// `is_digital`. The last two are filterable product attributes that the
/// rule whitelist does not (yet) admit, so only the first two are reachable
/// from a stored rule.
pub fn query_filter_field(rule_type: &str) -> Option<FilterField> {
    match rule_type.trim().to_ascii_lowercase().as_str() {
        "product_name" => Some(FilterField::Name),
        "product_description" => Some(FilterField::Description),
        "product_status" => Some(FilterField::Status),
        "is_digital" => Some(FilterField::IsDigital),
        _ => None,
    }
}

/// Whether a raw rule type token compiles to a scalar filter.
pub fn can_convert_to_query_filter(rule_type: &str) -> bool {
    query_filter_field(rule_type).is_some()
}

/// Resolves a raw match policy token to its operator token.
pub fn filter_operator_token(match_policy: &str) -> &'static str {
    MatchPolicy::parse(match_policy)
        .map(MatchPolicy::filter_operator)
        .unwrap_or(FilterOperator::Equal)
        .as_str()
}
