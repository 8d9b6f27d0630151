//! Taxon rule domain model.
//!
//! # Responsibility
//! - Define the closed rule type and match policy vocabularies.
//! - Normalize and validate rule input at construction and update time.
//!
//! # Invariants
//! - `kind` and `match_policy` are always canonical (trimmed, lower-case).
//! - A `product_property` rule never exists without a property name.
//! - `value` is trimmed, non-blank and at most `RULE_VALUE_MAX_CHARS` chars.
//! - A failed `update` leaves the rule untouched.

use crate::filter::{FilterField, FilterOperator};
use crate::model::taxonomy::TaxonId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one taxon rule.
pub type TaxonRuleId = Uuid;

/// Upper bound for rule values, counted in chars.
pub const RULE_VALUE_MAX_CHARS: usize = 255;

/// Closed set of rule types a taxon can match products on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    ProductName,
    ProductSku,
    ProductDescription,
    ProductPrice,
    ProductWeight,
    ProductAvailable,
    ProductArchived,
    /// Matches a declared product property; requires `property_name`.
    ProductProperty,
    VariantPrice,
    VariantSku,
    /// Matches membership in other taxons, so depends on hierarchy state.
    ClassificationTaxon,
}

impl RuleType {
    /// Whitelist in canonical order.
    pub const ALL: [RuleType; 11] = [
        RuleType::ProductName,
        RuleType::ProductSku,
        RuleType::ProductDescription,
        RuleType::ProductPrice,
        RuleType::ProductWeight,
        RuleType::ProductAvailable,
        RuleType::ProductArchived,
        RuleType::ProductProperty,
        RuleType::VariantPrice,
        RuleType::VariantSku,
        RuleType::ClassificationTaxon,
    ];

    /// Returns the canonical storage/wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProductName => "product_name",
            Self::ProductSku => "product_sku",
            Self::ProductDescription => "product_description",
            Self::ProductPrice => "product_price",
            Self::ProductWeight => "product_weight",
            Self::ProductAvailable => "product_available",
            Self::ProductArchived => "product_archived",
            Self::ProductProperty => "product_property",
            Self::VariantPrice => "variant_price",
            Self::VariantSku => "variant_sku",
            Self::ClassificationTaxon => "classification_taxon",
        }
    }

    /// Parses a raw token after trim + lower-case normalization.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }

    /// Whether rules of this type must carry a property name.
    pub fn requires_property_name(self) -> bool {
        matches!(self, Self::ProductProperty)
    }

    /// Scalar product attribute this type maps onto, if any.
    ///
    /// Types without a field need the full evaluation path (variants,
    /// properties, classification state).
    pub fn filter_field(self) -> Option<FilterField> {
        match self {
            Self::ProductName => Some(FilterField::Name),
            Self::ProductDescription => Some(FilterField::Description),
            Self::ProductSku
            | Self::ProductPrice
            | Self::ProductWeight
            | Self::ProductAvailable
            | Self::ProductArchived
            | Self::ProductProperty
            | Self::VariantPrice
            | Self::VariantSku
            | Self::ClassificationTaxon => None,
        }
    }
}

impl Display for RuleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison semantics applied when a rule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchPolicy {
    IsEqualTo,
    IsNotEqualTo,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl MatchPolicy {
    /// Whitelist in canonical order. The first entry is the default.
    pub const ALL: [MatchPolicy; 14] = [
        MatchPolicy::IsEqualTo,
        MatchPolicy::IsNotEqualTo,
        MatchPolicy::Contains,
        MatchPolicy::DoesNotContain,
        MatchPolicy::StartsWith,
        MatchPolicy::EndsWith,
        MatchPolicy::GreaterThan,
        MatchPolicy::LessThan,
        MatchPolicy::GreaterThanOrEqual,
        MatchPolicy::LessThanOrEqual,
        MatchPolicy::In,
        MatchPolicy::NotIn,
        MatchPolicy::IsNull,
        MatchPolicy::IsNotNull,
    ];

    /// Policy used when input omits one.
    pub const DEFAULT: MatchPolicy = MatchPolicy::ALL[0];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsEqualTo => "is_equal_to",
            Self::IsNotEqualTo => "is_not_equal_to",
            Self::Contains => "contains",
            Self::DoesNotContain => "does_not_contain",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }

    /// Parses a raw token after trim + lower-case normalization.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == normalized)
    }

    /// Scalar filter operator for this policy.
    ///
    /// Policies without a scalar operator fall back to `=`.
    pub fn filter_operator(self) -> FilterOperator {
        match self {
            Self::IsEqualTo => FilterOperator::Equal,
            Self::IsNotEqualTo => FilterOperator::NotEqual,
            Self::GreaterThan => FilterOperator::GreaterThan,
            Self::LessThan => FilterOperator::LessThan,
            Self::GreaterThanOrEqual => FilterOperator::GreaterThanOrEqual,
            Self::LessThanOrEqual => FilterOperator::LessThanOrEqual,
            Self::Contains => FilterOperator::Contains,
            Self::StartsWith => FilterOperator::StartsWith,
            Self::EndsWith => FilterOperator::EndsWith,
            Self::DoesNotContain | Self::In | Self::NotIn | Self::IsNull | Self::IsNotNull => {
                FilterOperator::Equal
            }
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Display for MatchPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleValidationError {
    /// Type token is not in the rule type whitelist.
    InvalidType(String),
    /// Match policy token is not in the match policy whitelist.
    InvalidMatchPolicy(String),
    /// `product_property` rule without a property name.
    PropertyNameRequired,
    /// Value is blank after trim.
    ValueRequired,
    /// Value exceeds `RULE_VALUE_MAX_CHARS`.
    ValueTooLong { max: usize, actual: usize },
}

impl Display for RuleValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidType(value) => write!(f, "invalid rule type `{value}`"),
            Self::InvalidMatchPolicy(value) => write!(f, "invalid match policy `{value}`"),
            Self::PropertyNameRequired => {
                write!(f, "property name is required for product_property rules")
            }
            Self::ValueRequired => write!(f, "rule value must not be blank"),
            Self::ValueTooLong { max, actual } => {
                write!(f, "rule value is {actual} chars, max is {max}")
            }
        }
    }
}

impl Error for RuleValidationError {}

/// Canonical, validated content of one rule.
///
/// Two rules are the same rule iff their `RuleFields` are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFields {
    pub kind: RuleType,
    pub value: String,
    pub match_policy: MatchPolicy,
    pub property_name: Option<String>,
}

impl RuleFields {
    /// Normalizes raw rule input.
    ///
    /// # Errors
    /// - `InvalidType` / `InvalidMatchPolicy` for tokens outside the whitelists.
    /// - `ValueRequired` / `ValueTooLong` for bad values.
    /// - `PropertyNameRequired` for `product_property` without a property name.
    pub fn normalize(
        kind: &str,
        value: &str,
        match_policy: Option<&str>,
        property_name: Option<&str>,
    ) -> Result<Self, RuleValidationError> {
        let kind = parse_kind(kind)?;
        let match_policy = match match_policy {
            Some(raw) => parse_policy(raw)?,
            None => MatchPolicy::DEFAULT,
        };
        let value = normalize_value(value)?;
        let property_name = normalize_property_name(property_name);
        ensure_property_name(kind, property_name.as_deref())?;

        Ok(Self {
            kind,
            value,
            match_policy,
            property_name,
        })
    }
}

/// One declarative membership condition owned by a taxon.
///
/// Instances are produced by `TaxonRuleSet::add_rule` or restored from
/// storage; fields are read through accessors so normalization can't be
/// bypassed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRule {
    uuid: TaxonRuleId,
    taxon_uuid: TaxonId,
    fields: RuleFields,
}

impl TaxonRule {
    /// Validates raw input and creates a rule with a fresh id.
    pub fn create(
        taxon_uuid: TaxonId,
        kind: &str,
        value: &str,
        match_policy: Option<&str>,
        property_name: Option<&str>,
    ) -> Result<Self, RuleValidationError> {
        let fields = RuleFields::normalize(kind, value, match_policy, property_name)?;
        Ok(Self::from_fields(Uuid::new_v4(), taxon_uuid, fields))
    }

    /// Builds a rule from already-normalized fields.
    ///
    /// Used by persistence read paths after re-validation.
    pub fn from_fields(uuid: TaxonRuleId, taxon_uuid: TaxonId, fields: RuleFields) -> Self {
        Self {
            uuid,
            taxon_uuid,
            fields,
        }
    }

    /// Partially updates the rule.
    ///
    /// `None` leaves a field untouched, as does a blank `kind` or
    /// `match_policy`. A blank `property_name` clears it. The
    /// `product_property` constraint is checked against the resulting type.
    pub fn update(
        &mut self,
        kind: Option<&str>,
        value: Option<&str>,
        match_policy: Option<&str>,
        property_name: Option<&str>,
    ) -> Result<(), RuleValidationError> {
        let mut next = self.fields.clone();

        if let Some(raw) = value {
            next.value = normalize_value(raw)?;
        }
        if let Some(raw) = kind.filter(|raw| !raw.trim().is_empty()) {
            next.kind = parse_kind(raw)?;
        }
        if let Some(raw) = match_policy.filter(|raw| !raw.trim().is_empty()) {
            next.match_policy = parse_policy(raw)?;
        }
        if property_name.is_some() {
            next.property_name = normalize_property_name(property_name);
        }
        ensure_property_name(next.kind, next.property_name.as_deref())?;

        self.fields = next;
        Ok(())
    }

    pub fn uuid(&self) -> TaxonRuleId {
        self.uuid
    }

    pub fn taxon_uuid(&self) -> TaxonId {
        self.taxon_uuid
    }

    pub fn kind(&self) -> RuleType {
        self.fields.kind
    }

    pub fn value(&self) -> &str {
        &self.fields.value
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.fields.match_policy
    }

    pub fn property_name(&self) -> Option<&str> {
        self.fields.property_name.as_deref()
    }

    pub fn fields(&self) -> &RuleFields {
        &self.fields
    }

    /// Exact four-field content comparison.
    pub fn has_fields(&self, fields: &RuleFields) -> bool {
        self.fields == *fields
    }

    /// Whether this rule compiles to a scalar query filter.
    pub fn can_convert_to_query_filter(&self) -> bool {
        self.field_name().is_some()
    }

    /// Canonical product field token, `None` for non-scalar types.
    pub fn field_name(&self) -> Option<&'static str> {
        self.fields.kind.filter_field().map(FilterField::as_str)
    }

    /// Canonical filter operator token. Never fails.
    pub fn filter_operator(&self) -> &'static str {
        self.fields.match_policy.filter_operator().as_str()
    }
}

fn parse_kind(raw: &str) -> Result<RuleType, RuleValidationError> {
    RuleType::parse(raw)
        .ok_or_else(|| RuleValidationError::InvalidType(raw.trim().to_ascii_lowercase()))
}

fn parse_policy(raw: &str) -> Result<MatchPolicy, RuleValidationError> {
    MatchPolicy::parse(raw)
        .ok_or_else(|| RuleValidationError::InvalidMatchPolicy(raw.trim().to_ascii_lowercase()))
}

fn normalize_value(raw: &str) -> Result<String, RuleValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RuleValidationError::ValueRequired);
    }
    let actual = trimmed.chars().count();
    if actual > RULE_VALUE_MAX_CHARS {
        return Err(RuleValidationError::ValueTooLong {
            max: RULE_VALUE_MAX_CHARS,
            actual,
        });
    }
    Ok(trimmed.to_string())
}

fn normalize_property_name(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn ensure_property_name(
    kind: RuleType,
    property_name: Option<&str>,
) -> Result<(), RuleValidationError> {
    if kind.requires_property_name() && property_name.is_none() {
        return Err(RuleValidationError::PropertyNameRequired);
    }
    Ok(())
}
