//! Taxonomy and taxon domain model.
//!
//! # Responsibility
//! - Define taxonomy trees and their taxon nodes.
//! - Own the rule collection of one taxon (`TaxonRuleSet`) and the only
//!   factories that create, update or remove rules.
//!
//! # Invariants
//! - A taxonomy has exactly one root taxon (`parent_uuid == None`).
//! - The root can't be re-parented and a non-root can't become a root.
//! - A taxon with children can't be deleted.
//! - Rule mutations record a `TaxonRuleEvent`; they never schedule
//!   recomputation themselves.

use crate::model::rule::{RuleFields, RuleValidationError, TaxonRule, TaxonRuleId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable taxonomy identifier.
pub type TaxonomyId = Uuid;

/// Stable taxon identifier.
pub type TaxonId = Uuid;

static SLUG_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug separator regex"));

/// Taxonomy/taxon validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonValidationError {
    /// Name is blank after trim.
    NameRequired,
    /// Name (or explicit slug) produces no slug characters.
    InvalidSlug(String),
    /// Root taxon can't be moved under another taxon.
    RootLocked(TaxonId),
    /// Non-root taxon can't be detached into a second root.
    ParentRequired(TaxonId),
    /// Taxon still has children.
    HasChildren(TaxonId),
}

impl Display for TaxonValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameRequired => write!(f, "name must not be blank"),
            Self::InvalidSlug(value) => write!(f, "cannot derive slug from `{value}`"),
            Self::RootLocked(id) => write!(f, "root taxon cannot be re-parented: {id}"),
            Self::ParentRequired(id) => write!(f, "non-root taxon requires a parent: {id}"),
            Self::HasChildren(id) => write!(f, "taxon has children: {id}"),
        }
    }
}

impl Error for TaxonValidationError {}

/// Named tree of taxons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    pub uuid: TaxonomyId,
    pub name: String,
    /// Hierarchy rebuild is still owed for this taxonomy.
    pub marked_for_rebuild: bool,
}

impl Taxonomy {
    /// Creates a taxonomy and its root taxon (same name).
    pub fn new(name: &str) -> Result<(Self, Taxon), TaxonValidationError> {
        let name = normalize_name(name)?;
        let taxonomy = Self {
            uuid: Uuid::new_v4(),
            name: name.clone(),
            marked_for_rebuild: true,
        };
        let root = Taxon::new(taxonomy.uuid, None, &name, false)?;
        Ok((taxonomy, root))
    }
}

/// Category node inside one taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxon {
    pub uuid: TaxonId,
    pub taxonomy_uuid: TaxonomyId,
    /// `None` only for the taxonomy root.
    pub parent_uuid: Option<TaxonId>,
    pub name: String,
    pub slug: String,
    /// Order among siblings.
    pub position: i64,
    /// Membership is driven by rules.
    pub automatic: bool,
    /// Product regeneration is still owed for this taxon.
    pub marked_for_regenerate_products: bool,
}

impl Taxon {
    /// Creates a taxon with a slug derived from `name`.
    pub fn new(
        taxonomy_uuid: TaxonomyId,
        parent_uuid: Option<TaxonId>,
        name: &str,
        automatic: bool,
    ) -> Result<Self, TaxonValidationError> {
        let name = normalize_name(name)?;
        let slug = slugify(&name)?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            taxonomy_uuid,
            parent_uuid,
            name,
            slug,
            position: 0,
            automatic,
            marked_for_regenerate_products: automatic,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }

    /// Renames the taxon; slug follows the name.
    pub fn rename(&mut self, name: &str) -> Result<(), TaxonValidationError> {
        let name = normalize_name(name)?;
        let slug = slugify(&name)?;
        self.name = name;
        self.slug = slug;
        Ok(())
    }

    /// Moves the taxon under `new_parent`.
    ///
    /// # Errors
    /// - `RootLocked` when the root is given a parent.
    /// - `ParentRequired` when a non-root is detached.
    pub fn set_parent(&mut self, new_parent: Option<TaxonId>) -> Result<(), TaxonValidationError> {
        match (self.parent_uuid, new_parent) {
            (None, Some(_)) => Err(TaxonValidationError::RootLocked(self.uuid)),
            (Some(_), None) => Err(TaxonValidationError::ParentRequired(self.uuid)),
            _ => {
                self.parent_uuid = new_parent;
                Ok(())
            }
        }
    }

    /// Checks the delete precondition.
    pub fn ensure_deletable(&self, has_children: bool) -> Result<(), TaxonValidationError> {
        if has_children {
            return Err(TaxonValidationError::HasChildren(self.uuid));
        }
        Ok(())
    }
}

/// Notification raised by rule lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonRuleEvent {
    Added {
        taxon_uuid: TaxonId,
        rule_uuid: TaxonRuleId,
    },
    Updated {
        taxon_uuid: TaxonId,
        rule_uuid: TaxonRuleId,
    },
    Removed {
        taxon_uuid: TaxonId,
        rule_uuid: TaxonRuleId,
    },
}

impl TaxonRuleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "taxon_rule_added",
            Self::Updated { .. } => "taxon_rule_updated",
            Self::Removed { .. } => "taxon_rule_removed",
        }
    }

    pub fn rule_uuid(&self) -> TaxonRuleId {
        match self {
            Self::Added { rule_uuid, .. }
            | Self::Updated { rule_uuid, .. }
            | Self::Removed { rule_uuid, .. } => *rule_uuid,
        }
    }
}

/// Rule mutation failures on a taxon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonRuleError {
    RuleNotFound(TaxonRuleId),
    Validation(RuleValidationError),
}

impl Display for TaxonRuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleNotFound(id) => write!(f, "taxon rule not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaxonRuleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::RuleNotFound(_) => None,
            Self::Validation(err) => Some(err),
        }
    }
}

impl From<RuleValidationError> for TaxonRuleError {
    fn from(value: RuleValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Rules owned by one taxon, in persisted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRuleSet {
    taxon_uuid: TaxonId,
    rules: Vec<TaxonRule>,
    events: Vec<TaxonRuleEvent>,
}

impl TaxonRuleSet {
    pub fn new(taxon_uuid: TaxonId, rules: Vec<TaxonRule>) -> Self {
        Self {
            taxon_uuid,
            rules,
            events: Vec::new(),
        }
    }

    pub fn taxon_uuid(&self) -> TaxonId {
        self.taxon_uuid
    }

    pub fn rules(&self) -> &[TaxonRule] {
        &self.rules
    }

    pub fn get(&self, rule_uuid: TaxonRuleId) -> Option<&TaxonRule> {
        self.rules.iter().find(|rule| rule.uuid() == rule_uuid)
    }

    /// Creates a rule owned by this taxon and appends it.
    pub fn add_rule(&mut self, fields: RuleFields) -> Result<TaxonRuleId, TaxonRuleError> {
        let rule = TaxonRule::create(
            self.taxon_uuid,
            fields.kind.as_str(),
            &fields.value,
            Some(fields.match_policy.as_str()),
            fields.property_name.as_deref(),
        )?;
        let rule_uuid = rule.uuid();
        self.rules.push(rule);
        self.events.push(TaxonRuleEvent::Added {
            taxon_uuid: self.taxon_uuid,
            rule_uuid,
        });
        Ok(rule_uuid)
    }

    /// Replaces the content of one rule, revalidating it.
    pub fn update_rule(
        &mut self,
        rule_uuid: TaxonRuleId,
        fields: &RuleFields,
    ) -> Result<(), TaxonRuleError> {
        let taxon_uuid = self.taxon_uuid;
        let rule = self
            .rules
            .iter_mut()
            .find(|rule| rule.uuid() == rule_uuid)
            .ok_or(TaxonRuleError::RuleNotFound(rule_uuid))?;
        rule.update(
            Some(fields.kind.as_str()),
            Some(&fields.value),
            Some(fields.match_policy.as_str()),
            Some(fields.property_name.as_deref().unwrap_or("")),
        )?;
        self.events.push(TaxonRuleEvent::Updated {
            taxon_uuid,
            rule_uuid,
        });
        Ok(())
    }

    /// Removes one rule.
    pub fn remove_rule(&mut self, rule_uuid: TaxonRuleId) -> Result<TaxonRule, TaxonRuleError> {
        let index = self
            .rules
            .iter()
            .position(|rule| rule.uuid() == rule_uuid)
            .ok_or(TaxonRuleError::RuleNotFound(rule_uuid))?;
        let removed = self.rules.remove(index);
        self.events.push(TaxonRuleEvent::Removed {
            taxon_uuid: self.taxon_uuid,
            rule_uuid,
        });
        Ok(removed)
    }

    /// Drains recorded notifications.
    pub fn take_events(&mut self) -> Vec<TaxonRuleEvent> {
        std::mem::take(&mut self.events)
    }
}

fn normalize_name(value: &str) -> Result<String, TaxonValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TaxonValidationError::NameRequired);
    }
    Ok(trimmed.to_string())
}

/// Builds a URL-safe slug: lower-case ASCII alphanumerics joined by `-`.
pub fn slugify(value: &str) -> Result<String, TaxonValidationError> {
    let lowered = value.trim().to_lowercase();
    let slug = SLUG_SEPARATOR_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() {
        return Err(TaxonValidationError::InvalidSlug(value.to_string()));
    }
    Ok(slug)
}
