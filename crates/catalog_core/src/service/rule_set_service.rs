//! Taxon rule set use-case service.
//!
//! # Responsibility
//! - Reconcile a submitted rule list against the persisted rule set with
//!   the fewest possible mutations.
//! - Persist the result atomically and register product regeneration.
//!
//! # Invariants
//! - Every submitted entry is validated before anything is mutated; the
//!   first failure aborts the whole update.
//! - Resubmitting the same content (ids ignored, any order) writes nothing
//!   and registers nothing.
//! - Rule edits register product regeneration for the edited taxon only.

use crate::filter::{compile_rule_set, CompiledRuleSet};
use crate::model::rule::{RuleFields, RuleValidationError, TaxonRule, TaxonRuleId};
use crate::model::taxonomy::{TaxonId, TaxonRuleError, TaxonRuleSet, TaxonomyId};
use crate::repo::rule_repo::{RuleChangeSet, RuleRepository};
use crate::repo::RepoError;
use crate::work::registry::DeferredWorkRegistry;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One submitted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    /// Id of an existing rule; unknown ids are treated as absent.
    #[serde(default)]
    pub id: Option<TaxonRuleId>,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default)]
    pub match_policy: Option<String>,
    #[serde(default)]
    pub property_name: Option<String>,
}

impl RuleInput {
    /// Builds an id-less input; mainly for callers assembling rules in code.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            value: value.into(),
            match_policy: None,
            property_name: None,
        }
    }

    pub fn with_id(mut self, id: TaxonRuleId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_match_policy(mut self, match_policy: impl Into<String>) -> Self {
        self.match_policy = Some(match_policy.into());
        self
    }

    pub fn with_property_name(mut self, property_name: impl Into<String>) -> Self {
        self.property_name = Some(property_name.into());
        self
    }

    fn normalize(&self) -> Result<RuleFields, RuleValidationError> {
        RuleFields::normalize(
            &self.kind,
            &self.value,
            self.match_policy.as_deref(),
            self.property_name.as_deref(),
        )
    }

    /// Content `rule` would have after this entry is applied as a partial
    /// update. Omitted `matchPolicy` and `propertyName` keep stored values.
    fn applied_to(&self, rule: &TaxonRule) -> Result<RuleFields, RuleValidationError> {
        let mut next = rule.clone();
        next.update(
            Some(&self.kind),
            Some(&self.value),
            self.match_policy.as_deref(),
            self.property_name.as_deref(),
        )?;
        Ok(next.fields().clone())
    }
}

/// Submitted entry after validation.
enum Entry {
    /// Targets an existing rule by id.
    Claimed(TaxonRuleId, RuleFields),
    Unclaimed(RuleFields),
}

/// Wire shape of one persisted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonRuleResponse {
    pub id: TaxonRuleId,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub match_policy: String,
    pub property_name: Option<String>,
}

impl From<&TaxonRule> for TaxonRuleResponse {
    fn from(rule: &TaxonRule) -> Self {
        Self {
            id: rule.uuid(),
            kind: rule.kind().as_str().to_string(),
            value: rule.value().to_string(),
            match_policy: rule.match_policy().as_str().to_string(),
            property_name: rule.property_name().map(str::to_string),
        }
    }
}

/// Wire shape of a taxon's full rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonRulesResponse {
    pub taxon_id: TaxonId,
    pub rules: Vec<TaxonRuleResponse>,
}

impl From<&TaxonRuleSet> for TaxonRulesResponse {
    fn from(rule_set: &TaxonRuleSet) -> Self {
        Self {
            taxon_id: rule_set.taxon_uuid(),
            rules: rule_set.rules().iter().map(TaxonRuleResponse::from).collect(),
        }
    }
}

/// Result of reconciling a rule set against submitted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Rule set after applying the changes, with pending events.
    pub rule_set: TaxonRuleSet,
    pub changes: RuleChangeSet,
}

impl Reconciled {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Computes the minimal mutation turning `current` into `incoming`.
///
/// Entries claiming an existing rule by id are matched first and applied as
/// partial updates; the remaining entries reuse an unclaimed rule with
/// identical content or become new rules. Rules nobody claimed are removed.
/// `current` is never mutated.
///
/// # Errors
/// - First validation failure among `incoming`, in input order.
pub fn reconcile_rules(
    current: &TaxonRuleSet,
    incoming: &[RuleInput],
) -> Result<Reconciled, TaxonRuleError> {
    let mut processed: HashSet<TaxonRuleId> = HashSet::new();
    let mut entries = Vec::with_capacity(incoming.len());
    for input in incoming {
        let claimed = input
            .id
            .filter(|id| !processed.contains(id))
            .and_then(|id| current.get(id));
        let entry = match claimed {
            Some(rule) => {
                processed.insert(rule.uuid());
                Entry::Claimed(rule.uuid(), input.applied_to(rule)?)
            }
            None => Entry::Unclaimed(input.normalize()?),
        };
        entries.push(entry);
    }

    let mut rule_set = current.clone();
    let mut updated_ids = Vec::new();
    let mut added_ids = Vec::new();
    let mut unclaimed = Vec::new();

    for entry in entries {
        let (rule_uuid, fields) = match entry {
            Entry::Claimed(rule_uuid, fields) => (rule_uuid, fields),
            Entry::Unclaimed(fields) => {
                unclaimed.push(fields);
                continue;
            }
        };

        let unchanged = rule_set
            .get(rule_uuid)
            .is_some_and(|rule| rule.has_fields(&fields));
        if !unchanged {
            rule_set.update_rule(rule_uuid, &fields)?;
            updated_ids.push(rule_uuid);
        }
    }

    for fields in unclaimed {
        let existing = rule_set
            .rules()
            .iter()
            .find(|rule| !processed.contains(&rule.uuid()) && rule.has_fields(&fields))
            .map(TaxonRule::uuid);
        match existing {
            Some(rule_uuid) => {
                processed.insert(rule_uuid);
            }
            None => {
                let rule_uuid = rule_set.add_rule(fields)?;
                processed.insert(rule_uuid);
                added_ids.push(rule_uuid);
            }
        }
    }

    let stale: Vec<TaxonRuleId> = rule_set
        .rules()
        .iter()
        .map(TaxonRule::uuid)
        .filter(|rule_uuid| !processed.contains(rule_uuid))
        .collect();
    for rule_uuid in &stale {
        rule_set.remove_rule(*rule_uuid)?;
    }

    let collect = |ids: &[TaxonRuleId]| -> Vec<TaxonRule> {
        ids.iter()
            .filter_map(|rule_uuid| rule_set.get(*rule_uuid).cloned())
            .collect()
    };
    let changes = RuleChangeSet {
        added: collect(&added_ids),
        updated: collect(&updated_ids),
        removed: stale,
    };

    Ok(Reconciled { rule_set, changes })
}

/// Errors from rule set use cases.
#[derive(Debug)]
pub enum RuleSetError {
    /// Taxon does not exist in the given taxonomy.
    TaxonNotFound(TaxonId),
    /// Rule vanished while reconciling.
    RuleNotFound(TaxonRuleId),
    Validation(RuleValidationError),
    /// Persistence failed; logged with the taxon id.
    Storage(RepoError),
}

impl Display for RuleSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaxonNotFound(id) => write!(f, "taxon not found: {id}"),
            Self::RuleNotFound(id) => write!(f, "taxon rule not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "rule storage failed: {err}"),
        }
    }
}

impl Error for RuleSetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TaxonNotFound(_) | Self::RuleNotFound(_) => None,
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<TaxonRuleError> for RuleSetError {
    fn from(value: TaxonRuleError) -> Self {
        match value {
            TaxonRuleError::RuleNotFound(id) => Self::RuleNotFound(id),
            TaxonRuleError::Validation(err) => Self::Validation(err),
        }
    }
}

/// Use-case service for taxon rule sets.
pub struct TaxonRuleService<R: RuleRepository> {
    repo: R,
}

impl<R: RuleRepository> TaxonRuleService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the persisted rule set of one taxon.
    pub fn get_taxon_rules(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> Result<TaxonRulesResponse, RuleSetError> {
        let rule_set = self.load(taxonomy_uuid, taxon_uuid)?;
        Ok(TaxonRulesResponse::from(&rule_set))
    }

    /// Splits one taxon's rules into scalar filters and full-evaluation rules.
    pub fn compile_taxon_rules(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> Result<CompiledRuleSet, RuleSetError> {
        let rule_set = self.load(taxonomy_uuid, taxon_uuid)?;
        Ok(compile_rule_set(rule_set.rules()))
    }

    /// Replaces the rule set of one taxon with `rules`.
    ///
    /// # Side effects
    /// - Registers `taxon_uuid` for product regeneration when anything
    ///   changed.
    /// - Emits `taxon_rules_update` events.
    ///
    /// # Errors
    /// - `TaxonNotFound` when the taxon is not part of the taxonomy.
    /// - `Validation` for the first invalid entry; nothing is written.
    /// - `Storage` when loading or persisting fails.
    pub fn update_taxon_rules(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
        rules: &[RuleInput],
        registry: &mut DeferredWorkRegistry,
    ) -> Result<TaxonRulesResponse, RuleSetError> {
        let current = self.load(taxonomy_uuid, taxon_uuid)?;

        let mut reconciled = match reconcile_rules(&current, rules) {
            Ok(reconciled) => reconciled,
            Err(err) => {
                info!(
                    "event=taxon_rules_update module=service status=rejected taxon_id={taxon_uuid} error={err}"
                );
                return Err(err.into());
            }
        };

        if !reconciled.changed() {
            info!(
                "event=taxon_rules_update module=service status=unchanged taxon_id={taxon_uuid} rules={}",
                reconciled.rule_set.rules().len()
            );
            return Ok(TaxonRulesResponse::from(&reconciled.rule_set));
        }

        if let Err(err) = self.repo.apply_rule_changes(taxon_uuid, &reconciled.changes) {
            error!(
                "event=taxon_rules_update module=service status=error taxon_id={taxon_uuid} error={err}"
            );
            return Err(RuleSetError::Storage(err));
        }
        registry.register_product_regeneration(taxon_uuid);

        for event in reconciled.rule_set.take_events() {
            debug!(
                "event={} module=service taxon_id={taxon_uuid} rule_id={}",
                event.name(),
                event.rule_uuid()
            );
        }
        info!(
            "event=taxon_rules_update module=service status=ok taxon_id={taxon_uuid} added={} updated={} removed={}",
            reconciled.changes.added.len(),
            reconciled.changes.updated.len(),
            reconciled.changes.removed.len()
        );

        Ok(TaxonRulesResponse::from(&reconciled.rule_set))
    }

    fn load(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> Result<TaxonRuleSet, RuleSetError> {
        match self.repo.load_taxon_rules(taxonomy_uuid, taxon_uuid) {
            Ok(Some(rule_set)) => Ok(rule_set),
            Ok(None) => Err(RuleSetError::TaxonNotFound(taxon_uuid)),
            Err(err) => {
                error!(
                    "event=taxon_rules_load module=service status=error taxon_id={taxon_uuid} error={err}"
                );
                Err(RuleSetError::Storage(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{reconcile_rules, RuleInput, RuleSetError, TaxonRuleService};
    use crate::model::rule::{MatchPolicy, RuleFields, RuleValidationError, TaxonRule};
    use crate::model::taxonomy::{TaxonId, TaxonRuleError, TaxonRuleSet, TaxonomyId};
    use crate::repo::rule_repo::{RuleChangeSet, RuleRepository};
    use crate::repo::{RepoError, RepoResult};
    use crate::work::registry::DeferredWorkRegistry;
    use std::cell::RefCell;
    use uuid::Uuid;

    struct FakeRuleRepo {
        rule_set: Option<TaxonRuleSet>,
        applied: RefCell<Vec<RuleChangeSet>>,
        fail_writes: bool,
    }

    impl FakeRuleRepo {
        fn with(rule_set: TaxonRuleSet) -> Self {
            Self {
                rule_set: Some(rule_set),
                applied: RefCell::new(Vec::new()),
                fail_writes: false,
            }
        }
    }

    impl RuleRepository for &FakeRuleRepo {
        fn load_taxon_rules(
            &self,
            _taxonomy_uuid: TaxonomyId,
            _taxon_uuid: TaxonId,
        ) -> RepoResult<Option<TaxonRuleSet>> {
            Ok(self.rule_set.clone())
        }

        fn apply_rule_changes(
            &self,
            _taxon_uuid: TaxonId,
            changes: &RuleChangeSet,
        ) -> RepoResult<()> {
            if self.fail_writes {
                return Err(RepoError::InvalidData("disk full".to_string()));
            }
            self.applied.borrow_mut().push(changes.clone());
            Ok(())
        }
    }

    fn rule(taxon: TaxonId, kind: &str, value: &str) -> TaxonRule {
        TaxonRule::from_fields(
            Uuid::new_v4(),
            taxon,
            RuleFields::normalize(kind, value, None, None).unwrap(),
        )
    }

    fn input(kind: &str, value: &str) -> RuleInput {
        RuleInput::new(kind, value)
    }

    #[test]
    fn minimal_diff_removes_and_adds_without_updates() {
        let taxon = Uuid::new_v4();
        let a = rule(taxon, "product_name", "a");
        let b = rule(taxon, "product_name", "b");
        let c = rule(taxon, "product_name", "c");
        let current = TaxonRuleSet::new(taxon, vec![a.clone(), b.clone(), c.clone()]);

        let reconciled = reconcile_rules(
            &current,
            &[
                input("product_name", "a"),
                input("product_name", "b"),
                input("product_name", "d"),
            ],
        )
        .unwrap();

        assert_eq!(reconciled.changes.removed, vec![c.uuid()]);
        assert_eq!(reconciled.changes.added.len(), 1);
        assert_eq!(reconciled.changes.added[0].value(), "d");
        assert!(reconciled.changes.updated.is_empty());
        assert!(reconciled.rule_set.get(a.uuid()).is_some());
        assert!(reconciled.rule_set.get(b.uuid()).is_some());
    }

    #[test]
    fn id_match_with_new_content_updates_in_place() {
        let taxon = Uuid::new_v4();
        let a = rule(taxon, "product_name", "shirt");
        let current = TaxonRuleSet::new(taxon, vec![a.clone()]);

        let reconciled = reconcile_rules(
            &current,
            &[input("product_name", "t-shirt")
                .with_id(a.uuid())
                .with_match_policy("contains")],
        )
        .unwrap();

        assert_eq!(reconciled.changes.updated.len(), 1);
        let updated = &reconciled.changes.updated[0];
        assert_eq!(updated.uuid(), a.uuid());
        assert_eq!(updated.value(), "t-shirt");
        assert!(reconciled.changes.added.is_empty());
        assert!(reconciled.changes.removed.is_empty());
    }

    #[test]
    fn id_match_keeps_omitted_policy_and_property_name() {
        let taxon = Uuid::new_v4();
        let name =
            TaxonRule::create(taxon, "product_name", "shirt", Some("contains"), None).unwrap();
        let colour =
            TaxonRule::create(taxon, "product_property", "red", None, Some("colour")).unwrap();
        let current = TaxonRuleSet::new(taxon, vec![name.clone(), colour.clone()]);

        let reconciled = reconcile_rules(
            &current,
            &[
                input("product_name", "shirt").with_id(name.uuid()),
                input("product_property", "blue").with_id(colour.uuid()),
            ],
        )
        .unwrap();

        assert_eq!(reconciled.changes.updated.len(), 1);
        let updated = &reconciled.changes.updated[0];
        assert_eq!(updated.uuid(), colour.uuid());
        assert_eq!(updated.value(), "blue");
        assert_eq!(updated.property_name(), Some("colour"));
        assert_eq!(
            reconciled.rule_set.get(name.uuid()).map(TaxonRule::match_policy),
            Some(MatchPolicy::Contains)
        );
    }

    #[test]
    fn id_claims_win_over_content_matches_of_earlier_entries() {
        let taxon = Uuid::new_v4();
        let a = rule(taxon, "product_name", "a");
        let current = TaxonRuleSet::new(taxon, vec![a.clone()]);

        // The id-less entry comes first but must not consume `a`.
        let reconciled = reconcile_rules(
            &current,
            &[
                input("product_name", "a"),
                input("product_name", "a").with_id(a.uuid()),
            ],
        )
        .unwrap();

        assert!(reconciled.changes.updated.is_empty());
        assert!(reconciled.changes.removed.is_empty());
        assert_eq!(reconciled.changes.added.len(), 1);
    }

    #[test]
    fn first_validation_error_aborts_without_mutation() {
        let taxon = Uuid::new_v4();
        let current = TaxonRuleSet::new(taxon, vec![rule(taxon, "product_name", "a")]);

        let err = reconcile_rules(
            &current,
            &[
                input("product_name", "ok"),
                input("product_colour", "red"),
                input("product_property", "red"),
            ],
        )
        .unwrap_err();

        assert_eq!(
            err,
            TaxonRuleError::Validation(RuleValidationError::InvalidType(
                "product_colour".to_string()
            ))
        );
        assert_eq!(current.rules().len(), 1);
    }

    #[test]
    fn unchanged_submission_writes_and_registers_nothing() {
        let taxon = Uuid::new_v4();
        let current = TaxonRuleSet::new(
            taxon,
            vec![
                rule(taxon, "product_name", "a"),
                rule(taxon, "product_sku", "b"),
            ],
        );
        let repo = FakeRuleRepo::with(current.clone());
        let service = TaxonRuleService::new(&repo);
        let mut registry = DeferredWorkRegistry::new();

        let response = service
            .update_taxon_rules(
                Uuid::new_v4(),
                taxon,
                &[input(" PRODUCT_SKU ", "b "), input("product_name", "a")],
                &mut registry,
            )
            .unwrap();

        assert!(repo.applied.borrow().is_empty());
        assert!(registry.is_empty());
        assert_eq!(response.rules.len(), 2);
        assert_eq!(response.rules[0].id, current.rules()[0].uuid());
    }

    #[test]
    fn first_add_registers_only_product_regeneration() {
        let taxon = Uuid::new_v4();
        let repo = FakeRuleRepo::with(TaxonRuleSet::new(taxon, Vec::new()));
        let service = TaxonRuleService::new(&repo);
        let mut registry = DeferredWorkRegistry::new();

        service
            .update_taxon_rules(
                Uuid::new_v4(),
                taxon,
                &[input("product_name", "shirt")],
                &mut registry,
            )
            .unwrap();

        assert_eq!(repo.applied.borrow().len(), 1);
        assert_eq!(registry.pending_product_regenerations(), vec![taxon]);
        assert!(registry.pending_hierarchy_rebuilds().is_empty());
    }

    #[test]
    fn storage_failure_is_not_a_validation_failure() {
        let taxon = Uuid::new_v4();
        let mut repo = FakeRuleRepo::with(TaxonRuleSet::new(taxon, Vec::new()));
        repo.fail_writes = true;
        let service = TaxonRuleService::new(&repo);
        let mut registry = DeferredWorkRegistry::new();

        let err = service
            .update_taxon_rules(
                Uuid::new_v4(),
                taxon,
                &[input("product_name", "shirt")],
                &mut registry,
            )
            .unwrap_err();

        assert!(matches!(err, RuleSetError::Storage(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_taxon_is_not_found() {
        let repo = FakeRuleRepo {
            rule_set: None,
            applied: RefCell::new(Vec::new()),
            fail_writes: false,
        };
        let service = TaxonRuleService::new(&repo);
        let taxon = Uuid::new_v4();

        let err = service.get_taxon_rules(Uuid::new_v4(), taxon).unwrap_err();
        assert!(matches!(err, RuleSetError::TaxonNotFound(id) if id == taxon));
    }
}
