//! Taxon rule repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Load the rule set of one taxon, scoped to its taxonomy.
//! - Persist the outcome of one reconciliation atomically.
//!
//! # Invariants
//! - Loaded rules are re-validated; rows outside the whitelists surface
//!   as `InvalidData`.
//! - Rule order is `sort_order ASC, rule_uuid ASC`.
//! - Applying a non-empty change set marks the taxon's products stale in the
//!   same transaction.

use crate::db::migrations::ensure_current;
use crate::model::rule::{RuleFields, TaxonRule, TaxonRuleId};
use crate::model::taxonomy::{TaxonId, TaxonRuleSet, TaxonomyId};
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

/// Persisted effect of one rule set reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleChangeSet {
    pub added: Vec<TaxonRule>,
    pub updated: Vec<TaxonRule>,
    pub removed: Vec<TaxonRuleId>,
}

impl RuleChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Repository interface for taxon rule persistence.
pub trait RuleRepository {
    /// Loads the rules of `taxon_uuid`.
    ///
    /// Returns `None` when the taxon does not exist in `taxonomy_uuid`.
    fn load_taxon_rules(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> RepoResult<Option<TaxonRuleSet>>;

    /// Applies added/updated/removed rules in one transaction.
    fn apply_rule_changes(&self, taxon_uuid: TaxonId, changes: &RuleChangeSet)
        -> RepoResult<()>;
}

/// SQLite-backed rule repository.
pub struct SqliteRuleRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRuleRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_current(conn)?;
        Ok(Self { conn })
    }
}

impl RuleRepository for SqliteRuleRepository<'_> {
    fn load_taxon_rules(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> RepoResult<Option<TaxonRuleSet>> {
        let taxon_exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM taxons
                WHERE taxon_uuid = ?1
                  AND taxonomy_uuid = ?2
            );",
            params![taxon_uuid.to_string(), taxonomy_uuid.to_string()],
            |row| row.get(0),
        )?;
        if taxon_exists == 0 {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT rule_uuid, type, value, match_policy, property_name
             FROM taxon_rules
             WHERE taxon_uuid = ?1
             ORDER BY sort_order ASC, rule_uuid ASC;",
        )?;
        let mut rows = stmt.query([taxon_uuid.to_string()])?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next()? {
            rules.push(parse_rule_row(row, taxon_uuid)?);
        }

        Ok(Some(TaxonRuleSet::new(taxon_uuid, rules)))
    }

    fn apply_rule_changes(
        &self,
        taxon_uuid: TaxonId,
        changes: &RuleChangeSet,
    ) -> RepoResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        for rule_uuid in &changes.removed {
            tx.execute(
                "DELETE FROM taxon_rules
                 WHERE rule_uuid = ?1
                   AND taxon_uuid = ?2;",
                params![rule_uuid.to_string(), taxon_uuid.to_string()],
            )?;
        }

        for rule in &changes.updated {
            let changed = tx.execute(
                "UPDATE taxon_rules
                 SET type = ?3,
                     value = ?4,
                     match_policy = ?5,
                     property_name = ?6,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE rule_uuid = ?1
                   AND taxon_uuid = ?2;",
                params![
                    rule.uuid().to_string(),
                    taxon_uuid.to_string(),
                    rule.kind().as_str(),
                    rule.value(),
                    rule.match_policy().as_str(),
                    rule.property_name(),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::InvalidData(format!(
                    "rule {} does not belong to taxon {taxon_uuid}",
                    rule.uuid()
                )));
            }
        }

        let mut next_order: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1
             FROM taxon_rules
             WHERE taxon_uuid = ?1;",
            [taxon_uuid.to_string()],
            |row| row.get(0),
        )?;
        for rule in &changes.added {
            tx.execute(
                "INSERT INTO taxon_rules (
                    rule_uuid,
                    taxon_uuid,
                    type,
                    value,
                    match_policy,
                    property_name,
                    sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    rule.uuid().to_string(),
                    taxon_uuid.to_string(),
                    rule.kind().as_str(),
                    rule.value(),
                    rule.match_policy().as_str(),
                    rule.property_name(),
                    next_order,
                ],
            )?;
            next_order += 1;
        }

        let marked = tx.execute(
            "UPDATE taxons
             SET marked_for_regenerate_products = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE taxon_uuid = ?1;",
            [taxon_uuid.to_string()],
        )?;
        if marked == 0 {
            return Err(RepoError::TaxonNotFound(taxon_uuid));
        }

        tx.commit()?;
        Ok(())
    }
}

fn parse_rule_row(row: &Row<'_>, taxon_uuid: TaxonId) -> RepoResult<TaxonRule> {
    let uuid_text: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let value: String = row.get(2)?;
    let match_policy: String = row.get(3)?;
    let property_name: Option<String> = row.get(4)?;

    let uuid = parse_uuid(&uuid_text, "taxon_rules.rule_uuid")?;
    let fields = RuleFields::normalize(
        &kind,
        &value,
        Some(&match_policy),
        property_name.as_deref(),
    )
    .map_err(|err| RepoError::InvalidData(format!("rule {uuid}: {err}")))?;

    Ok(TaxonRule::from_fields(uuid, taxon_uuid, fields))
}
