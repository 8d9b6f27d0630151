//! Catalog commands executed through `ReclassificationPipeline`.
//!
//! Each command opens its repository on the context connection, runs one
//! service call and leaves owed recomputation in the context registry.

use crate::model::taxonomy::{Taxon, TaxonId, Taxonomy, TaxonomyId};
use crate::repo::rule_repo::SqliteRuleRepository;
use crate::repo::taxonomy_repo::SqliteTaxonomyRepository;
use crate::service::rule_set_service::{
    RuleInput, RuleSetError, TaxonRuleService, TaxonRulesResponse,
};
use crate::service::taxon_service::{TaxonService, TaxonServiceError, UpdateTaxonRequest};
use crate::work::pipeline::{Command, CommandContext};
use std::error::Error;

/// Replaces the rule set of one taxon.
#[derive(Debug, Clone)]
pub struct UpdateTaxonRulesCommand {
    pub taxonomy_id: TaxonomyId,
    pub taxon_id: TaxonId,
    pub rules: Vec<RuleInput>,
}

impl Command for UpdateTaxonRulesCommand {
    type Output = TaxonRulesResponse;
    type Error = RuleSetError;

    fn name(&self) -> &'static str {
        "update_taxon_rules"
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        let repo = SqliteRuleRepository::try_new(ctx.connection()).map_err(RuleSetError::Storage)?;
        TaxonRuleService::new(repo).update_taxon_rules(
            self.taxonomy_id,
            self.taxon_id,
            &self.rules,
            ctx.registry_mut(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaxonomyCommand {
    pub name: String,
}

impl Command for CreateTaxonomyCommand {
    type Output = (Taxonomy, Taxon);
    type Error = TaxonServiceError;

    fn name(&self) -> &'static str {
        "create_taxonomy"
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        let repo = SqliteTaxonomyRepository::try_new(ctx.connection())?;
        TaxonService::new(repo).create_taxonomy(&self.name, ctx.registry_mut())
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaxonCommand {
    pub taxonomy_id: TaxonomyId,
    pub parent_id: TaxonId,
    pub name: String,
    pub automatic: bool,
}

impl Command for CreateTaxonCommand {
    type Output = Taxon;
    type Error = TaxonServiceError;

    fn name(&self) -> &'static str {
        "create_taxon"
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        let repo = SqliteTaxonomyRepository::try_new(ctx.connection())?;
        TaxonService::new(repo).create_taxon(
            self.taxonomy_id,
            self.parent_id,
            &self.name,
            self.automatic,
            ctx.registry_mut(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct UpdateTaxonCommand {
    pub taxonomy_id: TaxonomyId,
    pub taxon_id: TaxonId,
    pub request: UpdateTaxonRequest,
}

impl Command for UpdateTaxonCommand {
    type Output = Taxon;
    type Error = TaxonServiceError;

    fn name(&self) -> &'static str {
        "update_taxon"
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        let repo = SqliteTaxonomyRepository::try_new(ctx.connection())?;
        TaxonService::new(repo).update_taxon(
            self.taxonomy_id,
            self.taxon_id,
            self.request,
            ctx.registry_mut(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct DeleteTaxonCommand {
    pub taxonomy_id: TaxonomyId,
    pub taxon_id: TaxonId,
}

impl Command for DeleteTaxonCommand {
    type Output = ();
    type Error = TaxonServiceError;

    fn name(&self) -> &'static str {
        "delete_taxon"
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        let repo = SqliteTaxonomyRepository::try_new(ctx.connection())?;
        TaxonService::new(repo).delete_taxon(self.taxonomy_id, self.taxon_id, ctx.registry_mut())
    }
}

/// Ad-hoc unit of work composed of several service calls.
///
/// All calls share one registry, so ids registered by several of them are
/// recomputed once.
pub struct UnitOfWork<F> {
    name: &'static str,
    run: F,
}

impl<F> UnitOfWork<F> {
    pub fn new<T, E>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(&mut CommandContext<'_>) -> Result<T, E>,
    {
        Self { name, run }
    }
}

impl<F, T, E> Command for UnitOfWork<F>
where
    F: FnOnce(&mut CommandContext<'_>) -> Result<T, E>,
    E: Error + 'static,
{
    type Output = T;
    type Error = E;

    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error> {
        (self.run)(ctx)
    }
}
