//! Catalog taxonomy core: rule model, rule set reconciliation, rule
//! compilation and the deferred reclassification pipeline.
//! This crate is the single source of truth for taxonomy invariants.

pub mod config;
pub mod db;
pub mod filter;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod work;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use filter::{compile_rule, compile_rule_set, CompiledRuleSet, QueryFilter, RuleCompilation};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::rule::{
    MatchPolicy, RuleFields, RuleType, RuleValidationError, TaxonRule, TaxonRuleId,
    RULE_VALUE_MAX_CHARS,
};
pub use model::taxonomy::{
    Taxon, TaxonId, TaxonRuleError, TaxonRuleEvent, TaxonRuleSet, TaxonValidationError, Taxonomy,
    TaxonomyId,
};
pub use repo::rule_repo::{RuleChangeSet, RuleRepository, SqliteRuleRepository};
pub use repo::taxonomy_repo::{SqliteTaxonomyRepository, TaxonomyRepository};
pub use repo::{RepoError, RepoResult, StaleWorkRepository};
pub use service::commands::{
    CreateTaxonCommand, CreateTaxonomyCommand, DeleteTaxonCommand, UnitOfWork,
    UpdateTaxonCommand, UpdateTaxonRulesCommand,
};
pub use service::rule_set_service::{
    reconcile_rules, Reconciled, RuleInput, RuleSetError, TaxonRuleResponse, TaxonRuleService,
    TaxonRulesResponse,
};
pub use service::taxon_service::{TaxonService, TaxonServiceError, UpdateTaxonRequest};
pub use work::{
    CancellationToken, Cancelled, CollaboratorError, Command, CommandContext, CommandOutcome,
    DeferredWorkError, DeferredWorkRegistry, DeferredWorkReport, HierarchyRebuilder,
    PipelineError, ProductRegenerator, ReclassificationPipeline,
};

/// Minimal health-check API for embedding binaries.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
