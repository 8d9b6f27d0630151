//! Reclassification pipeline middleware.
//!
//! # Responsibility
//! - Run one command with a fresh `DeferredWorkRegistry`.
//! - After the command succeeds, run owed hierarchy rebuilds and then owed
//!   product regenerations.
//! - Retry work left stale by an earlier failed deferred phase.
//!
//! # Invariants
//! - The deferred phase never runs when the command fails or the request
//!   was cancelled.
//! - Cancellation before the handler is `PipelineError::Cancelled`; after the
//!   handler committed it is `PipelineError::Deferred`.
//! - Every hierarchy rebuild precedes every product regeneration.
//! - Each id is handed to its collaborator at most once per run.
//! - A stale marker is cleared only after its collaborator call succeeded.
//! - Deferred failures never roll back the committed primary write.

use crate::model::taxonomy::{TaxonId, TaxonomyId};
use crate::repo::{RepoError, StaleWorkRepository};
use crate::work::cancel::CancellationToken;
use crate::work::collaborators::{CollaboratorError, HierarchyRebuilder, ProductRegenerator};
use crate::work::registry::DeferredWorkRegistry;
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Per-execution state handed to a command handler.
pub struct CommandContext<'a> {
    conn: &'a Connection,
    registry: DeferredWorkRegistry,
    cancel: &'a CancellationToken,
}

impl<'a> CommandContext<'a> {
    fn new(conn: &'a Connection, cancel: &'a CancellationToken) -> Self {
        Self {
            conn,
            registry: DeferredWorkRegistry::new(),
            cancel,
        }
    }

    /// Connection the primary write runs on.
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    pub fn registry(&self) -> &DeferredWorkRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeferredWorkRegistry {
        &mut self.registry
    }

    pub fn cancellation(&self) -> &'a CancellationToken {
        self.cancel
    }

    fn into_registry(self) -> DeferredWorkRegistry {
        self.registry
    }
}

/// One unit of work executed through the pipeline.
pub trait Command {
    type Output;
    type Error: Error + 'static;

    /// Stable name used in log events.
    fn name(&self) -> &'static str;

    /// Performs the primary mutation and registers owed recomputation.
    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output, Self::Error>;
}

/// What the deferred phase did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredWorkReport {
    /// Taxonomies registered by the command itself.
    pub registered_hierarchy_rebuilds: Vec<TaxonomyId>,
    /// Taxons registered by the command itself.
    pub registered_product_regenerations: Vec<TaxonId>,
    /// Taxonomies rebuilt, in call order (registered + stale).
    pub rebuilt_taxonomies: Vec<TaxonomyId>,
    /// Taxons regenerated, in call order (registered + stale).
    pub regenerated_taxons: Vec<TaxonId>,
}

impl DeferredWorkReport {
    pub fn is_empty(&self) -> bool {
        self.rebuilt_taxonomies.is_empty() && self.regenerated_taxons.is_empty()
    }
}

/// Successful command result plus its deferred phase report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome<T> {
    pub output: T,
    pub deferred: DeferredWorkReport,
}

/// Deferred phase failure. The primary write is already committed.
#[derive(Debug)]
pub enum DeferredWorkError {
    HierarchyRebuild {
        taxonomy_uuid: TaxonomyId,
        source: CollaboratorError,
    },
    ProductRegeneration {
        taxon_uuid: TaxonId,
        source: CollaboratorError,
    },
    /// Cancelled after the command committed; owed work stays marked.
    Cancelled,
    /// Stale markers could not be read or cleared.
    MarkerStore(RepoError),
}

impl Display for DeferredWorkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HierarchyRebuild {
                taxonomy_uuid,
                source,
            } => write!(
                f,
                "hierarchy rebuild failed for taxonomy {taxonomy_uuid} after commit: {source}"
            ),
            Self::ProductRegeneration { taxon_uuid, source } => write!(
                f,
                "product regeneration failed for taxon {taxon_uuid} after commit: {source}"
            ),
            Self::Cancelled => write!(f, "deferred phase cancelled after commit"),
            Self::MarkerStore(err) => write!(f, "stale marker store failed after commit: {err}"),
        }
    }
}

impl Error for DeferredWorkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::HierarchyRebuild { source, .. } | Self::ProductRegeneration { source, .. } => {
                Some(source.as_ref())
            }
            Self::Cancelled => None,
            Self::MarkerStore(err) => Some(err),
        }
    }
}

impl From<RepoError> for DeferredWorkError {
    fn from(value: RepoError) -> Self {
        Self::MarkerStore(value)
    }
}

/// Pipeline failure, keeping command and deferred failures apart.
#[derive(Debug)]
pub enum PipelineError<E> {
    /// Command handler failed; nothing was deferred.
    Command(E),
    /// Request cancelled before the handler ran; nothing was written.
    Cancelled,
    /// Command committed but derived-state recomputation failed.
    Deferred(DeferredWorkError),
}

impl<E: Display> Display for PipelineError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::Deferred(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for PipelineError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Command(err) => Some(err),
            Self::Cancelled => None,
            Self::Deferred(err) => Some(err),
        }
    }
}

/// Middleware wrapping every catalog command.
pub struct ReclassificationPipeline<'conn, S, H, P> {
    conn: &'conn Connection,
    stale: S,
    hierarchy: H,
    products: P,
}

impl<'conn, S, H, P> ReclassificationPipeline<'conn, S, H, P>
where
    S: StaleWorkRepository,
    H: HierarchyRebuilder,
    P: ProductRegenerator,
{
    pub fn new(conn: &'conn Connection, stale: S, hierarchy: H, products: P) -> Self {
        Self {
            conn,
            stale,
            hierarchy,
            products,
        }
    }

    /// Runs `command`, then its deferred phase.
    ///
    /// # Errors
    /// - `Cancelled` when `cancel` fired before the handler ran.
    /// - `Command` when the handler fails.
    /// - `Deferred` when a collaborator fails or `cancel` fires after the
    ///   handler committed.
    pub fn execute<C: Command>(
        &self,
        command: C,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome<C::Output>, PipelineError<C::Error>> {
        let name = command.name();
        if cancel.is_cancelled() {
            warn!("event=command_execute module=work status=cancelled command={name} stage=before");
            return Err(PipelineError::Cancelled);
        }

        let mut ctx = CommandContext::new(self.conn, cancel);
        let output = match command.execute(&mut ctx) {
            Ok(output) => output,
            Err(err) => {
                warn!("event=command_execute module=work status=error command={name} error={err}");
                return Err(PipelineError::Command(err));
            }
        };

        if cancel.is_cancelled() {
            warn!("event=command_execute module=work status=cancelled command={name} stage=after");
            return Err(PipelineError::Deferred(DeferredWorkError::Cancelled));
        }

        let registry = ctx.into_registry();
        let deferred = self
            .run_deferred(name, &registry, cancel)
            .map_err(PipelineError::Deferred)?;

        Ok(CommandOutcome { output, deferred })
    }

    /// Runs only the stale-marker sweep.
    pub fn retry_stale_work(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DeferredWorkReport, DeferredWorkError> {
        self.run_deferred("retry_stale_work", &DeferredWorkRegistry::new(), cancel)
    }

    fn run_deferred(
        &self,
        command: &'static str,
        registry: &DeferredWorkRegistry,
        cancel: &CancellationToken,
    ) -> Result<DeferredWorkReport, DeferredWorkError> {
        let started_at = Instant::now();
        let result = self.process(registry, cancel);
        let duration_ms = started_at.elapsed().as_millis();

        match &result {
            Ok(report) => info!(
                "event=deferred_phase module=work status=ok command={command} rebuilt={} regenerated={} duration_ms={duration_ms}",
                report.rebuilt_taxonomies.len(),
                report.regenerated_taxons.len()
            ),
            Err(err) => error!(
                "event=deferred_phase module=work status=error command={command} duration_ms={duration_ms} error={err}"
            ),
        }
        result
    }

    fn process(
        &self,
        registry: &DeferredWorkRegistry,
        cancel: &CancellationToken,
    ) -> Result<DeferredWorkReport, DeferredWorkError> {
        let registered_hierarchy_rebuilds = registry.pending_hierarchy_rebuilds();
        let registered_product_regenerations = registry.pending_product_regenerations();

        let taxonomies: BTreeSet<TaxonomyId> = registered_hierarchy_rebuilds
            .iter()
            .copied()
            .chain(self.stale.stale_hierarchies()?)
            .collect();
        let taxons: BTreeSet<TaxonId> = registered_product_regenerations
            .iter()
            .copied()
            .chain(self.stale.stale_product_sets()?)
            .collect();

        let mut report = DeferredWorkReport {
            registered_hierarchy_rebuilds,
            registered_product_regenerations,
            ..DeferredWorkReport::default()
        };

        for taxonomy_uuid in taxonomies {
            cancel.check().map_err(|_| DeferredWorkError::Cancelled)?;
            self.hierarchy
                .rebuild_hierarchy(taxonomy_uuid, cancel)
                .map_err(|source| DeferredWorkError::HierarchyRebuild {
                    taxonomy_uuid,
                    source,
                })?;
            self.stale.clear_hierarchy_marker(taxonomy_uuid)?;
            report.rebuilt_taxonomies.push(taxonomy_uuid);
        }

        for taxon_uuid in taxons {
            cancel.check().map_err(|_| DeferredWorkError::Cancelled)?;
            self.products
                .regenerate_products_for_taxon(taxon_uuid, cancel)
                .map_err(|source| DeferredWorkError::ProductRegeneration { taxon_uuid, source })?;
            self.stale.clear_product_marker(taxon_uuid)?;
            report.regenerated_taxons.push(taxon_uuid);
        }

        Ok(report)
    }
}
