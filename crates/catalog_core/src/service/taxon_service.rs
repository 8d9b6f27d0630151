//! Taxonomy structure use-case service.
//!
//! # Responsibility
//! - Validate tree invariants above the repository layer.
//! - Create, update, move and delete taxons and register the derived-state
//!   work each change owes.
//!
//! # Invariants
//! - Ids are resolved inside their taxonomy; foreign ids are "not found".
//! - The root is never re-parented or deleted.
//! - Moves must not create parent-child cycles.
//! - Sibling names are unique under one parent.

use crate::model::taxonomy::{Taxon, TaxonId, TaxonValidationError, Taxonomy, TaxonomyId};
use crate::repo::taxonomy_repo::TaxonomyRepository;
use crate::repo::RepoError;
use crate::work::registry::DeferredWorkRegistry;
use log::info;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Partial taxon update. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateTaxonRequest {
    pub name: Option<String>,
    pub parent_id: Option<TaxonId>,
    pub position: Option<i64>,
    pub automatic: Option<bool>,
}

/// Errors from taxonomy structure operations.
#[derive(Debug)]
pub enum TaxonServiceError {
    TaxonomyNotFound(TaxonomyId),
    TaxonNotFound(TaxonId),
    ParentNotFound(TaxonId),
    /// A sibling under the same parent already uses this name.
    DuplicateName { name: String },
    /// Move would place a taxon under itself or one of its descendants.
    CycleDetected {
        taxon_uuid: TaxonId,
        parent_uuid: TaxonId,
    },
    Validation(TaxonValidationError),
    Repo(RepoError),
}

impl Display for TaxonServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaxonomyNotFound(id) => write!(f, "taxonomy not found: {id}"),
            Self::TaxonNotFound(id) => write!(f, "taxon not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent taxon not found: {id}"),
            Self::DuplicateName { name } => {
                write!(f, "a sibling taxon named `{name}` already exists")
            }
            Self::CycleDetected {
                taxon_uuid,
                parent_uuid,
            } => write!(
                f,
                "move would create cycle: taxon {taxon_uuid} under parent {parent_uuid}"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaxonServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaxonValidationError> for TaxonServiceError {
    fn from(value: TaxonValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for TaxonServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::TaxonomyNotFound(id) => Self::TaxonomyNotFound(id),
            RepoError::TaxonNotFound(id) => Self::TaxonNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Taxonomy structure service facade.
pub struct TaxonService<R: TaxonomyRepository> {
    repo: R,
}

impl<R: TaxonomyRepository> TaxonService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates a taxonomy with a root taxon of the same name.
    pub fn create_taxonomy(
        &self,
        name: &str,
        registry: &mut DeferredWorkRegistry,
    ) -> Result<(Taxonomy, Taxon), TaxonServiceError> {
        let (taxonomy, root) = Taxonomy::new(name)?;
        self.repo.create_taxonomy(&taxonomy, &root)?;
        registry.register_hierarchy_rebuild(taxonomy.uuid);

        info!(
            "event=taxonomy_create module=service status=ok taxonomy_id={} root_id={}",
            taxonomy.uuid, root.uuid
        );
        Ok((taxonomy, root))
    }

    /// Appends a taxon under `parent_uuid`.
    pub fn create_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: TaxonId,
        name: &str,
        automatic: bool,
        registry: &mut DeferredWorkRegistry,
    ) -> Result<Taxon, TaxonServiceError> {
        self.repo
            .get_taxonomy(taxonomy_uuid)?
            .ok_or(TaxonServiceError::TaxonomyNotFound(taxonomy_uuid))?;
        self.repo
            .get_taxon(taxonomy_uuid, parent_uuid)?
            .ok_or(TaxonServiceError::ParentNotFound(parent_uuid))?;

        let taxon = Taxon::new(taxonomy_uuid, Some(parent_uuid), name, automatic)?;
        self.ensure_unique_name(&taxon)?;

        let created = self.repo.create_taxon(&taxon)?;
        registry.register_hierarchy_rebuild(taxonomy_uuid);
        if created.automatic {
            registry.register_product_regeneration(created.uuid);
        }

        info!(
            "event=taxon_create module=service status=ok taxonomy_id={taxonomy_uuid} taxon_id={} automatic={}",
            created.uuid, created.automatic
        );
        Ok(created)
    }

    /// Applies a partial update to one taxon.
    ///
    /// Name, parent or position changes owe a hierarchy rebuild; any change
    /// to an automatic taxon owes a product regeneration. An update that
    /// changes nothing writes nothing.
    ///
    /// # Errors
    /// - `Validation(RootLocked)` when re-parenting the root.
    /// - `CycleDetected` when the new parent is the taxon or a descendant.
    /// - `DuplicateName` when the resulting name clashes with a sibling.
    pub fn update_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
        request: UpdateTaxonRequest,
        registry: &mut DeferredWorkRegistry,
    ) -> Result<Taxon, TaxonServiceError> {
        let current = self.require_taxon(taxonomy_uuid, taxon_uuid)?;
        let mut next = current.clone();

        if let Some(name) = request.name.as_deref() {
            next.rename(name)?;
        }
        if let Some(parent_uuid) = request.parent_id {
            if current.parent_uuid != Some(parent_uuid) {
                self.ensure_valid_parent(&current, parent_uuid)?;
                next.set_parent(Some(parent_uuid))?;
            }
        }
        if let Some(position) = request.position {
            next.position = position.max(0);
        }
        if let Some(automatic) = request.automatic {
            next.automatic = automatic;
        }

        if next == current {
            return Ok(current);
        }
        if next.name != current.name || next.parent_uuid != current.parent_uuid {
            self.ensure_unique_name(&next)?;
        }

        let hierarchy_changed = next.name != current.name
            || next.parent_uuid != current.parent_uuid
            || next.position != current.position;
        if next.automatic {
            next.marked_for_regenerate_products = true;
        }

        self.repo.update_taxon(&next, hierarchy_changed)?;
        if hierarchy_changed {
            registry.register_hierarchy_rebuild(taxonomy_uuid);
        }
        if next.automatic {
            registry.register_product_regeneration(taxon_uuid);
        }

        info!(
            "event=taxon_update module=service status=ok taxonomy_id={taxonomy_uuid} taxon_id={taxon_uuid} hierarchy_changed={hierarchy_changed}"
        );
        Ok(next)
    }

    /// Deletes a childless, non-root taxon together with its rules.
    pub fn delete_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
        registry: &mut DeferredWorkRegistry,
    ) -> Result<(), TaxonServiceError> {
        let taxon = self.require_taxon(taxonomy_uuid, taxon_uuid)?;
        if taxon.is_root() {
            return Err(TaxonValidationError::RootLocked(taxon_uuid).into());
        }
        taxon.ensure_deletable(self.repo.has_children(taxon_uuid)?)?;

        self.repo.delete_taxon(taxonomy_uuid, taxon_uuid)?;
        registry.register_hierarchy_rebuild(taxonomy_uuid);

        info!(
            "event=taxon_delete module=service status=ok taxonomy_id={taxonomy_uuid} taxon_id={taxon_uuid}"
        );
        Ok(())
    }

    pub fn get_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> Result<Taxon, TaxonServiceError> {
        self.require_taxon(taxonomy_uuid, taxon_uuid)
    }

    /// Lists direct children ordered by position.
    pub fn list_children(
        &self,
        taxonomy_uuid: TaxonomyId,
        parent_uuid: TaxonId,
    ) -> Result<Vec<Taxon>, TaxonServiceError> {
        self.require_taxon(taxonomy_uuid, parent_uuid)?;
        self.repo
            .list_children(taxonomy_uuid, parent_uuid)
            .map_err(Into::into)
    }

    fn require_taxon(
        &self,
        taxonomy_uuid: TaxonomyId,
        taxon_uuid: TaxonId,
    ) -> Result<Taxon, TaxonServiceError> {
        self.repo
            .get_taxon(taxonomy_uuid, taxon_uuid)?
            .ok_or(TaxonServiceError::TaxonNotFound(taxon_uuid))
    }

    fn ensure_unique_name(&self, taxon: &Taxon) -> Result<(), TaxonServiceError> {
        let exists = self.repo.sibling_name_exists(
            taxon.taxonomy_uuid,
            taxon.parent_uuid,
            &taxon.name,
            Some(taxon.uuid),
        )?;
        if exists {
            return Err(TaxonServiceError::DuplicateName {
                name: taxon.name.clone(),
            });
        }
        Ok(())
    }

    fn ensure_valid_parent(
        &self,
        taxon: &Taxon,
        parent_uuid: TaxonId,
    ) -> Result<(), TaxonServiceError> {
        if taxon.is_root() {
            return Err(TaxonValidationError::RootLocked(taxon.uuid).into());
        }
        if parent_uuid == taxon.uuid {
            return Err(TaxonServiceError::CycleDetected {
                taxon_uuid: taxon.uuid,
                parent_uuid,
            });
        }
        self.repo
            .get_taxon(taxon.taxonomy_uuid, parent_uuid)?
            .ok_or(TaxonServiceError::ParentNotFound(parent_uuid))?;
        if self.would_create_cycle(taxon, parent_uuid)? {
            return Err(TaxonServiceError::CycleDetected {
                taxon_uuid: taxon.uuid,
                parent_uuid,
            });
        }
        Ok(())
    }

    fn would_create_cycle(
        &self,
        taxon: &Taxon,
        candidate_parent_uuid: TaxonId,
    ) -> Result<bool, TaxonServiceError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent_uuid);
        while let Some(current) = cursor {
            if current == taxon.uuid || !visited.insert(current) {
                return Ok(true);
            }
            let node = self
                .repo
                .get_taxon(taxon.taxonomy_uuid, current)?
                .ok_or(TaxonServiceError::ParentNotFound(current))?;
            cursor = node.parent_uuid;
        }
        Ok(false)
    }
}
