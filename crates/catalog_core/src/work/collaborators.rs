//! Contracts for the derived-state collaborators run after a command.
//!
//! Implementations own the actual hierarchy path and product matching
//! algorithms. Both calls may be repeated for the same id and must converge.

use crate::model::taxonomy::{TaxonId, TaxonomyId};
use crate::work::cancel::CancellationToken;
use std::error::Error;
use std::sync::Arc;

/// Boxed failure reported by a collaborator.
pub type CollaboratorError = Box<dyn Error + Send + Sync + 'static>;

/// Recomputes structural data (paths, depths, ordering) of one taxonomy.
pub trait HierarchyRebuilder {
    fn rebuild_hierarchy(
        &self,
        taxonomy_uuid: TaxonomyId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError>;
}

/// Recomputes which products belong to one taxon.
pub trait ProductRegenerator {
    fn regenerate_products_for_taxon(
        &self,
        taxon_uuid: TaxonId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError>;
}

impl<T: HierarchyRebuilder + ?Sized> HierarchyRebuilder for &T {
    fn rebuild_hierarchy(
        &self,
        taxonomy_uuid: TaxonomyId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError> {
        (**self).rebuild_hierarchy(taxonomy_uuid, cancel)
    }
}

impl<T: HierarchyRebuilder + ?Sized> HierarchyRebuilder for Arc<T> {
    fn rebuild_hierarchy(
        &self,
        taxonomy_uuid: TaxonomyId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError> {
        (**self).rebuild_hierarchy(taxonomy_uuid, cancel)
    }
}

impl<T: ProductRegenerator + ?Sized> ProductRegenerator for &T {
    fn regenerate_products_for_taxon(
        &self,
        taxon_uuid: TaxonId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError> {
        (**self).regenerate_products_for_taxon(taxon_uuid, cancel)
    }
}

impl<T: ProductRegenerator + ?Sized> ProductRegenerator for Arc<T> {
    fn regenerate_products_for_taxon(
        &self,
        taxon_uuid: TaxonId,
        cancel: &CancellationToken,
    ) -> Result<(), CollaboratorError> {
        (**self).regenerate_products_for_taxon(taxon_uuid, cancel)
    }
}
