//! Per-unit-of-work registry of owed derived-state recomputation.
//!
//! # Invariants
//! - Both sets are deduplicated; registering an id twice is a no-op.
//! - Snapshots are sorted by id so collaborator call order is stable.
//! - A registry lives exactly as long as one pipeline execution.

use crate::model::taxonomy::{TaxonId, TaxonomyId};
use std::collections::BTreeSet;

/// Deduplicated hierarchy rebuild / product regeneration requests.
#[derive(Debug, Default)]
pub struct DeferredWorkRegistry {
    hierarchy_rebuilds: BTreeSet<TaxonomyId>,
    product_regenerations: BTreeSet<TaxonId>,
}

impl DeferredWorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a hierarchy rebuild for one taxonomy.
    ///
    /// Returns `false` when the taxonomy was already registered.
    pub fn register_hierarchy_rebuild(&mut self, taxonomy_uuid: TaxonomyId) -> bool {
        self.hierarchy_rebuilds.insert(taxonomy_uuid)
    }

    /// Requests product regeneration for one taxon.
    ///
    /// Returns `false` when the taxon was already registered.
    pub fn register_product_regeneration(&mut self, taxon_uuid: TaxonId) -> bool {
        self.product_regenerations.insert(taxon_uuid)
    }

    pub fn pending_hierarchy_rebuilds(&self) -> Vec<TaxonomyId> {
        self.hierarchy_rebuilds.iter().copied().collect()
    }

    pub fn pending_product_regenerations(&self) -> Vec<TaxonId> {
        self.product_regenerations.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hierarchy_rebuilds.is_empty() && self.product_regenerations.is_empty()
    }
}
