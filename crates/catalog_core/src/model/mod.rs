//! Catalog taxonomy domain model.
//!
//! # Responsibility
//! - Define taxonomy trees, taxons and their declarative membership rules.
//! - Keep rule normalization and validation in one place.
//!
//! # Invariants
//! - Every domain object is identified by a stable UUID.
//! - Rules are only created through the owning taxon's rule set.

pub mod rule;
pub mod taxonomy;
