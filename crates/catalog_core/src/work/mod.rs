//! Deferred reclassification work.
//!
//! # Responsibility
//! - Collect hierarchy rebuild / product regeneration requests during one
//!   command (`registry`).
//! - Run them after the command through the pipeline middleware
//!   (`pipeline`) against external collaborators (`collaborators`).

pub mod cancel;
pub mod collaborators;
pub mod pipeline;
pub mod registry;

pub use cancel::{CancellationToken, Cancelled};
pub use collaborators::{CollaboratorError, HierarchyRebuilder, ProductRegenerator};
pub use pipeline::{
    Command, CommandContext, CommandOutcome, DeferredWorkError, DeferredWorkReport,
    PipelineError, ReclassificationPipeline,
};
pub use registry::DeferredWorkRegistry;
