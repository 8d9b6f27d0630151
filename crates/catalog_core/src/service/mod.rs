//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Register the derived-state work each use case owes; never run it.

pub mod commands;
pub mod rule_set_service;
pub mod taxon_service;
