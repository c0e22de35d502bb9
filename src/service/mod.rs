//! Service layer for business logic orchestration
//!
//! This module contains the service layer that orchestrates the manifest
//! commands, separating concerns from the CLI layer in main.rs.

pub mod manifests;

pub use manifests::{
    parse_key_value_pairs, render_manifest_info, CreateConfig, CreateReport, ManifestService,
    ServiceError, TagOutcome, TagStatus,
};
