pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod manifest;
pub mod manifests;
pub mod registry;
pub mod service;

pub use anyhow::Result;
