//! PJSIP configuration store
//!
//! This module owns the `pjsip.conf` dialect shared with a running Asterisk:
//! - Order-preserving parser with comment association and duplicate handling
//! - Endpoint triples (endpoint, auth, AOR) with consistent cross-references
//! - Lossless serialization with backup-before-write
//! - Pre-add payload validation against the option schema
//!
//! Every operation builds a fresh store from disk, mutates it and writes the
//! whole file back. There is no cross-request lock; concurrent writers race
//! and the last full rewrite wins.

mod parser;
mod schema;
mod section;
mod store;
mod validation;


pub use parser::{parse, DuplicateSection, ParsedConfig};
pub use schema::{OptionDef, OptionSchema, SchemaError, SectionKind};
pub use section::{
    is_valid_endpoint_id, EndpointKeys, SectionBody, SectionKey, AOR_TEMPLATE, ENDPOINT_TEMPLATE,
};
pub use store::{append_endpoint, ConfigStore, EndpointSections};
pub use validation::{validate_create, validate_update};

use thiserror::Error;

use crate::server::backup::BackupError;

/// File-level failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup failed: {0}")]
    Backup(#[from] BackupError),
}

/// Endpoint operation failures
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    #[error("Endpoint already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid endpoint id: {0:?}")]
    InvalidId(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
