//! PJSIP option tables
//!
//! The option schema is the single source of truth for which options an
//! endpoint, auth or AOR section may carry and what their defaults are.
//! It is side-loaded from a JSON resource so operators can extend it
//! without a rebuild.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUNDLED_OPTIONS: &str = include_str!("../../../assets/pjsip_options.json");

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed option schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Option table '{0}' is empty")]
    EmptyTable(SectionKind),

    #[error("Option '{option}' declared twice in table '{kind}'")]
    DuplicateOption { kind: SectionKind, option: String },
}

/// Physical section type an option table applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Endpoint,
    Auth,
    Aor,
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionKind::Endpoint => write!(f, "endpoint"),
            SectionKind::Auth => write!(f, "auth"),
            SectionKind::Aor => write!(f, "aor"),
        }
    }
}

/// One declared option and its default value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDef {
    pub name: String,
    #[serde(default)]
    pub default: Option<String>,
}

impl OptionDef {
    /// Default value, treating an empty string like no default
    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref().filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionSchema {
    endpoint: Vec<OptionDef>,
    auth: Vec<OptionDef>,
    aor: Vec<OptionDef>,
}

impl OptionSchema {
    /// Parse and check a JSON option schema
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schema: OptionSchema = serde_json::from_str(json)?;

        for kind in [SectionKind::Endpoint, SectionKind::Auth, SectionKind::Aor] {
            let options = schema.options(kind);
            if options.is_empty() {
                return Err(SchemaError::EmptyTable(kind));
            }

            let mut seen = HashSet::new();
            for option in options {
                if !seen.insert(option.name.as_str()) {
                    return Err(SchemaError::DuplicateOption {
                        kind,
                        option: option.name.clone(),
                    });
                }
            }
        }

        Ok(schema)
    }

    /// Option tables shipped with the binary
    pub fn bundled() -> Result<Self, SchemaError> {
        Self::from_json(BUNDLED_OPTIONS)
    }

    /// Load from `path`, or fall back to the bundled tables
    pub async fn load(path: Option<&Path>) -> Result<Self, SchemaError> {
        match path {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                let schema = Self::from_json(&json)?;
                tracing::info!("Loaded PJSIP option schema from {:?}", path);
                Ok(schema)
            }
            None => Self::bundled(),
        }
    }

    /// Options of one table, in declared order
    pub fn options(&self, kind: SectionKind) -> &[OptionDef] {
        match kind {
            SectionKind::Endpoint => &self.endpoint,
            SectionKind::Auth => &self.auth,
            SectionKind::Aor => &self.aor,
        }
    }

    pub fn contains(&self, kind: SectionKind, name: &str) -> bool {
        self.options(kind).iter().any(|o| o.name == name)
    }

    pub fn default_for(&self, kind: SectionKind, name: &str) -> Option<&str> {
        self.options(kind)
            .iter()
            .find(|o| o.name == name)
            .and_then(OptionDef::default_value)
    }
}
