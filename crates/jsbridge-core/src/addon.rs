//! Addon manifests and per-addon namespacing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid manifest for '{id}': {source}")]
    Parse {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid addon id '{0}'")]
    InvalidId(String),
    #[error("manifest for '{id}' has an empty {field}")]
    EmptyField { id: String, field: &'static str },
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").unwrap_or_else(|e| unreachable!("{e}"))
    })
}

/// Addon ids become hostnames and keybind prefixes, so they stay simple.
/// No `_`: it separates the addon from the local id in scoped identifiers.
pub fn validate_addon_id(id: &str) -> Result<(), ManifestError> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(ManifestError::InvalidId(id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonManifest {
    /// The addon directory name; not part of the JSON.
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub entry: String,
    /// Directory the manifest was read from.
    #[serde(skip)]
    pub base_path: Option<PathBuf>,
}

impl AddonManifest {
    pub fn from_json(id: &str, json: &str) -> Result<Self, ManifestError> {
        validate_addon_id(id)?;
        let mut manifest: Self =
            serde_json::from_str(json).map_err(|source| ManifestError::Parse {
                id: id.to_string(),
                source,
            })?;
        manifest.id = id.to_string();

        for (field, value) in [("name", &manifest.name), ("entry", &manifest.entry)] {
            if value.trim().is_empty() {
                return Err(ManifestError::EmptyField {
                    id: id.to_string(),
                    field,
                });
            }
        }
        Ok(manifest)
    }

    /// Read `<dir>/manifest.json`; the directory name is the addon id.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ManifestError::InvalidId(dir.display().to_string()))?;
        let path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path).map_err(|source| ManifestError::Io { path, source })?;
        let mut manifest = Self::from_json(id, &json)?;
        manifest.base_path = Some(dir.to_path_buf());
        Ok(manifest)
    }
}

/// Scopes addon-chosen identifiers: `<prefix>_<addon>_<local>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
    addon: String,
}

impl Namespace {
    pub fn new(prefix: &str, addon: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            addon: addon.to_string(),
        }
    }

    pub fn scope(&self, local: &str) -> String {
        format!("{}_{}_{}", self.prefix, self.addon, local)
    }

    pub fn addon(&self) -> &str {
        &self.addon
    }
}
