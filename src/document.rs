//! Document loading
//!
//! Reads a YAML, JSON or TOML document (picked by extension), expands
//! `$VAR`/`${VAR}` references from the environment and returns the tree as
//! JSON. Every failure here is a load error: nothing has been sent to the
//! portal yet.

use serde_json::Value;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a document could not be loaded
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: undefined variable '{var}'")]
    Template { path: PathBuf, var: String },

    #[error("{path}: invalid {format}: {message}")]
    Parse {
        path: PathBuf,
        format: Format,
        message: String,
    },

    #[error("{0}: unsupported document type (expected .yaml, .yml, .json or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("{0}: document root must be a map")]
    NotAMap(PathBuf),
}

impl From<DocumentError> for reconcile::Error {
    fn from(err: DocumentError) -> Self {
        reconcile::Error::load(err.to_string())
    }
}

/// Document format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Yaml => write!(f, "YAML"),
            Format::Json => write!(f, "JSON"),
            Format::Toml => write!(f, "TOML"),
        }
    }
}

impl Format {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Format::Yaml),
            "json" => Some(Format::Json),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }
}

/// Load a document, expanding variables from the process environment
pub fn load(path: &Path) -> Result<Value, DocumentError> {
    load_with(path, |name| std::env::var(name).ok())
}

/// Load a document with a custom variable lookup
pub fn load_with<L>(path: &Path, lookup: L) -> Result<Value, DocumentError>
where
    L: Fn(&str) -> Option<String>,
{
    let format =
        Format::from_path(path).ok_or_else(|| DocumentError::UnsupportedFormat(path.into()))?;
    let content = fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.into(),
        source,
    })?;
    let rendered = render(&content, lookup).map_err(|var| DocumentError::Template {
        path: path.into(),
        var,
    })?;
    log::debug!("Loaded {} ({format})", path.display());
    parse(&rendered, format, path)
}

/// Expand variable references; returns the first undefined variable name
pub fn render<L>(content: &str, lookup: L) -> Result<String, String>
where
    L: Fn(&str) -> Option<String>,
{
    shellexpand::env_with_context(content, |name: &str| match lookup(name) {
        Some(value) => Ok(Some(value)),
        None => Err(()),
    })
    .map(Cow::into_owned)
    .map_err(|e| e.var_name)
}

fn parse(content: &str, format: Format, path: &Path) -> Result<Value, DocumentError> {
    let parse_error = |message: String| DocumentError::Parse {
        path: path.into(),
        format,
        message,
    };
    let value: Value = match format {
        Format::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
    };
    match value {
        Value::Object(_) => Ok(value),
        // An empty YAML file parses as null
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        _ => Err(DocumentError::NotAMap(path.into())),
    }
}
