//! Loading object manifests from YAML or JSON files.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::object::DynamicObject;

/// On-disk manifest encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// One or more `---` separated YAML documents.
    Yaml,
    /// A single object or an array of objects.
    Json,
}

impl ManifestFormat {
    /// Pick a format from a file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        if path.extension().is_some_and(|e| e == "json") {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// Parse every object in `content`.
///
/// # Errors
///
/// Returns an error if the content does not parse or an object is invalid.
pub fn parse_manifests(content: &str, format: ManifestFormat) -> Result<Vec<DynamicObject>> {
    let objects = match format {
        ManifestFormat::Yaml => parse_yaml(content)?,
        ManifestFormat::Json => parse_json(content)?,
    };

    objects.iter().try_for_each(DynamicObject::validate)?;
    Ok(objects)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_manifests(path: &Path) -> Result<Vec<DynamicObject>> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_manifests(&content, ManifestFormat::from_path(path))
}

fn parse_yaml(content: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        // Empty documents (a trailing `---`) are skipped.
        if value.is_null() {
            continue;
        }
        let object = serde_yaml::from_value(value)
            .map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        objects.push(object);
    }
    Ok(objects)
}

fn parse_json(content: &str) -> Result<Vec<DynamicObject>> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| Error::json_parse_failed(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| Error::json_parse_failed(e.to_string()))
        })
        .collect()
}
