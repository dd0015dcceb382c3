//! Helpers for loading configuration files.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Load a configuration file; `.json` is parsed as JSON, anything else as TOML.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content).map_err(|e| Error::json_parse_failed(e.to_string()))
    } else {
        toml::from_str(&content).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }
}

/// Serialization helper for `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Write a duration as whole milliseconds.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    /// Read whole milliseconds into a duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(with = "duration_ms")]
        timeout: Duration,
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = \"a\"\ntimeout = 1500").unwrap();

        let sample: Sample = load_file(file.path()).unwrap();
        assert_eq!(sample.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"name": "b", "timeout": 20}}"#).unwrap();

        let sample: Sample = load_file(file.path()).unwrap();
        assert_eq!(sample.name, "b");
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = ").unwrap();

        let err = load_file::<Sample>(file.path()).unwrap_err();
        assert!(matches!(err, Error::TomlParseFailed { .. }));
    }
}
