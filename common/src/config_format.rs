use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to get file extension for {0}")]
    MissingFileExtension(String),
    #[error("Unsupported config file extension for file: {0}")]
    UnsupportedFileExtension(String),
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("YAML config error")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON config error")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|os_str| os_str.to_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_file_name(file_name: &str) -> ConfigResult<Self> {
        let ext = get_file_extension(file_name)
            .ok_or_else(|| ConfigError::MissingFileExtension(file_name.to_string()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(ConfigError::UnsupportedFileExtension(
                file_name.to_string(),
            ))
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> ConfigResult<String> {
        match self {
            Self::Yaml => Ok(serde_yml::to_string(value)?),
            Self::Json => Ok(serde_json::to_string_pretty(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(self, serialized: &str) -> ConfigResult<T> {
        match self {
            Self::Yaml => Ok(serde_yml::from_str(serialized)?),
            Self::Json => Ok(serde_json::from_str(serialized)?),
        }
    }
}

/// Reads and deserializes a config file, picking the format from its extension.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let name = path.to_string_lossy();
    let format = ConfigFormat::from_file_name(&name)?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: name.to_string(),
        source,
    })?;
    format.deserialize(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        level: String,
        count: u32,
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_file_name("a.yaml").unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_file_name("a.YML").unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_file_name("a.json").unwrap(),
            ConfigFormat::Json
        );
        assert!(matches!(
            ConfigFormat::from_file_name("a.toml"),
            Err(ConfigError::UnsupportedFileExtension(_))
        ));
        assert!(matches!(
            ConfigFormat::from_file_name("noext"),
            Err(ConfigError::MissingFileExtension(_))
        ));
    }

    #[test]
    fn test_serialize_then_deserialize_both_formats() {
        let sample = Sample {
            level: "debug".to_string(),
            count: 3,
        };
        for format in [ConfigFormat::Yaml, ConfigFormat::Json] {
            let text = format.serialize(&sample).unwrap();
            let back: Sample = format.deserialize(&text).unwrap();
            assert_eq!(back, sample, "format {:?}", format);
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("common_missing_config_3f1a.yaml");
        let result: ConfigResult<Sample> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
