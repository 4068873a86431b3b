use crate::error::ConfigError;
use crate::request::LoaderRequest;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Resource and chain as written in a configuration file.
///
/// ```yaml
/// resource: src/main.css?inline
/// loaders:
///   - style
///   - loader: css
///     options: { modules: true }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub loaders: Vec<LoaderRequest>,
}

impl RunConfig {
    /// Loads a config file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let is_json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(path, &contents)?
        } else {
            Self::from_yaml_str(path, &contents)?
        };
        config.validate(path)?;
        Ok(config)
    }

    pub fn from_yaml_str(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json_str(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        for loader in &self.loaders {
            if let LoaderRequest::Reference(reference) = loader {
                reference.validate().map_err(|source| ConfigError::Loader {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}
