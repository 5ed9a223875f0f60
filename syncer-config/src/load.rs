use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{Config, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried for each layer, in order.
const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Stem of the layer shared by every environment.
const BASE_STEM: &str = "base";

/// Environment overrides look like `APP_SOURCE__HOST`.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_NESTING_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to read the working directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("configuration directory `{}` does not exist", .0.display())]
    NotADirectory(PathBuf),

    #[error("no `{stem}` configuration file (yaml, yml or json) in `{}`", .directory.display())]
    MissingFile {
        stem: &'static str,
        directory: PathBuf,
    },

    #[error("invalid configuration file `{}`: {source}", .path.display())]
    InvalidFile {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to assemble the configuration layers: {0}")]
    Assemble(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize the configuration: {0}")]
    Deserialize(#[source] rust_cli_config::ConfigError),
}

/// Loads configuration for the environment named by `APP_ENVIRONMENT`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    load_config_for(Environment::load()?)
}

/// Loads configuration for `environment` from `./configuration`.
pub fn load_config_for<T>(environment: Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::WorkingDirectory)?
        .join(CONFIGURATION_DIR);

    load_config_from(&directory, environment)
}

/// Loads `base`, then the `environment` file, then `APP_` environment variables from
/// `directory`. Later layers override earlier ones key by key.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let mut builder = Config::builder();
    for path in layer_files(directory, environment)? {
        builder = builder.add_source(File::from(path.clone()));
        // Building after each file pins a parse error on the file that caused it.
        if let Err(source) = builder.build_cloned() {
            return Err(LoadConfigError::InvalidFile { path, source });
        }
    }

    let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_NESTING_SEPARATOR);

    builder
        .add_source(overrides)
        .build()
        .map_err(LoadConfigError::Assemble)?
        .try_deserialize()
        .map_err(LoadConfigError::Deserialize)
}

/// Returns the base and environment files of `directory`, in load order.
fn layer_files(directory: &Path, environment: Environment) -> Result<[PathBuf; 2], LoadConfigError> {
    if !directory.is_dir() {
        return Err(LoadConfigError::NotADirectory(directory.to_path_buf()));
    }

    Ok([
        find_layer(directory, BASE_STEM)?,
        find_layer(directory, environment.as_str())?,
    ])
}

fn find_layer(directory: &Path, stem: &'static str) -> Result<PathBuf, LoadConfigError> {
    EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::MissingFile {
            stem,
            directory: directory.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped_configuration() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../syncer-replicator/configuration")
    }

    #[test]
    fn test_layers_are_base_then_environment() {
        let [base, environment] = layer_files(&shipped_configuration(), Environment::Prod).unwrap();

        assert_eq!(base.file_name().unwrap(), "base.yaml");
        assert_eq!(environment.file_name().unwrap(), "prod.yaml");
    }

    #[test]
    fn test_missing_directory() {
        let err = layer_files(Path::new("/nonexistent/configuration"), Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::NotADirectory(_)));
    }

    #[test]
    fn test_missing_base_file() {
        let directory = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
        let err = layer_files(&directory, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingFile { stem: "base", .. }));
        assert!(err.to_string().contains("`base`"));
    }
}
