use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::pickplace_config::PickPlaceToml;

/// Default config file name inside the work directory.
pub const CONFIG_FILE_NAME: &str = "pickplace.toml";

/// Runtime configuration for a pickplace invocation.
///
/// Resolves the config file (explicit path, which `PICKPLACE_CONFIG` feeds
/// through the CLI, or `<work_dir>/pickplace.toml`) and the report
/// directories, and holds the parsed file.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub config_file: PathBuf,
    pub report_dir: PathBuf,
    pub verbose: bool,
    /// Whether `config_file` existed and was loaded.
    pub loaded: bool,
    settings: PickPlaceToml,
}

impl Config {
    /// Resolve paths and load the config file.
    ///
    /// A missing default file yields the built-in configuration; a missing
    /// explicit file is an error.
    pub fn new(work_dir: PathBuf, config_file: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let work_dir = work_dir
            .canonicalize()
            .context("Failed to resolve work directory")?;
        let explicit = config_file.is_some();
        let config_file = Self::resolve_config_file(&work_dir, config_file);

        let loaded = config_file.exists();
        if explicit && !loaded {
            bail!("Config file not found: {}", config_file.display());
        }
        let settings = PickPlaceToml::load_or_default(&config_file)?;

        let report_dir = work_dir.join(".pickplace");

        Ok(Self {
            work_dir,
            config_file,
            report_dir,
            verbose,
            loaded,
            settings,
        })
    }

    /// The config file path without loading it.
    pub fn resolve_config_file(work_dir: &Path, explicit: Option<PathBuf>) -> PathBuf {
        match explicit {
            Some(path) if path.is_absolute() => path,
            Some(path) => work_dir.join(path),
            None => work_dir.join(CONFIG_FILE_NAME),
        }
    }

    pub fn settings(&self) -> &PickPlaceToml {
        &self.settings
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.report_dir.join("runs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.report_dir).context("Failed to create report directory")?;
        std::fs::create_dir_all(self.runs_dir()).context("Failed to create runs directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        assert!(!config.loaded);
        assert!(config.config_file.ends_with(CONFIG_FILE_NAME));
        assert_eq!(config.settings(), &PickPlaceToml::default());
        assert!(config.report_dir.ends_with(".pickplace"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Config::new(
            dir.path().to_path_buf(),
            Some(PathBuf::from("elsewhere.toml")),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_relative_config_resolves_against_work_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cell.toml"), "[sim]\ngrasp_failures = 3\n").unwrap();
        let config = Config::new(
            dir.path().to_path_buf(),
            Some(PathBuf::from("cell.toml")),
            true,
        )
        .unwrap();
        assert!(config.loaded);
        assert_eq!(config.settings().sim.grasp_failures, 3);
    }

    #[test]
    fn test_ensure_directories_creates_runs_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.runs_dir().is_dir());
    }
}
