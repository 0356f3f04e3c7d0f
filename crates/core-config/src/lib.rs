//! Configuration loading and parsing.
//!
//! Parses `mender.toml`, extracting search and sandbox settings with defaults
//! when absent. Unknown fields are ignored (TOML deserialization tolerance)
//! so the file format can evolve without immediate warnings, and a file that
//! fails to parse falls back to defaults rather than aborting a run. Command
//! line flags override anything read here; the merge lives with the caller.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Generation budget before the run reports best-so-far.
    #[serde(default = "SearchConfig::default_generations")]
    pub generations: u32,
    /// Variant pool size.
    #[serde(default = "SearchConfig::default_population")]
    pub population: usize,
    /// Fraction of the pool kept at selection.
    #[serde(default = "SearchConfig::default_survivor_ratio")]
    pub survivor_ratio: f64,
    /// Alternate crossover with mutation during repopulation.
    #[serde(default)]
    pub crossover: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            generations: Self::default_generations(),
            population: Self::default_population(),
            survivor_ratio: Self::default_survivor_ratio(),
            crossover: false,
        }
    }
}

impl SearchConfig {
    const fn default_generations() -> u32 {
        50
    }
    const fn default_population() -> usize {
        40
    }
    const fn default_survivor_ratio() -> f64 {
        0.5
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Interpreter command used to execute candidates.
    #[serde(default = "SandboxConfig::default_python")]
    pub python: String,
    /// Hard wall-clock cap per candidate invocation, in milliseconds.
    #[serde(default = "SandboxConfig::default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: Self::default_python(),
            deadline_ms: Self::default_deadline_ms(),
        }
    }
}

impl SandboxConfig {
    fn default_python() -> String {
        "python3".to_string()
    }
    const fn default_deadline_ms() -> u64 {
        2000
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Best-effort config path following platform conventions: a local
/// `mender.toml` wins, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("mender.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("mender").join("mender.toml");
    }
    PathBuf::from("mender.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<Config>(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(
                    target: "config",
                    path = %path.display(),
                    error = %err,
                    "config_parse_failed_using_defaults"
                );
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_when_file_missing() {
        let config = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(config.search.generations, 50);
        assert_eq!(config.search.population, 40);
        assert_eq!(config.search.survivor_ratio, 0.5);
        assert!(!config.search.crossover);
        assert_eq!(config.sandbox.python, "python3");
        assert_eq!(config.sandbox.deadline_ms, 2000);
    }

    #[test]
    fn parses_search_and_sandbox_sections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[search]\ngenerations = 15\npopulation = 12\ncrossover = true\n[sandbox]\ndeadline_ms = 500\n",
        )
        .unwrap();
        let config = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.search.generations, 15);
        assert_eq!(config.search.population, 12);
        assert!(config.search.crossover);
        assert_eq!(config.search.survivor_ratio, 0.5);
        assert_eq!(config.sandbox.deadline_ms, 500);
        assert_eq!(config.sandbox.python, "python3");
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[search]\ngenerations = 9\nfuture_knob = 1\n").unwrap();
        let config = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.search.generations, 9);
    }

    #[test]
    fn parse_error_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[search\ngenerations = ").unwrap();
        let config = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.search.generations, 50);
    }
}
