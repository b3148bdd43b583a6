//! CLI configuration management
//!
//! Handles loading configuration from a TOML file, environment variables and
//! command-line flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

use rngtrace_compile::config::{ArtifactReuse, CompilerConfig};
use rngtrace_compile::scenarios::DEFAULT_ITERATIONS;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "rngtrace.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid seed: {0}. Must be an unsigned 64-bit integer")]
    InvalidSeed(String),

    #[error("Invalid iteration count: {0}. Must be at least 1")]
    InvalidIterations(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid reuse model: {0}")]
    InvalidReuse(String),

    #[error("Configuration file error: {0}")]
    FileError(String),
}

/// Crates whose events follow the configured level; everything else logs
/// warnings only
const TRACED_CRATES: [&str; 3] = ["rngtrace", "rngtrace_compile", "rngtrace_core"];

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(s: &str) -> Result<Level, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidLogLevel(s.to_string()))
}

/// CLI configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Seed scenarios start from
    pub seed: u64,
    /// Iterations of checkpointed scenarios
    pub iterations: usize,
    /// Level for the rngtrace crates
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: Level,
    /// Compiler and validator policy
    pub compiler: CompilerConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_log_level(&s).map_err(serde::de::Error::custom)
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            seed: 16,
            iterations: DEFAULT_ITERATIONS,
            log_level: Level::INFO,
            compiler: CompilerConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;

        let config: CliConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `RNGTRACE_*` environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(seed) = lookup("RNGTRACE_SEED") {
            self.seed = parse_seed(&seed)?;
        }
        if let Some(iterations) = lookup("RNGTRACE_ITERATIONS") {
            self.iterations = parse_iterations(&iterations)?;
        }
        if let Some(level) = lookup("RNGTRACE_LOG_LEVEL") {
            self.log_level = parse_log_level(&level)?;
        }
        if let Some(reuse) = lookup("RNGTRACE_REUSE") {
            self.compiler.validator.reuse = ArtifactReuse::from_str(&reuse)
                .map_err(|e| ConfigError::InvalidReuse(e.to_string()))?;
        }
        Ok(())
    }

    /// `EnvFilter` directives: the configured level for the rngtrace crates,
    /// `warn` for the rest
    pub fn filter_directives(&self) -> String {
        let level = self.log_level.as_str().to_ascii_lowercase();
        TRACED_CRATES
            .iter()
            .fold("warn".to_string(), |acc, target| format!("{acc},{target}={level}"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::InvalidIterations(self.iterations.to_string()));
        }
        Ok(())
    }

    /// Merge with CLI arguments (CLI takes precedence)
    pub fn merge_with_cli(&mut self, cli: &CliArgs) {
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(iterations) = cli.iterations {
            self.iterations = iterations;
        }
        if let Some(reuse) = cli.reuse {
            self.compiler.validator.reuse = reuse;
        }
        if cli.print_graph {
            self.compiler.print_graph = true;
        }
        if cli.verbose {
            self.log_level = Level::DEBUG;
        }
    }
}

fn parse_seed(s: &str) -> Result<u64, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidSeed(s.to_string()))
}

fn parse_iterations(s: &str) -> Result<usize, ConfigError> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidIterations(s.to_string())),
    }
}

/// Global CLI flags that feed into configuration
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Config file path; `rngtrace.toml` is used when present otherwise
    pub config_file: Option<PathBuf>,
    /// Seed override
    pub seed: Option<u64>,
    /// Iteration override
    pub iterations: Option<usize>,
    /// Reuse model override
    pub reuse: Option<ArtifactReuse>,
    /// Log captured graphs
    pub print_graph: bool,
    /// Raise the log level to debug
    pub verbose: bool,
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &CliArgs) -> Result<CliConfig, ConfigError> {
    build_config_with(cli, |key| std::env::var(key).ok())
}

/// [`build_config`] with an explicit environment lookup
pub fn build_config_with<F>(cli: &CliArgs, lookup: F) -> Result<CliConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &cli.config_file {
        Some(path) => CliConfig::from_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                CliConfig::from_file(default_path)?
            } else {
                CliConfig::default()
            }
        }
    };

    config.apply_env(lookup)?;
    config.merge_with_cli(cli);

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.seed, 16);
        assert_eq!(config.iterations, DEFAULT_ITERATIONS);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.compiler, CompilerConfig::default());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" Warn ").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("loud"),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_filter_directives_scope_level_to_rngtrace_crates() {
        let config = CliConfig {
            log_level: Level::DEBUG,
            ..CliConfig::default()
        };
        assert_eq!(
            config.filter_directives(),
            "warn,rngtrace=debug,rngtrace_compile=debug,rngtrace_core=debug"
        );
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            seed = 99
            iterations = 4
            log_level = "debug"

            [compiler]
            print_graph = true

            [compiler.validator]
            reuse = "single-use"
            allow_reseed = false
        "#;

        let config: CliConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.iterations, 4);
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.compiler.print_graph);
        assert_eq!(config.compiler.validator.reuse, ArtifactReuse::SingleUse);
        assert!(!config.compiler.validator.allow_reseed);
    }

    #[test]
    fn test_partial_toml_deserialization() {
        let config: CliConfig = toml::from_str("seed = 7").unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.iterations, DEFAULT_ITERATIONS);
        assert!(config.compiler.validator.allow_reseed);
    }

    #[test]
    fn test_from_file_rejects_zero_iterations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iterations = 0").unwrap();

        let err = CliConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIterations(_)));
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = \"sixteen\"").unwrap();

        let err = CliConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RNGTRACE_SEED", "32"),
            ("RNGTRACE_ITERATIONS", "3"),
            ("RNGTRACE_LOG_LEVEL", "warn"),
            ("RNGTRACE_REUSE", "once"),
        ]
        .into_iter()
        .collect();

        let mut config = CliConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.seed, 32);
        assert_eq!(config.iterations, 3);
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.compiler.validator.reuse, ArtifactReuse::SingleUse);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = CliConfig::default();
        let err = config
            .apply_env(|key| (key == "RNGTRACE_ITERATIONS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIterations(_)));

        let err = config
            .apply_env(|key| (key == "RNGTRACE_REUSE").then(|| "twice".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_priority_cli_over_env_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 1\niterations = 2").unwrap();

        let cli = CliArgs {
            config_file: Some(file.path().to_path_buf()),
            seed: Some(3),
            ..Default::default()
        };
        let config = build_config_with(&cli, |key| {
            matches!(key, "RNGTRACE_SEED" | "RNGTRACE_ITERATIONS").then(|| "5".to_string())
        })
        .unwrap();

        assert_eq!(config.seed, 3);
        assert_eq!(config.iterations, 5);
    }

    #[test]
    fn test_cli_args_merge() {
        let mut config = CliConfig::default();
        let cli = CliArgs {
            reuse: Some(ArtifactReuse::SingleUse),
            print_graph: true,
            verbose: true,
            ..Default::default()
        };

        config.merge_with_cli(&cli);

        assert_eq!(config.compiler.validator.reuse, ArtifactReuse::SingleUse);
        assert!(config.compiler.print_graph);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_build_config_with_missing_file() {
        let cli = CliArgs {
            config_file: Some(PathBuf::from("/nonexistent/rngtrace.toml")),
            ..Default::default()
        };
        assert!(matches!(
            build_config_with(&cli, no_env),
            Err(ConfigError::FileError(_))
        ));
    }
}
