//! Validator and compiler configuration.
//!
//! Both types deserialise with defaults for every field, so a partial TOML
//! table such as `[validator]\nreuse = "single-use"` is a complete
//! configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How often a compiled artifact may be executed.
///
/// Determines whether restoring a snapshot frozen outside the traced region
/// can ever be proven valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactReuse {
    /// The artifact runs exactly once; a frozen literal is correct for that
    /// single run.
    SingleUse,

    /// The artifact may be invoked again from other entry states.
    #[default]
    Reusable,
}

impl ArtifactReuse {
    /// Returns true if the artifact may run more than once.
    #[inline]
    pub fn is_reusable(self) -> bool {
        matches!(self, Self::Reusable)
    }
}

/// Error parsing an [`ArtifactReuse`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid reuse model '{0}': expected 'single-use' or 'reusable'")]
pub struct ParseReuseError(pub String);

impl FromStr for ArtifactReuse {
    type Err = ParseReuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single-use" | "single_use" | "once" => Ok(Self::SingleUse),
            "reusable" => Ok(Self::Reusable),
            _ => Err(ParseReuseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for ArtifactReuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleUse => write!(f, "single-use"),
            Self::Reusable => write!(f, "reusable"),
        }
    }
}

/// Policy knobs of the consistency validator.
///
/// # Examples
///
/// ```rust
/// use rngtrace_compile::config::{ArtifactReuse, ValidatorConfig};
///
/// let config = ValidatorConfig::default().with_reuse(ArtifactReuse::SingleUse);
/// assert!(config.allow_reseed);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Reuse model of the artifact being validated.
    pub reuse: ArtifactReuse,
    /// Whether an in-region reseed counts as a fresh, proven base state.
    pub allow_reseed: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reuse: ArtifactReuse::Reusable,
            allow_reseed: true,
        }
    }
}

impl ValidatorConfig {
    /// Returns a copy with the given reuse model.
    #[inline]
    pub fn with_reuse(mut self, reuse: ArtifactReuse) -> Self {
        self.reuse = reuse;
        self
    }

    /// Returns a copy with reseeding allowed or forbidden.
    #[inline]
    pub fn with_allow_reseed(mut self, allow: bool) -> Self {
        self.allow_reseed = allow;
        self
    }
}

/// Configuration of a [`Compiler`](crate::compiler::Compiler).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Validator policy.
    pub validator: ValidatorConfig,
    /// Log the captured graph of every successful compilation.
    pub print_graph: bool,
}
