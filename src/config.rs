//! Runtime configuration types.
//!
//! Options come from built-in defaults, then an optional TOML file, then the
//! command line.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// How much the binary prints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verbosity {
    /// Nothing at all
    Quiet,
    /// The result on stdout
    #[default]
    Output,
    /// Adds the run time on stderr
    Time,
    /// Adds JIT statistics on stderr
    Statistics,
    /// Adds debug logs on stderr
    Debug,
}

/// Which tiering policy decides what gets compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JitPolicyKind {
    /// Interpreter only
    #[default]
    No,
    Tracing,
    Individual,
    Block,
    Function,
}

/// How the stack and heap grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryPolicy {
    /// Fixed capacity, never grows past it
    #[default]
    None,
    /// Doubles on demand
    Amortized,
    /// Fixed capacity with a mark-compact collector
    #[serde(rename = "mark-and-compact", alias = "mark-and-sweep")]
    MarkCompact,
}

/// One T-code optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationPass {
    RedundantChecks,
    UnusedWrites,
    CopyPropagation,
    DeadCode,
    ConstantFolding,
}

impl OptimizationPass {
    pub const ALL: [OptimizationPass; 5] = [
        OptimizationPass::RedundantChecks,
        OptimizationPass::UnusedWrites,
        OptimizationPass::CopyPropagation,
        OptimizationPass::DeadCode,
        OptimizationPass::ConstantFolding,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizationPass::RedundantChecks => "redundant-checks",
            OptimizationPass::UnusedWrites => "unused-writes",
            OptimizationPass::CopyPropagation => "copy-propagation",
            OptimizationPass::DeadCode => "dead-code",
            OptimizationPass::ConstantFolding => "constant-folding",
        }
    }

    /// Parse a comma separated list, keeping its order. Empty items are skipped.
    pub fn parse_list(list: &str) -> Result<Vec<OptimizationPass>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for OptimizationPass {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pass| pass.name() == name)
            .ok_or_else(|| ConfigError::UnknownOptimization(name.to_string()))
    }
}

impl fmt::Display for OptimizationPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output format of the statistics table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown optimization `{0}`")]
    UnknownOptimization(String),
}

/// Everything a run needs besides the program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunOptions {
    pub verbosity: Verbosity,
    pub jit_policy: JitPolicyKind,
    /// Landings before a cp is compiled
    pub jit_threshold: usize,
    pub memory: MemoryPolicy,
    /// Passes in the order they run
    pub optimizations: Vec<OptimizationPass>,
    pub stats_format: StatsFormat,
    pub file: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Output,
            jit_policy: JitPolicyKind::No,
            jit_threshold: 0,
            memory: MemoryPolicy::None,
            optimizations: Vec::new(),
            stats_format: StatsFormat::Human,
            file: None,
        }
    }
}

impl RunOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.verbosity, Verbosity::Output);
        assert_eq!(options.jit_policy, JitPolicyKind::No);
        assert_eq!(options.memory, MemoryPolicy::None);
        assert!(options.optimizations.is_empty());
    }

    #[test]
    fn test_parse_list_keeps_order() {
        let passes = OptimizationPass::parse_list("dead-code, copy-propagation,,").unwrap();
        assert_eq!(passes, vec![OptimizationPass::DeadCode, OptimizationPass::CopyPropagation]);
        assert!(OptimizationPass::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_list_rejects_unknown() {
        let err = OptimizationPass::parse_list("dead-code,inline").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOptimization(name) if name == "inline"));
    }

    #[test]
    fn test_toml_file() {
        let options = RunOptions::from_toml_str(
            r#"
verbosity = "statistics"
jit-policy = "function"
jit-threshold = 3
memory = "mark-and-sweep"
optimizations = ["copy-propagation", "dead-code"]
"#,
        )
        .unwrap();
        assert_eq!(options.verbosity, Verbosity::Statistics);
        assert_eq!(options.jit_policy, JitPolicyKind::Function);
        assert_eq!(options.jit_threshold, 3);
        assert_eq!(options.memory, MemoryPolicy::MarkCompact);
        assert_eq!(options.optimizations.len(), 2);
        assert_eq!(options.stats_format, StatsFormat::Human);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(matches!(RunOptions::from_toml_str("speed = 11"), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_verbosity_is_ordered() {
        assert!(Verbosity::Quiet < Verbosity::Output);
        assert!(Verbosity::Time < Verbosity::Statistics);
        assert!(Verbosity::Statistics < Verbosity::Debug);
    }
}
