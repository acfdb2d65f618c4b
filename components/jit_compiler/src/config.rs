//! Inliner configuration
//!
//! All thresholds the heuristics compare against live here. The defaults
//! follow the values the inliner has historically been tuned with; any of
//! them can be overridden from JSON.

use crate::tracer::TraceLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How hot the method under compilation is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilationHotness {
    /// Ordinary optimized compilation
    #[default]
    Warm,
    /// Recompilation of a hot method
    Hot,
    /// Recompilation of the hottest methods
    Scorching,
}

/// Invalid inliner configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON could not be parsed
    #[error("failed to parse inliner configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// Values are inconsistent with each other
    #[error("invalid inliner configuration: {0}")]
    Invalid(String),
}

/// Configuration for inlining decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InlinerConfig {
    /// Size threshold for call sites inside loops
    pub loop_size_threshold: u32,
    /// Size threshold for call sites in warm blocks
    pub warm_size_threshold: u32,
    /// Size threshold for call sites in cold blocks
    pub cold_size_threshold: u32,
    /// Callees above this bytecode size are never inlined
    pub max_callee_bytecode_size: u32,
    /// Block frequency at or above which sizes are not scaled
    pub hot_border_frequency: u32,
    /// Block frequency at or below which sizes are scaled twice
    pub cold_border_frequency: u32,
    /// Upper bound of observed block frequencies
    pub max_block_frequency: u32,
    /// Synthesized node count after which inlining stops
    pub node_count_threshold: u32,
    /// Maximum number of call sites inlined into one method
    pub max_inlining_call_sites: u32,
    /// Bytecode allowance for self-recursive inlining
    pub max_recursive_call_bytecode_size: u32,
    /// Open frames of one method after which it is not inlined again
    pub max_recursive_occurrences: u32,
    /// Maximum nesting depth of inlined bodies
    pub max_inline_depth: u32,
    /// Profiled frequency needed for a primary target
    pub min_profiled_call_frequency: f32,
    /// Profiled frequency needed for a runner-up target
    pub second_best_min_call_frequency: f32,
    /// Temporaries one attempt may create
    pub max_temps_per_inline: u32,
    /// Allocation limit of the call-graph arena
    pub arena_limit: usize,
    /// Whether more than one target per call site may be inlined
    pub allow_multiple_targets: bool,
    /// Hotness of the method under compilation
    pub hotness: CompilationHotness,
    /// Verbosity of decision tracing
    pub trace_level: TraceLevel,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            loop_size_threshold: 200,              // Overhead amortizes over iterations
            warm_size_threshold: 155,
            cold_size_threshold: 30,
            max_callee_bytecode_size: 1000,        // Never inline giant methods
            hot_border_frequency: 2500,
            cold_border_frequency: 0,
            max_block_frequency: 10000,
            node_count_threshold: 16000,
            max_inlining_call_sites: 4095,
            max_recursive_call_bytecode_size: 1024,
            max_recursive_occurrences: 2,          // Flatten one extra level of recursion
            max_inline_depth: 8,
            min_profiled_call_frequency: 0.65,
            second_best_min_call_frequency: 0.2275, // 65% of the remaining 35%
            max_temps_per_inline: 64,
            arena_limit: 1 << 16,
            allow_multiple_targets: true,
            hotness: CompilationHotness::Warm,
            trace_level: TraceLevel::Off,
        }
    }
}

impl InlinerConfig {
    /// Parse a configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: InlinerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the thresholds are consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cold_size_threshold > self.warm_size_threshold
            || self.warm_size_threshold > self.loop_size_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "size thresholds must satisfy cold <= warm <= loop, got {} / {} / {}",
                self.cold_size_threshold, self.warm_size_threshold, self.loop_size_threshold
            )));
        }
        if self.max_block_frequency == 0 {
            return Err(ConfigError::Invalid("max_block_frequency must be positive".into()));
        }
        if self.cold_border_frequency > self.hot_border_frequency {
            return Err(ConfigError::Invalid(format!(
                "cold border {} above hot border {}",
                self.cold_border_frequency, self.hot_border_frequency
            )));
        }
        let in_unit = |f: f32| f > 0.0 && f <= 1.0;
        if !in_unit(self.min_profiled_call_frequency)
            || !in_unit(self.second_best_min_call_frequency)
            || self.second_best_min_call_frequency > self.min_profiled_call_frequency
        {
            return Err(ConfigError::Invalid(format!(
                "profiled frequencies must satisfy 0 < runner-up <= primary <= 1, got {} / {}",
                self.second_best_min_call_frequency, self.min_profiled_call_frequency
            )));
        }
        if self.max_recursive_occurrences == 0 {
            return Err(ConfigError::Invalid("max_recursive_occurrences must be positive".into()));
        }
        Ok(())
    }
}
