//! Size estimation and caller-wide budgets
//!
//! This module provides:
//! - Frequency scaling: calls in colder blocks look smaller
//! - Per-context size thresholds (loop, warm, cold)
//! - Constant-argument discounts
//! - The caller budget: weight, synthesized nodes, inlined sites, and
//!   self-recursive bytecode

use crate::config::{CompilationHotness, InlinerConfig};
use crate::failure::FailureReason;
use serde::Serialize;

/// Scaled sizes never drop below this
pub const MIN_SCALED_SIZE: u32 = 10;

/// Scale `size` down for call sites in colder blocks.
///
/// Blocks at or above `hot_border` keep their size. Colder blocks scale by
/// `(max_frequency - hot_border) / max_frequency`, and blocks at or below a
/// non-zero `cold_border` are scaled a second time. The result is
/// non-increasing as `block_frequency` falls and never below
/// [`MIN_SCALED_SIZE`].
pub fn scale_size_based_on_block_frequency(
    size: u32,
    block_frequency: u32,
    hot_border: u32,
    cold_border: u32,
    max_frequency: u32,
) -> u32 {
    if max_frequency == 0 || block_frequency >= hot_border {
        return size.max(MIN_SCALED_SIZE);
    }

    let border = hot_border.min(max_frequency);
    let factor = max_frequency - border;
    let mut scaled = scale(size, factor, max_frequency);
    if cold_border > 0 && block_frequency <= cold_border {
        scaled = scale(scaled, factor, max_frequency);
    }
    scaled.max(MIN_SCALED_SIZE)
}

fn scale(size: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (size as u64 * numerator as u64 + denominator as u64 / 2) / denominator as u64;
    scaled as u32
}

/// Where a call site sits, for threshold selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockContext {
    /// Inside a loop
    Loop,
    /// Ordinary block
    Warm,
    /// Rarely executed block
    Cold,
}

/// Inputs of a size check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeQuery {
    /// Callee bytecode size
    pub bytecode_size: u32,
    /// Frequency of the block holding the call
    pub block_frequency: u32,
    /// Block context
    pub context: BlockContext,
    /// Arguments at the call, receiver included
    pub arg_count: u32,
    /// Constant arguments at the call
    pub const_arg_count: u32,
}

/// Size thresholds and frequency borders
#[derive(Debug, Clone)]
pub struct SizeHeuristics {
    loop_threshold: u32,
    warm_threshold: u32,
    cold_threshold: u32,
    max_callee_bytecode_size: u32,
    hot_border: u32,
    cold_border: u32,
    max_frequency: u32,
}

impl SizeHeuristics {
    /// Take thresholds from the configuration
    pub fn new(config: &InlinerConfig) -> Self {
        Self {
            loop_threshold: config.loop_size_threshold,
            warm_threshold: config.warm_size_threshold,
            cold_threshold: config.cold_size_threshold,
            max_callee_bytecode_size: config.max_callee_bytecode_size,
            hot_border: config.hot_border_frequency,
            cold_border: config.cold_border_frequency,
            max_frequency: config.max_block_frequency,
        }
    }

    /// Context of a block. An explicit cold mark wins over loop membership.
    pub fn classify(&self, in_loop: bool, block_frequency: u32, is_cold: bool) -> BlockContext {
        if is_cold || (self.cold_border > 0 && block_frequency <= self.cold_border) {
            BlockContext::Cold
        } else if in_loop {
            BlockContext::Loop
        } else {
            BlockContext::Warm
        }
    }

    /// Threshold for a context
    pub fn threshold(&self, context: BlockContext) -> u32 {
        match context {
            BlockContext::Loop => self.loop_threshold,
            BlockContext::Warm => self.warm_threshold,
            BlockContext::Cold => self.cold_threshold,
        }
    }

    /// Frequency-scaled size
    pub fn scaled_size(&self, size: u32, block_frequency: u32) -> u32 {
        scale_size_based_on_block_frequency(
            size,
            block_frequency,
            self.hot_border,
            self.cold_border,
            self.max_frequency,
        )
    }

    /// Size after frequency scaling and the constant-argument discount
    pub fn effective_size(&self, query: &SizeQuery) -> u32 {
        let scaled = self.scaled_size(query.bytecode_size, query.block_frequency);
        if query.const_arg_count == 0 || query.arg_count == 0 {
            return scaled;
        }

        // each constant argument takes a tenth off
        let discounted = (0..query.const_arg_count).fold(scaled, |size, _| size - size / 10);
        if query.const_arg_count >= query.arg_count {
            return discounted;
        }
        if query.context == BlockContext::Loop && scaled > self.threshold(query.context) {
            let saving = (scaled - discounted) * query.const_arg_count / query.arg_count;
            return scaled - saving;
        }
        scaled
    }

    /// Effective size when within limits, otherwise the rejection reason
    pub fn exceeds_size_threshold(&self, query: &SizeQuery) -> Result<u32, FailureReason> {
        if query.bytecode_size > self.max_callee_bytecode_size {
            return Err(FailureReason::ExceedsByteCodeThreshold);
        }
        let size = self.effective_size(query);
        if size <= self.threshold(query.context) {
            return Ok(size);
        }
        Err(match query.context {
            BlockContext::Cold => FailureReason::ColdBlock,
            _ => FailureReason::ExceedsSizeThreshold,
        })
    }
}

/// Caller-wide budget for one compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerBudget {
    weight_limit: u32,
    weight_used: u32,
    node_count: u32,
    node_threshold: u32,
    sites_inlined: u32,
    max_sites: u32,
    recursive_size_used: u32,
    max_recursive_size: u32,
}

impl CallerBudget {
    /// Budget for a caller of `caller_bytecode_size` whose IR starts at
    /// `initial_node_count` nodes
    pub fn new(config: &InlinerConfig, caller_bytecode_size: u32, initial_node_count: u32) -> Self {
        let node_threshold = if initial_node_count > config.node_count_threshold {
            initial_node_count.saturating_add(initial_node_count / 20)
        } else {
            config.node_count_threshold
        };
        Self {
            weight_limit: Self::caller_weight_limit(caller_bytecode_size, config.hotness),
            weight_used: 0,
            node_count: initial_node_count,
            node_threshold,
            sites_inlined: 0,
            max_sites: config.max_inlining_call_sites,
            recursive_size_used: 0,
            max_recursive_size: config.max_recursive_call_bytecode_size,
        }
    }

    /// Bytecode a caller of `size` may absorb through inlining
    pub fn caller_weight_limit(size: u32, hotness: CompilationHotness) -> u32 {
        let total = match hotness {
            CompilationHotness::Scorching => 1500.max(size.saturating_mul(2)),
            CompilationHotness::Hot => 1500.max(size.saturating_add(size / 4)),
            CompilationHotness::Warm if size < 125 => 250,
            CompilationHotness::Warm if size < 700 => 700.max(size.saturating_add(size / 4)),
            CompilationHotness::Warm => size.saturating_add(size / 8),
        };
        total.saturating_sub(size)
    }

    /// Reason further inlining is impossible, if any budget is used up
    pub fn exhausted(&self) -> Option<FailureReason> {
        if self.node_count > self.node_threshold {
            Some(FailureReason::ExceededCallerNodeBudget)
        } else if self.sites_inlined >= self.max_sites {
            Some(FailureReason::ExceededCallerSiteSize)
        } else if self.weight_used >= self.weight_limit {
            Some(FailureReason::ExceededCallerBudget)
        } else {
            None
        }
    }

    /// Check whether a target of `weight` still fits
    pub fn check_target(&self, weight: u32, self_recursive: bool) -> Result<(), FailureReason> {
        if let Some(reason) = self.exhausted() {
            return Err(reason);
        }
        if self.weight_used.saturating_add(weight) > self.weight_limit {
            return Err(FailureReason::ExceededCallerBudget);
        }
        if self_recursive && self.recursive_size_used.saturating_add(weight) > self.max_recursive_size {
            return Err(FailureReason::ExceedsRecursiveSizeEstimate);
        }
        Ok(())
    }

    /// Account for a committed inline
    pub fn record_inline(&mut self, weight: u32, nodes_added: u32, self_recursive: bool) {
        self.weight_used = self.weight_used.saturating_add(weight);
        self.node_count = self.node_count.saturating_add(nodes_added);
        self.sites_inlined = self.sites_inlined.saturating_add(1);
        if self_recursive {
            self.recursive_size_used = self.recursive_size_used.saturating_add(weight);
        }
    }

    /// Running synthesized node count
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Node count after which inlining stops
    pub fn node_threshold(&self) -> u32 {
        self.node_threshold
    }

    /// Weight absorbed so far
    pub fn weight_used(&self) -> u32 {
        self.weight_used
    }

    /// Weight the caller may absorb
    pub fn weight_limit(&self) -> u32 {
        self.weight_limit
    }

    /// Call sites inlined so far
    pub fn sites_inlined(&self) -> u32 {
        self.sites_inlined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristics() -> SizeHeuristics {
        SizeHeuristics::new(&InlinerConfig::default())
    }

    fn query(size: u32, frequency: u32, context: BlockContext) -> SizeQuery {
        SizeQuery {
            bytecode_size: size,
            block_frequency: frequency,
            context,
            arg_count: 0,
            const_arg_count: 0,
        }
    }

    #[test]
    fn test_scale_hot_block_unchanged() {
        assert_eq!(scale_size_based_on_block_frequency(100, 3000, 2500, 0, 3000), 100);
    }

    #[test]
    fn test_scale_warm_block() {
        assert_eq!(scale_size_based_on_block_frequency(100, 500, 2500, 0, 3000), 17);
    }

    #[test]
    fn test_scale_floor() {
        assert_eq!(scale_size_based_on_block_frequency(20, 0, 2500, 0, 3000), 10);
        assert_eq!(scale_size_based_on_block_frequency(3, 9000, 2500, 0, 10000), 10);
    }

    #[test]
    fn test_scale_cold_border_scales_twice() {
        let warm = scale_size_based_on_block_frequency(1000, 200, 2500, 100, 10000);
        let cold = scale_size_based_on_block_frequency(1000, 50, 2500, 100, 10000);
        assert_eq!(warm, 750);
        assert_eq!(cold, 563);
    }

    #[test]
    fn test_classify() {
        let h = heuristics();
        assert_eq!(h.classify(true, 100, false), BlockContext::Loop);
        assert_eq!(h.classify(false, 100, false), BlockContext::Warm);
        assert_eq!(h.classify(true, 100, true), BlockContext::Cold);
        // cold border 0 never classifies by frequency
        assert_eq!(h.classify(false, 0, false), BlockContext::Warm);
    }

    #[test]
    fn test_threshold_by_context() {
        let h = heuristics();
        assert!(h.exceeds_size_threshold(&query(180, 10000, BlockContext::Loop)).is_ok());
        assert_eq!(
            h.exceeds_size_threshold(&query(180, 10000, BlockContext::Warm)),
            Err(FailureReason::ExceedsSizeThreshold)
        );
        assert_eq!(
            h.exceeds_size_threshold(&query(40, 10000, BlockContext::Cold)),
            Err(FailureReason::ColdBlock)
        );
    }

    #[test]
    fn test_bytecode_cap() {
        let h = heuristics();
        assert_eq!(
            h.exceeds_size_threshold(&query(5000, 0, BlockContext::Loop)),
            Err(FailureReason::ExceedsByteCodeThreshold)
        );
    }

    #[test]
    fn test_const_args_discount() {
        let h = heuristics();
        let all_const = SizeQuery {
            arg_count: 2,
            const_arg_count: 2,
            ..query(170, 10000, BlockContext::Warm)
        };
        // 170 -> 153 -> 138
        assert_eq!(h.effective_size(&all_const), 138);
        assert!(h.exceeds_size_threshold(&all_const).is_ok());

        let some_const = SizeQuery {
            arg_count: 2,
            const_arg_count: 1,
            ..query(170, 10000, BlockContext::Warm)
        };
        assert_eq!(h.effective_size(&some_const), 170);

        let loop_some_const = SizeQuery {
            arg_count: 2,
            const_arg_count: 1,
            ..query(220, 10000, BlockContext::Loop)
        };
        // 22 saved, half of it kept
        assert_eq!(h.effective_size(&loop_some_const), 209);
    }

    #[test]
    fn test_caller_weight_limit() {
        assert_eq!(CallerBudget::caller_weight_limit(50, CompilationHotness::Warm), 200);
        assert_eq!(CallerBudget::caller_weight_limit(400, CompilationHotness::Warm), 300);
        assert_eq!(CallerBudget::caller_weight_limit(800, CompilationHotness::Warm), 100);
        assert_eq!(CallerBudget::caller_weight_limit(100, CompilationHotness::Hot), 1400);
        assert_eq!(CallerBudget::caller_weight_limit(1000, CompilationHotness::Scorching), 1000);
    }

    #[test]
    fn test_node_threshold_grows_for_large_callers() {
        let config = InlinerConfig::default();
        assert_eq!(CallerBudget::new(&config, 50, 100).node_threshold(), 16000);
        assert_eq!(CallerBudget::new(&config, 50, 20000).node_threshold(), 21000);
    }

    #[test]
    fn test_budget_exhaustion() {
        let config = InlinerConfig {
            node_count_threshold: 100,
            ..InlinerConfig::default()
        };
        let mut budget = CallerBudget::new(&config, 50, 90);
        assert!(budget.check_target(20, false).is_ok());
        budget.record_inline(20, 20, false);
        assert_eq!(budget.node_count(), 110);
        assert_eq!(budget.exhausted(), Some(FailureReason::ExceededCallerNodeBudget));
        assert_eq!(
            budget.check_target(1, false),
            Err(FailureReason::ExceededCallerNodeBudget)
        );
    }

    #[test]
    fn test_weight_budget() {
        let config = InlinerConfig::default();
        let mut budget = CallerBudget::new(&config, 50, 10);
        assert_eq!(budget.check_target(201, false), Err(FailureReason::ExceededCallerBudget));
        budget.record_inline(150, 5, false);
        assert!(budget.check_target(50, false).is_ok());
        assert_eq!(budget.check_target(51, false), Err(FailureReason::ExceededCallerBudget));
    }

    #[test]
    fn test_huge_weights_saturate() {
        let config = InlinerConfig::default();
        let mut budget = CallerBudget::new(&config, u32::MAX, u32::MAX - 5);
        assert_eq!(budget.check_target(u32::MAX, true), Err(FailureReason::ExceededCallerBudget));

        budget.record_inline(u32::MAX - 1, 100, true);
        budget.record_inline(u32::MAX - 1, u32::MAX, true);
        assert_eq!(budget.node_count(), u32::MAX);
        assert_eq!(budget.weight_used(), u32::MAX);
        assert_eq!(budget.exhausted(), Some(FailureReason::ExceededCallerBudget));
        assert!(budget.check_target(1, false).is_err());
        assert_eq!(CallerBudget::caller_weight_limit(u32::MAX, CompilationHotness::Scorching), 0);
    }

    #[test]
    fn test_site_budget() {
        let config = InlinerConfig {
            max_inlining_call_sites: 1,
            ..InlinerConfig::default()
        };
        let mut budget = CallerBudget::new(&config, 50, 10);
        budget.record_inline(10, 5, false);
        assert_eq!(budget.exhausted(), Some(FailureReason::ExceededCallerSiteSize));
    }

    #[test]
    fn test_recursive_budget() {
        let config = InlinerConfig {
            max_recursive_call_bytecode_size: 30,
            hotness: CompilationHotness::Scorching,
            ..InlinerConfig::default()
        };
        let mut budget = CallerBudget::new(&config, 50, 10);
        budget.record_inline(20, 5, true);
        assert_eq!(
            budget.check_target(20, true),
            Err(FailureReason::ExceedsRecursiveSizeEstimate)
        );
        assert!(budget.check_target(20, false).is_ok());
    }
}
