//! Receiver-class profiling data for call sites
//!
//! This module is placed in core_types so the profiling store and the
//! inliner agree on one representation.

use crate::ids::ClassId;
use serde::{Deserialize, Serialize};

/// Receiver classes observed at one call site
///
/// Collects per-class sample counts plus the number of times the call
/// executed at all, so a site that never ran can be told apart from one
/// without receiver samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverProfile {
    /// Number of times the call executed
    pub execution_count: u64,
    /// Sample count per receiver class, in first-seen order
    samples: Vec<(ClassId, u64)>,
}

impl ReceiverProfile {
    /// Create an empty profile
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution with the given receiver class
    pub fn record_receiver(&mut self, class: ClassId) {
        self.record_receivers(class, 1);
    }

    /// Record `count` executions with the given receiver class
    pub fn record_receivers(&mut self, class: ClassId, count: u64) {
        self.execution_count += count;
        match self.samples.iter_mut().find(|(c, _)| *c == class) {
            Some((_, n)) => *n += count,
            None => self.samples.push((class, count)),
        }
    }

    /// Total receiver samples
    pub fn total_samples(&self) -> u64 {
        self.samples.iter().map(|(_, n)| n).sum()
    }

    /// Check if any receiver was recorded
    pub fn has_samples(&self) -> bool {
        self.total_samples() > 0
    }

    /// Fraction of samples that saw `class`
    pub fn frequency(&self, class: ClassId) -> f32 {
        let total = self.total_samples();
        if total == 0 {
            return 0.0;
        }
        self.samples
            .iter()
            .find(|(c, _)| *c == class)
            .map_or(0.0, |(_, n)| *n as f32 / total as f32)
    }

    /// Receiver classes ordered by descending frequency
    ///
    /// Ties are broken by class id so the order is deterministic.
    pub fn ranked(&self) -> Vec<(ClassId, f32)> {
        let total = self.total_samples();
        if total == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<(ClassId, u64)> = self.samples.clone();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .map(|(c, n)| (c, n as f32 / total as f32))
            .collect()
    }

    /// The most frequent receiver class and its frequency
    pub fn dominant(&self) -> Option<(ClassId, f32)> {
        self.ranked().into_iter().next()
    }

    /// Number of distinct receiver classes seen
    pub fn distinct_classes(&self) -> usize {
        self.samples.len()
    }
}
