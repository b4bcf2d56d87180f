use crate::types::{ReportEntry, RunReport};
use dashmap::DashMap;
use std::time::Duration;
use tracing::warn;

/// Collects per-target outcomes from concurrent workers.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: DashMap<String, bool>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: DashMap::with_capacity(capacity),
        }
    }

    pub fn record(&self, display_name: &str, found: bool) {
        if self.results.insert(display_name.to_string(), found).is_some() {
            warn!(platform = %display_name, "Outcome recorded twice");
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Builds a report from the collected outcomes, sorted by display name.
    pub fn finalize(&self, identity: &str, duration: Duration) -> RunReport {
        let mut entries: Vec<ReportEntry> = self
            .results
            .iter()
            .map(|entry| ReportEntry {
                target: entry.key().clone(),
                found: *entry.value(),
            })
            .collect();
        entries.sort_by(|a, b| a.target.cmp(&b.target));

        RunReport {
            identity: identity.to_string(),
            entries,
            duration,
        }
    }
}
