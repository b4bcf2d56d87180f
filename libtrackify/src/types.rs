use crate::probe::ProbeError;
use serde::Serialize;
use std::time::Duration;

/// Result of probing one target: whether the identity was recognized, or the
/// reason the probe could not complete.
pub type ProbeOutcome = Result<bool, ProbeError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub target: String,
    pub found: bool,
}

/// Sorted outcome of one run: exactly one entry per filtered target.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub identity: String,
    pub entries: Vec<ReportEntry>,
    #[serde(skip)]
    pub duration: Duration,
}

impl RunReport {
    pub fn found(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.found)
    }

    pub fn get(&self, target: &str) -> Option<bool> {
        self.entries
            .binary_search_by(|e| e.target.as_str().cmp(target))
            .ok()
            .map(|i| self.entries[i].found)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    /// Upper bound on concurrent probes per run. `None` uses the CPU count.
    pub max_workers: Option<usize>,
    pub user_agent: String,
}

impl ProbeConfig {
    /// Worker count for a run over `target_count` targets.
    pub fn workers_for(&self, target_count: usize) -> usize {
        let parallelism = self.max_workers.unwrap_or_else(num_cpus::get);
        parallelism.min(target_count).max(1)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_workers: None,
            user_agent: concat!("trackify/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
