mod aggregator;
mod http;
pub mod pool;
mod probe;
pub mod targets;
mod tracker;
mod types;
pub mod whois;

#[cfg(test)]
mod testing;

pub use aggregator::Aggregator;
pub use http::create_http_pool;
pub use probe::{probe, target_url, ProbeError};
pub use targets::{RequestMutator, SuccessPredicate, TargetDescriptor, TargetRegistry};
pub use tracker::{TrackError, Tracker};
pub use types::{ProbeConfig, ProbeOutcome, ReportEntry, RunReport};
pub use whois::{IpLookup, LookupError, WhoisRecord};

pub use tokio_util::sync::CancellationToken;

use std::sync::Arc;

/// Tracks `identity` across the built-in targets with default settings.
pub async fn track<S: AsRef<str>>(
    identity: &str,
    selection: &[S],
) -> Result<RunReport, TrackError> {
    let registry = Arc::new(TargetRegistry::builtin()?);
    Tracker::new(registry)?
        .track_identity(&CancellationToken::new(), identity, selection)
        .await
}

/// Looks up `ip` against the default geolocation endpoint.
pub async fn lookup_ip(ip: &str) -> Result<WhoisRecord, LookupError> {
    IpLookup::from_config(&ProbeConfig::default())?
        .lookup(&CancellationToken::new(), ip)
        .await
}
