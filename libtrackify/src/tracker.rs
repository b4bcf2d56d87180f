use crate::{
    aggregator::Aggregator,
    http::create_http_pool,
    pool::{PoolError, Task, WorkerPool},
    probe::probe,
    targets::{RegistryError, TargetDescriptor, TargetRegistry},
    types::{ProbeConfig, RunReport},
};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Tracking cancelled")]
    Cancelled,
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Failed to track {identity}: {source}")]
    Identity {
        identity: String,
        #[source]
        source: Box<TrackError>,
    },
}

impl TrackError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            TrackError::Cancelled => true,
            TrackError::Identity { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

struct ProbeTask {
    identity: Arc<str>,
    target: Arc<TargetDescriptor>,
    client: Client,
    aggregator: Arc<Aggregator>,
}

impl Task for ProbeTask {
    fn run(self, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            let name = self.target.display_name();
            let found = match probe(&self.client, &cancel, &self.identity, &self.target).await {
                Ok(found) => found,
                Err(err) if err.is_cancelled() => {
                    debug!(platform = %name, "Probe cancelled");
                    false
                }
                Err(err) => {
                    warn!(platform = %name, error = %err, "Error checking target");
                    false
                }
            };
            self.aggregator.record(name, found);
        }
        .boxed()
    }

    fn skip(self) {
        debug!(platform = %self.target.display_name(), "Skipping probe after cancellation");
        self.aggregator.record(self.target.display_name(), false);
    }
}

/// Probes identities against the targets of a registry.
pub struct Tracker {
    client: Client,
    registry: Arc<TargetRegistry>,
    config: ProbeConfig,
}

impl Tracker {
    pub fn new(registry: Arc<TargetRegistry>) -> Result<Self, TrackError> {
        Self::with_config(registry, ProbeConfig::default())
    }

    pub fn with_config(
        registry: Arc<TargetRegistry>,
        config: ProbeConfig,
    ) -> Result<Self, TrackError> {
        let client = create_http_pool(&config)?;
        Ok(Self::with_client(registry, client, config))
    }

    pub fn with_client(registry: Arc<TargetRegistry>, client: Client, config: ProbeConfig) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probes `identity` against every target in `selection` (all targets
    /// when empty) and returns the sorted report. Per-target failures are
    /// logged and reported as not found; only cancellation or a pool fault
    /// fails the run.
    pub async fn track_identity<S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        identity: &str,
        selection: &[S],
    ) -> Result<RunReport, TrackError> {
        let start = Instant::now();
        let targets = self.registry.filter(selection);
        let workers = self.config.workers_for(targets.len());

        info!(identity, targets = targets.len(), workers, "Tracking identity");

        let aggregator = Arc::new(Aggregator::with_capacity(targets.len()));
        let shared_identity: Arc<str> = Arc::from(identity);
        let pool = WorkerPool::new(
            format!("identity-tracker:{}", identity),
            workers,
            targets.len(),
            cancel.clone(),
        );

        // A failed submit drops `pool`, which aborts its workers.
        for target in &targets {
            pool.submit(ProbeTask {
                identity: Arc::clone(&shared_identity),
                target: Arc::clone(target),
                client: self.client.clone(),
                aggregator: Arc::clone(&aggregator),
            })
            .await?;
        }
        pool.join().await?;

        if cancel.is_cancelled() {
            return Err(TrackError::Cancelled);
        }

        let report = aggregator.finalize(identity, start.elapsed());
        debug_assert_eq!(report.len(), targets.len());
        Ok(report)
    }

    /// Tracks each identity in turn, handing every report to `on_report`.
    /// Stops at the first identity that fails.
    pub async fn track_identities<I, S, F>(
        &self,
        cancel: &CancellationToken,
        identities: I,
        selection: &[S],
        mut on_report: F,
    ) -> Result<(), TrackError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        S: AsRef<str>,
        F: FnMut(RunReport),
    {
        for identity in identities {
            let identity = identity.as_ref();
            let report = self
                .track_identity(cancel, identity, selection)
                .await
                .map_err(|source| TrackError::Identity {
                    identity: identity.to_string(),
                    source: Box::new(source),
                })?;
            on_report(report);
        }
        Ok(())
    }
}

impl Clone for Tracker {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}
