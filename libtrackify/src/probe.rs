use crate::targets::TargetDescriptor;
use crate::types::ProbeOutcome;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Cannot append identity to address {address} of {target}")]
    InvalidAddress { target: String, address: String },
    #[error("Request failed for {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Probe for {0} cancelled")]
    Cancelled(String),
}

impl ProbeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled(_))
    }
}

/// Address probed for `identity`: the mutated identity appended as a new
/// path segment of the target's base address.
pub fn target_url(identity: &str, target: &TargetDescriptor) -> Result<Url, ProbeError> {
    let identity = target
        .mutators()
        .iter()
        .fold(identity.to_string(), |id, mutator| mutator.apply_identity(id));

    let mut url = target.base_address().clone();
    url.path_segments_mut()
        .map_err(|_| ProbeError::InvalidAddress {
            target: target.display_name().to_string(),
            address: target.base_address().to_string(),
        })?
        .pop_if_empty()
        .push(&identity);

    Ok(url)
}

/// Issues one GET for `identity` against `target` and classifies the
/// response with the target's predicate.
pub async fn probe(
    client: &Client,
    cancel: &CancellationToken,
    identity: &str,
    target: &TargetDescriptor,
) -> ProbeOutcome {
    let url = target_url(identity, target)?;

    let request = target
        .mutators()
        .iter()
        .fold(client.get(url), |request, mutator| mutator.apply_request(request));

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(ProbeError::Cancelled(target.display_name().to_string()));
        }
        result = request.send() => result.map_err(|source| ProbeError::Transport {
            target: target.display_name().to_string(),
            source,
        })?,
    };

    let found = target.predicate().evaluate(&response);
    debug!(
        platform = %target.display_name(),
        status = response.status().as_u16(),
        found,
        "Probe completed"
    );

    Ok(found)
}
