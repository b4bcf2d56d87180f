use reqwest::{RequestBuilder, Response, StatusCode, Url};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid base address for target {key}: {reason}")]
    InvalidBaseAddress { key: String, reason: String },
    #[error("Duplicate target key: {0}")]
    DuplicateKey(String),
    #[error("Duplicate display name: {0}")]
    DuplicateDisplayName(String),
}

/// Decides whether a completed response means the identity exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessPredicate {
    /// Any 2xx status.
    #[default]
    Success,
    /// Exactly this status.
    Exact(u16),
    /// Anything except this status, for services that answer every
    /// unknown profile the same way.
    AnyExcept(u16),
}

impl SuccessPredicate {
    pub fn evaluate(&self, response: &Response) -> bool {
        self.matches(response.status())
    }

    pub fn matches(&self, status: StatusCode) -> bool {
        match *self {
            SuccessPredicate::Success => status.is_success(),
            SuccessPredicate::Exact(code) => status.as_u16() == code,
            SuccessPredicate::AnyExcept(code) => status.as_u16() != code,
        }
    }
}

/// A transformation applied to an outgoing probe before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMutator {
    /// Prepend a sigil to the identity, e.g. `@alice`.
    Prefix(&'static str),
    Lowercase,
    Header(&'static str, &'static str),
}

impl RequestMutator {
    pub fn apply_identity(&self, identity: String) -> String {
        match self {
            RequestMutator::Prefix(sigil) => format!("{}{}", sigil, identity),
            RequestMutator::Lowercase => identity.to_lowercase(),
            RequestMutator::Header(..) => identity,
        }
    }

    pub fn apply_request(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            RequestMutator::Header(name, value) => request.header(*name, *value),
            RequestMutator::Prefix(_) | RequestMutator::Lowercase => request,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    key: String,
    display_name: String,
    base_address: Url,
    predicate: SuccessPredicate,
    mutators: Vec<RequestMutator>,
}

impl TargetDescriptor {
    pub fn new(
        key: &str,
        display_name: impl Into<String>,
        base_address: &str,
    ) -> Result<Self, RegistryError> {
        let key = normalize_key(key);
        let base_address =
            Url::parse(base_address).map_err(|e| RegistryError::InvalidBaseAddress {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            key,
            display_name: display_name.into(),
            base_address,
            predicate: SuccessPredicate::default(),
            mutators: Vec::new(),
        })
    }

    pub fn with_predicate(mut self, predicate: SuccessPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_mutator(mut self, mutator: RequestMutator) -> Self {
        self.mutators.push(mutator);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn base_address(&self) -> &Url {
        &self.base_address
    }

    pub fn predicate(&self) -> SuccessPredicate {
        self.predicate
    }

    pub fn mutators(&self) -> &[RequestMutator] {
        &self.mutators
    }
}

/// Normalizes a user-supplied target key: trimmed, lowercased, spaces to
/// underscores.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

/// Outcome of resolving a selection against the registry.
#[derive(Debug, Default)]
pub struct Resolution {
    pub matched: Vec<Arc<TargetDescriptor>>,
    pub unknown: Vec<String>,
}

/// Immutable set of probe targets, built once at startup.
#[derive(Debug)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<TargetDescriptor>>,
}

impl TargetRegistry {
    pub fn new<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = TargetDescriptor>,
    {
        let mut targets = HashMap::new();
        let mut names = HashSet::new();

        for descriptor in descriptors {
            if !names.insert(descriptor.display_name.clone()) {
                return Err(RegistryError::DuplicateDisplayName(descriptor.display_name));
            }
            if targets.contains_key(&descriptor.key) {
                return Err(RegistryError::DuplicateKey(descriptor.key));
            }
            targets.insert(descriptor.key.clone(), Arc::new(descriptor));
        }

        Ok(Self { targets })
    }

    /// The built-in table of supported services.
    pub fn builtin() -> Result<Self, RegistryError> {
        let at = RequestMutator::Prefix("@");

        Self::new([
            TargetDescriptor::new("facebook", "Facebook", "https://www.facebook.com/")?,
            TargetDescriptor::new("twitter", "Twitter", "https://www.twitter.com/")?,
            TargetDescriptor::new("instagram", "Instagram", "https://www.instagram.com/")?,
            TargetDescriptor::new("linkedin", "LinkedIn", "https://www.linkedin.com/in/")?,
            TargetDescriptor::new("github", "GitHub", "https://www.github.com/")?,
            TargetDescriptor::new("pinterest", "Pinterest", "https://www.pinterest.com/")?,
            TargetDescriptor::new("tumblr", "Tumblr", "https://www.tumblr.com/")?,
            TargetDescriptor::new("youtube", "YouTube", "https://www.youtube.com/")?,
            TargetDescriptor::new("soundcloud", "SoundCloud", "https://soundcloud.com/")?,
            TargetDescriptor::new("snapchat", "Snapchat", "https://www.snapchat.com/add/")?,
            TargetDescriptor::new("tiktok", "TikTok", "https://www.tiktok.com/")?
                .with_mutator(at.clone()),
            TargetDescriptor::new("behance", "Behance", "https://www.behance.net/")?,
            TargetDescriptor::new("medium", "Medium", "https://www.medium.com/")?
                .with_mutator(at.clone()),
            TargetDescriptor::new("quora", "Quora", "https://www.quora.com/profile/")?,
            TargetDescriptor::new("flickr", "Flickr", "https://www.flickr.com/people/")?,
            TargetDescriptor::new("periscope", "Periscope", "https://www.periscope.tv/")?,
            TargetDescriptor::new("twitch", "Twitch", "https://www.twitch.tv/")?,
            TargetDescriptor::new("dribbble", "Dribbble", "https://www.dribbble.com/")?,
            TargetDescriptor::new(
                "stumbleupon",
                "StumbleUpon",
                "https://www.stumbleupon.com/stumbler/",
            )?,
            TargetDescriptor::new("ello", "Ello", "https://www.ello.co/")?,
            TargetDescriptor::new("product_hunt", "Product Hunt", "https://www.producthunt.com/")?
                .with_mutator(at),
            TargetDescriptor::new("telegram", "Telegram", "https://www.telegram.me/")?,
        ])
    }

    pub fn get(&self, key: &str) -> Option<&Arc<TargetDescriptor>> {
        self.targets.get(&normalize_key(key))
    }

    pub fn all_targets(&self) -> impl Iterator<Item = &Arc<TargetDescriptor>> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Resolves a selection without side effects. An empty selection
    /// matches every target.
    pub fn resolve<S: AsRef<str>>(&self, selection: &[S]) -> Resolution {
        if selection.is_empty() {
            return Resolution {
                matched: self.targets.values().cloned().collect(),
                unknown: Vec::new(),
            };
        }

        let mut seen = HashSet::new();
        let mut resolution = Resolution::default();

        for requested in selection {
            let key = normalize_key(requested.as_ref());
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.targets.get(&key) {
                Some(target) => resolution.matched.push(Arc::clone(target)),
                None => resolution.unknown.push(requested.as_ref().to_string()),
            }
        }

        resolution
    }

    /// Narrows the registry to `selection`, warning about and skipping
    /// unknown keys.
    pub fn filter<S: AsRef<str>>(&self, selection: &[S]) -> Vec<Arc<TargetDescriptor>> {
        let Resolution { matched, unknown } = self.resolve(selection);
        for key in unknown {
            warn!(target_key = %key, "Unknown target platform, skipping");
        }
        matched
    }
}
