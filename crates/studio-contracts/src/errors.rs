use std::path::PathBuf;

/// Failure reported by the external generation service.
///
/// Carries only a human-readable cause; transport details are flattened into
/// it by the capability client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct CapabilityError {
    pub cause: String,
}

impl CapabilityError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    /// Missing prompt or image; fixable by the user, shown inline.
    #[error("{0}")]
    Validation(String),

    #[error("could not read {}: {source}", resource.display())]
    Encoding {
        resource: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// One slot of a fan-out failed, which fails the whole batch.
    #[error("{label} failed: {source}")]
    SlotFailed {
        slot: usize,
        label: String,
        #[source]
        source: CapabilityError,
    },

    #[error("expected {expected} images but the service returned {received}")]
    IncompleteBatch { expected: usize, received: usize },
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY must be set")]
    MissingApiKey,
}
