//! Error taxonomy for the reconstruction engine.
//!
//! Provider failures are typed so each strategy can decide its own retry
//! policy; everything else is caught at the strategy boundary and surfaced
//! as a failed job, never a crash of the serving process.

use thiserror::Error;

/// Failures raised by the provider gateway.
///
/// The gateway itself never retries; retry policy belongs to the calling
/// strategy.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport or auth failure, including caller-supplied timeouts.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider asked us to back off.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// The response could not be parsed into the expected shape.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Rate limits are worth a longer pause before the next attempt.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Engine-level errors surfaced to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any provider call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Persistence or other infrastructure failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
