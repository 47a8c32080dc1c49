//! Caller-facing error taxonomy.
//!
//! Capability gaps never surface here; the router resolves them. What does
//! surface lets callers tell "fix your tenant configuration" apart from
//! "try again later".

use crate::types::{Channel, TenantId};

/// Errors returned by [`crate::channels::router::ChannelRouter`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Channel name is not one this crate dispatches to.
    #[error("unsupported channel '{channel}'")]
    UnsupportedChannel {
        /// Raw channel value supplied by the caller.
        channel: String,
    },
    /// Tenant has no enabled configuration for the channel.
    #[error("tenant '{tenant_id}' has no enabled {channel} configuration")]
    CredentialsMissing {
        /// Tenant being resolved.
        tenant_id: TenantId,
        /// Channel being resolved.
        channel: Channel,
    },
    /// Stored configuration exists but cannot be used.
    #[error("{channel} credentials for tenant '{tenant_id}' are unusable: {reason}")]
    CredentialsInvalid {
        /// Tenant being resolved.
        tenant_id: TenantId,
        /// Channel being resolved.
        channel: Channel,
        /// What failed (never includes secret material).
        reason: String,
    },
    /// Tenant configuration store could not be queried.
    #[error("tenant configuration store unavailable: {reason}")]
    CredentialStoreUnavailable {
        /// Store failure description.
        reason: String,
    },
    /// Adapter wiring violates a construction invariant.
    #[error("{channel} adapter misconfigured: {reason}")]
    ChannelMisconfigured {
        /// Affected channel.
        channel: Channel,
        /// Violated invariant.
        reason: String,
    },
    /// Platform refused the request; retrying will not help.
    #[error("{channel} rejected the request with status {status}: {detail}")]
    UpstreamRejected {
        /// Platform that rejected the request.
        channel: Channel,
        /// HTTP status code.
        status: u16,
        /// Sanitized upstream error detail.
        detail: String,
    },
    /// Platform stayed unavailable for every attempt.
    #[error("{channel} unavailable after {attempts} attempt(s): {detail}")]
    UpstreamUnavailable {
        /// Platform that failed.
        channel: Channel,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure observed.
        detail: String,
    },
}

impl DispatchError {
    /// Bad-request class: the caller or tenant must change something.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialsMissing { .. }
                | Self::CredentialsInvalid { .. }
                | Self::UpstreamRejected { .. }
        )
    }

    /// Server class: retrying later at a higher level may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::CredentialStoreUnavailable { .. }
        )
    }
}
