//! Per-tenant channel credential resolution.
//!
//! [`CredentialResolver`] fetches the encrypted record for one
//! `(tenant, channel)` pair, decrypts it through an injected
//! [`SecretDecryptor`] and validates the result. Nothing is cached here.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::types::{Channel, TenantId};

pub mod cipher;
pub mod store;

pub use cipher::{AesGcmCipher, CipherError, SecretDecryptor};
pub use store::{
    CachingTenantStore, EncryptedChannelConfig, InMemoryTenantStore, StoreError,
    TenantConfigStore,
};

/// Opaque secret value that never appears in logs.
///
/// Debug output always shows `__REDACTED__`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Create a new secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret. Use only when building an upstream request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Decrypted platform credentials for one tenant and channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCredentials {
    /// WhatsApp Cloud API sender.
    WhatsApp {
        /// Sending phone number id.
        phone_number_id: String,
        /// System user access token.
        access_token: SecretValue,
    },
    /// Messenger page.
    Messenger {
        /// Facebook page id.
        page_id: String,
        /// Page access token.
        access_token: SecretValue,
    },
    /// Instagram professional account.
    Instagram {
        /// Instagram account id.
        account_id: String,
        /// Page access token linked to the account.
        access_token: SecretValue,
    },
}

impl ChannelCredentials {
    /// Build the variant matching `channel`.
    pub fn for_channel(channel: Channel, account_id: impl Into<String>, token: SecretValue) -> Self {
        let account_id = account_id.into();
        match channel {
            Channel::WhatsApp => Self::WhatsApp {
                phone_number_id: account_id,
                access_token: token,
            },
            Channel::Messenger => Self::Messenger {
                page_id: account_id,
                access_token: token,
            },
            Channel::Instagram => Self::Instagram {
                account_id,
                access_token: token,
            },
        }
    }

    /// Channel these credentials belong to.
    pub fn channel(&self) -> Channel {
        match self {
            Self::WhatsApp { .. } => Channel::WhatsApp,
            Self::Messenger { .. } => Channel::Messenger,
            Self::Instagram { .. } => Channel::Instagram,
        }
    }

    /// Platform account id used in the send endpoint path.
    pub fn account_id(&self) -> &str {
        match self {
            Self::WhatsApp {
                phone_number_id, ..
            } => phone_number_id,
            Self::Messenger { page_id, .. } => page_id,
            Self::Instagram { account_id, .. } => account_id,
        }
    }

    /// Bearer token for the send endpoint.
    pub fn access_token(&self) -> &SecretValue {
        match self {
            Self::WhatsApp { access_token, .. }
            | Self::Messenger { access_token, .. }
            | Self::Instagram { access_token, .. } => access_token,
        }
    }
}

/// Associated data binding a ciphertext to its tenant and channel.
pub fn associated_data(tenant_id: &TenantId, channel: Channel) -> Vec<u8> {
    format!("{tenant_id}:{channel}").into_bytes()
}

/// Resolves decrypted credentials, always scoped by tenant.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn TenantConfigStore>,
    decryptor: Arc<dyn SecretDecryptor>,
}

impl CredentialResolver {
    /// Build a resolver over a store and a decrypt step.
    pub fn new(store: Arc<dyn TenantConfigStore>, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        Self { store, decryptor }
    }

    /// Resolve credentials for `(tenant_id, channel)`.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::CredentialsMissing`] when no record exists or it is disabled.
    /// - [`DispatchError::CredentialsInvalid`] when the record cannot be decrypted or is blank.
    /// - [`DispatchError::CredentialStoreUnavailable`] when the store lookup fails.
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<ChannelCredentials, DispatchError> {
        let record = self
            .store
            .channel_config(tenant_id, channel)
            .await
            .map_err(|e| DispatchError::CredentialStoreUnavailable {
                reason: e.to_string(),
            })?;

        let Some(record) = record.filter(|r| r.enabled) else {
            debug!(tenant_id = %tenant_id, channel = %channel, "channel not configured");
            return Err(DispatchError::CredentialsMissing {
                tenant_id: tenant_id.clone(),
                channel,
            });
        };

        let invalid = |reason: String| DispatchError::CredentialsInvalid {
            tenant_id: tenant_id.clone(),
            channel,
            reason,
        };

        let account_id = record.account_id.trim();
        if account_id.is_empty() {
            return Err(invalid("account id is empty".to_owned()));
        }

        let token = self
            .decryptor
            .decrypt(
                &record.access_token_ciphertext,
                &associated_data(tenant_id, channel),
            )
            .map_err(|e| {
                warn!(tenant_id = %tenant_id, channel = %channel, error = %e, "credential decrypt failed");
                invalid(e.to_string())
            })?;
        if token.expose().trim().is_empty() {
            return Err(invalid("access token is empty".to_owned()));
        }

        Ok(ChannelCredentials::for_channel(channel, account_id, token))
    }
}
