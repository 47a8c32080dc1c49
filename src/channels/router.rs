//! Channel router: adapter selection, degradation and delegation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::credentials::{CredentialResolver, SecretDecryptor, TenantConfigStore};
use crate::error::DispatchError;
use crate::http::RetryingHttpClient;
use crate::types::{Capability, CapabilityDeclaration, Channel, SendRequest, SendResult, TenantId};

use super::degrade::{self, DispatchPlan};
use super::instagram::InstagramAdapter;
use super::messenger::MessengerAdapter;
use super::templates::{StaticTemplateCatalog, TemplateCatalog};
use super::whatsapp::WhatsAppAdapter;
use super::{ChannelSendAdapter, SendContext};

/// Builder collecting adapters and the template catalogue.
pub struct ChannelRouterBuilder {
    adapters: HashMap<Channel, Arc<dyn ChannelSendAdapter>>,
    templates: Arc<dyn TemplateCatalog>,
}

impl ChannelRouterBuilder {
    /// Register an adapter for its channel, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ChannelMisconfigured`] if the adapter does
    /// not declare [`Capability::Text`].
    pub fn adapter(mut self, adapter: Arc<dyn ChannelSendAdapter>) -> Result<Self, DispatchError> {
        let channel = adapter.channel();
        if !adapter.capabilities().supports(Capability::Text) {
            return Err(DispatchError::ChannelMisconfigured {
                channel,
                reason: "adapter must support text".to_owned(),
            });
        }
        self.adapters.insert(channel, adapter);
        Ok(self)
    }

    /// Use `templates` to render templates on channels without native support.
    #[must_use]
    pub fn templates(mut self, templates: Arc<dyn TemplateCatalog>) -> Self {
        self.templates = templates;
        self
    }

    /// Finish building.
    pub fn build(self) -> ChannelRouter {
        ChannelRouter {
            adapters: self.adapters,
            templates: self.templates,
        }
    }
}

/// Top-level entry point for outbound dispatch.
#[derive(Clone)]
pub struct ChannelRouter {
    adapters: HashMap<Channel, Arc<dyn ChannelSendAdapter>>,
    templates: Arc<dyn TemplateCatalog>,
}

impl ChannelRouter {
    /// Start an empty builder.
    pub fn builder() -> ChannelRouterBuilder {
        ChannelRouterBuilder {
            adapters: HashMap::new(),
            templates: Arc::new(StaticTemplateCatalog::new()),
        }
    }

    /// Wire all three adapters from configuration.
    ///
    /// Each adapter gets its own [`RetryingHttpClient`]. The resolver is
    /// shared and reads `store` as given. To cache lookups, build the cache
    /// with [`CredentialsConfig::caching_store`], keep the `Arc` for
    /// invalidation and pass a clone here.
    ///
    /// [`CredentialsConfig::caching_store`]: crate::config::CredentialsConfig::caching_store
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ChannelMisconfigured`] if an adapter
    /// violates the text invariant.
    pub fn from_config(
        config: &DispatchConfig,
        store: Arc<dyn TenantConfigStore>,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Result<Self, DispatchError> {
        let resolver = CredentialResolver::new(store, decryptor);
        let endpoint = config.graph.endpoint();
        let http = || RetryingHttpClient::new(config.retry.policy(), config.graph.timeouts());

        let whatsapp = WhatsAppAdapter::new(resolver.clone(), http(), endpoint.clone())
            .with_default_language(config.whatsapp.default_language.clone());
        let messenger = MessengerAdapter::new(resolver.clone(), http(), endpoint.clone());
        let instagram = InstagramAdapter::new(resolver, http(), endpoint);

        Ok(Self::builder()
            .templates(Arc::new(config.template_catalog()))
            .adapter(Arc::new(whatsapp))?
            .adapter(Arc::new(messenger))?
            .adapter(Arc::new(instagram))?
            .build())
    }

    /// Capability declaration of the adapter serving `channel`.
    pub fn capabilities(&self, channel: Channel) -> Option<&CapabilityDeclaration> {
        self.adapters.get(&channel).map(|a| a.capabilities())
    }

    /// Channels with a registered adapter, in stable order.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.adapters.keys().copied().collect();
        channels.sort();
        channels
    }

    fn adapter(&self, channel: Channel) -> Result<&Arc<dyn ChannelSendAdapter>, DispatchError> {
        self.adapters
            .get(&channel)
            .ok_or_else(|| DispatchError::UnsupportedChannel {
                channel: channel.to_string(),
            })
    }

    /// Send `request` to `to` on `channel` for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Credential and upstream failures, see [`DispatchError`]. Capability
    /// gaps are resolved by degradation and never reported as errors.
    pub async fn send(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        to: &str,
        request: &SendRequest,
    ) -> Result<SendResult, DispatchError> {
        self.send_with_cancellation(tenant_id, channel, to, request, &CancellationToken::new())
            .await
    }

    /// Like [`ChannelRouter::send`] with the channel given by name.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnsupportedChannel`] for an unknown name.
    pub async fn send_by_name(
        &self,
        tenant_id: &TenantId,
        channel: &str,
        to: &str,
        request: &SendRequest,
    ) -> Result<SendResult, DispatchError> {
        let channel: Channel = channel.parse()?;
        self.send(tenant_id, channel, to, request).await
    }

    /// Send with a caller-owned cancellation token.
    ///
    /// Cancelling the token aborts the in-flight attempt or backoff sleep
    /// and yields a `failed` result with `cancelled`.
    ///
    /// # Errors
    ///
    /// See [`ChannelRouter::send`].
    pub async fn send_with_cancellation(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        to: &str,
        request: &SendRequest,
        cancel: &CancellationToken,
    ) -> Result<SendResult, DispatchError> {
        let adapter = self.adapter(channel)?;
        let requested = request.capability();
        let span = info_span!(
            "dispatch",
            dispatch_id = %Uuid::new_v4(),
            tenant_id = %tenant_id,
            channel = %channel,
            kind = ?requested,
        );

        async move {
            match degrade::plan(adapter.capabilities(), request, self.templates.as_ref()) {
                DispatchPlan::Deliver(payload) => {
                    if let Cow::Owned(degraded) = &payload {
                        info!(delivered_as = ?degraded.capability(), "degraded request");
                    }
                    let ctx = SendContext::new(tenant_id.clone(), to)
                        .with_cancellation(cancel.clone());
                    adapter.deliver(&ctx, &payload).await
                }
                DispatchPlan::Skip => {
                    debug!("operation not available on channel, skipping");
                    Ok(SendResult::skipped())
                }
                DispatchPlan::Fail(kind) => {
                    if let SendRequest::Template { name, .. } = request {
                        warn!(template = %name, "no template text to render, not sending");
                    }
                    Ok(SendResult::failed(kind))
                }
                DispatchPlan::Misconfigured => Err(DispatchError::ChannelMisconfigured {
                    channel,
                    reason: "adapter cannot send text".to_owned(),
                }),
            }
        }
        .instrument(span)
        .await
    }

    /// Mark `provider_message_id` from `to` as read.
    ///
    /// Channels without read receipts return `skipped` without a network call.
    ///
    /// # Errors
    ///
    /// See [`ChannelRouter::send`].
    pub async fn mark_read(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        to: &str,
        provider_message_id: &str,
    ) -> Result<SendResult, DispatchError> {
        self.send(
            tenant_id,
            channel,
            to,
            &SendRequest::read_receipt(provider_message_id),
        )
        .await
    }
}
