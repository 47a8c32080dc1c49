//! Instagram Messaging adapter.
//!
//! Native: text, image attachments and `mark_seen`. The declaration limits
//! native media to images, so the router degrades other kinds to caption
//! plus link text along with buttons and lists.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::credentials::CredentialResolver;
use crate::error::DispatchError;
use crate::http::RetryingHttpClient;
use crate::types::{
    Capability, CapabilityDeclaration, Channel, ErrorKind, MediaKind, SendResult, ShapeLimits,
};

use super::graph::{self, GraphEndpoint};
use super::messenger::sender_action_payload;
use super::{ChannelSendAdapter, SendContext};

/// Adapter for an Instagram professional account.
pub struct InstagramAdapter {
    resolver: CredentialResolver,
    http: RetryingHttpClient,
    endpoint: GraphEndpoint,
    capabilities: CapabilityDeclaration,
}

impl InstagramAdapter {
    /// Build an adapter for text, media and read receipts.
    pub fn new(resolver: CredentialResolver, http: RetryingHttpClient, endpoint: GraphEndpoint) -> Self {
        Self {
            resolver,
            http,
            endpoint,
            capabilities: CapabilityDeclaration::new([
                Capability::Text,
                Capability::Media,
                Capability::ReadReceipt,
            ])
            .with_limits(ShapeLimits {
                native_media: &[MediaKind::Image],
                ..ShapeLimits::default()
            }),
        }
    }

    async fn post(
        &self,
        ctx: &SendContext,
        label: &str,
        payload: Value,
    ) -> Result<SendResult, DispatchError> {
        let Some(credentials) =
            graph::credentials_for(&self.resolver, ctx, Channel::Instagram).await?
        else {
            return Ok(SendResult::failed(ErrorKind::Cancelled));
        };
        let url = self.endpoint.messages_url(credentials.account_id());
        let outcome = self
            .http
            .post_json(label, &url, credentials.access_token(), &payload, &ctx.cancel)
            .await;
        graph::into_send_result(
            Channel::Instagram,
            outcome,
            graph::messaging_message_id,
            graph::messaging_business_error,
        )
    }
}

#[async_trait]
impl ChannelSendAdapter for InstagramAdapter {
    fn channel(&self) -> Channel {
        Channel::Instagram
    }

    fn capabilities(&self) -> &CapabilityDeclaration {
        &self.capabilities
    }

    async fn send_text(&self, ctx: &SendContext, body: &str) -> Result<SendResult, DispatchError> {
        let payload = json!({
            "recipient": { "id": ctx.to },
            "message": { "text": body },
        });
        self.post(ctx, "instagram.text", payload).await
    }

    async fn send_media(
        &self,
        ctx: &SendContext,
        url: &str,
        kind: MediaKind,
        caption: Option<&str>,
        _filename: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        if !self.capabilities.limits().attaches(kind) {
            return Err(DispatchError::ChannelMisconfigured {
                channel: Channel::Instagram,
                reason: format!("{} attachments are not supported", kind.as_str()),
            });
        }

        let payload = json!({
            "recipient": { "id": ctx.to },
            "message": {
                "attachment": {
                    "type": "image",
                    "payload": { "url": url },
                },
            },
        });
        let result = self.post(ctx, "instagram.media", payload).await?;
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            if result.is_sent() {
                if let Err(e) = self.send_text(ctx, caption).await {
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        error = %e,
                        "image sent but caption follow-up failed"
                    );
                }
            }
        }
        Ok(result)
    }

    async fn mark_read(
        &self,
        ctx: &SendContext,
        _provider_message_id: &str,
    ) -> Result<SendResult, DispatchError> {
        self.post(ctx, "instagram.read", sender_action_payload(&ctx.to, "mark_seen"))
            .await
    }
}
