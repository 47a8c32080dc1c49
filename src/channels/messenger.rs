//! Messenger Send API adapter.
//!
//! Native: text, media attachments, button templates and `mark_seen`.
//! Lists and templates are degraded by the router.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::credentials::CredentialResolver;
use crate::error::DispatchError;
use crate::http::RetryingHttpClient;
use crate::types::{
    ButtonOption, Capability, CapabilityDeclaration, Channel, ErrorKind, MediaKind, SendResult,
};

use super::degrade::truncate_chars;
use super::graph::{self, GraphEndpoint};
use super::{ChannelSendAdapter, SendContext};

const BUTTON_TITLE_MAX_CHARS: usize = 20;

/// Adapter for a Facebook page's Messenger inbox.
pub struct MessengerAdapter {
    resolver: CredentialResolver,
    http: RetryingHttpClient,
    endpoint: GraphEndpoint,
    capabilities: CapabilityDeclaration,
}

impl MessengerAdapter {
    /// Build an adapter for text, media, buttons and read receipts.
    pub fn new(resolver: CredentialResolver, http: RetryingHttpClient, endpoint: GraphEndpoint) -> Self {
        Self {
            resolver,
            http,
            endpoint,
            capabilities: CapabilityDeclaration::new([
                Capability::Text,
                Capability::Media,
                Capability::Buttons,
                Capability::ReadReceipt,
            ]),
        }
    }

    async fn post(
        &self,
        ctx: &SendContext,
        label: &str,
        payload: Value,
    ) -> Result<SendResult, DispatchError> {
        let Some(credentials) =
            graph::credentials_for(&self.resolver, ctx, Channel::Messenger).await?
        else {
            return Ok(SendResult::failed(ErrorKind::Cancelled));
        };
        let url = self.endpoint.messages_url(credentials.account_id());
        let outcome = self
            .http
            .post_json(label, &url, credentials.access_token(), &payload, &ctx.cancel)
            .await;
        graph::into_send_result(
            Channel::Messenger,
            outcome,
            graph::messaging_message_id,
            graph::messaging_business_error,
        )
    }
}

#[async_trait]
impl ChannelSendAdapter for MessengerAdapter {
    fn channel(&self) -> Channel {
        Channel::Messenger
    }

    fn capabilities(&self) -> &CapabilityDeclaration {
        &self.capabilities
    }

    async fn send_text(&self, ctx: &SendContext, body: &str) -> Result<SendResult, DispatchError> {
        self.post(ctx, "messenger.text", text_payload(&ctx.to, body))
            .await
    }

    async fn send_media(
        &self,
        ctx: &SendContext,
        url: &str,
        kind: MediaKind,
        caption: Option<&str>,
        _filename: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        let result = self
            .post(ctx, "messenger.media", attachment_payload(&ctx.to, url, kind))
            .await?;

        // Attachments carry no caption; it follows as its own message.
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            if result.is_sent() {
                if let Err(e) = self.send_text(ctx, caption).await {
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        error = %e,
                        "media sent but caption follow-up failed"
                    );
                }
            }
        }
        Ok(result)
    }

    async fn send_buttons(
        &self,
        ctx: &SendContext,
        body: &str,
        options: &[ButtonOption],
        _header: Option<&str>,
        _footer: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        self.post(ctx, "messenger.buttons", buttons_payload(&ctx.to, body, options))
            .await
    }

    async fn mark_read(
        &self,
        ctx: &SendContext,
        _provider_message_id: &str,
    ) -> Result<SendResult, DispatchError> {
        self.post(ctx, "messenger.read", sender_action_payload(&ctx.to, "mark_seen"))
            .await
    }
}

fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "recipient": { "id": to },
        "messaging_type": "RESPONSE",
        "message": { "text": body },
    })
}

fn attachment_payload(to: &str, url: &str, kind: MediaKind) -> Value {
    let attachment_type = match kind {
        MediaKind::Document => "file",
        other => other.as_str(),
    };
    json!({
        "recipient": { "id": to },
        "messaging_type": "RESPONSE",
        "message": {
            "attachment": {
                "type": attachment_type,
                "payload": { "url": url, "is_reusable": true },
            },
        },
    })
}

fn buttons_payload(to: &str, body: &str, options: &[ButtonOption]) -> Value {
    let buttons: Vec<Value> = options
        .iter()
        .map(|option| {
            json!({
                "type": "postback",
                "title": truncate_chars(&option.label, BUTTON_TITLE_MAX_CHARS),
                "payload": option.id,
            })
        })
        .collect();
    json!({
        "recipient": { "id": to },
        "messaging_type": "RESPONSE",
        "message": {
            "attachment": {
                "type": "template",
                "payload": {
                    "template_type": "button",
                    "text": body,
                    "buttons": buttons,
                },
            },
        },
    })
}

/// Sender action body shared with the Instagram adapter.
pub(crate) fn sender_action_payload(to: &str, action: &str) -> Value {
    json!({
        "recipient": { "id": to },
        "sender_action": action,
    })
}
