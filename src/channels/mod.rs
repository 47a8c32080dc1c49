//! Platform send adapters and the router in front of them.
//!
//! Defines the [`ChannelSendAdapter`] trait. Three adapters are implemented:
//! - [`whatsapp::WhatsAppAdapter`]: WhatsApp Cloud API, every capability
//! - [`messenger::MessengerAdapter`]: Messenger Send API, no list or template
//! - [`instagram::InstagramAdapter`]: Instagram Messaging, text, media and receipts
//!
//! [`router::ChannelRouter`] picks the adapter for a channel and runs
//! [`degrade::plan`] before delegating.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::types::{
    ButtonOption, Capability, CapabilityDeclaration, Channel, ListSection, MediaKind,
    SendRequest, SendResult, TenantId,
};

pub mod degrade;
pub mod graph;
pub mod instagram;
pub mod messenger;
pub mod router;
pub mod templates;
pub mod whatsapp;

/// Per-dispatch context handed to adapter methods.
#[derive(Debug, Clone)]
pub struct SendContext {
    /// Tenant whose credentials are used.
    pub tenant_id: TenantId,
    /// Platform recipient: phone number, PSID or IGSID.
    pub to: String,
    /// Fires when the caller abandons the dispatch.
    pub cancel: CancellationToken,
}

impl SendContext {
    /// Context with a fresh, never-cancelled token.
    pub fn new(tenant_id: TenantId, to: impl Into<String>) -> Self {
        Self {
            tenant_id,
            to: to.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Send contract implemented by every platform adapter.
///
/// Only `send_text` is mandatory. Other methods default to a
/// [`DispatchError::ChannelMisconfigured`] error; the router never calls a
/// method whose capability is not declared.
#[async_trait]
pub trait ChannelSendAdapter: Send + Sync {
    /// Platform served by this adapter.
    fn channel(&self) -> Channel;

    /// Capabilities sent natively, fixed at construction.
    fn capabilities(&self) -> &CapabilityDeclaration;

    /// Send a plain text message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn send_text(&self, ctx: &SendContext, body: &str) -> Result<SendResult, DispatchError>;

    /// Send a media attachment.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn send_media(
        &self,
        _ctx: &SendContext,
        _url: &str,
        _kind: MediaKind,
        _caption: Option<&str>,
        _filename: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        Err(undeclared(self.channel(), Capability::Media))
    }

    /// Send body text with reply buttons.
    ///
    /// `header` and `footer` are optional decoration; platforms without a
    /// slot for them drop them.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn send_buttons(
        &self,
        _ctx: &SendContext,
        _body: &str,
        _options: &[ButtonOption],
        _header: Option<&str>,
        _footer: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        Err(undeclared(self.channel(), Capability::Buttons))
    }

    /// Send a sectioned list.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn send_list(
        &self,
        _ctx: &SendContext,
        _header: &str,
        _action_label: Option<&str>,
        _sections: &[ListSection],
        _footer: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        Err(undeclared(self.channel(), Capability::List))
    }

    /// Send a pre-approved template.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn send_template(
        &self,
        _ctx: &SendContext,
        _name: &str,
        _params: &[String],
        _language: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        Err(undeclared(self.channel(), Capability::Template))
    }

    /// Mark an inbound message as read.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on credential or upstream failure.
    async fn mark_read(
        &self,
        _ctx: &SendContext,
        _provider_message_id: &str,
    ) -> Result<SendResult, DispatchError> {
        Err(undeclared(self.channel(), Capability::ReadReceipt))
    }

    /// Route a request to the matching method without any capability check.
    ///
    /// # Errors
    ///
    /// Returns whatever the selected method returns.
    async fn deliver(
        &self,
        ctx: &SendContext,
        request: &SendRequest,
    ) -> Result<SendResult, DispatchError> {
        match request {
            SendRequest::Text { body } => self.send_text(ctx, body).await,
            SendRequest::Media {
                url,
                kind,
                caption,
                filename,
            } => {
                self.send_media(ctx, url, *kind, caption.as_deref(), filename.as_deref())
                    .await
            }
            SendRequest::Buttons {
                body,
                options,
                header,
                footer,
            } => {
                self.send_buttons(ctx, body, options, header.as_deref(), footer.as_deref())
                    .await
            }
            SendRequest::List {
                header,
                action_label,
                sections,
                footer,
            } => {
                self.send_list(
                    ctx,
                    header,
                    action_label.as_deref(),
                    sections,
                    footer.as_deref(),
                )
                .await
            }
            SendRequest::Template {
                name,
                params,
                language,
            } => {
                self.send_template(ctx, name, params, language.as_deref())
                    .await
            }
            SendRequest::ReadReceipt {
                provider_message_id,
            } => self.mark_read(ctx, provider_message_id).await,
        }
    }
}

fn undeclared(channel: Channel, capability: Capability) -> DispatchError {
    DispatchError::ChannelMisconfigured {
        channel,
        reason: format!("{capability:?} is not implemented by this adapter"),
    }
}
