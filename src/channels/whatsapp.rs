//! WhatsApp Cloud API adapter.
//!
//! Sends to `POST {graph}/{version}/{phone_number_id}/messages`. Every
//! capability is native. Recipients are normalised to bare E.164 digits and
//! rejected locally when malformed.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::credentials::CredentialResolver;
use crate::error::DispatchError;
use crate::http::RetryingHttpClient;
use crate::types::{
    ButtonOption, Capability, CapabilityDeclaration, Channel, ErrorKind, ListSection, MediaKind,
    SendResult,
};

use super::degrade::truncate_chars;
use super::graph::{self, GraphEndpoint, GraphError};
use super::{ChannelSendAdapter, SendContext};

/// Template language used when the request names none.
pub const DEFAULT_TEMPLATE_LANGUAGE: &str = "pt_BR";

/// Label of the button that opens a list when the request names none.
pub const DEFAULT_LIST_ACTION_LABEL: &str = "Options";

const BUTTON_TITLE_MAX_CHARS: usize = 20;
const LIST_ACTION_MAX_CHARS: usize = 20;
const LIST_TITLE_MAX_CHARS: usize = 24;
const LIST_DESCRIPTION_MAX_CHARS: usize = 72;
const HEADER_MAX_CHARS: usize = 60;
const FOOTER_MAX_CHARS: usize = 60;

/// Adapter for the WhatsApp Business Cloud API.
pub struct WhatsAppAdapter {
    resolver: CredentialResolver,
    http: RetryingHttpClient,
    endpoint: GraphEndpoint,
    capabilities: CapabilityDeclaration,
    default_language: String,
}

impl WhatsAppAdapter {
    /// Build an adapter declaring full native support.
    pub fn new(resolver: CredentialResolver, http: RetryingHttpClient, endpoint: GraphEndpoint) -> Self {
        Self {
            resolver,
            http,
            endpoint,
            capabilities: CapabilityDeclaration::new([
                Capability::Text,
                Capability::Media,
                Capability::Buttons,
                Capability::List,
                Capability::Template,
                Capability::ReadReceipt,
            ]),
            default_language: DEFAULT_TEMPLATE_LANGUAGE.to_owned(),
        }
    }

    /// Override the template language used when a request names none.
    #[must_use]
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    async fn post(
        &self,
        ctx: &SendContext,
        label: &str,
        payload: Value,
    ) -> Result<SendResult, DispatchError> {
        let Some(credentials) =
            graph::credentials_for(&self.resolver, ctx, Channel::WhatsApp).await?
        else {
            return Ok(SendResult::failed(ErrorKind::Cancelled));
        };
        let url = self.endpoint.messages_url(credentials.account_id());
        let outcome = self
            .http
            .post_json(label, &url, credentials.access_token(), &payload, &ctx.cancel)
            .await;
        graph::into_send_result(Channel::WhatsApp, outcome, message_id, business_error)
    }

    /// Resolve the recipient or report `InvalidRecipient` without a network call.
    async fn post_to_recipient(
        &self,
        ctx: &SendContext,
        label: &str,
        message_type: &str,
        content: Value,
    ) -> Result<SendResult, DispatchError> {
        let Some(to) = normalize_phone_number(&ctx.to) else {
            debug!(tenant_id = %ctx.tenant_id, "rejecting malformed WhatsApp recipient");
            return Ok(SendResult::failed(ErrorKind::InvalidRecipient));
        };
        self.post(ctx, label, message_payload(&to, message_type, content))
            .await
    }
}

#[async_trait]
impl ChannelSendAdapter for WhatsAppAdapter {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn capabilities(&self) -> &CapabilityDeclaration {
        &self.capabilities
    }

    async fn send_text(&self, ctx: &SendContext, body: &str) -> Result<SendResult, DispatchError> {
        let content = json!({ "preview_url": false, "body": body });
        self.post_to_recipient(ctx, "whatsapp.text", "text", content)
            .await
    }

    async fn send_media(
        &self,
        ctx: &SendContext,
        url: &str,
        kind: MediaKind,
        caption: Option<&str>,
        filename: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        self.post_to_recipient(
            ctx,
            "whatsapp.media",
            kind.as_str(),
            media_content(url, kind, caption, filename),
        )
        .await
    }

    async fn send_buttons(
        &self,
        ctx: &SendContext,
        body: &str,
        options: &[ButtonOption],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        let mut content = buttons_content(body, options);
        frame(&mut content, header, footer);
        self.post_to_recipient(ctx, "whatsapp.buttons", "interactive", content)
            .await
    }

    async fn send_list(
        &self,
        ctx: &SendContext,
        header: &str,
        action_label: Option<&str>,
        sections: &[ListSection],
        footer: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        let mut content = list_content(header, action_label, sections);
        frame(&mut content, None, footer);
        self.post_to_recipient(ctx, "whatsapp.list", "interactive", content)
            .await
    }

    async fn send_template(
        &self,
        ctx: &SendContext,
        name: &str,
        params: &[String],
        language: Option<&str>,
    ) -> Result<SendResult, DispatchError> {
        let language = language.unwrap_or(self.default_language.as_str());
        self.post_to_recipient(
            ctx,
            "whatsapp.template",
            "template",
            template_content(name, params, language),
        )
        .await
    }

    async fn mark_read(
        &self,
        ctx: &SendContext,
        provider_message_id: &str,
    ) -> Result<SendResult, DispatchError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": provider_message_id,
        });
        self.post(ctx, "whatsapp.read", payload).await
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn message_payload(to: &str, message_type: &str, content: Value) -> Value {
    let mut payload = Map::new();
    payload.insert("messaging_product".to_owned(), json!("whatsapp"));
    payload.insert("recipient_type".to_owned(), json!("individual"));
    payload.insert("to".to_owned(), json!(to));
    payload.insert("type".to_owned(), json!(message_type));
    payload.insert(message_type.to_owned(), content);
    Value::Object(payload)
}

fn media_content(url: &str, kind: MediaKind, caption: Option<&str>, filename: Option<&str>) -> Value {
    let mut media = Map::new();
    media.insert("link".to_owned(), json!(url));
    if let Some(caption) = caption.filter(|c| !c.is_empty() && kind != MediaKind::Audio) {
        media.insert("caption".to_owned(), json!(caption));
    }
    if let Some(filename) = filename.filter(|f| !f.is_empty() && kind == MediaKind::Document) {
        media.insert("filename".to_owned(), json!(filename));
    }
    Value::Object(media)
}

fn buttons_content(body: &str, options: &[ButtonOption]) -> Value {
    let buttons: Vec<Value> = options
        .iter()
        .map(|option| {
            json!({
                "type": "reply",
                "reply": {
                    "id": option.id,
                    "title": truncate_chars(&option.label, BUTTON_TITLE_MAX_CHARS),
                },
            })
        })
        .collect();
    json!({
        "type": "button",
        "body": { "text": body },
        "action": { "buttons": buttons },
    })
}

fn list_content(header: &str, action_label: Option<&str>, sections: &[ListSection]) -> Value {
    let sections: Vec<Value> = sections
        .iter()
        .map(|section| {
            let rows: Vec<Value> = section
                .rows
                .iter()
                .map(|row| {
                    let mut entry = Map::new();
                    entry.insert("id".to_owned(), json!(row.id));
                    entry.insert(
                        "title".to_owned(),
                        json!(truncate_chars(&row.label, LIST_TITLE_MAX_CHARS)),
                    );
                    if let Some(description) = row.description.as_deref().filter(|d| !d.is_empty()) {
                        entry.insert(
                            "description".to_owned(),
                            json!(truncate_chars(description, LIST_DESCRIPTION_MAX_CHARS)),
                        );
                    }
                    Value::Object(entry)
                })
                .collect();
            let mut value = Map::new();
            if let Some(title) = section.title.as_deref().filter(|t| !t.is_empty()) {
                value.insert(
                    "title".to_owned(),
                    json!(truncate_chars(title, LIST_TITLE_MAX_CHARS)),
                );
            }
            value.insert("rows".to_owned(), Value::Array(rows));
            Value::Object(value)
        })
        .collect();
    let button = truncate_chars(
        action_label
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LIST_ACTION_LABEL),
        LIST_ACTION_MAX_CHARS,
    );
    json!({
        "type": "list",
        "body": { "text": header },
        "action": { "button": button, "sections": sections },
    })
}

/// Attach the optional text header and footer of an interactive message.
fn frame(content: &mut Value, header: Option<&str>, footer: Option<&str>) {
    if let Some(header) = header.filter(|h| !h.is_empty()) {
        content["header"] = json!({
            "type": "text",
            "text": truncate_chars(header, HEADER_MAX_CHARS),
        });
    }
    if let Some(footer) = footer.filter(|f| !f.is_empty()) {
        content["footer"] = json!({ "text": truncate_chars(footer, FOOTER_MAX_CHARS) });
    }
}

fn template_content(name: &str, params: &[String], language: &str) -> Value {
    let mut template = json!({
        "name": name,
        "language": { "code": language },
    });
    if !params.is_empty() {
        let parameters: Vec<Value> = params
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        template["components"] = json!([{ "type": "body", "parameters": parameters }]);
    }
    template
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Strip formatting characters and validate E.164 digits (8 to 15, no leading 0).
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !(c.is_whitespace() || matches!(c, '-' | '(' | ')' | '+' | '.')))
        .collect();
    let valid = (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0');
    valid.then_some(digits)
}

fn message_id(body: &Value) -> Option<String> {
    body.get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|message| message.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn business_error(error: &GraphError) -> Option<ErrorKind> {
    match error.code {
        131_026 => Some(ErrorKind::RecipientUnavailable),
        131_047 => Some(ErrorKind::OutsideMessagingWindow),
        131_050 => Some(ErrorKind::RecipientOptedOut),
        131_030 => Some(ErrorKind::InvalidRecipient),
        132_000..=132_999 => Some(ErrorKind::TemplateRejected),
        _ => None,
    }
}
