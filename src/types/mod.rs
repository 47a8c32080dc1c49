//! Core dispatch types: channels, tenants, outbound requests and results.
//!
//! A [`SendRequest`] is a closed sum of message shapes. Adapters declare the
//! subset they send natively through a [`CapabilityDeclaration`]; everything
//! else is rewritten by the router before it reaches the adapter.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// Channel / tenant identity
// ---------------------------------------------------------------------------

/// External messaging platform an outbound message is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// WhatsApp Business Cloud API.
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    /// Facebook Messenger Send API.
    #[serde(rename = "MESSENGER")]
    Messenger,
    /// Instagram Messaging API.
    #[serde(rename = "INSTAGRAM")]
    Instagram,
}

impl Channel {
    /// Every supported channel, in declaration order.
    pub const ALL: [Channel; 3] = [Channel::WhatsApp, Channel::Messenger, Channel::Instagram];

    /// Canonical upper-case name, as stored in tenant configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhatsApp => "WHATSAPP",
            Self::Messenger => "MESSENGER",
            Self::Instagram => "INSTAGRAM",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WHATSAPP" => Ok(Self::WhatsApp),
            "MESSENGER" => Ok(Self::Messenger),
            "INSTAGRAM" => Ok(Self::Instagram),
            _ => Err(DispatchError::UnsupportedChannel {
                channel: s.to_owned(),
            }),
        }
    }
}

/// Tenant isolation boundary. Every credential lookup and send is scoped to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wrap a raw tenant identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Kind of media attached to a [`SendRequest::Media`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio clip or voice note.
    Audio,
    /// Arbitrary file.
    Document,
}

impl MediaKind {
    /// Every media kind.
    pub const ALL: [MediaKind; 4] = [Self::Image, Self::Video, Self::Audio, Self::Document];

    /// Lower-case wire name shared by the Graph APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// One selectable reply button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonOption {
    /// Identifier echoed back by the platform when tapped.
    pub id: String,
    /// Text shown on the button.
    pub label: String,
}

impl ButtonOption {
    /// Build a button option.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// One selectable row of a list message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    /// Identifier echoed back by the platform when selected.
    pub id: String,
    /// Row title.
    pub label: String,
    /// Optional secondary line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ListRow {
    /// Build a row without a description.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
        }
    }

    /// Attach a description line.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A titled group of rows inside a list message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    /// Optional section heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Rows in display order.
    pub rows: Vec<ListRow>,
}

/// Outbound message shape. Exactly one variant is active per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendRequest {
    /// Plain text message.
    Text {
        /// Message body.
        body: String,
    },
    /// Media attachment referenced by URL.
    Media {
        /// Publicly reachable media URL.
        url: String,
        /// Media classification.
        kind: MediaKind,
        /// Optional caption shown with the media.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        /// Optional file name (documents only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Body text with quick-reply buttons.
    Buttons {
        /// Prompt shown above the buttons.
        body: String,
        /// Selectable options in display order.
        options: Vec<ButtonOption>,
        /// Short title above the body, rendered where the platform has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        /// Small print below the buttons, rendered where the platform has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
    },
    /// Sectioned selectable list.
    List {
        /// Prompt shown above the list.
        header: String,
        /// Label of the button that opens the list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_label: Option<String>,
        /// Sections in display order.
        sections: Vec<ListSection>,
        /// Small print below the list, rendered where the platform has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
    },
    /// Pre-approved parameterized template.
    Template {
        /// Template name as registered with the platform.
        name: String,
        /// Positional parameters, 1-indexed in template text.
        params: Vec<String>,
        /// Language code; adapters supply a default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Read receipt for a previously received message.
    ReadReceipt {
        /// Platform identifier of the message being acknowledged.
        provider_message_id: String,
    },
}

impl SendRequest {
    /// Shorthand for a [`SendRequest::Text`].
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Shorthand for [`SendRequest::Buttons`] without header or footer.
    pub fn buttons(body: impl Into<String>, options: Vec<ButtonOption>) -> Self {
        Self::Buttons {
            body: body.into(),
            options,
            header: None,
            footer: None,
        }
    }

    /// Shorthand for a [`SendRequest::Template`] without an explicit language.
    pub fn template(name: impl Into<String>, params: Vec<String>) -> Self {
        Self::Template {
            name: name.into(),
            params,
            language: None,
        }
    }

    /// Shorthand for a [`SendRequest::ReadReceipt`].
    pub fn read_receipt(provider_message_id: impl Into<String>) -> Self {
        Self::ReadReceipt {
            provider_message_id: provider_message_id.into(),
        }
    }

    /// Capability an adapter needs to send this request natively.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Text { .. } => Capability::Text,
            Self::Media { .. } => Capability::Media,
            Self::Buttons { .. } => Capability::Buttons,
            Self::List { .. } => Capability::List,
            Self::Template { .. } => Capability::Template,
            Self::ReadReceipt { .. } => Capability::ReadReceipt,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// One kind of send operation an adapter may implement natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain text.
    Text,
    /// Media attachments.
    Media,
    /// Quick-reply buttons.
    Buttons,
    /// Sectioned lists.
    List,
    /// Parameterized templates.
    Template,
    /// Read receipts.
    ReadReceipt,
}

/// Platform shape limits that drive degradation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeLimits {
    /// Maximum number of buttons in one interactive message.
    pub max_buttons: usize,
    /// Maximum characters in a button label.
    pub button_label_max_chars: usize,
    /// Maximum rows a native list may carry.
    pub max_list_rows: usize,
    /// Media kinds the platform attaches natively; others degrade to a link.
    pub native_media: &'static [MediaKind],
}

impl ShapeLimits {
    /// Whether `kind` is attached natively.
    pub fn attaches(&self, kind: MediaKind) -> bool {
        self.native_media.contains(&kind)
    }
}

impl Default for ShapeLimits {
    fn default() -> Self {
        Self {
            max_buttons: 3,
            button_label_max_chars: 20,
            max_list_rows: 10,
            native_media: &MediaKind::ALL,
        }
    }
}

/// Immutable set of capabilities an adapter instance sends natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDeclaration {
    supported: BTreeSet<Capability>,
    limits: ShapeLimits,
}

impl CapabilityDeclaration {
    /// Declare a capability set with default shape limits.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            supported: capabilities.into_iter().collect(),
            limits: ShapeLimits::default(),
        }
    }

    /// Replace the shape limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ShapeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether the capability is sent natively.
    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(&capability)
    }

    /// Declared capabilities in stable order.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.supported.iter().copied()
    }

    /// Shape limits for interactive messages.
    pub fn limits(&self) -> ShapeLimits {
        self.limits
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome class of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Accepted by the platform.
    Sent,
    /// No-op degradation; nothing was sent.
    Skipped,
    /// Attempted and rejected as an expected business outcome, or cancelled.
    Failed,
}

/// Reason attached to a [`SendStatus::Failed`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Recipient cannot receive messages (unknown number, blocked, deactivated).
    RecipientUnavailable,
    /// Recipient opted out of messages from this business.
    RecipientOptedOut,
    /// Customer service window closed; only templates may be sent.
    OutsideMessagingWindow,
    /// Recipient identifier is malformed.
    InvalidRecipient,
    /// Template missing, unapproved, or parameters do not match.
    TemplateRejected,
    /// No canonical text is known for a template that had to be rendered.
    TemplateTextMissing,
    /// Caller cancelled the dispatch mid-flight.
    Cancelled,
}

/// Uniform outcome record returned for every dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Outcome class.
    pub status: SendStatus,
    /// Platform message identifier when one was returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    /// Failure reason for [`SendStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl SendResult {
    /// Successful send.
    pub fn sent(provider_message_id: Option<String>) -> Self {
        Self {
            status: SendStatus::Sent,
            provider_message_id,
            error_kind: None,
        }
    }

    /// Nothing was sent because the platform has no equivalent operation.
    pub fn skipped() -> Self {
        Self {
            status: SendStatus::Skipped,
            provider_message_id: None,
            error_kind: None,
        }
    }

    /// Expected business failure.
    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            status: SendStatus::Failed,
            provider_message_id: None,
            error_kind: Some(kind),
        }
    }

    /// True when the platform accepted the message.
    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}
