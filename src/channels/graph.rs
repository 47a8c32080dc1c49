//! Shared Meta Graph API plumbing for the three adapters.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::credentials::{ChannelCredentials, CredentialResolver};
use crate::error::DispatchError;
use crate::http::{sanitize_http_error_body, HttpError, HttpResponse};
use crate::types::{Channel, ErrorKind, SendResult};

use super::SendContext;

/// Default Graph API host.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Default Graph API version segment.
pub const DEFAULT_GRAPH_API_VERSION: &str = "v21.0";

/// Graph API base URL and version used to build send endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEndpoint {
    base_url: String,
    api_version: String,
}

impl Default for GraphEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_GRAPH_BASE_URL, DEFAULT_GRAPH_API_VERSION)
    }
}

impl GraphEndpoint {
    /// Build an endpoint; trailing slashes on `base_url` are ignored.
    pub fn new(base_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            base_url,
            api_version: api_version.into().trim_matches('/').to_owned(),
        }
    }

    /// `{base}/{version}/{account_id}/messages`.
    pub fn messages_url(&self, account_id: &str) -> String {
        format!("{}/{}/{account_id}/messages", self.base_url, self.api_version)
    }
}

/// Graph API error object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphError {
    /// Error code.
    pub code: i64,
    /// Optional subcode refining `code`.
    #[serde(default)]
    pub error_subcode: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Meta trace id for support requests.
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

/// Parse a `{"error": {...}}` body.
pub fn parse_graph_error(body: &str) -> Option<GraphError> {
    serde_json::from_str::<GraphErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error)
}

/// Resolve the tenant's credentials unless `ctx.cancel` fires first.
///
/// `None` means the dispatch was cancelled before a token was available.
pub(crate) async fn credentials_for(
    resolver: &CredentialResolver,
    ctx: &SendContext,
    channel: Channel,
) -> Result<Option<ChannelCredentials>, DispatchError> {
    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            info!(channel = %channel, "dispatch cancelled before credentials resolved");
            Ok(None)
        }
        credentials = resolver.resolve(&ctx.tenant_id, channel) => credentials.map(Some),
    }
}

/// Map a finished HTTP exchange to the caller-facing outcome.
///
/// Successful responses yield `sent` with the id picked by `message_id`.
/// Rejections recognised by `business_error` become `failed`; every other
/// rejection propagates as [`DispatchError::UpstreamRejected`].
pub fn into_send_result(
    channel: Channel,
    outcome: Result<HttpResponse, HttpError>,
    message_id: fn(&Value) -> Option<String>,
    business_error: fn(&GraphError) -> Option<ErrorKind>,
) -> Result<SendResult, DispatchError> {
    match outcome {
        Ok(response) => {
            let id = serde_json::from_str::<Value>(&response.body)
                .ok()
                .as_ref()
                .and_then(message_id);
            if id.is_none() {
                debug!(channel = %channel, "upstream accepted message without an id");
            }
            Ok(SendResult::sent(id))
        }
        Err(HttpError::Cancelled) => {
            info!(channel = %channel, "dispatch cancelled by caller");
            Ok(SendResult::failed(ErrorKind::Cancelled))
        }
        Err(HttpError::Rejected { status, body }) => {
            let graph_error = parse_graph_error(&body);
            if let Some(kind) = graph_error.as_ref().and_then(business_error) {
                info!(
                    channel = %channel,
                    status,
                    code = graph_error.as_ref().map(|e| e.code),
                    error_kind = ?kind,
                    "platform declined delivery"
                );
                return Ok(SendResult::failed(kind));
            }
            Err(DispatchError::UpstreamRejected {
                channel,
                status,
                detail: sanitize_http_error_body(&body),
            })
        }
        Err(HttpError::Unavailable { attempts, detail }) => {
            Err(DispatchError::UpstreamUnavailable {
                channel,
                attempts,
                detail,
            })
        }
    }
}

/// Messenger and Instagram Send API business errors.
pub fn messaging_business_error(error: &GraphError) -> Option<ErrorKind> {
    match (error.code, error.error_subcode) {
        (551, _) => Some(ErrorKind::RecipientUnavailable),
        (10, Some(2_018_278)) => Some(ErrorKind::OutsideMessagingWindow),
        (100, Some(2_018_001)) => Some(ErrorKind::InvalidRecipient),
        (10, Some(2_018_065)) | (200, Some(2_018_028)) => Some(ErrorKind::RecipientOptedOut),
        _ => None,
    }
}

/// `message_id` field used by the Messenger and Instagram Send APIs.
pub fn messaging_message_id(body: &Value) -> Option<String> {
    body.get("message_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
