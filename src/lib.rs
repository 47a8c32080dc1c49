//! Switchboard: multi-tenant outbound dispatch to WhatsApp, Messenger and Instagram.
//!
//! Callers build a [`types::SendRequest`] and hand it to
//! [`channels::router::ChannelRouter`]. The router picks the platform
//! adapter, rewrites shapes the platform cannot send natively, resolves the
//! tenant's encrypted credentials and sends through a retrying HTTP client.
//!
//! Library only: no binary, no HTTP surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod logging;
pub mod types;

pub mod channels;

pub use channels::router::ChannelRouter;
pub use error::DispatchError;
pub use types::{Channel, SendRequest, SendResult, TenantId};
