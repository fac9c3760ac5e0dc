//! Slack side of the Matrix Slack puppet bridge.
//!
//! [`RemoteClient`] is the entry point: it owns one account's connection,
//! its [`EntityCache`] and [`FetchLock`], and exposes lookups and outbound
//! operations. Transports plug in through [`Connector`]; the Web API through
//! [`SlackApi`].
pub mod api;
pub mod cache;
pub mod client;
pub mod error;
pub mod events;
pub mod lock;
pub mod socket;
pub mod webhook;
mod routes;
mod wire;

pub use api::{
    DEFAULT_API_BASE, FileUpload, PostMessage, ReqwestSlackApi, SlackApi, open_socket_url,
};
pub use cache::EntityCache;
pub use client::{ClientEvent, ClientOptions, DEFAULT_RECONNECT_DELAY, RemoteClient};
pub use error::ApiError;
pub use events::{Connector, TransportEvent, parse_event};
pub use lock::{Acquire, DEFAULT_LOCK_TTL, FetchLock, LockGuard, Waiter};
pub use socket::SocketModeConnector;
pub use webhook::{EVENTS_PATH, WebhookHub, verify_slack_sig};
pub use wire::{AuthIdentity, Usergroup};
