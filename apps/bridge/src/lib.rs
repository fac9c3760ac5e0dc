//! Matrix Slack puppet bridge.
//!
//! [`Orchestrator`] is the entry point for the host framework: it links
//! and unlinks accounts, relays Slack events into Matrix and Matrix sends
//! into Slack, and answers entity lookups.

pub mod config;
pub mod error;
pub mod factory;
mod hooks;
pub mod orchestrator;
mod outbound;
pub mod params;
pub mod resolve;

pub use config::{BridgeConfig, OAuthConfig, TransportKind};
pub use error::BridgeError;
pub use factory::{ClientFactory, SlackClientFactory};
pub use orchestrator::Orchestrator;
