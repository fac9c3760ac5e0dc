//! Test doubles shared by the bridge crates.
//!
//! - [`MockSlackApi`]: in-memory Slack Web API with call counters, scripted
//!   failures and an optional per-call delay.
//! - [`ScriptedConnector`]: hands out event streams a test can feed and drop.
//! - [`RecordingHost`]: a host framework that records every call.

mod connector;
mod host;
mod slack_api;

pub use connector::ScriptedConnector;
pub use host::{HostCall, RecordingHost};
pub use slack_api::MockSlackApi;

use msp_core::{RemoteChannel, RemoteUser};

pub fn user(id: &str, name: &str) -> RemoteUser {
    RemoteUser {
        id: id.into(),
        name: name.to_lowercase(),
        display_name: name.into(),
        ..Default::default()
    }
}

pub fn channel(id: &str, name: &str) -> RemoteChannel {
    RemoteChannel {
        id: id.into(),
        name: Some(name.into()),
        ..Default::default()
    }
}
