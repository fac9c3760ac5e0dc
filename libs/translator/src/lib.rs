//! Message translation between Slack and Matrix.
//!
//! [`inbound`] turns a Slack payload into the canonical `(body, html)` pair,
//! resolving mentions through a [`MentionResolver`]. [`outbound`] walks a
//! Matrix HTML body and writes Slack mrkdwn. Neither direction fails: any
//! fragment that cannot be translated degrades to escaped text.

pub mod emoji;
pub mod escape;
pub mod html;
pub mod inbound;
pub mod mrkdwn;
pub mod outbound;
mod telemetry;

pub use inbound::{Formatted, MentionResolver, ResolvedEntity, format_inbound, is_noop_edit};
pub use outbound::{OutboundResolver, format_outbound};

/// Prefix of federated permalinks used for pills.
pub const MATRIX_TO_LINK: &str = "https://matrix.to/#/";
