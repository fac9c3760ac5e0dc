//! Matrix Slack puppet core contracts and value types.
//!
//! This crate holds the data exchanged between the Slack remote client, the
//! formatters, and the orchestrator: remote entity records, the typed Slack
//! message model, the host framework interface the bridge calls into, and the
//! error taxonomy shared by every layer.
pub mod entity;
pub mod error;
pub mod host;
pub mod message;
pub mod types;

pub use entity::*;
pub use error::*;
pub use host::*;
pub use message::*;
pub use types::*;

/// Prefix the bridge puts in front of text it posts itself, so a stray echo
/// can be recognised even when the deduplicator has no record of it.
pub const SELF_SENT_MARKER: char = '\u{fff0}';

/// Returns `true` when `text` was produced by the bridge itself.
///
/// ```
/// use msp_core::is_self_sent;
///
/// assert!(is_self_sent("\u{fff0}hello"));
/// assert!(!is_self_sent("hello"));
/// ```
pub fn is_self_sent(text: &str) -> bool {
    text.starts_with(SELF_SENT_MARKER)
}
