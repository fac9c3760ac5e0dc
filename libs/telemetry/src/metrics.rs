use metrics::counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Slack to Matrix.
    Inbound,
    /// Matrix to Slack.
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    Failed,
}

pub fn record_bridged(direction: Direction, kind: &'static str) {
    counter!(
        "bridge_messages_total",
        "direction" => direction.as_str(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_echo_suppressed(puppet: u64) {
    counter!("bridge_echo_suppressed_total", "puppet" => puppet.to_string()).increment(1);
}

pub fn record_entity_fetch(kind: &'static str, outcome: FetchOutcome) {
    let outcome = match outcome {
        FetchOutcome::Fetched => "fetched",
        FetchOutcome::Failed => "failed",
    };
    counter!(
        "slack_entity_fetch_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_reconnect(succeeded: bool) {
    let outcome = if succeeded { "ok" } else { "failed" };
    counter!("slack_reconnect_total", "outcome" => outcome).increment(1);
}
