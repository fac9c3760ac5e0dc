use msp_core::PuppetId;
use msp_telemetry::Direction;

const TRANSLATE_SPAN_NAME: &str = "translate.run";

/// Span wrapping one translation pass; callers attach it with `Instrument`.
pub(crate) fn translate_span(direction: Direction, puppet: PuppetId) -> tracing::Span {
    tracing::debug_span!(
        TRANSLATE_SPAN_NAME,
        direction = direction.as_str(),
        puppet = puppet.0,
    )
}
