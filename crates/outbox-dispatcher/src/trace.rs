//! Trace context propagation across the outbox.
//!
//! The producer stores its W3C `traceparent` next to the entry. When the
//! dispatcher picks the entry up, the stored value becomes the remote parent
//! of the per-entry span, so the publish shows up in the producer's trace.
//! None of this can change a dispatch outcome.

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use outbox_database::OutboxEntry;
use std::collections::HashMap;
use tracing::field::Empty;
use tracing::{debug, info_span, warn, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Carrier key for the stored trace context.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// Extracts a parent context from the stored carrier and opens spans.
pub trait TracePropagator: Send + Sync {
    /// Never fails. An absent or malformed carrier yields a context
    /// without a parent.
    fn extract(&self, carrier: Option<&str>) -> Context;

    fn start_span(&self, name: &str, entry: &OutboxEntry, parent: &Context) -> DispatchSpan;
}

/// Span covering the processing of one entry.
#[derive(Debug)]
pub struct DispatchSpan {
    span: Span,
}

impl DispatchSpan {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// A span that records nothing.
    pub fn disabled() -> Self {
        Self { span: Span::none() }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_error(&self, message: &str) {
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error", message);
    }

    pub fn end(self) {
        drop(self.span);
    }
}

/// W3C Trace Context propagation backed by OpenTelemetry.
#[derive(Debug, Default)]
pub struct W3cTracePropagator {
    propagator: TraceContextPropagator,
}

impl W3cTracePropagator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TracePropagator for W3cTracePropagator {
    fn extract(&self, carrier: Option<&str>) -> Context {
        let Some(traceparent) = carrier.map(str::trim).filter(|s| !s.is_empty()) else {
            return Context::new();
        };

        let mut headers = HashMap::with_capacity(1);
        headers.insert(TRACEPARENT_KEY.to_string(), traceparent.to_string());

        let cx = self.propagator.extract_with_context(&Context::new(), &headers);
        if !cx.span().span_context().is_valid() {
            warn!(traceparent, "Ignoring malformed trace context");
            return Context::new();
        }

        debug!(
            trace_id = %cx.span().span_context().trace_id(),
            "Extracted remote parent"
        );
        cx
    }

    fn start_span(&self, name: &str, entry: &OutboxEntry, parent: &Context) -> DispatchSpan {
        let span = info_span!(
            "outbox.dispatch",
            otel.name = %name,
            entry_id = %entry.id,
            action = %entry.action,
            retry_count = entry.retry_count,
            otel.status_code = Empty,
            error = Empty,
        );
        span.set_parent(parent.clone());
        DispatchSpan::new(span)
    }
}

/// Propagator that ignores carriers and opens no spans.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracePropagator;

impl TracePropagator for NoopTracePropagator {
    fn extract(&self, _carrier: Option<&str>) -> Context {
        Context::new()
    }

    fn start_span(&self, _name: &str, _entry: &OutboxEntry, _parent: &Context) -> DispatchSpan {
        DispatchSpan::disabled()
    }
}

/// Whether the context carries a usable remote parent.
pub fn has_remote_parent(cx: &Context) -> bool {
    let span = cx.span();
    let span_context = span.span_context();
    span_context.is_valid() && span_context.is_remote()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outbox_database::NewOutboxEntry;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_extract_valid_traceparent() {
        let cx = W3cTracePropagator::new().extract(Some(TRACEPARENT));
        assert!(has_remote_parent(&cx));

        let span = cx.span();
        assert_eq!(
            span.span_context().trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(span.span_context().span_id().to_string(), "b7ad6b7169203331");
        assert!(span.span_context().is_sampled());
    }

    #[test]
    fn test_extract_absent_or_blank() {
        let propagator = W3cTracePropagator::new();
        assert!(!has_remote_parent(&propagator.extract(None)));
        assert!(!has_remote_parent(&propagator.extract(Some(""))));
        assert!(!has_remote_parent(&propagator.extract(Some("   "))));
    }

    #[test]
    fn test_extract_malformed_is_parentless() {
        let propagator = W3cTracePropagator::new();
        for carrier in [
            "garbage",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "zz-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            assert!(!has_remote_parent(&propagator.extract(Some(carrier))), "{carrier}");
        }
    }

    #[test]
    fn test_spans_without_subscriber_are_harmless() {
        let entry = NewOutboxEntry::new("CREATE", "{}").into_entry(Utc::now());
        let propagator = W3cTracePropagator::new();
        let parent = propagator.extract(Some(TRACEPARENT));

        let span = propagator.start_span("OutboxProcessing", &entry, &parent);
        span.record_error("broker down");
        span.end();

        let noop = NoopTracePropagator.start_span("OutboxProcessing", &entry, &parent);
        assert!(noop.span().is_disabled());
        noop.end();
    }
}
