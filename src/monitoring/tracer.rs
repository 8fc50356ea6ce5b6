/*!
 * Structured Tracing
 * Subscriber setup and session-scoped spans using the tracing crate
 *
 * Library code logs through the `log` facade; the subscriber installed here
 * bridges those records so both end up in one stream.
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SCX_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SCX_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
    installed
}

/// Span covering one session phase, tagged with the session id
pub struct SessionSpan {
    span: tracing::Span,
    start: Instant,
    session: Uuid,
    phase: &'static str,
}

impl SessionSpan {
    pub fn new(session: Uuid, phase: &'static str) -> Self {
        let span = span!(
            Level::INFO,
            "session",
            session = %session,
            phase = phase,
            duration_ms = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            session,
            phase,
        }
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }
}

impl Drop for SessionSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", elapsed.as_millis() as u64);

        if self.phase != "run" && elapsed.as_millis() > 1000 {
            warn!(
                session = %self.session,
                phase = self.phase,
                duration_ms = elapsed.as_millis() as u64,
                "slow session phase"
            );
        } else {
            debug!(
                session = %self.session,
                phase = self.phase,
                duration_ms = elapsed.as_millis() as u64,
                "session phase finished"
            );
        }
    }
}
