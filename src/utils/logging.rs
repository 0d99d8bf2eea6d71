//! Structured logging with context tags
//!
//! Spans carry the peer, command and height a log line belongs to, so a
//! single connection or sync round can be followed through interleaved output.

use std::collections::HashMap;
use tracing::{Level, Span, field, span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Context tags for structured logging
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    /// Component emitting the log (connection, header_sync, relay, ...)
    pub component: Option<String>,
    /// Peer the work concerns
    pub peer: Option<String>,
    /// Message command being handled
    pub command: Option<String>,
    /// Block height being handled
    pub height: Option<u64>,
    /// Additional custom fields
    pub custom_fields: HashMap<String, String>,
}

impl LogContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for a component
    pub fn for_component(component: &str) -> Self {
        Self {
            component: Some(component.to_string()),
            ..Self::new()
        }
    }

    /// Add peer to context
    pub fn with_peer(mut self, peer: impl ToString) -> Self {
        self.peer = Some(peer.to_string());
        self
    }

    /// Add command to context
    pub fn with_command(mut self, command: impl ToString) -> Self {
        self.command = Some(command.to_string());
        self
    }

    /// Add height to context
    pub fn with_height(mut self, height: u64) -> Self {
        self.height = Some(height);
        self
    }

    /// Add custom field
    pub fn with_field(mut self, key: String, value: String) -> Self {
        self.custom_fields.insert(key, value);
        self
    }

    /// Create a tracing span with this context
    pub fn span(&self, name: &str) -> Span {
        let span = span!(
            Level::INFO,
            "context",
            name = %name,
            component = field::Empty,
            peer = field::Empty,
            command = field::Empty,
            height = field::Empty
        );

        if let Some(ref component) = self.component {
            span.record("component", field::display(component));
        }
        if let Some(ref peer) = self.peer {
            span.record("peer", field::display(peer));
        }
        if let Some(ref command) = self.command {
            span.record("command", field::display(command));
        }
        if let Some(height) = self.height {
            span.record("height", height);
        }

        span
    }
}

/// Logging initialization with structured context support
pub fn init_structured_logging(level: &str, format: &str, include_target: bool) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(include_target)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        "pretty" => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(include_target)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        _ => {
            let fmt_layer = fmt::layer()
                .with_target(include_target)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    }
}

/// Log a peer connection event
#[macro_export]
macro_rules! log_peer_event {
    ($level:expr, $peer:expr, $event:expr $(, $key:ident = $value:expr)*) => {{
        let span = tracing::span!(
            tracing::Level::INFO,
            "peer_event",
            peer = %$peer
        );
        let _enter = span.enter();
        match $level {
            tracing::Level::ERROR => tracing::error!($($key = %$value,)* $event),
            tracing::Level::WARN => tracing::warn!($($key = %$value,)* $event),
            tracing::Level::INFO => tracing::info!($($key = %$value,)* $event),
            tracing::Level::DEBUG => tracing::debug!($($key = %$value,)* $event),
            _ => tracing::trace!($($key = %$value,)* $event),
        }
    }};
}

/// Log a state change
#[macro_export]
macro_rules! log_state_change {
    ($component:expr, $old_state:expr, $new_state:expr $(, $key:ident = $value:expr)*) => {{
        let span = tracing::span!(
            tracing::Level::INFO,
            "state_change",
            component = %$component
        );
        let _enter = span.enter();
        tracing::info!(
            old_state = %$old_state,
            new_state = %$new_state,
            $($key = %$value,)*
            "State changed"
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_creation() {
        let ctx = LogContext::for_component("header_sync")
            .with_peer("peer-3")
            .with_command("headers")
            .with_height(840_000)
            .with_field("custom".to_string(), "value".to_string());

        assert_eq!(ctx.component, Some("header_sync".to_string()));
        assert_eq!(ctx.peer, Some("peer-3".to_string()));
        assert_eq!(ctx.height, Some(840_000));
        assert_eq!(ctx.custom_fields.get("custom"), Some(&"value".to_string()));
    }

    #[test]
    fn test_span_without_subscriber() {
        let span = LogContext::for_component("relay").with_peer(7).span("mempool");
        let _enter = span.enter();
        crate::log_state_change!("relay", "idle", "responding");
        crate::log_peer_event!(tracing::Level::DEBUG, 7, "filter installed", bytes = 36);
    }
}
