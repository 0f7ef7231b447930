//! Structured log macros.
//!
//! Every entry carries a `component` field naming the domain service that
//! emitted it, so JSON logs from different subscribers can be told apart.

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_event {
    // Info level with component
    (info, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    // Warn level with component
    (warn, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    // Error level with component
    (error, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    // Debug level with component
    (debug, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a bus event with its topic, id and correlation id.
#[macro_export]
macro_rules! log_bus_event {
    ($level:ident, $component:expr, $msg:expr, $event:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            topic = %$event.event_type,
            event_id = %$event.id,
            correlation_id = %$event.correlation_id,
            $($($field)*,)?
            $msg
        )
    };
}
