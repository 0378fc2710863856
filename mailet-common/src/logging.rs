use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Log an event from inside the engine (spool, dispatcher, repositories)
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Log an event on behalf of a matcher or mailet
#[macro_export]
macro_rules! pipeline {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "pipeline", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::pipeline!(level = TRACE, $($msg)*)
    };
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    let fallback = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    value.map_or(fallback, |raw| {
        LevelFilter::from_str(raw.trim()).unwrap_or_else(|_| {
            eprintln!("LOG_LEVEL={raw} is not a log level, using {fallback}");
            fallback
        })
    })
}

/// Install the global subscriber.
///
/// The level is taken from `LOG_LEVEL`, defaulting to TRACE for debug builds
/// and INFO otherwise. Only events from `mailet*` targets are emitted.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    let level = parse_level(std::env::var("LOG_LEVEL").ok().as_deref());

    let output = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_filter(level)
        .with_filter(FilterFn::new(|metadata| {
            metadata.target().starts_with("mailet")
        }));

    tracing_subscriber::Registry::default()
        .with(output)
        .try_init()
        .is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("warn")), LevelFilter::WARN);
        assert_eq!(parse_level(Some(" debug ")), LevelFilter::DEBUG);
        assert_eq!(parse_level(Some("off")), LevelFilter::OFF);

        let fallback = parse_level(None);
        assert_eq!(parse_level(Some("loud")), fallback);
    }
}
