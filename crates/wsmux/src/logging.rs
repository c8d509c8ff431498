use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Extra filter directives appended after the `--log-level` default,
/// e.g. `WSMUX_LOG=wsmux_peer=trace`.
pub const ENV_LOG_DIRECTIVES: &str = "WSMUX_LOG";

/// WebSocket internals log every control frame; keep them quiet unless asked.
const QUIET_DEPENDENCIES: &[&str] = &["tungstenite=warn", "tokio_tungstenite=warn"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Filter string for `level`, followed by any user directives. Later
/// directives win, so `extra` can re-enable the quieted dependencies.
fn filter_directives(level: LogLevel, extra: Option<&str>) -> String {
    let mut directives = vec![level.directive()];
    if level != LogLevel::Trace {
        directives.extend_from_slice(QUIET_DEPENDENCIES);
    }
    if let Some(extra) = extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        directives.push(extra);
    }
    directives.join(",")
}

fn build_filter(level: LogLevel, extra: Option<&str>) -> EnvFilter {
    let directives = filter_directives(level, extra);
    EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("ignoring invalid {ENV_LOG_DIRECTIVES} value: {err}");
        EnvFilter::new(filter_directives(level, None))
    })
}

/// Install the stderr subscriber. Library crates log through `tracing`;
/// channel ids and sizes show up as structured fields.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let extra = std::env::var(ENV_LOG_DIRECTIVES).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, extra.as_deref()))
        .with_ansi(false)
        .with_target(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_quiets_websocket_internals() {
        assert_eq!(
            filter_directives(LogLevel::Info, None),
            "info,tungstenite=warn,tokio_tungstenite=warn"
        );
    }

    #[test]
    fn trace_level_keeps_everything() {
        assert_eq!(filter_directives(LogLevel::Trace, None), "trace");
    }

    #[test]
    fn user_directives_come_last() {
        assert_eq!(
            filter_directives(LogLevel::Warn, Some(" wsmux_peer=trace ")),
            "warn,tungstenite=warn,tokio_tungstenite=warn,wsmux_peer=trace"
        );
        assert_eq!(
            filter_directives(LogLevel::Error, Some("  ")),
            filter_directives(LogLevel::Error, None)
        );
    }

    #[test]
    fn invalid_user_directives_fall_back_to_level() {
        let filter = build_filter(LogLevel::Debug, Some("wsmux_peer=loudest"));
        assert_eq!(
            filter.to_string(),
            build_filter(LogLevel::Debug, None).to_string()
        );
    }
}
