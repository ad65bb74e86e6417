use clap::ValueEnum;

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
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }

    /// Name accepted by `--log-level`; handed to task processes.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Level named by `raw`, falling back to `info`.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|raw| <Self as ValueEnum>::from_str(raw, true).ok())
            .unwrap_or(LogLevel::Info)
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

/// Task processes log JSON records to stderr for the parent to re-emit.
/// The target is kept so the parent can say where a record came from.
pub fn init_worker_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_round_trip_through_the_environment() {
        for level in LogLevel::value_variants() {
            assert_eq!(LogLevel::parse_or_default(Some(level.as_str())), *level);
        }
        assert_eq!(LogLevel::parse_or_default(Some("DEBUG")), LogLevel::Debug);
        assert_eq!(LogLevel::parse_or_default(Some("loud")), LogLevel::Info);
        assert_eq!(LogLevel::parse_or_default(None), LogLevel::Info);
    }
}
