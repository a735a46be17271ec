use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "ASSESSMENTD_LOG";
const DEFAULT_DIRECTIVE: &str = "assessmentd=info";

/// Builds the filter from `ASSESSMENTD_LOG`, then `RUST_LOG`, then the
/// default directive.
pub fn env_filter() -> EnvFilter {
    let from_env = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok());
    filter_from(from_env)
}

fn filter_from(directives: Option<String>) -> EnvFilter {
    match directives.filter(|s| !s.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(&directives).unwrap_or_else(|e| {
            eprintln!("ignoring invalid {LOG_ENV} value {directives:?}: {e}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// Logs go to stderr; stdout carries the response stream.
pub fn init_logging() {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_directive() {
        assert_eq!(filter_from(None).to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(filter_from(Some("  ".into())).to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(
            filter_from(Some("assessmentd=loud".into())).to_string(),
            DEFAULT_DIRECTIVE
        );
        assert_eq!(
            filter_from(Some("assessmentd=debug".into())).to_string(),
            "assessmentd=debug"
        );
    }
}
