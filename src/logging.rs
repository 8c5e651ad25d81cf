//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive; it beats every other source.
pub const LOG_ENV: &str = "VECU_LOG";

pub const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive: `VECU_LOG`, then the command line, then the
/// configuration file, then [`DEFAULT_FILTER`].
pub fn filter_directive(cli: Option<&str>, config: Option<&str>) -> String {
    let env = std::env::var(LOG_ENV).ok();
    choose_directive(env.as_deref(), cli, config)
}

fn choose_directive(env: Option<&str>, cli: Option<&str>, config: Option<&str>) -> String {
    [env, cli, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Install the global `fmt` subscriber writing to stderr.
///
/// Returns `false` if a subscriber was already installed. An unparsable
/// directive falls back to [`DEFAULT_FILTER`].
pub fn init_logging(cli: Option<&str>, config: Option<&str>) -> bool {
    let directive = filter_directive(cli, config);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        assert_eq!(choose_directive(Some("trace"), Some("debug"), Some("warn")), "trace");
        assert_eq!(choose_directive(None, Some("debug"), Some("warn")), "debug");
        assert_eq!(choose_directive(None, None, Some("warn")), "warn");
        assert_eq!(choose_directive(Some("  "), None, None), DEFAULT_FILTER);
    }

    #[test]
    fn second_init_is_refused() {
        init_logging(Some("off"), None);
        assert!(!init_logging(Some("off"), None));
    }
}
