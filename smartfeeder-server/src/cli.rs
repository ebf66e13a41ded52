use clap::Parser;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/feeders.db)
  PORT        (default: 5683 or config.listen_port)

RUST_LOG, when set, overrides --log_level entirely.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "smartfeeder-server",
    version,
    about = "SmartFeeder scheduling server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Logging level (CRITICAL, ERROR, WARNING, INFO, DEBUG, TRACE)
    #[arg(short = 'l', long = "log_level", default_value = "WARNING")]
    pub log_level: String,
}

impl Cli {
    /// Translate the classic upper-case level names into a tracing
    /// filter directive. Anything unrecognized is passed through
    /// verbatim so full filter syntax still works.
    pub fn env_filter_directive(&self) -> String {
        match self.log_level.to_ascii_uppercase().as_str() {
            "CRITICAL" | "ERROR" => "error".to_string(),
            "WARNING" | "WARN" => "warn".to_string(),
            "INFO" => "info".to_string(),
            "DEBUG" => "debug".to_string(),
            "TRACE" => "trace".to_string(),
            _ => self.log_level.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(level: &str) -> Cli {
        Cli {
            log_level: level.to_string(),
        }
    }

    #[test]
    fn level_names_map_to_directives() {
        assert_eq!(cli("CRITICAL").env_filter_directive(), "error");
        assert_eq!(cli("warning").env_filter_directive(), "warn");
        assert_eq!(cli("Info").env_filter_directive(), "info");
        assert_eq!(cli("DEBUG").env_filter_directive(), "debug");
    }

    #[test]
    fn unknown_levels_pass_through() {
        assert_eq!(
            cli("smartfeeder_server=debug").env_filter_directive(),
            "smartfeeder_server=debug"
        );
    }
}
