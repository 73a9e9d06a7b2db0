//! Runtime configuration for the service client.
//!
//! DESIGN
//! ======
//! One explicit `Config` value is built at start-up and handed to the
//! locator and service constructors. It derives `clap::Args` so binaries
//! flatten it into their own parser; the `debug` flag comes from the
//! environment rather than the command line.

use clap::Parser;
use uuid::Uuid;

pub const DEFAULT_LOCATOR_ENDPOINT: &str = "localhost:10053";
pub const DEFAULT_APP_NAME: &str = "standalone";
pub const DEFAULT_PROTOCOL_VERSION: i64 = 0;

/// Environment variable that enables debug mode when set to `debug` (any case).
pub const DEBUG_ENV: &str = "DEBUG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid arguments: {0}")]
    Args(#[from] clap::Error),
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Application name.
    #[arg(long = "app", default_value = DEFAULT_APP_NAME)]
    app_name: String,

    /// Unix socket path to connect to the runtime.
    #[arg(long, default_value = "")]
    endpoint: String,

    /// Comma-separated locator endpoints, tried in order.
    #[arg(long = "locator", value_delimiter = ',', default_value = DEFAULT_LOCATOR_ENDPOINT)]
    locators: Vec<String>,

    /// Protocol version.
    #[arg(long, default_value_t = DEFAULT_PROTOCOL_VERSION)]
    protocol: i64,

    /// Instance UUID.
    #[arg(long)]
    uuid: Option<Uuid>,

    #[arg(skip)]
    debug: bool,
}

#[derive(Parser, Debug)]
#[command(name = "cocaine")]
struct ConfigArgs {
    #[command(flatten)]
    config: Config,
}

impl Config {
    /// Parse a full argument vector (program name first) and read `DEBUG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Args`] for unknown flags or unparsable values.
    pub fn parse_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let parsed = ConfigArgs::try_parse_from(args)?;
        Ok(parsed.config.with_debug_env(std::env::var(DEBUG_ENV).ok().as_deref()))
    }

    /// Apply the value of the `DEBUG` environment variable.
    #[must_use]
    pub fn with_debug_env(mut self, raw: Option<&str>) -> Self {
        self.debug = raw.is_some_and(|v| v.eq_ignore_ascii_case("debug"));
        self
    }

    /// Replace the locator list.
    #[must_use]
    pub fn with_locators(mut self, locators: Vec<String>) -> Self {
        self.locators = locators;
        self
    }

    #[must_use]
    pub fn application_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn locators(&self) -> &[String] {
        &self.locators
    }

    #[must_use]
    pub fn protocol(&self) -> i64 {
        self.protocol
    }

    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_owned(),
            endpoint: String::new(),
            locators: vec![DEFAULT_LOCATOR_ENDPOINT.to_owned()],
            protocol: DEFAULT_PROTOCOL_VERSION,
            uuid: None,
            debug: false,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
