use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ClientConfig, ConfigError, DEFAULT_ENDPOINT};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-pail",
    about = "Hand a resource link to the packaging worker and follow it until the archive is ready",
    author,
    version
)]
pub struct Cli {
    #[arg(value_name = "URL", help = "Resource link to package")]
    pub url: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[arg(
        long,
        help = "Print the final session snapshot as JSON instead of streaming log lines"
    )]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(
        long,
        env = "BEACH_PAIL_ENDPOINT",
        default_value = DEFAULT_ENDPOINT,
        help = "Websocket endpoint of the packaging worker"
    )]
    pub endpoint: String,

    #[arg(
        long = "connect-timeout-secs",
        env = "BEACH_PAIL_CONNECT_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        help = "Give up if the worker connection is not open after this long"
    )]
    pub connect_timeout_secs: u64,

    #[arg(
        long = "response-timeout-secs",
        env = "BEACH_PAIL_RESPONSE_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 30,
        help = "Give up if the worker sends nothing this long after the request"
    )]
    pub response_timeout_secs: u64,
}

impl TryFrom<&ConnectionArgs> for ClientConfig {
    type Error = ConfigError;

    fn try_from(args: &ConnectionArgs) -> Result<Self, Self::Error> {
        let config = ClientConfig::new(&args.endpoint)?
            .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs))
            .with_response_timeout(Duration::from_secs(args.response_timeout_secs));
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BEACH_PAIL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BEACH_PAIL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
