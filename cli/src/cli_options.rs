use adapter_core::config::AdapterMode;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ServeMode {
    Score,
    PassThrough,
}

impl From<ServeMode> for AdapterMode {
    fn from(value: ServeMode) -> Self {
        match value {
            ServeMode::Score => AdapterMode::Score,
            ServeMode::PassThrough => AdapterMode::PassThrough,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Start the inference server on a given port
    Serve {
        /// Specify a host for the server
        #[arg(short = 'n', long = "host", default_value = "0.0.0.0")]
        host: String,
        /// Specify a port for the server
        #[arg(short = 'p', long = "port", default_value_t = 8080)]
        port: u16,
        /// Directory containing the xgboost-model file.
        /// Can also be set via the SM_MODEL_DIR environment variable
        #[arg(short = 'd', long = "model-dir", default_value = None)]
        model_dir: Option<String>,
        /// Override the mode from the configuration file: 'score' or 'pass-through'
        #[arg(value_enum, short = 'm', long = "mode", default_value = None)]
        mode: Option<ServeMode>,
        /// path to TLS certificate private key. You need to pass --cert as well to start server in TLS mode
        #[arg(short='k', long="key", default_value = None)]
        key: Option<String>,
        /// path to TLS certificate public key. You need to pass --key as well to start server in TLS mode
        #[arg(short='c', long="cert", default_value = None)]
        cert: Option<String>,
        /// Enable the Metrics Server
        #[arg(long = "metrics", default_value_t = false)]
        metrics_enabled: bool,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliOptions {
    /// The logging level. Case-insensitive.
    #[arg(
        value_enum,
        long = "log-level",
        ignore_case = true,
        default_value = "info"
    )]
    pub log_level: LogLevel,
    /// Path to the adapter configuration file.
    /// Can also be set via the ADAPTER_CONFIG_PATH environment variable
    #[arg(short = 'f', long = "config", default_value = None)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}
