use crate::cli_options::{CliCommand, CliOptions};
use adapter_core::adapter::{InferenceAdapter, load_model};
use adapter_core::config::{AdapterConfig, DEFAULT_MODEL_DIR};
use adapter_core::model::FeatureList;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli_options;

const ADAPTER_CONFIG_PATH_ENV_VAR: &str = "ADAPTER_CONFIG_PATH";
const MODEL_DIR_ENV_VAR: &str = "SM_MODEL_DIR";
const DEFAULT_CONFIG_FILE_NAME: &str = "adapter.yaml";
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("Received Ctrl+C, shutting down...");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_opts = CliOptions::parse();
    let CliOptions {
        log_level,
        config,
        command,
    } = cli_opts;

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::from(log_level).into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = PathBuf::from(
        config
            .or(std::env::var(ADAPTER_CONFIG_PATH_ENV_VAR).ok())
            .unwrap_or(DEFAULT_CONFIG_FILE_NAME.to_string()),
    );
    let yaml_str = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    let adapter_config = AdapterConfig::from_yaml_str(&yaml_str)?;
    let config_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let config_dir_str = config_dir
        .to_str()
        .ok_or_else(|| anyhow!("Config directory path contains invalid UTF-8"))?;

    match command {
        CliCommand::Serve {
            host,
            port,
            model_dir,
            mode,
            key,
            cert,
            metrics_enabled,
        } => {
            if key.is_some() && cert.is_none() || key.is_none() && cert.is_some() {
                return Err(anyhow!(
                    "Both --key and --cert must be provided to enable TLS"
                ));
            }
            let mode = mode.map(Into::into).unwrap_or(adapter_config.mode);
            let model_dir = model_dir
                .or(std::env::var(MODEL_DIR_ENV_VAR).ok())
                .or(adapter_config.model_dir.clone())
                .unwrap_or(DEFAULT_MODEL_DIR.to_string());

            let feature_list = FeatureList::from_env()?;
            tracing::info!("Serving {} features in {:?} mode", feature_list.len(), mode);
            let lookup = adapter_core::lookup::get_feature_lookup(
                &adapter_config.feature_lookup,
                Some(config_dir_str),
            )
            .await?;
            let model = load_model(mode, Path::new(&model_dir))?;
            let adapter = InferenceAdapter::new(mode, feature_list, lookup, model);

            tracing::info!("Start serving on {}:{}", host, port);
            let tls_enabled = key.is_some() && cert.is_some();
            let server_config = rest_server::server::ServerConfig {
                host,
                port,
                tls_enabled,
                tls_cert_path: cert,
                tls_key_path: key,
            };
            rest_server::server::serve_until(
                server_config,
                adapter,
                metrics_enabled,
                SHUTDOWN_GRACE_PERIOD,
                shutdown_signal(),
            )
            .await?;
        }
    }
    Ok(())
}
