use anyhow::{Context, Result};
use clap::Parser;
use kernel_config::{ConfigLoader, ConnectionConfig, KernelConfig, LogLevel};
use kernel_execution::{PlainTextRenderer, ShellEngine, ShellEngineConfig};
use kernel_protocol::content::KernelInfoRequest;
use kernel_protocol::{ChannelType, MessageContent};
use kernel_server::{Kernel, KernelClient, KernelExit};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
use cli::{Cli, Commands, ConfigCommands};

/// YAML file (if any), then the connection file, then `KERNEL_*` overrides
fn load_config(
    config_path: Option<&PathBuf>,
    connection_file: Option<&PathBuf>,
) -> Result<KernelConfig> {
    let loader = ConfigLoader::new();
    if let Some(path) = config_path {
        info!("Loading configuration from: {:?}", path);
    }
    loader
        .load(config_path, connection_file)
        .context("Failed to load configuration")
}

fn init_logging(config: &mut KernelConfig, log_level: Option<&String>) -> Result<()> {
    if let Some(level) = log_level {
        config.logging.level = level.parse::<LogLevel>().map_err(|e| anyhow::anyhow!(e))?;
    }
    kernel_logging::init_logging_from_config(&config.logging)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                token.cancel();
            }
            Err(e) => warn!("Failed to install Ctrl-C handler: {}", e),
        }
    });
}

async fn run_command(
    mut config: KernelConfig,
    shell: &str,
    working_dir: Option<&PathBuf>,
    embedded: bool,
) -> Result<()> {
    config.session.embedded |= embedded;

    let engine = ShellEngine::new(ShellEngineConfig {
        shell: shell.to_string(),
        working_dir: working_dir.cloned(),
        ..ShellEngineConfig::default()
    });
    let kernel = Kernel::new(config, Arc::new(engine), Arc::new(PlainTextRenderer));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match kernel.run(&cancel).await.context("Kernel failed")? {
        KernelExit::Shutdown { restart } => info!(restart, "Kernel shut down by client"),
        KernelExit::Cancelled => info!("Kernel stopped"),
    }
    Ok(())
}

async fn probe_command(config: &KernelConfig, timeout: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let client = KernelClient::connect(&config.connection, &config.runtime, &cancel)
        .await
        .context("Failed to connect to the kernel")?;

    tokio::time::timeout(timeout, client.ping(b"ping"))
        .await
        .context("Timed out waiting for heartbeat")??;
    println!("heartbeat: ok");

    let reply = tokio::time::timeout(
        timeout,
        client.request(
            ChannelType::Shell,
            MessageContent::KernelInfoRequest(KernelInfoRequest {}),
        ),
    )
    .await
    .context("Timed out waiting for kernel_info_reply")??;

    let content = reply.content.to_value()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&content).context("Failed to format reply as JSON")?
    );

    if let Err(e) = client.close().await {
        warn!("Failed to close client sockets: {}", e);
    }
    Ok(())
}

fn connection_file_command(output: &Path, ip: &str, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    let connection = ConnectionConfig::with_free_ports(ip).context("Failed to choose free ports")?;
    connection
        .write_connection_file(output)
        .context(format!("Failed to write connection file {:?}", output))?;
    println!("{}", output.display());
    Ok(())
}

fn config_show_command(config: &KernelConfig, format: &str) -> Result<()> {
    match format.to_lowercase().as_str() {
        "yaml" | "yml" => println!("{}", config.to_yaml()?),
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(config).context("Failed to serialize to JSON")?
        ),
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            connection_file,
            shell,
            working_dir,
            embedded,
        } => {
            let mut config = load_config(cli.config.as_ref(), Some(connection_file))?;
            init_logging(&mut config, cli.log_level.as_ref())?;
            info!("Kernel CLI starting");
            run_command(config, shell, working_dir.as_ref(), *embedded).await
        }
        Commands::Probe {
            connection_file,
            timeout,
        } => {
            let mut config = load_config(cli.config.as_ref(), Some(connection_file))?;
            init_logging(&mut config, cli.log_level.as_ref())?;
            probe_command(&config, Duration::from_secs(*timeout)).await
        }
        Commands::ConnectionFile { output, ip, force } => {
            kernel_logging::init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
            connection_file_command(output, ip, *force)
        }
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Show {
                connection_file,
                format,
            } => {
                kernel_logging::init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
                let config = load_config(cli.config.as_ref(), Some(connection_file))?;
                config_show_command(&config, format)
            }
        },
    }
}
