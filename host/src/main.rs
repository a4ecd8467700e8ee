use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use zeroui_plugin_host::{logging, HostConfig, Orchestrator};

#[derive(Parser)]
#[command(name = "zeroui-plugin-host")]
#[command(about = "ZeroUI plugin host - runs and supervises configuration plugins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults plus ZEROUI__* overrides when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every plugin and supervise it until Ctrl-C
    Run,
    /// List the plugins found in the plugin directory
    Discover,
    /// Load one plugin and report its info and health
    Check {
        /// Plugin name (the part after the binary prefix)
        name: String,
    },
    /// Validate configuration
    Validate,
    /// Print the default configuration as TOML
    PrintConfig,
    /// Show version information
    Version,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HostConfig> {
    match path {
        Some(path) => HostConfig::load(path),
        None => {
            let config = HostConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.as_ref() {
        Some(Commands::Version) => {
            println!("zeroui-plugin-host {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::PrintConfig) => {
            print!("{}", HostConfig::default_config().to_toml()?);
            return Ok(());
        }
        Some(Commands::Validate) => {
            let cfg = load_config(cli.config.as_deref())?;
            match &cli.config {
                Some(path) => println!("Configuration valid: {:?}", path),
                None => println!("Default configuration valid"),
            }
            println!("{:#?}", cfg);
            return Ok(());
        }
        _ => {}
    }

    let cfg = load_config(cli.config.as_deref())?;
    let log_levels = logging::init(&cfg.logging, cli.debug)?;
    if let Some(path) = &cli.config {
        info!("Configuration loaded from {:?}", path);
    }

    match cli.command {
        Some(Commands::Discover) => {
            let orchestrator = Orchestrator::new(cfg);
            for name in orchestrator.registry().discover_plugins().await? {
                println!("{}", name);
            }
        }
        Some(Commands::Check { name }) => {
            let orchestrator = Orchestrator::new(cfg);
            let registry = orchestrator.registry();

            let info = registry.load_plugin(&name).await?;
            print_json(&info)?;

            let healthy = registry.health_check(&name).await.is_ok();
            println!("healthy: {}", healthy);
            if let Some(lifecycle) = orchestrator.manager().lifecycle(&name) {
                print_json(&lifecycle.info())?;
            }
            print_json(&registry.get_stats().await)?;

            orchestrator.shutdown().await?;
        }
        _ => {
            info!("Starting ZeroUI plugin host v{}", env!("CARGO_PKG_VERSION"));
            let orchestrator = Orchestrator::new(cfg).with_log_levels(log_levels);
            orchestrator.run().await?;
        }
    }

    Ok(())
}
