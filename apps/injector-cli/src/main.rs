use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use async_injector::Injector;
use injector_bootstrap::{config_module, init_logging, AppConfig, CliArgs};

use std::path::{Path, PathBuf};

mod demo_modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Injector CLI - resolve services from a configured module graph
#[derive(Parser)]
#[command(name = "injector-cli")]
#[command(about = "Resolve services from a configured async-injector module graph")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the module graph and resolve one service
    Resolve {
        /// Service name, dotted names walk into resolved values
        name: String,
        /// Resolve unknown names to null instead of failing
        #[arg(long)]
        lenient: bool,
    },
    /// Build and initialize the module graph, then list registered services
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliArgs {
        verbose: cli.verbose,
    });

    let logging_config = config.logging.clone().unwrap_or_default();
    init_logging(&logging_config, &base_dir(cli.config.as_deref()));

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let injector = build_injector(&config)?;
    injector
        .initialize()
        .await
        .context("Module initialization failed")?;

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Resolve { name, lenient } => {
            let service = injector
                .get_with(&name, !lenient)
                .await
                .with_context(|| format!("Cannot resolve '{name}'"))?;
            println!("{name} = {}", demo_modules::describe(&service));
        }
        Commands::Check => {
            println!("Modules: {}", injector.load_order().join(" -> "));
            for name in injector.registry().names() {
                let entry = injector.registry().get(name);
                let kind = entry.map(|e| e.kind.to_string()).unwrap_or_default();
                println!("  {name:<24} {kind}");
            }
            println!("Configuration is valid");
        }
    }
    Ok(())
}

/// Log files are resolved next to the config file, or the working directory.
fn base_dir(config: Option<&Path>) -> PathBuf {
    config
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn build_injector(config: &AppConfig) -> Result<Injector> {
    tracing::info!("Building module graph");
    let injector = Injector::builder()
        .module(config_module(config))
        .module(demo_modules::app_module())
        .config(config.injector.clone())
        .build()?;
    tracing::debug!(?injector, "Injector ready");
    Ok(injector)
}
