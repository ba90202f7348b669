//! `spcms`: renders pages of a sandbox publisher site.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use sandbox_publisher::Publisher;
use spcms_cache::OutputBuffer;
use spcms_core::AppResult;
use spcms_core::config::AppConfig;
use spcms_plugin::{PluginLoader, RuntimeEnv};

/// Sandbox publisher command line.
#[derive(Parser)]
#[command(name = "spcms", version, about = "Render sandbox publisher pages")]
struct Cli {
    /// Directory holding default.toml and the environment overlays
    #[arg(long, global = true, default_value = "config")]
    config: PathBuf,

    /// Environment overlay to merge (`<config>/<env>.toml`)
    #[arg(long, global = true, default_value = "development")]
    env: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page through the configured template to stdout
    Render {
        /// Page file, relative to the base directory
        page: PathBuf,
    },
    /// List the built-in plugins and the manifests found for them
    Plugins,
}

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config, &cli.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = execute(cli.command, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging. Stdout carries the page, so logs go to stderr.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(io::stderr)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(io::stderr)
                .init();
        }
    }
}

fn execute(command: Commands, config: AppConfig) -> AppResult<()> {
    match command {
        Commands::Render { page } => render(config, page),
        Commands::Plugins => list_plugins(&config),
    }
}

fn render(config: AppConfig, page: PathBuf) -> AppResult<()> {
    tracing::info!("Starting spcms v{}", env!("CARGO_PKG_VERSION"));
    let publisher = Publisher::new(config)?;

    let mut out = OutputBuffer::new(io::stdout().lock());
    let outcome = publisher.write_page(&page, &mut out)?;
    out.flush()?;

    tracing::debug!(page = %page.display(), ?outcome, "Page written");
    Ok(())
}

fn list_plugins(config: &AppConfig) -> AppResult<()> {
    let loader = PluginLoader::new(&config.base_dir, Arc::new(RuntimeEnv::default()));
    spcms_plugins::register_builtin(&loader);
    for root in &config.plugins.search_roots {
        loader.add_search_root(root, config.plugins.recursive);
    }

    let mut stdout = io::stdout().lock();
    for name in loader.factory_names() {
        let manifest = loader
            .need(&name)
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(stdout, "{:<16} {}", name, manifest)?;
    }
    Ok(())
}

