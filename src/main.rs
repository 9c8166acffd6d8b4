use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod asset;
mod autoloader;
mod bootstrap;
mod config;
mod document;
mod engine;
mod features;
mod http;
mod injector;
mod provider;
mod render;
#[cfg(test)]
mod test_support;

use autoloader::{builtin_handles, resolver_for, Autoloader};
use config::AutoLoaderOptions;
use document::Document;
use injector::DocumentInjector;
use provider::{HttpProbe, OfflineProbe, Probe};

/// Render every `.markmap` block of an HTML page into an inline mind map
#[derive(Parser)]
#[command(name = "markmap-autoload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTML page to process
    input: PathBuf,

    /// Write the rendered page here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON options file (defaults to the page's inline options block)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the automatic scan; blocks are rendered by an explicit pass instead
    #[arg(long)]
    manual: bool,

    /// Attach a toolbar to every diagram
    #[arg(long)]
    toolbar: bool,

    /// Per-mirror probe timeout in milliseconds
    #[arg(long, env = "MARKMAP_PROVIDER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Do not touch the network: skip probing and inject assets without fetching them
    #[arg(long)]
    offline: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(cli).await
}

fn load_options(cli: &Cli, document: &Document) -> Result<AutoLoaderOptions> {
    let mut options = match &cli.config {
        Some(path) => AutoLoaderOptions::from_file(path)?,
        None => AutoLoaderOptions::from_document(document)?.unwrap_or_default(),
    };
    if cli.manual {
        options.manual = true;
    }
    if cli.toolbar {
        options.toolbar = true;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        options.provider_timeout_ms = timeout_ms;
    }
    Ok(options)
}

async fn run(cli: Cli) -> Result<()> {
    let html = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let document = Document::parse(html);
    let options = load_options(&cli, &document)?;

    let (probe, client): (Arc<dyn Probe>, Option<Client>) = if cli.offline {
        info!("Offline mode, assets are injected without being fetched");
        (Arc::new(OfflineProbe), None)
    } else {
        let client = http::build_client()?;
        (Arc::new(HttpProbe::new(client.clone())), Some(client))
    };

    let resolver = Arc::new(resolver_for(&options, probe));
    let injector = Arc::new(DocumentInjector::new(Arc::clone(&document), client));
    let handles = builtin_handles(&resolver);
    let loader = Autoloader::new(options, Arc::clone(&document), resolver, injector, handles);

    let units = match loader.auto_start() {
        Some(scan) => scan.await.context("Render task panicked")??,
        None => loader.render_all().await?,
    };

    let failed = units.iter().filter(|unit| unit.last_error().is_some()).count();
    if failed > 0 {
        warn!("{} of {} markmap blocks could not be rendered", failed, units.len());
    }
    info!(
        "Rendered {} markmap blocks via {}",
        units.len() - failed,
        loader.resolver().provider().unwrap_or("no provider")
    );

    let rendered = document.to_html();
    match &cli.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", rendered),
    }

    Ok(())
}
