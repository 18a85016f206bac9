use anyhow::Context;
use clap::Parser;
use helpers::{enable_logging, set_full_stacktrace_as_default, wait_on_ctrl_c};
use metrics_server::run_metrics_server;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use crate::{
    app_context::AppContext,
    resolution::{
        CategoryClient, DnsSocket, EnrichmentProxy, ObserverChain, PrometheusObserver, ProxyObserver, ResponseCache,
        TracingObserver, UdpExchanger,
    },
};

mod app_context;
mod config;
mod helpers;
mod metrics_server;
mod resolution;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "catdns - A caching DNS proxy that tags forwarded queries with the client subnet and its content categories."
)]
struct Cli {
    /// Upstream DNS resolver. Format: IP:Port. [default: 1.0.0.1:53]
    #[arg(short, long)]
    forward: Option<SocketAddr>,

    /// Show verbose output. [default: false]
    #[arg(short, long)]
    verbose: bool,

    /// Optional TOML configuration file. Created with commented out defaults if missing.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    set_full_stacktrace_as_default();
    let cli = Cli::parse();
    let logging = enable_logging(cli.verbose);

    let mut app_context = AppContext::load(cli.config.as_deref())?;
    app_context.apply_cli(cli.forward, cli.verbose);
    let config = &app_context.config;
    if config.general.verbose && !cli.verbose {
        logging.set_verbose(true);
    }
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    tracing::info!("Starting catdns v{VERSION}");
    tracing::debug!("Configuration:\n{:?}", config);
    tracing::info!("Forward queries to {}", config.upstream.forward);
    tracing::info!("Category service at {}", config.categories.url);

    // Exit the main thread if anything panics
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Thread paniced. Stop main thread too.");
        orig_hook(panic_info);
        std::process::exit(1);
    }));

    let cache = ResponseCache::new(config.cache.size, config.cache.default_ttl).context("Failed to create the cache")?;
    let categories = CategoryClient::new(&config.categories.url, config.categories.timeout())
        .context("Failed to create the category client")?;
    let upstream = UdpExchanger::new(
        config.upstream.forward,
        config.upstream.read_timeout(),
        config.upstream.write_timeout(),
    );

    let metrics = Arc::new(PrometheusObserver::new().context("Failed to register the metrics")?);
    let observers: Vec<Arc<dyn ProxyObserver>> = vec![Arc::new(TracingObserver), metrics.clone()];
    let proxy =
        EnrichmentProxy::new(cache, categories, upstream).with_observer(Arc::new(ObserverChain::new(observers)));

    let dns_socket = DnsSocket::new(config.general.socket, proxy)
        .await
        .with_context(|| format!("Failed to bind {}", config.general.socket))?;
    let stop = dns_socket.start_receive_loop();

    if config.metrics.enabled {
        let addr = run_metrics_server(config.metrics.socket, metrics.clone())
            .await
            .with_context(|| format!("Failed to bind {}", config.metrics.socket))?;
        tracing::info!("Serving metrics on http://{addr}/metrics");
    }

    tracing::info!("Listening on {}. Waiting for Ctrl-C...", dns_socket.local_addr()?);

    wait_on_ctrl_c().await;
    println!();
    tracing::info!("Got it! Exiting...");
    let _ = stop.send(());

    let stats = metrics.snapshot();
    tracing::info!(
        requests = stats.requests,
        cache_hits = stats.cache_hits,
        cache_misses = stats.cache_misses,
        successes = stats.successes,
        failures = stats.failures,
        category_errors = stats.category_errors,
        upstream_errors = stats.upstream_errors,
        extensions_added = stats.extensions_added,
        "Request statistics."
    );

    Ok(())
}
