use std::env;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    filter::Targets, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/**
 * Sets `RUST_BACKTRACE=1` as default so we always get a stacktrace
 * on an error.
 */
pub(crate) fn set_full_stacktrace_as_default() {
    let key = "RUST_BACKTRACE";
    if env::var(key).is_ok() {
        return;
    }
    env::set_var(key, "1");
}

fn targets(verbose: bool) -> Targets {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    Targets::new()
        .with_target("catdns", level)
        .with_target("reqwest", Level::WARN)
        .with_target("hyper", Level::WARN)
}

/// Changes the log level after the subscriber is installed.
pub(crate) struct LoggingHandle {
    reload: Option<reload::Handle<Targets, Registry>>,
}

impl LoggingHandle {
    pub(crate) fn set_verbose(&self, verbose: bool) {
        let Some(handle) = &self.reload else {
            tracing::warn!("RUST_LOG= is set. Ignore verbose setting.");
            return;
        };
        match handle.reload(targets(verbose)) {
            Ok(()) if verbose => tracing::info!("Verbose mode enabled."),
            Ok(()) => {}
            Err(e) => tracing::warn!("Failed to change the log level. {e}"),
        }
    }
}

fn reloadable_subscriber(verbose: bool) -> (impl Subscriber + Send + Sync + 'static, LoggingHandle) {
    let (filter, handle) = reload::Layer::new(targets(verbose));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    (subscriber, LoggingHandle { reload: Some(handle) })
}

/**
 * Installs the global subscriber. Call it before loading the configuration
 * so config warnings are printed. The returned handle applies a verbose
 * setting that is only known later.
 */
pub(crate) fn enable_logging(verbose: bool) -> LoggingHandle {
    let value = env::var("RUST_LOG").unwrap_or_default();

    if !value.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
        tracing::info!("Used RUST_LOG={} env variable to set logging output.", value);
        if verbose {
            tracing::warn!("RUST_LOG= is set. Ignore --verbose flag.")
        }
        return LoggingHandle { reload: None };
    }

    let (subscriber, handle) = reloadable_subscriber(verbose);
    subscriber.init();

    if verbose {
        tracing::info!("Verbose mode enabled.");
    }
    handle
}

/// Resolves once Ctrl-C is pressed.
pub(crate) async fn wait_on_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C. {e}");
    }
}
