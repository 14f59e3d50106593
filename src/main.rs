// element-wait: open a page in Chrome and wait for a CSS selector to match.
//
// Prints a JSON summary of the matched elements on stdout; logs go to stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use element_waiter::{
    BrowserSession, Config, ElementWaiter, PageTree, WaitMode, WaitRequest, load_yaml_config,
    load_yaml_config_from, validate_navigation_timeout, validate_wait_timeout,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Wait for a CSS selector to match on a web page",
    long_about = None
)]
struct Args {
    /// Page to open (http://, https:// or file://)
    #[arg(short, long)]
    url: String,

    /// CSS selector to wait for
    #[arg(short, long)]
    selector: String,

    /// Return every matching element instead of the first
    #[arg(short, long)]
    all: bool,

    /// Wait timeout in milliseconds (defaults to the configured timeout)
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// YAML config file (defaults to config.yaml in the package root)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => load_yaml_config_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => load_yaml_config().unwrap_or_else(|e| {
            warn!("Ignoring invalid config.yaml: {:#}", e);
            Config::default()
        }),
    };

    let wait_timeout = validate_wait_timeout(args.timeout_ms, &config.waiter)?;
    let navigation_timeout = validate_navigation_timeout(None, &config.waiter)?;

    let session = BrowserSession::launch(&config.browser).await?;
    let result = run(&session, &args, &config, wait_timeout, navigation_timeout).await;
    session.shutdown().await?;

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run(
    session: &BrowserSession,
    args: &Args,
    config: &Config,
    wait_timeout: Duration,
    navigation_timeout: Duration,
) -> Result<Value> {
    let page = session.open_page(&args.url, navigation_timeout).await?;
    let waiter = ElementWaiter::from_config(PageTree::new(page), &config.waiter);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, cancelling wait");
                cancel.cancel();
            }
        })
    };

    let mode = if args.all { WaitMode::All } else { WaitMode::One };
    let request = WaitRequest::new(&args.selector, mode).with_timeout(wait_timeout);
    let outcome = waiter.wait(&request, &cancel).await;
    ctrl_c.abort();
    let elements = outcome?.into_vec();

    let mut rendered = Vec::with_capacity(elements.len());
    for element in &elements {
        let outer_html = element.outer_html().await.ok().flatten();
        rendered.push(json!({ "outer_html": outer_html }));
    }

    Ok(json!({
        "url": args.url,
        "selector": args.selector,
        "mode": if args.all { "all" } else { "one" },
        "count": elements.len(),
        "elements": rendered,
    }))
}
