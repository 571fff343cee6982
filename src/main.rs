use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bulletin_relay::config::{Config, DEFAULT_TIMEOUT_SECS};
use bulletin_relay::feed::{self, FeedSource, FileSource, HttpFetcher, ReformatOptions};
use bulletin_relay::{pipeline, server};

#[derive(Parser, Debug)]
#[command(
    name = "bulletin-relay",
    about = "Serve the Google Cloud security bulletin feed with corrected entry timestamps"
)]
struct Args {
    /// Listen address (host:port). Takes precedence over PORT
    #[arg(long, global = true, env = "BULLETIN_LISTEN", value_name = "ADDR")]
    listen: Option<String>,

    /// Port to bind on all interfaces
    #[arg(long, global = true, env = "PORT")]
    port: Option<u16>,

    /// Upstream feed URL
    #[arg(long, global = true, env = "BULLETIN_UPSTREAM_URL", value_name = "URL")]
    upstream: Option<String>,

    /// Upstream request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Maximum upstream response size in bytes
    #[arg(long, global = true, default_value_t = feed::MAX_FEED_SIZE)]
    max_feed_bytes: usize,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP endpoint (default)
    Serve,
    /// Fetch once and print each entry's corrected timestamp
    Inspect {
        /// Print the full reformatted XML instead of one line per entry
        #[arg(long)]
        xml: bool,

        /// Read the feed from a local file instead of the upstream URL
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = Config::default()
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_feed_bytes(self.max_feed_bytes);

        if let Some(listen) = &self.listen {
            config = config
                .with_listen(listen)
                .with_context(|| format!("Invalid --listen value '{}'", listen))?;
        } else if let Some(port) = self.port {
            config = config.with_port(port);
        }

        if let Some(upstream) = &self.upstream {
            config = config
                .with_upstream(upstream)
                .with_context(|| format!("Invalid --upstream value '{}'", upstream))?;
        }

        Ok(config)
    }
}

fn init_tracing(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn http_source(config: &Config) -> Result<Arc<dyn FeedSource>> {
    let fetcher = HttpFetcher::new(
        config.upstream_url.clone(),
        config.request_timeout,
        config.max_feed_bytes,
    )
    .context("Failed to build HTTP client")?;
    Ok(Arc::new(fetcher))
}

async fn serve(config: Config) -> Result<()> {
    let state = server::AppState::new(http_source(&config)?);
    tracing::info!(upstream = %config.upstream_url, "Starting feed server");
    server::run(config.listen_addr, state)
        .await
        .context("HTTP server failed")
}

async fn inspect(config: Config, xml: bool, file: Option<PathBuf>) -> Result<()> {
    let source: Arc<dyn FeedSource> = match file {
        Some(path) => Arc::new(FileSource::new(path)),
        None => http_source(&config)?,
    };

    if xml {
        let out = pipeline::run(source.as_ref(), ReformatOptions::default())
            .await
            .context("Failed to reformat feed")?;
        println!("{}", out);
    } else {
        let loaded = pipeline::load(source.as_ref())
            .await
            .context("Failed to load feed")?;
        let corrected = feed::reformat(&loaded, ReformatOptions::inspection());
        print!("{}", pipeline::inspection_report(&corrected));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let config = args.config()?;
    tracing::debug!(?config, "Resolved configuration");

    match args.command {
        None | Some(Command::Serve) => serve(config).await,
        Some(Command::Inspect { xml, file }) => inspect(config, xml, file).await,
    }
}
