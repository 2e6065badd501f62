//! Continuously uploads and downloads avatars to measure the throughput of the profile server.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use argh::FromArgs;
use avatar_client::Client;
use avatar_loadgen::LoadDriver;
use avatar_loadgen::config::{Config, Overrides};
use avatar_loadgen::{observability, report};

/// Load generator for the avatar upload/download service
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of concurrent avatar uploads (default 2)
    #[argh(option, short = 'c')]
    concurrent: Option<usize>,

    /// total number of uploads, 0 for unlimited (default 1000)
    #[argh(option, short = 'n')]
    count: Option<u64>,

    /// OAuth bearer token (required)
    #[argh(option, short = 'b')]
    bearer: Option<String>,

    /// hostname of the profile server (default profile.stage.mozaws.net)
    #[argh(option, short = 'p')]
    profile: Option<String>,

    /// path to a 600x600 PNG to upload instead of the bundled image
    #[argh(option, short = 'i')]
    image: Option<PathBuf>,

    /// show detailed logs for every upload/download
    #[argh(switch, short = 'v')]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.profile.clone(),
            bearer: self.bearer.clone(),
            concurrency: self.concurrent,
            count: self.count,
            image: self.image.clone(),
            verbose: self.verbose,
        }
    }
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::initialize_tracing(&config);
    tracing::debug!(?config);
    config.validate()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let client = build_client(&config).await?;
    let driver = LoadDriver::new(client, config.driver_options());

    let shutdown = driver.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down ...");
            shutdown.cancel();
        }
    });

    tracing::info!(
        concurrent = config.concurrency,
        count = config.count,
        profile = %config.host,
        "Starting"
    );

    let start = Instant::now();
    let state = driver.run().await;
    report::print_summary(&state, start.elapsed());

    Ok(())
}

async fn build_client(config: &Config) -> Result<Client> {
    let bearer = config.bearer().unwrap_or_default();
    let mut builder = Client::builder(config.host.as_str(), bearer).scheme(config.scheme.as_str());

    if let Some(path) = &config.image {
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {}", path.display()))?;
        builder = builder.image(image);
    }
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    builder.build().context("failed to create avatar client")
}
