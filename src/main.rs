//! submerge - CLI entry point

use clap::{Parser, Subcommand};
use submerge::speed::{SpeedTest, DEFAULT_CONFIG_URL};
use submerge::{Error, Settings};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "submerge")]
#[command(about = "Merge mihomo subscriptions and filter proxies by measured delay")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge all configured subscriptions into the template(s)
    Generate,

    /// Probe every proxy of a merged configuration and emit the
    /// latency-filtered top-50/top-100 documents
    Speedtest {
        /// Configuration URL; falls back to the project default
        config_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("submerge=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Generate => match Settings::from_env() {
            Ok(settings) => submerge::generate(&settings).await,
            Err(e) => Err(e),
        },
        Command::Speedtest { config_url } => {
            let url = config_url.as_deref().unwrap_or(DEFAULT_CONFIG_URL);
            let work_dir = std::env::var(submerge::config::ENV_WORK_DIR)
                .unwrap_or_else(|_| ".".to_string());
            run_speedtest(&work_dir, url).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn run_speedtest(work_dir: &str, config_url: &str) -> Result<(), Error> {
    SpeedTest::new(work_dir)?.run(config_url).await
}
