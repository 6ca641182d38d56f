//! deal-importer command line
//!
//! `daemon` runs the importer; `stats` asks a running daemon for its ledger
//! totals.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use deal_importer::utils::bytes_to_readable;
use deal_importer::{Config, Daemon, DealStats, Mode, run_with_shutdown};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line interface
#[derive(Parser, Debug)]
#[command(name = "deal-importer")]
#[command(about = "Import offline storage deals into Boost")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the importer daemon
    Daemon(DaemonArgs),
    /// Print ledger statistics from a running daemon
    Stats {
        /// Status API of the daemon
        #[arg(short, long, default_value = "http://127.0.0.1:1313")]
        url: String,
    },
}

#[derive(clap::Args, Debug)]
struct DaemonArgs {
    /// Boost address, without port
    #[arg(long, default_value = "http://localhost", env = "BOOST_URL")]
    boost_url: String,

    /// Boost API token
    #[arg(long, env = "BOOST_AUTH_TOKEN")]
    boost_auth_token: String,

    /// Boost GraphQL port
    #[arg(long, default_value = "8080", env = "BOOST_GQL_PORT")]
    boost_gql_port: u16,

    /// Boost JSON-RPC port
    #[arg(long, default_value = "1288", env = "BOOST_PORT")]
    boost_port: u16,

    /// Port for the status API
    #[arg(long, default_value = "1313", env = "DI_PORT")]
    port: u16,

    /// Skip imports while this many deals are sealing (0 = unlimited)
    #[arg(long, default_value = "0", env = "MAX_CONCURRENT")]
    max_concurrent: usize,

    /// Seconds between import ticks
    #[arg(long, env = "INTERVAL")]
    interval: u64,

    /// Operating mode: default, pull-dataset or pull-cid
    #[arg(long, default_value = "default", env = "MODE")]
    mode: String,

    /// Dataset broker API (pull modes only)
    #[arg(long, env = "DDM_API")]
    ddm_api: Option<String>,

    /// Dataset broker token (pull modes only)
    #[arg(long, env = "DDM_TOKEN")]
    ddm_token: Option<String>,

    /// Epochs to delay requested deal starts by
    #[arg(long, default_value = "0", env = "DDM_DELAY_START")]
    ddm_delay_start: u64,

    /// Epochs to advance requested deal ends by
    #[arg(long, default_value = "0", env = "DDM_ADVANCE_END")]
    ddm_advance_end: u64,

    /// Copy CAR files here before importing them
    #[arg(long, env = "STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Have Boost delete the imported file afterwards
    #[arg(long, env = "DELETE_AFTER_IMPORT")]
    delete_after_import: bool,

    /// Also append logs to this file
    #[arg(long, env = "LOG")]
    log: Option<PathBuf>,

    /// Data directory for the ledger and datasets.json
    #[arg(long, default_value = "~/.delta/importer", env = "DELTA_DIR")]
    dir: PathBuf,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    debug: bool,
}

impl DaemonArgs {
    fn to_config(&self) -> Result<Config> {
        let mut config = Config::default();

        config.mode = self.mode.parse::<Mode>()?;

        config.import.interval = Duration::from_secs(self.interval);
        config.import.max_concurrent = self.max_concurrent;
        config.import.staging_dir = self.staging_dir.clone();
        config.import.delete_after_import = self.delete_after_import;

        config.deal_service.url = self.boost_url.clone();
        config.deal_service.auth_token = self.boost_auth_token.clone();
        config.deal_service.graphql_port = self.boost_gql_port;
        config.deal_service.rpc_port = self.boost_port;

        config.broker.url = self.ddm_api.clone();
        config.broker.token = self.ddm_token.clone();
        config.broker.delay_start_epoch = self.ddm_delay_start;
        config.broker.advance_end_epoch = self.ddm_advance_end;

        config.persistence.data_dir = self.dir.clone();
        config.api.bind_address.set_port(self.port);

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let default_filter = if debug {
        "deal_importer=debug,tower_http=debug"
    } else {
        "deal_importer=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

async fn run_daemon(args: DaemonArgs) -> Result<()> {
    init_tracing(args.debug, args.log.as_ref())?;

    let config = args.to_config().context("Invalid configuration")?;
    let daemon = Daemon::new(config)
        .await
        .context("Failed to initialize the daemon")?;

    run_with_shutdown(daemon).await?;
    Ok(())
}

async fn print_stats(url: &str) -> Result<()> {
    let base = url.trim_end_matches('/');
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let health = client
        .get(format!("{base}/api/v1/health"))
        .send()
        .await
        .with_context(|| format!("Could not reach deal-importer at {base}"))?;
    if !health.status().is_success() {
        bail!("deal-importer at {base} is not healthy: {}", health.status());
    }

    let response = client.get(format!("{base}/api/v1/stats")).send().await?;
    if !response.status().is_success() {
        bail!("stats request failed: {}", response.status());
    }
    let stats: DealStats = response.json().await.context("Failed to parse stats")?;

    print!("{}", render_stats(&stats));
    Ok(())
}

fn render_stats(stats: &DealStats) -> String {
    let mut out = String::new();
    let row = |out: &mut String, state: &str, count: u64, bytes: u64| {
        out.push_str(&format!(
            "{:<8} {:>10} {:>12}\n",
            state,
            count,
            bytes_to_readable(bytes)
        ));
    };

    out.push_str(&format!("{:<8} {:>10} {:>12}\n", "STATE", "COUNT", "BYTES"));
    row(&mut out, "Success", stats.success.count, stats.success.bytes);
    row(&mut out, "Failure", stats.failure.count, stats.failure.bytes);
    row(&mut out, "Pending", stats.pending.count, stats.pending.bytes);
    out.push_str(&format!("{}\n", "-".repeat(32)));
    row(&mut out, "Total", stats.total.count, stats.total.bytes);

    let last = stats
        .last_import
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    out.push_str(&format!("Last Import Time: {last}\n"));
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Daemon(args) => run_daemon(args).await,
        Command::Stats { url } => print_stats(&url).await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use deal_importer::StatusTotals;

    fn daemon_args(extra: &[&str]) -> DaemonArgs {
        let mut argv = vec![
            "deal-importer",
            "daemon",
            "--boost-auth-token",
            "tok",
            "--interval",
            "30",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Daemon(args) => args,
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn daemon_flags_build_a_config() {
        let args = daemon_args(&[
            "--port",
            "1414",
            "--max-concurrent",
            "5",
            "--boost-gql-port",
            "9090",
            "--staging-dir",
            "/tmp/staging",
        ]);

        let config = args.to_config().unwrap();

        assert_eq!(config.mode, Mode::Default);
        assert_eq!(config.import.interval, Duration::from_secs(30));
        assert_eq!(config.import.max_concurrent, 5);
        assert_eq!(config.api.bind_address.port(), 1414);
        assert_eq!(config.deal_service.graphql_port, 9090);
        assert_eq!(config.deal_service.rpc_port, 1288);
        assert_eq!(
            config.import.staging_dir,
            Some(PathBuf::from("/tmp/staging"))
        );
    }

    #[test]
    fn pull_mode_needs_broker_flags() {
        let args = daemon_args(&["--mode", "pull-dataset"]);
        assert!(args.to_config().is_err());

        let args = daemon_args(&[
            "--mode",
            "pull-dataset",
            "--ddm-api",
            "http://ddm",
            "--ddm-token",
            "secret",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.mode, Mode::PullDataset);
        assert_eq!(config.broker.url.as_deref(), Some("http://ddm"));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let args = daemon_args(&["--mode", "push"]);
        assert!(args.to_config().is_err());
    }

    #[test]
    fn stats_table_lists_every_state() {
        let stats = DealStats {
            total: StatusTotals {
                count: 3,
                bytes: 3072,
            },
            success: StatusTotals {
                count: 1,
                bytes: 1024,
            },
            ..Default::default()
        };

        let table = render_stats(&stats);

        assert!(table.contains("Success"));
        assert!(table.contains("Failure"));
        assert!(table.contains("Pending"));
        assert!(table.contains("Total"));
        assert!(table.contains("Last Import Time: never"));
    }
}
