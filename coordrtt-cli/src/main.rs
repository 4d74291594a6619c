//! coordrtt - cluster RTT snapshots from network coordinates

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordrtt_cli::config::ConfigManager;
use coordrtt_cli::matrix::{self, RttMatrix};
use coordrtt_cli::range::{self, FalsePositiveCounts, RangeQuery};
use coordrtt_cli::{server, status};
use coordrtt_core::{ClusterStatus, RttMode};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

const TOP_DIFFERENCES: usize = 20;

/// Publishes estimated or measured RTTs between cluster members
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file merged over the built-in defaults
    #[arg(short, long, env = "COORDRTT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the refresh loop and serve snapshots over HTTP
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,

        /// Refresh interval in seconds
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,

        /// estimated or measured
        #[arg(long)]
        mode: Option<RttMode>,
    },

    /// Build one snapshot and print it as JSON
    Once {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Show the snapshot held by a running server
    Status {
        /// Base URL of the server
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Print the raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write the predicted RTT matrix of a snapshot as CSV
    Matrix {
        /// Snapshot JSON file or cluster-status URL
        #[arg(short, long)]
        input: String,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Prefix removed from node names, e.g. clab-nebula-
        #[arg(long)]
        strip_prefix: Option<String>,
    },

    /// Compare a ground-truth matrix with a predicted one
    Diff {
        /// Ground-truth matrix CSV
        #[arg(long)]
        truth: PathBuf,

        /// Predicted matrix CSV
        #[arg(long)]
        predicted: PathBuf,

        /// Output CSV of differences
        #[arg(short, long)]
        output: PathBuf,

        /// Ignore differences below this many milliseconds
        #[arg(long, default_value = "1.0")]
        threshold: f64,
    },

    /// Find nodes within an RTT of a query node and score the result
    Range {
        /// Snapshot JSON file or cluster-status URL
        #[arg(short, long)]
        input: String,

        /// Query node name
        #[arg(long)]
        node: String,

        /// Threshold in milliseconds
        #[arg(long, value_name = "MS")]
        rtt: f64,

        /// Coordinate vectors are already in milliseconds
        #[arg(long)]
        vec_already_ms: bool,

        /// JSON file accumulating how often each node was a false positive
        #[arg(long)]
        fp_counts: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

async fn load_snapshot(input: &str) -> Result<ClusterStatus> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return status::fetch_status(input).await;
    }
    let text = std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))?;
    serde_json::from_str(&text).with_context(|| format!("invalid cluster status in {input}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            bind,
            interval,
            mode,
        } => {
            let mut config = ConfigManager::load_from(cli.config)?.into_config();
            config.apply_overrides(bind, interval.map(Duration::from_secs), mode);
            config.validate()?;
            server::run_server(&config).await?;
        }

        Commands::Once { pretty } => {
            let config = ConfigManager::load_from(cli.config)?.into_config();
            let snapshot = server::build_once(&config.service).await?;
            if pretty {
                println!("{}", serde_json::to_string_pretty(snapshot.status())?);
            } else {
                println!("{}", String::from_utf8_lossy(&snapshot.body()));
            }
        }

        Commands::Status { url, json } => {
            let snapshot = status::fetch_status(&status::cluster_status_url(&url)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", status::render_table(&snapshot));
            }
        }

        Commands::Matrix {
            input,
            output,
            strip_prefix,
        } => {
            let snapshot = load_snapshot(&input).await?;
            let predicted = RttMatrix::from_status(&snapshot, strip_prefix.as_deref());
            predicted.write(&output)?;
            info!(nodes = predicted.nodes().len(), "wrote RTT matrix");
            println!("RTT matrix written to: {}", output.display());
        }

        Commands::Diff {
            truth,
            predicted,
            output,
            threshold,
        } => {
            let truth = RttMatrix::read(&truth)?;
            let predicted = RttMatrix::read(&predicted)?;
            let diffs = matrix::diff_matrices(&truth, &predicted, threshold);
            matrix::write_file(&output, &matrix::differences_csv(&diffs))?;
            println!("Wrote: {}", output.display());
            println!();
            print!(
                "{}",
                matrix::render_differences(&diffs, TOP_DIFFERENCES, threshold)
            );
        }

        Commands::Range {
            input,
            node,
            rtt,
            vec_already_ms,
            fp_counts,
            json,
        } => {
            let snapshot = load_snapshot(&input).await?;
            let mut query = RangeQuery::new(node, rtt);
            if vec_already_ms {
                query.vec_scale = 1.0;
            }
            let report = range::run_range_query(&snapshot, &query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            if let Some(path) = fp_counts {
                let mut counts = FalsePositiveCounts::load(&path);
                counts.record(&report);
                counts.save(&path)?;
                info!(path = %path.display(), "updated false-positive counts");
            }
        }

        Commands::Config {
            action: ConfigAction::Show,
        } => {
            let manager = ConfigManager::load_from(cli.config)?;
            if let Some(path) = manager.path() {
                println!("# merged with {}", path.display());
            }
            print!("{}", manager.config().to_toml_string()?);
        }
    }

    Ok(())
}
