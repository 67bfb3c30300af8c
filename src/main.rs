use clap::Parser;
use pinwatch_lib::market::types::{StartTrackerArgs, TimeRange};
use pinwatch_lib::RunOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Tracks live prediction-market prices for a pinned set of events.
#[derive(Parser, Debug)]
#[command(name = "pinwatch")]
#[command(version)]
struct Args {
    /// Directory holding the sqlite catalog cache
    #[arg(long, env = "PINWATCH_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Event id to pin in addition to auto-pinned groups (repeatable)
    #[arg(long = "pin")]
    pins: Vec<String>,

    /// Number of leading catalog groups pinned on first load
    #[arg(long)]
    auto_pin: Option<usize>,

    /// Keyword identifying tracked events (repeatable, replaces the defaults)
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Default lookback window: live, 1h, 1d, 1w or 1m
    #[arg(long, value_parser = parse_time_range)]
    range: Option<TimeRange>,

    /// Seconds between status reports
    #[arg(long, default_value_t = 30)]
    report_interval_secs: u64,

    /// Market-data websocket URL
    #[arg(long)]
    stream_url: Option<String>,
}

fn parse_time_range(raw: &str) -> Result<TimeRange, String> {
    TimeRange::parse_str(raw).map_err(|error| error.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pinwatch=info,pinwatch_lib=info,info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let options = RunOptions {
        data_dir: args.data_dir,
        tracker: StartTrackerArgs {
            stream_url: args.stream_url,
            keywords: (!args.keywords.is_empty()).then_some(args.keywords),
            auto_pin_count: args.auto_pin,
            default_time_range: args.range,
            ..Default::default()
        },
        pins: args.pins,
        report_interval: Duration::from_secs(args.report_interval_secs.max(1)),
    };

    pinwatch_lib::run(options).await?;
    Ok(())
}
