use std::{io, net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tally::{
    config::{self, Config, Window},
    metric::Metric,
    processor::{self, Processor},
    registry::Summary,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    runtime::Builder,
    signal,
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to load tally config: {0}")]
    Config(#[from] config::Error),
    #[error(transparent)]
    Processor(#[from] processor::Error),
    #[error("Failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Summary writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Either --config-path or --window must be given")]
    NoWindow,
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
/// Summarize newline delimited JSON metrics from stdin into window-aligned
/// summaries on stdout.
struct Cli {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// length of each summary window, e.g. 5000 or 5s; overrides the
    /// configuration file
    #[clap(long)]
    window: Option<Window>,
    /// append `.summary` to the name of every summary
    #[clap(long)]
    suffix: bool,
    /// how often to check whether the current window has elapsed
    #[clap(long, default_value = "1s", value_parser = humantime::parse_duration)]
    ping_interval: Duration,
    /// address to expose prometheus metrics about tally itself on
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

fn get_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match (&cli.config_path, &cli.window) {
        (Some(path), _) => Config::from_path(path)?,
        (None, Some(window)) => Config::new(window.clone()),
        (None, None) => return Err(Error::NoWindow),
    };
    if let Some(window) = &cli.window {
        config.window = window.clone();
    }
    config.suffix |= cli.suffix;
    config.window_ms()?;
    Ok(config)
}

fn ingest(processor: &Processor, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Metric>(line) {
        Ok(metric) => {
            if let Err(err) = processor.process(metric) {
                warn!("Dropped metric: {err}");
            }
        }
        Err(err) => warn!("Malformed metric line: {err}"),
    }
}

async fn write_summaries(mut rx: mpsc::UnboundedReceiver<Summary>) -> Result<(), Error> {
    let mut stdout = tokio::io::stdout();
    while let Some(summary) = rx.recv().await {
        let mut line = serde_json::to_vec(&summary)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn inner_main(
    config: Config,
    ping_interval: Duration,
    prometheus_addr: Option<SocketAddr>,
) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        info!("Exposing prometheus metrics on {addr}");
        PrometheusBuilder::new().with_http_listener(addr).install()?;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut processor = Processor::builder(config).observer(tx).build()?;
    let writer = tokio::spawn(write_summaries(rx));

    processor.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = time::interval(ping_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => ingest(&processor, &line),
                None => {
                    info!("input closed");
                    break;
                }
            },
            _ = interval.tick() => {
                if let Some(flush) = processor.ping().await {
                    debug!(timestamp = flush.timestamp, summaries = flush.summaries, "window flushed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    processor.stop().await;
    // Dropping the processor drops the sender, letting the writer finish.
    drop(processor);
    writer.await??;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tally {version}.");

    let cli = Cli::parse();
    let config = get_config(&cli)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, cli.ping_interval, cli.prometheus_addr));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tally").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn window_flag_is_enough() {
        let config = get_config(&cli(&["--window", "200ms", "--suffix"])).unwrap();
        assert_eq!(config.window_ms().unwrap(), 200);
        assert!(config.suffix);
    }

    #[test]
    fn numeric_window_flag_is_millis() {
        let config = get_config(&cli(&["--window", "1500"])).unwrap();
        assert_eq!(config.window_ms().unwrap(), 1_500);
    }

    #[test]
    fn missing_window_is_an_error() {
        assert!(matches!(get_config(&cli(&[])), Err(Error::NoWindow)));
    }

    #[test]
    fn invalid_window_is_an_error() {
        assert!(matches!(
            get_config(&cli(&["--window", "0"])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn ping_interval_parses_durations() {
        let cli = cli(&["--window", "1m", "--ping-interval", "250ms"]);
        assert_eq!(cli.ping_interval, Duration::from_millis(250));
    }
}
