use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use proxy_checker::{
    logging,
    proxy::{ProbeStatus, ProxyAddress, ProxyParser},
    scheduler::{Dispatcher, ProxyInspector},
    storage::{PgStore, TaskStore},
    Config,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Validates submitted SOCKS5/HTTP proxies in the background
#[derive(Parser)]
#[command(name = "proxy-checker")]
#[command(about = "Validates submitted SOCKS5/HTTP proxies in the background")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, env = "PROXY_CHECKER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the check scheduler until interrupted
    Run,
    /// Submit proxies for checking
    Submit {
        /// Proxy addresses in ip:port form
        addresses: Vec<String>,
        /// File with one ip:port per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show per-probe results of a check
    Status {
        /// Check ID returned by submit
        check_id: Uuid,
    },
    /// List submitted checks, newest first
    History,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(&config.logging)?;

    // Validate input before touching the database.
    let submission = match &cli.command {
        Commands::Submit { addresses, file } => {
            Some(read_submission(addresses, file.as_deref())?)
        }
        _ => None,
    };

    let store = PgStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to database")?;

    match cli.command {
        Commands::Run => {
            store.migrate().await?;
            run_scheduler(&config, store).await?;
        }
        Commands::Migrate => {
            store.migrate().await?;
            println!("Migrations applied");
        }
        Commands::Submit { .. } => {
            let proxies = submission.unwrap_or_default();
            let check_id = store.submit_batch(&proxies).await?;
            println!("Submitted {} proxies", proxies.len());
            println!("Check ID: {}", check_id);
        }
        Commands::Status { check_id } => {
            let rows = store.batch_status(check_id).await?;
            if rows.is_empty() {
                println!("No results for check {}", check_id);
            }
            for row in rows {
                let state = match (row.status, row.working) {
                    (ProbeStatus::Pending, _) => "…",
                    (_, true) => "✓",
                    (_, false) => "✗",
                };
                print!(
                    "{} {:<6} {} ({})",
                    state,
                    row.protocol,
                    ProxyAddress::new(row.ip, row.port),
                    row.status
                );
                if row.working {
                    print!(" {}ms", row.latency_ms);
                }
                if !row.city.is_empty() {
                    print!(" {}", row.city);
                }
                if !row.external_ip.is_empty() {
                    print!(" via {}", row.external_ip);
                }
                println!();
            }
        }
        Commands::History => {
            let items = store.history().await?;
            if items.is_empty() {
                println!("No checks submitted yet.");
            }
            for item in items {
                println!(
                    "{} {} - {} proxies",
                    item.created_at.format("%Y-%m-%d %H:%M:%S"),
                    item.batch_id,
                    item.proxy_count
                );
            }
        }
    }

    Ok(())
}

/// Collect and validate the addresses of a `submit` command
fn read_submission(addresses: &[String], file: Option<&Path>) -> Result<Vec<ProxyAddress>> {
    let mut proxies = ProxyParser::parse_all(addresses)?;
    if let Some(path) = file {
        let from_file = ProxyParser::parse_file(path)
            .with_context(|| format!("reading proxies from {:?}", path))?;
        proxies.extend(from_file);
    }
    if proxies.is_empty() {
        bail!("No proxy addresses given. Pass ip:port arguments or --file.");
    }
    Ok(proxies)
}

async fn run_scheduler(config: &Config, store: PgStore) -> Result<()> {
    let inspector = ProxyInspector::from_config(config.checker.checker_config())
        .context("building proxy inspector")?;
    let dispatcher = Dispatcher::new(
        Arc::new(store),
        Arc::new(inspector),
        config.scheduler_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested, finishing current batch"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_read_submission_accepts_valid_addresses() {
        let proxies = read_submission(&args(&["1.2.3.4:8080", "[::1]:1080"]), None).unwrap();
        assert_eq!(proxies.len(), 2);
    }

    #[test]
    fn test_read_submission_rejects_bad_input() {
        let err = read_submission(&args(&["1.2.3.4:8080", "not-a-proxy"]), None).unwrap_err();
        assert!(err.to_string().contains("not-a-proxy"));

        assert!(read_submission(&[], None).is_err());
        assert!(read_submission(&[], Some(Path::new("/nonexistent/proxies.txt"))).is_err());
    }

    #[test]
    fn test_submit_arguments_are_validated() {
        let cli = Cli::parse_from(["proxy-checker", "submit", "bogus"]);
        let Commands::Submit { addresses, file } = cli.command else {
            panic!("expected submit");
        };
        assert!(read_submission(&addresses, file.as_deref()).is_err());
    }
}
