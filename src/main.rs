use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::config::RatewardenConfig;
use ratewarden::ratelimit::{Decision, RateLimiter, Rule};
use ratewarden::store;

/// Exit code when the last checked event was denied.
const EXIT_DENIED: u8 = 2;
/// Exit code when a check run was interrupted.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about = "Sliding-window rate limiting against a shared store")]
struct Cli {
    /// YAML configuration file; RATEWARDEN__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured policies with their rules in evaluation order
    Policies,

    /// Run the rate limiter for an identifier under a policy
    Check {
        policy: String,
        identifier: String,

        /// Number of events to submit
        #[arg(long, default_value_t = 1)]
        times: u32,

        /// Pause between events in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Print one JSON object per decision
        #[arg(long)]
        json: bool,
    },

    /// Clear every window a policy keeps for an identifier
    Reset { policy: String, identifier: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = RatewardenConfig::load(cli.config.as_deref())?;
    info!(
        backend = ?config.store.backend,
        namespace = %config.store.namespace,
        policies = config.policies.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Policies => {
            for name in config.policies.keys() {
                let mut rules = config.policy(name)?;
                rules.sort_by(|a, b| a.strictness_cmp(b));
                println!("{}: {}", name, describe(&rules));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            policy,
            identifier,
            times,
            interval_ms,
            json,
        } => {
            let rules = config.policy(&policy)?;
            let store = store::open(&config.store).await?;
            let limiter: RateLimiter = RateLimiter::new(store.clone(), rules)?;
            info!(policy = %policy, rules = %describe(limiter.rules()), "Rate limiter initialized");

            let run = async {
                let mut last = Decision::Allowed;
                for call in 1..=times {
                    last = limiter.check(&identifier).await?;
                    report(call, &identifier, &last, json)?;
                    if call < times && interval_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    }
                }
                anyhow::Ok(last)
            };

            let outcome = tokio::select! {
                result = run => Some(result),
                _ = shutdown_signal() => None,
            };

            store.close().await?;

            Ok(match outcome.transpose()? {
                Some(Decision::Allowed) => ExitCode::SUCCESS,
                Some(Decision::Denied { .. }) => ExitCode::from(EXIT_DENIED),
                None => ExitCode::from(EXIT_INTERRUPTED),
            })
        }
        Command::Reset { policy, identifier } => {
            let rules = config.policy(&policy)?;
            let store = store::open(&config.store).await?;
            for rule in &rules {
                store.reset(rule, &identifier).await?;
            }
            store.close().await?;

            info!(policy = %policy, identifier = %identifier, "Windows reset");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn describe(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn report(call: u32, identifier: &str, decision: &Decision, json: bool) -> anyhow::Result<()> {
    let denied_by = match decision {
        Decision::Allowed => None,
        Decision::Denied { rule } => Some(rule.to_string()),
    };

    if json {
        let line = serde_json::json!({
            "call": call,
            "identifier": identifier,
            "allowed": decision.is_allowed(),
            "denied_by": denied_by,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        match denied_by {
            None => println!("{}: allowed", call),
            Some(rule) => println!("{}: denied by {}", call, rule),
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
