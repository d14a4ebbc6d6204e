use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use resource_dl::report::{self, BatchSummary, EXIT_FATAL};
use resource_dl::{FetchManager, Result, cancel_on_signal};

mod cli;

use cli::{CliArgs, prints_to_stdout};

fn init_logging(verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(args: CliArgs) -> Result<u8> {
    let config = args.fetch_config()?;
    let requests = args.requests().await?;
    let to_stdout: Vec<bool> = requests.iter().map(prints_to_stdout).collect();

    let manager = FetchManager::from_config(&config)?;
    let cancel = CancellationToken::new();
    let watcher = cancel_on_signal(cancel.clone());

    let outcomes = manager
        .submit_with_cancel(requests, &config, cancel.clone())
        .await?;
    cancel.cancel();
    watcher.await.ok();

    let mut stdout = std::io::stdout().lock();
    for (outcome, print) in outcomes.iter().zip(to_stdout) {
        eprintln!("{}", report::describe(outcome));
        if print {
            if let Some(content) = &outcome.content {
                stdout.write_all(content)?;
            }
        }
    }
    stdout.flush()?;

    let summary = BatchSummary::from_outcomes(&outcomes);
    eprintln!("{summary}");
    Ok(summary.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
